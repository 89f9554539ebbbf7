//! Concatenation of per-segment clips into full-document recordings.
//!
//! No resampling and no crossfade: every input must already be at
//! [`SAMPLE_RATE`].

use crate::error::CombineError;
use crate::{Waveform, SAMPLE_RATE};

/// Concatenate clips in the order given, which must be segment order.
pub fn combine<'a>(parts: impl IntoIterator<Item = &'a Waveform>) -> Result<Waveform, CombineError> {
    let mut samples = Vec::new();
    let mut count = 0;

    for (index, part) in parts.into_iter().enumerate() {
        if part.sample_rate != SAMPLE_RATE {
            return Err(CombineError::SampleRate {
                index,
                expected: SAMPLE_RATE,
                actual: part.sample_rate,
            });
        }
        samples.extend_from_slice(&part.samples);
        count += 1;
    }

    if count == 0 {
        return Err(CombineError::Empty);
    }
    Ok(Waveform::new(samples, SAMPLE_RATE))
}

/// Build one full reading per candidate slot.
///
/// `segments[i][k]` is candidate `k` of segment `i`; the result's entry `k`
/// concatenates slot `k` across all segments.
pub fn combine_slots(segments: &[Vec<Waveform>], slots: usize) -> Result<Vec<Waveform>, CombineError> {
    (0..slots)
        .map(|slot| {
            let parts = segments
                .iter()
                .enumerate()
                .map(|(index, candidates)| {
                    candidates
                        .get(slot)
                        .ok_or(CombineError::MissingSlot { index, slot })
                })
                .collect::<Result<Vec<_>, _>>()?;
            combine(parts)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{combine, combine_slots};
    use crate::error::CombineError;
    use crate::{Waveform, SAMPLE_RATE};

    fn clip(values: &[f32]) -> Waveform {
        Waveform::new(values.to_vec(), SAMPLE_RATE)
    }

    #[test]
    fn concatenates_in_given_order() {
        let parts = [clip(&[0.1]), clip(&[0.2, 0.3]), clip(&[0.4])];
        let combined = combine(&parts).expect("combine");
        assert_eq!(combined, clip(&[0.1, 0.2, 0.3, 0.4]));
    }

    #[test]
    fn refuses_foreign_sample_rates() {
        let parts = [clip(&[0.1]), Waveform::new(vec![0.2], 22050)];
        let err = combine(&parts).expect_err("mismatch");
        assert!(matches!(
            err,
            CombineError::SampleRate {
                index: 1,
                actual: 22050,
                ..
            }
        ));
    }

    #[test]
    fn nothing_to_combine_is_an_error() {
        let parts: [Waveform; 0] = [];
        assert!(matches!(combine(&parts), Err(CombineError::Empty)));
    }

    #[test]
    fn slots_form_alternate_readings() {
        let segments = vec![
            vec![clip(&[1.0]), clip(&[2.0])],
            vec![clip(&[3.0]), clip(&[4.0])],
        ];
        let readings = combine_slots(&segments, 2).expect("slots");
        assert_eq!(readings, vec![clip(&[1.0, 3.0]), clip(&[2.0, 4.0])]);
    }

    #[test]
    fn short_segment_blocks_its_slot() {
        let segments = vec![vec![clip(&[1.0]), clip(&[2.0])], vec![clip(&[3.0])]];
        let err = combine_slots(&segments, 2).expect_err("missing slot");
        assert!(matches!(err, CombineError::MissingSlot { index: 1, slot: 1 }));
    }
}
