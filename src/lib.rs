//! # narrate-rs
//!
//! Batch narration of text corpora: every document is read aloud once per
//! requested voice by an external synthesis capability, optionally checked by
//! an external transcription capability, and assembled into one recording.
//!
//! ## Features
//!
//! - **Resumable passes**: committed clips are never regenerated unless asked,
//!   so a killed run picks up at the first segment without a clip
//! - **Quality gate**: candidates are transcribed and compared against the
//!   source text, failures are recorded in a per-pass `fails` file
//! - **Pluggable capabilities**: synthesis, transcription and voice lookup are
//!   traits; process-backed implementations live in [`engines`]
//!
//! ## Quick Start
//!
//! ```ignore
//! use narrate_rs::{
//!     engines::command::{CommandSynthesizer, CommandTranscriber},
//!     ledger::FileLedger,
//!     orchestrator::{Orchestrator, PassOptionsBuilder},
//!     voice::VoiceLibrary,
//! };
//!
//! let options = PassOptionsBuilder::default().verify(true).build()?;
//! let mut orchestrator = Orchestrator::new(
//!     Box::new(CommandSynthesizer::new("tts-synth", vec![])),
//!     Some(Box::new(CommandTranscriber::new("whisper-json", vec![]))),
//!     Box::new(VoiceLibrary::new("voices")),
//!     Box::new(FileLedger::open("results")?),
//!     options,
//! );
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod accelerator;
pub mod audit;
pub mod combine;
pub mod corpus;
pub mod debug;
pub mod engines;
pub mod error;
pub mod ledger;
pub mod layout;
pub mod orchestrator;
pub mod segment;
pub mod verify;
pub mod voice;

#[cfg(test)]
pub(crate) mod testing;

use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

pub use error::{SynthesisError, TranscriptionError, VoiceError};
pub use voice::VoiceMaterial;

/// Sample rate shared by every clip the pipeline produces or combines.
pub const SAMPLE_RATE: u32 = 24000;

/// A mono audio clip.
///
/// Contains raw f32 audio samples and the sample rate of the clip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Waveform {
    /// Raw audio samples as f32 values
    pub samples: Vec<f32>,
    /// Sample rate of the audio (24000 for everything the pipeline commits)
    pub sample_rate: u32,
}

impl Waveform {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Write the audio to a 32-bit float WAV file.
    pub fn write_wav(&self, path: &Path) -> Result<(), hound::Error> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(path, spec)?;
        for &sample in &self.samples {
            writer.write_sample(sample)?;
        }
        writer.finalize()?;
        Ok(())
    }

    /// Write the audio next to `path` and rename it into place.
    ///
    /// A reader never observes a partially written file at `path`.
    pub fn commit_wav(&self, path: &Path) -> Result<(), hound::Error> {
        let staging = staging_file(path)?;
        self.write_wav(staging.path())?;
        staging.persist(path).map_err(|e| e.error)?;
        Ok(())
    }

    /// Read a WAV file, downmixing multi-channel audio and converting
    /// integer PCM to f32 in `[-1.0, 1.0]`.
    pub fn read_wav(path: &Path) -> Result<Self, hound::Error> {
        let mut reader = hound::WavReader::open(path)?;
        let spec = reader.spec();
        let interleaved: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
            hound::SampleFormat::Int => {
                let scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<Result<_, _>>()?
            }
        };

        let channels = spec.channels.max(1) as usize;
        let samples = if channels == 1 {
            interleaved
        } else {
            interleaved
                .chunks(channels)
                .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
                .collect()
        };

        Ok(Self {
            samples,
            sample_rate: spec.sample_rate,
        })
    }

    /// Duration of the audio in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Uniquely named sibling of `path` for write-then-rename commits.
///
/// Concurrent writers of the same target each get their own staging file.
/// It is removed on drop unless persisted.
pub(crate) fn staging_file(path: &Path) -> io::Result<NamedTempFile> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut prefix = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    prefix.push(".");
    tempfile::Builder::new()
        .prefix(&prefix)
        .suffix(".partial")
        .tempfile_in(dir)
}

/// One timed span of a transcription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    /// Start time in seconds.
    pub start: f64,
    /// End time in seconds.
    pub end: f64,
    pub text: String,
}

/// Output of a transcription capability.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    /// Full transcribed text.
    pub text: String,
    /// Timed sub-segments, in order.
    #[serde(default)]
    pub segments: Vec<TranscriptSegment>,
}

impl Transcript {
    /// Render the `{start}-{end}: {text}` lines stored next to each clip.
    pub fn timestamp_lines(&self) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            out.push_str(&format!(
                "{:?}-{:?}: {}\n",
                segment.start, segment.end, segment.text
            ));
        }
        out
    }
}

/// Text-to-speech capability consumed by the orchestrator.
///
/// Implementations may run a model in-process or call out to a server; the
/// orchestrator only relies on this contract. Every call is blocking.
pub trait Synthesizer {
    /// Produce `candidates` alternative readings of `text` in the given voice.
    ///
    /// Identical inputs and `seed` should yield identical audio. Returned
    /// clips must be at [`SAMPLE_RATE`].
    fn synthesize(
        &mut self,
        text: &str,
        voice: &VoiceMaterial,
        candidates: usize,
        seed: u64,
    ) -> Result<Vec<Waveform>, SynthesisError>;

    /// Run subsequent requests on accelerator `device`.
    ///
    /// Called at the start of every pass with the device the pass leased.
    fn use_device(&mut self, _device: usize) {}
}

/// Speech-to-text capability consumed by the quality gate.
pub trait Transcriber {
    fn transcribe(&mut self, audio: &Waveform) -> Result<Transcript, TranscriptionError>;

    /// Run subsequent transcriptions on accelerator `device`.
    fn use_device(&mut self, _device: usize) {}
}

/// Lookup of reference voice material.
pub trait VoiceSource {
    /// Load the material for one voice, or the blend of several when more
    /// than one identifier is given.
    fn resolve_voices(&self, ids: &[String]) -> Result<VoiceMaterial, VoiceError>;
}

#[cfg(test)]
mod tests {
    use super::{staging_file, Transcript, TranscriptSegment, Waveform, SAMPLE_RATE};
    use std::fs;

    #[test]
    fn wav_survives_commit_and_read() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("0.wav");
        let clip = Waveform::new(vec![0.25, -0.5, 1.0], SAMPLE_RATE);

        clip.commit_wav(&path).expect("commit");

        let entries: Vec<String> = fs::read_dir(dir.path())
            .expect("list")
            .map(|e| e.expect("entry").file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(entries, vec!["0.wav".to_string()]);
        assert_eq!(Waveform::read_wav(&path).expect("read"), clip);
    }

    #[test]
    fn staging_files_are_distinct_siblings() {
        let dir = tempfile::tempdir().expect("tempdir");
        let target = dir.path().join("3.wav");
        let a = staging_file(&target).expect("first");
        let b = staging_file(&target).expect("second");

        assert_ne!(a.path(), b.path());
        for staging in [&a, &b] {
            assert_eq!(staging.path().parent(), Some(dir.path()));
            let name = staging.path().file_name().expect("name").to_string_lossy();
            assert!(name.starts_with("3.wav.") && name.ends_with(".partial"));
        }
    }

    #[test]
    fn timestamp_lines_keep_a_decimal_point() {
        let transcript = Transcript {
            text: "Hello there.".to_string(),
            segments: vec![
                TranscriptSegment {
                    start: 0.0,
                    end: 1.5,
                    text: " Hello".to_string(),
                },
                TranscriptSegment {
                    start: 1.5,
                    end: 2.0,
                    text: " there.".to_string(),
                },
            ],
        };
        assert_eq!(
            transcript.timestamp_lines(),
            "0.0-1.5:  Hello\n1.5-2.0:  there.\n"
        );
    }

    #[test]
    fn duration_uses_sample_rate() {
        let clip = Waveform::new(vec![0.0; 12000], SAMPLE_RATE);
        assert!((clip.duration_secs() - 0.5).abs() < f64::EPSILON);
    }
}
