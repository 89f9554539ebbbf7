//! The per-pass generation state machine.
//!
//! A pass reads one document aloud in one voice. Segments are visited in
//! order and each ends up in exactly one of these states:
//!
//! ```text
//! Pending ─┬─> LoadedFromCache
//!          └─> Generating ─> (Verifying) ─┬─> Done
//!                                          └─> Failed
//! ```
//!
//! A segment is loaded from its committed clip unless it is in the
//! regeneration set or listed in the pass's failure record. Everything else
//! is synthesized, optionally verified against a transcription, and committed
//! before the next segment starts, so a killed run resumes at the first
//! segment without a clip.

use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;

use derive_builder::Builder;

use crate::accelerator::AcceleratorPool;
use crate::combine::{combine, combine_slots};
use crate::debug::{DebugRecorder, DebugState};
use crate::error::{PassError, SynthesisError};
use crate::layout::PassLayout;
use crate::ledger::{write_atomic, FailureRecord, Ledger};
use crate::segment::GenerationUnit;
use crate::verify::AttemptOutcome;
use crate::voice::{resolve_voice, VoiceMaterial, VoiceSpec};
use crate::{Synthesizer, Transcriber, VoiceSource, Waveform, SAMPLE_RATE};

/// Candidate count used by fix mode when none is given explicitly.
pub const FIX_MODE_CANDIDATES: usize = 10;

#[derive(Debug, Clone, Builder)]
#[builder(default)]
pub struct PassOptions {
    /// Candidates requested per synthesis call.
    pub candidates: usize,
    /// Extra synthesis rounds after the first one is exhausted.
    pub retries: usize,
    /// Transcribe and verify every candidate.
    pub verify: bool,
    /// Regenerate previously failed segments; implies `verify`.
    pub fix: bool,
    /// Keep every candidate and combine one reading per candidate slot.
    pub review: bool,
    /// Segments to regenerate regardless of existing clips.
    #[builder(setter(strip_option))]
    pub regenerate: Option<BTreeSet<usize>>,
    /// Seed shared by every segment of a pass.
    pub seed: u64,
}

impl Default for PassOptions {
    fn default() -> Self {
        Self {
            candidates: 1,
            retries: 0,
            verify: false,
            fix: false,
            review: false,
            regenerate: None,
            seed: 0,
        }
    }
}

impl PassOptions {
    pub fn wants_verification(&self) -> bool {
        self.verify || self.fix
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentState {
    Pending,
    LoadedFromCache,
    Generating,
    Verifying,
    Done,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassStatus {
    /// Every segment has a clip and the combined output was written.
    Completed,
    /// Some segment ended without any clip; nothing was combined.
    Incomplete,
    /// The completion ledger already lists this pass.
    SkippedByLedger,
    /// The combined output already exists.
    SkippedExisting,
}

#[derive(Debug, Clone)]
pub struct PassReport {
    pub status: PassStatus,
    pub segments: Vec<SegmentState>,
    pub failures: FailureRecord,
    pub combined: Vec<PathBuf>,
}

impl PassReport {
    fn skipped(status: PassStatus) -> Self {
        Self {
            status,
            segments: Vec::new(),
            failures: FailureRecord::new(),
            combined: Vec::new(),
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(
            self.status,
            PassStatus::SkippedByLedger | PassStatus::SkippedExisting
        )
    }
}

/// One (document, voice) pass to run.
#[derive(Debug, Clone, Copy)]
pub struct Pass<'a> {
    /// Progress label, e.g. `3/12: essay`.
    pub label: &'a str,
    pub units: &'a [GenerationUnit],
    pub voice: &'a VoiceSpec,
    pub layout: &'a PassLayout,
}

struct SegmentResult {
    state: SegmentState,
    clips: Option<Vec<Waveform>>,
    failure: Option<String>,
}

impl SegmentResult {
    fn done(clips: Vec<Waveform>) -> Self {
        Self {
            state: SegmentState::Done,
            clips: Some(clips),
            failure: None,
        }
    }

    fn failed(clips: Option<Vec<Waveform>>, transcript: String) -> Self {
        Self {
            state: SegmentState::Failed,
            clips,
            failure: Some(transcript),
        }
    }
}

pub struct Orchestrator {
    synthesizer: Box<dyn Synthesizer>,
    transcriber: Option<Box<dyn Transcriber>>,
    voices: Box<dyn VoiceSource>,
    ledger: Box<dyn Ledger>,
    accelerators: AcceleratorPool,
    debug: Option<DebugRecorder>,
    options: PassOptions,
}

impl Orchestrator {
    pub fn new(
        synthesizer: Box<dyn Synthesizer>,
        transcriber: Option<Box<dyn Transcriber>>,
        voices: Box<dyn VoiceSource>,
        ledger: Box<dyn Ledger>,
        options: PassOptions,
    ) -> Self {
        if options.wants_verification() && transcriber.is_none() {
            log::warn!("Verification requested without a transcriber; quality gate disabled");
        }
        Self {
            synthesizer,
            transcriber,
            voices,
            ledger,
            accelerators: AcceleratorPool::default(),
            debug: None,
            options,
        }
    }

    pub fn with_accelerators(mut self, pool: AcceleratorPool) -> Self {
        self.accelerators = pool;
        self
    }

    pub fn with_debug_recorder(mut self, recorder: DebugRecorder) -> Self {
        self.debug = Some(recorder);
        self
    }

    pub fn options(&self) -> &PassOptions {
        &self.options
    }

    pub fn options_mut(&mut self) -> &mut PassOptions {
        &mut self.options
    }

    pub fn ledger(&self) -> &dyn Ledger {
        self.ledger.as_ref()
    }

    fn quality_gate(&self) -> bool {
        self.options.wants_verification() && self.transcriber.is_some()
    }

    fn candidate_count(&self) -> usize {
        self.options.candidates.max(1)
    }

    /// Run one pass to completion.
    ///
    /// Voice, ledger and filesystem errors abort the pass. Capability errors
    /// and failed verifications only mark segments as failed.
    pub fn run_pass(&mut self, pass: Pass<'_>) -> Result<PassReport, PassError> {
        let layout = pass.layout;
        let review = self.options.review;
        let gate = self.quality_gate();

        let known_failed: BTreeSet<usize> = if gate {
            self.ledger
                .failures(layout.dir())?
                .map(|record| record.indices())
                .unwrap_or_default()
        } else {
            BTreeSet::new()
        };
        let regenerate = match &self.options.regenerate {
            Some(explicit) => explicit.clone(),
            None => known_failed.clone(),
        };

        if regenerate.is_empty() && known_failed.is_empty() {
            let key = layout.ledger_key(review);
            if self.ledger.is_complete(&key) {
                log::info!("Skipping {} [{}]: already marked as generated", pass.label, pass.voice.name);
                return Ok(PassReport::skipped(PassStatus::SkippedByLedger));
            }
            if layout.primary_combined(review).exists() {
                log::info!("Skipping {} [{}]: combined output exists", pass.label, pass.voice.name);
                return Ok(PassReport::skipped(PassStatus::SkippedExisting));
            }
        } else if self.options.regenerate.is_none() {
            log::info!(
                "Fix mode for {} [{}]: regenerating segments {:?}",
                pass.label,
                pass.voice.name,
                regenerate
            );
        }

        let lease = self.accelerators.acquire();
        log::debug!("Pass {} holds accelerator {}", pass.label, lease.device());
        self.synthesizer.use_device(lease.device());
        if let Some(transcriber) = self.transcriber.as_mut() {
            transcriber.use_device(lease.device());
        }

        let material = resolve_voice(self.voices.as_ref(), pass.voice)?;
        fs::create_dir_all(layout.dir())?;
        if let Some(recorder) = &self.debug {
            recorder.record(&DebugState {
                seed: self.options.seed,
                texts: pass.units.iter().map(|u| u.text.clone()).collect(),
                voice: material.clone(),
            })?;
        }

        let mut states = vec![SegmentState::Pending; pass.units.len()];
        let mut clips: Vec<Option<Vec<Waveform>>> = Vec::with_capacity(pass.units.len());
        let mut failures = FailureRecord::new();

        for (position, unit) in pass.units.iter().enumerate() {
            let index = unit.segment_index;
            log::info!(
                "{} {}/{} [{}]",
                pass.label,
                position + 1,
                pass.units.len(),
                pass.voice.name
            );
            log::debug!("Segment {index}: {}", unit.text);

            if !regenerate.contains(&index) && !known_failed.contains(&index) {
                if let Some(cached) = self.load_committed(layout, index) {
                    log::debug!("Segment {index}: {:?}", SegmentState::LoadedFromCache);
                    states[position] = SegmentState::LoadedFromCache;
                    clips.push(Some(cached));
                    continue;
                }
            }

            let result = self.generate_segment(unit, &material, layout, gate)?;
            log::debug!("Segment {index}: {:?}", result.state);
            states[position] = result.state;
            if let Some(transcript) = &result.failure {
                failures.insert(index, &unit.text, transcript);
            }
            clips.push(result.clips);
        }

        if !failures.is_empty() {
            self.ledger.save_failures(layout.dir(), &failures)?;
        } else if gate {
            self.ledger.clear_failures(layout.dir())?;
        }

        let complete: Option<Vec<Vec<Waveform>>> = clips.into_iter().collect();
        let Some(segments) = complete else {
            log::warn!(
                "{} [{}] has segments without audio; not combining",
                pass.label,
                pass.voice.name
            );
            return Ok(PassReport {
                status: PassStatus::Incomplete,
                segments: states,
                failures,
                combined: Vec::new(),
            });
        };

        let combined = if segments.is_empty() {
            Vec::new()
        } else {
            self.write_combined(layout, &segments)?
        };
        self.ledger.mark_complete(&layout.ledger_key(review))?;
        drop(lease);

        Ok(PassReport {
            status: PassStatus::Completed,
            segments: states,
            failures,
            combined,
        })
    }

    fn write_combined(
        &self,
        layout: &PassLayout,
        segments: &[Vec<Waveform>],
    ) -> Result<Vec<PathBuf>, PassError> {
        if self.options.review {
            let readings = combine_slots(segments, self.candidate_count())?;
            let mut paths = Vec::with_capacity(readings.len());
            for (slot, reading) in readings.iter().enumerate() {
                let path = layout.slot_combined_path(slot);
                reading.commit_wav(&path)?;
                paths.push(path);
            }
            Ok(paths)
        } else {
            let reading = combine(segments.iter().filter_map(|c| c.first()))?;
            let path = layout.combined_path();
            reading.commit_wav(&path)?;
            log::info!(
                "Wrote {} ({:.1}s)",
                path.display(),
                reading.duration_secs()
            );
            Ok(vec![path])
        }
    }

    /// Committed clips for a segment, or `None` if any is missing or unusable.
    fn load_committed(&self, layout: &PassLayout, index: usize) -> Option<Vec<Waveform>> {
        let paths: Vec<PathBuf> = if self.options.review {
            (0..self.candidate_count())
                .map(|slot| layout.slot_clip_path(index, slot))
                .collect()
        } else {
            vec![layout.clip_path(index)]
        };

        let mut clips = Vec::with_capacity(paths.len());
        for path in paths {
            if !path.exists() {
                return None;
            }
            match Waveform::read_wav(&path) {
                Ok(clip) if clip.sample_rate == SAMPLE_RATE => clips.push(clip),
                Ok(clip) => {
                    log::warn!(
                        "{} is {} Hz, regenerating",
                        path.display(),
                        clip.sample_rate
                    );
                    return None;
                }
                Err(e) => {
                    log::warn!("Unreadable clip {}: {e}, regenerating", path.display());
                    return None;
                }
            }
        }
        Some(clips)
    }

    fn generate_segment(
        &mut self,
        unit: &GenerationUnit,
        material: &VoiceMaterial,
        layout: &PassLayout,
        gate: bool,
    ) -> Result<SegmentResult, PassError> {
        let index = unit.segment_index;
        write_atomic(&layout.text_path(index), &unit.text)?;

        // Without verification or review only the first candidate is ever used.
        let candidates = if gate || self.options.review {
            self.candidate_count()
        } else {
            1
        };
        let mut last_attempt: Option<(Waveform, String)> = None;
        let mut last_error: Option<String> = None;

        for round in 0..=self.options.retries {
            let seed = self.options.seed.wrapping_add(round as u64);
            log::debug!("Segment {index}: {:?} (round {round}, seed {seed})", SegmentState::Generating);

            let batch = match self.request_candidates(&unit.text, material, candidates, seed) {
                Ok(batch) => batch,
                Err(e) => {
                    log::warn!("Segment {index}: synthesis failed: {e}");
                    last_error = Some(format!("<synthesis failed: {e}>"));
                    continue;
                }
            };

            if self.options.review {
                for (slot, clip) in batch.iter().enumerate() {
                    clip.commit_wav(&layout.slot_clip_path(index, slot))?;
                }
                batch[0].commit_wav(&layout.clip_path(index))?;
                discard_timestamps(layout, index)?;
                return Ok(SegmentResult::done(batch));
            }

            if !gate {
                let chosen = batch.into_iter().take(1).collect::<Vec<_>>();
                chosen[0].commit_wav(&layout.clip_path(index))?;
                discard_timestamps(layout, index)?;
                return Ok(SegmentResult::done(chosen));
            }

            for (slot, candidate) in batch.into_iter().enumerate() {
                candidate.commit_wav(&layout.clip_path(index))?;
                discard_timestamps(layout, index)?;
                log::debug!("Segment {index}: {:?} candidate {slot}", SegmentState::Verifying);

                let Some(transcriber) = self.transcriber.as_mut() else {
                    return Ok(SegmentResult::done(vec![candidate]));
                };
                let transcript = match transcriber.transcribe(&candidate) {
                    Ok(transcript) => transcript,
                    Err(e) => {
                        log::warn!("Segment {index}: transcription failed: {e}");
                        last_attempt = Some((candidate, format!("<transcription failed: {e}>")));
                        continue;
                    }
                };

                write_atomic(&layout.timestamps_path(index), &transcript.timestamp_lines())?;
                let outcome = AttemptOutcome::check(&unit.text, transcript.text.trim());
                if outcome.passed {
                    return Ok(SegmentResult::done(vec![candidate]));
                }
                log::warn!(
                    "Segment {index}: transcript mismatch\n  expected: {}\n  heard:    {}",
                    outcome.ground_truth,
                    outcome.transcript
                );
                last_attempt = Some((candidate, outcome.transcript));
            }
        }

        if let Some((clip, transcript)) = last_attempt {
            return Ok(SegmentResult::failed(Some(vec![clip]), transcript));
        }

        let reason = last_error.unwrap_or_default();
        let fallback = self.load_committed(layout, index);
        if fallback.is_some() {
            log::warn!("Segment {index}: keeping previously committed clip");
        }
        Ok(SegmentResult::failed(fallback, reason))
    }

    /// Ask for candidates and reject batches the pipeline cannot use.
    fn request_candidates(
        &mut self,
        text: &str,
        material: &VoiceMaterial,
        candidates: usize,
        seed: u64,
    ) -> Result<Vec<Waveform>, SynthesisError> {
        let mut batch = self
            .synthesizer
            .synthesize(text, material, candidates, seed)?;

        if batch.is_empty() {
            return Err(SynthesisError::NoCandidates);
        }
        if self.options.review && batch.len() != candidates {
            return Err(SynthesisError::CandidateCount {
                expected: candidates,
                actual: batch.len(),
            });
        }
        batch.truncate(candidates);
        if let Some(bad) = batch.iter().find(|c| c.sample_rate != SAMPLE_RATE) {
            return Err(SynthesisError::SampleRate {
                expected: SAMPLE_RATE,
                actual: bad.sample_rate,
            });
        }
        Ok(batch)
    }
}

/// Drop timestamps that describe a clip which has just been replaced.
fn discard_timestamps(layout: &PassLayout, index: usize) -> std::io::Result<()> {
    match fs::remove_file(layout.timestamps_path(index)) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}
