//! Offline maintenance of an output tree.
//!
//! [`qa`] re-transcribes finished clips and writes failure records for pass
//! directories that never had one. [`rebuild_completion`] regenerates the
//! completion ledger from the combined artifacts actually on disk.

use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::RunError;
use crate::layout::{slot_combined_name, COMBINED_FILE};
use crate::ledger::{write_atomic, CompletionLedger, FailureRecord, FileLedger, Ledger, FAILS_FILE};
use crate::verify::AttemptOutcome;
use crate::{Transcriber, Waveform};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditReport {
    /// Leaf directories whose clips were transcribed.
    pub audited_dirs: usize,
    /// Leaf directories skipped because they already carry a failure record.
    pub skipped_dirs: usize,
    pub clips: usize,
    pub failures: usize,
}

/// Re-audit every leaf directory under `root`.
///
/// Only `{n}.wav` clips with a paired `{n}.txt` are checked; clips without
/// their text are ignored.
pub fn qa(
    root: &Path,
    transcriber: &mut dyn Transcriber,
    ledger: &mut dyn Ledger,
) -> Result<AuditReport, RunError> {
    let mut report = AuditReport::default();

    for dir in leaf_dirs(root)? {
        if dir.join(FAILS_FILE).exists() {
            log::debug!("Skipping {}: already has a failure record", dir.display());
            report.skipped_dirs += 1;
            continue;
        }
        log::info!("Testing {}", dir.display());
        report.audited_dirs += 1;

        let mut record = FailureRecord::new();
        for (index, wav_path) in numbered_clips(&dir)? {
            let txt_path = dir.join(format!("{index}.txt"));
            if !txt_path.exists() {
                continue;
            }
            let ground_truth = fs::read_to_string(&txt_path)?;
            let ground_truth = ground_truth.trim();
            report.clips += 1;

            let heard = Waveform::read_wav(&wav_path)
                .map_err(|e| format!("<unreadable clip: {e}>"))
                .and_then(|audio| {
                    transcriber
                        .transcribe(&audio)
                        .map_err(|e| format!("<transcription failed: {e}>"))
                });

            match heard {
                Ok(transcript) => {
                    write_atomic(
                        &dir.join(format!("{index}.timestamps")),
                        &transcript.timestamp_lines(),
                    )?;
                    let outcome = AttemptOutcome::check(ground_truth, transcript.text.trim());
                    if !outcome.passed {
                        log::warn!("Mismatch in {}", wav_path.display());
                        record.insert(index, ground_truth, &outcome.transcript);
                    }
                }
                Err(reason) => {
                    log::warn!("{}: {reason}", wav_path.display());
                    record.insert(index, ground_truth, &reason);
                }
            }
        }

        if !record.is_empty() {
            report.failures += record.len();
            ledger.save_failures(&dir, &record)?;
        }
    }

    log::info!(
        "Audited {} directories ({} skipped), {} clips, {} failures",
        report.audited_dirs,
        report.skipped_dirs,
        report.clips,
        report.failures
    );
    Ok(report)
}

/// Rewrite the completion ledger under `root` from the combined artifacts
/// found on disk. Returns the number of entries written.
pub fn rebuild_completion(root: &Path) -> Result<usize, RunError> {
    let primary_review = slot_combined_name(0);
    let mut completed = CompletionLedger::default();

    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy();
        if !entry.file_type().is_file() || (name != COMBINED_FILE && name != primary_review) {
            continue;
        }
        if let Ok(relative) = entry.path().strip_prefix(root) {
            let key: Vec<String> = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();
            completed.insert(&key.join("/"));
        }
    }

    let count = completed.len();
    FileLedger::open(root)?.replace_completion(completed)?;
    log::info!("Marked {count} passes as generated under {}", root.display());
    Ok(count)
}

/// Directories under `root` (itself included) without subdirectories.
fn leaf_dirs(root: &Path) -> Result<Vec<PathBuf>, RunError> {
    let mut leaves = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_dir() {
            continue;
        }
        let mut has_subdir = false;
        for child in fs::read_dir(entry.path())? {
            if child?.file_type()?.is_dir() {
                has_subdir = true;
                break;
            }
        }
        if !has_subdir {
            leaves.push(entry.into_path());
        }
    }
    Ok(leaves)
}

/// `{n}.wav` files in `dir`, ordered by `n`.
fn numbered_clips(dir: &Path) -> Result<Vec<(usize, PathBuf)>, RunError> {
    let mut clips = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == "wav") {
            let index = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(|stem| stem.parse::<usize>().ok());
            if let Some(index) = index {
                clips.push((index, path));
            }
        }
    }
    clips.sort();
    Ok(clips)
}
