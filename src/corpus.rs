//! Document discovery and the whole-corpus run loop.
//!
//! A text directory is walked for `.txt` files. Each document is grouped by
//! its parent directory; a parent whose name contains `---` is an album and
//! is grouped under its own parent too:
//!
//! ```text
//! texts/essays/doc.txt              -> out/essays/{voice}/doc
//! texts/books/vol---one/ch1.txt     -> out/books/{voice}/vol---one/ch1
//! single file doc.txt               -> out/{voice}/doc
//! ```

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{PassError, RunError};
use crate::layout::PassLayout;
use crate::orchestrator::{Orchestrator, Pass, PassStatus};
use crate::segment::Segmenter;
use crate::voice::VoiceSpec;

/// Marks a directory as an album of documents.
pub const ALBUM_MARKER: &str = "---";

/// A text document to be read aloud.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub path: PathBuf,
    /// File name up to its first dot.
    pub name: String,
    group: Vec<String>,
}

impl Document {
    /// A document given on its own, stored directly under the voice.
    pub fn single(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            name: document_name(&path),
            path,
            group: Vec::new(),
        }
    }

    fn grouped(path: &Path) -> Self {
        let parent = path.parent();
        let parent_name = parent.and_then(Path::file_name).map(os_name);
        let grandparent_name = parent
            .and_then(Path::parent)
            .and_then(Path::file_name)
            .map(os_name);

        let group = match (grandparent_name, parent_name) {
            (Some(outer), Some(album)) if album.contains(ALBUM_MARKER) => vec![outer, album],
            (_, Some(dir)) => vec![dir],
            _ => Vec::new(),
        };
        Self {
            name: document_name(path),
            path: path.to_path_buf(),
            group,
        }
    }

    /// Pass directory for `voice`, relative to the output root.
    pub fn pass_dir(&self, voice: &str) -> PathBuf {
        let mut dir = PathBuf::new();
        match self.group.as_slice() {
            [] => dir.push(voice),
            [outer] => {
                dir.push(outer);
                dir.push(voice);
            }
            [outer, inner @ ..] => {
                dir.push(outer);
                dir.push(voice);
                for part in inner {
                    dir.push(part);
                }
            }
        }
        dir.push(&self.name);
        dir
    }
}

fn os_name(name: &std::ffi::OsStr) -> String {
    name.to_string_lossy().into_owned()
}

fn document_name(path: &Path) -> String {
    let file = path.file_name().map(os_name).unwrap_or_default();
    file.split('.').next().unwrap_or_default().to_string()
}

/// Every `.txt` file under `root`, sorted by path.
pub fn discover(root: &Path) -> Result<Vec<Document>, RunError> {
    let mut documents = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry?;
        let is_text = entry.path().extension().is_some_and(|ext| ext == "txt");
        if entry.file_type().is_file() && is_text {
            documents.push(Document::grouped(entry.path()));
        }
    }
    documents.sort_by(|a, b| a.path.cmp(&b.path));
    log::info!("Found {} documents under {}", documents.len(), root.display());
    Ok(documents)
}

/// Tally of a corpus run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub completed: usize,
    pub skipped: usize,
    /// Passes left without a combined output.
    pub incomplete: usize,
    /// Passes aborted because a voice could not be resolved.
    pub voice_errors: usize,
    /// Segments that ended in the failure record.
    pub failed_segments: usize,
}

impl RunSummary {
    pub fn is_clean(&self) -> bool {
        self.incomplete == 0
    }
}

/// Run every (document, voice) pass in order.
///
/// Unreadable or empty documents abort the run before any of their passes
/// start. An unknown voice only aborts its own pass.
pub fn run_corpus(
    orchestrator: &mut Orchestrator,
    segmenter: &Segmenter,
    documents: &[Document],
    voices: &[VoiceSpec],
    out: &Path,
) -> Result<RunSummary, RunError> {
    let mut summary = RunSummary::default();
    let total = documents.len();

    for (n, document) in documents.iter().enumerate() {
        let units = segmenter.segment_document(&document.path)?;
        let label = format!("{}/{}: {}", n + 1, total, document.name);

        for voice in voices {
            let layout = PassLayout::new(out, document.pass_dir(&voice.name));
            let pass = Pass {
                label: &label,
                units: &units,
                voice,
                layout: &layout,
            };
            match orchestrator.run_pass(pass) {
                Ok(report) => {
                    summary.failed_segments += report.failures.len();
                    match report.status {
                        PassStatus::Completed => summary.completed += 1,
                        PassStatus::Incomplete => summary.incomplete += 1,
                        PassStatus::SkippedByLedger | PassStatus::SkippedExisting => {
                            summary.skipped += 1
                        }
                    }
                }
                Err(PassError::Voice(e)) => {
                    log::error!("{label} [{}]: {e}", voice.name);
                    summary.voice_errors += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    log::info!(
        "Finished: {} generated, {} skipped, {} incomplete, {} voice errors, {} failed segments",
        summary.completed,
        summary.skipped,
        summary.incomplete,
        summary.voice_errors,
        summary.failed_segments
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::{discover, run_corpus, Document, RunSummary};
    use crate::error::{RunError, SegmentationError};
    use crate::ledger::MemoryLedger;
    use crate::orchestrator::{Orchestrator, PassOptions};
    use crate::segment::Segmenter;
    use crate::testing::Studio;
    use crate::voice::VoiceSpec;
    use std::fs;
    use std::path::{Path, PathBuf};

    fn write(root: &Path, relative: &str, text: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().expect("parent")).expect("dirs");
        fs::write(path, text).expect("write");
    }

    fn orchestrator(studio: &Studio) -> Orchestrator {
        Orchestrator::new(
            studio.synthesizer(),
            None,
            studio.voices(),
            Box::new(MemoryLedger::new()),
            PassOptions::default(),
        )
    }

    #[test]
    fn albums_nest_under_the_voice() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "essays/b.txt", "B.");
        write(dir.path(), "essays/a.v2.txt", "A.");
        write(dir.path(), "books/vol---one/ch1.txt", "C.");
        write(dir.path(), "essays/notes.md", "ignored");

        let documents = discover(dir.path()).expect("discover");
        let dirs: Vec<PathBuf> = documents.iter().map(|d| d.pass_dir("pat")).collect();

        assert_eq!(
            dirs,
            vec![
                PathBuf::from("books/pat/vol---one/ch1"),
                PathBuf::from("essays/pat/a"),
                PathBuf::from("essays/pat/b"),
            ]
        );
    }

    #[test]
    fn single_file_lives_under_the_voice() {
        let document = Document::single("/tmp/texts/speech.txt");
        assert_eq!(document.name, "speech");
        assert_eq!(document.pass_dir("pat&tom"), PathBuf::from("pat&tom/speech"));
    }

    #[test]
    fn unknown_voice_skips_only_its_passes() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "texts/essays/one.txt", "First part.|Second part.");
        write(dir.path(), "texts/essays/two.txt", "Only part.");
        let out = dir.path().join("out");

        let studio = Studio::with_voices(&["pat"]);
        let documents = discover(&dir.path().join("texts")).expect("discover");
        let voices = VoiceSpec::parse_list("pat,ghost").expect("voices");

        let summary = run_corpus(
            &mut orchestrator(&studio),
            &Segmenter::default(),
            &documents,
            &voices,
            &out,
        )
        .expect("run");

        assert_eq!(
            summary,
            RunSummary {
                completed: 2,
                voice_errors: 2,
                ..RunSummary::default()
            }
        );
        assert!(summary.is_clean());
        assert_eq!(
            studio.called_texts(),
            vec!["First part.", "Second part.", "Only part."]
        );
        assert!(out.join("essays/pat/one/combined.wav").exists());
        assert!(!out.join("essays/ghost").exists());
    }

    #[test]
    fn empty_document_aborts_the_run() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "essays/blank.txt", "  | \n ");
        write(dir.path(), "essays/later.txt", "Never read.");

        let studio = Studio::with_voices(&["pat"]);
        let documents = discover(dir.path()).expect("discover");
        let voices = VoiceSpec::parse_list("pat").expect("voices");

        let err = run_corpus(
            &mut orchestrator(&studio),
            &Segmenter::default(),
            &documents,
            &voices,
            &dir.path().join("out"),
        )
        .expect_err("empty document");

        assert!(matches!(err, RunError::Segmentation(SegmentationError::Empty(_))));
        assert!(studio.calls().is_empty());
    }
}
