//! File names inside a pass directory.
//!
//! ```text
//! {i}.txt          text sent to synthesis for segment i
//! {i}.wav          committed clip for segment i
//! {i}_{k:02}.wav   candidate k of segment i (review mode)
//! {i}.timestamps   "{start}-{end}: {text}" per transcribed span
//! fails            failure record
//! combined.wav     full reading (combined_{k:02}.wav per slot in review mode)
//! ```

use std::path::{Path, PathBuf};

pub const COMBINED_FILE: &str = "combined.wav";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassLayout {
    dir: PathBuf,
    relative: PathBuf,
}

impl PassLayout {
    /// Layout for the pass stored at `root/relative`.
    pub fn new(root: &Path, relative: impl Into<PathBuf>) -> Self {
        let relative = relative.into();
        Self {
            dir: root.join(&relative),
            relative,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn relative(&self) -> &Path {
        &self.relative
    }

    pub fn text_path(&self, segment: usize) -> PathBuf {
        self.dir.join(format!("{segment}.txt"))
    }

    pub fn clip_path(&self, segment: usize) -> PathBuf {
        self.dir.join(format!("{segment}.wav"))
    }

    pub fn slot_clip_path(&self, segment: usize, slot: usize) -> PathBuf {
        self.dir.join(format!("{segment}_{slot:02}.wav"))
    }

    pub fn timestamps_path(&self, segment: usize) -> PathBuf {
        self.dir.join(format!("{segment}.timestamps"))
    }

    pub fn combined_path(&self) -> PathBuf {
        self.dir.join(COMBINED_FILE)
    }

    pub fn slot_combined_path(&self, slot: usize) -> PathBuf {
        self.dir.join(slot_combined_name(slot))
    }

    /// The artifact whose existence marks the pass as done.
    pub fn primary_combined(&self, review: bool) -> PathBuf {
        if review {
            self.slot_combined_path(0)
        } else {
            self.combined_path()
        }
    }

    /// Completion ledger entry: primary combined path relative to the
    /// output root, `/`-separated.
    pub fn ledger_key(&self, review: bool) -> String {
        let name = if review {
            slot_combined_name(0)
        } else {
            COMBINED_FILE.to_string()
        };
        let mut parts: Vec<String> = self
            .relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        parts.push(name);
        parts.join("/")
    }
}

pub fn slot_combined_name(slot: usize) -> String {
    format!("combined_{slot:02}.wav")
}
