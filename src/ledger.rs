//! Cross-run state: per-pass failure records and the corpus-wide completion
//! list.
//!
//! Both files are small and always rewritten whole. Clip files on disk stay
//! the ground truth; losing an update here only costs redundant work.
//!
//! Worker processes sharing one output root serialise their updates of the
//! completion list through an advisory lock on [`COMPLETION_LOCK`].
//!
//! # `fails` format
//!
//! ```text
//! 0,3
//! 0:
//! <ground truth of segment 0>
//! <transcript of segment 0>
//! 3:
//! <ground truth of segment 3>
//! <transcript of segment 3>
//! ```

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::error::LedgerError;
use crate::staging_file;

/// Per-pass failure record file name.
pub const FAILS_FILE: &str = "fails";

/// Corpus-wide completion list, relative to the output root.
pub const COMPLETION_FILE: &str = "generated.txt";

/// Lock file guarding read-merge-write cycles of [`COMPLETION_FILE`].
pub const COMPLETION_LOCK: &str = "generated.txt.lock";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureEntry {
    pub ground_truth: String,
    pub transcript: String,
}

/// Segments of one pass that need attention, keyed by segment index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FailureRecord {
    entries: BTreeMap<usize, FailureEntry>,
}

impl FailureRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, segment_index: usize, ground_truth: &str, transcript: &str) {
        self.entries.insert(
            segment_index,
            FailureEntry {
                ground_truth: ground_truth.to_string(),
                transcript: transcript.to_string(),
            },
        );
    }

    pub fn get(&self, segment_index: usize) -> Option<&FailureEntry> {
        self.entries.get(&segment_index)
    }

    pub fn contains(&self, segment_index: usize) -> bool {
        self.entries.contains_key(&segment_index)
    }

    pub fn indices(&self) -> BTreeSet<usize> {
        self.entries.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &FailureEntry)> {
        self.entries.iter().map(|(i, e)| (*i, e))
    }

    /// Render the `fails` file contents.
    pub fn render(&self) -> String {
        let header: Vec<String> = self.entries.keys().map(|i| i.to_string()).collect();
        let mut out = header.join(",");
        out.push('\n');
        for (index, entry) in &self.entries {
            out.push_str(&format!(
                "{index}:\n{}\n{}\n",
                single_line(&entry.ground_truth),
                single_line(&entry.transcript)
            ));
        }
        out
    }

    /// Parse `fails` file contents. `path` is only used in error messages.
    ///
    /// Blocks missing after the header line leave empty texts for their
    /// indices; the header alone decides which segments failed.
    pub fn parse(content: &str, path: &Path) -> Result<Self, LedgerError> {
        let malformed = |reason: String| LedgerError::Malformed {
            path: path.to_path_buf(),
            reason,
        };

        let mut lines = content.lines();
        let header = lines.next().unwrap_or("").trim();
        let mut record = Self::new();
        if header.is_empty() {
            return Ok(record);
        }

        let indices = header
            .split(',')
            .map(|raw| {
                raw.trim()
                    .parse::<usize>()
                    .map_err(|_| malformed(format!("bad segment index {raw:?}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        for &index in &indices {
            record.insert(index, "", "");
        }

        while let Some(block) = lines.next() {
            let block = block.trim();
            if block.is_empty() {
                continue;
            }
            let index: usize = block
                .trim_end_matches(':')
                .parse()
                .map_err(|_| malformed(format!("bad block header {block:?}")))?;
            if !record.contains(index) {
                return Err(malformed(format!("block {index} not listed in header")));
            }
            let ground_truth = lines.next().unwrap_or("");
            let transcript = lines.next().unwrap_or("");
            record.insert(index, ground_truth, transcript);
        }

        Ok(record)
    }
}

fn single_line(text: &str) -> String {
    text.replace(['\r', '\n'], " ")
}

/// Relative paths of combined artifacts already produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompletionLedger {
    entries: BTreeSet<String>,
}

impl CompletionLedger {
    pub fn parse(content: &str) -> Self {
        Self {
            entries: content
                .lines()
                .map(|line| normalize_entry(line.trim()))
                .filter(|line| !line.is_empty())
                .collect(),
        }
    }

    pub fn render(&self) -> String {
        self.entries.iter().map(|e| format!("{e}\n")).collect()
    }

    pub fn contains(&self, relative: &str) -> bool {
        self.entries.contains(&normalize_entry(relative))
    }

    /// Returns `true` if the entry was not already present.
    pub fn insert(&mut self, relative: &str) -> bool {
        self.entries.insert(normalize_entry(relative))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn normalize_entry(entry: &str) -> String {
    entry.trim_start_matches('/').replace('\\', "/")
}

/// Persisted pass state, injected into the orchestrator.
///
/// Failure records are addressed by pass directory, completion entries by
/// the combined artifact's path relative to the output root.
pub trait Ledger {
    fn failures(&self, pass_dir: &Path) -> Result<Option<FailureRecord>, LedgerError>;

    fn save_failures(&mut self, pass_dir: &Path, record: &FailureRecord) -> Result<(), LedgerError>;

    fn clear_failures(&mut self, pass_dir: &Path) -> Result<(), LedgerError>;

    fn is_complete(&self, combined: &str) -> bool;

    fn mark_complete(&mut self, combined: &str) -> Result<(), LedgerError>;
}

/// File-backed ledger rooted at the output directory.
#[derive(Debug)]
pub struct FileLedger {
    root: PathBuf,
    completed: CompletionLedger,
}

impl FileLedger {
    /// Load the completion list under `root`, if any.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let root = root.into();
        let completed = read_completion(&root.join(COMPLETION_FILE))?;
        log::debug!(
            "Loaded {} completed passes from {}",
            completed.len(),
            root.display()
        );
        Ok(Self { root, completed })
    }

    pub fn completion_path(&self) -> PathBuf {
        self.root.join(COMPLETION_FILE)
    }

    /// Overwrite the completion list wholesale.
    pub fn replace_completion(&mut self, completed: CompletionLedger) -> Result<(), LedgerError> {
        let _lock = self.lock_completion()?;
        write_atomic(&self.completion_path(), &completed.render())?;
        self.completed = completed;
        Ok(())
    }

    /// Block until this process holds the completion lock. Released on drop.
    fn lock_completion(&self) -> Result<File, LedgerError> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(self.root.join(COMPLETION_LOCK))?;
        file.lock()?;
        Ok(file)
    }
}

impl Ledger for FileLedger {
    fn failures(&self, pass_dir: &Path) -> Result<Option<FailureRecord>, LedgerError> {
        let path = pass_dir.join(FAILS_FILE);
        match fs::read_to_string(&path) {
            Ok(content) => FailureRecord::parse(&content, &path).map(Some),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save_failures(&mut self, pass_dir: &Path, record: &FailureRecord) -> Result<(), LedgerError> {
        write_atomic(&pass_dir.join(FAILS_FILE), &record.render())?;
        Ok(())
    }

    fn clear_failures(&mut self, pass_dir: &Path) -> Result<(), LedgerError> {
        match fs::remove_file(pass_dir.join(FAILS_FILE)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn is_complete(&self, combined: &str) -> bool {
        self.completed.contains(combined)
    }

    fn mark_complete(&mut self, combined: &str) -> Result<(), LedgerError> {
        // Another worker may have appended since we loaded; merge before writing.
        let _lock = self.lock_completion()?;
        let path = self.completion_path();
        let mut on_disk = read_completion(&path)?;
        on_disk.insert(combined);
        write_atomic(&path, &on_disk.render())?;
        self.completed = on_disk;
        Ok(())
    }
}

/// Ledger that never touches the filesystem.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    failures: HashMap<PathBuf, FailureRecord>,
    completed: CompletionLedger,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn completed(&self) -> &CompletionLedger {
        &self.completed
    }
}

impl Ledger for MemoryLedger {
    fn failures(&self, pass_dir: &Path) -> Result<Option<FailureRecord>, LedgerError> {
        Ok(self.failures.get(pass_dir).cloned())
    }

    fn save_failures(&mut self, pass_dir: &Path, record: &FailureRecord) -> Result<(), LedgerError> {
        self.failures.insert(pass_dir.to_path_buf(), record.clone());
        Ok(())
    }

    fn clear_failures(&mut self, pass_dir: &Path) -> Result<(), LedgerError> {
        self.failures.remove(pass_dir);
        Ok(())
    }

    fn is_complete(&self, combined: &str) -> bool {
        self.completed.contains(combined)
    }

    fn mark_complete(&mut self, combined: &str) -> Result<(), LedgerError> {
        self.completed.insert(combined);
        Ok(())
    }
}

pub(crate) fn read_completion(path: &Path) -> Result<CompletionLedger, LedgerError> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(CompletionLedger::parse(&content)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(CompletionLedger::default()),
        Err(e) => Err(e.into()),
    }
}

/// Write `contents` to a fresh sibling file and rename it over `path`.
pub(crate) fn write_atomic(path: &Path, contents: &str) -> io::Result<()> {
    let mut staging = staging_file(path)?;
    staging.write_all(contents.as_bytes())?;
    staging.persist(path)?;
    Ok(())
}
