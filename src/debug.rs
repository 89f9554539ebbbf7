//! Reproducibility records.
//!
//! One JSON file per voice holds the seed, the segment texts and the resolved
//! voice material of the latest pass in that voice, whatever its outcome.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::PassError;
use crate::ledger::write_atomic;
use crate::voice::VoiceMaterial;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebugState {
    pub seed: u64,
    pub texts: Vec<String>,
    pub voice: VoiceMaterial,
}

#[derive(Debug, Clone)]
pub struct DebugRecorder {
    dir: PathBuf,
}

impl DebugRecorder {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, voice: &str) -> PathBuf {
        self.dir.join(format!("read_debug_{voice}.json"))
    }

    /// Overwrite the record for `state.voice.name`.
    pub fn record(&self, state: &DebugState) -> Result<PathBuf, PassError> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(&state.voice.name);
        let json = serde_json::to_string(state)?;
        write_atomic(&path, &json)?;
        log::debug!("Wrote debug state to {}", path.display());
        Ok(path)
    }

    pub fn load(path: &Path) -> Result<DebugState, PassError> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}
