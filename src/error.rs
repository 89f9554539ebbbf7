use std::path::PathBuf;

#[derive(thiserror::Error, Debug)]
pub enum SegmentationError {
    #[error("Failed to read document {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Document {0} contains no speakable text")]
    Empty(PathBuf),
}

#[derive(thiserror::Error, Debug)]
pub enum VoiceError {
    #[error("Voice '{0}' not found. Add reference clips under the voices directory.")]
    NotFound(String),
    #[error("Invalid voice spec '{0}'")]
    InvalidSpec(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),
    #[error("Failed to parse voice data: {0}")]
    Parse(String),
}

#[derive(thiserror::Error, Debug)]
pub enum SynthesisError {
    #[error("Synthesis backend failed: {0}")]
    Backend(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),
    #[error("Invalid backend response: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Synthesizer produced {actual} Hz audio, expected {expected} Hz")]
    SampleRate { expected: u32, actual: u32 },
    #[error("Synthesizer returned no candidates")]
    NoCandidates,
    #[error("Synthesizer returned {actual} candidates, expected {expected}")]
    CandidateCount { expected: usize, actual: usize },
}

#[derive(thiserror::Error, Debug)]
pub enum TranscriptionError {
    #[error("Transcription backend failed: {0}")]
    Backend(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),
    #[error("Invalid backend response: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(thiserror::Error, Debug)]
pub enum LedgerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Malformed ledger file {path}: {reason}")]
    Malformed { path: PathBuf, reason: String },
}

#[derive(thiserror::Error, Debug)]
pub enum CombineError {
    #[error("Nothing to combine")]
    Empty,
    #[error("Segment {index} is {actual} Hz, expected {expected} Hz")]
    SampleRate {
        index: usize,
        expected: u32,
        actual: u32,
    },
    #[error("Segment {index} has no candidate in slot {slot}")]
    MissingSlot { index: usize, slot: usize },
}

/// Errors that abort a single (document, voice) pass.
#[derive(thiserror::Error, Debug)]
pub enum PassError {
    #[error(transparent)]
    Voice(#[from] VoiceError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Combine(#[from] CombineError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),
    #[error("Failed to write debug state: {0}")]
    Debug(#[from] serde_json::Error),
}

/// Errors that abort the whole corpus run.
#[derive(thiserror::Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Segmentation(#[from] SegmentationError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Pass(#[from] PassError),
    #[error("Failed to walk {0}")]
    Walk(#[from] walkdir::Error),
    #[error("Invalid run configuration: {0}")]
    Config(String),
}
