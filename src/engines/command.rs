//! Capabilities backed by external programs.
//!
//! # Synthesis protocol
//!
//! The synthesis program receives one JSON request on stdin:
//!
//! ```json
//! {"text": "...", "voices": ["pat"], "reference_clips": ["voices/pat/1.wav"],
//!  "conditioning": null, "candidates": 3, "seed": 42, "device": 0,
//!  "output_dir": "/tmp/.."}
//! ```
//!
//! and answers on stdout with the WAV files it wrote, in candidate order:
//! `{"clips": ["0.wav", "1.wav", "2.wav"]}`. Relative paths are resolved
//! against `output_dir`, which is removed once the clips are loaded.
//!
//! # Transcription protocol
//!
//! The transcription program gets the path of a WAV file as its last
//! argument and prints whisper-style JSON,
//! `{"text": "...", "segments": [{"start": 0.0, "end": 1.2, "text": "..."}]}`,
//! or just the plain transcribed text.
//!
//! Both programs also find the leased accelerator id in the
//! [`DEVICE_ENV`] environment variable.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use serde::{Deserialize, Serialize};

use crate::error::{SynthesisError, TranscriptionError};
use crate::voice::VoiceMaterial;
use crate::{Synthesizer, Transcriber, Transcript, Waveform};

/// Environment variable carrying the accelerator a program should run on.
pub const DEVICE_ENV: &str = "NARRATE_DEVICE";

#[derive(Debug, Serialize)]
struct SynthesisRequest<'a> {
    text: &'a str,
    voices: &'a [String],
    reference_clips: Vec<&'a Path>,
    conditioning: Option<&'a [f32]>,
    candidates: usize,
    seed: u64,
    device: Option<usize>,
    output_dir: &'a Path,
}

#[derive(Debug, Deserialize)]
struct SynthesisResponse {
    clips: Vec<PathBuf>,
}

/// Spawn `program`, feed `input` on stdin and collect its output.
fn run_command(
    program: &str,
    args: &[String],
    device: Option<usize>,
    input: Option<&[u8]>,
) -> std::io::Result<Output> {
    let mut cmd = Command::new(program);
    if let Some(device) = device {
        cmd.env(DEVICE_ENV, device.to_string());
    }
    cmd.args(args)
        .stdin(if input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = cmd.spawn()?;
    if let Some(data) = input {
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(data)?;
        }
    }
    child.wait_with_output()
}

/// `Err` with a readable message if the program did not exit cleanly.
fn check_status(program: &str, output: &Output) -> Result<(), String> {
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    let message = format!(
        "{program} exited with code {:?}: {}",
        output.status.code(),
        stderr.trim()
    );
    log::warn!("{message}");
    Err(message)
}

/// Synthesizer that delegates every request to an external program.
#[derive(Debug, Clone)]
pub struct CommandSynthesizer {
    program: String,
    args: Vec<String>,
    device: Option<usize>,
}

impl CommandSynthesizer {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            device: None,
        }
    }
}

impl Synthesizer for CommandSynthesizer {
    fn synthesize(
        &mut self,
        text: &str,
        voice: &VoiceMaterial,
        candidates: usize,
        seed: u64,
    ) -> Result<Vec<Waveform>, SynthesisError> {
        let output_dir = tempfile::tempdir()?;
        let request = SynthesisRequest {
            text,
            voices: &voice.voices,
            reference_clips: voice.clips.iter().map(|clip| clip.path.as_path()).collect(),
            conditioning: voice.conditioning.as_deref(),
            candidates,
            seed,
            device: self.device,
            output_dir: output_dir.path(),
        };
        let payload = serde_json::to_vec(&request)?;

        log::debug!(
            "Running {} for {} candidates (seed {seed})",
            self.program,
            candidates
        );
        let output = run_command(&self.program, &self.args, self.device, Some(&payload))?;
        check_status(&self.program, &output).map_err(SynthesisError::Backend)?;

        let response: SynthesisResponse = serde_json::from_slice(&output.stdout)?;
        response
            .clips
            .iter()
            .map(|clip| Waveform::read_wav(&output_dir.path().join(clip)).map_err(Into::into))
            .collect()
    }

    fn use_device(&mut self, device: usize) {
        self.device = Some(device);
    }
}

/// Transcriber that runs an external program on a temporary WAV file.
#[derive(Debug, Clone)]
pub struct CommandTranscriber {
    program: String,
    args: Vec<String>,
    device: Option<usize>,
}

impl CommandTranscriber {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            device: None,
        }
    }
}

impl Transcriber for CommandTranscriber {
    fn transcribe(&mut self, audio: &Waveform) -> Result<Transcript, TranscriptionError> {
        let file = tempfile::Builder::new()
            .prefix("narrate-")
            .suffix(".wav")
            .tempfile()?;
        audio.write_wav(file.path())?;

        let mut args = self.args.clone();
        args.push(file.path().to_string_lossy().into_owned());
        let output = run_command(&self.program, &args, self.device, None)?;
        check_status(&self.program, &output).map_err(TranscriptionError::Backend)?;

        parse_transcript(&String::from_utf8_lossy(&output.stdout))
    }

    fn use_device(&mut self, device: usize) {
        self.device = Some(device);
    }
}

fn parse_transcript(stdout: &str) -> Result<Transcript, TranscriptionError> {
    let trimmed = stdout.trim();
    if trimmed.starts_with('{') {
        return Ok(serde_json::from_str(trimmed)?);
    }
    Ok(Transcript {
        text: trimmed.to_string(),
        segments: Vec::new(),
    })
}
