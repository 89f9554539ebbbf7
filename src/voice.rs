use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::VoiceError;
use crate::{VoiceSource, Waveform};

/// Joins sub-voices into one blended voice, e.g. `pat&tom`.
pub const COMBINE_MARKER: char = '&';

/// Optional per-voice file holding a precomputed conditioning vector.
pub const CONDITIONING_FILE: &str = "conditioning.json";

/// A requested voice: one identifier, or several to be blended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceSpec {
    /// The voice list entry as written, used in output paths and debug records.
    pub name: String,
    /// Sub-voice identifiers, in the order given.
    pub voices: Vec<String>,
}

impl VoiceSpec {
    pub fn parse(spec: &str) -> Result<Self, VoiceError> {
        let name = spec.trim();
        let voices: Vec<String> = name
            .split(COMBINE_MARKER)
            .map(|v| v.trim().to_string())
            .collect();

        let valid = voices
            .iter()
            .all(|v| !v.is_empty() && !v.contains(['/', '\\']) && v != "." && v != "..");
        if !valid {
            return Err(VoiceError::InvalidSpec(spec.to_string()));
        }

        Ok(Self {
            name: name.to_string(),
            voices,
        })
    }

    /// Parse a comma-separated voice list such as `pat,tom&emma`.
    pub fn parse_list(list: &str) -> Result<Vec<Self>, VoiceError> {
        list.split(',')
            .filter(|entry| !entry.trim().is_empty())
            .map(Self::parse)
            .collect()
    }

    pub fn is_blend(&self) -> bool {
        self.voices.len() > 1
    }
}

/// One reference recording of a voice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceClip {
    pub path: PathBuf,
    pub audio: Waveform,
}

/// Everything a synthesizer needs to speak in a voice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceMaterial {
    pub name: String,
    pub voices: Vec<String>,
    pub clips: Vec<ReferenceClip>,
    /// Precomputed conditioning state. `None` leaves derivation to the
    /// synthesizer.
    pub conditioning: Option<Vec<f32>>,
}

/// Resolve a requested voice once for a whole pass.
///
/// Blends are requested from the source in a single call so the capability
/// performs the mix.
pub fn resolve_voice(source: &dyn VoiceSource, spec: &VoiceSpec) -> Result<VoiceMaterial, VoiceError> {
    let mut material = source.resolve_voices(&spec.voices)?;
    material.name = spec.name.clone();
    log::info!(
        "Resolved voice '{}' ({} reference clips{})",
        spec.name,
        material.clips.len(),
        if material.conditioning.is_some() {
            ", precomputed conditioning"
        } else {
            ""
        }
    );
    Ok(material)
}

/// Directory of reference voices.
///
/// Each voice is a subdirectory holding one or more `.wav` clips and,
/// optionally, a `conditioning.json` array of floats:
///
/// ```text
/// voices/
/// ├── pat/
/// │   ├── 1.wav
/// │   ├── 2.wav
/// │   └── conditioning.json
/// └── tom/
///     └── sample.wav
/// ```
#[derive(Debug, Clone)]
pub struct VoiceLibrary {
    root: PathBuf,
}

impl VoiceLibrary {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// List all voice names that have at least one clip, sorted.
    pub fn list_voices(&self) -> Result<Vec<String>, VoiceError> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.is_dir() && !clip_paths(&path)?.is_empty() {
                if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                    names.push(name.to_string());
                }
            }
        }
        names.sort_unstable();
        Ok(names)
    }

    fn load_one(&self, id: &str) -> Result<(Vec<ReferenceClip>, Option<Vec<f32>>), VoiceError> {
        let dir = self.root.join(id);
        if !dir.is_dir() {
            return Err(VoiceError::NotFound(id.to_string()));
        }

        let paths = clip_paths(&dir)?;
        if paths.is_empty() {
            return Err(VoiceError::NotFound(id.to_string()));
        }

        let clips = paths
            .into_iter()
            .map(|path| {
                let audio = Waveform::read_wav(&path)?;
                Ok(ReferenceClip { path, audio })
            })
            .collect::<Result<Vec<_>, VoiceError>>()?;

        let conditioning_path = dir.join(CONDITIONING_FILE);
        let conditioning = if conditioning_path.exists() {
            let content = fs::read_to_string(&conditioning_path)?;
            let vector: Vec<f32> = serde_json::from_str(&content).map_err(|e| {
                VoiceError::Parse(format!("{}: {e}", conditioning_path.display()))
            })?;
            Some(vector)
        } else {
            None
        };

        Ok((clips, conditioning))
    }
}

impl VoiceSource for VoiceLibrary {
    fn resolve_voices(&self, ids: &[String]) -> Result<VoiceMaterial, VoiceError> {
        if ids.is_empty() {
            return Err(VoiceError::InvalidSpec(String::new()));
        }

        let mut clips = Vec::new();
        let mut vectors = Vec::new();
        for id in ids {
            let (voice_clips, conditioning) = self.load_one(id)?;
            clips.extend(voice_clips);
            vectors.push(conditioning);
        }

        Ok(VoiceMaterial {
            name: ids.join(COMBINE_MARKER.to_string().as_str()),
            voices: ids.to_vec(),
            clips,
            conditioning: blend_conditioning(&vectors),
        })
    }
}

/// Element-wise mean of the sub-voice vectors, if all exist with equal length.
fn blend_conditioning(vectors: &[Option<Vec<f32>>]) -> Option<Vec<f32>> {
    let present: Vec<&Vec<f32>> = vectors.iter().flatten().collect();
    let first = present.first()?;
    if present.len() != vectors.len() || present.iter().any(|v| v.len() != first.len()) {
        return None;
    }

    let mut mean = vec![0f32; first.len()];
    for vector in &present {
        for (acc, value) in mean.iter_mut().zip(vector.iter()) {
            *acc += value;
        }
    }
    let n = present.len() as f32;
    mean.iter_mut().for_each(|v| *v /= n);
    Some(mean)
}

fn clip_paths(dir: &Path) -> Result<Vec<PathBuf>, VoiceError> {
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().and_then(|e| e.to_str()) == Some("wav") {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}
