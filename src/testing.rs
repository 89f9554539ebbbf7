//! In-memory capabilities for exercising the pipeline without models.
//!
//! Every clip the fake synthesizer produces is a short constant signal whose
//! value is a unique tag. The fake transcriber reads the tag back and returns
//! the text that clip was synthesized from, unless told to garble it.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use crate::error::{SynthesisError, TranscriptionError, VoiceError};
use crate::voice::VoiceMaterial;
use crate::{
    Synthesizer, Transcriber, Transcript, TranscriptSegment, VoiceSource, Waveform, SAMPLE_RATE,
};

pub(crate) const GARBLE_SUFFIX: &str = " and then several completely invented words";

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SynthCall {
    pub text: String,
    pub voice: String,
    pub candidates: usize,
    pub seed: u64,
    pub device: Option<usize>,
}

#[derive(Debug, Default)]
struct StudioState {
    /// Spoken text per produced clip; a clip's tag is its index + 1.
    clips: Vec<String>,
    calls: Vec<SynthCall>,
    transcriptions: usize,
    resolutions: usize,
    synth_device: Option<usize>,
    transcriber_device: Option<usize>,
    garble: HashMap<String, usize>,
    synth_failures: HashMap<String, usize>,
    transcription_failures: HashMap<String, usize>,
    known_voices: HashSet<String>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Studio {
    state: Rc<RefCell<StudioState>>,
}

impl Studio {
    pub fn with_voices(voices: &[&str]) -> Self {
        let studio = Self::default();
        studio
            .state
            .borrow_mut()
            .known_voices
            .extend(voices.iter().map(|v| v.to_string()));
        studio
    }

    pub fn synthesizer(&self) -> Box<dyn Synthesizer> {
        Box::new(FakeSynthesizer {
            state: self.state.clone(),
        })
    }

    pub fn transcriber(&self) -> Box<dyn Transcriber> {
        Box::new(FakeTranscriber {
            state: self.state.clone(),
        })
    }

    pub fn voices(&self) -> Box<dyn VoiceSource> {
        Box::new(FakeVoices {
            state: self.state.clone(),
        })
    }

    /// Garble the next `times` transcriptions of clips reading `text`.
    pub fn garble(&self, text: &str, times: usize) {
        self.state
            .borrow_mut()
            .garble
            .insert(text.to_string(), times);
    }

    /// Fail the next `times` synthesis requests for `text`.
    pub fn fail_synthesis(&self, text: &str, times: usize) {
        self.state
            .borrow_mut()
            .synth_failures
            .insert(text.to_string(), times);
    }

    /// Fail the next `times` transcriptions of clips reading `text`.
    pub fn fail_transcription(&self, text: &str, times: usize) {
        self.state
            .borrow_mut()
            .transcription_failures
            .insert(text.to_string(), times);
    }

    pub fn calls(&self) -> Vec<SynthCall> {
        self.state.borrow().calls.clone()
    }

    pub fn called_texts(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.text).collect()
    }

    pub fn transcriptions(&self) -> usize {
        self.state.borrow().transcriptions
    }

    pub fn transcriber_device(&self) -> Option<usize> {
        self.state.borrow().transcriber_device
    }

    pub fn resolutions(&self) -> usize {
        self.state.borrow().resolutions
    }

    /// Text a committed clip was synthesized from.
    pub fn text_of(&self, clip: &Waveform) -> Option<String> {
        let tag = tag_of(clip)?;
        self.state.borrow().clips.get(tag - 1).cloned()
    }
}

pub(crate) fn tag_of(clip: &Waveform) -> Option<usize> {
    clip.samples.first().map(|v| *v as usize).filter(|t| *t > 0)
}

struct FakeSynthesizer {
    state: Rc<RefCell<StudioState>>,
}

impl Synthesizer for FakeSynthesizer {
    fn synthesize(
        &mut self,
        text: &str,
        voice: &VoiceMaterial,
        candidates: usize,
        seed: u64,
    ) -> Result<Vec<Waveform>, SynthesisError> {
        let mut state = self.state.borrow_mut();
        let device = state.synth_device;
        state.calls.push(SynthCall {
            text: text.to_string(),
            voice: voice.name.clone(),
            candidates,
            seed,
            device,
        });

        if let Some(remaining) = state.synth_failures.get_mut(text) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(SynthesisError::Backend("scripted failure".to_string()));
            }
        }

        let mut clips = Vec::with_capacity(candidates);
        for _ in 0..candidates {
            state.clips.push(text.to_string());
            let tag = state.clips.len() as f32;
            clips.push(Waveform::new(vec![tag; 4], SAMPLE_RATE));
        }
        Ok(clips)
    }

    fn use_device(&mut self, device: usize) {
        self.state.borrow_mut().synth_device = Some(device);
    }
}

struct FakeTranscriber {
    state: Rc<RefCell<StudioState>>,
}

impl Transcriber for FakeTranscriber {
    fn transcribe(&mut self, audio: &Waveform) -> Result<Transcript, TranscriptionError> {
        let mut state = self.state.borrow_mut();
        state.transcriptions += 1;

        let spoken = tag_of(audio)
            .and_then(|tag| state.clips.get(tag - 1).cloned())
            .ok_or_else(|| TranscriptionError::Backend("unknown clip".to_string()))?;

        if let Some(remaining) = state.transcription_failures.get_mut(&spoken) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(TranscriptionError::Backend("scripted failure".to_string()));
            }
        }

        let mut heard = spoken.clone();
        if let Some(remaining) = state.garble.get_mut(&spoken) {
            if *remaining > 0 {
                *remaining -= 1;
                heard.push_str(GARBLE_SUFFIX);
            }
        }

        Ok(Transcript {
            text: format!(" {heard}"),
            segments: vec![TranscriptSegment {
                start: 0.0,
                end: audio.duration_secs(),
                text: format!(" {heard}"),
            }],
        })
    }

    fn use_device(&mut self, device: usize) {
        self.state.borrow_mut().transcriber_device = Some(device);
    }
}

struct FakeVoices {
    state: Rc<RefCell<StudioState>>,
}

impl VoiceSource for FakeVoices {
    fn resolve_voices(&self, ids: &[String]) -> Result<VoiceMaterial, VoiceError> {
        let mut state = self.state.borrow_mut();
        state.resolutions += 1;
        if let Some(missing) = ids.iter().find(|id| !state.known_voices.contains(*id)) {
            return Err(VoiceError::NotFound(missing.clone()));
        }
        Ok(VoiceMaterial {
            name: ids.join("&"),
            voices: ids.to_vec(),
            clips: Vec::new(),
            conditioning: None,
        })
    }
}
