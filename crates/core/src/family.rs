//! Model families and the parameters each one surfaces

use crate::error::{InferenceError, Result};
use crate::params::{ParamSpec, ParamValue};
use crate::stage::StageInput;
use genmedia_common::MediaKind;
use serde::{Deserialize, Serialize};

pub const DEFAULT_PROMPT: &str = "4k photo, highly detailed";
pub const DEFAULT_NEGATIVE_PROMPT: &str = "extra digit, fewer digits, cropped, worst quality, \
     low quality, glitch, deformed, mutated, ugly, disfigured";
pub const DEFAULT_TTS_TEXT: &str = "Hello, this is a test of text to speech.";

/// Languages accepted by the multilingual speech model, with display names
pub const TTS_LANGUAGES: &[(&str, &str)] = &[
    ("en", "English"),
    ("es", "Spanish"),
    ("fr", "French"),
    ("de", "German"),
    ("it", "Italian"),
    ("pt", "Portuguese"),
    ("pl", "Polish"),
    ("tr", "Turkish"),
    ("ru", "Russian"),
    ("nl", "Dutch"),
    ("cs", "Czech"),
    ("ar", "Arabic"),
    ("zh-cn", "Chinese"),
    ("ja", "Japanese"),
    ("ko", "Korean"),
    ("hu", "Hungarian"),
    ("hi", "Hindi"),
];

/// Display name for a supported language code
#[must_use]
pub fn language_name(code: &str) -> Option<&'static str> {
    TTS_LANGUAGES
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, name)| *name)
}

/// Extra input carrying a ControlNet/adapter conditioning image
pub const EXTRA_CONDITIONING: &str = "conditioning";
/// Extra input carrying the voice-cloning reference clip
pub const EXTRA_REFERENCE_AUDIO: &str = "reference_audio";
/// Extra input carrying the lip-sync driving audio
pub const EXTRA_AUDIO: &str = "audio";

/// Kind of model behind a [`crate::ModelStage`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageFamily {
    /// ControlNet / T2I-adapter diffusion
    ImageToImage,
    /// Instruction-guided edit (pix2pix)
    InstructEdit,
    /// Prompt-only image generation
    TextToImage,
    /// Face restoration and upscaling
    FaceRestoration,
    /// Mouth re-synthesis driven by an audio track
    LipSync,
    /// Multilingual speech synthesis with optional voice cloning
    TextToSpeech,
    /// Short clip generated from a still image
    ImageToVideo,
}

impl StageFamily {
    /// Kind of the primary input artifact; `None` for prompt-only families
    #[must_use]
    pub fn input_kind(&self) -> Option<MediaKind> {
        match self {
            StageFamily::ImageToImage
            | StageFamily::InstructEdit
            | StageFamily::FaceRestoration
            | StageFamily::ImageToVideo => Some(MediaKind::Image),
            StageFamily::LipSync => Some(MediaKind::VideoFrames),
            StageFamily::TextToImage | StageFamily::TextToSpeech => None,
        }
    }

    #[must_use]
    pub fn output_kind(&self) -> MediaKind {
        match self {
            StageFamily::ImageToImage
            | StageFamily::InstructEdit
            | StageFamily::TextToImage
            | StageFamily::FaceRestoration => MediaKind::Image,
            StageFamily::LipSync | StageFamily::ImageToVideo => MediaKind::VideoFrames,
            StageFamily::TextToSpeech => MediaKind::Audio,
        }
    }

    /// Extra inputs that must be present, with their kinds
    #[must_use]
    pub fn required_extras(&self) -> &'static [(&'static str, MediaKind)] {
        match self {
            StageFamily::LipSync => &[(EXTRA_AUDIO, MediaKind::Audio)],
            _ => &[],
        }
    }

    /// Extra inputs that may be present, with their kinds
    #[must_use]
    pub fn optional_extras(&self) -> &'static [(&'static str, MediaKind)] {
        match self {
            StageFamily::ImageToImage => &[(EXTRA_CONDITIONING, MediaKind::Image)],
            StageFamily::TextToSpeech => &[(EXTRA_REFERENCE_AUDIO, MediaKind::Audio)],
            _ => &[],
        }
    }

    /// Every tunable this family exposes, with its default and bounds
    #[must_use]
    pub fn param_specs(&self) -> Vec<ParamSpec> {
        let text = |name: &str, v: &str| ParamSpec::new(name, ParamValue::Text(v.to_string()));
        let float = |name: &str, v: f64| ParamSpec::new(name, ParamValue::Float(v));
        let int = |name: &str, v: i64| ParamSpec::new(name, ParamValue::Int(v));

        match self {
            StageFamily::ImageToImage => vec![
                text("prompt", DEFAULT_PROMPT),
                text("negative_prompt", DEFAULT_NEGATIVE_PROMPT),
                int("num_inference_steps", 30).bounded(1.0, 150.0),
                float("guidance_scale", 7.5).bounded(0.0, 30.0),
                float("conditioning_scale", 0.9).bounded(0.0, 2.0),
            ],
            StageFamily::InstructEdit => vec![
                text("prompt", ""),
                int("num_inference_steps", 10).bounded(1.0, 150.0),
                float("image_guidance_scale", 1.0).bounded(0.0, 30.0),
            ],
            StageFamily::TextToImage => vec![text("prompt", "")],
            StageFamily::FaceRestoration => vec![
                int("upscale", 2).bounded(1.0, 4.0),
                ParamSpec::new("only_center_face", ParamValue::Bool(false)),
            ],
            StageFamily::LipSync => vec![float("fps", 25.0).bounded(1.0, 60.0)],
            StageFamily::TextToSpeech => vec![
                text("text", DEFAULT_TTS_TEXT),
                text("language", "en"),
                float("speed", 1.0).bounded(0.5, 2.0),
            ],
            StageFamily::ImageToVideo => vec![
                int("num_frames", 14).bounded(1.0, 128.0),
                float("fps", 7.0).bounded(1.0, 60.0),
            ],
        }
    }

    /// Check an input against this family's contract
    pub fn validate_input(&self, input: &StageInput) -> Result<()> {
        match (self.input_kind(), &input.primary) {
            (Some(kind), Some(artifact)) => {
                artifact.expect_kind(kind).map_err(|e| {
                    InferenceError::InvalidInput(format!("{self}: {e}"))
                })?;
                if kind == MediaKind::VideoFrames && artifact.frames().map_or(true, <[_]>::is_empty)
                {
                    return Err(InferenceError::InvalidInput(format!(
                        "{self}: frame sequence is empty"
                    )));
                }
            }
            (Some(kind), None) => {
                return Err(InferenceError::InvalidInput(format!(
                    "{self} requires a {kind} input"
                )))
            }
            (None, Some(artifact)) => {
                return Err(InferenceError::InvalidInput(format!(
                    "{self} takes no primary input, got {}",
                    artifact.kind
                )))
            }
            (None, None) => {}
        }

        for (name, kind) in self.required_extras() {
            match input.extras.get(*name) {
                Some(artifact) => artifact.expect_kind(*kind).map_err(|e| {
                    InferenceError::InvalidInput(format!("{self} {name}: {e}"))
                })?,
                None => {
                    return Err(InferenceError::InvalidInput(format!(
                        "{self} requires extra input {name}"
                    )))
                }
            }
        }

        for (name, artifact) in &input.extras {
            let declared = self
                .required_extras()
                .iter()
                .chain(self.optional_extras())
                .find(|(n, _)| *n == name.as_str());
            match declared {
                Some((_, kind)) => artifact.expect_kind(*kind).map_err(|e| {
                    InferenceError::InvalidInput(format!("{self} {name}: {e}"))
                })?,
                None => {
                    return Err(InferenceError::InvalidInput(format!(
                        "{self} does not accept extra input {name}"
                    )))
                }
            }
        }
        Ok(())
    }
}

impl std::fmt::Display for StageFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StageFamily::ImageToImage => "image_to_image",
            StageFamily::InstructEdit => "instruct_edit",
            StageFamily::TextToImage => "text_to_image",
            StageFamily::FaceRestoration => "face_restoration",
            StageFamily::LipSync => "lip_sync",
            StageFamily::TextToSpeech => "text_to_speech",
            StageFamily::ImageToVideo => "image_to_video",
        };
        f.write_str(name)
    }
}
