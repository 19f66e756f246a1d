//! Typed view over an untyped job mapping
//!
//! [`JobRequest::parse`] is the only place job fields are read. It is a pure
//! function: missing fields, bad types and out-of-range values are reported
//! as [`RequestError`], and every optional parameter comes back with its
//! default filled in.

use crate::config::RequestLimits;
use crate::error::RequestError;
use genmedia_core::{language_name, ParamValue, StageFamily, StageParams, TTS_LANGUAGES};
use genmedia_storage::{BlobRef, ScopedCredential, StoreConfig};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Field naming the handler family when the worker does not fix it
pub const HANDLER_FIELD: &str = "handler";

/// The kinds of job a worker can run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerFamily {
    ImageToImage,
    InstructEdit,
    TextToImage,
    FaceSwap,
    FaceRestoration,
    LipSync,
    TextToSpeech,
    ImageToVideo,
}

impl HandlerFamily {
    pub const ALL: [HandlerFamily; 8] = [
        HandlerFamily::ImageToImage,
        HandlerFamily::InstructEdit,
        HandlerFamily::TextToImage,
        HandlerFamily::FaceSwap,
        HandlerFamily::FaceRestoration,
        HandlerFamily::LipSync,
        HandlerFamily::TextToSpeech,
        HandlerFamily::ImageToVideo,
    ];

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            HandlerFamily::ImageToImage => "image_to_image",
            HandlerFamily::InstructEdit => "instruct_edit",
            HandlerFamily::TextToImage => "text_to_image",
            HandlerFamily::FaceSwap => "face_swap",
            HandlerFamily::FaceRestoration => "face_restoration",
            HandlerFamily::LipSync => "lip_sync",
            HandlerFamily::TextToSpeech => "text_to_speech",
            HandlerFamily::ImageToVideo => "image_to_video",
        }
    }

    /// Model family behind this handler; face swap has its own stage
    #[must_use]
    pub fn stage_family(&self) -> Option<StageFamily> {
        match self {
            HandlerFamily::ImageToImage => Some(StageFamily::ImageToImage),
            HandlerFamily::InstructEdit => Some(StageFamily::InstructEdit),
            HandlerFamily::TextToImage => Some(StageFamily::TextToImage),
            HandlerFamily::FaceSwap => None,
            HandlerFamily::FaceRestoration => Some(StageFamily::FaceRestoration),
            HandlerFamily::LipSync => Some(StageFamily::LipSync),
            HandlerFamily::TextToSpeech => Some(StageFamily::TextToSpeech),
            HandlerFamily::ImageToVideo => Some(StageFamily::ImageToVideo),
        }
    }
}

impl fmt::Display for HandlerFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HandlerFamily {
    type Err = RequestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        HandlerFamily::ALL
            .into_iter()
            .find(|f| f.name() == s)
            .ok_or_else(|| RequestError::UnknownFamily(s.to_string()))
    }
}

/// How the diffusion conditioning image is derived from the input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Preprocess {
    #[default]
    Canny,
    Sketch,
    None,
}

impl FromStr for Preprocess {
    type Err = RequestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "canny" => Ok(Preprocess::Canny),
            "sketch" => Ok(Preprocess::Sketch),
            "none" => Ok(Preprocess::None),
            other => Err(RequestError::invalid(
                "preprocess",
                format!("expected canny, sketch or none, got {other}"),
            )),
        }
    }
}

/// Family-specific part of a job
#[derive(Debug, Clone)]
pub enum HandlerRequest {
    ImageToImage {
        input_key: String,
        preprocess: Preprocess,
        params: StageParams,
    },
    InstructEdit {
        input_key: String,
        params: StageParams,
    },
    TextToImage {
        params: StageParams,
        auth_token: SecretString,
    },
    FaceSwap {
        face_image_key: String,
        body_image_key: String,
        /// 1-based, left to right
        face_index: u32,
        /// 1-based, left to right
        body_index: u32,
    },
    FaceRestoration {
        input_key: String,
        params: StageParams,
    },
    LipSync {
        video_input_key: String,
        audio_input_key: String,
        params: StageParams,
    },
    TextToSpeech {
        reference_key: Option<String>,
        params: StageParams,
    },
    ImageToVideo {
        input_key: String,
        params: StageParams,
    },
}

impl HandlerRequest {
    #[must_use]
    pub fn family(&self) -> HandlerFamily {
        match self {
            HandlerRequest::ImageToImage { .. } => HandlerFamily::ImageToImage,
            HandlerRequest::InstructEdit { .. } => HandlerFamily::InstructEdit,
            HandlerRequest::TextToImage { .. } => HandlerFamily::TextToImage,
            HandlerRequest::FaceSwap { .. } => HandlerFamily::FaceSwap,
            HandlerRequest::FaceRestoration { .. } => HandlerFamily::FaceRestoration,
            HandlerRequest::LipSync { .. } => HandlerFamily::LipSync,
            HandlerRequest::TextToSpeech { .. } => HandlerFamily::TextToSpeech,
            HandlerRequest::ImageToVideo { .. } => HandlerFamily::ImageToVideo,
        }
    }

    /// Resolved model parameters (empty for face swap)
    #[must_use]
    pub fn params(&self) -> StageParams {
        match self {
            HandlerRequest::ImageToImage { params, .. }
            | HandlerRequest::InstructEdit { params, .. }
            | HandlerRequest::TextToImage { params, .. }
            | HandlerRequest::FaceRestoration { params, .. }
            | HandlerRequest::LipSync { params, .. }
            | HandlerRequest::TextToSpeech { params, .. }
            | HandlerRequest::ImageToVideo { params, .. } => params.clone(),
            HandlerRequest::FaceSwap { .. } => StageParams::default(),
        }
    }
}

/// A validated job
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub bucket: String,
    pub output_key: String,
    pub region: String,
    pub endpoint: Option<String>,
    pub credential: ScopedCredential,
    pub handler: HandlerRequest,
}

impl JobRequest {
    /// Parse a mapping whose `handler` field names the family
    pub fn parse(input: &Map<String, Value>, limits: &RequestLimits) -> Result<Self, RequestError> {
        let family: HandlerFamily = required_str(input, HANDLER_FIELD)?.parse()?;
        Self::parse_as(family, input, limits)
    }

    /// Parse a mapping as a job of `family`, ignoring any `handler` field
    pub fn parse_as(
        family: HandlerFamily,
        input: &Map<String, Value>,
        limits: &RequestLimits,
    ) -> Result<Self, RequestError> {
        let bucket = required_str(input, "bucket_name")?;
        let output_key = required_str(input, "output_key")?;
        let access_key_id = required_str(input, "aws_access_key_id")?;
        let secret_access_key = required_str(input, "aws_secret_access_key")?;
        let region = match optional_str(input, "aws_region")? {
            Some(region) => region,
            None => optional_str(input, "region_name")?
                .ok_or_else(|| RequestError::MissingField("aws_region".to_string()))?,
        };
        let session_token = optional_str(input, "aws_session_token")?;
        let endpoint = optional_str(input, "endpoint")?;

        let handler = parse_handler(family, input, limits)?;

        Ok(Self {
            bucket,
            output_key,
            region,
            endpoint,
            credential: ScopedCredential::new(access_key_id, secret_access_key, session_token),
            handler,
        })
    }

    #[must_use]
    pub fn family(&self) -> HandlerFamily {
        self.handler.family()
    }

    /// Connection settings for this job's store; nothing here outlives the job
    #[must_use]
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            region: self.region.clone(),
            endpoint: self.endpoint.clone(),
            credential: self.credential.clone(),
        }
    }

    #[must_use]
    pub fn blob(&self, key: &str) -> BlobRef {
        BlobRef::new(&self.bucket, key)
    }

    #[must_use]
    pub fn output_ref(&self) -> BlobRef {
        self.blob(&self.output_key)
    }

    /// Every source object this job reads, by role
    #[must_use]
    pub fn source_refs(&self) -> BTreeMap<&'static str, BlobRef> {
        let keys: Vec<(&'static str, &str)> = match &self.handler {
            HandlerRequest::ImageToImage { input_key, .. }
            | HandlerRequest::InstructEdit { input_key, .. }
            | HandlerRequest::FaceRestoration { input_key, .. }
            | HandlerRequest::ImageToVideo { input_key, .. } => vec![("input", input_key)],
            HandlerRequest::TextToImage { .. } => vec![],
            HandlerRequest::FaceSwap {
                face_image_key,
                body_image_key,
                ..
            } => vec![("face", face_image_key), ("body", body_image_key)],
            HandlerRequest::LipSync {
                video_input_key,
                audio_input_key,
                ..
            } => vec![("video", video_input_key), ("audio", audio_input_key)],
            HandlerRequest::TextToSpeech { reference_key, .. } => reference_key
                .as_deref()
                .map(|k| vec![("reference", k)])
                .unwrap_or_default(),
        };
        keys.into_iter().map(|(role, key)| (role, self.blob(key))).collect()
    }
}

fn parse_handler(
    family: HandlerFamily,
    input: &Map<String, Value>,
    limits: &RequestLimits,
) -> Result<HandlerRequest, RequestError> {
    let params = |stage: StageFamily, fields: &[(&str, &str)]| {
        resolve_params(input, stage, fields, limits)
    };

    let handler = match family {
        HandlerFamily::ImageToImage => HandlerRequest::ImageToImage {
            input_key: required_str(input, "input_key")?,
            preprocess: optional_str(input, "preprocess")?
                .map(|p| p.parse())
                .transpose()?
                .unwrap_or_default(),
            params: params(
                StageFamily::ImageToImage,
                &[
                    ("prompt", "prompt"),
                    ("negative_prompt", "negative_prompt"),
                    ("negativePrompt", "negative_prompt"),
                    ("num_inference_steps", "num_inference_steps"),
                    ("guidance_scale", "guidance_scale"),
                    ("conditioning_scale", "conditioning_scale"),
                ],
            )?,
        },
        HandlerFamily::InstructEdit => {
            required_str(input, "hf_prompt")?;
            HandlerRequest::InstructEdit {
                input_key: required_str(input, "input_key")?,
                params: params(
                    StageFamily::InstructEdit,
                    &[
                        ("hf_prompt", "prompt"),
                        ("num_inference_steps", "num_inference_steps"),
                        ("image_guidance_scale", "image_guidance_scale"),
                    ],
                )?,
            }
        }
        HandlerFamily::TextToImage => {
            required_str(input, "hf_prompt")?;
            HandlerRequest::TextToImage {
                auth_token: SecretString::from(required_str(input, "hf_auth_token")?),
                params: params(StageFamily::TextToImage, &[("hf_prompt", "prompt")])?,
            }
        }
        HandlerFamily::FaceSwap => HandlerRequest::FaceSwap {
            face_image_key: required_str(input, "face_image_key")?,
            body_image_key: required_str(input, "body_image_key")?,
            face_index: positive_index(input, "face_index")?,
            body_index: positive_index(input, "body_index")?,
        },
        HandlerFamily::FaceRestoration => HandlerRequest::FaceRestoration {
            input_key: required_str(input, "input_key")?,
            params: params(
                StageFamily::FaceRestoration,
                &[("upscale", "upscale"), ("only_center_face", "only_center_face")],
            )?,
        },
        HandlerFamily::LipSync => HandlerRequest::LipSync {
            video_input_key: required_str(input, "video_input_key")?,
            audio_input_key: required_str(input, "audio_input_key")?,
            params: params(StageFamily::LipSync, &[("fps", "fps")])?,
        },
        HandlerFamily::TextToSpeech => {
            let params = params(
                StageFamily::TextToSpeech,
                &[("text", "text"), ("language", "language"), ("speed", "speed")],
            )?;
            let language = params.text("language").unwrap_or_default();
            if language_name(language).is_none() {
                let supported: Vec<&str> = TTS_LANGUAGES.iter().map(|(code, _)| *code).collect();
                return Err(RequestError::invalid(
                    "language",
                    format!(
                        "{language} not supported. Supported languages: {}",
                        supported.join(", ")
                    ),
                ));
            }
            if params.text("text").is_some_and(|t| t.trim().is_empty()) {
                return Err(RequestError::invalid("text", "must not be empty"));
            }
            HandlerRequest::TextToSpeech {
                reference_key: optional_str(input, "reference_key")?,
                params,
            }
        }
        HandlerFamily::ImageToVideo => HandlerRequest::ImageToVideo {
            input_key: required_str(input, "input_key")?,
            params: params(
                StageFamily::ImageToVideo,
                &[("num_frames", "num_frames"), ("fps", "fps")],
            )?,
        },
    };
    Ok(handler)
}

fn present<'a>(input: &'a Map<String, Value>, field: &str) -> Option<&'a Value> {
    input.get(field).filter(|v| !v.is_null())
}

fn required_str(input: &Map<String, Value>, field: &str) -> Result<String, RequestError> {
    optional_str(input, field)?.ok_or_else(|| RequestError::MissingField(field.to_string()))
}

fn optional_str(input: &Map<String, Value>, field: &str) -> Result<Option<String>, RequestError> {
    match present(input, field) {
        None => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => {
            Err(RequestError::invalid(field, "must not be empty"))
        }
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(RequestError::invalid(
            field,
            format!("expected a string, got {other}"),
        )),
    }
}

/// A 1-based index; numeric strings are accepted
fn positive_index(input: &Map<String, Value>, field: &str) -> Result<u32, RequestError> {
    let value = present(input, field).ok_or_else(|| RequestError::MissingField(field.to_string()))?;
    let parsed = match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    parsed
        .filter(|n| *n >= 1)
        .and_then(|n| u32::try_from(n).ok())
        .ok_or_else(|| {
            RequestError::invalid(field, format!("must be a positive integer, got {value}"))
        })
}

/// Convert a job value to the parameter type its spec declares
fn param_value(
    field: &str,
    value: &Value,
    default: &ParamValue,
) -> Result<ParamValue, RequestError> {
    let unparsable = |s: &str| RequestError::invalid(field, format!("cannot parse {s:?}"));
    match (value, default) {
        (Value::Bool(b), _) => Ok(ParamValue::Bool(*b)),
        (Value::Number(n), _) => n
            .as_i64()
            .map(ParamValue::Int)
            .or_else(|| n.as_f64().map(ParamValue::Float))
            .ok_or_else(|| RequestError::invalid(field, format!("unsupported number {n}"))),
        (Value::String(s), ParamValue::Int(_)) => {
            s.trim().parse().map(ParamValue::Int).map_err(|_| unparsable(s))
        }
        (Value::String(s), ParamValue::Float(_)) => {
            s.trim().parse().map(ParamValue::Float).map_err(|_| unparsable(s))
        }
        (Value::String(s), ParamValue::Bool(_)) => {
            s.trim().parse().map(ParamValue::Bool).map_err(|_| unparsable(s))
        }
        (Value::String(s), ParamValue::Text(_)) => Ok(ParamValue::Text(s.clone())),
        (other, _) => Err(RequestError::invalid(
            field,
            format!("unsupported value {other}"),
        )),
    }
}

/// Read `fields` (job key, parameter name) and resolve against the family's specs
///
/// When several keys feed one parameter, the first one present wins.
fn resolve_params(
    input: &Map<String, Value>,
    family: StageFamily,
    fields: &[(&str, &str)],
    limits: &RequestLimits,
) -> Result<StageParams, RequestError> {
    let specs = family.param_specs();
    let mut overrides = BTreeMap::new();

    for (key, param) in fields {
        if overrides.contains_key(*param) {
            continue;
        }
        let Some(value) = present(input, key) else {
            continue;
        };
        let Some(spec) = specs.iter().find(|s| s.name == *param) else {
            continue;
        };
        overrides.insert(param.to_string(), param_value(key, value, &spec.default)?);
    }

    let params = StageParams::resolve(&specs, &overrides)
        .map_err(|e| RequestError::InvalidParameter(e.to_string()))?;
    limits.check(&params)?;
    Ok(params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn mapping(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("fixture must be an object"),
        }
    }

    fn base(extra: Value) -> Map<String, Value> {
        let mut map = mapping(json!({
            "bucket_name": "b",
            "output_key": "out.png",
            "aws_access_key_id": "AKID",
            "aws_secret_access_key": "wJalrXUtnFEMI",
            "aws_region": "us-east-1",
        }));
        map.extend(mapping(extra));
        map
    }

    fn parse(family: HandlerFamily, extra: Value) -> Result<JobRequest, RequestError> {
        JobRequest::parse_as(family, &base(extra), &RequestLimits::default())
    }

    #[test]
    fn test_face_swap_indices() {
        let request = parse(
            HandlerFamily::FaceSwap,
            json!({
                "face_image_key": "face.png",
                "body_image_key": "body.png",
                "face_index": 1,
                "body_index": "2",
            }),
        )
        .unwrap();

        match request.handler {
            HandlerRequest::FaceSwap { face_index, body_index, .. } => {
                assert_eq!((face_index, body_index), (1, 2));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_zero_and_negative_indices_rejected() {
        for bad in [json!(0), json!(-1), json!(1.5), json!("one")] {
            let err = parse(
                HandlerFamily::FaceSwap,
                json!({
                    "face_image_key": "f",
                    "body_image_key": "b",
                    "face_index": bad,
                    "body_index": 1,
                }),
            )
            .unwrap_err();
            assert!(
                matches!(&err, RequestError::InvalidField { field, .. } if field == "face_index"),
                "{err}"
            );
        }
    }

    #[test]
    fn test_missing_fields_named() {
        let err = JobRequest::parse_as(
            HandlerFamily::FaceRestoration,
            &mapping(json!({"bucket_name": "b"})),
            &RequestLimits::default(),
        )
        .unwrap_err();
        assert_eq!(err, RequestError::MissingField("output_key".into()));

        let err = parse(HandlerFamily::LipSync, json!({"video_input_key": "v.mp4"})).unwrap_err();
        assert_eq!(err, RequestError::MissingField("audio_input_key".into()));
    }

    #[test]
    fn test_handler_field_selects_family() {
        let request = JobRequest::parse(
            &base(json!({"handler": "image_to_video", "input_key": "in.png"})),
            &RequestLimits::default(),
        )
        .unwrap();
        assert_eq!(request.family(), HandlerFamily::ImageToVideo);

        let err = JobRequest::parse(
            &base(json!({"handler": "upscale_4k"})),
            &RequestLimits::default(),
        )
        .unwrap_err();
        assert_eq!(err, RequestError::UnknownFamily("upscale_4k".into()));
    }

    #[test]
    fn test_image_to_image_defaults_are_explicit() {
        let request = parse(HandlerFamily::ImageToImage, json!({"input_key": "in.png"})).unwrap();
        let params = request.handler.params();

        assert_eq!(params.text("prompt"), Some("4k photo, highly detailed"));
        assert_eq!(params.i64("num_inference_steps"), Some(30));
        assert_eq!(params.f64("guidance_scale"), Some(7.5));
        assert_eq!(params.f64("conditioning_scale"), Some(0.9));
        assert!(params.text("negative_prompt").unwrap().starts_with("extra digit"));
        match request.handler {
            HandlerRequest::ImageToImage { preprocess, .. } => {
                assert_eq!(preprocess, Preprocess::Canny)
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_negative_prompt_alias() {
        let request = parse(
            HandlerFamily::ImageToImage,
            json!({"input_key": "in.png", "negativePrompt": "blurry", "guidance_scale": "9"}),
        )
        .unwrap();
        let params = request.handler.params();
        assert_eq!(params.text("negative_prompt"), Some("blurry"));
        assert_eq!(params.f64("guidance_scale"), Some(9.0));
    }

    #[test]
    fn test_out_of_range_scale_rejected() {
        let err = parse(
            HandlerFamily::ImageToImage,
            json!({"input_key": "in.png", "conditioning_scale": 5.0}),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            RequestError::InvalidParameter(msg) if msg.contains("conditioning_scale")
        ));
    }

    #[test]
    fn test_region_alias_and_session_token() {
        let mut map = base(json!({"input_key": "in.png", "aws_session_token": "tok"}));
        map.remove("aws_region");
        map.insert("region_name".into(), json!("eu-west-1"));

        let request =
            JobRequest::parse_as(HandlerFamily::FaceRestoration, &map, &RequestLimits::default())
                .unwrap();
        assert_eq!(request.region, "eu-west-1");
        assert_eq!(request.credential.session_token(), Some("tok"));
        assert!(!format!("{request:?}").contains("wJalrXUtnFEMI"));
    }

    #[test]
    fn test_tts_language_checked() {
        let err = parse(HandlerFamily::TextToSpeech, json!({"language": "xx"})).unwrap_err();
        assert!(err.to_string().contains("xx not supported"));

        let request =
            parse(HandlerFamily::TextToSpeech, json!({"reference_key": "voice.mp3"})).unwrap();
        let params = request.handler.params();
        assert_eq!(params.text("language"), Some("en"));
        assert_eq!(params.text("text"), Some("Hello, this is a test of text to speech."));
        assert_eq!(request.source_refs()["reference"], BlobRef::new("b", "voice.mp3"));
    }

    #[test]
    fn test_text_to_image_requires_token() {
        let err = parse(HandlerFamily::TextToImage, json!({"hf_prompt": "a cat"})).unwrap_err();
        assert_eq!(err, RequestError::MissingField("hf_auth_token".into()));

        let request = parse(
            HandlerFamily::TextToImage,
            json!({"hf_prompt": "a cat", "hf_auth_token": "hf_xyz"}),
        )
        .unwrap();
        assert_eq!(request.handler.params().text("prompt"), Some("a cat"));
        assert!(request.source_refs().is_empty());
        assert!(!format!("{request:?}").contains("hf_xyz"));
    }

    #[test]
    fn test_instruct_edit_defaults() {
        let request = parse(
            HandlerFamily::InstructEdit,
            json!({"input_key": "in.png", "hf_prompt": "make it snow"}),
        )
        .unwrap();
        let params = request.handler.params();
        assert_eq!(params.i64("num_inference_steps"), Some(10));
        assert_eq!(params.f64("image_guidance_scale"), Some(1.0));
    }

    #[test]
    fn test_wrong_type_rejected() {
        let err = parse(HandlerFamily::FaceSwap, json!({"face_image_key": 7})).unwrap_err();
        assert!(matches!(
            err,
            RequestError::InvalidField { field, .. } if field == "face_image_key"
        ));
    }

    #[test]
    fn test_limits_apply() {
        let limits = RequestLimits {
            video_frames: crate::config::Bounds::new(1.0, 25.0),
            ..Default::default()
        };
        let err = JobRequest::parse_as(
            HandlerFamily::ImageToVideo,
            &base(json!({"input_key": "in.png", "num_frames": 30})),
            &limits,
        )
        .unwrap_err();
        assert!(matches!(err, RequestError::InvalidField { field, .. } if field == "num_frames"));
    }
}
