//! Hosted inference endpoints over HTTP
//!
//! Prompt-only image generation uses the hosted text-to-image convention: a
//! JSON body `{"inputs": "<prompt>"}` answered with raw image bytes. Every
//! other family posts
//!
//! ```json
//! {"family": "...", "inputs": "<base64 primary>", "extras": {"audio": "<base64>"},
//!  "parameters": {...}, "device": "cuda:0"}
//! ```
//!
//! and receives image or WAV bytes, or `{"frames": ["<base64 png>", ...]}` for
//! frame-producing families.

use crate::device::Device;
use crate::error::{InferenceError, Result};
use crate::family::StageFamily;
use crate::model_stage::{ModelBackend, ModelRequest};
use crate::stage::ModelBinding;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use genmedia_common::{audio, image_ops, ArtifactPayload, Frame, MediaArtifact, MediaKind};
use genmedia_face_index::{DetectedFace, FaceSwapModel, FaceIndexError};
use image::RgbImage;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::{debug, warn};

/// Response body for frame-producing families
#[derive(Debug, Deserialize)]
struct FramesResponse {
    frames: Vec<String>,
    #[serde(default)]
    fps: Option<f64>,
}

/// Model served behind an HTTP endpoint
pub struct HttpModelBackend {
    client: reqwest::Client,
    endpoint: String,
    binding: ModelBinding,
    /// Token for endpoints that are not authorized per job
    default_token: Option<SecretString>,
}

impl HttpModelBackend {
    pub fn new(
        endpoint: impl Into<String>,
        binding: ModelBinding,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| InferenceError::ResourceUnavailable(format!("http client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            binding,
            default_token: None,
        })
    }

    #[must_use]
    pub fn with_default_token(mut self, token: SecretString) -> Self {
        self.default_token = Some(token);
        self
    }

    fn request_body(request: &ModelRequest<'_>) -> Result<Value> {
        if request.family == StageFamily::TextToImage {
            return Ok(json!({ "inputs": request.params.text("prompt").unwrap_or_default() }));
        }

        let mut body = Map::new();
        body.insert("family".into(), json!(request.family));
        body.insert("device".into(), json!(request.device.to_string()));

        if let Some(primary) = &request.input.primary {
            body.insert("inputs".into(), encode_artifact(primary)?);
        }
        if !request.input.extras.is_empty() {
            let extras = request
                .input
                .extras
                .iter()
                .map(|(name, artifact)| encode_artifact(artifact).map(|v| (name.clone(), v)))
                .collect::<Result<Map<String, Value>>>()?;
            body.insert("extras".into(), Value::Object(extras));
        }

        let parameters: Map<String, Value> = request
            .params
            .iter()
            .map(|(k, v)| (k.clone(), json!(v)))
            .collect();
        body.insert("parameters".into(), Value::Object(parameters));
        Ok(Value::Object(body))
    }

    async fn post(&self, body: &Value, token: Option<&SecretString>) -> Result<Vec<u8>> {
        let mut builder = self.client.post(&self.endpoint).json(body);
        if let Some(token) = token.or(self.default_token.as_ref()) {
            builder = builder.bearer_auth(token.expose_secret());
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                InferenceError::Runtime(format!("{} timed out: {e}", self.binding))
            } else {
                InferenceError::ResourceUnavailable(format!("{}: {e}", self.binding))
            }
        })?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let text = response.text().await.unwrap_or_default();
            warn!("{} answered HTTP {}", self.binding, status);
            return Err(status_error(status, &text));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| InferenceError::Runtime(format!("reading response: {e}")))?;
        debug!("{} returned {} bytes", self.binding, bytes.len());
        Ok(bytes.to_vec())
    }
}

/// Map a non-success HTTP status to the failure channel
pub(crate) fn status_error(status: u16, body: &str) -> InferenceError {
    let detail: String = body.chars().take(200).collect();
    match status {
        401 | 403 | 404 | 429 | 500..=599 => {
            InferenceError::ResourceUnavailable(format!("HTTP {status}: {detail}"))
        }
        400..=499 => InferenceError::InvalidInput(format!("HTTP {status}: {detail}")),
        _ => InferenceError::Runtime(format!("unexpected HTTP {status}: {detail}")),
    }
}

/// Fails on the first frame that cannot be encoded
fn encode_artifact(artifact: &MediaArtifact) -> Result<Value> {
    match &artifact.payload {
        ArtifactPayload::Bytes(bytes) => Ok(Value::String(BASE64.encode(bytes))),
        ArtifactPayload::Frames(frames) => {
            let encoded = frames
                .iter()
                .map(|f| {
                    if f.image.width() == 0 || f.image.height() == 0 {
                        return Err(InferenceError::InvalidInput(format!(
                            "frame {} is empty",
                            f.ordinal
                        )));
                    }
                    image_ops::encode_png(&f.image)
                        .map(|png| Value::String(BASE64.encode(png)))
                        .map_err(|e| {
                            InferenceError::InvalidInput(format!("frame {}: {e}", f.ordinal))
                        })
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(Value::Array(encoded))
        }
    }
}

fn decode_response(kind: MediaKind, bytes: &[u8], default_fps: f64) -> Result<MediaArtifact> {
    match kind {
        MediaKind::Image => Ok(MediaArtifact::from_image(&image_ops::decode_rgb(bytes)?)?),
        MediaKind::Audio => {
            if !audio::is_wav(bytes) {
                return Err(InferenceError::Runtime(
                    "model returned audio that is not WAV".to_string(),
                ));
            }
            Ok(MediaArtifact::from_audio(&audio::decode_wav(bytes)?)?)
        }
        MediaKind::VideoFrames => {
            let parsed: FramesResponse = serde_json::from_slice(bytes)
                .map_err(|e| InferenceError::Runtime(format!("malformed frames response: {e}")))?;
            let mut frames = Vec::with_capacity(parsed.frames.len());
            for (ordinal, encoded) in parsed.frames.iter().enumerate() {
                let png = BASE64
                    .decode(encoded)
                    .map_err(|e| InferenceError::Runtime(format!("frame {ordinal}: {e}")))?;
                frames.push(Frame::new(ordinal as u64, image_ops::decode_rgb(&png)?));
            }
            Ok(MediaArtifact::from_frames(
                frames,
                parsed.fps.unwrap_or(default_fps),
            ))
        }
        MediaKind::Video => Err(InferenceError::Runtime(
            "encoded video responses are not supported".to_string(),
        )),
    }
}

#[async_trait]
impl ModelBackend for HttpModelBackend {
    fn binding(&self) -> &ModelBinding {
        &self.binding
    }

    fn available_devices(&self) -> Vec<Device> {
        vec![Device::Remote]
    }

    async fn infer(&self, request: ModelRequest<'_>) -> Result<MediaArtifact> {
        let body = Self::request_body(&request)?;
        let bytes = self.post(&body, request.input.auth_token.as_ref()).await?;
        let fps = request.params.f64("fps").unwrap_or(25.0);
        decode_response(request.family.output_kind(), &bytes, fps)
    }
}

#[async_trait]
impl FaceSwapModel for HttpModelBackend {
    async fn swap_region(
        &self,
        target_region: &RgbImage,
        source_face: &DetectedFace,
        auth_token: Option<&SecretString>,
    ) -> genmedia_face_index::Result<RgbImage> {
        let region = image_ops::encode_png(target_region)?;
        let body = json!({
            "family": "face_swap",
            "inputs": BASE64.encode(region),
            "source_embedding": source_face.embedding,
        });
        let bytes = self
            .post(&body, auth_token)
            .await
            .map_err(|e| match e {
                InferenceError::ResourceUnavailable(msg) => FaceIndexError::ModelLoadError(msg),
                other => FaceIndexError::SwapError(other.to_string()),
            })?;
        Ok(image_ops::decode_rgb(&bytes)?)
    }

    fn name(&self) -> &str {
        &self.binding.name
    }
}
