//! Shared fixtures for pipeline integration tests
//!
//! Everything here runs in-process: an in-memory object service, fake model
//! stages and a codec that writes JSON "containers" instead of real video.

#![allow(dead_code)]

use async_trait::async_trait;
use genmedia_common::image_ops;
use genmedia_common::{MediaArtifact, MediaKind};
use genmedia_core::error::Result as InferenceResultOf;
use genmedia_core::{
    InferenceResult, InferenceStage, ModelBinding, ParamSpec, StageInput, StageParams,
};
use genmedia_face_index::{DetectedFace, FaceSwapModel};
use genmedia_orchestrator::RunnerConfig;
use genmedia_reconstruct::codec::frame_file_name;
use genmedia_reconstruct::{MediaCodec, ReconstructionError, VideoProbe};
use genmedia_storage::{BlobRef, MemoryObjectService, RetryPolicy};
use image::{Rgb, RgbImage};
use secrecy::SecretString;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;
use tempfile::TempDir;

pub const BUCKET: &str = "media-bucket";
pub const ACCESS_KEY: &str = "AKIAJOBONE";
pub const SECRET_KEY: &str = "wJalrXUtnFEMI/K7MDENG";

pub const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
pub const RED: Rgb<u8> = Rgb([255, 0, 0]);

/// Object service with one credential scoped to [`BUCKET`]
pub fn service() -> MemoryObjectService {
    let service = MemoryObjectService::new();
    service.register_credential(ACCESS_KEY, SECRET_KEY, [BUCKET]);
    service
}

pub fn seed(service: &MemoryObjectService, key: &str, bytes: Vec<u8>, content_type: &str) {
    service.insert(&BlobRef::new(BUCKET, key), bytes, content_type);
}

pub fn seed_png(service: &MemoryObjectService, key: &str, image: &RgbImage) {
    let png = image_ops::encode_png(image).expect("encode fixture");
    seed(service, key, png, "image/png");
}

/// Job mapping with storage fields filled in and `fields` merged on top
pub fn job(handler: &str, fields: Value) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert("handler".into(), json!(handler));
    map.insert("bucket_name".into(), json!(BUCKET));
    map.insert("output_key".into(), json!("results/out"));
    map.insert("aws_access_key_id".into(), json!(ACCESS_KEY));
    map.insert("aws_secret_access_key".into(), json!(SECRET_KEY));
    map.insert("aws_region".into(), json!("us-west-2"));
    if let Value::Object(extra) = fields {
        map.extend(extra);
    }
    map
}

pub fn output_ref() -> BlobRef {
    BlobRef::new(BUCKET, "results/out")
}

/// Runner config with a private workspace root and fast retries
pub fn config(root: &TempDir) -> RunnerConfig {
    RunnerConfig {
        workspace_root: Some(root.path().to_path_buf()),
        retry: RetryPolicy {
            base_delay_ms: 1,
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn is_empty_dir(dir: &TempDir) -> bool {
    std::fs::read_dir(dir.path()).expect("read workspace root").next().is_none()
}

/// Black canvas with white squares of side `size` at each `(x, y)`
pub fn faces_image(width: u32, height: u32, size: u32, origins: &[(u32, u32)]) -> RgbImage {
    let mut image = RgbImage::new(width, height);
    for &(ox, oy) in origins {
        for y in oy..oy + size {
            for x in ox..ox + size {
                image.put_pixel(x, y, WHITE);
            }
        }
    }
    image
}

/// Swap network that paints the whole target region red
pub struct PaintModel;

#[async_trait]
impl FaceSwapModel for PaintModel {
    async fn swap_region(
        &self,
        target_region: &RgbImage,
        _source_face: &DetectedFace,
        _auth_token: Option<&SecretString>,
    ) -> genmedia_face_index::Result<RgbImage> {
        Ok(RgbImage::from_pixel(
            target_region.width(),
            target_region.height(),
            RED,
        ))
    }

    fn name(&self) -> &str {
        "paint"
    }
}

/// Video stage fake: expands an image into frames, or passes frames through
///
/// Records every input it sees.
pub struct FrameStage {
    binding: ModelBinding,
    pub seen: Mutex<Vec<StageInput>>,
    /// Emit frames in this ordinal order instead of 0..n
    pub ordinals: Option<Vec<u64>>,
}

impl FrameStage {
    pub fn new() -> Self {
        Self {
            binding: ModelBinding::new("frames", "1"),
            seen: Mutex::new(Vec::new()),
            ordinals: None,
        }
    }

    pub fn with_ordinals(ordinals: Vec<u64>) -> Self {
        Self {
            ordinals: Some(ordinals),
            ..Self::new()
        }
    }
}

#[async_trait]
impl InferenceStage for FrameStage {
    fn name(&self) -> &str {
        "frames"
    }

    fn binding(&self) -> &ModelBinding {
        &self.binding
    }

    fn param_specs(&self) -> Vec<ParamSpec> {
        Vec::new()
    }

    async fn run(
        &self,
        input: &StageInput,
        params: &StageParams,
    ) -> InferenceResultOf<InferenceResult> {
        self.seen.lock().unwrap().push(input.clone());
        let primary = input.primary.as_ref().expect("primary input");

        let (template, count, fps) = match primary.kind {
            MediaKind::Image => (
                primary.to_rgb_image()?,
                params.i64("num_frames").unwrap_or(1) as u64,
                params.f64("fps").unwrap_or(7.0),
            ),
            _ => {
                let frames = primary.frames().expect("frame payload");
                (
                    frames[0].image.clone(),
                    frames.len() as u64,
                    primary.metadata.fps.unwrap_or(25.0),
                )
            }
        };

        let ordinals = self.ordinals.clone().unwrap_or_else(|| (0..count).collect());
        let frames = ordinals
            .into_iter()
            .map(|ordinal| genmedia_common::Frame::new(ordinal, template.clone()))
            .collect();
        Ok(InferenceResult {
            artifact: MediaArtifact::from_frames(frames, fps),
            diagnostics: BTreeMap::new(),
        })
    }
}

/// Codec whose containers are JSON-encoded [`VideoProbe`]s
#[derive(Default)]
pub struct JsonCodec;

impl JsonCodec {
    pub fn container(probe: &VideoProbe) -> Vec<u8> {
        serde_json::to_vec(probe).expect("serialize probe")
    }

    async fn read(path: &Path) -> Result<VideoProbe, ReconstructionError> {
        let bytes = tokio::fs::read(path).await?;
        serde_json::from_slice(&bytes)
            .map_err(|e| ReconstructionError::CodecError(format!("not a container: {e}")))
    }
}

#[async_trait]
impl MediaCodec for JsonCodec {
    async fn encode_frames(
        &self,
        frame_dir: &Path,
        fps: f64,
        output: &Path,
    ) -> Result<(), ReconstructionError> {
        let mut count = 0;
        while frame_dir.join(frame_file_name(count)).exists() {
            count += 1;
        }
        let first_png = tokio::fs::read(frame_dir.join(frame_file_name(0))).await?;
        let first = image_ops::decode_rgb(&first_png)?;
        let probe = VideoProbe {
            width: first.width(),
            height: first.height(),
            frame_count: count,
            fps,
            duration_secs: count as f64 / fps,
            has_audio: false,
            audio_sample_rate: None,
        };
        tokio::fs::write(output, Self::container(&probe)).await?;
        Ok(())
    }

    async fn mux_audio(
        &self,
        video: &Path,
        audio: &Path,
        output: &Path,
    ) -> Result<(), ReconstructionError> {
        let mut probe = Self::read(video).await?;
        let track = genmedia_common::audio::decode_wav(&tokio::fs::read(audio).await?)?;
        probe.has_audio = true;
        probe.audio_sample_rate = Some(track.sample_rate);
        tokio::fs::write(output, Self::container(&probe)).await?;
        Ok(())
    }

    async fn probe(&self, path: &Path) -> Result<VideoProbe, ReconstructionError> {
        Self::read(path).await
    }

    async fn decode_frames(
        &self,
        input: &Path,
        output_dir: &Path,
    ) -> Result<f64, ReconstructionError> {
        let probe = Self::read(input).await?;
        let png = image_ops::encode_png(&RgbImage::from_pixel(probe.width, probe.height, WHITE))?;
        for index in 0..probe.frame_count {
            tokio::fs::write(output_dir.join(frame_file_name(index)), &png).await?;
        }
        Ok(probe.fps)
    }

    async fn extract_audio(
        &self,
        _input: &Path,
        _output: &Path,
        _sample_rate: u32,
    ) -> Result<(), ReconstructionError> {
        Err(ReconstructionError::CodecError("only WAV audio in tests".into()))
    }
}

/// Mono 44.1 kHz WAV of `seconds` length
pub fn wav(seconds: f64) -> Vec<u8> {
    let rate = 44_100;
    let n = (seconds * f64::from(rate)) as usize;
    let track = genmedia_common::AudioTrack {
        sample_rate: rate,
        channels: 1,
        samples: (0..n).map(|i| ((i as f32) * 0.05).sin() * 0.5).collect(),
    };
    genmedia_common::audio::encode_wav(&track).expect("encode wav")
}
