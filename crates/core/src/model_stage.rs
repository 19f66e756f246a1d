//! Generic stage over a [`ModelBackend`]

use crate::device::{Device, DevicePolicy};
use crate::error::{InferenceError, Result};
use crate::family::{language_name, StageFamily};
use crate::params::{ParamSpec, StageParams};
use crate::stage::{InferenceResult, InferenceStage, ModelBinding, StageInput};
use async_trait::async_trait;
use genmedia_common::{MediaArtifact, MediaKind};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// What a backend receives for one call
#[derive(Debug, Clone, Copy)]
pub struct ModelRequest<'a> {
    pub family: StageFamily,
    pub input: &'a StageInput,
    pub params: &'a StageParams,
    pub device: Device,
}

/// An inference engine bound to one model
///
/// Weights stay resident between calls; construction is where loading happens.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    fn binding(&self) -> &ModelBinding;

    /// Devices this backend can execute on
    fn available_devices(&self) -> Vec<Device>;

    async fn infer(&self, request: ModelRequest<'_>) -> Result<MediaArtifact>;
}

/// One model family served by one backend on one device
pub struct ModelStage {
    name: String,
    family: StageFamily,
    backend: Arc<dyn ModelBackend>,
    device: Device,
}

impl ModelStage {
    /// Bind `backend` for `family` and resolve the device under `policy`
    pub fn new(
        family: StageFamily,
        backend: Arc<dyn ModelBackend>,
        policy: DevicePolicy,
    ) -> Result<Self> {
        let device = policy.resolve(&backend.available_devices())?;
        let name = format!("{family}:{}", backend.binding().name);
        info!("Stage {} bound to {} on {}", name, backend.binding(), device);
        Ok(Self {
            name,
            family,
            backend,
            device,
        })
    }

    #[must_use]
    pub fn family(&self) -> StageFamily {
        self.family
    }

    #[must_use]
    pub fn device(&self) -> Device {
        self.device
    }

    fn validate_params(&self, params: &StageParams) -> Result<()> {
        if self.family == StageFamily::TextToSpeech {
            let language = params.text("language").unwrap_or_default();
            if language_name(language).is_none() {
                return Err(InferenceError::InvalidInput(format!(
                    "language {language} not supported"
                )));
            }
            if params.text("text").is_some_and(|t| t.trim().is_empty()) {
                return Err(InferenceError::InvalidInput("text is empty".to_string()));
            }
        }
        Ok(())
    }

    fn check_output(&self, artifact: &MediaArtifact, params: &StageParams) -> Result<()> {
        let expected = self.family.output_kind();
        if artifact.kind != expected {
            return Err(InferenceError::Runtime(format!(
                "{} returned {}, expected {}",
                self.backend.binding(),
                artifact.kind,
                expected
            )));
        }

        if expected == MediaKind::VideoFrames {
            let frames = artifact.frames().unwrap_or_default();
            if frames.is_empty() {
                return Err(InferenceError::Runtime(format!(
                    "{} returned no frames",
                    self.backend.binding()
                )));
            }
            if let Some(wanted) = params.i64("num_frames") {
                if frames.len() as i64 != wanted {
                    return Err(InferenceError::Runtime(format!(
                        "{} returned {} frames, requested {}",
                        self.backend.binding(),
                        frames.len(),
                        wanted
                    )));
                }
            }
        } else if artifact.bytes().map_or(true, <[u8]>::is_empty) {
            return Err(InferenceError::Runtime(format!(
                "{} returned an empty {}",
                self.backend.binding(),
                expected
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl InferenceStage for ModelStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn binding(&self) -> &ModelBinding {
        self.backend.binding()
    }

    fn param_specs(&self) -> Vec<ParamSpec> {
        self.family.param_specs()
    }

    async fn run(&self, input: &StageInput, params: &StageParams) -> Result<InferenceResult> {
        self.family.validate_input(input)?;
        self.validate_params(params)?;

        let started = Instant::now();
        let artifact = self
            .backend
            .infer(ModelRequest {
                family: self.family,
                input,
                params,
                device: self.device,
            })
            .await?;
        let elapsed = started.elapsed();
        self.check_output(&artifact, params)?;

        debug!("{} finished in {:?}", self.name, elapsed);

        let mut diagnostics = BTreeMap::new();
        diagnostics.insert("family".to_string(), self.family.to_string());
        diagnostics.insert("model".to_string(), self.backend.binding().to_string());
        diagnostics.insert("device".to_string(), self.device.to_string());
        diagnostics.insert("elapsed_ms".to_string(), elapsed.as_millis().to_string());
        for (name, value) in params.iter() {
            diagnostics.insert(format!("param.{name}"), value.to_string());
        }

        Ok(InferenceResult {
            artifact,
            diagnostics,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ParamValue;
    use genmedia_common::Frame;
    use image::RgbImage;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Returns a fixed artifact and counts calls
    struct CannedBackend {
        binding: ModelBinding,
        output: MediaArtifact,
        calls: AtomicU32,
    }

    impl CannedBackend {
        fn new(output: MediaArtifact) -> Self {
            Self {
                binding: ModelBinding::new("canned", "1"),
                output,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl ModelBackend for CannedBackend {
        fn binding(&self) -> &ModelBinding {
            &self.binding
        }

        fn available_devices(&self) -> Vec<Device> {
            vec![Device::Cpu, Device::Cuda(0)]
        }

        async fn infer(&self, _request: ModelRequest<'_>) -> Result<MediaArtifact> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.output.clone())
        }
    }

    fn image() -> MediaArtifact {
        MediaArtifact::from_image(&RgbImage::new(8, 8)).unwrap()
    }

    fn defaults(family: StageFamily) -> StageParams {
        StageParams::resolve(&family.param_specs(), &BTreeMap::new()).unwrap()
    }

    #[tokio::test]
    async fn test_run_reports_diagnostics() {
        let backend = Arc::new(CannedBackend::new(image()));
        let stage = ModelStage::new(StageFamily::FaceRestoration, backend, DevicePolicy::default())
            .unwrap();

        let input = StageInput::new(image());
        let result = stage
            .run(&input, &defaults(StageFamily::FaceRestoration))
            .await
            .unwrap();

        assert_eq!(result.diagnostics["model"], "canned@1");
        assert_eq!(result.diagnostics["device"], "cuda:0");
        assert_eq!(result.diagnostics["param.upscale"], "2");
        // Input untouched
        assert_eq!(input.primary.unwrap(), image());
    }

    #[tokio::test]
    async fn test_device_resolved_once_at_construction() {
        let backend = Arc::new(CannedBackend::new(image()));
        let stage =
            ModelStage::new(StageFamily::ImageToImage, backend, DevicePolicy::CpuOnly).unwrap();
        assert_eq!(stage.device(), Device::Cpu);
    }

    #[tokio::test]
    async fn test_wrong_output_kind_is_runtime_failure() {
        let backend = Arc::new(CannedBackend::new(MediaArtifact::from_frames(
            vec![Frame::new(0, RgbImage::new(2, 2))],
            7.0,
        )));
        let stage =
            ModelStage::new(StageFamily::InstructEdit, backend, DevicePolicy::default()).unwrap();

        let err = stage
            .run(&StageInput::new(image()), &defaults(StageFamily::InstructEdit))
            .await
            .unwrap_err();
        assert!(matches!(err, InferenceError::Runtime(_)));
    }

    #[tokio::test]
    async fn test_frame_count_must_match_request() {
        let frames = (0..3).map(|i| Frame::new(i, RgbImage::new(2, 2))).collect();
        let backend = Arc::new(CannedBackend::new(MediaArtifact::from_frames(frames, 7.0)));
        let stage =
            ModelStage::new(StageFamily::ImageToVideo, backend, DevicePolicy::default()).unwrap();

        let err = stage
            .run(&StageInput::new(image()), &defaults(StageFamily::ImageToVideo))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("returned 3 frames, requested 14"));
    }

    #[tokio::test]
    async fn test_invalid_input_never_reaches_backend() {
        let backend = Arc::new(CannedBackend::new(image()));
        let stage = ModelStage::new(
            StageFamily::TextToSpeech,
            backend.clone(),
            DevicePolicy::default(),
        )
        .unwrap();

        let mut overrides = BTreeMap::new();
        overrides.insert("language".to_string(), ParamValue::Text("xx".into()));
        let params =
            StageParams::resolve(&StageFamily::TextToSpeech.param_specs(), &overrides).unwrap();

        let err = stage.run(&StageInput::text_only(), &params).await.unwrap_err();
        assert!(matches!(err, InferenceError::InvalidInput(_)));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_missing_device_fails_construction() {
        let backend = Arc::new(CannedBackend::new(image()));
        let result = ModelStage::new(
            StageFamily::ImageToImage,
            backend,
            DevicePolicy::Require(Device::CoreMl),
        );
        assert!(matches!(result, Err(InferenceError::ResourceUnavailable(_))));
    }
}
