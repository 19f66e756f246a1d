//! Runs one job from mapping to signed URL
//!
//! ```text
//! validate -> fetch -> preprocess -> face index -> infer -> reconstruct -> sign -> publish
//! ```
//!
//! Any failing step ends the job. Nothing is published until every earlier
//! step has succeeded, and the job's store client, credentials and
//! workspace are dropped when `run` returns.

use crate::config::RunnerConfig;
use crate::error::{PipelineError, RequestError, Result};
use crate::outcome::{JobOutcome, JobSuccess};
use crate::request::{HandlerFamily, HandlerRequest, JobRequest, Preprocess};
use crate::workspace::JobWorkspace;
use genmedia_common::audio::{LIP_SYNC_SAMPLE_RATE, VOICE_REFERENCE_SAMPLE_RATE};
use genmedia_common::image_ops::{self, CANNY_HIGH_THRESHOLD, CANNY_LOW_THRESHOLD};
use genmedia_common::{ArtifactPayload, AudioTrack, MediaArtifact, MediaKind};
use genmedia_core::family::{EXTRA_AUDIO, EXTRA_CONDITIONING, EXTRA_REFERENCE_AUDIO};
use genmedia_core::{
    language_name, InferenceError, InferenceStage, StageInput, StageParams, FACE_SOURCE,
    FACE_TARGET,
};
use genmedia_face_index::FaceIndexer;
use genmedia_reconstruct::{
    decode_video, load_audio, FfmpegCodec, MediaCodec, VideoReconstructor,
};
use genmedia_storage::{BlobRef, BlobStore, BlobStoreFactory, RetryingBlobStore};
use image::RgbImage;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};
use uuid::Uuid;

/// Pipeline steps, for logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStep {
    Fetch,
    Preprocess,
    FaceIndex,
    Infer,
    Reconstruct,
    Sign,
    Publish,
}

impl fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineStep::Fetch => "fetch",
            PipelineStep::Preprocess => "preprocess",
            PipelineStep::FaceIndex => "face_index",
            PipelineStep::Infer => "infer",
            PipelineStep::Reconstruct => "reconstruct",
            PipelineStep::Sign => "sign",
            PipelineStep::Publish => "publish",
        };
        f.write_str(name)
    }
}

async fn timed<T, F>(step: PipelineStep, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let started = Instant::now();
    let result = fut.await;
    match &result {
        Ok(_) => debug!("{} finished in {:?}", step, started.elapsed()),
        Err(e) => warn!("{} failed after {:?}: {}", step, started.elapsed(), e),
    }
    result
}

/// What happens to the stage output before it is published
enum Finish {
    Publish,
    Encode { fps: f64 },
    EncodeWithAudio { fps: f64, audio: AudioTrack },
}

/// Stage input plus everything needed after inference
struct Prepared {
    input: StageInput,
    params: StageParams,
    finish: Finish,
    metadata: BTreeMap<String, Value>,
}

/// Executes jobs with stages bound once per worker
pub struct PipelineRunner {
    config: RunnerConfig,
    stores: Arc<dyn BlobStoreFactory>,
    stages: HashMap<HandlerFamily, Arc<dyn InferenceStage>>,
    face_indexer: Option<FaceIndexer>,
    codec: Arc<dyn MediaCodec>,
}

impl PipelineRunner {
    #[must_use]
    pub fn new(config: RunnerConfig, stores: Arc<dyn BlobStoreFactory>) -> Self {
        Self {
            config,
            stores,
            stages: HashMap::new(),
            face_indexer: None,
            codec: Arc::new(FfmpegCodec::default()),
        }
    }

    /// Bind the stage serving `family`, replacing any earlier binding
    #[must_use]
    pub fn with_stage(mut self, family: HandlerFamily, stage: Arc<dyn InferenceStage>) -> Self {
        info!("Registered {} for {}", stage.binding(), family);
        self.stages.insert(family, stage);
        self
    }

    /// Detector used to resolve face indices
    #[must_use]
    pub fn with_face_indexer(mut self, indexer: FaceIndexer) -> Self {
        self.face_indexer = Some(indexer);
        self
    }

    #[must_use]
    pub fn with_codec(mut self, codec: Arc<dyn MediaCodec>) -> Self {
        self.codec = codec;
        self
    }

    #[must_use]
    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Families with a bound stage
    #[must_use]
    pub fn families(&self) -> Vec<HandlerFamily> {
        let mut families: Vec<_> = self.stages.keys().copied().collect();
        families.sort_by_key(HandlerFamily::name);
        families
    }

    /// Run a job whose mapping names its own `handler`
    pub async fn run(&self, input: &Map<String, Value>, cancel: &CancellationToken) -> JobOutcome {
        self.run_job(None, input, cancel).await
    }

    /// Run a job as `family` regardless of its `handler` field
    pub async fn run_as(
        &self,
        family: HandlerFamily,
        input: &Map<String, Value>,
        cancel: &CancellationToken,
    ) -> JobOutcome {
        self.run_job(Some(family), input, cancel).await
    }

    async fn run_job(
        &self,
        family: Option<HandlerFamily>,
        input: &Map<String, Value>,
        cancel: &CancellationToken,
    ) -> JobOutcome {
        let job_id = Uuid::new_v4();
        let span = info_span!("job", id = %job_id, family = tracing::field::Empty);

        async move {
            let started = Instant::now();
            let result = self.validate_and_execute(job_id, family, input, cancel).await;
            match &result {
                Ok(success) => info!("Job succeeded in {:?}: {}", started.elapsed(), success.url),
                Err(e) => error!(
                    kind = e.kind(),
                    "Job failed after {:?}: {}",
                    started.elapsed(),
                    e
                ),
            }
            JobOutcome::from(result)
        }
        .instrument(span)
        .await
    }

    async fn validate_and_execute(
        &self,
        job_id: Uuid,
        family: Option<HandlerFamily>,
        input: &Map<String, Value>,
        cancel: &CancellationToken,
    ) -> Result<JobSuccess> {
        let limits = &self.config.limits;
        let request = match family {
            Some(family) => JobRequest::parse_as(family, input, limits)?,
            None => JobRequest::parse(input, limits)?,
        };
        Span::current().record("family", request.family().name());

        let workspace =
            JobWorkspace::create(self.config.workspace_root.as_deref(), &job_id.to_string())?;
        let timeout = self.config.job_timeout();

        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(PipelineError::Cancelled),
            outcome = tokio::time::timeout(timeout, self.execute(&request, &workspace)) => {
                outcome.unwrap_or(Err(PipelineError::Timeout(timeout)))
            }
        };

        // Already logged on failure; the job result stands either way
        let _ = workspace.close();
        result
    }

    async fn execute(&self, request: &JobRequest, workspace: &JobWorkspace) -> Result<JobSuccess> {
        let family = request.family();
        let stage = self.stages.get(&family).cloned().ok_or_else(|| {
            InferenceError::ResourceUnavailable(format!("no stage bound for {family}"))
        })?;

        let store = RetryingBlobStore::new(
            self.stores.connect(&request.store_config())?,
            self.config.retry.clone(),
        );

        let prepared = self.prepare(request, &store, workspace).await?;

        let result = timed(PipelineStep::Infer, async {
            Ok::<_, PipelineError>(stage.run(&prepared.input, &prepared.params).await?)
        })
        .await?;
        for (key, value) in &result.diagnostics {
            debug!("diagnostic {} = {}", key, value);
        }

        let artifact = match prepared.finish {
            Finish::Publish => result.artifact,
            Finish::Encode { fps } => {
                timed(
                    PipelineStep::Reconstruct,
                    self.reconstruct(result.artifact, fps, None, workspace),
                )
                .await?
            }
            Finish::EncodeWithAudio { fps, audio } => {
                timed(
                    PipelineStep::Reconstruct,
                    self.reconstruct(result.artifact, fps, Some(audio), workspace),
                )
                .await?
            }
        };

        let output = request.output_ref();
        let url = self.publish(&store, &output, artifact).await?;

        let mut success = JobSuccess::new(url);
        success.metadata = prepared.metadata;
        Ok(success)
    }

    async fn fetch(&self, store: &dyn BlobStore, blob: &BlobRef) -> Result<Vec<u8>> {
        timed(PipelineStep::Fetch, async {
            let bytes = store.get(blob).await?;
            info!("Fetched {} ({} bytes)", blob, bytes.len());
            Ok::<_, PipelineError>(bytes)
        })
        .await
    }

    async fn fetch_image(&self, store: &dyn BlobStore, blob: &BlobRef) -> Result<RgbImage> {
        let bytes = self.fetch(store, blob).await?;
        timed(PipelineStep::Preprocess, async {
            Ok::<_, PipelineError>(image_ops::decode_rgb(&bytes)?)
        })
        .await
    }

    fn face_indexer(&self) -> Result<&FaceIndexer> {
        self.face_indexer.as_ref().ok_or_else(|| {
            InferenceError::ResourceUnavailable("no face detector configured".to_string()).into()
        })
    }

    async fn prepare(
        &self,
        request: &JobRequest,
        store: &dyn BlobStore,
        workspace: &JobWorkspace,
    ) -> Result<Prepared> {
        let params = request.handler.params();
        let plain = |input: StageInput| Prepared {
            input,
            params: params.clone(),
            finish: Finish::Publish,
            metadata: BTreeMap::new(),
        };

        let prepared = match &request.handler {
            HandlerRequest::ImageToImage {
                input_key,
                preprocess,
                ..
            } => {
                let image = self.fetch_image(store, &request.blob(input_key)).await?;
                let conditioning = match preprocess {
                    Preprocess::Canny => Some(image_ops::canny_edges(
                        &image,
                        CANNY_LOW_THRESHOLD,
                        CANNY_HIGH_THRESHOLD,
                    )),
                    Preprocess::Sketch => Some(image_ops::grayscale_rgb(&image)),
                    Preprocess::None => None,
                };
                let mut input = StageInput::new(MediaArtifact::from_image(&image)?);
                if let Some(conditioning) = conditioning {
                    input = input
                        .with_extra(EXTRA_CONDITIONING, MediaArtifact::from_image(&conditioning)?);
                }
                plain(input)
            }

            HandlerRequest::InstructEdit { input_key, .. }
            | HandlerRequest::FaceRestoration { input_key, .. } => {
                let image = self.fetch_image(store, &request.blob(input_key)).await?;
                plain(StageInput::new(MediaArtifact::from_image(&image)?))
            }

            HandlerRequest::TextToImage { auth_token, .. } => {
                plain(StageInput::text_only().with_auth_token(auth_token.clone()))
            }

            HandlerRequest::FaceSwap {
                face_image_key,
                body_image_key,
                face_index,
                body_index,
            } => {
                let indexer = self.face_indexer()?;
                let face_ref = request.blob(face_image_key);
                let body_ref = request.blob(body_image_key);
                let (face_image, body_image) = tokio::try_join!(
                    self.fetch_image(store, &face_ref),
                    self.fetch_image(store, &body_ref)
                )?;

                let (source, target) = timed(PipelineStep::FaceIndex, async {
                    let face_faces = indexer.detect(&face_image, &face_ref.to_string())?;
                    let body_faces = indexer.detect(&body_image, &body_ref.to_string())?;
                    info!(
                        "{} face(s) in {}, {} face(s) in {}",
                        face_faces.len(),
                        face_ref,
                        body_faces.len(),
                        body_ref
                    );
                    let source = FaceIndexer::resolve(&face_faces, *face_index)?.clone();
                    let target = FaceIndexer::resolve(&body_faces, *body_index)?.clone();
                    Ok::<_, PipelineError>((source, target))
                })
                .await?;

                plain(
                    StageInput::new(MediaArtifact::from_image(&body_image)?)
                        .with_face(FACE_TARGET, target)
                        .with_face(FACE_SOURCE, source),
                )
            }

            HandlerRequest::LipSync {
                video_input_key,
                audio_input_key,
                ..
            } => {
                let video_ref = request.blob(video_input_key);
                let audio_ref = request.blob(audio_input_key);
                let (video_bytes, audio_bytes) = tokio::try_join!(
                    self.fetch(store, &video_ref),
                    self.fetch(store, &audio_ref)
                )?;

                let (frames, source_fps, audio) = timed(PipelineStep::Preprocess, async {
                    let (frames, fps) =
                        decode_video(self.codec.as_ref(), &video_bytes, workspace.path()).await?;
                    let audio = load_audio(
                        self.codec.as_ref(),
                        &audio_bytes,
                        workspace.path(),
                        LIP_SYNC_SAMPLE_RATE,
                    )
                    .await?
                    .to_mono();
                    Ok::<_, PipelineError>((frames, fps, audio))
                })
                .await?;

                // Output keeps the source frame rate; `fps` covers sources without one
                let fps = if source_fps > 0.0 {
                    source_fps
                } else {
                    frame_rate(&params)?
                };
                info!(
                    "{} frames at {} fps, {:.2}s of audio",
                    frames.len(),
                    fps,
                    audio.duration_secs()
                );

                let input = StageInput::new(MediaArtifact::from_frames(frames, fps))
                    .with_extra(EXTRA_AUDIO, MediaArtifact::from_audio(&audio)?);
                Prepared {
                    input,
                    params: params.clone(),
                    finish: Finish::EncodeWithAudio { fps, audio },
                    metadata: BTreeMap::new(),
                }
            }

            HandlerRequest::TextToSpeech { reference_key, .. } => {
                let mut input = StageInput::text_only();
                if let Some(key) = reference_key {
                    let bytes = self.fetch(store, &request.blob(key)).await?;
                    let reference = timed(PipelineStep::Preprocess, async {
                        Ok::<_, PipelineError>(load_audio(
                            self.codec.as_ref(),
                            &bytes,
                            workspace.path(),
                            VOICE_REFERENCE_SAMPLE_RATE,
                        )
                        .await?
                        .to_mono())
                    })
                    .await?;
                    input = input
                        .with_extra(EXTRA_REFERENCE_AUDIO, MediaArtifact::from_audio(&reference)?);
                }

                let language = params.text("language").unwrap_or_default().to_string();
                let mut metadata = BTreeMap::new();
                metadata.insert(
                    "language_name".to_string(),
                    Value::from(language_name(&language).unwrap_or_default()),
                );
                metadata.insert("language".to_string(), Value::from(language));
                metadata.insert(
                    "used_voice_cloning".to_string(),
                    Value::from(reference_key.is_some()),
                );
                Prepared {
                    input,
                    params: params.clone(),
                    finish: Finish::Publish,
                    metadata,
                }
            }

            HandlerRequest::ImageToVideo { input_key, .. } => {
                let image = self.fetch_image(store, &request.blob(input_key)).await?;
                Prepared {
                    input: StageInput::new(MediaArtifact::from_image(&image)?),
                    params: params.clone(),
                    finish: Finish::Encode {
                        fps: frame_rate(&params)?,
                    },
                    metadata: BTreeMap::new(),
                }
            }
        };
        Ok(prepared)
    }

    async fn reconstruct(
        &self,
        artifact: MediaArtifact,
        fps: f64,
        audio: Option<AudioTrack>,
        workspace: &JobWorkspace,
    ) -> Result<MediaArtifact> {
        let ArtifactPayload::Frames(frames) = artifact.payload else {
            return Err(InferenceError::Runtime(format!(
                "expected a frame sequence, got {}",
                artifact.kind
            ))
            .into());
        };

        let mut reconstructor = VideoReconstructor::new(self.codec.clone(), workspace.path())?;
        reconstructor.accumulate_all(frames)?;
        reconstructor.encode(fps).await?;
        if let Some(audio) = audio {
            let fitted = audio.fitted(reconstructor.video_duration_secs());
            reconstructor.mux(&fitted).await?;
        }
        Ok(reconstructor.finalize().await?)
    }

    async fn publish(
        &self,
        store: &dyn BlobStore,
        output: &BlobRef,
        artifact: MediaArtifact,
    ) -> Result<String> {
        if artifact.kind == MediaKind::VideoFrames {
            return Err(
                InferenceError::Runtime("frame sequence was not encoded".to_string()).into(),
            );
        }
        let content_type = artifact.kind.content_type();
        let bytes = artifact.into_bytes();

        // Sign before upload so a signing failure leaves nothing published
        let url = timed(PipelineStep::Sign, async {
            Ok::<_, PipelineError>(store.sign(output, self.config.signed_url_ttl()).await?)
        })
        .await?;

        timed(PipelineStep::Publish, async {
            let ack = store.put(output, &bytes, content_type).await?;
            info!("Published {} ({} bytes, {})", ack.blob, ack.size, content_type);
            Ok::<_, PipelineError>(())
        })
        .await?;
        Ok(url)
    }
}

fn frame_rate(params: &StageParams) -> Result<f64> {
    params
        .f64("fps")
        .ok_or_else(|| RequestError::InvalidParameter("fps is not set".to_string()).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunnerConfig;
    use async_trait::async_trait;
    use genmedia_core::{InferenceResult, ModelBinding, ParamSpec};
    use genmedia_storage::{MemoryObjectService, RetryPolicy};
    use image::Rgb;
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Inverts the primary image and remembers what it was given
    struct InvertStage {
        binding: ModelBinding,
        seen: Mutex<Vec<StageInput>>,
        delay: Duration,
    }

    impl InvertStage {
        fn new() -> Self {
            Self {
                binding: ModelBinding::new("invert", "1"),
                seen: Mutex::new(Vec::new()),
                delay: Duration::ZERO,
            }
        }

        fn slow(delay: Duration) -> Self {
            Self {
                delay,
                ..Self::new()
            }
        }
    }

    #[async_trait]
    impl InferenceStage for InvertStage {
        fn name(&self) -> &str {
            "invert"
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
            _params: &StageParams,
        ) -> genmedia_core::error::Result<InferenceResult> {
            self.seen.lock().unwrap().push(input.clone());
            tokio::time::sleep(self.delay).await;
            let mut image = input.primary.as_ref().unwrap().to_rgb_image()?;
            image::imageops::invert(&mut image);
            Ok(InferenceResult {
                artifact: MediaArtifact::from_image(&image)?,
                diagnostics: BTreeMap::new(),
            })
        }
    }

    struct Fixture {
        service: MemoryObjectService,
        root: TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            let service = MemoryObjectService::new();
            service.register_credential("AKID", "secret", ["b"]);
            let input =
                image_ops::encode_png(&RgbImage::from_pixel(16, 16, Rgb([10, 20, 30]))).unwrap();
            service.insert(&BlobRef::new("b", "in.png"), input, "image/png");
            Self {
                service,
                root: TempDir::new().unwrap(),
            }
        }

        fn config(&self) -> RunnerConfig {
            RunnerConfig {
                workspace_root: Some(self.root.path().to_path_buf()),
                retry: RetryPolicy {
                    base_delay_ms: 1,
                    ..Default::default()
                },
                ..Default::default()
            }
        }

        fn runner(&self, stage: Arc<InvertStage>) -> PipelineRunner {
            PipelineRunner::new(self.config(), Arc::new(self.service.clone()))
                .with_stage(HandlerFamily::ImageToImage, stage.clone())
                .with_stage(HandlerFamily::FaceRestoration, stage)
        }

        fn workspace_is_clean(&self) -> bool {
            std::fs::read_dir(self.root.path()).unwrap().next().is_none()
        }
    }

    fn job(handler: &str) -> Map<String, Value> {
        match json!({
            "handler": handler,
            "bucket_name": "b",
            "input_key": "in.png",
            "output_key": "out.png",
            "aws_access_key_id": "AKID",
            "aws_secret_access_key": "secret",
            "aws_region": "us-east-1",
        }) {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn test_image_job_publishes_and_signs() {
        let fixture = Fixture::new();
        let stage = Arc::new(InvertStage::new());
        let runner = fixture.runner(stage.clone());

        let outcome = runner.run(&job("image_to_image"), &CancellationToken::new()).await;
        let url = outcome.url().expect("job should succeed").to_string();

        let published = BlobRef::new("b", "out.png");
        assert_eq!(fixture.service.content_type(&published).as_deref(), Some("image/png"));
        let fetched = fixture.service.fetch_signed(&url).unwrap();
        assert_eq!(Some(fetched), fixture.service.object(&published));
        let out = image_ops::decode_rgb(&fixture.service.object(&published).unwrap()).unwrap();
        assert_eq!(out.get_pixel(0, 0), &Rgb([245, 235, 225]));

        // Canny conditioning travels as an extra input
        let seen = stage.seen.lock().unwrap();
        assert!(seen[0].extras.contains_key(EXTRA_CONDITIONING));
        assert!(fixture.workspace_is_clean());
    }

    #[tokio::test]
    async fn test_sign_failure_publishes_nothing() {
        let fixture = Fixture::new();
        let config = RunnerConfig {
            signed_url_ttl_secs: 8 * 24 * 60 * 60,
            ..fixture.config()
        };
        let runner = PipelineRunner::new(config, Arc::new(fixture.service.clone()))
            .with_stage(HandlerFamily::ImageToImage, Arc::new(InvertStage::new()));

        let outcome = runner.run(&job("image_to_image"), &CancellationToken::new()).await;

        assert_eq!(outcome.failure().unwrap().kind, "storage_error");
        assert!(fixture.service.object(&BlobRef::new("b", "out.png")).is_none());
        assert!(fixture.workspace_is_clean());
    }

    #[tokio::test]
    async fn test_preprocess_none_sends_no_conditioning() {
        let fixture = Fixture::new();
        let stage = Arc::new(InvertStage::new());
        let mut input = job("image_to_image");
        input.insert("preprocess".into(), json!("none"));

        let outcome = fixture.runner(stage.clone()).run(&input, &CancellationToken::new()).await;
        assert!(outcome.is_success());
        assert!(stage.seen.lock().unwrap()[0].extras.is_empty());
    }

    #[tokio::test]
    async fn test_request_error_payload() {
        let fixture = Fixture::new();
        let mut input = job("face_restoration");
        input.remove("output_key");

        let outcome = fixture
            .runner(Arc::new(InvertStage::new()))
            .run(&input, &CancellationToken::new())
            .await;
        let failure = outcome.failure().unwrap();
        assert_eq!(failure.kind, "request_error");
        assert_eq!(failure.error, "missing required field: output_key");
    }

    #[tokio::test]
    async fn test_missing_source_is_storage_error() {
        let fixture = Fixture::new();
        let mut input = job("face_restoration");
        input.insert("input_key".into(), json!("missing.png"));

        let outcome = fixture
            .runner(Arc::new(InvertStage::new()))
            .run(&input, &CancellationToken::new())
            .await;
        assert_eq!(outcome.failure().unwrap().kind, "storage_error");
        assert!(fixture.service.object(&BlobRef::new("b", "out.png")).is_none());
        assert!(fixture.workspace_is_clean());
    }

    #[tokio::test]
    async fn test_transient_failures_retried() {
        let fixture = Fixture::new();
        fixture.service.fail_next(2);

        let outcome = fixture
            .runner(Arc::new(InvertStage::new()))
            .run(&job("face_restoration"), &CancellationToken::new())
            .await;
        assert!(outcome.is_success(), "{outcome:?}");
    }

    #[tokio::test]
    async fn test_unbound_family_is_inference_error() {
        let fixture = Fixture::new();
        let outcome = fixture
            .runner(Arc::new(InvertStage::new()))
            .run(&job("image_to_video"), &CancellationToken::new())
            .await;
        let failure = outcome.failure().unwrap();
        assert_eq!(failure.kind, "inference_error");
        assert!(failure.error.contains("no stage bound for image_to_video"));
    }

    #[tokio::test]
    async fn test_timeout_abandons_job() {
        let fixture = Fixture::new();
        let config = RunnerConfig {
            job_timeout_secs: 1,
            ..fixture.config()
        };
        let runner = PipelineRunner::new(config, Arc::new(fixture.service.clone())).with_stage(
            HandlerFamily::FaceRestoration,
            Arc::new(InvertStage::slow(Duration::from_secs(30))),
        );

        let outcome = runner.run(&job("face_restoration"), &CancellationToken::new()).await;
        assert_eq!(outcome.failure().unwrap().kind, "timeout_error");
        assert!(fixture.service.object(&BlobRef::new("b", "out.png")).is_none());
        assert!(fixture.workspace_is_clean());
    }

    #[tokio::test]
    async fn test_cancellation_abandons_job() {
        let fixture = Fixture::new();
        let runner = PipelineRunner::new(fixture.config(), Arc::new(fixture.service.clone()))
            .with_stage(
                HandlerFamily::FaceRestoration,
                Arc::new(InvertStage::slow(Duration::from_secs(30))),
            );
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let outcome = runner.run(&job("face_restoration"), &cancel).await;
        assert_eq!(outcome.failure().unwrap().kind, "cancelled");
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(fixture.workspace_is_clean());
    }

    #[tokio::test]
    async fn test_family_override() {
        let fixture = Fixture::new();
        let mut input = job("text_to_speech");
        input.remove("handler");

        let outcome = fixture
            .runner(Arc::new(InvertStage::new()))
            .run_as(HandlerFamily::FaceRestoration, &input, &CancellationToken::new())
            .await;
        assert!(outcome.is_success());
    }

    #[tokio::test]
    async fn test_face_swap_without_detector() {
        let fixture = Fixture::new();
        let mut input = job("face_swap");
        input.insert("face_image_key".into(), json!("in.png"));
        input.insert("body_image_key".into(), json!("in.png"));
        input.insert("face_index".into(), json!(1));
        input.insert("body_index".into(), json!(1));
        let runner = fixture
            .runner(Arc::new(InvertStage::new()))
            .with_stage(HandlerFamily::FaceSwap, Arc::new(InvertStage::new()));

        let outcome = runner.run(&input, &CancellationToken::new()).await;
        let failure = outcome.failure().unwrap();
        assert!(failure.error.contains("no face detector configured"));
    }

    #[test]
    fn test_families_sorted() {
        let fixture = Fixture::new();
        let runner = fixture.runner(Arc::new(InvertStage::new()));
        assert_eq!(
            runner.families(),
            vec![HandlerFamily::FaceRestoration, HandlerFamily::ImageToImage]
        );
    }
}
