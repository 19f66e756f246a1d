//! Generative media worker
//!
//! Runs one job mapping through the pipeline and prints the JSON outcome on
//! stdout. Logs go to stderr so the outcome stays machine-readable.

use anyhow::{bail, Context as _, Result};
use clap::Parser;
use genmedia_core::{
    DevicePolicy, FaceSwapStage, HttpModelBackend, InferenceStage, ModelBinding, ModelStage,
};
use genmedia_face_index::{FaceDetector, FaceIndexer, FaceSwapper, LuminanceRegionDetector};
use genmedia_orchestrator::{HandlerFamily, JobOutcome, PipelineRunner, RunnerConfig};
use genmedia_reconstruct::FfmpegCodec;
use genmedia_storage::S3StoreFactory;
use serde_json::{Map, Value};
use std::io::Read as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "genmedia-worker",
    version,
    about = "Run a generative media job and print its outcome",
    after_help = "EXAMPLES:\n  \
                  # Job mapping names its own handler\n  \
                  genmedia-worker --model-endpoint http://models:8080/infer --job job.json\n\n  \
                  # Fixed family, job read from stdin\n  \
                  cat job.json | genmedia-worker --family face_swap --model-endpoint http://models:8080/infer --job -"
)]
struct Cli {
    /// Job mapping as a JSON file, or `-` for stdin
    #[arg(short, long)]
    job: PathBuf,

    /// Runner configuration (YAML)
    #[arg(short, long, env = "GENMEDIA_CONFIG")]
    config: Option<PathBuf>,

    /// Run every job as this family, ignoring its `handler` field
    #[arg(short, long)]
    family: Option<HandlerFamily>,

    /// Hosted model endpoint serving the stages
    #[arg(long, env = "GENMEDIA_MODEL_ENDPOINT")]
    model_endpoint: String,

    /// Model name reported in logs and requests
    #[arg(long, default_value = "hosted")]
    model_name: String,

    /// Model version reported in logs and requests
    #[arg(long, default_value = "1")]
    model_version: String,

    /// UltraFace ONNX model for face indexing
    #[arg(long, env = "GENMEDIA_FACE_MODEL")]
    face_model: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "genmedia=debug" } else { "genmedia=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn read_job(path: &Path) -> Result<Map<String, Value>> {
    let raw = if path.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read job from stdin")?;
        buf
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read job file {}", path.display()))?
    };
    match serde_json::from_str(&raw).context("Job is not valid JSON")? {
        Value::Object(map) => Ok(map),
        other => bail!("Job must be a JSON object, got {}", other),
    }
}

#[cfg(feature = "onnx")]
fn face_detector(model: Option<&Path>) -> Result<Arc<dyn FaceDetector>> {
    use genmedia_face_index::ultraface::{UltraFaceConfig, UltraFaceDetector};

    match model {
        Some(path) => {
            let detector = UltraFaceDetector::new(path, UltraFaceConfig::default())
                .with_context(|| format!("Failed to load face model {}", path.display()))?;
            Ok(Arc::new(detector))
        }
        None => {
            warn!("No face model given; face swap uses luminance regions");
            Ok(Arc::new(LuminanceRegionDetector::default()))
        }
    }
}

#[cfg(not(feature = "onnx"))]
fn face_detector(model: Option<&Path>) -> Result<Arc<dyn FaceDetector>> {
    if let Some(path) = model {
        bail!(
            "Face model {} needs a worker built with the onnx feature",
            path.display()
        );
    }
    warn!("No face model given; face swap uses luminance regions");
    Ok(Arc::new(LuminanceRegionDetector::default()))
}

fn build_runner(cli: &Cli, config: RunnerConfig) -> Result<PipelineRunner> {
    let binding = ModelBinding::new(&cli.model_name, &cli.model_version);
    let backend = Arc::new(
        HttpModelBackend::new(&cli.model_endpoint, binding.clone(), config.job_timeout())
            .context("Failed to create model backend")?,
    );

    let mut runner = PipelineRunner::new(config, Arc::new(S3StoreFactory));
    for family in HandlerFamily::ALL {
        let stage: Arc<dyn InferenceStage> = match family.stage_family() {
            Some(stage_family) => Arc::new(
                ModelStage::new(stage_family, backend.clone(), DevicePolicy::default())
                    .with_context(|| format!("Failed to bind {family}"))?,
            ),
            None => Arc::new(FaceSwapStage::new(
                FaceSwapper::new(backend.clone()),
                binding.clone(),
            )),
        };
        runner = runner.with_stage(family, stage);
    }

    let detector = face_detector(cli.face_model.as_deref())?;
    Ok(runner
        .with_face_indexer(FaceIndexer::new(detector))
        .with_codec(Arc::new(FfmpegCodec::default())))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = match &cli.config {
        Some(path) => RunnerConfig::from_yaml_file(path)?,
        None => RunnerConfig::default(),
    };

    let codec = FfmpegCodec::default();
    if !codec.is_available().await {
        warn!("ffmpeg/ffprobe not found; lip sync and image-to-video jobs will fail");
    }

    let job = read_job(&cli.job)?;
    let runner = build_runner(&cli, config)?;
    info!("Worker ready with {} families", runner.families().len());

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling job");
            on_signal.cancel();
        }
    });

    let outcome: JobOutcome = match cli.family {
        Some(family) => runner.run_as(family, &job, &cancel).await,
        None => runner.run(&job, &cancel).await,
    };

    println!("{}", serde_json::to_string(&outcome)?);
    if !outcome.is_success() {
        std::process::exit(1);
    }
    Ok(())
}
