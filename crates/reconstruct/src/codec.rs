//! Container encode/mux/probe backed by the ffmpeg command-line tools
//!
//! Child processes are spawned with `kill_on_drop`, so abandoning a
//! reconstruction future (timeout, cancellation) also stops ffmpeg.

use crate::{ReconstructionError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::debug;

/// Name pattern for frame images inside a frame directory
pub const FRAME_PATTERN: &str = "frame_%06d.png";

/// File name for frame `ordinal` matching [`FRAME_PATTERN`]
#[must_use]
pub fn frame_file_name(index: u64) -> String {
    format!("frame_{index:06}.png")
}

/// What a container actually holds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoProbe {
    pub width: u32,
    pub height: u32,
    pub frame_count: u64,
    pub fps: f64,
    pub duration_secs: f64,
    pub has_audio: bool,
    pub audio_sample_rate: Option<u32>,
}

/// Low-level media container operations
#[async_trait]
pub trait MediaCodec: Send + Sync {
    /// Encode `frame_dir/frame_%06d.png` (numbered from 0) into `output` at `fps`
    async fn encode_frames(&self, frame_dir: &Path, fps: f64, output: &Path) -> Result<()>;

    /// Copy the video stream of `video` and add `audio` as the only audio stream
    async fn mux_audio(&self, video: &Path, audio: &Path, output: &Path) -> Result<()>;

    async fn probe(&self, path: &Path) -> Result<VideoProbe>;

    /// Decode every video frame of `input` into `output_dir` using [`FRAME_PATTERN`]
    ///
    /// Returns the source frame rate.
    async fn decode_frames(&self, input: &Path, output_dir: &Path) -> Result<f64>;

    /// Transcode any audio (or the audio stream of a video) to PCM WAV
    async fn extract_audio(&self, input: &Path, output: &Path, sample_rate: u32) -> Result<()>;
}

/// [`MediaCodec`] using `ffmpeg` and `ffprobe` binaries
#[derive(Debug, Clone)]
pub struct FfmpegCodec {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl Default for FfmpegCodec {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
        }
    }
}

impl FfmpegCodec {
    #[must_use]
    pub fn with_binaries(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }

    /// True when both binaries can be executed
    pub async fn is_available(&self) -> bool {
        let probe = |bin: PathBuf| async move {
            Command::new(bin)
                .arg("-version")
                .kill_on_drop(true)
                .output()
                .await
                .is_ok_and(|o| o.status.success())
        };
        probe(self.ffmpeg.clone()).await && probe(self.ffprobe.clone()).await
    }

    async fn run(&self, mut cmd: Command, what: &str) -> Result<Vec<u8>> {
        cmd.kill_on_drop(true);
        debug!("Running {:?}", cmd.as_std());
        let output = cmd
            .output()
            .await
            .map_err(|e| {
                ReconstructionError::CodecError(format!("failed to execute {what}: {e}"))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: String = stderr
                .lines()
                .rev()
                .take(5)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect::<Vec<_>>()
                .join(" | ");
            return Err(ReconstructionError::CodecError(format!("{what} failed: {tail}")));
        }
        Ok(output.stdout)
    }

    fn ensure_created(path: &Path) -> Result<()> {
        if path.exists() {
            Ok(())
        } else {
            Err(ReconstructionError::CodecError(format!(
                "{} was not created",
                path.display()
            )))
        }
    }
}

#[derive(Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Deserialize)]
struct ProbeStream {
    codec_type: String,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    nb_read_frames: Option<String>,
    sample_rate: Option<String>,
}

#[derive(Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

/// Parse ffprobe's "num/den" rational
fn parse_rate(rate: &str) -> Option<f64> {
    let (num, den) = rate.split_once('/').unwrap_or((rate, "1"));
    let num: f64 = num.trim().parse().ok()?;
    let den: f64 = den.trim().parse().ok()?;
    (den != 0.0).then(|| num / den)
}

fn parse_probe(json: &[u8]) -> Result<VideoProbe> {
    let parsed: ProbeOutput = serde_json::from_slice(json)
        .map_err(|e| ReconstructionError::CodecError(format!("unreadable ffprobe output: {e}")))?;

    let video = parsed
        .streams
        .iter()
        .find(|s| s.codec_type == "video")
        .ok_or_else(|| ReconstructionError::CodecError("no video stream".to_string()))?;
    let audio = parsed.streams.iter().find(|s| s.codec_type == "audio");

    Ok(VideoProbe {
        width: video.width.unwrap_or(0),
        height: video.height.unwrap_or(0),
        frame_count: video
            .nb_read_frames
            .as_deref()
            .and_then(|n| n.parse().ok())
            .unwrap_or(0),
        fps: video.r_frame_rate.as_deref().and_then(parse_rate).unwrap_or(0.0),
        duration_secs: parsed
            .format
            .and_then(|f| f.duration)
            .and_then(|d| d.parse().ok())
            .unwrap_or(0.0),
        has_audio: audio.is_some(),
        audio_sample_rate: audio
            .and_then(|a| a.sample_rate.as_deref())
            .and_then(|r| r.parse().ok()),
    })
}

#[async_trait]
impl MediaCodec for FfmpegCodec {
    async fn encode_frames(&self, frame_dir: &Path, fps: f64, output: &Path) -> Result<()> {
        let mut cmd = Command::new(&self.ffmpeg);
        cmd.arg("-y")
            .arg("-loglevel")
            .arg("error")
            .arg("-framerate")
            .arg(fps.to_string())
            .arg("-start_number")
            .arg("0")
            .arg("-i")
            .arg(frame_dir.join(FRAME_PATTERN))
            .arg("-c:v")
            .arg("libx264")
            // yuv420p needs even dimensions
            .arg("-vf")
            .arg("pad=ceil(iw/2)*2:ceil(ih/2)*2")
            .arg("-pix_fmt")
            .arg("yuv420p")
            .arg("-movflags")
            .arg("+faststart")
            .arg(output);
        self.run(cmd, "ffmpeg encode").await?;
        Self::ensure_created(output)
    }

    async fn mux_audio(&self, video: &Path, audio: &Path, output: &Path) -> Result<()> {
        let mut cmd = Command::new(&self.ffmpeg);
        cmd.arg("-y")
            .arg("-loglevel")
            .arg("error")
            .arg("-i")
            .arg(video)
            .arg("-i")
            .arg(audio)
            .arg("-map")
            .arg("0:v:0")
            .arg("-map")
            .arg("1:a:0")
            .arg("-c:v")
            .arg("copy")
            .arg("-c:a")
            .arg("aac")
            .arg(output);
        self.run(cmd, "ffmpeg mux").await?;
        Self::ensure_created(output)
    }

    async fn probe(&self, path: &Path) -> Result<VideoProbe> {
        let mut cmd = Command::new(&self.ffprobe);
        cmd.arg("-v")
            .arg("error")
            .arg("-count_frames")
            .arg("-show_entries")
            .arg("stream=codec_type,width,height,r_frame_rate,nb_read_frames,sample_rate:format=duration")
            .arg("-of")
            .arg("json")
            .arg(path);
        let stdout = self.run(cmd, "ffprobe").await?;
        parse_probe(&stdout)
    }

    async fn decode_frames(&self, input: &Path, output_dir: &Path) -> Result<f64> {
        let fps = self.probe(input).await?.fps;
        let mut cmd = Command::new(&self.ffmpeg);
        cmd.arg("-y")
            .arg("-loglevel")
            .arg("error")
            .arg("-i")
            .arg(input)
            .arg("-vsync")
            .arg("0")
            .arg("-start_number")
            .arg("0")
            .arg(output_dir.join(FRAME_PATTERN));
        self.run(cmd, "ffmpeg decode").await?;
        Ok(fps)
    }

    async fn extract_audio(&self, input: &Path, output: &Path, sample_rate: u32) -> Result<()> {
        let mut cmd = Command::new(&self.ffmpeg);
        cmd.arg("-y")
            .arg("-loglevel")
            .arg("error")
            .arg("-i")
            .arg(input)
            .arg("-vn")
            .arg("-acodec")
            .arg("pcm_s16le")
            .arg("-ar")
            .arg(sample_rate.to_string())
            .arg(output);
        self.run(cmd, "ffmpeg audio").await?;
        Self::ensure_created(output)
    }
}
