//! Frame sequence to playable video
//!
//! [`VideoReconstructor`] is a one-way state machine:
//!
//! ```text
//! Empty -> FramesAccumulated -> Encoded -> Muxed -> Finalized
//!                                  \________________/
//! ```
//!
//! Frames must arrive in strictly increasing ordinal order and share one
//! size. Audio must already be fitted to the video duration before it is
//! muxed. All intermediate files live in a private scratch directory that is
//! removed when the reconstructor is finalized or dropped.

pub mod codec;

pub use codec::{FfmpegCodec, MediaCodec, VideoProbe};

use genmedia_common::audio::{self, AudioTrack};
use genmedia_common::image_ops;
use genmedia_common::{Frame, MediaArtifact, MediaKind, MediaMetadata, ProcessingError};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum ReconstructionError {
    #[error("frame {got} arrived after frame {previous}")]
    OutOfOrderFrame { previous: u64, got: u64 },

    #[error("frame {ordinal} is {found:?}, sequence is {expected:?}")]
    DimensionMismatch {
        ordinal: u64,
        expected: (u32, u32),
        found: (u32, u32),
    },

    #[error("audio lasts {audio_secs:.3}s but video lasts {video_secs:.3}s (tolerance {tolerance_secs:.3}s)")]
    DurationMismatch {
        video_secs: f64,
        audio_secs: f64,
        tolerance_secs: f64,
    },

    #[error("cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: ReconstructionState,
    },

    #[error("invalid frame rate {0}")]
    InvalidFrameRate(f64),

    #[error("codec error: {0}")]
    CodecError(String),

    #[error(transparent)]
    Processing(#[from] ProcessingError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ReconstructionError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconstructionState {
    Empty,
    FramesAccumulated,
    Encoded,
    Muxed,
    Finalized,
}

impl fmt::Display for ReconstructionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Empty => "empty",
            Self::FramesAccumulated => "accumulating frames",
            Self::Encoded => "encoded",
            Self::Muxed => "muxed",
            Self::Finalized => "finalized",
        };
        f.write_str(name)
    }
}

/// Builds one MP4 from frames and optional audio
pub struct VideoReconstructor {
    codec: Arc<dyn MediaCodec>,
    scratch: TempDir,
    state: ReconstructionState,
    frames: Vec<Frame>,
    fps: f64,
    dimensions: Option<(u32, u32)>,
    video_path: Option<PathBuf>,
    sample_rate: Option<u32>,
}

impl fmt::Debug for VideoReconstructor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VideoReconstructor")
            .field("scratch", &self.scratch.path())
            .field("state", &self.state)
            .field("frames", &self.frames.len())
            .field("fps", &self.fps)
            .finish_non_exhaustive()
    }
}

impl VideoReconstructor {
    /// Create a reconstructor whose scratch directory lives under `workspace`
    pub fn new(codec: Arc<dyn MediaCodec>, workspace: &Path) -> Result<Self> {
        let scratch = tempfile::Builder::new()
            .prefix("reconstruct-")
            .tempdir_in(workspace)?;
        debug!("Reconstruction scratch at {}", scratch.path().display());
        Ok(Self {
            codec,
            scratch,
            state: ReconstructionState::Empty,
            frames: Vec::new(),
            fps: 0.0,
            dimensions: None,
            video_path: None,
            sample_rate: None,
        })
    }

    #[must_use]
    pub fn state(&self) -> ReconstructionState {
        self.state
    }

    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Duration of the encoded video
    #[must_use]
    pub fn video_duration_secs(&self) -> f64 {
        if self.fps > 0.0 {
            self.frames.len() as f64 / self.fps
        } else {
            0.0
        }
    }

    fn require(&self, operation: &'static str, allowed: &[ReconstructionState]) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(ReconstructionError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    /// Append one frame; ordinals must strictly increase
    pub fn accumulate(&mut self, frame: Frame) -> Result<()> {
        self.require(
            "accumulate",
            &[ReconstructionState::Empty, ReconstructionState::FramesAccumulated],
        )?;
        if let Some(last) = self.frames.last() {
            if frame.ordinal <= last.ordinal {
                return Err(ReconstructionError::OutOfOrderFrame {
                    previous: last.ordinal,
                    got: frame.ordinal,
                });
            }
        }
        self.frames.push(frame);
        self.state = ReconstructionState::FramesAccumulated;
        Ok(())
    }

    /// Append every frame of `frames`, stopping at the first rejected one
    pub fn accumulate_all(&mut self, frames: impl IntoIterator<Item = Frame>) -> Result<()> {
        frames.into_iter().try_for_each(|f| self.accumulate(f))
    }

    fn check_dimensions(&self) -> Result<(u32, u32)> {
        let first = self
            .frames
            .first()
            .ok_or(ReconstructionError::InvalidState {
                operation: "encode",
                state: self.state,
            })?;
        let expected = first.dimensions();
        if let Some(bad) = self.frames.iter().find(|f| f.dimensions() != expected) {
            return Err(ReconstructionError::DimensionMismatch {
                ordinal: bad.ordinal,
                expected,
                found: bad.dimensions(),
            });
        }
        Ok(expected)
    }

    /// Encode the accumulated frames at `fps`
    ///
    /// Nothing is written unless every frame has the same dimensions. On
    /// failure the partial output and frame files are removed.
    pub async fn encode(&mut self, fps: f64) -> Result<()> {
        self.require("encode", &[ReconstructionState::FramesAccumulated])?;
        if !fps.is_finite() || fps <= 0.0 {
            return Err(ReconstructionError::InvalidFrameRate(fps));
        }
        let dimensions = self.check_dimensions()?;

        let frame_dir = self.scratch.path().join("frames");
        let output = self.scratch.path().join("video.mp4");
        tokio::fs::create_dir_all(&frame_dir).await?;

        let result = self.write_and_encode(&frame_dir, fps, &output).await;
        if tokio::fs::remove_dir_all(&frame_dir).await.is_err() {
            warn!("Could not remove {}", frame_dir.display());
        }
        if let Err(e) = result {
            let _ = tokio::fs::remove_file(&output).await;
            return Err(e);
        }

        info!(
            "Encoded {} frames ({}x{}) at {} fps",
            self.frames.len(),
            dimensions.0,
            dimensions.1,
            fps
        );
        self.fps = fps;
        self.dimensions = Some(dimensions);
        self.video_path = Some(output);
        self.state = ReconstructionState::Encoded;
        Ok(())
    }

    async fn write_and_encode(&self, frame_dir: &Path, fps: f64, output: &Path) -> Result<()> {
        // Renumber densely; the codec reads a gap-free sequence
        for (index, frame) in self.frames.iter().enumerate() {
            let png = image_ops::encode_png(&frame.image)?;
            tokio::fs::write(frame_dir.join(codec::frame_file_name(index as u64)), png).await?;
        }
        self.codec.encode_frames(frame_dir, fps, output).await?;

        let probe = self.codec.probe(output).await?;
        if probe.frame_count != self.frames.len() as u64 {
            return Err(ReconstructionError::CodecError(format!(
                "encoded {} frames, expected {}",
                probe.frame_count,
                self.frames.len()
            )));
        }
        Ok(())
    }

    /// Add `track` as the audio stream
    ///
    /// The track must last as long as the video, give or take one frame.
    pub async fn mux(&mut self, track: &AudioTrack) -> Result<()> {
        self.require("mux", &[ReconstructionState::Encoded])?;
        let video_secs = self.video_duration_secs();
        let audio_secs = track.duration_secs();
        let tolerance_secs = 1.0 / self.fps;
        if (video_secs - audio_secs).abs() > tolerance_secs {
            return Err(ReconstructionError::DurationMismatch {
                video_secs,
                audio_secs,
                tolerance_secs,
            });
        }

        let video = self
            .video_path
            .clone()
            .ok_or(ReconstructionError::InvalidState {
                operation: "mux",
                state: self.state,
            })?;
        let audio_path = self.scratch.path().join("audio.wav");
        let output = self.scratch.path().join("muxed.mp4");
        tokio::fs::write(&audio_path, audio::encode_wav(track)?).await?;

        if let Err(e) = self.codec.mux_audio(&video, &audio_path, &output).await {
            let _ = tokio::fs::remove_file(&output).await;
            return Err(e);
        }
        let probe = self.codec.probe(&output).await?;
        if !probe.has_audio {
            return Err(ReconstructionError::CodecError(
                "muxed container has no audio stream".to_string(),
            ));
        }

        debug!("Muxed {:.3}s of audio into {:.3}s of video", audio_secs, video_secs);
        self.video_path = Some(output);
        self.sample_rate = Some(track.sample_rate);
        self.state = ReconstructionState::Muxed;
        Ok(())
    }

    /// Read the finished container and release the scratch directory
    ///
    /// Scratch space is released whether or not this succeeds.
    pub async fn finalize(mut self) -> Result<MediaArtifact> {
        self.require(
            "finalize",
            &[ReconstructionState::Encoded, ReconstructionState::Muxed],
        )?;
        let path = self
            .video_path
            .take()
            .ok_or(ReconstructionError::InvalidState {
                operation: "finalize",
                state: self.state,
            })?;
        let bytes = tokio::fs::read(&path).await?;
        self.state = ReconstructionState::Finalized;

        let (width, height) = self.dimensions.unzip();
        let metadata = MediaMetadata {
            width,
            height,
            fps: Some(self.fps),
            sample_rate: self.sample_rate,
            ..Default::default()
        };
        info!("Finalized {} byte video", bytes.len());
        Ok(MediaArtifact::encoded(MediaKind::Video, bytes, metadata))
    }

    /// Path of the scratch directory (removed on finalize or drop)
    #[must_use]
    pub fn scratch_path(&self) -> &Path {
        self.scratch.path()
    }
}

/// Decode a video container into frames numbered from 0, plus its frame rate
pub async fn decode_video(
    codec: &dyn MediaCodec,
    video: &[u8],
    workspace: &Path,
) -> Result<(Vec<Frame>, f64)> {
    let scratch = tempfile::Builder::new().prefix("decode-").tempdir_in(workspace)?;
    let input = scratch.path().join("input");
    let frame_dir = scratch.path().join("frames");
    tokio::fs::write(&input, video).await?;
    tokio::fs::create_dir_all(&frame_dir).await?;

    let fps = codec.decode_frames(&input, &frame_dir).await?;

    let mut frames = Vec::new();
    loop {
        let path = frame_dir.join(codec::frame_file_name(frames.len() as u64));
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let image = image_ops::decode_rgb(&bytes)?;
                frames.push(Frame::new(frames.len() as u64, image));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => break,
            Err(e) => return Err(e.into()),
        }
    }
    if frames.is_empty() {
        return Err(ReconstructionError::CodecError("video has no frames".to_string()));
    }
    debug!("Decoded {} frames at {} fps", frames.len(), fps);
    Ok((frames, fps))
}

/// Load arbitrary audio (or the audio of a video) as a track at `sample_rate`
///
/// WAV input is decoded in-process; anything else goes through the codec.
pub async fn load_audio(
    codec: &dyn MediaCodec,
    bytes: &[u8],
    workspace: &Path,
    sample_rate: u32,
) -> Result<AudioTrack> {
    if audio::is_wav(bytes) {
        return Ok(audio::decode_wav(bytes)?.resample(sample_rate));
    }
    let scratch = tempfile::Builder::new().prefix("audio-").tempdir_in(workspace)?;
    let input = scratch.path().join("input");
    let output = scratch.path().join("audio.wav");
    tokio::fs::write(&input, bytes).await?;
    codec.extract_audio(&input, &output, sample_rate).await?;
    let wav = tokio::fs::read(&output).await?;
    Ok(audio::decode_wav(&wav)?)
}
