//! Common media types shared by every pipeline stage
//!
//! A [`MediaArtifact`] is the unit of data handed from one stage to the next.
//! Images and audio travel as encoded bytes (PNG / WAV); generated video travels
//! as an ordered sequence of decoded [`Frame`]s until it is reconstructed into a
//! container.

pub mod audio;
pub mod image_ops;

use image::RgbImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use audio::AudioTrack;

/// Processing errors
#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Artifact kind mismatch: expected {expected}, found {found}")]
    KindMismatch { expected: MediaKind, found: MediaKind },

    #[error("Image processing error: {0}")]
    ImageError(String),

    #[error("Audio processing error: {0}")]
    AudioError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<image::ImageError> for ProcessingError {
    fn from(err: image::ImageError) -> Self {
        ProcessingError::ImageError(err.to_string())
    }
}

impl From<hound::Error> for ProcessingError {
    fn from(err: hound::Error) -> Self {
        ProcessingError::AudioError(err.to_string())
    }
}

/// Result type for processing operations
pub type Result<T> = std::result::Result<T, ProcessingError>;

/// Kind of media carried by an artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    VideoFrames,
    Audio,
    Video,
}

impl MediaKind {
    /// MIME type used when an artifact of this kind is published
    #[must_use]
    pub fn content_type(&self) -> &'static str {
        match self {
            MediaKind::Image => "image/png",
            MediaKind::Audio => "audio/wav",
            MediaKind::VideoFrames | MediaKind::Video => "video/mp4",
        }
    }

    /// File extension matching [`MediaKind::content_type`]
    #[must_use]
    pub fn extension(&self) -> &'static str {
        match self {
            MediaKind::Image => "png",
            MediaKind::Audio => "wav",
            MediaKind::VideoFrames | MediaKind::Video => "mp4",
        }
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MediaKind::Image => "image",
            MediaKind::VideoFrames => "video_frames",
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        };
        f.write_str(name)
    }
}

/// Descriptive metadata; fields that do not apply to a kind stay `None`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaMetadata {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub sample_rate: Option<u32>,
    pub fps: Option<f64>,
    pub channel_count: Option<u16>,
}

/// A decoded image plus its position in a sequence
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub ordinal: u64,
    pub image: RgbImage,
}

impl Frame {
    #[must_use]
    pub fn new(ordinal: u64, image: RgbImage) -> Self {
        Self { ordinal, image }
    }

    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}

/// Artifact payload: encoded bytes or an ordered frame sequence
#[derive(Debug, Clone, PartialEq)]
pub enum ArtifactPayload {
    Bytes(Vec<u8>),
    Frames(Vec<Frame>),
}

/// Unit of data moved between pipeline stages
#[derive(Debug, Clone, PartialEq)]
pub struct MediaArtifact {
    pub kind: MediaKind,
    pub payload: ArtifactPayload,
    pub metadata: MediaMetadata,
}

impl MediaArtifact {
    /// Build an image artifact by encoding `image` as PNG
    pub fn from_image(image: &RgbImage) -> Result<Self> {
        let bytes = image_ops::encode_png(image)?;
        Ok(Self {
            kind: MediaKind::Image,
            payload: ArtifactPayload::Bytes(bytes),
            metadata: MediaMetadata {
                width: Some(image.width()),
                height: Some(image.height()),
                channel_count: Some(3),
                ..Default::default()
            },
        })
    }

    /// Build an audio artifact by encoding `track` as 16-bit PCM WAV
    pub fn from_audio(track: &AudioTrack) -> Result<Self> {
        let bytes = audio::encode_wav(track)?;
        Ok(Self {
            kind: MediaKind::Audio,
            payload: ArtifactPayload::Bytes(bytes),
            metadata: MediaMetadata {
                sample_rate: Some(track.sample_rate),
                channel_count: Some(track.channels),
                ..Default::default()
            },
        })
    }

    /// Build a frame-sequence artifact; dimensions are taken from the first frame
    #[must_use]
    pub fn from_frames(frames: Vec<Frame>, fps: f64) -> Self {
        let (width, height) = frames
            .first()
            .map(|f| (Some(f.image.width()), Some(f.image.height())))
            .unwrap_or((None, None));
        Self {
            kind: MediaKind::VideoFrames,
            payload: ArtifactPayload::Frames(frames),
            metadata: MediaMetadata {
                width,
                height,
                fps: Some(fps),
                channel_count: Some(3),
                ..Default::default()
            },
        }
    }

    /// Wrap an already encoded container (e.g. an MP4 file's bytes)
    #[must_use]
    pub fn encoded(kind: MediaKind, bytes: Vec<u8>, metadata: MediaMetadata) -> Self {
        Self {
            kind,
            payload: ArtifactPayload::Bytes(bytes),
            metadata,
        }
    }

    /// Fail unless this artifact is of `expected` kind
    pub fn expect_kind(&self, expected: MediaKind) -> Result<()> {
        if self.kind == expected {
            Ok(())
        } else {
            Err(ProcessingError::KindMismatch {
                expected,
                found: self.kind,
            })
        }
    }

    /// Encoded bytes, if this artifact carries bytes
    #[must_use]
    pub fn bytes(&self) -> Option<&[u8]> {
        match &self.payload {
            ArtifactPayload::Bytes(b) => Some(b),
            ArtifactPayload::Frames(_) => None,
        }
    }

    /// Frame sequence, if this artifact carries frames
    #[must_use]
    pub fn frames(&self) -> Option<&[Frame]> {
        match &self.payload {
            ArtifactPayload::Frames(f) => Some(f),
            ArtifactPayload::Bytes(_) => None,
        }
    }

    /// Decode an image artifact into RGB
    pub fn to_rgb_image(&self) -> Result<RgbImage> {
        self.expect_kind(MediaKind::Image)?;
        let bytes = self
            .bytes()
            .ok_or_else(|| ProcessingError::UnsupportedFormat("image without bytes".into()))?;
        image_ops::decode_rgb(bytes)
    }

    /// Decode an audio artifact into samples
    pub fn to_audio_track(&self) -> Result<AudioTrack> {
        self.expect_kind(MediaKind::Audio)?;
        let bytes = self
            .bytes()
            .ok_or_else(|| ProcessingError::UnsupportedFormat("audio without bytes".into()))?;
        audio::decode_wav(bytes)
    }

    /// Consume the artifact and return its bytes (empty for frame payloads)
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        match self.payload {
            ArtifactPayload::Bytes(b) => b,
            ArtifactPayload::Frames(_) => Vec::new(),
        }
    }
}
