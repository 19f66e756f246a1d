//! Face detection ordering, 1-based face selection and face-swap compositing
//!
//! Users pick faces by position: "face 1" is the left-most face in the image,
//! "face 2" the next one to its right, and so on. [`FaceIndexer`] turns the
//! raw output of any [`FaceDetector`] into that stable, deterministic order
//! and resolves human indices against it.
//!
//! # Example
//! ```no_run
//! use genmedia_face_index::{FaceIndexer, LuminanceRegionDetector};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let indexer = FaceIndexer::new(Arc::new(LuminanceRegionDetector::default()));
//! let image = image::open("group.png")?.to_rgb8();
//!
//! let faces = indexer.detect(&image, "bucket/group.png")?;
//! let second = FaceIndexer::resolve(&faces, 2)?;
//! println!("face 2 starts at x={:.2}", second.bounding_box.x1);
//! # Ok(())
//! # }
//! ```

pub mod region;
pub mod swap;
#[cfg(feature = "onnx")]
pub mod ultraface;

use genmedia_common::ProcessingError;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

pub use region::LuminanceRegionDetector;
pub use swap::{FaceSwapModel, FaceSwapper};

/// Side length of the grayscale patch used for appearance embeddings
const EMBEDDING_GRID: u32 = 8;

/// Errors that can occur while indexing or swapping faces
#[derive(Error, Debug)]
pub enum FaceIndexError {
    #[error("No face detected in {0}")]
    NoFaceDetected(String),

    #[error("image includes only {count} face(s), requested {requested}")]
    IndexOutOfRange { count: usize, requested: u32 },

    #[error("Failed to load face model: {0}")]
    ModelLoadError(String),

    #[error("Face detection failed: {0}")]
    DetectionError(String),

    #[error("Face does not belong to this image: {0}")]
    ImageMismatch(String),

    #[error("Face swap failed: {0}")]
    SwapError(String),

    #[error("Processing error: {0}")]
    ProcessingError(#[from] ProcessingError),
}

pub type Result<T> = std::result::Result<T, FaceIndexError>;

/// Bounding box in normalized image coordinates (0.0-1.0)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

/// Pixel-space rectangle, always at least 1x1 and inside its image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    #[must_use]
    #[inline]
    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    #[must_use]
    #[inline]
    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    #[must_use]
    #[inline]
    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// Intersection over union with another box
    #[must_use]
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x1.max(other.x1);
        let y1 = self.y1.max(other.y1);
        let x2 = self.x2.min(other.x2);
        let y2 = self.y2.min(other.y2);

        if x2 < x1 || y2 < y1 {
            return 0.0;
        }

        let intersection = (x2 - x1) * (y2 - y1);
        let union = self.area() + other.area() - intersection;
        if union <= 0.0 {
            return 0.0;
        }
        intersection / union
    }

    /// Convert to pixels for an image of `width` x `height`
    #[must_use]
    pub fn to_pixels(&self, width: u32, height: u32) -> PixelRect {
        let clamp = |v: f32| v.clamp(0.0, 1.0);
        let x1 = (clamp(self.x1) * width as f32).floor() as u32;
        let y1 = (clamp(self.y1) * height as f32).floor() as u32;
        let x2 = (clamp(self.x2) * width as f32).ceil() as u32;
        let y2 = (clamp(self.y2) * height as f32).ceil() as u32;

        let x = x1.min(width.saturating_sub(1));
        let y = y1.min(height.saturating_sub(1));
        PixelRect {
            x,
            y,
            width: x2.min(width).saturating_sub(x).max(1),
            height: y2.min(height).saturating_sub(y).max(1),
        }
    }

    /// Left-to-right order with top/right/bottom edges as tie-breakers
    fn positional_cmp(&self, other: &BoundingBox) -> Ordering {
        self.x1
            .total_cmp(&other.x1)
            .then_with(|| self.y1.total_cmp(&other.y1))
            .then_with(|| self.x2.total_cmp(&other.x2))
            .then_with(|| self.y2.total_cmp(&other.y2))
    }
}

/// Detector output before ordering
#[derive(Debug, Clone, PartialEq)]
pub struct RawFace {
    /// Detection confidence score (0.0-1.0)
    pub confidence: f32,
    pub bbox: BoundingBox,
    /// Identity embedding if the detector produces one
    pub embedding: Option<Vec<f32>>,
}

/// Anything that can find faces in an RGB image
///
/// Implementations must be deterministic for the same input.
pub trait FaceDetector: Send + Sync {
    fn detect(&self, image: &RgbImage) -> Result<Vec<RawFace>>;

    /// Detector name used in logs and diagnostics
    fn name(&self) -> &str;
}

/// A face located in one specific image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedFace {
    pub bounding_box: BoundingBox,
    pub confidence: f32,
    pub embedding: Vec<f32>,
    /// Where the image came from (e.g. "bucket/key")
    pub source_image_ref: String,
    /// Dimensions of the image the face was detected in
    pub image_size: (u32, u32),
}

/// Orders detector output and resolves 1-based face indices
#[derive(Clone)]
pub struct FaceIndexer {
    detector: Arc<dyn FaceDetector>,
}

impl FaceIndexer {
    #[must_use]
    pub fn new(detector: Arc<dyn FaceDetector>) -> Self {
        Self { detector }
    }

    /// Detect faces and return them ordered left-to-right
    ///
    /// An image with no faces is an error rather than an empty list.
    pub fn detect(&self, image: &RgbImage, source_image_ref: &str) -> Result<Vec<DetectedFace>> {
        let mut raw = self.detector.detect(image)?;
        if raw.is_empty() {
            return Err(FaceIndexError::NoFaceDetected(source_image_ref.to_string()));
        }

        raw.sort_by(|a, b| {
            a.bbox
                .positional_cmp(&b.bbox)
                .then_with(|| b.confidence.total_cmp(&a.confidence))
        });

        let faces: Vec<DetectedFace> = raw
            .into_iter()
            .map(|face| {
                let embedding = face
                    .embedding
                    .unwrap_or_else(|| appearance_embedding(image, &face.bbox));
                DetectedFace {
                    bounding_box: face.bbox,
                    confidence: face.confidence,
                    embedding,
                    source_image_ref: source_image_ref.to_string(),
                    image_size: image.dimensions(),
                }
            })
            .collect();

        debug!(
            "{} found {} face(s) in {}",
            self.detector.name(),
            faces.len(),
            source_image_ref
        );
        Ok(faces)
    }

    /// Pick the `index`-th face (1-based) from an ordered list
    pub fn resolve(faces: &[DetectedFace], index: u32) -> Result<&DetectedFace> {
        if faces.is_empty() {
            return Err(FaceIndexError::NoFaceDetected("empty face list".to_string()));
        }
        let position = (index as usize).checked_sub(1);
        position
            .and_then(|p| faces.get(p))
            .ok_or(FaceIndexError::IndexOutOfRange {
                count: faces.len(),
                requested: index,
            })
    }

    #[must_use]
    pub fn detector_name(&self) -> &str {
        self.detector.name()
    }
}

/// L2-normalized grayscale thumbnail of the face region
///
/// Stands in for an identity embedding when the detector has none.
#[must_use]
pub fn appearance_embedding(image: &RgbImage, bbox: &BoundingBox) -> Vec<f32> {
    let rect = bbox.to_pixels(image.width(), image.height());
    let crop = image::imageops::crop_imm(image, rect.x, rect.y, rect.width, rect.height).to_image();
    let gray = image::imageops::grayscale(&crop);
    let thumb = image::imageops::resize(
        &gray,
        EMBEDDING_GRID,
        EMBEDDING_GRID,
        image::imageops::FilterType::Triangle,
    );

    let mut values: Vec<f32> = thumb.pixels().map(|p| f32::from(p[0]) / 255.0).collect();
    let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in &mut values {
            *v /= norm;
        }
    }
    values
}

/// Drop lower-confidence boxes overlapping a kept box by more than `threshold`
#[must_use]
pub fn non_maximum_suppression(mut faces: Vec<RawFace>, threshold: f32) -> Vec<RawFace> {
    faces.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<RawFace> = Vec::with_capacity(faces.len());
    for face in faces {
        if keep.iter().all(|k| k.bbox.iou(&face.bbox) <= threshold) {
            keep.push(face);
        }
    }
    keep
}
