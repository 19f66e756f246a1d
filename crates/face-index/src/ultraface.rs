//! UltraFace RFB-320 face detector via ONNX Runtime
//!
//! Model outputs:
//! - `confidences` (or `scores`): [1, 4420, 2] raw logits for background/face
//! - `boxes`: [1, 4420, 4] regression offsets against the prior boxes
//!
//! Reference: https://github.com/Linzaer/Ultra-Light-Fast-Generic-Face-Detector-1MB

use crate::{non_maximum_suppression, BoundingBox, FaceDetector, FaceIndexError, RawFace, Result};
use image::RgbImage;
use ndarray::Array4;
use ort::{session::Session, value::TensorRef};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info};

const INPUT_WIDTH: u32 = 320;
const INPUT_HEIGHT: u32 = 240;
const PRIOR_COUNT: usize = 4420;
const CENTER_VARIANCE: f32 = 0.1;
const SIZE_VARIANCE: f32 = 0.2;

/// Detection thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UltraFaceConfig {
    /// Minimum softmax face probability (0.0-1.0)
    pub confidence_threshold: f32,
    /// `IoU` threshold for non-maximum suppression
    pub nms_threshold: f32,
    /// Minimum box side as fraction of image
    pub min_box_size: f32,
}

impl Default for UltraFaceConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.50,
            // Anchor decoding yields several overlapping boxes per face
            nms_threshold: 0.25,
            min_box_size: 0.01,
        }
    }
}

/// Prior box in center form, normalized
#[derive(Debug, Clone, Copy)]
struct Prior {
    cx: f32,
    cy: f32,
    w: f32,
    h: f32,
}

/// Neural face detector; the session is loaded once and reused across jobs
pub struct UltraFaceDetector {
    session: Mutex<Session>,
    config: UltraFaceConfig,
    priors: Vec<Prior>,
}

impl UltraFaceDetector {
    pub fn new<P: AsRef<Path>>(model_path: P, config: UltraFaceConfig) -> Result<Self> {
        let model_path = model_path.as_ref();
        info!("Loading UltraFace model from {:?}", model_path);

        let session = Session::builder()
            .map_err(|e| FaceIndexError::ModelLoadError(e.to_string()))?
            .commit_from_file(model_path)
            .map_err(|e| FaceIndexError::ModelLoadError(e.to_string()))?;

        Ok(Self {
            session: Mutex::new(session),
            config,
            priors: generate_priors(),
        })
    }

    fn preprocess(image: &RgbImage) -> Array4<f32> {
        let resized = image::imageops::resize(
            image,
            INPUT_WIDTH,
            INPUT_HEIGHT,
            image::imageops::FilterType::Triangle,
        );

        // (pixel - 127) / 128, CHW
        let mut input = Array4::<f32>::zeros((1, 3, INPUT_HEIGHT as usize, INPUT_WIDTH as usize));
        for (x, y, pixel) in resized.enumerate_pixels() {
            for c in 0..3 {
                input[[0, c, y as usize, x as usize]] = (f32::from(pixel[c]) - 127.0) / 128.0;
            }
        }
        input
    }

    fn decode(&self, scores: &[f32], boxes: &[f32]) -> Result<Vec<RawFace>> {
        if scores.len() != self.priors.len() * 2 || boxes.len() != self.priors.len() * 4 {
            return Err(FaceIndexError::DetectionError(format!(
                "unexpected output sizes: scores={}, boxes={}",
                scores.len(),
                boxes.len()
            )));
        }

        let mut faces = Vec::new();
        for (i, prior) in self.priors.iter().enumerate() {
            let (bg, fg) = (scores[i * 2], scores[i * 2 + 1]);
            let Some(confidence) = face_probability(bg, fg) else {
                continue;
            };
            if confidence < self.config.confidence_threshold {
                continue;
            }

            let loc = &boxes[i * 4..i * 4 + 4];
            let cx = prior.cx + loc[0] * CENTER_VARIANCE * prior.w;
            let cy = prior.cy + loc[1] * CENTER_VARIANCE * prior.h;
            let w = prior.w * (loc[2] * SIZE_VARIANCE).exp();
            let h = prior.h * (loc[3] * SIZE_VARIANCE).exp();

            let bbox = BoundingBox {
                x1: (cx - w / 2.0).clamp(0.0, 1.0),
                y1: (cy - h / 2.0).clamp(0.0, 1.0),
                x2: (cx + w / 2.0).clamp(0.0, 1.0),
                y2: (cy + h / 2.0).clamp(0.0, 1.0),
            };
            if bbox.width() < self.config.min_box_size || bbox.height() < self.config.min_box_size {
                continue;
            }

            faces.push(RawFace {
                confidence,
                bbox,
                embedding: None,
            });
        }

        Ok(non_maximum_suppression(faces, self.config.nms_threshold))
    }
}

impl FaceDetector for UltraFaceDetector {
    fn detect(&self, image: &RgbImage) -> Result<Vec<RawFace>> {
        let input = Self::preprocess(image);
        let tensor = TensorRef::from_array_view(input.view())
            .map_err(|e| FaceIndexError::DetectionError(e.to_string()))?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| FaceIndexError::DetectionError("session lock poisoned".to_string()))?;
        let outputs = session
            .run(ort::inputs![tensor])
            .map_err(|e| FaceIndexError::DetectionError(e.to_string()))?;

        let scores = outputs
            .get("confidences")
            .or_else(|| outputs.get("scores"))
            .ok_or_else(|| FaceIndexError::DetectionError("confidences output not found".into()))?;
        let (_, scores) = scores
            .try_extract_tensor::<f32>()
            .map_err(|e| FaceIndexError::DetectionError(e.to_string()))?;
        let boxes = outputs
            .get("boxes")
            .ok_or_else(|| FaceIndexError::DetectionError("boxes output not found".into()))?;
        let (_, boxes) = boxes
            .try_extract_tensor::<f32>()
            .map_err(|e| FaceIndexError::DetectionError(e.to_string()))?;

        let faces = self.decode(scores, boxes)?;
        debug!("UltraFace kept {} face(s)", faces.len());
        Ok(faces)
    }

    fn name(&self) -> &str {
        "ultraface-rfb-320"
    }
}

/// Two-class softmax over background/face logits; `None` for NaN input
fn face_probability(bg: f32, fg: f32) -> Option<f32> {
    let max = bg.max(fg);
    let (e_bg, e_fg) = ((bg - max).exp(), (fg - max).exp());
    let p = e_fg / (e_bg + e_fg);
    p.is_finite().then_some(p)
}

/// Prior boxes for the 320x240 input: 40x30, 20x15, 10x8 and 5x4 feature maps
fn generate_priors() -> Vec<Prior> {
    const FEATURE_MAPS: [(usize, usize); 4] = [(40, 30), (20, 15), (10, 8), (5, 4)];
    const STRIDES: [(f32, f32); 4] = [(8.0, 8.0), (16.0, 16.0), (32.0, 30.0), (64.0, 60.0)];
    const MIN_BOXES: [&[f32]; 4] = [
        &[10.0, 16.0, 24.0],
        &[32.0, 48.0],
        &[64.0, 96.0],
        &[128.0, 192.0, 256.0],
    ];
    let (iw, ih) = (INPUT_WIDTH as f32, INPUT_HEIGHT as f32);

    let mut priors = Vec::with_capacity(PRIOR_COUNT);
    for (level, &(fw, fh)) in FEATURE_MAPS.iter().enumerate() {
        let (sw, sh) = STRIDES[level];
        for j in 0..fh {
            for i in 0..fw {
                let cx = ((i as f32 + 0.5) * sw / iw).clamp(0.0, 1.0);
                let cy = ((j as f32 + 0.5) * sh / ih).clamp(0.0, 1.0);
                for &size in MIN_BOXES[level] {
                    priors.push(Prior {
                        cx,
                        cy,
                        w: (size / iw).clamp(0.0, 1.0),
                        h: (size / ih).clamp(0.0, 1.0),
                    });
                }
            }
        }
    }
    priors
}
