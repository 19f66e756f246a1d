//! Mask-style detector for pre-segmented inputs
//!
//! Treats every connected bright region as one face. Useful for face masks
//! produced upstream and for synthetic fixtures where a neural detector would
//! be overkill.

use crate::{BoundingBox, FaceDetector, RawFace, Result};
use image::{GrayImage, Luma, RgbImage};
use imageproc::region_labelling::{connected_components, Connectivity};
use std::collections::BTreeMap;

/// Configuration for [`LuminanceRegionDetector`]
#[derive(Debug, Clone)]
pub struct LuminanceRegionDetector {
    /// Pixels at or above this luma belong to a region
    pub threshold: u8,
    /// Regions smaller than this fraction of the image are ignored
    pub min_area_fraction: f32,
}

impl Default for LuminanceRegionDetector {
    fn default() -> Self {
        Self {
            threshold: 128,
            min_area_fraction: 0.001,
        }
    }
}

#[derive(Default)]
struct Extent {
    min_x: u32,
    min_y: u32,
    max_x: u32,
    max_y: u32,
    pixels: u64,
}

impl FaceDetector for LuminanceRegionDetector {
    fn detect(&self, image: &RgbImage) -> Result<Vec<RawFace>> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Ok(Vec::new());
        }

        let luma = image::imageops::grayscale(image);
        let mask = GrayImage::from_fn(width, height, |x, y| {
            if luma.get_pixel(x, y)[0] >= self.threshold {
                Luma([255])
            } else {
                Luma([0])
            }
        });
        let labels = connected_components(&mask, Connectivity::Eight, Luma([0u8]));

        // BTreeMap keeps label iteration order stable
        let mut extents: BTreeMap<u32, Extent> = BTreeMap::new();
        for (x, y, label) in labels.enumerate_pixels() {
            let label = label[0];
            if label == 0 {
                continue;
            }
            let e = extents.entry(label).or_insert_with(|| Extent {
                min_x: x,
                min_y: y,
                max_x: x,
                max_y: y,
                pixels: 0,
            });
            e.min_x = e.min_x.min(x);
            e.min_y = e.min_y.min(y);
            e.max_x = e.max_x.max(x);
            e.max_y = e.max_y.max(y);
            e.pixels += 1;
        }

        let total = f64::from(width) * f64::from(height);
        let faces = extents
            .into_values()
            .filter(|e| (e.pixels as f64 / total) as f32 >= self.min_area_fraction)
            .map(|e| {
                let box_pixels =
                    f64::from(e.max_x - e.min_x + 1) * f64::from(e.max_y - e.min_y + 1);
                RawFace {
                    // Fill ratio: solid blobs score 1.0
                    confidence: (e.pixels as f64 / box_pixels) as f32,
                    bbox: BoundingBox {
                        x1: e.min_x as f32 / width as f32,
                        y1: e.min_y as f32 / height as f32,
                        x2: (e.max_x + 1) as f32 / width as f32,
                        y2: (e.max_y + 1) as f32 / height as f32,
                    },
                    embedding: None,
                }
            })
            .collect();

        Ok(faces)
    }

    fn name(&self) -> &str {
        "luminance-region"
    }
}
