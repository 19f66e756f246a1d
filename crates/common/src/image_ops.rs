//! Image decode/encode and the colour-space normalization every stage relies on
//!
//! All decoded images are 8-bit RGB with EXIF orientation already applied, so
//! two images produced here can be composited without further conversion.

use crate::{ProcessingError, Result};
use image::{DynamicImage, GrayImage, ImageDecoder, ImageFormat, ImageReader, RgbImage};
use std::io::Cursor;
use tracing::debug;

/// Canny thresholds used by the ControlNet edge handlers
pub const CANNY_LOW_THRESHOLD: f32 = 100.0;
pub const CANNY_HIGH_THRESHOLD: f32 = 200.0;

/// Decode any supported image format into upright 8-bit RGB
pub fn decode_rgb(bytes: &[u8]) -> Result<RgbImage> {
    let reader = ImageReader::new(Cursor::new(bytes)).with_guessed_format()?;
    if reader.format().is_none() {
        return Err(ProcessingError::UnsupportedFormat(
            "unrecognized image format".to_string(),
        ));
    }

    let mut decoder = reader.into_decoder()?;
    let orientation = decoder.orientation()?;
    let mut img = DynamicImage::from_decoder(decoder)?;
    img.apply_orientation(orientation);

    debug!(
        "Decoded {}x{} image ({:?})",
        img.width(),
        img.height(),
        img.color()
    );

    Ok(img.to_rgb8())
}

/// Encode an RGB image as PNG
pub fn encode_png(image: &RgbImage) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity((image.width() * image.height()) as usize);
    image.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)?;
    Ok(buf)
}

/// Grayscale copy of `image`, expanded back to three channels
#[must_use]
pub fn grayscale_rgb(image: &RgbImage) -> RgbImage {
    let gray: GrayImage = image::imageops::grayscale(image);
    DynamicImage::ImageLuma8(gray).to_rgb8()
}

/// Canny edge map of `image`, stacked to three channels for conditioning input
#[must_use]
pub fn canny_edges(image: &RgbImage, low: f32, high: f32) -> RgbImage {
    let gray = image::imageops::grayscale(image);
    let edges = imageproc::edges::canny(&gray, low, high);
    DynamicImage::ImageLuma8(edges).to_rgb8()
}

/// Copy `patch` into `target` with its top-left corner at (`x`, `y`)
///
/// Pixels falling outside `target` are clipped.
pub fn paste(target: &mut RgbImage, patch: &RgbImage, x: u32, y: u32) {
    image::imageops::replace(target, patch, i64::from(x), i64::from(y));
}

/// Resize with a Lanczos filter; a no-op when dimensions already match
#[must_use]
pub fn resize_exact(image: &RgbImage, width: u32, height: u32) -> RgbImage {
    if image.dimensions() == (width, height) {
        return image.clone();
    }
    image::imageops::resize(image, width, height, image::imageops::FilterType::Lanczos3)
}
