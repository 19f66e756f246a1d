//! Face swap compositing
//!
//! The swap network itself is opaque: it receives the target face region and
//! the source face's identity, and returns a replacement region. [`FaceSwapper`]
//! owns everything around it: checking that both faces belong to the images
//! they claim to, cropping, resizing the model output back to the region, and
//! pasting it into the full target image.

use crate::{DetectedFace, FaceIndexError, Result};
use async_trait::async_trait;
use genmedia_common::image_ops;
use image::RgbImage;
use secrecy::SecretString;
use std::sync::Arc;
use tracing::debug;

/// Opaque identity-transfer network
#[async_trait]
pub trait FaceSwapModel: Send + Sync {
    /// Render `source_face`'s identity into `target_region`
    ///
    /// The returned image may have any size; it is resized to the region.
    /// `auth_token` is the job's own model credential, when it carries one.
    async fn swap_region(
        &self,
        target_region: &RgbImage,
        source_face: &DetectedFace,
        auth_token: Option<&SecretString>,
    ) -> Result<RgbImage>;

    fn name(&self) -> &str;
}

/// Runs a [`FaceSwapModel`] with paste-back semantics
#[derive(Clone)]
pub struct FaceSwapper {
    model: Arc<dyn FaceSwapModel>,
}

impl FaceSwapper {
    #[must_use]
    pub fn new(model: Arc<dyn FaceSwapModel>) -> Self {
        Self { model }
    }

    #[must_use]
    pub fn model_name(&self) -> &str {
        self.model.name()
    }

    /// Swap `source_face` onto `target_face` and return the full target image
    pub async fn swap(
        &self,
        target_image: &RgbImage,
        target_face: &DetectedFace,
        source_face: &DetectedFace,
        auth_token: Option<&SecretString>,
    ) -> Result<RgbImage> {
        if target_face.image_size != target_image.dimensions() {
            return Err(FaceIndexError::ImageMismatch(format!(
                "face from {} was detected in a {}x{} image, got {}x{}",
                target_face.source_image_ref,
                target_face.image_size.0,
                target_face.image_size.1,
                target_image.width(),
                target_image.height()
            )));
        }
        if source_face.embedding.is_empty() {
            return Err(FaceIndexError::SwapError(format!(
                "source face from {} has no embedding",
                source_face.source_image_ref
            )));
        }

        let rect = target_face
            .bounding_box
            .to_pixels(target_image.width(), target_image.height());
        let region =
            image::imageops::crop_imm(target_image, rect.x, rect.y, rect.width, rect.height)
                .to_image();

        let swapped = self
            .model
            .swap_region(&region, source_face, auth_token)
            .await?;
        let swapped = image_ops::resize_exact(&swapped, rect.width, rect.height);

        let mut output = target_image.clone();
        image_ops::paste(&mut output, &swapped, rect.x, rect.y);

        debug!(
            "{} swapped {}x{} region at ({}, {})",
            self.model.name(),
            rect.width,
            rect.height,
            rect.x,
            rect.y
        );
        Ok(output)
    }
}
