//! Face swap as an inference stage
//!
//! Face selection happens before this stage runs: the caller resolves the
//! user's 1-based indices with a [`genmedia_face_index::FaceIndexer`] and
//! passes both faces in [`StageInput::faces`] under [`FACE_TARGET`] and
//! [`FACE_SOURCE`]. The primary artifact is the image receiving the face.

use crate::error::{InferenceError, Result};
use crate::params::{ParamSpec, StageParams};
use crate::stage::{
    InferenceResult, InferenceStage, ModelBinding, StageInput, FACE_SOURCE, FACE_TARGET,
};
use async_trait::async_trait;
use genmedia_common::{MediaArtifact, MediaKind};
use genmedia_face_index::{DetectedFace, FaceSwapper};
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::debug;

pub struct FaceSwapStage {
    swapper: FaceSwapper,
    binding: ModelBinding,
}

impl FaceSwapStage {
    #[must_use]
    pub fn new(swapper: FaceSwapper, binding: ModelBinding) -> Self {
        Self { swapper, binding }
    }

    fn face<'a>(input: &'a StageInput, role: &str) -> Result<&'a DetectedFace> {
        input
            .faces
            .get(role)
            .ok_or_else(|| {
                InferenceError::InvalidInput(format!("face swap requires a {role} face"))
            })
    }
}

#[async_trait]
impl InferenceStage for FaceSwapStage {
    fn name(&self) -> &str {
        "face_swap"
    }

    fn binding(&self) -> &ModelBinding {
        &self.binding
    }

    fn param_specs(&self) -> Vec<ParamSpec> {
        Vec::new()
    }

    async fn run(&self, input: &StageInput, _params: &StageParams) -> Result<InferenceResult> {
        let primary = input
            .primary
            .as_ref()
            .ok_or_else(|| {
                InferenceError::InvalidInput("face swap requires a target image".into())
            })?;
        primary
            .expect_kind(MediaKind::Image)
            .map_err(|e| InferenceError::InvalidInput(e.to_string()))?;

        let target_face = Self::face(input, FACE_TARGET)?;
        let source_face = Self::face(input, FACE_SOURCE)?;
        let target_image = primary.to_rgb_image()?;

        let started = Instant::now();
        let swapped = self
            .swapper
            .swap(
                &target_image,
                target_face,
                source_face,
                input.auth_token.as_ref(),
            )
            .await?;
        let elapsed = started.elapsed();
        debug!("face swap finished in {:?}", elapsed);

        let mut diagnostics = BTreeMap::new();
        diagnostics.insert("family".to_string(), "face_swap".to_string());
        diagnostics.insert("model".to_string(), self.binding.to_string());
        diagnostics.insert("swap_model".to_string(), self.swapper.model_name().to_string());
        diagnostics.insert("elapsed_ms".to_string(), elapsed.as_millis().to_string());
        diagnostics.insert(
            "target_face".to_string(),
            format!("{:?}", target_face.bounding_box),
        );

        Ok(InferenceResult {
            artifact: MediaArtifact::from_image(&swapped)?,
            diagnostics,
        })
    }
}
