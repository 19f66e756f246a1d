//! Inference stage trait and the types passed through it

use crate::error::Result;
use crate::params::{ParamSpec, StageParams};
use async_trait::async_trait;
use genmedia_common::MediaArtifact;
use genmedia_face_index::DetectedFace;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Role name of the face being replaced
pub const FACE_TARGET: &str = "target";
/// Role name of the face providing the identity
pub const FACE_SOURCE: &str = "source";

/// External model identity a stage is bound to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelBinding {
    pub name: String,
    pub version: String,
}

impl ModelBinding {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

impl std::fmt::Display for ModelBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

/// Everything a stage reads; stages never mutate it
#[derive(Debug, Clone, Default)]
pub struct StageInput {
    /// Main artifact; `None` for prompt-only families
    pub primary: Option<MediaArtifact>,
    /// Named auxiliary artifacts (conditioning image, driving audio, ...)
    pub extras: BTreeMap<String, MediaArtifact>,
    /// Faces resolved before inference, keyed by role
    pub faces: BTreeMap<String, DetectedFace>,
    /// Per-job token for hosted model endpoints
    pub auth_token: Option<SecretString>,
}

impl StageInput {
    #[must_use]
    pub fn new(primary: MediaArtifact) -> Self {
        Self {
            primary: Some(primary),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn text_only() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_extra(mut self, name: &str, artifact: MediaArtifact) -> Self {
        self.extras.insert(name.to_string(), artifact);
        self
    }

    #[must_use]
    pub fn with_face(mut self, role: &str, face: DetectedFace) -> Self {
        self.faces.insert(role.to_string(), face);
        self
    }

    #[must_use]
    pub fn with_auth_token(mut self, token: SecretString) -> Self {
        self.auth_token = Some(token);
        self
    }
}

/// Successful stage output
#[derive(Debug, Clone)]
pub struct InferenceResult {
    pub artifact: MediaArtifact,
    pub diagnostics: BTreeMap<String, String>,
}

/// Uniform wrapper around one pluggable model
#[async_trait]
pub trait InferenceStage: Send + Sync {
    /// Stage identifier used in logs
    fn name(&self) -> &str;

    /// Model this stage was constructed against
    fn binding(&self) -> &ModelBinding;

    /// Tunables with their defaults and bounds
    fn param_specs(&self) -> Vec<ParamSpec>;

    /// Run the model; no partial results on failure
    async fn run(&self, input: &StageInput, params: &StageParams) -> Result<InferenceResult>;
}
