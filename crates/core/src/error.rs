//! Error types for inference stages

use genmedia_common::ProcessingError;
use genmedia_face_index::FaceIndexError;
use thiserror::Error;

/// Single failure channel for every inference stage
///
/// All variants are terminal for the job; the distinction exists so callers
/// and logs can tell a missing model from bad input from a model that broke.
#[derive(Error, Debug)]
pub enum InferenceError {
    /// Model weights, endpoint or device not available
    #[error("Model resource unavailable: {0}")]
    ResourceUnavailable(String),

    /// Input the model cannot accept (wrong kind, shape, language, bounds)
    #[error("Invalid model input: {0}")]
    InvalidInput(String),

    /// The model ran and failed (divergence, malformed output, timeout)
    #[error("Inference failed: {0}")]
    Runtime(String),

    #[error("Processing error: {0}")]
    Processing(#[from] ProcessingError),
}

impl InferenceError {
    /// Stable snake_case name used in diagnostics
    #[must_use]
    pub fn category(&self) -> &'static str {
        match self {
            InferenceError::ResourceUnavailable(_) => "resource_unavailable",
            InferenceError::InvalidInput(_) | InferenceError::Processing(_) => "invalid_input",
            InferenceError::Runtime(_) => "runtime",
        }
    }
}

impl From<FaceIndexError> for InferenceError {
    fn from(err: FaceIndexError) -> Self {
        match err {
            FaceIndexError::ModelLoadError(msg) => InferenceError::ResourceUnavailable(msg),
            FaceIndexError::SwapError(msg) | FaceIndexError::DetectionError(msg) => {
                InferenceError::Runtime(msg)
            }
            FaceIndexError::ProcessingError(e) => InferenceError::Processing(e),
            other => InferenceError::InvalidInput(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, InferenceError>;
