//! Job-level error taxonomy
//!
//! Every lower-layer error converts into [`PipelineError`]; the runner is the
//! only place that turns one into a user-visible failure payload.

use genmedia_common::ProcessingError;
use genmedia_core::InferenceError;
use genmedia_face_index::FaceIndexError;
use genmedia_reconstruct::ReconstructionError;
use genmedia_storage::StorageError;
use std::time::Duration;
use thiserror::Error;

/// Problems with the job mapping itself; never retried
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("invalid field {field}: {reason}")]
    InvalidField { field: String, reason: String },

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("unknown handler family: {0}")]
    UnknownFamily(String),
}

impl RequestError {
    pub(crate) fn invalid(field: &str, reason: impl Into<String>) -> Self {
        RequestError::InvalidField {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Request(#[from] RequestError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Face(#[from] FaceIndexError),

    #[error(transparent)]
    Inference(#[from] InferenceError),

    #[error(transparent)]
    Reconstruction(#[from] ReconstructionError),

    /// Input media that could not be decoded or normalized
    #[error("Input media rejected: {0}")]
    Processing(#[from] ProcessingError),

    #[error("Job workspace error: {0}")]
    Workspace(#[from] std::io::Error),

    #[error("Job exceeded its {}s time limit", .0.as_secs())]
    Timeout(Duration),

    #[error("Job was cancelled")]
    Cancelled,
}

impl PipelineError {
    /// Stable snake_case category reported alongside the message
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Request(_) | PipelineError::Processing(_) => "request_error",
            PipelineError::Storage(_) | PipelineError::Workspace(_) => "storage_error",
            PipelineError::Face(FaceIndexError::NoFaceDetected(_)) => "no_face_detected",
            PipelineError::Face(FaceIndexError::IndexOutOfRange { .. }) => "index_out_of_range",
            PipelineError::Face(_) | PipelineError::Inference(_) => "inference_error",
            PipelineError::Reconstruction(_) => "reconstruction_error",
            PipelineError::Timeout(_) => "timeout_error",
            PipelineError::Cancelled => "cancelled",
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
