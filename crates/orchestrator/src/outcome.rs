//! The single payload a job produces

use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Published result: the signed URL plus family-specific metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSuccess {
    pub url: String,
    #[serde(flatten)]
    pub metadata: BTreeMap<String, Value>,
}

impl JobSuccess {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            metadata: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    pub error: String,
    /// Category from [`PipelineError::kind`]
    pub kind: String,
}

/// Exactly one of success or failure per job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JobOutcome {
    Success(JobSuccess),
    Failure(JobFailure),
}

impl JobOutcome {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Success(_))
    }

    #[must_use]
    pub fn url(&self) -> Option<&str> {
        match self {
            JobOutcome::Success(s) => Some(&s.url),
            JobOutcome::Failure(_) => None,
        }
    }

    #[must_use]
    pub fn failure(&self) -> Option<&JobFailure> {
        match self {
            JobOutcome::Failure(f) => Some(f),
            JobOutcome::Success(_) => None,
        }
    }
}

impl From<PipelineError> for JobOutcome {
    fn from(err: PipelineError) -> Self {
        JobOutcome::Failure(JobFailure {
            error: err.to_string(),
            kind: err.kind().to_string(),
        })
    }
}

impl From<Result<JobSuccess, PipelineError>> for JobOutcome {
    fn from(result: Result<JobSuccess, PipelineError>) -> Self {
        match result {
            Ok(success) => JobOutcome::Success(success),
            Err(err) => err.into(),
        }
    }
}
