//! Job orchestration for the generative media handlers
//!
//! A worker binds its inference stages once into a [`PipelineRunner`], then
//! hands it one job mapping at a time. Each job:
//!
//! 1. is validated into a [`JobRequest`] (defaults applied, limits checked)
//! 2. gets its own store client built from its own credentials
//! 3. runs fetch, preprocessing, face indexing, inference and reconstruction
//!    inside a private scratch workspace
//! 4. publishes a single output object and returns a time-limited URL
//!
//! The result is always a [`JobOutcome`]; errors never escape as panics.

pub mod config;
pub mod error;
pub mod outcome;
pub mod request;
pub mod runner;
pub mod workspace;

pub use config::{Bounds, ConfigError, RequestLimits, RunnerConfig};
pub use error::{PipelineError, RequestError, Result};
pub use outcome::{JobFailure, JobOutcome, JobSuccess};
pub use request::{HandlerFamily, HandlerRequest, JobRequest, Preprocess, HANDLER_FIELD};
pub use runner::{PipelineRunner, PipelineStep};
pub use workspace::JobWorkspace;
