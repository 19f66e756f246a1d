//! Inference stages for generative media models
//!
//! Every model, whatever it does, is wrapped behind the same
//! [`InferenceStage`] contract: it reads a [`StageInput`] it may not modify,
//! takes fully resolved [`StageParams`] (every tunable named, defaulted and
//! bounds-checked), and returns either an [`InferenceResult`] or a single
//! [`InferenceError`]. The model identity is fixed when the stage is built,
//! and so is the execution device.
//!
//! - [`ModelStage`]: any [`StageFamily`] served by a [`ModelBackend`]
//! - [`FaceSwapStage`]: identity transfer between two pre-selected faces
//! - [`HttpModelBackend`]: hosted endpoints, usable as both a
//!   [`ModelBackend`] and a face swap model

pub mod device;
pub mod error;
pub mod face_swap_stage;
pub mod family;
pub mod http;
pub mod model_stage;
pub mod params;
pub mod stage;

pub use device::{Device, DevicePolicy};
pub use error::InferenceError;
pub use face_swap_stage::FaceSwapStage;
pub use family::{language_name, StageFamily, TTS_LANGUAGES};
pub use http::HttpModelBackend;
pub use model_stage::{ModelBackend, ModelRequest, ModelStage};
pub use params::{ParamSpec, ParamValue, StageParams};
pub use stage::{
    InferenceResult, InferenceStage, ModelBinding, StageInput, FACE_SOURCE, FACE_TARGET,
};
