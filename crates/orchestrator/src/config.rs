//! Runner configuration, loadable from YAML
//!
//! ```yaml
//! job_timeout_secs: 600
//! signed_url_ttl_secs: 3600
//! retry:
//!   max_attempts: 5
//! limits:
//!   inference_steps: { min: 1, max: 80 }
//! ```
//!
//! Every field is optional; omitted fields keep their defaults.

use crate::error::RequestError;
use genmedia_core::StageParams;
use genmedia_storage::{RetryPolicy, MAX_SIGNED_URL_TTL};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Inclusive numeric range
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min: f64,
    pub max: f64,
}

impl Bounds {
    #[must_use]
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    #[must_use]
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Operator-configured ceilings on job parameters
///
/// Applied after a family's own parameter bounds, so these can only narrow
/// what a job may ask for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestLimits {
    pub guidance_scale: Bounds,
    pub inference_steps: Bounds,
    pub conditioning_scale: Bounds,
    pub upscale: Bounds,
    /// Characters of text-to-speech input
    pub text_length: Bounds,
    pub video_frames: Bounds,
    pub fps: Bounds,
}

impl Default for RequestLimits {
    fn default() -> Self {
        Self {
            guidance_scale: Bounds::new(0.0, 30.0),
            inference_steps: Bounds::new(1.0, 150.0),
            conditioning_scale: Bounds::new(0.0, 2.0),
            upscale: Bounds::new(1.0, 4.0),
            text_length: Bounds::new(1.0, 5000.0),
            video_frames: Bounds::new(1.0, 128.0),
            fps: Bounds::new(1.0, 60.0),
        }
    }
}

impl RequestLimits {
    fn numeric_bounds(&self, param: &str) -> Option<Bounds> {
        match param {
            "guidance_scale" | "image_guidance_scale" => Some(self.guidance_scale),
            "num_inference_steps" => Some(self.inference_steps),
            "conditioning_scale" => Some(self.conditioning_scale),
            "upscale" => Some(self.upscale),
            "num_frames" => Some(self.video_frames),
            "fps" => Some(self.fps),
            _ => None,
        }
    }

    /// Reject resolved parameters that fall outside these limits
    pub fn check(&self, params: &StageParams) -> Result<(), RequestError> {
        for (name, _) in params.iter() {
            let (Some(bounds), Some(value)) = (self.numeric_bounds(name), params.f64(name)) else {
                continue;
            };
            if !bounds.contains(value) {
                return Err(RequestError::invalid(
                    name,
                    format!("{value} is outside [{}, {}]", bounds.min, bounds.max),
                ));
            }
        }

        if let Some(text) = params.text("text") {
            let chars = text.chars().count() as f64;
            if !self.text_length.contains(chars) {
                return Err(RequestError::invalid(
                    "text",
                    format!(
                        "length {chars} is outside [{}, {}] characters",
                        self.text_length.min, self.text_length.max
                    ),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Wall-clock budget for one job, fetch through publish
    pub job_timeout_secs: u64,
    /// Lifetime of the published URL, at most one week
    pub signed_url_ttl_secs: u64,
    pub retry: RetryPolicy,
    /// Parent directory for per-job workspaces; system temp dir when unset
    pub workspace_root: Option<PathBuf>,
    pub limits: RequestLimits,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            job_timeout_secs: 900,
            signed_url_ttl_secs: 3600,
            retry: RetryPolicy::default(),
            workspace_root: None,
            limits: RequestLimits::default(),
        }
    }
}

impl RunnerConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&contents)
    }

    /// Reject settings no store could honour
    pub fn validate(&self) -> Result<(), ConfigError> {
        let max_ttl = MAX_SIGNED_URL_TTL.as_secs();
        if !(1..=max_ttl).contains(&self.signed_url_ttl_secs) {
            return Err(ConfigError::Invalid(format!(
                "signed_url_ttl_secs must be within 1..={max_ttl}, got {}",
                self.signed_url_ttl_secs
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    #[must_use]
    pub fn signed_url_ttl(&self) -> Duration {
        Duration::from_secs(self.signed_url_ttl_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use genmedia_core::{ParamValue, StageFamily};
    use std::collections::BTreeMap;

    #[test]
    fn test_defaults() {
        let config = RunnerConfig::default();
        assert_eq!(config.job_timeout(), Duration::from_secs(900));
        assert_eq!(config.signed_url_ttl(), Duration::from_secs(3600));
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = RunnerConfig::from_yaml_str(
            "job_timeout_secs: 60\nretry:\n  max_attempts: 5\nlimits:\n  inference_steps: { min: 1, max: 80 }\n",
        )
        .unwrap();
        assert_eq!(config.job_timeout_secs, 60);
        assert_eq!(config.signed_url_ttl_secs, 3600);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.base_delay_ms, 200);
        assert_eq!(config.limits.inference_steps, Bounds::new(1.0, 80.0));
        assert_eq!(config.limits.upscale, Bounds::new(1.0, 4.0));
    }

    #[test]
    fn test_malformed_yaml_is_parse_error() {
        let err = RunnerConfig::from_yaml_str("job_timeout_secs: [").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_signed_url_ttl_bounds() {
        let err = RunnerConfig::from_yaml_str("signed_url_ttl_secs: 691200").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(ref msg) if msg.contains("691200")));
        assert!(RunnerConfig::from_yaml_str("signed_url_ttl_secs: 0").is_err());

        let config = RunnerConfig::from_yaml_str("signed_url_ttl_secs: 604800").unwrap();
        assert_eq!(config.signed_url_ttl(), Duration::from_secs(604_800));
    }

    #[test]
    fn test_missing_file_names_path() {
        let err = RunnerConfig::from_yaml_file(Path::new("/nonexistent/runner.yaml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/runner.yaml"));
    }

    #[test]
    fn test_limits_narrow_family_bounds() {
        let limits = RequestLimits {
            inference_steps: Bounds::new(1.0, 50.0),
            ..Default::default()
        };
        let mut overrides = BTreeMap::new();
        overrides.insert("num_inference_steps".to_string(), ParamValue::Int(100));
        let params =
            StageParams::resolve(&StageFamily::ImageToImage.param_specs(), &overrides).unwrap();

        let err = limits.check(&params).unwrap_err();
        assert_eq!(
            err,
            RequestError::invalid("num_inference_steps", "100 is outside [1, 50]")
        );
        assert!(RequestLimits::default().check(&params).is_ok());
    }

    #[test]
    fn test_text_length_limit() {
        let limits = RequestLimits {
            text_length: Bounds::new(1.0, 10.0),
            ..Default::default()
        };
        let mut overrides = BTreeMap::new();
        overrides.insert("text".to_string(), ParamValue::Text("a".repeat(11)));
        let params =
            StageParams::resolve(&StageFamily::TextToSpeech.param_specs(), &overrides).unwrap();
        assert!(limits.check(&params).is_err());
    }
}
