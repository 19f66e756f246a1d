//! Execution device selection
//!
//! Resolved once when a stage is built; every call on that stage then runs on
//! the same device.

use crate::error::{InferenceError, Result};
use serde::{Deserialize, Serialize};

/// Where a model executes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Device {
    Cpu,
    Cuda(u32),
    CoreMl,
    /// Hosted endpoint; execution happens off-worker
    Remote,
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Device::Cpu => f.write_str("cpu"),
            Device::Cuda(i) => write!(f, "cuda:{i}"),
            Device::CoreMl => f.write_str("coreml"),
            Device::Remote => f.write_str("remote"),
        }
    }
}

/// How a stage chooses its device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode", content = "device")]
pub enum DevicePolicy {
    /// First accelerator the backend offers, otherwise CPU
    #[default]
    PreferAccelerated,
    /// Always CPU
    CpuOnly,
    /// Exactly this device; unavailable is an error
    Require(Device),
}

impl DevicePolicy {
    /// Pick a device from what the backend reports as available
    pub fn resolve(&self, available: &[Device]) -> Result<Device> {
        match self {
            DevicePolicy::PreferAccelerated => available
                .iter()
                .copied()
                .find(|d| *d != Device::Cpu)
                .or_else(|| available.first().copied())
                .ok_or_else(|| {
                    InferenceError::ResourceUnavailable("backend reports no devices".to_string())
                }),
            DevicePolicy::CpuOnly => {
                if available.contains(&Device::Cpu) {
                    Ok(Device::Cpu)
                } else {
                    Err(InferenceError::ResourceUnavailable(
                        "cpu execution not offered by backend".to_string(),
                    ))
                }
            }
            DevicePolicy::Require(device) => {
                if available.contains(device) {
                    Ok(*device)
                } else {
                    Err(InferenceError::ResourceUnavailable(format!(
                        "required device {device} unavailable"
                    )))
                }
            }
        }
    }
}
