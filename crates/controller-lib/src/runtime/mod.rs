//! Applying limits to the container runtime

mod docker;

pub use docker::{DockerController, DEFAULT_APPLY_TIMEOUT};

use crate::error::Result;
use crate::models::ResourceLimits;
use serde::{Deserialize, Serialize};

pub use async_trait::async_trait;

/// Conventional swap allowance: twice the memory limit
pub const DEFAULT_SWAP_FACTOR: f64 = 2.0;

/// Sets CPU and memory limits on a named workload
///
/// One call, no internal retries. Failures surface as
/// `ControllerError::ApplyFailed`.
#[async_trait]
pub trait ResourceController: Send + Sync {
    async fn apply(&self, workload: &str, limits: &ResourceLimits) -> Result<()>;
}

/// Limits in the runtime's native units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RuntimeResources {
    pub nano_cpus: i64,
    pub memory: i64,
    pub memory_swap: i64,
}

impl RuntimeResources {
    pub fn from_limits(limits: &ResourceLimits, swap_factor: f64) -> Self {
        let memory = limits.memory_bytes as i64;
        Self {
            nano_cpus: (limits.cpu_cores * 1e9) as i64,
            memory,
            memory_swap: (memory as f64 * swap_factor) as i64,
        }
    }
}
