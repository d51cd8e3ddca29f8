//! Core data models for the limit controller

use serde::{Deserialize, Serialize};
use std::fmt;

/// Bytes per megabyte, the loop's working unit for memory usage
pub const BYTES_PER_MB: u64 = 1024 * 1024;

/// CPU and memory ceiling applied to the workload
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimits {
    pub cpu_cores: f64,
    pub memory_bytes: u64,
}

impl ResourceLimits {
    pub fn new(cpu_cores: f64, memory_bytes: u64) -> Self {
        Self {
            cpu_cores,
            memory_bytes,
        }
    }

    pub fn memory_mb(&self) -> f64 {
        self.memory_bytes as f64 / BYTES_PER_MB as f64
    }

    /// Per-field comparison against another limit pair
    pub fn differs_from(&self, other: &ResourceLimits) -> bool {
        self.cpu_cores != other.cpu_cores || self.memory_bytes != other.memory_bytes
    }
}

impl fmt::Display for ResourceLimits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cpu={:.2} cores, memory={:.2} MB",
            self.cpu_cores,
            self.memory_mb()
        )
    }
}

/// Usage observed during one iteration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UsageSample {
    /// CPU consumption as a percentage of the current CPU limit
    pub cpu_percent_of_limit: f64,
    /// Working-set memory in megabytes
    pub memory_used_mb: f64,
}

/// Long-lived state owned by the control loop
///
/// `limits` always reflects the last limits the runtime accepted.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerState {
    limits: ResourceLimits,
    initial_memory_bytes: u64,
}

impl ControllerState {
    /// Start from the static defaults; the initial memory becomes the memory floor
    pub fn new(initial: ResourceLimits) -> Self {
        Self {
            limits: initial,
            initial_memory_bytes: initial.memory_bytes,
        }
    }

    pub fn limits(&self) -> ResourceLimits {
        self.limits
    }

    pub fn initial_memory_bytes(&self) -> u64 {
        self.initial_memory_bytes
    }

    /// Record limits the runtime has accepted
    pub(crate) fn commit(&mut self, applied: ResourceLimits) {
        self.limits = applied;
    }
}

/// Snapshot of the controller published to readers outside the loop
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerStatus {
    pub workload: String,
    pub limits: ResourceLimits,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_usage: Option<UsageSample>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_usage_percent: Option<f64>,
    pub iterations: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub updated_at: i64,
}

impl ControllerStatus {
    pub fn initial(workload: impl Into<String>, limits: ResourceLimits) -> Self {
        Self {
            workload: workload.into(),
            limits,
            last_usage: None,
            memory_usage_percent: None,
            iterations: 0,
            last_error: None,
            updated_at: chrono::Utc::now().timestamp(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_differs_from_compares_each_field() {
        let base = ResourceLimits::new(1.0, 512 * BYTES_PER_MB);

        assert!(!base.differs_from(&base));
        assert!(base.differs_from(&ResourceLimits::new(1.2, 512 * BYTES_PER_MB)));
        assert!(base.differs_from(&ResourceLimits::new(1.0, 513 * BYTES_PER_MB)));
    }

    #[test]
    fn test_controller_state_keeps_initial_memory_floor() {
        let mut state = ControllerState::new(ResourceLimits::new(1.0, 512 * BYTES_PER_MB));
        state.commit(ResourceLimits::new(2.0, 1024 * BYTES_PER_MB));

        assert_eq!(state.limits().cpu_cores, 2.0);
        assert_eq!(state.initial_memory_bytes(), 512 * BYTES_PER_MB);
    }

    #[test]
    fn test_limits_display() {
        let limits = ResourceLimits::new(1.5, 768 * BYTES_PER_MB);
        assert_eq!(limits.to_string(), "cpu=1.50 cores, memory=768.00 MB");
    }
}
