//! Hysteresis scaling policy
//!
//! `decide` is a pure function of its inputs: it never mutates the current
//! limits and holds no state between calls. CPU and memory are evaluated
//! independently and may both move in the same cycle. Thresholds are strict,
//! so usage sitting exactly on a boundary leaves the limit where it is.

use crate::error::{ControllerError, Result};
use crate::models::{ResourceLimits, UsageSample, BYTES_PER_MB};
use serde::{Deserialize, Serialize};

/// Immutable scaling configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingThresholds {
    /// Scale CPU up above this percent of the current limit
    pub cpu_high: f64,
    /// CPU scales down below `cpu_high * cpu_low_factor`
    pub cpu_low_factor: f64,
    /// Scale memory up above this percent of the current limit
    pub mem_high: f64,
    /// Scale memory down below this percent of the current limit
    pub mem_low: f64,
    pub cpu_scale_up: f64,
    pub cpu_scale_down: f64,
    pub mem_scale_up: f64,
    pub mem_scale_down: f64,
    pub cpu_floor: f64,
    pub cpu_ceiling: f64,
    pub mem_ceiling_bytes: u64,
}

impl Default for ScalingThresholds {
    fn default() -> Self {
        Self {
            cpu_high: 80.0,
            cpu_low_factor: 0.5,
            mem_high: 75.0,
            mem_low: 40.0,
            cpu_scale_up: 1.2,
            cpu_scale_down: 0.8,
            mem_scale_up: 1.2,
            mem_scale_down: 0.8,
            cpu_floor: 1.0,
            // Host capacity: 4 vCPU, 8 GiB
            cpu_ceiling: 4.0,
            mem_ceiling_bytes: 8 * 1024 * BYTES_PER_MB,
        }
    }
}

impl ScalingThresholds {
    pub fn cpu_low(&self) -> f64 {
        self.cpu_high * self.cpu_low_factor
    }

    /// Reject configurations the policy cannot honour
    pub fn validate(&self, initial: &ResourceLimits) -> Result<()> {
        let fail = |reason: String| Err(ControllerError::InvalidConfig(reason));

        if !(self.cpu_floor > 0.0 && self.cpu_floor <= self.cpu_ceiling) {
            return fail(format!(
                "cpu floor {} must be positive and not above ceiling {}",
                self.cpu_floor, self.cpu_ceiling
            ));
        }
        if initial.cpu_cores < self.cpu_floor || initial.cpu_cores > self.cpu_ceiling {
            return fail(format!(
                "initial cpu {} outside [{}, {}]",
                initial.cpu_cores, self.cpu_floor, self.cpu_ceiling
            ));
        }
        if initial.memory_bytes == 0 || initial.memory_bytes > self.mem_ceiling_bytes {
            return fail(format!(
                "initial memory {} bytes outside (0, {}]",
                initial.memory_bytes, self.mem_ceiling_bytes
            ));
        }
        if self.cpu_scale_up < 1.0 || self.mem_scale_up < 1.0 {
            return fail("scale-up factors must be >= 1".to_string());
        }
        for factor in [self.cpu_scale_down, self.mem_scale_down, self.cpu_low_factor] {
            if !(factor > 0.0 && factor <= 1.0) {
                return fail(format!("factor {} must be in (0, 1]", factor));
            }
        }
        if self.mem_low >= self.mem_high {
            return fail(format!(
                "mem_low {} must be below mem_high {}",
                self.mem_low, self.mem_high
            ));
        }
        Ok(())
    }
}

/// Which rule fired for one resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Adjustment {
    Up,
    Down,
    Hold,
}

impl Adjustment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Adjustment::Up => "up",
            Adjustment::Down => "down",
            Adjustment::Hold => "hold",
        }
    }
}

/// Proposed limits plus the reasoning behind them
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decision {
    pub limits: ResourceLimits,
    pub cpu: Adjustment,
    pub memory: Adjustment,
    /// Memory usage relative to the current memory limit
    pub memory_usage_percent: f64,
}

/// Memory usage as a percentage of the given limit
pub fn memory_usage_percent(memory_used_mb: f64, limit_bytes: u64) -> f64 {
    (memory_used_mb * 100.0) / (limit_bytes as f64 / BYTES_PER_MB as f64)
}

/// Map usage and current limits to proposed limits
pub fn decide(
    usage: &UsageSample,
    current: &ResourceLimits,
    thresholds: &ScalingThresholds,
    initial_memory_floor: u64,
) -> Decision {
    let (cpu_cores, cpu) = if usage.cpu_percent_of_limit > thresholds.cpu_high {
        (
            (current.cpu_cores * thresholds.cpu_scale_up).min(thresholds.cpu_ceiling),
            Adjustment::Up,
        )
    } else if usage.cpu_percent_of_limit < thresholds.cpu_low() {
        (
            (current.cpu_cores * thresholds.cpu_scale_down).max(thresholds.cpu_floor),
            Adjustment::Down,
        )
    } else {
        (current.cpu_cores, Adjustment::Hold)
    };

    let mem_percent = memory_usage_percent(usage.memory_used_mb, current.memory_bytes);
    let (memory_bytes, memory) = if mem_percent > thresholds.mem_high {
        (
            scale_bytes(current.memory_bytes, thresholds.mem_scale_up)
                .min(thresholds.mem_ceiling_bytes),
            Adjustment::Up,
        )
    } else if mem_percent < thresholds.mem_low {
        (
            scale_bytes(current.memory_bytes, thresholds.mem_scale_down).max(initial_memory_floor),
            Adjustment::Down,
        )
    } else {
        (current.memory_bytes, Adjustment::Hold)
    };

    Decision {
        limits: ResourceLimits::new(cpu_cores, memory_bytes),
        cpu,
        memory,
        memory_usage_percent: mem_percent,
    }
}

/// Guard against limits escaping the configured bounds
pub fn check_bounds(
    limits: &ResourceLimits,
    thresholds: &ScalingThresholds,
    initial_memory_floor: u64,
) -> Result<()> {
    let violation = |reason: String| {
        Err(ControllerError::PolicyViolation {
            limits: *limits,
            reason,
        })
    };

    if !limits.cpu_cores.is_finite()
        || limits.cpu_cores < thresholds.cpu_floor
        || limits.cpu_cores > thresholds.cpu_ceiling
    {
        return violation(format!(
            "cpu {} outside [{}, {}]",
            limits.cpu_cores, thresholds.cpu_floor, thresholds.cpu_ceiling
        ));
    }
    if limits.memory_bytes < initial_memory_floor
        || limits.memory_bytes > thresholds.mem_ceiling_bytes
    {
        return violation(format!(
            "memory {} bytes outside [{}, {}]",
            limits.memory_bytes, initial_memory_floor, thresholds.mem_ceiling_bytes
        ));
    }
    Ok(())
}

// Truncates toward zero; the floor/ceiling clamp is applied by the caller.
fn scale_bytes(bytes: u64, factor: f64) -> u64 {
    (bytes as f64 * factor) as u64
}
