//! Observability infrastructure for the limit controller
//!
//! Provides:
//! - Prometheus metrics (current limits, observed usage, scale events, failures)
//! - Structured JSON logging with tracing

use crate::error::ControllerError;
use crate::models::{ResourceLimits, UsageSample};
use prometheus::{
    register_gauge, register_histogram, register_int_counter, register_int_counter_vec,
    register_int_gauge, Encoder, Gauge, Histogram, IntCounter, IntCounterVec, IntGauge,
    TextEncoder,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for iteration latency (in seconds)
///
/// An iteration spans up to two metrics queries and one runtime call.
const ITERATION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 20.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<ControllerMetricsInner> = OnceLock::new();

struct ControllerMetricsInner {
    cpu_limit_cores: Gauge,
    memory_limit_bytes: IntGauge,
    cpu_usage_percent: Gauge,
    memory_usage_megabytes: Gauge,
    memory_usage_percent: Gauge,
    iteration_latency_seconds: Histogram,
    iterations: IntCounter,
    scale_events: IntCounterVec,
    query_errors: IntCounter,
    apply_errors: IntCounter,
    policy_violations: IntCounter,
}

impl ControllerMetricsInner {
    fn new() -> Self {
        Self {
            cpu_limit_cores: register_gauge!(
                "limit_controller_cpu_limit_cores",
                "CPU limit last applied to the workload"
            )
            .expect("Failed to register cpu_limit_cores"),

            memory_limit_bytes: register_int_gauge!(
                "limit_controller_memory_limit_bytes",
                "Memory limit last applied to the workload"
            )
            .expect("Failed to register memory_limit_bytes"),

            cpu_usage_percent: register_gauge!(
                "limit_controller_cpu_usage_percent",
                "CPU usage as a percentage of the current CPU limit"
            )
            .expect("Failed to register cpu_usage_percent"),

            memory_usage_megabytes: register_gauge!(
                "limit_controller_memory_usage_megabytes",
                "Working-set memory of the workload"
            )
            .expect("Failed to register memory_usage_megabytes"),

            memory_usage_percent: register_gauge!(
                "limit_controller_memory_usage_percent",
                "Memory usage as a percentage of the current memory limit"
            )
            .expect("Failed to register memory_usage_percent"),

            iteration_latency_seconds: register_histogram!(
                "limit_controller_iteration_latency_seconds",
                "Time spent in one sample-decide-apply iteration",
                ITERATION_BUCKETS.to_vec()
            )
            .expect("Failed to register iteration_latency_seconds"),

            iterations: register_int_counter!(
                "limit_controller_iterations_total",
                "Total number of control loop iterations"
            )
            .expect("Failed to register iterations"),

            scale_events: register_int_counter_vec!(
                "limit_controller_scale_events_total",
                "Limit changes applied to the workload",
                &["resource", "direction"]
            )
            .expect("Failed to register scale_events"),

            query_errors: register_int_counter!(
                "limit_controller_query_errors_total",
                "Total number of failed metrics queries"
            )
            .expect("Failed to register query_errors"),

            apply_errors: register_int_counter!(
                "limit_controller_apply_errors_total",
                "Total number of failed resource updates"
            )
            .expect("Failed to register apply_errors"),

            policy_violations: register_int_counter!(
                "limit_controller_policy_violations_total",
                "Total number of proposed limits rejected by the bounds check"
            )
            .expect("Failed to register policy_violations"),
        }
    }
}

/// Controller metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct ControllerMetrics {
    _private: (),
}

impl Default for ControllerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ControllerMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(ControllerMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &ControllerMetricsInner {
        GLOBAL_METRICS.get_or_init(ControllerMetricsInner::new)
    }

    pub fn set_limits(&self, limits: &ResourceLimits) {
        let inner = self.inner();
        inner.cpu_limit_cores.set(limits.cpu_cores);
        inner.memory_limit_bytes.set(limits.memory_bytes as i64);
    }

    pub fn set_usage(&self, usage: &UsageSample, memory_usage_percent: f64) {
        let inner = self.inner();
        inner.cpu_usage_percent.set(usage.cpu_percent_of_limit);
        inner.memory_usage_megabytes.set(usage.memory_used_mb);
        inner.memory_usage_percent.set(memory_usage_percent);
    }

    pub fn observe_iteration(&self, duration_secs: f64) {
        self.inner().iteration_latency_seconds.observe(duration_secs);
        self.inner().iterations.inc();
    }

    /// Count an applied change; `resource` is "cpu" or "memory"
    pub fn inc_scale_event(&self, resource: &str, direction: &str) {
        self.inner()
            .scale_events
            .with_label_values(&[resource, direction])
            .inc();
    }

    /// Count a failed iteration by its error kind
    pub fn inc_error(&self, error: &ControllerError) {
        match error {
            ControllerError::MetricsUnavailable { .. } => self.inner().query_errors.inc(),
            ControllerError::ApplyFailed { .. } => self.inner().apply_errors.inc(),
            ControllerError::PolicyViolation { .. } => self.inner().policy_violations.inc(),
            ControllerError::InvalidConfig(_) => {}
        }
    }

    /// Render the default registry in the Prometheus text exposition format
    pub fn encode(&self) -> prometheus::Result<String> {
        let _ = self.inner();
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&prometheus::gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// Structured logger for controller events
///
/// Provides consistent JSON-formatted logging for status observations,
/// limit changes, and failures.
#[derive(Clone)]
pub struct StructuredLogger {
    workload: String,
}

impl StructuredLogger {
    pub fn new(workload: impl Into<String>) -> Self {
        Self {
            workload: workload.into(),
        }
    }

    /// Log controller startup
    pub fn log_startup(&self, version: &str, limits: &ResourceLimits, interval_secs: u64) {
        info!(
            event = "controller_started",
            workload = %self.workload,
            controller_version = %version,
            cpu_limit_cores = limits.cpu_cores,
            memory_limit_mb = limits.memory_mb(),
            interval_secs = interval_secs,
            "Limit controller started"
        );
    }

    /// Log controller shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "controller_shutdown",
            workload = %self.workload,
            reason = %reason,
            "Limit controller shutting down"
        );
    }

    /// Per-iteration status observation
    pub fn log_status(
        &self,
        usage: &UsageSample,
        limits: &ResourceLimits,
        memory_usage_percent: f64,
    ) {
        info!(
            event = "usage_status",
            workload = %self.workload,
            cpu_percent_of_limit = usage.cpu_percent_of_limit,
            memory_used_mb = usage.memory_used_mb,
            memory_percent_of_limit = memory_usage_percent,
            cpu_limit_cores = limits.cpu_cores,
            memory_limit_mb = limits.memory_mb(),
            "Current usage"
        );
    }

    /// Log a limit change accepted by the runtime
    pub fn log_applied(&self, previous: &ResourceLimits, applied: &ResourceLimits) {
        info!(
            event = "limits_applied",
            workload = %self.workload,
            previous_cpu_cores = previous.cpu_cores,
            previous_memory_mb = previous.memory_mb(),
            cpu_cores = applied.cpu_cores,
            memory_mb = applied.memory_mb(),
            "New limits applied"
        );
    }

    /// Log a failed iteration
    pub fn log_failure(&self, error: &ControllerError) {
        match error {
            ControllerError::MetricsUnavailable { query, reason } => {
                warn!(
                    event = "metrics_unavailable",
                    workload = %self.workload,
                    query = %query,
                    reason = %reason,
                    "Metrics query failed, skipping iteration"
                );
            }
            ControllerError::ApplyFailed { limits, reason, .. } => {
                warn!(
                    event = "apply_failed",
                    workload = %self.workload,
                    attempted_cpu_cores = limits.cpu_cores,
                    attempted_memory_mb = limits.memory_mb(),
                    reason = %reason,
                    "Failed to apply limits, keeping previous state"
                );
            }
            ControllerError::PolicyViolation { limits, reason } => {
                warn!(
                    event = "policy_violation",
                    workload = %self.workload,
                    attempted_cpu_cores = limits.cpu_cores,
                    attempted_memory_mb = limits.memory_mb(),
                    reason = %reason,
                    "Proposed limits out of bounds, not applied"
                );
            }
            ControllerError::InvalidConfig(reason) => {
                warn!(
                    event = "invalid_config",
                    workload = %self.workload,
                    reason = %reason,
                    "Invalid configuration"
                );
            }
        }
    }
}
