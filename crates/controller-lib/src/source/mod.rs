//! Usage metrics from the monitoring backend
//!
//! The loop only needs "evaluate this expression now and give me one
//! number". `WorkloadQueries` builds the CPU and memory expressions for the
//! monitored workload on top of that primitive.

mod prometheus_http;

pub use prometheus_http::{PrometheusSource, DEFAULT_QUERY_TIMEOUT};

use crate::error::Result;
use crate::models::BYTES_PER_MB;
use std::sync::Arc;
use std::time::Duration;

pub use async_trait::async_trait;

/// Point-in-time numeric queries against a monitoring backend
#[async_trait]
pub trait MetricsSource: Send + Sync {
    /// Evaluate `expression` at the current instant
    ///
    /// An empty result set yields `Ok(0.0)`; transport failures, timeouts and
    /// malformed payloads yield `ControllerError::MetricsUnavailable`.
    async fn query(&self, expression: &str) -> Result<f64>;
}

/// Default window for the CPU rate expression
pub const DEFAULT_CPU_RATE_WINDOW: Duration = Duration::from_secs(15);

/// CPU and memory queries for one named workload
#[derive(Clone)]
pub struct WorkloadQueries {
    source: Arc<dyn MetricsSource>,
    workload: String,
    cpu_rate_window: Duration,
}

impl WorkloadQueries {
    pub fn new(source: Arc<dyn MetricsSource>, workload: impl Into<String>) -> Self {
        Self {
            source,
            workload: workload.into(),
            cpu_rate_window: DEFAULT_CPU_RATE_WINDOW,
        }
    }

    pub fn with_cpu_rate_window(mut self, window: Duration) -> Self {
        self.cpu_rate_window = window;
        self
    }

    pub fn workload(&self) -> &str {
        &self.workload
    }

    pub fn cpu_expression(&self) -> String {
        format!(
            r#"rate(container_cpu_usage_seconds_total{{name="{}"}}[{}s])"#,
            escape_label_value(&self.workload),
            self.cpu_rate_window.as_secs().max(1)
        )
    }

    pub fn memory_expression(&self) -> String {
        format!(
            r#"container_memory_working_set_bytes{{name="{}"}}"#,
            escape_label_value(&self.workload)
        )
    }

    /// CPU usage as a percentage of `current_cpu_limit` cores
    ///
    /// The same raw rate reads higher as the limit shrinks.
    pub async fn cpu_percent_of_limit(&self, current_cpu_limit: f64) -> Result<f64> {
        let cores_used = self.source.query(&self.cpu_expression()).await?;
        Ok(cores_used / current_cpu_limit * 100.0)
    }

    /// Working-set memory in megabytes
    pub async fn memory_used_mb(&self) -> Result<f64> {
        let bytes = self.source.query(&self.memory_expression()).await?;
        Ok(bytes / BYTES_PER_MB as f64)
    }
}

fn escape_label_value(value: &str) -> String {
    value.replace('\\', r"\\").replace('"', r#"\""#)
}
