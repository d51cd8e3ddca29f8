//! Controller configuration
//!
//! Defaults, then an optional config file, then `CONTROLLER_*` environment
//! variables (e.g. `CONTROLLER_WORKLOAD`, `CONTROLLER_CPU_HIGH`).

use anyhow::{Context, Result};
use controller_lib::{LoopConfig, ResourceLimits, ScalingThresholds, BYTES_PER_MB};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Controller configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ControllerConfig {
    /// Name or ID of the monitored container
    #[serde(default = "default_workload")]
    pub workload: String,

    /// Prometheus base URL
    #[serde(default = "default_prometheus_url")]
    pub prometheus_url: String,

    /// Docker Engine API base URL
    #[serde(default = "default_runtime_url")]
    pub runtime_url: String,

    /// Engine API version to pin, e.g. "v1.43"
    #[serde(default)]
    pub runtime_api_version: Option<String>,

    /// API server port for health/metrics/status
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_timeout")]
    pub query_timeout_secs: u64,

    #[serde(default = "default_timeout")]
    pub apply_timeout_secs: u64,

    #[serde(default = "default_cpu_rate_window")]
    pub cpu_rate_window_secs: u64,

    #[serde(default = "default_cpu_high")]
    pub cpu_high: f64,
    #[serde(default = "default_cpu_low_factor")]
    pub cpu_low_factor: f64,
    #[serde(default = "default_mem_high")]
    pub mem_high: f64,
    #[serde(default = "default_mem_low")]
    pub mem_low: f64,

    #[serde(default = "default_scale_up")]
    pub cpu_scale_up: f64,
    #[serde(default = "default_scale_down")]
    pub cpu_scale_down: f64,
    #[serde(default = "default_scale_up")]
    pub mem_scale_up: f64,
    #[serde(default = "default_scale_down")]
    pub mem_scale_down: f64,

    #[serde(default = "default_cpu_floor")]
    pub cpu_floor: f64,
    #[serde(default = "default_cpu_ceiling")]
    pub cpu_ceiling: f64,
    #[serde(default = "default_initial_cpu")]
    pub initial_cpu: f64,

    /// Initial memory limit, also the memory floor
    #[serde(default = "default_initial_memory_mb")]
    pub initial_memory_mb: u64,
    #[serde(default = "default_mem_ceiling_mb")]
    pub mem_ceiling_mb: u64,

    /// Swap allowance as a multiple of the memory limit
    #[serde(default = "default_swap_factor")]
    pub swap_factor: f64,
}

fn default_workload() -> String {
    "nginx-monitored".to_string()
}

fn default_prometheus_url() -> String {
    "http://localhost:9090".to_string()
}

fn default_runtime_url() -> String {
    "http://localhost:2375".to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_poll_interval() -> u64 {
    5
}

fn default_timeout() -> u64 {
    10
}

fn default_cpu_rate_window() -> u64 {
    15
}

fn default_cpu_high() -> f64 {
    80.0
}

fn default_cpu_low_factor() -> f64 {
    0.5
}

fn default_mem_high() -> f64 {
    75.0
}

fn default_mem_low() -> f64 {
    40.0
}

fn default_scale_up() -> f64 {
    1.2
}

fn default_scale_down() -> f64 {
    0.8
}

fn default_cpu_floor() -> f64 {
    1.0
}

fn default_cpu_ceiling() -> f64 {
    4.0
}

fn default_initial_cpu() -> f64 {
    1.0
}

fn default_initial_memory_mb() -> u64 {
    512
}

fn default_mem_ceiling_mb() -> u64 {
    8 * 1024
}

fn default_swap_factor() -> f64 {
    2.0
}

impl ControllerConfig {
    /// Load configuration from an optional file and the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(
            path,
            config::Environment::with_prefix("CONTROLLER").try_parsing(true),
        )
    }

    fn load_with_env(path: Option<&Path>, env: config::Environment) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }

        let config: ControllerConfig = builder
            .add_source(env)
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Failed to parse configuration")?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.workload.trim().is_empty() {
            anyhow::bail!("workload must not be empty");
        }
        for (name, secs) in [
            ("poll_interval_secs", self.poll_interval_secs),
            ("query_timeout_secs", self.query_timeout_secs),
            ("apply_timeout_secs", self.apply_timeout_secs),
            ("cpu_rate_window_secs", self.cpu_rate_window_secs),
        ] {
            if secs == 0 {
                anyhow::bail!("{} must be positive", name);
            }
        }
        if self.swap_factor < 1.0 {
            anyhow::bail!("swap_factor {} must be >= 1", self.swap_factor);
        }
        self.thresholds()
            .validate(&self.initial_limits())
            .context("Invalid scaling thresholds")?;
        Ok(())
    }

    pub fn thresholds(&self) -> ScalingThresholds {
        ScalingThresholds {
            cpu_high: self.cpu_high,
            cpu_low_factor: self.cpu_low_factor,
            mem_high: self.mem_high,
            mem_low: self.mem_low,
            cpu_scale_up: self.cpu_scale_up,
            cpu_scale_down: self.cpu_scale_down,
            mem_scale_up: self.mem_scale_up,
            mem_scale_down: self.mem_scale_down,
            cpu_floor: self.cpu_floor,
            cpu_ceiling: self.cpu_ceiling,
            mem_ceiling_bytes: self.mem_ceiling_mb * BYTES_PER_MB,
        }
    }

    pub fn initial_limits(&self) -> ResourceLimits {
        ResourceLimits::new(self.initial_cpu, self.initial_memory_mb * BYTES_PER_MB)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }

    pub fn apply_timeout(&self) -> Duration {
        Duration::from_secs(self.apply_timeout_secs)
    }

    pub fn loop_config(&self) -> LoopConfig {
        LoopConfig {
            workload: self.workload.clone(),
            interval: Duration::from_secs(self.poll_interval_secs),
            cpu_rate_window: Duration::from_secs(self.cpu_rate_window_secs),
            initial_limits: self.initial_limits(),
            thresholds: self.thresholds(),
        }
    }
}
