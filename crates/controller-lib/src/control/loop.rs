//! Control loop
//!
//! Samples usage, asks the policy for new limits, applies them to the
//! runtime and commits them only once the runtime accepts. One iteration
//! always completes before the interval sleep begins, so iterations never
//! overlap and the state needs no locking.

use crate::error::{ControllerError, Result};
use crate::health::{components, HealthRegistry};
use crate::models::{
    ControllerState, ControllerStatus, ResourceLimits, UsageSample, BYTES_PER_MB,
};
use crate::observability::{ControllerMetrics, StructuredLogger};
use crate::policy::{self, Adjustment, Decision, ScalingThresholds};
use crate::runtime::ResourceController;
use crate::source::{MetricsSource, WorkloadQueries, DEFAULT_CPU_RATE_WINDOW};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;
use tracing::{debug, info};

/// Configuration for the control loop
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Name or ID of the monitored container
    pub workload: String,
    /// Pause between iterations (default: 5 seconds)
    pub interval: Duration,
    /// Window of the CPU rate expression (default: 15 seconds)
    pub cpu_rate_window: Duration,
    /// Limits assumed at startup; the memory value is also the memory floor
    pub initial_limits: ResourceLimits,
    pub thresholds: ScalingThresholds,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            workload: "nginx-monitored".to_string(),
            interval: Duration::from_secs(5),
            cpu_rate_window: DEFAULT_CPU_RATE_WINDOW,
            initial_limits: ResourceLimits::new(1.0, 512 * BYTES_PER_MB),
            thresholds: ScalingThresholds::default(),
        }
    }
}

/// What a completed iteration observed and did
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IterationReport {
    pub usage: UsageSample,
    pub decision: Decision,
    /// True when the runtime accepted a limit change this iteration
    pub applied: bool,
}

pub struct ControlLoop {
    queries: WorkloadQueries,
    controller: Arc<dyn ResourceController>,
    thresholds: ScalingThresholds,
    interval: Duration,
    state: ControllerState,
    metrics: ControllerMetrics,
    logger: StructuredLogger,
    health: HealthRegistry,
    status_tx: watch::Sender<ControllerStatus>,
    iterations: u64,
}

impl ControlLoop {
    /// Create a loop and the receiver for its status snapshots
    pub fn new(
        source: Arc<dyn MetricsSource>,
        controller: Arc<dyn ResourceController>,
        config: LoopConfig,
        health: HealthRegistry,
    ) -> (Self, watch::Receiver<ControllerStatus>) {
        let queries = WorkloadQueries::new(source, config.workload.clone())
            .with_cpu_rate_window(config.cpu_rate_window);
        let (status_tx, status_rx) = watch::channel(ControllerStatus::initial(
            config.workload.clone(),
            config.initial_limits,
        ));

        let metrics = ControllerMetrics::new();
        metrics.set_limits(&config.initial_limits);

        let control_loop = Self {
            queries,
            controller,
            thresholds: config.thresholds,
            interval: config.interval,
            state: ControllerState::new(config.initial_limits),
            metrics,
            logger: StructuredLogger::new(config.workload),
            health,
            status_tx,
            iterations: 0,
        };

        (control_loop, status_rx)
    }

    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    pub fn workload(&self) -> &str {
        self.queries.workload()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Subscribe to status snapshots
    pub fn subscribe(&self) -> watch::Receiver<ControllerStatus> {
        self.status_tx.subscribe()
    }

    /// Run until a shutdown signal arrives
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            workload = %self.workload(),
            interval_secs = self.interval.as_secs_f64(),
            "Starting control loop"
        );
        self.health.set_healthy(components::CONTROL_LOOP).await;

        loop {
            // Failures are reported inside tick; a failed cycle still waits
            // the full interval.
            let _ = self.tick().await;

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = shutdown.recv() => {
                    info!("Shutting down control loop");
                    break;
                }
            }
        }

        self.health
            .set_unhealthy(components::CONTROL_LOOP, "control loop stopped")
            .await;
    }

    /// One iteration plus its reporting: metrics, logs, health, status
    pub async fn tick(&mut self) -> Result<IterationReport> {
        let start = Instant::now();
        let result = self.run_iteration().await;
        self.iterations += 1;
        self.metrics.observe_iteration(start.elapsed().as_secs_f64());

        match &result {
            Ok(report) => {
                debug!(
                    applied = report.applied,
                    cpu = report.decision.cpu.as_str(),
                    memory = report.decision.memory.as_str(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Iteration complete"
                );
                // A clean iteration clears degradation left by earlier failures
                self.health.set_healthy(components::RUNTIME).await;
                self.health.set_healthy(components::CONTROL_LOOP).await;
                self.publish(Some(report), None);
            }
            Err(e) => {
                self.logger.log_failure(e);
                self.metrics.inc_error(e);
                match e {
                    ControllerError::MetricsUnavailable { .. } => {
                        self.health
                            .set_degraded(components::METRICS_SOURCE, e.to_string())
                            .await;
                    }
                    ControllerError::ApplyFailed { .. } => {
                        self.health
                            .set_degraded(components::RUNTIME, e.to_string())
                            .await;
                    }
                    ControllerError::PolicyViolation { .. } | ControllerError::InvalidConfig(_) => {
                        self.health
                            .set_degraded(components::CONTROL_LOOP, e.to_string())
                            .await;
                    }
                }
                self.publish(None, Some(e.to_string()));
            }
        }

        result
    }

    /// Sample, decide, apply and commit
    ///
    /// A query failure returns before any state is read for a decision, and
    /// an apply failure leaves the committed limits untouched.
    pub async fn run_iteration(&mut self) -> Result<IterationReport> {
        let current = self.state.limits();

        let cpu_percent_of_limit = self
            .queries
            .cpu_percent_of_limit(current.cpu_cores)
            .await?;
        let memory_used_mb = self.queries.memory_used_mb().await?;
        self.health.set_healthy(components::METRICS_SOURCE).await;

        let usage = UsageSample {
            cpu_percent_of_limit,
            memory_used_mb,
        };
        let decision = policy::decide(
            &usage,
            &current,
            &self.thresholds,
            self.state.initial_memory_bytes(),
        );

        let mut outcome = Ok(false);
        if decision.limits.differs_from(&current) {
            outcome = self.apply(&current, &decision).await;
        }

        let limits = self.state.limits();
        self.logger.log_status(&usage, &limits, decision.memory_usage_percent);
        self.metrics.set_usage(&usage, decision.memory_usage_percent);

        let applied = outcome?;
        Ok(IterationReport {
            usage,
            decision,
            applied,
        })
    }

    async fn apply(&mut self, current: &ResourceLimits, decision: &Decision) -> Result<bool> {
        let proposed = decision.limits;
        policy::check_bounds(
            &proposed,
            &self.thresholds,
            self.state.initial_memory_bytes(),
        )?;

        self.controller.apply(self.queries.workload(), &proposed).await?;

        self.state.commit(proposed);
        self.logger.log_applied(current, &proposed);
        self.metrics.set_limits(&proposed);

        if proposed.cpu_cores != current.cpu_cores && decision.cpu != Adjustment::Hold {
            self.metrics.inc_scale_event("cpu", decision.cpu.as_str());
        }
        if proposed.memory_bytes != current.memory_bytes && decision.memory != Adjustment::Hold {
            self.metrics.inc_scale_event("memory", decision.memory.as_str());
        }

        Ok(true)
    }

    fn publish(&self, report: Option<&IterationReport>, error: Option<String>) {
        let limits = self.state.limits();
        let iterations = self.iterations;
        self.status_tx.send_modify(|status| {
            status.limits = limits;
            status.iterations = iterations;
            if let Some(report) = report {
                status.last_usage = Some(report.usage);
                status.memory_usage_percent = Some(report.decision.memory_usage_percent);
            }
            status.last_error = error;
            status.updated_at = chrono::Utc::now().timestamp();
        });
    }
}

/// Builder for creating the control loop
pub struct ControlLoopBuilder {
    source: Option<Arc<dyn MetricsSource>>,
    controller: Option<Arc<dyn ResourceController>>,
    health: Option<HealthRegistry>,
    config: LoopConfig,
}

impl ControlLoopBuilder {
    pub fn new() -> Self {
        Self {
            source: None,
            controller: None,
            health: None,
            config: LoopConfig::default(),
        }
    }

    pub fn source(mut self, source: Arc<dyn MetricsSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn controller(mut self, controller: Arc<dyn ResourceController>) -> Self {
        self.controller = Some(controller);
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn workload(mut self, workload: impl Into<String>) -> Self {
        self.config.workload = workload.into();
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.config.interval = interval;
        self
    }

    pub fn cpu_rate_window(mut self, window: Duration) -> Self {
        self.config.cpu_rate_window = window;
        self
    }

    pub fn initial_limits(mut self, limits: ResourceLimits) -> Self {
        self.config.initial_limits = limits;
        self
    }

    pub fn thresholds(mut self, thresholds: ScalingThresholds) -> Self {
        self.config.thresholds = thresholds;
        self
    }

    /// Build the loop, validating thresholds against the initial limits
    pub fn build(self) -> anyhow::Result<(ControlLoop, watch::Receiver<ControllerStatus>)> {
        let source = self
            .source
            .ok_or_else(|| anyhow::anyhow!("Metrics source is required"))?;
        let controller = self
            .controller
            .ok_or_else(|| anyhow::anyhow!("Resource controller is required"))?;
        if self.config.workload.is_empty() {
            anyhow::bail!("Workload name is required");
        }
        if self.config.interval.is_zero() {
            anyhow::bail!("Interval must be positive");
        }
        self.config
            .thresholds
            .validate(&self.config.initial_limits)?;

        Ok(ControlLoop::new(
            source,
            controller,
            self.config,
            self.health.unwrap_or_default(),
        ))
    }
}

impl Default for ControlLoopBuilder {
    fn default() -> Self {
        Self::new()
    }
}
