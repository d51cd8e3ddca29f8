//! Scenario tests for the control loop
//!
//! The metrics backend and the runtime are replaced by in-memory mocks so
//! each test can script usage, inject failures, and inspect apply calls.

#[cfg(test)]
mod scenario_tests {
    use crate::control::{ControlLoop, ControlLoopBuilder, LoopConfig};
    use crate::error::{ControllerError, Result};
    use crate::health::{components, ComponentStatus, HealthRegistry};
    use crate::models::{ResourceLimits, BYTES_PER_MB};
    use crate::policy::{Adjustment, ScalingThresholds};
    use crate::runtime::{async_trait, ResourceController};
    use crate::source::MetricsSource;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    const MB: u64 = BYTES_PER_MB;

    /// Serves scripted CPU (cores) and memory (bytes) readings
    struct ScriptedSource {
        cpu_cores_used: Mutex<f64>,
        memory_bytes: Mutex<f64>,
        fail_cpu: AtomicBool,
        fail_memory: AtomicBool,
        queries: AtomicUsize,
    }

    impl ScriptedSource {
        fn new(cpu_cores_used: f64, memory_mb: f64) -> Arc<Self> {
            Arc::new(Self {
                cpu_cores_used: Mutex::new(cpu_cores_used),
                memory_bytes: Mutex::new(memory_mb * MB as f64),
                fail_cpu: AtomicBool::new(false),
                fail_memory: AtomicBool::new(false),
                queries: AtomicUsize::new(0),
            })
        }

        fn set_memory_mb(&self, memory_mb: f64) {
            *self.memory_bytes.lock().unwrap() = memory_mb * MB as f64;
        }
    }

    #[async_trait]
    impl MetricsSource for ScriptedSource {
        async fn query(&self, expression: &str) -> Result<f64> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            if expression.starts_with("rate(") {
                if self.fail_cpu.load(Ordering::SeqCst) {
                    return Err(ControllerError::metrics_unavailable(expression, "timed out"));
                }
                Ok(*self.cpu_cores_used.lock().unwrap())
            } else {
                if self.fail_memory.load(Ordering::SeqCst) {
                    return Err(ControllerError::metrics_unavailable(
                        expression,
                        "connection refused",
                    ));
                }
                Ok(*self.memory_bytes.lock().unwrap())
            }
        }
    }

    /// Records apply calls and optionally rejects them
    struct RecordingController {
        calls: Mutex<Vec<(String, ResourceLimits)>>,
        fail: AtomicBool,
    }

    impl RecordingController {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                fail: AtomicBool::new(false),
            })
        }

        fn calls(&self) -> Vec<(String, ResourceLimits)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ResourceController for RecordingController {
        async fn apply(&self, workload: &str, limits: &ResourceLimits) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push((workload.to_string(), *limits));
            if self.fail.load(Ordering::SeqCst) {
                return Err(ControllerError::apply_failed(
                    workload,
                    *limits,
                    "No such container",
                ));
            }
            Ok(())
        }
    }

    fn build_loop(
        source: Arc<ScriptedSource>,
        controller: Arc<RecordingController>,
        health: HealthRegistry,
    ) -> ControlLoop {
        let (control_loop, _status) = ControlLoopBuilder::new()
            .source(source)
            .controller(controller)
            .health(health)
            .workload("nginx-monitored")
            .interval(Duration::from_millis(10))
            .initial_limits(ResourceLimits::new(1.0, 512 * MB))
            .build()
            .unwrap();
        control_loop
    }

    #[tokio::test]
    async fn test_cpu_scale_up_is_applied_and_committed() {
        // 0.9 cores of a 1.0 core limit = 90%; memory at 50% of 512 MB
        let source = ScriptedSource::new(0.9, 256.0);
        let controller = RecordingController::new();
        let mut control_loop = build_loop(source, controller.clone(), HealthRegistry::new());

        let report = control_loop.run_iteration().await.unwrap();

        assert!(report.applied);
        assert_eq!(report.decision.cpu, Adjustment::Up);
        assert_eq!(report.decision.memory, Adjustment::Hold);
        assert!((report.usage.cpu_percent_of_limit - 90.0).abs() < 1e-9);

        let calls = controller.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "nginx-monitored");
        assert!((calls[0].1.cpu_cores - 1.2).abs() < 1e-9);
        assert_eq!(calls[0].1.memory_bytes, 512 * MB);

        assert_eq!(control_loop.state().limits(), calls[0].1);
    }

    #[tokio::test]
    async fn test_cpu_percentage_follows_the_new_limit() {
        let source = ScriptedSource::new(0.9, 256.0);
        let controller = RecordingController::new();
        let mut control_loop = build_loop(source, controller.clone(), HealthRegistry::new());

        control_loop.run_iteration().await.unwrap();
        // Same raw rate against a 1.2 core limit reads 75%, inside the band
        let report = control_loop.run_iteration().await.unwrap();

        assert!((report.usage.cpu_percent_of_limit - 75.0).abs() < 1e-9);
        assert_eq!(report.decision.cpu, Adjustment::Hold);
        assert!(!report.applied);
        assert_eq!(controller.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_memory_scale_up() {
        // 409.6 MB of 512 MB = 80% > 75%
        let source = ScriptedSource::new(0.6, 409.6);
        let controller = RecordingController::new();
        let mut control_loop = build_loop(source, controller.clone(), HealthRegistry::new());

        let report = control_loop.run_iteration().await.unwrap();

        assert!(report.applied);
        assert_eq!(report.decision.memory, Adjustment::Up);
        let applied = control_loop.state().limits();
        assert_eq!(applied.memory_bytes, (512.0 * MB as f64 * 1.2) as u64);
        assert_eq!(applied.cpu_cores, 1.0);
    }

    #[tokio::test]
    async fn test_floor_reached_makes_no_apply_call() {
        // 30% CPU and 30% memory: both rules fire but both are already at the floor
        let source = ScriptedSource::new(0.3, 153.6);
        let controller = RecordingController::new();
        let mut control_loop = build_loop(source, controller.clone(), HealthRegistry::new());

        let report = control_loop.run_iteration().await.unwrap();

        assert_eq!(report.decision.cpu, Adjustment::Down);
        assert_eq!(report.decision.memory, Adjustment::Down);
        assert!(!report.applied);
        assert!(controller.calls().is_empty());
        assert_eq!(
            control_loop.state().limits(),
            ResourceLimits::new(1.0, 512 * MB)
        );
    }

    #[tokio::test]
    async fn test_cpu_query_failure_is_a_no_op() {
        let source = ScriptedSource::new(0.9, 400.0);
        source.fail_cpu.store(true, Ordering::SeqCst);
        let controller = RecordingController::new();
        let health = HealthRegistry::new();
        let mut control_loop = build_loop(source.clone(), controller.clone(), health);

        let err = control_loop.run_iteration().await.unwrap_err();

        assert!(matches!(err, ControllerError::MetricsUnavailable { .. }));
        assert!(controller.calls().is_empty());
        assert_eq!(
            control_loop.state().limits(),
            ResourceLimits::new(1.0, 512 * MB)
        );
        // The memory query is skipped once the CPU query fails
        assert_eq!(source.queries.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_memory_query_failure_is_a_no_op() {
        let source = ScriptedSource::new(0.9, 400.0);
        source.fail_memory.store(true, Ordering::SeqCst);
        let controller = RecordingController::new();
        let mut control_loop = build_loop(source, controller.clone(), HealthRegistry::new());

        let err = control_loop.run_iteration().await.unwrap_err();

        assert!(matches!(err, ControllerError::MetricsUnavailable { .. }));
        assert!(controller.calls().is_empty());
        assert_eq!(
            control_loop.state().limits(),
            ResourceLimits::new(1.0, 512 * MB)
        );
    }

    #[tokio::test]
    async fn test_apply_failure_keeps_previous_limits() {
        let source = ScriptedSource::new(0.9, 256.0);
        let controller = RecordingController::new();
        controller.fail.store(true, Ordering::SeqCst);
        let mut control_loop = build_loop(source, controller.clone(), HealthRegistry::new());

        let err = control_loop.run_iteration().await.unwrap_err();

        assert!(matches!(err, ControllerError::ApplyFailed { .. }));
        assert_eq!(controller.calls().len(), 1);
        assert_eq!(
            control_loop.state().limits(),
            ResourceLimits::new(1.0, 512 * MB)
        );

        // The next successful apply commits
        controller.fail.store(false, Ordering::SeqCst);
        let report = control_loop.run_iteration().await.unwrap();
        assert!(report.applied);
        assert!((control_loop.state().limits().cpu_cores - 1.2).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_tick_reports_failures_to_health_and_status() {
        let source = ScriptedSource::new(0.9, 256.0);
        source.fail_cpu.store(true, Ordering::SeqCst);
        let controller = RecordingController::new();
        let health = HealthRegistry::new();
        let mut control_loop = build_loop(source.clone(), controller, health.clone());
        let status = control_loop.subscribe();

        assert!(control_loop.tick().await.is_err());

        let snapshot = status.borrow().clone();
        assert_eq!(snapshot.iterations, 1);
        assert!(snapshot.last_error.unwrap().contains("timed out"));
        assert!(snapshot.last_usage.is_none());
        let report = health.health().await;
        assert_eq!(
            report.components[components::METRICS_SOURCE].status,
            ComponentStatus::Degraded
        );

        // Recovery clears the error and marks the source healthy again
        source.fail_cpu.store(false, Ordering::SeqCst);
        control_loop.tick().await.unwrap();

        let snapshot = status.borrow().clone();
        assert_eq!(snapshot.iterations, 2);
        assert!(snapshot.last_error.is_none());
        assert!((snapshot.limits.cpu_cores - 1.2).abs() < 1e-9);
        assert!(snapshot.last_usage.is_some());
        let report = health.health().await;
        assert_eq!(
            report.components[components::METRICS_SOURCE].status,
            ComponentStatus::Healthy
        );
    }

    #[tokio::test]
    async fn test_apply_failure_degrades_runtime_health() {
        let source = ScriptedSource::new(0.9, 256.0);
        let controller = RecordingController::new();
        controller.fail.store(true, Ordering::SeqCst);
        let health = HealthRegistry::new();
        let mut control_loop = build_loop(source, controller, health.clone());

        assert!(control_loop.tick().await.is_err());

        let report = health.health().await;
        assert_eq!(
            report.components[components::RUNTIME].status,
            ComponentStatus::Degraded
        );
    }

    #[tokio::test]
    async fn test_clean_iteration_clears_runtime_degradation() {
        let source = ScriptedSource::new(0.9, 256.0);
        let controller = RecordingController::new();
        controller.fail.store(true, Ordering::SeqCst);
        let health = HealthRegistry::new();
        let mut control_loop = build_loop(source.clone(), controller.clone(), health.clone());

        assert!(control_loop.tick().await.is_err());

        // Usage drops into the band: nothing to apply, nothing failing
        *source.cpu_cores_used.lock().unwrap() = 0.6;
        let report = control_loop.tick().await.unwrap();
        assert!(!report.applied);
        assert_eq!(controller.calls().len(), 1);

        let report = health.health().await;
        assert_eq!(
            report.components[components::RUNTIME].status,
            ComponentStatus::Healthy
        );
        assert_eq!(
            report.components[components::CONTROL_LOOP].status,
            ComponentStatus::Healthy
        );
    }

    #[tokio::test]
    async fn test_run_absorbs_failures_and_stops_on_shutdown() {
        let source = ScriptedSource::new(0.9, 256.0);
        let controller = RecordingController::new();
        controller.fail.store(true, Ordering::SeqCst);
        let health = HealthRegistry::new();
        let control_loop = build_loop(source.clone(), controller.clone(), health.clone());
        let status = control_loop.subscribe();

        let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);
        let handle = tokio::spawn(control_loop.run(shutdown_rx));

        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();

        // Every attempt failed, yet the loop kept iterating
        assert!(controller.calls().len() >= 2);
        assert!(status.borrow().iterations >= 2);
        assert_eq!(status.borrow().limits, ResourceLimits::new(1.0, 512 * MB));

        let report = health.health().await;
        assert_eq!(
            report.components[components::CONTROL_LOOP].status,
            ComponentStatus::Unhealthy
        );
    }

    #[tokio::test]
    async fn test_memory_grows_then_settles() {
        let source = ScriptedSource::new(0.6, 450.0);
        let controller = RecordingController::new();
        let health = HealthRegistry::new();
        let mut control_loop = build_loop(source.clone(), controller.clone(), health);

        // 450 MB is ~88% of 512 MB, then ~73% of 614.4 MB
        control_loop.run_iteration().await.unwrap();
        let report = control_loop.run_iteration().await.unwrap();
        assert_eq!(report.decision.memory, Adjustment::Hold);
        assert_eq!(controller.calls().len(), 1);

        // Usage drops to ~16%: shrink back to the initial floor
        source.set_memory_mb(100.0);
        control_loop.run_iteration().await.unwrap();
        assert_eq!(control_loop.state().limits().memory_bytes, 512 * MB);
    }

    #[test]
    fn test_builder_requires_collaborators() {
        let result = ControlLoopBuilder::new()
            .controller(RecordingController::new())
            .build();
        assert!(result.is_err());

        let result = ControlLoopBuilder::new()
            .source(ScriptedSource::new(0.0, 0.0))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_builder_rejects_invalid_thresholds() {
        let result = ControlLoopBuilder::new()
            .source(ScriptedSource::new(0.0, 0.0))
            .controller(RecordingController::new())
            .thresholds(ScalingThresholds {
                cpu_floor: 5.0,
                ..ScalingThresholds::default()
            })
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_loop_config_default() {
        let config = LoopConfig::default();
        assert_eq!(config.interval, Duration::from_secs(5));
        assert_eq!(config.cpu_rate_window, Duration::from_secs(15));
        assert_eq!(config.initial_limits, ResourceLimits::new(1.0, 512 * MB));
    }
}
