//! Limit Controller - closed-loop CPU/memory limits for one container
//!
//! Samples the workload's usage from Prometheus every few seconds and
//! resizes its limits through the Docker Engine API.

use anyhow::{Context, Result};
use clap::Parser;
use controller_lib::{
    api,
    health::{components, HealthRegistry},
    observability::{ControllerMetrics, StructuredLogger},
    ControlLoopBuilder, DockerController, PrometheusSource,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;

const CONTROLLER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Closed-loop CPU and memory limit controller
#[derive(Parser)]
#[command(name = "limit-controller")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file (TOML, YAML or JSON); CONTROLLER_* variables override it
    #[arg(long, short, env = "LIMIT_CONTROLLER_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    let cli = Cli::parse();

    info!("Starting limit-controller");

    let config = config::ControllerConfig::load(cli.config.as_deref())?;
    info!(
        workload = %config.workload,
        prometheus_url = %config.prometheus_url,
        runtime_url = %config.runtime_url,
        "Controller configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register(components::METRICS_SOURCE).await;
    health_registry.register(components::RUNTIME).await;
    health_registry.register(components::CONTROL_LOOP).await;

    let metrics = ControllerMetrics::new();
    let logger = StructuredLogger::new(&config.workload);

    // Client construction failures are configuration errors and fatal
    let source = PrometheusSource::new(&config.prometheus_url, config.query_timeout())
        .context("Failed to create metrics client")?;
    let mut runtime = DockerController::new(&config.runtime_url, config.apply_timeout())
        .context("Failed to create runtime client")?
        .with_swap_factor(config.swap_factor);
    if let Some(version) = &config.runtime_api_version {
        runtime = runtime.with_api_version(version.as_str());
    }

    let loop_config = config.loop_config();
    let (control_loop, status_rx) = ControlLoopBuilder::new()
        .source(Arc::new(source))
        .controller(Arc::new(runtime))
        .health(health_registry.clone())
        .workload(loop_config.workload)
        .interval(loop_config.interval)
        .cpu_rate_window(loop_config.cpu_rate_window)
        .initial_limits(loop_config.initial_limits)
        .thresholds(loop_config.thresholds)
        .build()?;

    logger.log_startup(
        CONTROLLER_VERSION,
        &config.initial_limits(),
        config.poll_interval_secs,
    );

    let app_state = Arc::new(api::AppState::new(
        health_registry.clone(),
        metrics,
        status_rx,
    ));
    let mut api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);
    let loop_handle = tokio::spawn(control_loop.run(shutdown_rx));

    health_registry.set_ready(true).await;

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for shutdown signal")?;
            logger.log_shutdown("SIGINT received");
        }
        result = &mut api_handle => {
            match result {
                Ok(Err(e)) => error!(error = %e, "API server failed"),
                Err(e) => error!(error = %e, "API server task panicked"),
                Ok(Ok(())) => {}
            }
            logger.log_shutdown("API server stopped");
        }
    }

    // The loop finishes its current iteration before observing the signal
    let _ = shutdown_tx.send(());
    loop_handle.await.context("Control loop task failed")?;
    api_handle.abort();

    info!("Shutting down");
    Ok(())
}
