//! HTTP API for health checks, Prometheus metrics and controller status

use crate::health::{ComponentStatus, HealthRegistry};
use crate::models::ControllerStatus;
use crate::observability::ControllerMetrics;
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub metrics: ControllerMetrics,
    pub status: watch::Receiver<ControllerStatus>,
}

impl AppState {
    pub fn new(
        health_registry: HealthRegistry,
        metrics: ControllerMetrics,
        status: watch::Receiver<ControllerStatus>,
    ) -> Self {
        Self {
            health_registry,
            metrics,
            status,
        }
    }
}

/// Returns 200 if healthy or degraded, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy | ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Latest snapshot published by the control loop
async fn status(State(state): State<Arc<AppState>>) -> Json<ControllerStatus> {
    let snapshot = state.status.borrow().clone();
    Json(snapshot)
}

/// Prometheus metrics endpoint
async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let content_type = [("content-type", "text/plain; version=0.0.4; charset=utf-8")];
    match state.metrics.encode() {
        Ok(body) => (StatusCode::OK, content_type, body),
        Err(e) => {
            warn!(error = %e, "Failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, content_type, String::new())
        }
    }
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/status", get(status))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
