//! Component health and readiness
//!
//! The control loop records the outcome of each collaborator call here and
//! the API reports it on `/healthz` and `/readyz`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Ordered from best to worst so the overall status is the maximum
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Last call failed; the loop keeps running and retries next interval
    Degraded,
    Unhealthy,
}

impl ComponentStatus {
    pub fn is_operational(&self) -> bool {
        *self != ComponentStatus::Unhealthy
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Unix seconds of the last status change
    pub updated_at: i64,
}

impl ComponentHealth {
    pub fn new(status: ComponentStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            updated_at: chrono::Utc::now().timestamp(),
        }
    }
}

/// Body of `/healthz`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: HashMap<String, ComponentHealth>,
}

impl HealthResponse {
    fn from_components(components: HashMap<String, ComponentHealth>) -> Self {
        let status = components
            .values()
            .map(|c| c.status)
            .max()
            .unwrap_or(ComponentStatus::Healthy);
        Self { status, components }
    }
}

/// Body of `/readyz`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

pub mod components {
    pub const METRICS_SOURCE: &str = "metrics_source";
    pub const RUNTIME: &str = "runtime";
    pub const CONTROL_LOOP: &str = "control_loop";
}

#[derive(Debug, Default)]
struct Registry {
    components: HashMap<String, ComponentHealth>,
    ready: bool,
}

/// Shared between the control loop and the HTTP API; clones share state
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    inner: Arc<RwLock<Registry>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a component in the healthy state
    pub async fn register(&self, name: &str) {
        self.set(name, ComponentStatus::Healthy, None).await;
    }

    async fn set(&self, name: &str, status: ComponentStatus, message: Option<String>) {
        self.inner
            .write()
            .await
            .components
            .insert(name.to_string(), ComponentHealth::new(status, message));
    }

    pub async fn set_healthy(&self, name: &str) {
        self.set(name, ComponentStatus::Healthy, None).await;
    }

    pub async fn set_degraded(&self, name: &str, message: impl Into<String>) {
        self.set(name, ComponentStatus::Degraded, Some(message.into())).await;
    }

    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        self.set(name, ComponentStatus::Unhealthy, Some(message.into())).await;
    }

    pub async fn set_ready(&self, ready: bool) {
        self.inner.write().await.ready = ready;
    }

    pub async fn health(&self) -> HealthResponse {
        let components = self.inner.read().await.components.clone();
        HealthResponse::from_components(components)
    }

    /// Ready once startup finished and no component is unhealthy
    pub async fn readiness(&self) -> ReadinessResponse {
        let registry = self.inner.read().await;
        let unhealthy = registry
            .components
            .iter()
            .find(|(_, c)| c.status == ComponentStatus::Unhealthy)
            .map(|(name, _)| name.clone());

        let reason = match (registry.ready, unhealthy) {
            (false, _) => Some("Controller not yet initialized".to_string()),
            (true, Some(name)) => Some(format!("Component `{}` unhealthy", name)),
            (true, None) => None,
        };
        ReadinessResponse {
            ready: reason.is_none(),
            reason,
        }
    }
}
