//! Closed-loop resource controller for a single container
//!
//! This crate provides the core functionality for:
//! - Sampling CPU and memory usage from Prometheus
//! - A hysteresis scaling policy over CPU and memory limits
//! - Applying limits through the container runtime API
//! - The control loop tying them together
//! - Health checks, metrics and the status API

pub mod api;
pub mod control;
pub mod error;
pub mod health;
pub mod models;
pub mod observability;
pub mod policy;
pub mod runtime;
pub mod source;

pub use control::{ControlLoop, ControlLoopBuilder, IterationReport, LoopConfig};
pub use error::ControllerError;
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{ControllerMetrics, StructuredLogger};
pub use policy::{decide, Adjustment, Decision, ScalingThresholds};
pub use runtime::{DockerController, ResourceController, RuntimeResources};
pub use source::{MetricsSource, PrometheusSource, WorkloadQueries};
