//! Error kinds surfaced by the controller

use crate::models::ResourceLimits;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ControllerError {
    /// Query failed, timed out, or returned a malformed payload
    #[error("metrics unavailable for query `{query}`: {reason}")]
    MetricsUnavailable { query: String, reason: String },

    /// Runtime rejected or could not perform the resource update
    #[error("failed to apply limits ({limits}) to workload `{workload}`: {reason}")]
    ApplyFailed {
        workload: String,
        limits: ResourceLimits,
        reason: String,
    },

    /// A computed limit fell outside the configured floor/ceiling
    #[error("policy produced out-of-bounds limits ({limits}): {reason}")]
    PolicyViolation {
        limits: ResourceLimits,
        reason: String,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ControllerError {
    pub fn metrics_unavailable(query: impl Into<String>, reason: impl ToString) -> Self {
        Self::MetricsUnavailable {
            query: query.into(),
            reason: reason.to_string(),
        }
    }

    pub fn apply_failed(
        workload: impl Into<String>,
        limits: ResourceLimits,
        reason: impl ToString,
    ) -> Self {
        Self::ApplyFailed {
            workload: workload.into(),
            limits,
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ControllerError>;
