//! Docker Engine API adapter
//!
//! Talks to a daemon exposed over TCP and issues
//! `POST /containers/{id}/update`. Accepts `http://`, `https://` and
//! `tcp://` endpoints (the latter as in `DOCKER_HOST`, spoken as plain
//! HTTP). Unix sockets need a TCP proxy in front of them.

use super::{async_trait, ResourceController, RuntimeResources, DEFAULT_SWAP_FACTOR};
use crate::error::{ControllerError, Result};
use crate::models::ResourceLimits;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

pub const DEFAULT_APPLY_TIMEOUT: Duration = Duration::from_secs(10);

/// Resource updater backed by the Docker Engine HTTP API
pub struct DockerController {
    client: Client,
    base_url: Url,
    api_version: Option<String>,
    swap_factor: f64,
}

impl DockerController {
    /// Create a controller for the daemon at `base_url` (e.g. "http://localhost:2375")
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let invalid = |reason: String| {
            ControllerError::InvalidConfig(format!(
                "invalid runtime URL `{}`: {}",
                base_url, reason
            ))
        };

        // `Url::set_scheme` refuses tcp -> http, so rewrite before parsing
        let normalized = match base_url.strip_prefix("tcp://") {
            Some(rest) => format!("http://{}", rest),
            None => base_url.to_string(),
        };
        let mut base_url = Url::parse(&normalized).map_err(|e| invalid(e.to_string()))?;
        match base_url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(invalid(format!(
                    "unsupported scheme `{}`, expected http, https or tcp",
                    other
                )));
            }
        }
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = Client::builder().timeout(timeout).build().map_err(|e| {
            ControllerError::InvalidConfig(format!("failed to create HTTP client: {}", e))
        })?;

        Ok(Self {
            client,
            base_url,
            api_version: None,
            swap_factor: DEFAULT_SWAP_FACTOR,
        })
    }

    /// Pin the Engine API version, e.g. "v1.43"
    pub fn with_api_version(mut self, version: impl Into<String>) -> Self {
        let version = version.into();
        let version = version.trim_matches('/');
        self.api_version = if version.is_empty() {
            None
        } else if version.starts_with('v') {
            Some(version.to_string())
        } else {
            Some(format!("v{}", version))
        };
        self
    }

    pub fn with_swap_factor(mut self, factor: f64) -> Self {
        self.swap_factor = factor;
        self
    }

    /// Update endpoint for `workload`
    pub fn update_url(&self, workload: &str) -> std::result::Result<Url, url::ParseError> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| url::ParseError::RelativeUrlWithCannotBeABaseBase)?;
            segments.pop_if_empty();
            if let Some(version) = &self.api_version {
                segments.push(version);
            }
            segments.extend(["containers", workload, "update"]);
        }
        Ok(url)
    }
}

#[derive(Debug, Default, Deserialize)]
struct UpdateResponse {
    #[serde(rename = "Warnings", default)]
    warnings: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    message: String,
}

#[async_trait]
impl ResourceController for DockerController {
    async fn apply(&self, workload: &str, limits: &ResourceLimits) -> Result<()> {
        let failed = |reason: String| ControllerError::apply_failed(workload, *limits, reason);

        let url = self
            .update_url(workload)
            .map_err(|e| failed(format!("invalid update URL: {}", e)))?;
        let resources = RuntimeResources::from_limits(limits, self.swap_factor);

        let response = self
            .client
            .post(url)
            .json(&resources)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    failed(format!("request timed out: {}", e))
                } else {
                    failed(format!("request failed: {}", e))
                }
            })?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| e.message)
                .unwrap_or_else(|_| body.trim().to_string());
            return Err(failed(format!("HTTP {}: {}", status, message)));
        }

        let update: UpdateResponse = serde_json::from_str(&body).unwrap_or_default();
        for warning in update.warnings.unwrap_or_default() {
            warn!(workload = %workload, warning = %warning, "Runtime returned a warning");
        }

        info!(
            workload = %workload,
            nano_cpus = resources.nano_cpus,
            memory_bytes = resources.memory,
            memory_swap_bytes = resources.memory_swap,
            "Container resources updated"
        );
        Ok(())
    }
}
