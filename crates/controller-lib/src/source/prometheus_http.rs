//! Prometheus HTTP API adapter
//!
//! Issues instant queries against `/api/v1/query` and reduces the result to
//! a single scalar.

use super::{async_trait, MetricsSource};
use crate::error::{ControllerError, Result};
use reqwest::Client;
use serde::de::IgnoredAny;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Default round-trip bound for a single query
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Instant-query client for a Prometheus-compatible backend
pub struct PrometheusSource {
    client: Client,
    query_url: Url,
}

impl PrometheusSource {
    /// Build a client for `base_url` (e.g. "http://localhost:9090")
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let mut base = Url::parse(base_url).map_err(|e| {
            ControllerError::InvalidConfig(format!("invalid Prometheus URL `{}`: {}", base_url, e))
        })?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let query_url = base.join("api/v1/query").map_err(|e| {
            ControllerError::InvalidConfig(format!("invalid Prometheus URL `{}`: {}", base_url, e))
        })?;

        let client = Client::builder().timeout(timeout).build().map_err(|e| {
            ControllerError::InvalidConfig(format!("failed to create HTTP client: {}", e))
        })?;

        Ok(Self { client, query_url })
    }

    pub fn query_url(&self) -> &Url {
        &self.query_url
    }
}

#[async_trait]
impl MetricsSource for PrometheusSource {
    async fn query(&self, expression: &str) -> Result<f64> {
        let unavailable = |reason: String| ControllerError::metrics_unavailable(expression, reason);

        let now = (chrono::Utc::now().timestamp_millis() as f64 / 1000.0).to_string();
        let response = self
            .client
            .get(self.query_url.clone())
            .query(&[("query", expression), ("time", now.as_str())])
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    unavailable(format!("request timed out: {}", e))
                } else {
                    unavailable(format!("request failed: {}", e))
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| unavailable(format!("failed to read response: {}", e)))?;

        // Prometheus reports query errors with a JSON body and a 4xx/5xx status
        let parsed: std::result::Result<QueryResponse, _> = serde_json::from_str(&body);
        if !status.is_success() {
            let detail = parsed
                .ok()
                .and_then(|r| r.error)
                .unwrap_or_else(|| body.trim().to_string());
            return Err(unavailable(format!("HTTP {}: {}", status, detail)));
        }

        let parsed = parsed.map_err(|e| unavailable(format!("malformed response: {}", e)))?;
        let value = parsed.into_scalar().map_err(unavailable)?;

        debug!(query = %expression, value = value, "Prometheus query evaluated");
        Ok(value)
    }
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    status: String,
    #[serde(default)]
    data: Option<QueryData>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "resultType", content = "result", rename_all = "lowercase")]
enum QueryData {
    Vector(Vec<VectorSample>),
    Scalar(SamplePair),
    Matrix(IgnoredAny),
    String(IgnoredAny),
}

#[derive(Debug, Deserialize)]
struct VectorSample {
    value: SamplePair,
}

/// `[<unix seconds>, "<value>"]`
#[derive(Debug, Deserialize)]
struct SamplePair(IgnoredAny, String);

impl SamplePair {
    fn parse(&self) -> std::result::Result<f64, String> {
        let value: f64 = self
            .1
            .parse()
            .map_err(|_| format!("unparseable sample value `{}`", self.1))?;
        if !value.is_finite() {
            return Err(format!("non-finite sample value `{}`", self.1));
        }
        Ok(value)
    }
}

impl QueryResponse {
    fn into_scalar(self) -> std::result::Result<f64, String> {
        if self.status != "success" {
            return Err(format!(
                "query status `{}`: {}",
                self.status,
                self.error.unwrap_or_default()
            ));
        }

        match self.data {
            Some(QueryData::Vector(samples)) => match samples.first() {
                Some(sample) => sample.value.parse(),
                None => Ok(0.0),
            },
            Some(QueryData::Scalar(pair)) => pair.parse(),
            // Range and string results carry no instant scalar
            Some(QueryData::Matrix(_)) | Some(QueryData::String(_)) | None => Ok(0.0),
        }
    }
}
