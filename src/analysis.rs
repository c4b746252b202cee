//! External analysis of a single unit
//!
//! The pipeline treats analysis as an opaque, fallible call: a unit goes in, a JSON value
//! comes out. [`HttpAnalyzer`] is the production implementation; tests plug in their own
//! [`Analyzer`].

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::{AnalysisConfig, RetryConfig};
use crate::error::{AnalysisError, Error, Result};
use crate::retry::with_retry;
use crate::types::JobId;

/// Longest response body kept in a [`AnalysisError::Rejected`] / `Unavailable` message
const MAX_ERROR_BODY_CHARS: usize = 512;

/// What the analyzer receives for one unit
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRequest {
    /// Owning job
    pub job_id: JobId,
    /// Splitter-assigned unit id
    pub unit_id: String,
    /// 0-based unit index
    pub unit_index: i64,
    /// Scene header or chunk title
    pub title: String,
    /// Unit text
    pub text: String,
}

/// Analysis operation applied to every unit
#[async_trait]
pub trait Analyzer: Send + Sync {
    /// Analyze one unit
    ///
    /// Implementations apply their own retry policy; the pipeline records whatever
    /// error finally comes back on the unit.
    async fn analyze(&self, request: &AnalysisRequest) -> std::result::Result<serde_json::Value, AnalysisError>;

    /// Human-readable name for logging
    fn name(&self) -> &'static str;
}

/// [`Analyzer`] that POSTs each unit as JSON to an HTTP endpoint
pub struct HttpAnalyzer {
    client: reqwest::Client,
    endpoint: String,
    auth_header: Option<String>,
    request_timeout: Duration,
    retry: RetryConfig,
}

impl HttpAnalyzer {
    /// Build from config; `analysis.endpoint` is required
    pub fn new(config: &AnalysisConfig) -> Result<Self> {
        let endpoint = config
            .endpoint
            .as_deref()
            .map(str::trim)
            .filter(|endpoint| !endpoint.is_empty())
            .ok_or_else(|| Error::Config {
                message: "an analysis endpoint is required for the HTTP analyzer".into(),
                key: Some("analysis.endpoint".into()),
            })?
            .to_string();

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("scene-pipeline/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Config {
                message: format!("Failed to create HTTP client: {}", e),
                key: None,
            })?;

        Ok(Self {
            client,
            endpoint,
            auth_header: config.auth_header.clone(),
            request_timeout: config.request_timeout,
            retry: config.retry.clone(),
        })
    }

    async fn call_once(
        &self,
        request: &AnalysisRequest,
    ) -> std::result::Result<serde_json::Value, AnalysisError> {
        let mut builder = self.client.post(&self.endpoint).json(request);
        if let Some(auth) = &self.auth_header {
            builder = builder.header("Authorization", auth);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                AnalysisError::Timeout(self.request_timeout)
            } else {
                AnalysisError::Transport(e)
            }
        })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(AnalysisError::Unavailable(format!(
                "{}: {}",
                status,
                truncate(&body)
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AnalysisError::Rejected {
                status: status.as_u16(),
                body: truncate(&body),
            });
        }

        let body = response.text().await?;
        serde_json::from_str(&body)
            .map_err(|e| AnalysisError::InvalidResponse(format!("{}: {}", e, truncate(&body))))
    }
}

#[async_trait]
impl Analyzer for HttpAnalyzer {
    async fn analyze(
        &self,
        request: &AnalysisRequest,
    ) -> std::result::Result<serde_json::Value, AnalysisError> {
        with_retry(&self.retry, "analyze_unit", || self.call_once(request)).await
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

fn truncate(body: &str) -> String {
    body.chars().take(MAX_ERROR_BODY_CHARS).collect()
}
