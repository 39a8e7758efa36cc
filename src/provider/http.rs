//! HTTP-backed research provider.
//!
//! Talks to a research API over JSON. Failures are mapped onto the
//! [`TaskError`](crate::error::TaskError) taxonomy from the HTTP status
//! so the retry layer can act on them without knowing anything about
//! HTTP.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{PartialSink, ProviderKind, ResearchOperation, ResearchOutput};
use crate::error::{classify_http_status, ErrorKind, TaskError};

/// Research API client.
pub struct HttpResearchProvider {
    client: Client,
    endpoint: String,
    api_key: String,
    kind: ProviderKind,
}

impl HttpResearchProvider {
    /// Create a provider for the given endpoint and variant.
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>, kind: ProviderKind) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            kind,
        }
    }

    /// Build a provider pair from environment variables:
    /// - `DEEPWORK_API_URL` - research API endpoint
    /// - `DEEPWORK_API_KEY` - bearer token
    pub fn from_env(kind: ProviderKind) -> Result<Self, TaskError> {
        let endpoint = std::env::var("DEEPWORK_API_URL")
            .map_err(|_| TaskError::fatal("DEEPWORK_API_URL is not set"))?;
        let api_key = std::env::var("DEEPWORK_API_KEY")
            .map_err(|_| TaskError::fatal("DEEPWORK_API_KEY is not set"))?;
        Ok(Self::new(endpoint, api_key, kind))
    }

    /// Parse Retry-After header if present.
    fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
        headers
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok().map(Duration::from_secs))
    }

    fn error_from_status(
        status: reqwest::StatusCode,
        body: &str,
        retry_after: Option<Duration>,
    ) -> TaskError {
        match classify_http_status(status.as_u16()) {
            ErrorKind::RateLimit => TaskError::rate_limited(body.to_string(), retry_after),
            ErrorKind::Timeout => TaskError::timeout(body.to_string()),
            ErrorKind::Fatal => TaskError::fatal(format!("HTTP {}: {}", status.as_u16(), body)),
            _ => TaskError::unknown(format!("HTTP {}: {}", status.as_u16(), body)),
        }
    }
}

#[async_trait]
impl ResearchOperation for HttpResearchProvider {
    async fn run(&self, query: &str, partials: &PartialSink) -> Result<ResearchOutput, TaskError> {
        let request = ResearchRequest {
            query: query.to_string(),
            mode: self.kind,
        };

        tracing::debug!("Sending research request: mode={}", self.kind);

        let response = match self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                if e.is_timeout() {
                    return Err(TaskError::timeout(format!("Request timeout: {e}")));
                } else if e.is_connect() {
                    return Err(TaskError::unknown(format!("Connection failed: {e}")));
                } else {
                    return Err(TaskError::unknown(format!("Request failed: {e}")));
                }
            }
        };

        let status = response.status();
        let retry_after = Self::parse_retry_after(response.headers());
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(Self::error_from_status(status, &body, retry_after));
        }

        let parsed: ResearchResponse = serde_json::from_str(&body)
            .map_err(|e| TaskError::unknown(format!("Failed to parse response: {e}, body: {body}")))?;

        // Publish what came back so a checkpoint taken after this call
        // still sees it even if a later stage of the task fails.
        partials.set_content(parsed.content.clone());
        for source in &parsed.sources {
            partials.push_source(source.clone());
        }

        Ok(ResearchOutput {
            content: parsed.content,
            sources: parsed.sources,
        })
    }
}

/// Research API request format.
#[derive(Debug, Serialize)]
struct ResearchRequest {
    query: String,
    mode: ProviderKind,
}

/// Research API response format.
#[derive(Debug, Deserialize)]
struct ResearchResponse {
    content: serde_json::Value,
    #[serde(default)]
    sources: Vec<serde_json::Value>,
}
