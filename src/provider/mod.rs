//! Research provider boundary.
//!
//! The execution core only ever sees a provider through the
//! [`ResearchOperation`] trait: one opaque async call that takes a query
//! and either returns output or fails with a classified [`TaskError`].
//! The HTTP-backed implementation lives in `http.rs`; tests use in-crate
//! mock operations.

mod http;

pub use http::HttpResearchProvider;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use crate::error::TaskError;

/// Which provider variant serviced a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Quick, shallow research. Used as the fallback path.
    Fast,
    /// Slow, comprehensive research. The primary path.
    Comprehensive,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderKind::Fast => f.write_str("fast"),
            ProviderKind::Comprehensive => f.write_str("comprehensive"),
        }
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fast" => Ok(ProviderKind::Fast),
            "comprehensive" => Ok(ProviderKind::Comprehensive),
            other => Err(format!("unknown provider '{other}' (expected fast|comprehensive)")),
        }
    }
}

/// Final output of one research call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchOutput {
    /// Provider content, opaque to the execution core.
    pub content: serde_json::Value,
    /// Sources backing the content, also opaque.
    pub sources: Vec<serde_json::Value>,
}

/// Partial results a provider publishes while it works.
///
/// The executor snapshots this at checkpoint milestones; the provider
/// writes into it whenever it has something worth persisting. Both sides
/// only hold the lock long enough to copy data.
#[derive(Debug, Default, Clone)]
pub struct PartialSink {
    inner: Arc<Mutex<PartialState>>,
}

#[derive(Debug, Default, Clone)]
struct PartialState {
    content: Option<serde_json::Value>,
    sources: Vec<serde_json::Value>,
}

impl PartialSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the partial content seen so far.
    pub fn set_content(&self, content: serde_json::Value) {
        if let Ok(mut state) = self.inner.lock() {
            state.content = Some(content);
        }
    }

    /// Append a collected source.
    pub fn push_source(&self, source: serde_json::Value) {
        if let Ok(mut state) = self.inner.lock() {
            state.sources.push(source);
        }
    }

    /// Snapshot the current partials: (content, sources).
    pub fn snapshot(&self) -> (serde_json::Value, Vec<serde_json::Value>) {
        match self.inner.lock() {
            Ok(state) => (
                state.content.clone().unwrap_or(serde_json::Value::Null),
                state.sources.clone(),
            ),
            Err(_) => (serde_json::Value::Null, Vec::new()),
        }
    }
}

/// One opaque research call.
#[async_trait]
pub trait ResearchOperation: Send + Sync {
    /// Execute the query, publishing partials into `partials` as work
    /// progresses. A failure must carry an accurate [`TaskError`]
    /// classification; the retry policy is driven entirely by it.
    async fn run(&self, query: &str, partials: &PartialSink) -> Result<ResearchOutput, TaskError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_kind_parsing() {
        assert_eq!("fast".parse::<ProviderKind>().unwrap(), ProviderKind::Fast);
        assert_eq!(
            "comprehensive".parse::<ProviderKind>().unwrap(),
            ProviderKind::Comprehensive
        );
        assert!("deep".parse::<ProviderKind>().is_err());
    }

    #[test]
    fn test_partial_sink_snapshot() {
        let sink = PartialSink::new();
        let (content, sources) = sink.snapshot();
        assert!(content.is_null());
        assert!(sources.is_empty());

        sink.set_content(serde_json::json!({"draft": "section 1"}));
        sink.push_source(serde_json::json!({"url": "https://example.com/a"}));
        sink.push_source(serde_json::json!({"url": "https://example.com/b"}));

        let (content, sources) = sink.snapshot();
        assert_eq!(content["draft"], "section 1");
        assert_eq!(sources.len(), 2);
    }
}
