//! Error taxonomy for research task execution.
//!
//! Every failure coming back from a research provider is classified into
//! one of four kinds, which is what drives the retry policy:
//! - `Timeout` / `Unknown`: retried locally with backoff
//! - `RateLimit`: retried too, honoring Retry-After, but every one is
//!   counted by the circuit breaker; once the circuit opens the only
//!   recovery is falling back to an alternate provider
//! - `Fatal`: never retried, surfaced verbatim

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Classification of a task failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The operation exceeded its time ceiling. Retryable.
    Timeout,
    /// The provider rejected the call due to rate limiting. Retryable
    /// while the circuit breaker for the operation class stays closed.
    RateLimit,
    /// Malformed request, invalid credentials, or another error that
    /// retrying cannot fix. Propagated immediately.
    Fatal,
    /// Anything unclassified. Treated conservatively as retryable.
    Unknown,
    /// The circuit breaker for this operation class is open. Bypasses
    /// further retries; callers must fall back to another provider.
    CircuitOpen,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::Timeout => "timeout",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::Fatal => "fatal",
            ErrorKind::Unknown => "unknown",
            ErrorKind::CircuitOpen => "circuit_open",
        };
        f.write_str(s)
    }
}

/// A classified task failure with enough context for the caller to act.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct TaskError {
    pub kind: ErrorKind,
    pub message: String,
    /// Provider-suggested backoff, when it sent a Retry-After header.
    pub retry_after: Option<Duration>,
}

impl TaskError {
    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Timeout,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn rate_limited(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self {
            kind: ErrorKind::RateLimit,
            message: message.into(),
            retry_after,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Fatal,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Unknown,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn circuit_open(operation_class: &str) -> Self {
        Self {
            kind: ErrorKind::CircuitOpen,
            message: format!("circuit breaker open for operation class '{operation_class}'"),
            retry_after: None,
        }
    }

    /// Whether the retry loop may attempt this operation again against
    /// the same provider. Rate limits count as retryable; the circuit
    /// breaker decides when they stop being so.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::Timeout | ErrorKind::Unknown | ErrorKind::RateLimit
        )
    }

    /// One-line suggested recovery action for operator-facing output.
    pub fn recovery_hint(&self) -> &'static str {
        match self.kind {
            ErrorKind::Timeout => "retry, or raise the estimated duration for this task",
            ErrorKind::RateLimit => "wait for the provider's rate window, or switch provider",
            ErrorKind::Fatal => "fix the request or credentials before re-running",
            ErrorKind::Unknown => "retry; inspect provider logs if it persists",
            ErrorKind::CircuitOpen => "use the fallback provider, or reset the breaker",
        }
    }
}

/// Map an HTTP status code to an error kind.
///
/// 408 and 504 are timeouts, 429 is rate limiting, other 4xx are fatal
/// (the request itself is wrong), and 5xx are transient server trouble.
pub fn classify_http_status(status: u16) -> ErrorKind {
    match status {
        408 | 504 => ErrorKind::Timeout,
        429 => ErrorKind::RateLimit,
        400..=499 => ErrorKind::Fatal,
        500..=599 => ErrorKind::Unknown,
        _ => ErrorKind::Unknown,
    }
}
