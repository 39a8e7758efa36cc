//! Retry with exponential backoff, and rate-limit circuit breaking.
//!
//! Timeouts and unknown failures are retried locally with jittered
//! backoff. Rate limits are retried too, honoring the provider's
//! `Retry-After` when it sent one, but every one is also counted by a
//! circuit breaker shared across every executor of the same operation
//! class; once the breaker opens the only recovery is switching
//! provider.

use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::error::{ErrorKind, TaskError};

/// Consecutive rate-limit failures that open the breaker.
pub const OPEN_THRESHOLD: u32 = 3;

#[derive(Debug, Default)]
struct BreakerState {
    consecutive_failures: u32,
    open: bool,
}

/// Shared failure-rate state for one operation class.
///
/// Constructed once per class (e.g. "comprehensive provider calls") and
/// handed by `Arc` into every executor of that class; never a
/// module-level global. An open breaker stays open until an operator
/// calls [`reset`](Self::reset) - there is no automatic half-open
/// transition.
#[derive(Debug)]
pub struct CircuitBreaker {
    operation_class: String,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(operation_class: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            operation_class: operation_class.into(),
            state: Mutex::new(BreakerState::default()),
        })
    }

    pub fn operation_class(&self) -> &str {
        &self.operation_class
    }

    /// Error out if the circuit is open, before any network attempt.
    pub async fn check(&self) -> Result<(), TaskError> {
        let state = self.state.lock().await;
        if state.open {
            Err(TaskError::circuit_open(&self.operation_class))
        } else {
            Ok(())
        }
    }

    pub async fn is_open(&self) -> bool {
        self.state.lock().await.open
    }

    /// Record a rate-limit failure; returns true when this one opened
    /// the circuit.
    pub async fn record_rate_limit(&self) -> bool {
        let mut state = self.state.lock().await;
        state.consecutive_failures += 1;
        if !state.open && state.consecutive_failures >= OPEN_THRESHOLD {
            state.open = true;
            tracing::warn!(
                "Circuit breaker opened for '{}' after {} consecutive rate limits",
                self.operation_class,
                state.consecutive_failures
            );
        }
        state.open
    }

    /// A success resets the consecutive count. It does not close an
    /// open circuit; only an explicit reset does.
    pub async fn record_success(&self) {
        self.state.lock().await.consecutive_failures = 0;
    }

    /// Operator-driven close. Clears the count and the open flag.
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        state.consecutive_failures = 0;
        state.open = false;
        tracing::info!("Circuit breaker reset for '{}'", self.operation_class);
    }
}

/// Exponential backoff without jitter: `base * 2^attempt`.
pub fn backoff_base(base_delay: Duration, attempt: u32) -> Duration {
    base_delay.saturating_mul(2u32.saturating_pow(attempt))
}

/// Full backoff delay: exponential base plus up to one second of
/// uniform jitter.
pub fn backoff_delay(base_delay: Duration, attempt: u32) -> Duration {
    let jitter = Duration::from_secs_f64(rand::thread_rng().gen::<f64>());
    backoff_base(base_delay, attempt) + jitter
}

/// Drives retries for one operation class, consulting the shared
/// circuit breaker on every attempt.
pub struct RetryController {
    breaker: Arc<CircuitBreaker>,
}

impl RetryController {
    pub fn new(breaker: Arc<CircuitBreaker>) -> Self {
        Self { breaker }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Run `operation` with backoff-and-retry semantics.
    ///
    /// - `Fatal` and `CircuitOpen` propagate immediately.
    /// - `Timeout` / `Unknown` are retried up to `max_retries` times,
    ///   sleeping `base_delay * 2^attempt + U(0,1)s` between attempts;
    ///   `on_retry(attempt, max_retries, delay, error)` fires before
    ///   each sleep so the caller can surface a retry message.
    /// - `RateLimit` feeds the breaker on every occurrence and is
    ///   retried like a timeout, except the sleep honors the error's
    ///   `retry_after` when the provider sent one. Once the breaker
    ///   opens the call returns a circuit-open error so the caller can
    ///   fall back.
    pub async fn retry_with_backoff<T, F, Fut, C>(
        &self,
        mut operation: F,
        max_retries: u32,
        base_delay: Duration,
        mut on_retry: C,
    ) -> Result<T, TaskError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TaskError>>,
        C: FnMut(u32, u32, Duration, &TaskError),
    {
        let mut attempt = 0u32;

        loop {
            // An open breaker short-circuits before any network attempt.
            self.breaker.check().await?;

            let error = match operation().await {
                Ok(value) => {
                    self.breaker.record_success().await;
                    return Ok(value);
                }
                Err(e) => e,
            };

            match error.kind {
                ErrorKind::Fatal | ErrorKind::CircuitOpen => return Err(error),
                ErrorKind::RateLimit => {
                    let opened = self.breaker.record_rate_limit().await;
                    if opened {
                        return Err(TaskError::circuit_open(&self.breaker.operation_class));
                    }
                    if attempt >= max_retries {
                        tracing::error!(
                            "Operation still rate limited after {} retries: {}",
                            max_retries,
                            error
                        );
                        return Err(error);
                    }

                    let delay = error
                        .retry_after
                        .unwrap_or_else(|| backoff_delay(base_delay, attempt));
                    on_retry(attempt, max_retries, delay, &error);
                    tracing::warn!(
                        "Attempt {} rate limited, retrying in {:?}: {}",
                        attempt + 1,
                        delay,
                        error.message
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                ErrorKind::Timeout | ErrorKind::Unknown => {
                    if attempt >= max_retries {
                        tracing::error!(
                            "Operation failed after {} retries: {}",
                            max_retries,
                            error
                        );
                        return Err(error);
                    }

                    let delay = backoff_delay(base_delay, attempt);
                    on_retry(attempt, max_retries, delay, &error);
                    tracing::warn!(
                        "Attempt {} failed with {}, retrying in {:?}: {}",
                        attempt + 1,
                        error.kind,
                        delay,
                        error.message
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_backoff_base_doubles_and_is_strictly_increasing() {
        let base = Duration::from_secs(2);
        let mut previous = Duration::ZERO;
        for attempt in 0..6 {
            let d = backoff_base(base, attempt);
            assert_eq!(d, Duration::from_secs(2 * 2u64.pow(attempt)));
            assert!(d > previous);
            previous = d;
        }
    }

    #[test]
    fn test_backoff_jitter_stays_under_one_second() {
        let base = Duration::from_secs(1);
        for attempt in 0..4 {
            let floor = backoff_base(base, attempt);
            for _ in 0..20 {
                let d = backoff_delay(base, attempt);
                assert!(d >= floor);
                assert!(d < floor + Duration::from_secs(1));
            }
        }
    }

    #[tokio::test]
    async fn test_fatal_is_not_retried() {
        let controller = RetryController::new(CircuitBreaker::new("test"));
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = controller
            .retry_with_backoff(
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(TaskError::fatal("bad request")) }
                },
                5,
                Duration::from_millis(1),
                |_, _, _, _| {},
            )
            .await;

        assert_eq!(result.unwrap_err().kind, ErrorKind::Fatal);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout_retried_until_exhausted() {
        let controller = RetryController::new(CircuitBreaker::new("test"));
        let calls = AtomicU32::new(0);
        let mut retry_messages = Vec::new();

        let result: Result<(), _> = controller
            .retry_with_backoff(
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(TaskError::timeout("deadline exceeded")) }
                },
                2,
                Duration::from_millis(1),
                |attempt, max, delay, err| {
                    retry_messages.push((attempt, max, delay, err.kind));
                },
            )
            .await;

        assert_eq!(result.unwrap_err().kind, ErrorKind::Timeout);
        // Initial call plus two retries.
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(retry_messages.len(), 2);
        assert_eq!(retry_messages[0].0, 0);
        assert_eq!(retry_messages[1].0, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_retried_and_eventual_success_resets_count() {
        let breaker = CircuitBreaker::new("test");
        let controller = RetryController::new(Arc::clone(&breaker));
        let calls = AtomicU32::new(0);

        // Two rate limits, then a success, all within one call.
        let ok: Result<u32, _> = controller
            .retry_with_backoff(
                || {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if n < 2 {
                            Err(TaskError::rate_limited("429", None))
                        } else {
                            Ok(7)
                        }
                    }
                },
                5,
                Duration::from_millis(1),
                |_, _, _, _| {},
            )
            .await;
        assert_eq!(ok.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(!breaker.is_open().await);

        // The success reset the count: two more rate limits still do
        // not open the breaker.
        for _ in 0..2 {
            breaker.record_rate_limit().await;
        }
        assert!(!breaker.is_open().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_sleeps_retry_after_before_next_attempt() {
        let controller = RetryController::new(CircuitBreaker::new("test"));
        let calls = AtomicU32::new(0);
        let started = tokio::time::Instant::now();

        let ok: Result<u32, _> = controller
            .retry_with_backoff(
                || {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if n == 0 {
                            Err(TaskError::rate_limited(
                                "429",
                                Some(Duration::from_secs(30)),
                            ))
                        } else {
                            Ok(1)
                        }
                    }
                },
                3,
                Duration::from_secs(2),
                |_, _, _, _| {},
            )
            .await;

        assert_eq!(ok.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        // Retry-After (30s) replaces the backoff delay entirely.
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(30));
        assert!(waited < Duration::from_secs(31));
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_opens_after_three_rate_limits_and_short_circuits() {
        let breaker = CircuitBreaker::new("provider-b");
        let controller = RetryController::new(Arc::clone(&breaker));
        let calls = AtomicU32::new(0);

        // Persistently rate limited: the third consecutive failure
        // opens the breaker, which cuts the retry loop short even
        // though max_retries would allow more attempts.
        let result: Result<(), _> = controller
            .retry_with_backoff(
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(TaskError::rate_limited("429", None)) }
                },
                5,
                Duration::from_millis(1),
                |_, _, _, _| {},
            )
            .await;
        assert_eq!(result.unwrap_err().kind, ErrorKind::CircuitOpen);
        assert!(breaker.is_open().await);
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        // Next call: no network attempt at all.
        let result: Result<(), _> = controller
            .retry_with_backoff(
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(TaskError::rate_limited("429", None)) }
                },
                5,
                Duration::from_millis(1),
                |_, _, _, _| {},
            )
            .await;
        assert_eq!(result.unwrap_err().kind, ErrorKind::CircuitOpen);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_success_does_not_close_open_breaker() {
        let breaker = CircuitBreaker::new("test");
        for _ in 0..3 {
            breaker.record_rate_limit().await;
        }
        assert!(breaker.is_open().await);

        breaker.record_success().await;
        assert!(breaker.is_open().await);

        breaker.reset().await;
        assert!(!breaker.is_open().await);
    }
}
