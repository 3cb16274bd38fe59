//! Per-backend circuit breaker and retry/backoff (§4.7 backend
//! degradation), grounded on the same rate-limit/backoff shape as the
//! LLM batch executor's `RetryConfig`.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::{Error, ErrorKind, Result};

const FAILURE_THRESHOLD: u32 = 5;
const OPEN_DURATION: Duration = Duration::from_secs(30);
const MAX_ATTEMPTS: u32 = 3;
const BASE_DELAY_MS: u64 = 100;
const BACKOFF_FACTOR: f64 = 4.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Closed,
    Open,
    HalfOpen,
}

/// Tracks consecutive failures for one backend and opens the circuit
/// after `FAILURE_THRESHOLD` in a row, for `OPEN_DURATION`.
pub struct CircuitBreaker {
    name: String,
    consecutive_failures: AtomicU32,
    opened_at_millis: AtomicU64,
    state: Mutex<State>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            consecutive_failures: AtomicU32::new(0),
            opened_at_millis: AtomicU64::new(0),
            state: Mutex::new(State::Closed),
        }
    }

    async fn allow(&self) -> bool {
        let mut state = self.state.lock().await;
        match *state {
            State::Closed => true,
            State::Open => {
                let opened_at = self.opened_at_millis.load(Ordering::SeqCst);
                let elapsed_ms = now_millis().saturating_sub(opened_at);
                if elapsed_ms >= OPEN_DURATION.as_millis() as u64 {
                    *state = State::HalfOpen;
                    debug!(backend = %self.name, "circuit breaker half-open, probing");
                    true
                } else {
                    false
                }
            }
            State::HalfOpen => true,
        }
    }

    async fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::SeqCst);
        let mut state = self.state.lock().await;
        *state = State::Closed;
    }

    async fn record_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        let mut state = self.state.lock().await;
        if failures >= FAILURE_THRESHOLD || *state == State::HalfOpen {
            *state = State::Open;
            self.opened_at_millis.store(now_millis(), Ordering::SeqCst);
            warn!(backend = %self.name, failures, "circuit breaker opened");
        }
    }

    pub fn is_open(&self) -> bool {
        // Best-effort, non-blocking snapshot for diagnostics; the
        // authoritative check happens in `allow` under the lock.
        self.consecutive_failures.load(Ordering::SeqCst) >= FAILURE_THRESHOLD
    }
}

fn now_millis() -> u64 {
    // Avoids SystemTime::now() so unit tests stay deterministic w.r.t.
    // wall-clock skew; monotonic Instant is captured once at process
    // start and diffed here.
    static START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();
    let start = *START.get_or_init(Instant::now);
    start.elapsed().as_millis() as u64
}

fn delay_for_attempt(attempt: u32) -> Duration {
    let factor = BACKOFF_FACTOR.max(1.0).powi(attempt as i32);
    Duration::from_millis((BASE_DELAY_MS as f64 * factor).round() as u64)
}

/// Executes `operation` against `breaker`, retrying transient failures
/// up to `MAX_ATTEMPTS` with the 100ms/400ms/1600ms ladder, and short
/// circuiting immediately when the breaker is open. Returns
/// `backend_unavailable` (not a retryable error) when the breaker has
/// tripped, matching §4.7's "degraded backend yields an empty
/// contribution, not a plan failure".
pub async fn call_with_breaker<F, Fut, T>(breaker: &CircuitBreaker, backend_name: &str, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    if !breaker.allow().await {
        return Err(Error::backend_unavailable(backend_name, "circuit breaker open"));
    }

    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => {
                breaker.record_success().await;
                return Ok(value);
            }
            Err(err) => {
                let retryable = err.kind() == ErrorKind::BackendTimeout && attempt + 1 < MAX_ATTEMPTS;
                if !retryable {
                    breaker.record_failure().await;
                    return Err(err);
                }
                debug!(backend = %backend_name, attempt, "retrying backend call after transient failure");
                sleep(delay_for_attempt(attempt)).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32 as Counter;
    use std::sync::Arc;

    #[test]
    fn backoff_ladder_matches_100_400_1600() {
        assert_eq!(delay_for_attempt(0).as_millis(), 100);
        assert_eq!(delay_for_attempt(1).as_millis(), 400);
        assert_eq!(delay_for_attempt(2).as_millis(), 1600);
    }

    #[tokio::test]
    async fn succeeds_without_retry_on_first_try() {
        let breaker = CircuitBreaker::new("vector");
        let result: Result<u32> = call_with_breaker(&breaker, "vector", || async { Ok(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn retries_transient_errors_then_succeeds() {
        let breaker = CircuitBreaker::new("vector");
        let attempts = Arc::new(Counter::new(0));
        let attempts_clone = attempts.clone();
        let result: Result<u32> = call_with_breaker(&breaker, "vector", move || {
            let attempts = attempts_clone.clone();
            async move {
                let count = attempts.fetch_add(1, Ordering::SeqCst);
                if count < 2 {
                    Err(Error::backend_timeout("vector", 500))
                } else {
                    Ok(7)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn opens_after_five_consecutive_failures() {
        let breaker = CircuitBreaker::new("graph");
        for _ in 0..5 {
            let _: Result<u32> =
                call_with_breaker(&breaker, "graph", || async { Err(Error::backend_unavailable("graph", "down")) }).await;
        }
        assert!(breaker.is_open());
        let result: Result<u32> = call_with_breaker(&breaker, "graph", || async { Ok(1) }).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let breaker = CircuitBreaker::new("keyword");
        let attempts = Arc::new(Counter::new(0));
        let attempts_clone = attempts.clone();
        let result: Result<u32> = call_with_breaker(&breaker, "keyword", move || {
            let attempts = attempts_clone.clone();
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(Error::validation("bad query"))
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
