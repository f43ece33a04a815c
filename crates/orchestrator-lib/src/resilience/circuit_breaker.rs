//! Per-dependency circuit breaker
//!
//! Tracks consecutive failures of one external dependency and fails fast
//! once it is known to be unhealthy:
//! - Closed: calls pass through, failures are counted
//! - Open: calls are rejected until `recovery_timeout` has passed since the last failure
//! - HalfOpen: trial calls are admitted; `success_threshold` consecutive
//!   successes close the circuit, any failure reopens it

use crate::error::{CallError, CircuitOpenError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    /// Gauge encoding: 0 closed, 1 half-open, 2 open
    pub fn as_gauge(&self) -> i64 {
        match self {
            CircuitState::Closed => 0,
            CircuitState::HalfOpen => 1,
            CircuitState::Open => 2,
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => f.write_str("closed"),
            CircuitState::Open => f.write_str("open"),
            CircuitState::HalfOpen => f.write_str("half-open"),
        }
    }
}

/// Breaker thresholds
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit (default: 5)
    pub failure_threshold: u32,
    /// Time since the last failure before a trial call is admitted (default: 60 seconds)
    pub recovery_timeout: Duration,
    /// Consecutive trial successes that close the circuit (default: 2)
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            success_threshold: 2,
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    half_open_successes: u32,
    last_failure: Option<Instant>,
    last_error: Option<String>,
    times_opened: u64,
}

/// Point-in-time view of a breaker
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakerSnapshot {
    pub dependency: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub times_opened: u64,
    pub last_error: Option<String>,
}

/// Circuit breaker guarding one dependency, safe to share across workers
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                half_open_successes: 0,
                last_failure: None,
                last_error: None,
                times_opened: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        // Counters stay consistent even if a holder panicked
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.lock().consecutive_failures
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock();
        BreakerSnapshot {
            dependency: self.name.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            times_opened: inner.times_opened,
            last_error: inner.last_error.clone(),
        }
    }

    fn transition(&self, inner: &mut BreakerState, to: CircuitState) {
        let from = inner.state;
        if from == to {
            return;
        }
        inner.state = to;
        match to {
            CircuitState::Open => {
                inner.times_opened += 1;
                inner.half_open_successes = 0;
                warn!(
                    dependency = %self.name,
                    from = %from,
                    to = %to,
                    consecutive_failures = inner.consecutive_failures,
                    recovery_timeout_secs = self.config.recovery_timeout.as_secs(),
                    "Circuit opened"
                );
            }
            CircuitState::HalfOpen => {
                inner.half_open_successes = 0;
                info!(dependency = %self.name, from = %from, to = %to, "Circuit admitting trial calls");
            }
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
                inner.half_open_successes = 0;
                info!(dependency = %self.name, from = %from, to = %to, "Circuit closed");
            }
        }
    }

    /// Admit or reject a call, moving Open to HalfOpen once the timeout has passed
    pub fn try_acquire(&self) -> Result<(), CircuitOpenError> {
        let mut inner = self.lock();
        if inner.state != CircuitState::Open {
            return Ok(());
        }

        let elapsed = inner
            .last_failure
            .map(|at| Instant::now().saturating_duration_since(at))
            .unwrap_or(self.config.recovery_timeout);

        if elapsed >= self.config.recovery_timeout {
            self.transition(&mut inner, CircuitState::HalfOpen);
            return Ok(());
        }

        Err(CircuitOpenError {
            dependency: self.name.clone(),
            failure_count: inner.consecutive_failures,
            retry_after: self.config.recovery_timeout - elapsed,
        })
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => inner.consecutive_failures = 0,
            CircuitState::HalfOpen => {
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.config.success_threshold.max(1) {
                    self.transition(&mut inner, CircuitState::Closed);
                }
            }
            // A call admitted before the circuit opened; the cooldown stands
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self, error: &CallError) {
        let mut inner = self.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        inner.last_failure = Some(Instant::now());
        inner.last_error = Some(error.to_string());

        match inner.state {
            CircuitState::Closed => {
                if inner.consecutive_failures >= self.config.failure_threshold.max(1) {
                    self.transition(&mut inner, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => self.transition(&mut inner, CircuitState::Open),
            CircuitState::Open => {}
        }
    }

    fn record(&self, error: &CallError) {
        if error.counts_as_failure() {
            self.record_failure(error);
        }
    }

    /// Run a synchronous operation through the breaker
    pub fn call<T, F>(&self, operation: F) -> Result<T, CallError>
    where
        F: FnOnce() -> Result<T, CallError>,
    {
        self.try_acquire()?;
        match operation() {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(error) => {
                self.record(&error);
                Err(error)
            }
        }
    }

    /// Run an async operation through the breaker
    pub async fn call_async<T, F, Fut>(&self, operation: F) -> Result<T, CallError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, CallError>>,
    {
        self.try_acquire()?;
        match operation().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(error) => {
                self.record(&error);
                Err(error)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn breaker(threshold: u32, recovery_secs: u64) -> CircuitBreaker {
        CircuitBreaker::new(
            "cost-data",
            CircuitBreakerConfig {
                failure_threshold: threshold,
                recovery_timeout: Duration::from_secs(recovery_secs),
                success_threshold: 2,
            },
        )
    }

    fn fail(b: &CircuitBreaker) {
        let _: Result<(), _> = b.call(|| Err(CallError::transient("boom")));
    }

    fn succeed(b: &CircuitBreaker) {
        let _ = b.call(|| Ok(()));
    }

    #[test]
    fn test_opens_after_exactly_threshold_failures() {
        for threshold in 1..=10 {
            let b = breaker(threshold, 60);
            for _ in 0..threshold - 1 {
                fail(&b);
                assert_eq!(b.state(), CircuitState::Closed);
            }
            fail(&b);
            assert_eq!(b.state(), CircuitState::Open, "threshold {}", threshold);
        }
    }

    #[test]
    fn test_success_resets_failure_counter() {
        for threshold in 2..=10 {
            let b = breaker(threshold, 60);
            for _ in 0..threshold - 1 {
                fail(&b);
            }
            succeed(&b);
            assert_eq!(b.consecutive_failures(), 0);

            for _ in 0..threshold - 1 {
                fail(&b);
            }
            assert_eq!(b.state(), CircuitState::Closed, "threshold {}", threshold);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_circuit_never_invokes_operation() {
        let b = breaker(3, 60);
        for _ in 0..3 {
            fail(&b);
        }

        let calls = AtomicU32::new(0);
        for _ in 0..20 {
            let result: Result<(), _> = b
                .call_async(|| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Ok(()) }
                })
                .await;
            assert!(matches!(result, Err(CallError::CircuitOpen(_))));
            tokio::time::advance(Duration::from_secs(2)).await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(b.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_closes_after_two_successes() {
        let b = breaker(2, 30);
        fail(&b);
        fail(&b);
        assert_eq!(b.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(30)).await;
        succeed(&b);
        assert_eq!(b.state(), CircuitState::HalfOpen);
        succeed(&b);
        assert_eq!(b.state(), CircuitState::Closed);
        assert_eq!(b.consecutive_failures(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens() {
        let b = breaker(1, 30);
        fail(&b);
        tokio::time::advance(Duration::from_secs(31)).await;

        assert!(b.try_acquire().is_ok());
        assert_eq!(b.state(), CircuitState::HalfOpen);
        b.record_failure(&CallError::transient("still down"));
        assert_eq!(b.state(), CircuitState::Open);

        let err = b.try_acquire().unwrap_err();
        assert_eq!(err.dependency, "cost-data");
        assert_eq!(err.retry_after, Duration::from_secs(30));
        assert_eq!(b.snapshot().times_opened, 2);
    }

    #[test]
    fn test_circuit_open_and_cancel_do_not_count() {
        let b = breaker(1, 60);
        let _: Result<(), _> = b.call(|| Err(CallError::Cancelled));
        assert_eq!(b.state(), CircuitState::Closed);

        let _: Result<(), _> = b.call(|| Err(CallError::permanent("forbidden")));
        assert_eq!(b.state(), CircuitState::Open);
        assert_eq!(b.snapshot().last_error.as_deref(), Some("permanent failure: forbidden"));
    }
}
