//! Bounded exponential-backoff retry with jitter
//!
//! Delay after the n-th failed attempt is
//! `min(base_delay * exponential_base^(n-1), max_delay)`, multiplied by a
//! uniform factor from `jitter_range` when jitter is enabled.

use crate::error::CallError;
use rand::Rng;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Retry tuning
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts including the first one (default: 3)
    pub max_attempts: u32,
    /// Delay after the first failure (default: 1 second)
    pub base_delay: Duration,
    /// Cap applied before jitter (default: 60 seconds)
    pub max_delay: Duration,
    /// Growth factor between attempts (default: 2.0)
    pub exponential_base: f64,
    /// Whether to scale delays by a random factor (default: true)
    pub jitter: bool,
    /// Bounds of the jitter factor (default: 0.5..1.5)
    pub jitter_range: (f64, f64),
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            exponential_base: 2.0,
            jitter: true,
            jitter_range: (0.5, 1.5),
        }
    }
}

/// Decides whether a failed attempt is worth repeating
pub type RetryPredicate = Arc<dyn Fn(&CallError) -> bool + Send + Sync>;

/// Result of a retried operation with the number of attempts made
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: Result<T, CallError>,
    pub attempts: u32,
}

/// Wraps a fallible operation with bounded retries
#[derive(Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
    predicate: RetryPredicate,
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("config", &self.config)
            .field("predicate", &"<fn>")
            .finish()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            predicate: Arc::new(CallError::is_retryable),
        }
    }

    /// Replace the retryable-error predicate
    ///
    /// Circuit-open and cancellation errors are never retried whatever the
    /// predicate says.
    pub fn with_predicate<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&CallError) -> bool + Send + Sync + 'static,
    {
        self.predicate = Arc::new(predicate);
        self
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    fn max_attempts(&self) -> u32 {
        self.config.max_attempts.max(1)
    }

    fn should_retry(&self, error: &CallError) -> bool {
        !matches!(error, CallError::Cancelled | CallError::CircuitOpen(_))
            && (self.predicate)(error)
    }

    /// Delay after `attempt` failures, before jitter (1-indexed)
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.config.base_delay.as_secs_f64() * self.config.exponential_base.powi(exponent);
        let capped = secs.min(self.config.max_delay.as_secs_f64());
        Duration::try_from_secs_f64(capped).unwrap_or(self.config.max_delay)
    }

    /// Delay after `attempt` failures with jitter applied
    ///
    /// A jittered delay that does not fit in a `Duration` becomes `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay_for(attempt);
        if !self.config.jitter {
            return base;
        }
        let (low, high) = self.config.jitter_range;
        let factor = if low.is_finite() && high.is_finite() && high > low {
            rand::rng().random_range(low..high)
        } else {
            low
        };
        Duration::try_from_secs_f64(base.as_secs_f64() * factor.max(0.0))
            .unwrap_or(self.config.max_delay)
    }

    fn classify<T>(&self, attempt: u32, error: CallError) -> Option<RetryOutcome<T>> {
        if !self.should_retry(&error) {
            return Some(RetryOutcome {
                result: Err(error),
                attempts: attempt,
            });
        }
        if attempt >= self.max_attempts() {
            return Some(RetryOutcome {
                result: Err(CallError::RetryExhausted {
                    attempts: attempt,
                    last_error: Box::new(error),
                }),
                attempts: attempt,
            });
        }
        None
    }

    /// Run `operation` until it succeeds, fails permanently, or attempts run out
    pub async fn execute<T, F, Fut>(&self, operation: F) -> Result<T, CallError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CallError>>,
    {
        self.run(operation, None).await.result
    }

    /// Like [`execute`](Self::execute) but aborts mid-call or mid-wait on cancellation
    pub async fn execute_cancellable<T, F, Fut>(
        &self,
        operation: F,
        cancel: &CancellationToken,
    ) -> Result<T, CallError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CallError>>,
    {
        self.run(operation, Some(cancel)).await.result
    }

    /// Retry loop reporting how many attempts were made
    pub async fn run<T, F, Fut>(
        &self,
        mut operation: F,
        cancel: Option<&CancellationToken>,
    ) -> RetryOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CallError>>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;

            let result = match cancel {
                Some(token) => tokio::select! {
                    biased;
                    _ = token.cancelled() => Err(CallError::Cancelled),
                    result = operation() => result,
                },
                None => operation().await,
            };

            let error = match result {
                Ok(value) => {
                    return RetryOutcome {
                        result: Ok(value),
                        attempts: attempt,
                    }
                }
                Err(error) => error,
            };

            debug!(
                attempt = attempt,
                max_attempts = self.max_attempts(),
                error = %error,
                "Attempt failed"
            );
            if let Some(outcome) = self.classify(attempt, error) {
                return outcome;
            }

            let delay = self.delay_for(attempt);
            debug!(attempt = attempt, delay_ms = delay.as_millis() as u64, "Backing off");

            match cancel {
                Some(token) => {
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => {
                            return RetryOutcome {
                                result: Err(CallError::Cancelled),
                                attempts: attempt,
                            };
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                None => tokio::time::sleep(delay).await,
            }
        }
    }

    /// Blocking variant for synchronous call sites; sleeps the current thread
    pub fn execute_blocking<T, F>(&self, mut operation: F) -> Result<T, CallError>
    where
        F: FnMut() -> Result<T, CallError>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let error = match operation() {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };
            if let Some(outcome) = self.classify(attempt, error) {
                return outcome.result;
            }
            std::thread::sleep(self.delay_for(attempt));
        }
    }
}
