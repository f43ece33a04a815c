//! Composition of breaker, retry and cache for every outbound call
//!
//! `call = retry(breaker(timeout(operation)))`, with an optional cache
//! lookup in front for idempotent reads. A cache hit short-circuits both
//! retry and breaker.

use super::{
    BreakerSnapshot, CircuitBreaker, CircuitBreakerConfig, CircuitState, RetryConfig,
    RetryPolicy, TtlCache, DEFAULT_CACHE_TTL,
};
use crate::error::CallError;
use crate::observability::OrchestratorMetrics;
use dashmap::DashMap;
use std::any::Any;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, debug_span, Instrument};

/// Type-erased cache value so one cache serves every dependency
pub type CachedValue = Arc<dyn Any + Send + Sync>;

/// The single cache shared by all callers of a run
pub type SharedCache = TtlCache<String, CachedValue>;

/// Default per-attempt timeout
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Default concurrent in-flight calls per dependency
pub const DEFAULT_MAX_CONCURRENCY: usize = 8;

/// Resilience settings applied to every dependency
#[derive(Debug, Clone)]
pub struct ResilienceConfig {
    pub breaker: CircuitBreakerConfig,
    pub retry: RetryConfig,
    /// TTL of the shared cache (default: 30 minutes)
    pub cache_ttl: Duration,
    /// Per-attempt timeout, `None` to wait indefinitely (default: 30 seconds)
    pub call_timeout: Option<Duration>,
    /// Concurrent in-flight calls per dependency (default: 8)
    pub max_concurrency: usize,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            breaker: CircuitBreakerConfig::default(),
            retry: RetryConfig::default(),
            cache_ttl: DEFAULT_CACHE_TTL,
            call_timeout: Some(DEFAULT_CALL_TIMEOUT),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }
}

/// Result of a resilient call with bookkeeping for failure ledgers
#[derive(Debug)]
pub struct CallOutcome<T> {
    pub result: Result<T, CallError>,
    /// Attempts made; 0 on a cache hit
    pub attempts: u32,
    pub cache_hit: bool,
}

/// Call-site wrapper for one dependency
#[derive(Debug)]
pub struct ResilientCaller {
    dependency: String,
    breaker: CircuitBreaker,
    retry: RetryPolicy,
    cache: Option<Arc<SharedCache>>,
    permits: Semaphore,
    call_timeout: Option<Duration>,
    metrics: OrchestratorMetrics,
}

impl ResilientCaller {
    pub fn new(
        dependency: impl Into<String>,
        config: &ResilienceConfig,
        cache: Option<Arc<SharedCache>>,
        metrics: OrchestratorMetrics,
    ) -> Self {
        let dependency = dependency.into();
        Self {
            breaker: CircuitBreaker::new(dependency.clone(), config.breaker.clone()),
            retry: RetryPolicy::new(config.retry.clone()),
            cache,
            permits: Semaphore::new(config.max_concurrency.max(1)),
            call_timeout: config.call_timeout,
            metrics,
            dependency,
        }
    }

    pub fn dependency(&self) -> &str {
        &self.dependency
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn state(&self) -> CircuitState {
        self.breaker.state()
    }

    /// One attempt: concurrency permit, breaker bookkeeping, timeout
    async fn attempt<T, Fut>(&self, fut: Fut) -> Result<T, CallError>
    where
        Fut: Future<Output = Result<T, CallError>>,
    {
        let started = Instant::now();
        let timeout = self.call_timeout;
        let permits = &self.permits;

        let result = self
            .breaker
            .call_async(|| async move {
                let _permit = permits.acquire().await.map_err(|_| CallError::Cancelled)?;
                match timeout {
                    Some(limit) => tokio::time::timeout(limit, fut)
                        .await
                        .unwrap_or(Err(CallError::Timeout(limit))),
                    None => fut.await,
                }
            })
            .await;

        self.metrics
            .observe_call(&self.dependency, started.elapsed(), &result);
        self.metrics
            .set_circuit_state(&self.dependency, self.breaker.state());
        result
    }

    /// Run an operation with retry, breaker and timeout
    ///
    /// The operation should do its work inside the returned future; the
    /// future is dropped unpolled when the breaker rejects the attempt.
    pub async fn call<T, F, Fut>(&self, operation: F, cancel: &CancellationToken) -> Result<T, CallError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CallError>>,
    {
        self.call_tracked(operation, cancel).await.result
    }

    /// Like [`call`](Self::call) but reports attempts for failure ledgers
    pub async fn call_tracked<T, F, Fut>(
        &self,
        mut operation: F,
        cancel: &CancellationToken,
    ) -> CallOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CallError>>,
    {
        let span = debug_span!("outbound_call", dependency = %self.dependency);
        let outcome = self
            .retry
            .run(|| self.attempt(operation()), Some(cancel))
            .instrument(span)
            .await;

        self.metrics
            .add_retries(&self.dependency, outcome.attempts.saturating_sub(1));
        if let Err(e) = &outcome.result {
            debug!(
                dependency = %self.dependency,
                attempts = outcome.attempts,
                error = %e,
                "Outbound call failed"
            );
        }

        CallOutcome {
            result: outcome.result,
            attempts: outcome.attempts,
            cache_hit: false,
        }
    }

    /// Idempotent read served from the shared cache when fresh
    pub async fn call_cached<T, F, Fut>(
        &self,
        key: &str,
        operation: F,
        cancel: &CancellationToken,
    ) -> CallOutcome<T>
    where
        T: Clone + Send + Sync + 'static,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CallError>>,
    {
        let cache_key = format!("{}:{}", self.dependency, key);

        if let Some(cache) = &self.cache {
            let hit = cache
                .get(&cache_key)
                .and_then(|value| value.downcast::<T>().ok());
            if let Some(value) = hit {
                self.metrics.inc_cache_hit();
                debug!(dependency = %self.dependency, key = %key, "Cache hit");
                return CallOutcome {
                    result: Ok(T::clone(&value)),
                    attempts: 0,
                    cache_hit: true,
                };
            }
            self.metrics.inc_cache_miss();
        }

        let outcome = self.call_tracked(operation, cancel).await;
        if let (Some(cache), Ok(value)) = (&self.cache, &outcome.result) {
            let erased: CachedValue = Arc::new(value.clone());
            cache.set(cache_key, erased);
        }
        outcome
    }
}

/// Lazily creates one caller, and therefore one breaker, per dependency
#[derive(Debug)]
pub struct CallerRegistry {
    config: ResilienceConfig,
    cache: Arc<SharedCache>,
    callers: DashMap<String, Arc<ResilientCaller>>,
    metrics: OrchestratorMetrics,
}

impl CallerRegistry {
    pub fn new(config: ResilienceConfig, metrics: OrchestratorMetrics) -> Self {
        Self {
            cache: Arc::new(TtlCache::new(config.cache_ttl)),
            config,
            callers: DashMap::new(),
            metrics,
        }
    }

    pub fn config(&self) -> &ResilienceConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<SharedCache> {
        &self.cache
    }

    /// Caller for `dependency`, created on first use
    pub fn caller(&self, dependency: &str) -> Arc<ResilientCaller> {
        if let Some(existing) = self.callers.get(dependency) {
            return existing.clone();
        }
        self.callers
            .entry(dependency.to_string())
            .or_insert_with(|| {
                Arc::new(ResilientCaller::new(
                    dependency,
                    &self.config,
                    Some(self.cache.clone()),
                    self.metrics.clone(),
                ))
            })
            .clone()
    }

    /// Breaker state of every dependency used so far, sorted by name
    pub fn snapshots(&self) -> Vec<BreakerSnapshot> {
        let mut snapshots: Vec<BreakerSnapshot> = self
            .callers
            .iter()
            .map(|entry| entry.value().breaker().snapshot())
            .collect();
        snapshots.sort_by(|a, b| a.dependency.cmp(&b.dependency));
        snapshots
    }
}
