//! Failure isolation for outbound calls
//!
//! Every call to an external collaborator goes through a [`ResilientCaller`],
//! which combines a per-dependency [`CircuitBreaker`], a [`RetryPolicy`] and
//! the run-wide [`TtlCache`].

mod cache;
mod caller;
mod circuit_breaker;
mod retry;

pub use cache::{CacheStats, TtlCache, DEFAULT_CACHE_TTL};
pub use caller::{
    CachedValue, CallOutcome, CallerRegistry, ResilienceConfig, ResilientCaller, SharedCache,
    DEFAULT_CALL_TIMEOUT, DEFAULT_MAX_CONCURRENCY,
};
pub use circuit_breaker::{BreakerSnapshot, CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use retry::{RetryConfig, RetryOutcome, RetryPolicy, RetryPredicate};

/// Dependency names used for breaker and metric labels
pub mod dependencies {
    use crate::models::ResourceType;

    pub const COST_DATA: &str = "cost-data";
    pub const RECOMMENDATIONS: &str = "recommendations";

    pub fn inventory(category: ResourceType) -> String {
        format!("inventory:{}", category)
    }

    pub fn metrics(category: ResourceType) -> String {
        format!("metrics:{}", category)
    }
}
