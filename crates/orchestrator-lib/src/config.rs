//! Flat, serde-friendly configuration surface
//!
//! [`OrchestratorSettings`] mirrors the keys operators set in a config file
//! or the environment. It is validated once and converted into the typed
//! [`EngineConfig`] the library runs with.

use crate::analysis::{
    AnalysisConfig, ForecastConfig, PriceAdjustment, PricingPipeline, MAX_BATCH_SIZE,
    MIN_BATCH_SIZE,
};
use crate::collector::CollectionConfig;
use crate::engine::EngineConfig;
use crate::error::EngineError;
use crate::models::{Budget, ForecastModel, Money};
use crate::resilience::{CircuitBreakerConfig, ResilienceConfig, RetryConfig};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::time::Duration;

/// Upper bound for every delay or timeout given in seconds
const MAX_SECONDS: u64 = 24 * 3600;
const MAX_ATTEMPTS: u32 = 100;
const MAX_EXPONENTIAL_BASE: f64 = 10.0;
const MAX_JITTER_FACTOR: f64 = 10.0;
const MAX_CACHE_TTL_MINUTES: u64 = 7 * 24 * 60;

/// One budget as written in configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BudgetSettings {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub amount: f64,
    /// Spend known before the first refresh
    #[serde(default)]
    pub spent: f64,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default = "default_thresholds")]
    pub thresholds: Vec<f64>,
}

/// Orchestrator configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorSettings {
    /// Consecutive failures that open a circuit
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    #[serde(default = "default_recovery_timeout_seconds")]
    pub recovery_timeout_seconds: u64,

    /// Trial successes that close a half-open circuit
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay_seconds")]
    pub base_delay_seconds: f64,

    #[serde(default = "default_max_delay_seconds")]
    pub max_delay_seconds: f64,

    #[serde(default = "default_exponential_base")]
    pub exponential_base: f64,

    #[serde(default = "default_true")]
    pub jitter: bool,

    #[serde(default = "default_jitter_min")]
    pub jitter_min: f64,

    #[serde(default = "default_jitter_max")]
    pub jitter_max: f64,

    #[serde(default = "default_cache_ttl_minutes")]
    pub cache_ttl_minutes: u64,

    /// Resources per recommendation call, 10 to 50
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Per-attempt timeout, 0 disables it
    #[serde(default = "default_call_timeout_seconds")]
    pub call_timeout_seconds: u64,

    #[serde(default = "default_max_concurrency")]
    pub max_concurrency_per_dependency: usize,

    #[serde(default = "default_max_inflight_units")]
    pub max_inflight_units: usize,

    #[serde(default = "default_true")]
    pub enrich_metrics: bool,

    #[serde(default = "default_min_monthly_savings")]
    pub min_monthly_savings: f64,

    #[serde(default)]
    pub forecast_model: ForecastModel,

    #[serde(default = "default_forecast_horizon_days")]
    pub forecast_horizon_days: u32,

    #[serde(default = "default_currency")]
    pub currency: String,

    #[serde(default = "default_allocation_tag")]
    pub allocation_tag: String,

    #[serde(default)]
    pub pricing: Vec<PriceAdjustment>,

    #[serde(default)]
    pub budgets: Vec<BudgetSettings>,
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_recovery_timeout_seconds() -> u64 {
    60
}

fn default_success_threshold() -> u32 {
    2
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_seconds() -> f64 {
    1.0
}

fn default_max_delay_seconds() -> f64 {
    60.0
}

fn default_exponential_base() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

fn default_jitter_min() -> f64 {
    0.5
}

fn default_jitter_max() -> f64 {
    1.5
}

fn default_cache_ttl_minutes() -> u64 {
    30
}

fn default_batch_size() -> usize {
    crate::analysis::DEFAULT_BATCH_SIZE
}

fn default_call_timeout_seconds() -> u64 {
    30
}

fn default_max_concurrency() -> usize {
    crate::resilience::DEFAULT_MAX_CONCURRENCY
}

fn default_max_inflight_units() -> usize {
    64
}

fn default_min_monthly_savings() -> f64 {
    10.0
}

fn default_forecast_horizon_days() -> u32 {
    30
}

fn default_currency() -> String {
    "USD".to_string()
}

fn default_allocation_tag() -> String {
    "cost-center".to_string()
}

fn default_thresholds() -> Vec<f64> {
    vec![0.8, 0.9, 1.0]
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            recovery_timeout_seconds: default_recovery_timeout_seconds(),
            success_threshold: default_success_threshold(),
            max_attempts: default_max_attempts(),
            base_delay_seconds: default_base_delay_seconds(),
            max_delay_seconds: default_max_delay_seconds(),
            exponential_base: default_exponential_base(),
            jitter: true,
            jitter_min: default_jitter_min(),
            jitter_max: default_jitter_max(),
            cache_ttl_minutes: default_cache_ttl_minutes(),
            batch_size: default_batch_size(),
            call_timeout_seconds: default_call_timeout_seconds(),
            max_concurrency_per_dependency: default_max_concurrency(),
            max_inflight_units: default_max_inflight_units(),
            enrich_metrics: true,
            min_monthly_savings: default_min_monthly_savings(),
            forecast_model: ForecastModel::default(),
            forecast_horizon_days: default_forecast_horizon_days(),
            currency: default_currency(),
            allocation_tag: default_allocation_tag(),
            pricing: Vec::new(),
            budgets: Vec::new(),
        }
    }
}

fn invalid(message: impl Into<String>) -> EngineError {
    EngineError::InvalidConfig(message.into())
}

fn seconds(key: &str, value: f64) -> Result<Duration, EngineError> {
    Duration::try_from_secs_f64(value).map_err(|e| invalid(format!("{}: {}", key, e)))
}

impl OrchestratorSettings {
    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.failure_threshold == 0 {
            return Err(invalid("failure_threshold must be at least 1"));
        }
        if self.success_threshold == 0 {
            return Err(invalid("success_threshold must be at least 1"));
        }
        if self.max_attempts == 0 || self.max_attempts > MAX_ATTEMPTS {
            return Err(invalid(format!("max_attempts must be between 1 and {}", MAX_ATTEMPTS)));
        }
        let max_seconds = MAX_SECONDS as f64;
        if !(0.0..=max_seconds).contains(&self.base_delay_seconds) {
            return Err(invalid(format!(
                "base_delay_seconds must be between 0 and {}",
                MAX_SECONDS
            )));
        }
        if !(self.base_delay_seconds..=max_seconds).contains(&self.max_delay_seconds) {
            return Err(invalid(format!(
                "max_delay_seconds must be between base_delay_seconds and {}",
                MAX_SECONDS
            )));
        }
        if !(1.0..=MAX_EXPONENTIAL_BASE).contains(&self.exponential_base) {
            return Err(invalid(format!(
                "exponential_base must be between 1.0 and {}",
                MAX_EXPONENTIAL_BASE
            )));
        }
        if !(0.0..=MAX_JITTER_FACTOR).contains(&self.jitter_min)
            || !(0.0..=MAX_JITTER_FACTOR).contains(&self.jitter_max)
            || self.jitter_min > self.jitter_max
        {
            return Err(invalid(format!(
                "jitter range must satisfy 0 <= jitter_min <= jitter_max <= {}",
                MAX_JITTER_FACTOR
            )));
        }
        if self.recovery_timeout_seconds > MAX_SECONDS || self.call_timeout_seconds > MAX_SECONDS {
            return Err(invalid(format!(
                "recovery_timeout_seconds and call_timeout_seconds must not exceed {}",
                MAX_SECONDS
            )));
        }
        if self.cache_ttl_minutes == 0 || self.cache_ttl_minutes > MAX_CACHE_TTL_MINUTES {
            return Err(invalid(format!(
                "cache_ttl_minutes must be between 1 and {}",
                MAX_CACHE_TTL_MINUTES
            )));
        }
        if !(MIN_BATCH_SIZE..=MAX_BATCH_SIZE).contains(&self.batch_size) {
            return Err(invalid(format!(
                "batch_size must be between {} and {}, got {}",
                MIN_BATCH_SIZE, MAX_BATCH_SIZE, self.batch_size
            )));
        }
        if self.max_concurrency_per_dependency == 0 || self.max_inflight_units == 0 {
            return Err(invalid("concurrency limits must be at least 1"));
        }
        if !self.min_monthly_savings.is_finite() || self.min_monthly_savings < 0.0 {
            return Err(invalid("min_monthly_savings must be non-negative"));
        }
        if self.forecast_horizon_days == 0 {
            return Err(invalid("forecast_horizon_days must be at least 1"));
        }
        if self.currency.trim().is_empty() {
            return Err(invalid("currency must not be empty"));
        }
        if self.allocation_tag.trim().is_empty() {
            return Err(invalid("allocation_tag must not be empty"));
        }
        Ok(())
    }

    fn budgets(&self) -> Result<Vec<Budget>, EngineError> {
        self.budgets
            .iter()
            .map(|b| {
                let name = if b.name.is_empty() { b.id.clone() } else { b.name.clone() };
                Budget::new(
                    b.id.clone(),
                    name,
                    Money::new(b.amount, self.currency.clone()),
                    b.start,
                    b.end,
                    b.thresholds.clone(),
                )
                .map(|budget| budget.with_initial_spent(b.spent))
                .map_err(|e| invalid(format!("budget {}: {}", b.id, e)))
            })
            .collect()
    }

    /// Validate and convert into library configuration
    pub fn into_engine_config(self) -> Result<EngineConfig, EngineError> {
        self.validate()?;

        let pricing = PricingPipeline::new(self.pricing.clone())
            .map_err(|e| invalid(format!("pricing: {}", e)))?;
        let budgets = self.budgets()?;

        let resilience = ResilienceConfig {
            breaker: CircuitBreakerConfig {
                failure_threshold: self.failure_threshold,
                recovery_timeout: Duration::from_secs(self.recovery_timeout_seconds),
                success_threshold: self.success_threshold,
            },
            retry: RetryConfig {
                max_attempts: self.max_attempts,
                base_delay: seconds("base_delay_seconds", self.base_delay_seconds)?,
                max_delay: seconds("max_delay_seconds", self.max_delay_seconds)?,
                exponential_base: self.exponential_base,
                jitter: self.jitter,
                jitter_range: (self.jitter_min, self.jitter_max),
            },
            cache_ttl: Duration::from_secs(self.cache_ttl_minutes.saturating_mul(60)),
            call_timeout: (self.call_timeout_seconds > 0)
                .then(|| Duration::from_secs(self.call_timeout_seconds)),
            max_concurrency: self.max_concurrency_per_dependency,
        };

        Ok(EngineConfig {
            resilience,
            collection: CollectionConfig {
                max_inflight_units: self.max_inflight_units,
                enrich_metrics: self.enrich_metrics,
            },
            analysis: AnalysisConfig {
                batch_size: self.batch_size,
                min_monthly_savings: self.min_monthly_savings,
                currency: self.currency,
                forecast: ForecastConfig {
                    model: self.forecast_model,
                    horizon_days: self.forecast_horizon_days,
                },
                allocation_tag: self.allocation_tag,
            },
            pricing,
            budgets,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_surface() {
        let settings: OrchestratorSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings.failure_threshold, 5);
        assert_eq!(settings.recovery_timeout_seconds, 60);
        assert_eq!(settings.max_attempts, 3);
        assert_eq!(settings.base_delay_seconds, 1.0);
        assert_eq!(settings.max_delay_seconds, 60.0);
        assert!(settings.jitter);
        assert_eq!(settings.cache_ttl_minutes, 30);
        assert_eq!(settings.batch_size, 20);
        assert_eq!(settings.forecast_model, ForecastModel::Linear);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_batch_size_out_of_range_rejected() {
        let settings = OrchestratorSettings {
            batch_size: 5,
            ..Default::default()
        };
        assert!(matches!(settings.validate(), Err(EngineError::InvalidConfig(_))));

        let settings = OrchestratorSettings {
            batch_size: 51,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_invalid_jitter_range_rejected() {
        let settings = OrchestratorSettings {
            jitter_min: 1.5,
            jitter_max: 0.5,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_unbounded_values_rejected() {
        let huge_jitter = OrchestratorSettings {
            jitter_min: 1e20,
            jitter_max: 1e20,
            ..Default::default()
        };
        assert!(huge_jitter.validate().is_err());

        let huge_delay = OrchestratorSettings {
            base_delay_seconds: 1e300,
            max_delay_seconds: 1e300,
            ..Default::default()
        };
        assert!(huge_delay.clone().into_engine_config().is_err());

        let huge_ttl = OrchestratorSettings {
            cache_ttl_minutes: u64::MAX,
            ..Default::default()
        };
        assert!(huge_ttl.validate().is_err());

        for settings in [
            OrchestratorSettings {
                exponential_base: 1e10,
                ..Default::default()
            },
            OrchestratorSettings {
                base_delay_seconds: f64::NAN,
                ..Default::default()
            },
            OrchestratorSettings {
                max_attempts: u32::MAX,
                ..Default::default()
            },
            OrchestratorSettings {
                call_timeout_seconds: u64::MAX,
                ..Default::default()
            },
        ] {
            assert!(matches!(settings.validate(), Err(EngineError::InvalidConfig(_))));
        }
    }

    #[test]
    fn test_largest_accepted_values_convert() {
        let settings = OrchestratorSettings {
            max_attempts: MAX_ATTEMPTS,
            base_delay_seconds: MAX_SECONDS as f64,
            max_delay_seconds: MAX_SECONDS as f64,
            exponential_base: MAX_EXPONENTIAL_BASE,
            jitter_min: MAX_JITTER_FACTOR,
            jitter_max: MAX_JITTER_FACTOR,
            cache_ttl_minutes: MAX_CACHE_TTL_MINUTES,
            ..Default::default()
        };
        let config = settings.into_engine_config().unwrap();
        assert_eq!(config.resilience.retry.max_delay, Duration::from_secs(MAX_SECONDS));
        assert_eq!(config.resilience.cache_ttl, Duration::from_secs(7 * 24 * 3600));
    }

    #[test]
    fn test_into_engine_config() {
        let settings: OrchestratorSettings = serde_json::from_value(serde_json::json!({
            "failure_threshold": 3,
            "base_delay_seconds": 0.5,
            "call_timeout_seconds": 0,
            "forecast_model": "seasonal",
            "currency": "EUR",
            "pricing": [
                { "kind": "tax", "rate": 0.2 },
                { "kind": "discount", "percent": 10.0 }
            ],
            "budgets": [{
                "id": "platform",
                "amount": 1000.0,
                "spent": 850.0,
                "start": "2024-01-01T00:00:00Z",
                "end": "2024-02-01T00:00:00Z"
            }]
        }))
        .unwrap();

        let config = settings.into_engine_config().unwrap();
        assert_eq!(config.resilience.breaker.failure_threshold, 3);
        assert_eq!(config.resilience.retry.base_delay, Duration::from_millis(500));
        assert_eq!(config.resilience.call_timeout, None);
        assert_eq!(config.analysis.forecast.model, ForecastModel::Seasonal);
        assert_eq!(config.analysis.currency, "EUR");
        assert!(matches!(config.pricing.steps()[0], PriceAdjustment::Discount { .. }));

        let budget = &config.budgets[0];
        assert_eq!(budget.name(), "platform");
        assert_eq!(budget.allocated().currency, "EUR");
        assert_eq!(budget.thresholds(), &[0.8, 0.9, 1.0]);
        assert!((budget.utilization() - 0.85).abs() < 1e-12);
    }

    #[test]
    fn test_budget_with_inverted_range_rejected() {
        let settings: OrchestratorSettings = serde_json::from_value(serde_json::json!({
            "budgets": [{
                "id": "bad",
                "amount": 10.0,
                "start": "2024-02-01T00:00:00Z",
                "end": "2024-01-01T00:00:00Z"
            }]
        }))
        .unwrap();
        assert!(matches!(
            settings.into_engine_config(),
            Err(EngineError::InvalidConfig(_))
        ));
    }
}
