//! Recommendation analysis, forecasting and cost allocation

mod allocation;
mod backend;
mod forecast;
mod pipeline;
mod pricing;
mod rules;

pub use allocation::{allocate_by_tag, CostAllocation, UNTAGGED};
pub use backend::RuleBasedBackend;
pub use forecast::{
    forecast, forecast_costs, ForecastConfig, EXPONENTIAL_CONFIDENCE, SEASONAL_CONFIDENCE,
    SEASONAL_MIN_POINTS, SMOOTHING_ALPHA, TOTAL_TARGET,
};
pub use pipeline::{
    AnalysisConfig, AnalysisOutcome, AnalysisPipeline, DegradedBatch, DEFAULT_BATCH_SIZE,
    MAX_BATCH_SIZE, MIN_BATCH_SIZE,
};
pub use pricing::{PriceAdjustment, PricingPipeline};
pub use rules::{derive_priority, derive_risk, BusinessRules, LOW_CONFIDENCE};

use crate::error::CallError;
use crate::models::{Recommendation, Resource};
use async_trait::async_trait;

/// Produces recommendations for a batch of resources
///
/// Implementations may be AI-based or rule-based; the pipeline only relies
/// on recommendations referencing resources of the batch.
#[async_trait]
pub trait RecommendationBackend: Send + Sync {
    async fn analyze_batch(&self, resources: &[Resource]) -> Result<Vec<Recommendation>, CallError>;
}
