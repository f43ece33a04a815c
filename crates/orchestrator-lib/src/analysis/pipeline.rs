//! Batched recommendation analysis with graceful degradation
//!
//! Resources are split into fixed-size batches, each analyzed through the
//! `recommendations` caller. A batch that still fails after retries, or is
//! unfinished when the run stops, yields manual-review placeholders for its
//! resources instead of failing the analysis.

use super::allocation::{allocate_by_tag, CostAllocation};
use super::forecast::{forecast_costs, ForecastConfig};
use super::rules::BusinessRules;
use super::{PricingPipeline, RecommendationBackend};
use crate::context::RunContext;
use crate::error::ErrorKind;
use crate::models::{CostData, CostForecast, Money, Recommendation, Resource};
use crate::observability::OrchestratorMetrics;
use crate::resilience::{dependencies, CallerRegistry};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

pub const DEFAULT_BATCH_SIZE: usize = 20;
pub const MIN_BATCH_SIZE: usize = 10;
pub const MAX_BATCH_SIZE: usize = 50;

/// Configuration for the analysis pipeline
#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    /// Resources per backend call (default: 20)
    pub batch_size: usize,
    /// Savings below this keep priority low (default: 10.0)
    pub min_monthly_savings: f64,
    /// Currency of savings and allocations (default: USD)
    pub currency: String,
    pub forecast: ForecastConfig,
    /// Tag whose value groups cost allocations (default: cost-center)
    pub allocation_tag: String,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            min_monthly_savings: 10.0,
            currency: "USD".to_string(),
            forecast: ForecastConfig::default(),
            allocation_tag: "cost-center".to_string(),
        }
    }
}

/// A batch whose resources fell back to manual review
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DegradedBatch {
    pub index: usize,
    pub resource_ids: Vec<String>,
    pub error_kind: ErrorKind,
    pub error: String,
}

#[derive(Debug, Clone, Default)]
pub struct AnalysisOutcome {
    /// Exactly one per analyzed resource, in input order
    pub recommendations: Vec<Recommendation>,
    pub degraded_batches: Vec<DegradedBatch>,
}

pub struct AnalysisPipeline {
    backend: Arc<dyn RecommendationBackend>,
    callers: Arc<CallerRegistry>,
    config: AnalysisConfig,
    rules: BusinessRules,
    pricing: PricingPipeline,
    telemetry: OrchestratorMetrics,
}

impl AnalysisPipeline {
    pub fn new(
        backend: Arc<dyn RecommendationBackend>,
        callers: Arc<CallerRegistry>,
        config: AnalysisConfig,
        pricing: PricingPipeline,
    ) -> Self {
        Self {
            rules: BusinessRules::new(config.min_monthly_savings),
            backend,
            callers,
            config,
            pricing,
            telemetry: OrchestratorMetrics::new(),
        }
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn pricing(&self) -> &PricingPipeline {
        &self.pricing
    }

    /// Recommend an action for every resource
    pub async fn analyze(&self, resources: &[Resource], ctx: &RunContext) -> AnalysisOutcome {
        let batches: Vec<Arc<Vec<Resource>>> = resources
            .chunks(self.config.batch_size.max(1))
            .map(|chunk| Arc::new(chunk.to_vec()))
            .collect();
        let caller = self.callers.caller(dependencies::RECOMMENDATIONS);
        let mut tasks = JoinSet::new();

        for (index, batch) in batches.iter().enumerate() {
            let backend = self.backend.clone();
            let caller = caller.clone();
            let batch = batch.clone();
            let token = ctx.cancel_token().clone();

            tasks.spawn(async move {
                let outcome = caller
                    .call_tracked(
                        || {
                            let backend = backend.clone();
                            let batch = batch.clone();
                            async move { backend.analyze_batch(&batch).await }
                        },
                        &token,
                    )
                    .await;
                (index, outcome.result)
            });
        }

        let mut results: Vec<Option<Result<Vec<Recommendation>, (ErrorKind, String)>>> =
            (0..batches.len()).map(|_| None).collect();
        let mut stopped = None;

        loop {
            tokio::select! {
                biased;
                kind = ctx.interrupted() => {
                    stopped = Some(kind);
                    break;
                }
                joined = tasks.join_next() => match joined {
                    None => break,
                    Some(Ok((index, result))) => {
                        results[index] = Some(result.map_err(|e| (e.kind(), e.to_string())));
                    }
                    Some(Err(e)) => {
                        warn!(run_id = %ctx.run_id(), error = %e, "Analysis task did not complete");
                    }
                },
            }
        }
        tasks.abort_all();

        let mut outcome = AnalysisOutcome::default();
        for (index, (batch, result)) in batches.iter().zip(results).enumerate() {
            let result = result.unwrap_or_else(|| {
                let kind = stopped.unwrap_or(ErrorKind::Internal);
                Err((kind, format!("batch unfinished ({})", kind)))
            });

            match result {
                Ok(recommendations) => {
                    outcome
                        .recommendations
                        .extend(self.merge_batch(index, batch, recommendations));
                }
                Err((kind, error)) => {
                    ctx.logger().log_batch_degraded(index, batch.len(), kind, &error);
                    self.telemetry.inc_batches_degraded();
                    outcome.recommendations.extend(batch.iter().map(|resource| {
                        let placeholder = Recommendation::manual_review(
                            resource,
                            &self.config.currency,
                            format!("manual review required: {}", error),
                        );
                        self.rules.apply(placeholder, resource)
                    }));
                    outcome.degraded_batches.push(DegradedBatch {
                        index,
                        resource_ids: batch.iter().map(|r| r.id.clone()).collect(),
                        error_kind: kind,
                        error,
                    });
                }
            }
        }

        info!(
            run_id = %ctx.run_id(),
            batches = batches.len(),
            degraded = outcome.degraded_batches.len(),
            recommendations = outcome.recommendations.len(),
            "Analysis complete"
        );
        outcome
    }

    /// Pair backend output with the batch, one recommendation per resource
    fn merge_batch(
        &self,
        index: usize,
        batch: &[Resource],
        recommendations: Vec<Recommendation>,
    ) -> Vec<Recommendation> {
        let mut by_id: HashMap<String, Recommendation> = HashMap::new();
        for rec in recommendations {
            if !batch.iter().any(|r| r.id == rec.resource_id) {
                warn!(batch_index = index, resource_id = %rec.resource_id, "Dropping recommendation for unknown resource");
                continue;
            }
            by_id.entry(rec.resource_id.clone()).or_insert(rec);
        }

        batch
            .iter()
            .map(|resource| {
                let rec = match by_id.remove(&resource.id) {
                    Some(rec) => normalize(rec, resource),
                    None => {
                        debug!(batch_index = index, resource_id = %resource.id, "Backend returned no recommendation");
                        Recommendation::manual_review(
                            resource,
                            &self.config.currency,
                            "manual review required: no recommendation returned",
                        )
                    }
                };
                self.rules.apply(rec, resource)
            })
            .collect()
    }

    /// Forecast the total and every cost center
    pub fn forecast(&self, costs: &CostData) -> Vec<CostForecast> {
        forecast_costs(costs, &self.config.forecast)
    }

    /// Allocate effective monthly cost by the configured tag
    pub fn allocate(&self, resources: &[Resource]) -> Vec<CostAllocation> {
        allocate_by_tag(
            resources,
            &self.config.allocation_tag,
            &self.pricing,
            &self.config.currency,
        )
    }
}

/// Rebuild backend output against the resource it names
///
/// Savings go back through `Money::new` and confidence is clamped to [0, 1],
/// with non-finite confidence read as 0.
fn normalize(rec: Recommendation, resource: &Resource) -> Recommendation {
    let Recommendation {
        action,
        monthly_savings,
        confidence,
        risk,
        priority,
        reason,
        ..
    } = rec;
    Recommendation::new(
        resource,
        action,
        Money::new(monthly_savings.amount, monthly_savings.currency),
        confidence,
        reason,
    )
    .with_assessment(risk, priority)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CallError;
    use crate::models::{Action, Priority, ResourceType, RiskLevel};
    use crate::resilience::{ResilienceConfig, RetryConfig};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    /// Returns a fixed recommendation per resource; fails batches holding `poison`
    struct MockBackend {
        poison: Option<String>,
        extra: bool,
        skip: Option<String>,
        delay: Option<Duration>,
        /// Confidence and monthly savings reported for every resource
        raw: Option<(f64, f64)>,
        calls: AtomicUsize,
    }

    impl MockBackend {
        fn new() -> Self {
            Self {
                poison: None,
                extra: false,
                skip: None,
                delay: None,
                raw: None,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl RecommendationBackend for MockBackend {
        async fn analyze_batch(&self, resources: &[Resource]) -> Result<Vec<Recommendation>, CallError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(poison) = &self.poison {
                if resources.iter().any(|r| &r.id == poison) {
                    return Err(CallError::transient("model endpoint overloaded"));
                }
            }
            let mut recs: Vec<Recommendation> = resources
                .iter()
                .filter(|r| Some(&r.id) != self.skip.as_ref())
                .map(|r| {
                    let mut rec =
                        Recommendation::new(r, Action::Downsize, Money::new(120.0, "USD"), 0.8, "mock")
                            .with_assessment(RiskLevel::Low, Priority::Medium);
                    if let Some((confidence, savings)) = self.raw {
                        rec.confidence = confidence;
                        rec.monthly_savings.amount = savings;
                    }
                    rec
                })
                .collect();
            if self.extra {
                let ghost = Resource::new("ghost", ResourceType::Ec2, "us-east-1", "acct").unwrap();
                recs.push(Recommendation::new(&ghost, Action::Delete, Money::new(1.0, "USD"), 0.9, "?"));
            }
            Ok(recs)
        }
    }

    fn resources(n: usize) -> Vec<Resource> {
        (0..n)
            .map(|i| Resource::new(format!("i-{:02}", i), ResourceType::Ec2, "us-east-1", "acct").unwrap())
            .collect()
    }

    fn pipeline(backend: Arc<MockBackend>, batch_size: usize) -> AnalysisPipeline {
        let callers = Arc::new(CallerRegistry::new(
            ResilienceConfig {
                retry: RetryConfig {
                    max_attempts: 2,
                    jitter: false,
                    ..Default::default()
                },
                ..Default::default()
            },
            OrchestratorMetrics::new(),
        ));
        AnalysisPipeline::new(
            backend,
            callers,
            AnalysisConfig {
                batch_size,
                ..Default::default()
            },
            PricingPipeline::identity(),
        )
    }

    fn ctx() -> RunContext {
        RunContext::new("analysis", Duration::from_secs(600), CancellationToken::new())
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_batch_degrades_to_manual_review() {
        let backend = Arc::new(MockBackend {
            poison: Some("i-12".to_string()),
            ..MockBackend::new()
        });
        let outcome = pipeline(backend.clone(), 10).analyze(&resources(25), &ctx()).await;

        assert_eq!(outcome.recommendations.len(), 25);
        assert_eq!(outcome.degraded_batches.len(), 1);
        let degraded = &outcome.degraded_batches[0];
        assert_eq!(degraded.index, 1);
        assert_eq!(degraded.resource_ids.len(), 10);
        assert_eq!(degraded.error_kind, ErrorKind::RetryExhausted);

        for (i, rec) in outcome.recommendations.iter().enumerate() {
            assert_eq!(rec.resource_id, format!("i-{:02}", i));
            if (10..20).contains(&i) {
                assert!(rec.manual_review);
                assert!(rec.monthly_savings.is_zero());
                assert_eq!(rec.confidence, 0.0);
            } else {
                assert_eq!(rec.action, Action::Downsize);
            }
        }
        // 3 batches, the poisoned one tried twice
        assert_eq!(backend.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_dropped_and_missing_filled() {
        let backend = Arc::new(MockBackend {
            extra: true,
            skip: Some("i-01".to_string()),
            ..MockBackend::new()
        });
        let outcome = pipeline(backend, 10).analyze(&resources(3), &ctx()).await;

        let ids: Vec<&str> = outcome.recommendations.iter().map(|r| r.resource_id.as_str()).collect();
        assert_eq!(ids, vec!["i-00", "i-01", "i-02"]);
        assert!(outcome.recommendations[1].manual_review);
        assert!(outcome.degraded_batches.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rules_applied_to_backend_output() {
        let backend = Arc::new(MockBackend::new());
        let mut input = resources(1);
        input[0] = input[0].clone().with_tag("env", "production");
        let outcome = pipeline(backend, 10).analyze(&input, &ctx()).await;
        assert_eq!(outcome.recommendations[0].risk, RiskLevel::Medium);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_backend_output_normalized() {
        let backend = Arc::new(MockBackend {
            raw: Some((f64::NAN, -50.0)),
            ..MockBackend::new()
        });
        let outcome = pipeline(backend, 10).analyze(&resources(1), &ctx()).await;
        let rec = &outcome.recommendations[0];
        assert_eq!(rec.confidence, 0.0);
        assert!(rec.monthly_savings.is_zero());
        // Unknown confidence falls under the low-confidence rule
        assert_eq!(rec.risk, RiskLevel::High);
        assert_eq!(rec.priority, Priority::Low);

        let backend = Arc::new(MockBackend {
            raw: Some((1.7, f64::NAN)),
            ..MockBackend::new()
        });
        let outcome = pipeline(backend, 10).analyze(&resources(1), &ctx()).await;
        let rec = &outcome.recommendations[0];
        assert_eq!(rec.confidence, 1.0);
        assert!(rec.monthly_savings.is_zero());
        assert_eq!(rec.risk, RiskLevel::Low);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unfinished_batches_degrade_at_deadline() {
        let backend = Arc::new(MockBackend {
            delay: Some(Duration::from_secs(20)),
            ..MockBackend::new()
        });
        let run = RunContext::new("slow", Duration::from_secs(10), CancellationToken::new());
        let outcome = pipeline(backend, 10).analyze(&resources(15), &run).await;

        assert_eq!(outcome.recommendations.len(), 15);
        assert_eq!(outcome.degraded_batches.len(), 2);
        assert!(outcome
            .degraded_batches
            .iter()
            .all(|b| b.error_kind == ErrorKind::DeadlineExceeded));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_input() {
        let outcome = pipeline(Arc::new(MockBackend::new()), 10).analyze(&[], &ctx()).await;
        assert!(outcome.recommendations.is_empty());
        assert!(outcome.degraded_batches.is_empty());
    }
}
