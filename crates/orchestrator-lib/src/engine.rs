//! The analysis entry point
//!
//! [`CostAnalysisEngine::run_analysis`] wires every phase of a run:
//!
//! 1. pre-flight validation of the request (the only errors it returns)
//! 2. fan-out collection of inventory units
//! 3. per-resource metrics enrichment
//! 4. cost data for the period, read through the cached cost caller
//! 5. batched recommendation analysis, forecasting and cost allocation
//! 6. budget refresh and threshold evaluation
//! 7. dependency health and report aggregation
//!
//! Every phase shares one [`RunContext`], so the deadline and the shutdown
//! token bound the whole run. Work still pending when either fires is
//! reported as a failure of its phase rather than awaited.

use crate::analysis::{
    AnalysisConfig, AnalysisPipeline, PricingPipeline, RecommendationBackend, RuleBasedBackend,
};
use crate::collector::{
    plan_units, CollectionConfig, CollectionOrchestrator, CostDataProvider, InventoryCollector,
    MetricsProvider,
};
use crate::context::RunContext;
use crate::error::{EngineError, ErrorKind};
use crate::health::{ComponentStatus, HealthRegistry, HealthReport};
use crate::models::{Budget, CostData, CostFilters, ResourceType};
use crate::observability::OrchestratorMetrics;
use crate::report::{
    BudgetRefreshFailure, Report, ReportAggregator, ReportInputs, ReportPeriod,
};
use crate::resilience::{dependencies, CallOutcome, CallerRegistry, ResilienceConfig};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Library configuration for one engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub resilience: ResilienceConfig,
    pub collection: CollectionConfig,
    pub analysis: AnalysisConfig,
    pub pricing: PricingPipeline,
    /// Budgets refreshed and evaluated on every run
    pub budgets: Vec<Budget>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            resilience: ResilienceConfig::default(),
            collection: CollectionConfig::default(),
            analysis: AnalysisConfig::default(),
            pricing: PricingPipeline::identity(),
            budgets: Vec::new(),
        }
    }
}

/// Builder for [`CostAnalysisEngine`]
///
/// Inventory, metrics and cost providers are required. Without an explicit
/// backend, recommendations come from [`RuleBasedBackend`].
#[derive(Default)]
pub struct CostAnalysisEngineBuilder {
    inventory: Option<Arc<dyn InventoryCollector>>,
    metrics: Option<Arc<dyn MetricsProvider>>,
    costs: Option<Arc<dyn CostDataProvider>>,
    backend: Option<Arc<dyn RecommendationBackend>>,
    config: EngineConfig,
}

impl CostAnalysisEngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inventory(mut self, inventory: Arc<dyn InventoryCollector>) -> Self {
        self.inventory = Some(inventory);
        self
    }

    pub fn metrics_provider(mut self, metrics: Arc<dyn MetricsProvider>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn cost_provider(mut self, costs: Arc<dyn CostDataProvider>) -> Self {
        self.costs = Some(costs);
        self
    }

    pub fn backend(mut self, backend: Arc<dyn RecommendationBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<CostAnalysisEngine, EngineError> {
        let missing = |what: &str| EngineError::InvalidConfig(format!("{} is required", what));
        let inventory = self.inventory.ok_or_else(|| missing("inventory collector"))?;
        let metrics = self.metrics.ok_or_else(|| missing("metrics provider"))?;
        let costs = self.costs.ok_or_else(|| missing("cost data provider"))?;

        let config = self.config;
        let backend = self.backend.unwrap_or_else(|| {
            Arc::new(RuleBasedBackend::new(
                config.pricing.clone(),
                config.analysis.currency.clone(),
            ))
        });

        let telemetry = OrchestratorMetrics::new();
        let callers = Arc::new(CallerRegistry::new(config.resilience.clone(), telemetry));

        Ok(CostAnalysisEngine {
            collector: CollectionOrchestrator::new(
                inventory,
                metrics,
                callers.clone(),
                config.collection.clone(),
            ),
            analysis: AnalysisPipeline::new(
                backend,
                callers.clone(),
                config.analysis.clone(),
                config.pricing.clone(),
            ),
            aggregator: ReportAggregator::new(config.analysis.currency.clone()),
            budgets: Mutex::new(config.budgets),
            costs,
            callers,
            health: HealthRegistry::new(),
            shutdown: CancellationToken::new(),
            run_seq: AtomicU64::new(0),
        })
    }
}

/// Validated request of one run
#[derive(Debug, Clone)]
struct AnalysisRequest {
    regions: Vec<String>,
    categories: Vec<ResourceType>,
    period_days: u32,
    deadline: Duration,
}

impl AnalysisRequest {
    fn parse(
        regions: &[String],
        categories: &[String],
        period_days: u32,
        deadline: Duration,
    ) -> Result<Self, EngineError> {
        let mut clean_regions: Vec<String> = Vec::new();
        for region in regions {
            let region = region.trim();
            if region.is_empty() {
                return Err(EngineError::InvalidRequest("region names must not be empty".into()));
            }
            if !clean_regions.iter().any(|r| r == region) {
                clean_regions.push(region.to_string());
            }
        }
        if clean_regions.is_empty() {
            return Err(EngineError::InvalidRequest("at least one region is required".into()));
        }

        let mut parsed = Vec::new();
        for category in categories {
            let category = ResourceType::from_str(category)
                .map_err(|e| EngineError::InvalidRequest(e.to_string()))?;
            if !parsed.contains(&category) {
                parsed.push(category);
            }
        }
        if parsed.is_empty() {
            return Err(EngineError::InvalidRequest("at least one category is required".into()));
        }

        if period_days == 0 {
            return Err(EngineError::InvalidRequest("period_days must be at least 1".into()));
        }
        if deadline.is_zero() {
            return Err(EngineError::InvalidRequest("deadline must be positive".into()));
        }

        Ok(Self {
            regions: clean_regions,
            categories: parsed,
            period_days,
            deadline,
        })
    }
}

/// First instant of a period of `days` ending at `end`
fn period_start(end: DateTime<Utc>, days: u32) -> Result<DateTime<Utc>, EngineError> {
    end.checked_sub_signed(chrono::Duration::days(i64::from(days)))
        .ok_or_else(|| {
            EngineError::InvalidRequest(format!("period of {} days reaches before the calendar", days))
        })
}

/// Await a resilient call unless the run stops first
async fn within_run<T, Fut>(ctx: &RunContext, call: Fut) -> Result<T, (ErrorKind, String)>
where
    Fut: Future<Output = CallOutcome<T>>,
{
    tokio::select! {
        biased;
        kind = ctx.interrupted() => Err((kind, format!("abandoned ({})", kind))),
        outcome = call => outcome.result.map_err(|e| (e.kind(), e.to_string())),
    }
}

/// One engine per set of collaborators; runs may be repeated and share
/// breakers, cache and budgets.
pub struct CostAnalysisEngine {
    collector: CollectionOrchestrator,
    analysis: AnalysisPipeline,
    aggregator: ReportAggregator,
    costs: Arc<dyn CostDataProvider>,
    callers: Arc<CallerRegistry>,
    budgets: Mutex<Vec<Budget>>,
    health: HealthRegistry,
    shutdown: CancellationToken,
    run_seq: AtomicU64,
}

impl CostAnalysisEngine {
    pub fn builder() -> CostAnalysisEngineBuilder {
        CostAnalysisEngineBuilder::new()
    }

    /// Cancelling this token abandons in-flight work of every run
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn callers(&self) -> &Arc<CallerRegistry> {
        &self.callers
    }

    pub async fn health(&self) -> HealthReport {
        self.health.health().await
    }

    /// Budgets with the spend of the last refresh
    pub async fn budgets(&self) -> Vec<Budget> {
        self.budgets.lock().await.clone()
    }

    fn next_run_id(&self) -> String {
        let seq = self.run_seq.fetch_add(1, Ordering::Relaxed);
        format!("run-{}-{:04}", Utc::now().format("%Y%m%dT%H%M%SZ"), seq)
    }

    /// Collect, analyze and report on the given regions and categories
    ///
    /// Only a malformed request is an error. Failures of collaborators,
    /// the deadline and shutdown all produce a report that says what is
    /// missing.
    pub async fn run_analysis(
        &self,
        regions: &[String],
        categories: &[String],
        period_days: u32,
        deadline: Duration,
    ) -> Result<Report, EngineError> {
        let request = AnalysisRequest::parse(regions, categories, period_days, deadline)?;
        let end = Utc::now();
        let start = period_start(end, request.period_days)?;
        let ctx = RunContext::new(self.next_run_id(), request.deadline, self.shutdown.child_token());

        let category_names: Vec<String> =
            request.categories.iter().map(|c| c.as_str().to_string()).collect();
        ctx.logger()
            .log_run_started(&request.regions, &category_names, request.period_days);


        let purged = self.callers.cache().purge_expired();
        let cache = self.callers.cache().stats();
        debug!(run_id = %ctx.run_id(), purged, cached = cache.active, "Shared cache pruned");

        let units = plan_units(&request.regions, &request.categories);
        let collection = self.collector.collect(units, &ctx).await;
        if !collection.ledger.is_empty() {
            warn!(
                run_id = %ctx.run_id(),
                failed_units = collection.ledger.len(),
                failed_regions = ?collection.ledger.failed_regions(),
                "Collection incomplete"
            );
        }

        let (resources, metrics_unavailable) = if self.collector.config().enrich_metrics {
            let enriched = self
                .collector
                .enrich_metrics(collection.resources, start, end, &ctx)
                .await;
            (enriched.resources, enriched.metrics_unavailable)
        } else {
            (collection.resources, Vec::new())
        };

        let filters = CostFilters::for_regions(&request.regions);
        let (total_cost, forecasts, cost_data_error) =
            match self.fetch_costs(start, end, &filters, &ctx).await {
                Ok(costs) => (Some(costs.total()), self.analysis.forecast(&costs), None),
                Err((kind, error)) => {
                    warn!(run_id = %ctx.run_id(), error_kind = %kind, error = %error, "Cost data unavailable, skipping forecasts");
                    (None, Vec::new(), Some(error))
                }
            };

        let analysis = self.analysis.analyze(&resources, &ctx).await;
        let allocations = self.analysis.allocate(&resources);

        let (budgets, budget_refresh_failures) = self.refresh_budgets(&ctx).await;

        let snapshots = self.callers.snapshots();
        for snapshot in &snapshots {
            ctx.logger().log_circuit_state(
                &snapshot.dependency,
                snapshot.state,
                snapshot.consecutive_failures,
            );
        }
        self.health.record_breakers(&snapshots).await;
        let dependency_health = self.health.health().await;
        if dependency_health.status != ComponentStatus::Healthy {
            warn!(
                run_id = %ctx.run_id(),
                status = ?dependency_health.status,
                dependencies = ?dependency_health.unhealthy_components(),
                "Dependencies not healthy"
            );
        }
        if let Some(kind) = ctx.interruption() {
            warn!(run_id = %ctx.run_id(), reason = %kind, "Run stopped early, report is partial");
        }

        let report = self.aggregator.aggregate(ReportInputs {
            run_id: ctx.run_id().to_string(),
            generated_at: Utc::now(),
            period: ReportPeriod {
                start,
                end,
                days: request.period_days,
            },
            regions: request.regions,
            categories: request.categories,
            resources,
            recommendations: analysis.recommendations,
            forecasts,
            allocations,
            budgets,
            total_cost,
            partial_failures: collection.ledger,
            metrics_unavailable,
            degraded_batches: analysis.degraded_batches,
            cost_data_error,
            budget_refresh_failures,
            dependency_health,
        });

        ctx.logger().log_report_generated(
            report.total_resources_analyzed(),
            report.recommendations().len(),
            report.summary().monthly_savings.amount,
            report.partial_failures().len(),
            report.is_complete(),
        );
        Ok(report)
    }

    async fn fetch_costs(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        filters: &CostFilters,
        ctx: &RunContext,
    ) -> Result<CostData, (ErrorKind, String)> {
        let caller = self.callers.caller(dependencies::COST_DATA);
        let key = format!(
            "{}..{}|{}",
            start.date_naive(),
            end.date_naive(),
            filters.cache_fragment()
        );
        let costs = self.costs.clone();
        let filters = filters.clone();

        within_run(
            ctx,
            caller.call_cached(
                &key,
                || {
                    let costs = costs.clone();
                    let filters = filters.clone();
                    async move { costs.get_cost_data(start, end, &filters).await }
                },
                ctx.cancel_token(),
            ),
        )
        .await
    }

    /// Set each budget's spend to the cost of its own range
    ///
    /// A budget whose refresh fails keeps its previous spend.
    async fn refresh_budgets(&self, ctx: &RunContext) -> (Vec<Budget>, Vec<BudgetRefreshFailure>) {
        let mut budgets = self.budgets.lock().await;
        let mut failures = Vec::new();
        let filters = CostFilters::default();

        for budget in budgets.iter_mut() {
            let refreshed = match self
                .fetch_costs(budget.start(), budget.end(), &filters, ctx)
                .await
            {
                Ok(costs) => budget
                    .refresh_spent(&costs.total())
                    .map_err(|e| (ErrorKind::Permanent, e.to_string())),
                Err(failure) => Err(failure),
            };

            match refreshed {
                Ok(()) => debug!(budget_id = %budget.id(), spent = %budget.spent(), "Budget refreshed"),
                Err((kind, error)) => {
                    warn!(run_id = %ctx.run_id(), budget_id = %budget.id(), error_kind = %kind, error = %error, "Budget refresh failed, keeping previous spend");
                    failures.push(BudgetRefreshFailure {
                        budget_id: budget.id().to_string(),
                        error_kind: kind,
                        error,
                    });
                }
            }

            if let Some(highest) = budget.exceeded_thresholds().last() {
                ctx.logger()
                    .log_budget_alert(budget.id(), budget.utilization(), *highest);
            }
        }

        info!(run_id = %ctx.run_id(), budgets = budgets.len(), failed = failures.len(), "Budgets evaluated");
        (budgets.clone(), failures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_request_requires_regions() {
        let err = AnalysisRequest::parse(&[], &strings(&["ec2"]), 30, Duration::from_secs(60))
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidRequest(_)));

        let err = AnalysisRequest::parse(&strings(&[" "]), &strings(&["ec2"]), 30, Duration::from_secs(60))
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidRequest(_)));
    }

    #[test]
    fn test_request_rejects_unknown_category() {
        let err = AnalysisRequest::parse(
            &strings(&["us-east-1"]),
            &strings(&["ec2", "mainframe"]),
            30,
            Duration::from_secs(60),
        )
        .unwrap_err();
        assert!(err.to_string().contains("mainframe"));
    }

    #[test]
    fn test_request_rejects_zero_period_and_deadline() {
        let regions = strings(&["us-east-1"]);
        let categories = strings(&["ec2"]);
        assert!(AnalysisRequest::parse(&regions, &categories, 0, Duration::from_secs(60)).is_err());
        assert!(AnalysisRequest::parse(&regions, &categories, 30, Duration::ZERO).is_err());
    }

    #[test]
    fn test_period_start_rejects_overflow() {
        let end = Utc::now();
        let start = period_start(end, 7).unwrap();
        assert_eq!(end - start, chrono::Duration::days(7));

        let err = period_start(end, u32::MAX).unwrap_err();
        assert!(matches!(err, EngineError::InvalidRequest(_)));
    }

    #[test]
    fn test_request_normalizes_and_dedups() {
        let request = AnalysisRequest::parse(
            &strings(&["us-east-1 ", "us-east-1", "eu-west-1"]),
            &strings(&["EC2", "ec2", "s3"]),
            7,
            Duration::from_secs(60),
        )
        .unwrap();
        assert_eq!(request.regions, strings(&["us-east-1", "eu-west-1"]));
        assert_eq!(request.categories, vec![ResourceType::Ec2, ResourceType::S3]);
    }

    #[test]
    fn test_builder_requires_collaborators() {
        let err = CostAnalysisEngine::builder().build().err().unwrap();
        assert!(matches!(err, EngineError::InvalidConfig(_)));
    }
}
