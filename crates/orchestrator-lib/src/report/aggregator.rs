//! Pure aggregation of one run's results into an immutable report

use crate::analysis::{CostAllocation, DegradedBatch};
use crate::collector::PartialFailureLedger;
use crate::error::ErrorKind;
use crate::health::HealthReport;
use crate::models::{
    Budget, CostForecast, Money, Priority, Recommendation, Resource, ResourceType,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// Time window the run analyzed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportPeriod {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub days: u32,
}

/// Budget utilization at report time
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BudgetStatus {
    pub budget_id: String,
    pub name: String,
    pub allocated: Money,
    pub spent: Money,
    /// spent / allocated in [0, 1+]
    pub utilization: f64,
    pub utilization_percent: f64,
    /// Ascending, every threshold with `utilization >= threshold`
    pub exceeded_thresholds: Vec<f64>,
}

impl BudgetStatus {
    pub fn evaluate(budget: &Budget) -> Self {
        let utilization = budget.utilization();
        Self {
            budget_id: budget.id().to_string(),
            name: budget.name().to_string(),
            allocated: budget.allocated().clone(),
            spent: budget.spent().clone(),
            utilization,
            utilization_percent: utilization * 100.0,
            exceeded_thresholds: budget.exceeded_thresholds(),
        }
    }

    pub fn is_alerting(&self) -> bool {
        !self.exceeded_thresholds.is_empty()
    }
}

/// A budget whose spend could not be refreshed; its previous spend is kept
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BudgetRefreshFailure {
    pub budget_id: String,
    pub error_kind: ErrorKind,
    pub error: String,
}

/// Order-independent totals
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportSummary {
    pub total_resources_analyzed: usize,
    pub total_recommendations: usize,
    /// Recommendations proposing something other than no-change
    pub actionable_recommendations: usize,
    pub manual_review_count: usize,
    pub monthly_savings: Money,
    pub annual_savings: Money,
    pub by_priority: BTreeMap<Priority, usize>,
    pub by_type: BTreeMap<ResourceType, usize>,
}

/// Everything a run produced, handed to the aggregator once
#[derive(Debug, Clone)]
pub struct ReportInputs {
    pub run_id: String,
    pub generated_at: DateTime<Utc>,
    pub period: ReportPeriod,
    pub regions: Vec<String>,
    pub categories: Vec<ResourceType>,
    pub resources: Vec<Resource>,
    pub recommendations: Vec<Recommendation>,
    pub forecasts: Vec<CostForecast>,
    pub allocations: Vec<CostAllocation>,
    pub budgets: Vec<Budget>,
    pub total_cost: Option<Money>,
    pub partial_failures: PartialFailureLedger,
    pub metrics_unavailable: Vec<String>,
    pub degraded_batches: Vec<DegradedBatch>,
    pub cost_data_error: Option<String>,
    pub budget_refresh_failures: Vec<BudgetRefreshFailure>,
    pub dependency_health: HealthReport,
}

/// Result of one orchestration run, never mutated after construction
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    id: String,
    generated_at: DateTime<Utc>,
    period: ReportPeriod,
    regions: Vec<String>,
    categories: Vec<ResourceType>,
    summary: ReportSummary,
    resources: Vec<Resource>,
    recommendations: Vec<Recommendation>,
    forecasts: Vec<CostForecast>,
    allocations: Vec<CostAllocation>,
    budgets: Vec<BudgetStatus>,
    total_cost: Option<Money>,
    partial_failures: PartialFailureLedger,
    metrics_unavailable: Vec<String>,
    degraded_batches: Vec<DegradedBatch>,
    cost_data_error: Option<String>,
    budget_refresh_failures: Vec<BudgetRefreshFailure>,
    dependency_health: HealthReport,
    complete: bool,
}

impl Report {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn generated_at(&self) -> DateTime<Utc> {
        self.generated_at
    }

    pub fn period(&self) -> &ReportPeriod {
        &self.period
    }

    pub fn regions(&self) -> &[String] {
        &self.regions
    }

    pub fn categories(&self) -> &[ResourceType] {
        &self.categories
    }

    pub fn summary(&self) -> &ReportSummary {
        &self.summary
    }

    pub fn total_resources_analyzed(&self) -> usize {
        self.summary.total_resources_analyzed
    }

    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }

    pub fn recommendations(&self) -> &[Recommendation] {
        &self.recommendations
    }

    pub fn forecasts(&self) -> &[CostForecast] {
        &self.forecasts
    }

    pub fn allocations(&self) -> &[CostAllocation] {
        &self.allocations
    }

    pub fn budgets(&self) -> &[BudgetStatus] {
        &self.budgets
    }

    pub fn total_cost(&self) -> Option<&Money> {
        self.total_cost.as_ref()
    }

    pub fn partial_failures(&self) -> &PartialFailureLedger {
        &self.partial_failures
    }

    pub fn metrics_unavailable(&self) -> &[String] {
        &self.metrics_unavailable
    }

    pub fn degraded_batches(&self) -> &[DegradedBatch] {
        &self.degraded_batches
    }

    pub fn cost_data_error(&self) -> Option<&str> {
        self.cost_data_error.as_deref()
    }

    pub fn budget_refresh_failures(&self) -> &[BudgetRefreshFailure] {
        &self.budget_refresh_failures
    }

    pub fn dependency_health(&self) -> &HealthReport {
        &self.dependency_health
    }

    /// False when any part of the run failed or was abandoned
    ///
    /// An incomplete report with zero savings does not mean nothing can be
    /// saved.
    pub fn is_complete(&self) -> bool {
        self.complete
    }
}

/// Folds run results into a [`Report`]
#[derive(Debug, Clone)]
pub struct ReportAggregator {
    currency: String,
}

impl ReportAggregator {
    /// Savings are totaled in `currency`; other currencies are not converted
    pub fn new(currency: impl Into<String>) -> Self {
        Self {
            currency: currency.into(),
        }
    }

    pub fn summarize(&self, resources: &[Resource], recommendations: &[Recommendation]) -> ReportSummary {
        let monthly: f64 = recommendations
            .iter()
            .filter(|r| r.monthly_savings.currency == self.currency)
            .map(|r| r.monthly_savings.amount)
            .sum();
        let monthly_savings = Money::new(monthly, self.currency.clone());

        let mut by_priority = BTreeMap::new();
        let mut by_type = BTreeMap::new();
        for rec in recommendations {
            *by_priority.entry(rec.priority).or_insert(0) += 1;
            *by_type.entry(rec.resource_type).or_insert(0) += 1;
        }

        ReportSummary {
            total_resources_analyzed: resources.len(),
            total_recommendations: recommendations.len(),
            actionable_recommendations: recommendations
                .iter()
                .filter(|r| r.action != crate::models::Action::NoChange)
                .count(),
            manual_review_count: recommendations.iter().filter(|r| r.manual_review).count(),
            annual_savings: monthly_savings.scale(12.0),
            monthly_savings,
            by_priority,
            by_type,
        }
    }

    pub fn aggregate(&self, inputs: ReportInputs) -> Report {
        let summary = self.summarize(&inputs.resources, &inputs.recommendations);
        let budgets: Vec<BudgetStatus> = inputs.budgets.iter().map(BudgetStatus::evaluate).collect();
        let complete = inputs.partial_failures.is_empty()
            && inputs.metrics_unavailable.is_empty()
            && inputs.degraded_batches.is_empty()
            && inputs.cost_data_error.is_none()
            && inputs.budget_refresh_failures.is_empty();

        Report {
            id: inputs.run_id,
            generated_at: inputs.generated_at,
            period: inputs.period,
            regions: inputs.regions,
            categories: inputs.categories,
            summary,
            resources: inputs.resources,
            recommendations: inputs.recommendations,
            forecasts: inputs.forecasts,
            allocations: inputs.allocations,
            budgets,
            total_cost: inputs.total_cost,
            partial_failures: inputs.partial_failures,
            metrics_unavailable: inputs.metrics_unavailable,
            degraded_batches: inputs.degraded_batches,
            cost_data_error: inputs.cost_data_error,
            budget_refresh_failures: inputs.budget_refresh_failures,
            dependency_health: inputs.dependency_health,
            complete,
        }
    }
}
