//! End-to-end runs of the analysis engine against snapshot collaborators

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use orchestrator_lib::analysis::RecommendationBackend;
use orchestrator_lib::collector::{InventorySnapshot, SnapshotProvider};
use orchestrator_lib::resilience::RetryConfig;
use orchestrator_lib::{
    Budget, CallError, ComponentStatus, CostAnalysisEngine, DailyCost, EngineConfig, EngineError,
    ErrorKind, Money, Recommendation, Resource, ResourceType,
};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

const DEADLINE: Duration = Duration::from_secs(300);

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

fn ec2(id: &str, region: &str) -> Resource {
    Resource::new(id, ResourceType::Ec2, region, "123456789012")
        .unwrap()
        .with_config("monthly_cost", json!(100.0))
        .with_tag("cost-center", if region == "us-east-1" { "web" } else { "data" })
}

/// Five instances in each of us-east-1 and eu-west-1, ten days at 85/day
fn snapshot() -> InventorySnapshot {
    let mut resources = Vec::new();
    for region in ["us-east-1", "eu-west-1"] {
        for i in 0..5 {
            resources.push(ec2(&format!("{}-i-{}", region, i), region));
        }
    }
    let today = Utc::now().date_naive();
    let daily_costs = (1..=10)
        .map(|i| DailyCost {
            date: today - ChronoDuration::days(i),
            amount: 85.0,
        })
        .collect();

    InventorySnapshot {
        currency: "USD".to_string(),
        resources,
        daily_costs,
        ..Default::default()
    }
}

fn config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.resilience.retry = RetryConfig {
        max_attempts: 3,
        base_delay: Duration::from_millis(10),
        jitter: false,
        ..Default::default()
    };
    config
}

fn engine(provider: SnapshotProvider, config: EngineConfig) -> CostAnalysisEngine {
    let provider = Arc::new(provider);
    CostAnalysisEngine::builder()
        .inventory(provider.clone())
        .metrics_provider(provider.clone())
        .cost_provider(provider)
        .config(config)
        .build()
        .unwrap()
}

fn budget(currency: &str) -> Budget {
    let now = Utc::now();
    Budget::new(
        "platform",
        "Platform",
        Money::new(1000.0, currency),
        now - ChronoDuration::days(10),
        now + ChronoDuration::days(20),
        vec![0.8, 0.9, 1.0],
    )
    .unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_failing_region_is_isolated() {
    let provider = SnapshotProvider::new(snapshot()).with_failing_regions(["us-west-2"]);
    let engine = engine(provider, config());

    let report = engine
        .run_analysis(
            &strings(&["us-east-1", "us-west-2", "eu-west-1"]),
            &strings(&["ec2"]),
            30,
            DEADLINE,
        )
        .await
        .unwrap();

    assert_eq!(report.total_resources_analyzed(), 10);
    assert_eq!(report.recommendations().len(), 10);
    assert!(report
        .recommendations()
        .iter()
        .all(|r| r.region != "us-west-2"));

    let ledger = report.partial_failures();
    assert_eq!(ledger.len(), 1);
    let failure = &ledger.entries()[0];
    assert_eq!(failure.unit.region, "us-west-2");
    assert_eq!(failure.error_kind, ErrorKind::RetryExhausted);
    assert_eq!(failure.attempts, 3);
    assert!(!report.is_complete());
}

#[tokio::test(start_paused = true)]
async fn test_complete_run_reports_costs_and_forecasts() {
    let engine = engine(SnapshotProvider::new(snapshot()), config());

    let report = engine
        .run_analysis(&strings(&["us-east-1", "eu-west-1"]), &strings(&["ec2", "s3"]), 30, DEADLINE)
        .await
        .unwrap();

    assert!(report.is_complete());
    assert_eq!(report.total_cost(), Some(&Money::new(850.0, "USD")));
    assert_eq!(report.forecasts()[0].target, "total");
    assert_eq!(report.allocations().len(), 2);
    assert_eq!(report.dependency_health().status, ComponentStatus::Healthy);
    // Snapshot has no metric points, so compute resources cannot be judged
    assert!(report
        .recommendations()
        .iter()
        .all(|r| r.confidence < 0.5 && !r.manual_review));
}

#[tokio::test(start_paused = true)]
async fn test_budget_thresholds_after_refresh() {
    let mut config = config();
    config.budgets = vec![budget("USD")];
    let engine = engine(SnapshotProvider::new(snapshot()), config);

    let report = assert_ok!(
        engine
            .run_analysis(&strings(&["us-east-1"]), &strings(&["ec2"]), 30, DEADLINE)
            .await
    );

    let status = &report.budgets()[0];
    assert_eq!(status.spent, Money::new(850.0, "USD"));
    assert!((status.utilization_percent - 85.0).abs() < 1e-9);
    assert_eq!(status.exceeded_thresholds, vec![0.8]);
    assert!(report.budget_refresh_failures().is_empty());

    let budgets = engine.budgets().await;
    assert_eq!(budgets[0].spent().amount, 850.0);
}

#[tokio::test(start_paused = true)]
async fn test_budget_refresh_failure_keeps_previous_spend() {
    let mut config = config();
    config.budgets = vec![budget("EUR").with_initial_spent(120.0)];
    let engine = engine(SnapshotProvider::new(snapshot()), config);

    let report = assert_ok!(
        engine
            .run_analysis(&strings(&["us-east-1"]), &strings(&["ec2"]), 30, DEADLINE)
            .await
    );

    assert_eq!(report.budgets()[0].spent, Money::new(120.0, "EUR"));
    assert_eq!(report.budget_refresh_failures().len(), 1);
    assert_eq!(report.budget_refresh_failures()[0].error_kind, ErrorKind::Permanent);
    assert!(!report.is_complete());
}

#[tokio::test(start_paused = true)]
async fn test_preflight_errors_are_returned() {
    let engine = engine(SnapshotProvider::new(snapshot()), config());

    let err = assert_err!(engine.run_analysis(&[], &strings(&["ec2"]), 30, DEADLINE).await);
    assert!(matches!(err, EngineError::InvalidRequest(_)));

    let err = assert_err!(
        engine
            .run_analysis(&strings(&["us-east-1"]), &strings(&["toaster"]), 30, DEADLINE)
            .await
    );
    assert!(matches!(err, EngineError::InvalidRequest(_)));

    let err = assert_err!(
        engine
            .run_analysis(&strings(&["us-east-1"]), &strings(&["ec2"]), u32::MAX, DEADLINE)
            .await
    );
    assert!(matches!(err, EngineError::InvalidRequest(_)));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_abandons_every_unit() {
    let engine = engine(SnapshotProvider::new(snapshot()), config());
    engine.shutdown_token().cancel();

    let report = engine
        .run_analysis(&strings(&["us-east-1", "eu-west-1"]), &strings(&["ec2"]), 30, DEADLINE)
        .await
        .unwrap();

    assert_eq!(report.total_resources_analyzed(), 0);
    assert_eq!(report.partial_failures().len(), 2);
    assert!(report
        .partial_failures()
        .iter()
        .all(|f| f.error_kind == ErrorKind::Cancelled));
    assert!(report.cost_data_error().is_some());
    assert!(!report.is_complete());
}

struct UnavailableBackend {
    calls: AtomicUsize,
}

#[async_trait]
impl RecommendationBackend for UnavailableBackend {
    async fn analyze_batch(&self, _resources: &[Resource]) -> Result<Vec<Recommendation>, CallError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(CallError::transient("model endpoint unavailable"))
    }
}

#[tokio::test(start_paused = true)]
async fn test_backend_outage_degrades_to_manual_review() {
    let provider = Arc::new(SnapshotProvider::new(snapshot()));
    let backend = Arc::new(UnavailableBackend {
        calls: AtomicUsize::new(0),
    });
    let engine = CostAnalysisEngine::builder()
        .inventory(provider.clone())
        .metrics_provider(provider.clone())
        .cost_provider(provider)
        .backend(backend.clone())
        .config(config())
        .build()
        .unwrap();

    let report = engine
        .run_analysis(&strings(&["us-east-1", "eu-west-1"]), &strings(&["ec2"]), 30, DEADLINE)
        .await
        .unwrap();

    assert_eq!(report.recommendations().len(), 10);
    assert!(report.recommendations().iter().all(|r| r.manual_review));
    assert!(report.summary().monthly_savings.is_zero());
    assert_eq!(report.degraded_batches().len(), 1);
    assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
    assert!(report.partial_failures().is_empty());
    assert!(!report.is_complete());
}
