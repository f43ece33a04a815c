//! Observability infrastructure for the orchestrator
//!
//! Provides:
//! - Prometheus metrics (outbound call latency, retries, circuit state, cache hits, failures)
//! - Structured JSON logging with tracing

use crate::error::{CallError, ErrorKind};
use crate::models::CollectionUnit;
use crate::resilience::CircuitState;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge,
    register_int_gauge_vec, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{info, warn};

/// Histogram buckets for outbound call latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<OrchestratorMetricsInner> = OnceLock::new();

/// Inner metrics structure that holds the actual Prometheus metrics
struct OrchestratorMetricsInner {
    call_latency_seconds: HistogramVec,
    calls_total: IntCounterVec,
    retry_attempts_total: IntCounterVec,
    circuit_state: IntGaugeVec,
    cache_hits_total: IntCounter,
    cache_misses_total: IntCounter,
    units_failed_total: IntCounter,
    batches_degraded_total: IntCounter,
    resources_collected: IntGauge,
}

impl OrchestratorMetricsInner {
    fn new() -> Self {
        Self {
            call_latency_seconds: register_histogram_vec!(
                "cost_orchestrator_outbound_call_latency_seconds",
                "Latency of single outbound call attempts",
                &["dependency"],
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register outbound_call_latency_seconds"),

            calls_total: register_int_counter_vec!(
                "cost_orchestrator_outbound_calls_total",
                "Outbound calls by dependency and outcome",
                &["dependency", "outcome"]
            )
            .expect("Failed to register outbound_calls_total"),

            retry_attempts_total: register_int_counter_vec!(
                "cost_orchestrator_retry_attempts_total",
                "Attempts made beyond the first one",
                &["dependency"]
            )
            .expect("Failed to register retry_attempts_total"),

            circuit_state: register_int_gauge_vec!(
                "cost_orchestrator_circuit_state",
                "Circuit state per dependency (0 closed, 1 half-open, 2 open)",
                &["dependency"]
            )
            .expect("Failed to register circuit_state"),

            cache_hits_total: register_int_counter!(
                "cost_orchestrator_cache_hits_total",
                "Cached reads served without an outbound call"
            )
            .expect("Failed to register cache_hits_total"),

            cache_misses_total: register_int_counter!(
                "cost_orchestrator_cache_misses_total",
                "Cacheable reads that required an outbound call"
            )
            .expect("Failed to register cache_misses_total"),

            units_failed_total: register_int_counter!(
                "cost_orchestrator_collection_units_failed_total",
                "Collection units recorded in the partial failure ledger"
            )
            .expect("Failed to register collection_units_failed_total"),

            batches_degraded_total: register_int_counter!(
                "cost_orchestrator_analysis_batches_degraded_total",
                "Analysis batches that fell back to manual review"
            )
            .expect("Failed to register analysis_batches_degraded_total"),

            resources_collected: register_int_gauge!(
                "cost_orchestrator_resources_collected",
                "Resources collected by the latest run"
            )
            .expect("Failed to register resources_collected"),
        }
    }
}

/// Orchestrator metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Debug, Clone)]
pub struct OrchestratorMetrics {
    _private: (),
}

impl Default for OrchestratorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl OrchestratorMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(OrchestratorMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &OrchestratorMetricsInner {
        GLOBAL_METRICS.get_or_init(OrchestratorMetricsInner::new)
    }

    /// Record one attempt and its outcome
    pub fn observe_call<T>(&self, dependency: &str, elapsed: Duration, result: &Result<T, CallError>) {
        let inner = self.inner();
        inner
            .call_latency_seconds
            .with_label_values(&[dependency])
            .observe(elapsed.as_secs_f64());
        let outcome = match result {
            Ok(_) => "success".to_string(),
            Err(e) => e.kind().to_string(),
        };
        inner
            .calls_total
            .with_label_values(&[dependency, outcome.as_str()])
            .inc();
    }

    pub fn add_retries(&self, dependency: &str, retries: u32) {
        if retries > 0 {
            self.inner()
                .retry_attempts_total
                .with_label_values(&[dependency])
                .inc_by(u64::from(retries));
        }
    }

    pub fn set_circuit_state(&self, dependency: &str, state: CircuitState) {
        self.inner()
            .circuit_state
            .with_label_values(&[dependency])
            .set(state.as_gauge());
    }

    pub fn inc_cache_hit(&self) {
        self.inner().cache_hits_total.inc();
    }

    pub fn inc_cache_miss(&self) {
        self.inner().cache_misses_total.inc();
    }

    pub fn inc_units_failed(&self) {
        self.inner().units_failed_total.inc();
    }

    pub fn inc_batches_degraded(&self) {
        self.inner().batches_degraded_total.inc();
    }

    pub fn set_resources_collected(&self, count: usize) {
        self.inner()
            .resources_collected
            .set(i64::try_from(count).unwrap_or(i64::MAX));
    }
}

/// Structured logger for orchestration events
///
/// Provides consistent JSON-formatted logging for run milestones,
/// unit failures and budget alerts.
#[derive(Debug, Clone)]
pub struct StructuredLogger {
    run_id: String,
}

impl StructuredLogger {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Log the start of an analysis run
    pub fn log_run_started(&self, regions: &[String], categories: &[String], period_days: u32) {
        info!(
            event = "run_started",
            run_id = %self.run_id,
            regions = ?regions,
            categories = ?categories,
            period_days = period_days,
            "Analysis run started"
        );
    }

    /// Log a collection unit that was added to the failure ledger
    pub fn log_unit_failed(&self, unit: &CollectionUnit, kind: ErrorKind, attempts: u32, error: &str) {
        warn!(
            event = "unit_failed",
            run_id = %self.run_id,
            region = %unit.region,
            category = %unit.category,
            error_kind = %kind,
            attempts = attempts,
            error = %error,
            "Collection unit failed"
        );
    }

    /// Log an analysis batch degraded to manual review
    pub fn log_batch_degraded(&self, batch_index: usize, resources: usize, kind: ErrorKind, error: &str) {
        warn!(
            event = "batch_degraded",
            run_id = %self.run_id,
            batch_index = batch_index,
            resources = resources,
            error_kind = %kind,
            error = %error,
            "Analysis batch degraded to manual review"
        );
    }

    /// Log a dependency whose circuit is not closed at the end of a run
    pub fn log_circuit_state(&self, dependency: &str, state: CircuitState, failures: u32) {
        match state {
            CircuitState::Closed => {}
            _ => warn!(
                event = "circuit_transition",
                run_id = %self.run_id,
                dependency = %dependency,
                state = %state,
                consecutive_failures = failures,
                "Dependency circuit not closed"
            ),
        }
    }

    /// Log a budget alert threshold crossing
    pub fn log_budget_alert(&self, budget_id: &str, utilization: f64, threshold: f64) {
        warn!(
            event = "budget_threshold_exceeded",
            run_id = %self.run_id,
            budget_id = %budget_id,
            utilization_percent = utilization * 100.0,
            threshold_percent = threshold * 100.0,
            "Budget alert threshold exceeded"
        );
    }

    /// Log the final report summary
    pub fn log_report_generated(
        &self,
        resources: usize,
        recommendations: usize,
        monthly_savings: f64,
        failed_units: usize,
        complete: bool,
    ) {
        if complete {
            info!(
                event = "report_generated",
                run_id = %self.run_id,
                resources = resources,
                recommendations = recommendations,
                monthly_savings = monthly_savings,
                "Analysis report generated"
            );
        } else {
            warn!(
                event = "report_generated",
                run_id = %self.run_id,
                resources = resources,
                recommendations = recommendations,
                monthly_savings = monthly_savings,
                failed_units = failed_units,
                "Analysis report generated with partial failures"
            );
        }
    }
}
