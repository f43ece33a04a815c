//! Fan-out of inventory and metrics collection
//!
//! Every (region, category) unit runs as its own task through the caller
//! of its category's dependency, so a failing RDS API never opens the
//! circuit used for EC2 listings. Failures land in the ledger; completed
//! units are kept even when the run is cut short.

use super::{InventoryCollector, MetricsProvider, PartialFailure, PartialFailureLedger};
use crate::context::RunContext;
use crate::error::ErrorKind;
use crate::models::{CollectionUnit, Resource, ResourceType};
use crate::observability::OrchestratorMetrics;
use crate::resilience::{dependencies, CallOutcome, CallerRegistry};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Configuration for collection fan-out
#[derive(Debug, Clone)]
pub struct CollectionConfig {
    /// Units allowed in flight at once across all dependencies (default: 64)
    pub max_inflight_units: usize,
    /// Fetch metric series for collected resources (default: true)
    pub enrich_metrics: bool,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            max_inflight_units: 64,
            enrich_metrics: true,
        }
    }
}

/// Resources gathered by a collection pass and the units that failed
#[derive(Debug, Clone, Default)]
pub struct CollectionOutcome {
    /// Sorted by region, category, id
    pub resources: Vec<Resource>,
    pub ledger: PartialFailureLedger,
    pub units_total: usize,
}

/// Result of the metrics enrichment pass
#[derive(Debug, Clone, Default)]
pub struct EnrichmentOutcome {
    /// Same resources, same order, metrics attached where available
    pub resources: Vec<Resource>,
    /// Ids whose metrics could not be fetched, sorted
    pub metrics_unavailable: Vec<String>,
}

/// Expand requested regions and categories into collection units
///
/// Regional categories produce one unit per region; global categories
/// produce a single unit. Duplicates are dropped.
pub fn plan_units(regions: &[String], categories: &[ResourceType]) -> Vec<CollectionUnit> {
    let mut seen = HashSet::new();
    let mut units = Vec::new();
    for category in categories {
        if category.is_global() {
            let unit = CollectionUnit::global(*category);
            if seen.insert(unit.clone()) {
                units.push(unit);
            }
            continue;
        }
        for region in regions {
            let unit = CollectionUnit::new(region.trim(), *category);
            if seen.insert(unit.clone()) {
                units.push(unit);
            }
        }
    }
    units
}

/// Collection orchestrator that fans out units over a shared caller registry
pub struct CollectionOrchestrator {
    inventory: Arc<dyn InventoryCollector>,
    metrics: Arc<dyn MetricsProvider>,
    callers: Arc<CallerRegistry>,
    config: CollectionConfig,
    telemetry: OrchestratorMetrics,
}

impl CollectionOrchestrator {
    pub fn new(
        inventory: Arc<dyn InventoryCollector>,
        metrics: Arc<dyn MetricsProvider>,
        callers: Arc<CallerRegistry>,
        config: CollectionConfig,
    ) -> Self {
        Self {
            inventory,
            metrics,
            callers,
            config,
            telemetry: OrchestratorMetrics::new(),
        }
    }

    pub fn config(&self) -> &CollectionConfig {
        &self.config
    }

    /// List resources for every unit, recording failures instead of raising
    pub async fn collect(&self, units: Vec<CollectionUnit>, ctx: &RunContext) -> CollectionOutcome {
        let units_total = units.len();
        let slots = Arc::new(Semaphore::new(self.config.max_inflight_units.max(1)));
        let mut pending: HashSet<CollectionUnit> = units.iter().cloned().collect();
        let mut tasks = JoinSet::new();

        for unit in units {
            let inventory = self.inventory.clone();
            let caller = self.callers.caller(&dependencies::inventory(unit.category));
            let slots = slots.clone();
            let token = ctx.cancel_token().clone();

            tasks.spawn(async move {
                let _slot = slots.acquire_owned().await;
                let outcome = caller
                    .call_tracked(
                        || {
                            let inventory = inventory.clone();
                            let region = unit.region.clone();
                            let category = unit.category;
                            async move { inventory.list_resources(&region, category).await }
                        },
                        &token,
                    )
                    .await;
                (unit, outcome)
            });
        }

        let mut resources = Vec::new();
        let mut ledger = PartialFailureLedger::new();
        let mut abandoned = None;

        loop {
            tokio::select! {
                biased;
                kind = ctx.interrupted() => {
                    abandoned = Some(kind);
                    break;
                }
                joined = tasks.join_next() => match joined {
                    None => break,
                    Some(Ok((unit, outcome))) => {
                        pending.remove(&unit);
                        self.absorb_unit(unit, outcome, &mut resources, &mut ledger, ctx);
                    }
                    Some(Err(e)) => {
                        warn!(run_id = %ctx.run_id(), error = %e, "Collection task did not complete");
                    }
                },
            }
        }

        // In-flight units are dropped, not awaited
        tasks.abort_all();

        let mut leftover: Vec<CollectionUnit> = pending.into_iter().collect();
        leftover.sort();
        let kind = abandoned.unwrap_or(ErrorKind::Internal);
        for unit in leftover {
            ctx.logger().log_unit_failed(&unit, kind, 0, "unit abandoned");
            self.telemetry.inc_units_failed();
            ledger.record(PartialFailure::abandoned(unit, kind));
        }

        resources.sort_by(|a, b| {
            (&a.region, a.resource_type, &a.id).cmp(&(&b.region, b.resource_type, &b.id))
        });
        // Resource ids are the identity downstream, first listing wins
        let mut seen = HashSet::new();
        resources.retain(|r| seen.insert(r.id.clone()));
        self.telemetry.set_resources_collected(resources.len());

        info!(
            run_id = %ctx.run_id(),
            units = units_total,
            failed_units = ledger.len(),
            resources = resources.len(),
            "Collection complete"
        );

        CollectionOutcome {
            resources,
            ledger,
            units_total,
        }
    }

    fn absorb_unit(
        &self,
        unit: CollectionUnit,
        outcome: CallOutcome<Vec<Resource>>,
        resources: &mut Vec<Resource>,
        ledger: &mut PartialFailureLedger,
        ctx: &RunContext,
    ) {
        match outcome.result {
            Ok(listed) => {
                let before = resources.len();
                for resource in listed {
                    match resource.validate() {
                        Ok(()) => resources.push(resource),
                        Err(e) => warn!(
                            unit = %unit,
                            resource_id = %resource.id,
                            error = %e,
                            "Dropping invalid resource"
                        ),
                    }
                }
                debug!(
                    unit = %unit,
                    attempts = outcome.attempts,
                    resources = resources.len() - before,
                    "Unit collected"
                );
            }
            Err(e) => {
                let failure = PartialFailure::from_error(unit, &e, outcome.attempts);
                ctx.logger().log_unit_failed(
                    &failure.unit,
                    failure.error_kind,
                    failure.attempts,
                    &failure.last_error,
                );
                self.telemetry.inc_units_failed();
                ledger.record(failure);
            }
        }
    }

    /// Attach metric series to each resource
    ///
    /// A resource whose metrics cannot be fetched keeps `metrics: None`
    /// and is listed in `metrics_unavailable`. No resource is ever dropped.
    pub async fn enrich_metrics(
        &self,
        mut resources: Vec<Resource>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        ctx: &RunContext,
    ) -> EnrichmentOutcome {
        let slots = Arc::new(Semaphore::new(self.config.max_inflight_units.max(1)));
        let mut tasks = JoinSet::new();
        let mut pending: HashSet<usize> = HashSet::new();

        for (index, resource) in resources.iter().enumerate() {
            let names = resource.resource_type.default_metrics();
            if names.is_empty() {
                continue;
            }
            pending.insert(index);

            let provider = self.metrics.clone();
            let caller = self.callers.caller(&dependencies::metrics(resource.resource_type));
            let slots = slots.clone();
            let token = ctx.cancel_token().clone();
            let resource_id = resource.id.clone();
            let category = resource.resource_type;

            tasks.spawn(async move {
                let _slot = slots.acquire_owned().await;
                let mut series = BTreeMap::new();
                for name in names {
                    let outcome = caller
                        .call_tracked(
                            || {
                                let provider = provider.clone();
                                let resource_id = resource_id.clone();
                                async move {
                                    provider
                                        .fetch_series(&resource_id, category, name, start, end)
                                        .await
                                }
                            },
                            &token,
                        )
                        .await;
                    match outcome.result {
                        Ok(points) => {
                            series.insert(name.to_string(), points);
                        }
                        Err(e) => return (index, Err(e)),
                    }
                }
                (index, Ok(series))
            });
        }

        let mut unavailable = Vec::new();
        let mut interrupted = false;

        loop {
            tokio::select! {
                biased;
                _ = ctx.interrupted() => {
                    interrupted = true;
                    break;
                }
                joined = tasks.join_next() => match joined {
                    None => break,
                    Some(Ok((index, Ok(series)))) => {
                        pending.remove(&index);
                        resources[index].metrics = Some(series);
                    }
                    Some(Ok((index, Err(e)))) => {
                        pending.remove(&index);
                        debug!(
                            resource_id = %resources[index].id,
                            error = %e,
                            "Metrics unavailable"
                        );
                        unavailable.push(resources[index].id.clone());
                    }
                    Some(Err(e)) => {
                        warn!(run_id = %ctx.run_id(), error = %e, "Metrics task did not complete");
                    }
                },
            }
        }
        tasks.abort_all();

        unavailable.extend(pending.into_iter().map(|index| resources[index].id.clone()));
        unavailable.sort();
        unavailable.dedup();

        if !unavailable.is_empty() {
            warn!(
                run_id = %ctx.run_id(),
                unavailable = unavailable.len(),
                interrupted = interrupted,
                "Some resources have no metrics"
            );
        }

        EnrichmentOutcome {
            resources,
            metrics_unavailable: unavailable,
        }
    }
}
