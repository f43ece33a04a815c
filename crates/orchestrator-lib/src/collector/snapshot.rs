//! File-backed collaborators for offline runs
//!
//! A snapshot is a JSON document holding an inventory, metric series per
//! resource and daily costs. Regions listed in `failing_regions` fail every
//! inventory call with a transient error.

use super::{CostDataProvider, InventoryCollector, MetricsProvider};
use crate::error::CallError;
use crate::models::{
    CostData, CostFilters, DailyCost, MetricSeries, Resource, ResourceType, GLOBAL_REGION,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::{debug, info};

fn default_currency() -> String {
    "USD".to_string()
}

/// On-disk snapshot layout
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InventorySnapshot {
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub resources: Vec<Resource>,
    /// Resource id to metric name to series
    #[serde(default)]
    pub metrics: BTreeMap<String, BTreeMap<String, MetricSeries>>,
    #[serde(default)]
    pub daily_costs: Vec<DailyCost>,
    #[serde(default)]
    pub cost_centers: BTreeMap<String, Vec<DailyCost>>,
    #[serde(default)]
    pub services: BTreeMap<String, f64>,
    #[serde(default)]
    pub failing_regions: BTreeSet<String>,
}

/// Serves inventory, metrics and cost data from an [`InventorySnapshot`]
#[derive(Debug, Clone)]
pub struct SnapshotProvider {
    snapshot: InventorySnapshot,
}

impl SnapshotProvider {
    pub fn new(snapshot: InventorySnapshot) -> Self {
        Self { snapshot }
    }

    /// Read and parse a snapshot file
    pub async fn load(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read snapshot {}", path.display()))?;
        let snapshot: InventorySnapshot = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse snapshot {}", path.display()))?;

        info!(
            path = %path.display(),
            resources = snapshot.resources.len(),
            cost_days = snapshot.daily_costs.len(),
            "Loaded inventory snapshot"
        );
        Ok(Self::new(snapshot))
    }

    /// Make every inventory call for these regions fail
    pub fn with_failing_regions<I, S>(mut self, regions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.snapshot
            .failing_regions
            .extend(regions.into_iter().map(Into::into));
        self
    }

    pub fn snapshot(&self) -> &InventorySnapshot {
        &self.snapshot
    }
}

fn within(days: &[DailyCost], start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<DailyCost> {
    let (first, last) = (start.date_naive(), end.date_naive());
    let mut selected: Vec<DailyCost> = days
        .iter()
        .filter(|d| d.date >= first && d.date <= last)
        .copied()
        .collect();
    selected.sort_by_key(|d| d.date);
    selected
}

#[async_trait]
impl InventoryCollector for SnapshotProvider {
    async fn list_resources(
        &self,
        region: &str,
        category: ResourceType,
    ) -> Result<Vec<Resource>, CallError> {
        if self.snapshot.failing_regions.contains(region) {
            return Err(CallError::transient(format!("region {} unavailable", region)));
        }

        let global = region == GLOBAL_REGION;
        let listed: Vec<Resource> = self
            .snapshot
            .resources
            .iter()
            .filter(|r| r.resource_type == category && (global || r.region == region))
            .cloned()
            .collect();

        debug!(region = %region, category = %category, count = listed.len(), "Listed snapshot resources");
        Ok(listed)
    }
}

#[async_trait]
impl MetricsProvider for SnapshotProvider {
    async fn fetch_series(
        &self,
        resource_id: &str,
        _category: ResourceType,
        metric_name: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<MetricSeries, CallError> {
        let points: Vec<_> = self
            .snapshot
            .metrics
            .get(resource_id)
            .and_then(|by_name| by_name.get(metric_name))
            .map(|series| {
                series
                    .points()
                    .iter()
                    .filter(|p| p.timestamp >= start && p.timestamp <= end)
                    .copied()
                    .collect()
            })
            .unwrap_or_default();
        Ok(MetricSeries::new(points))
    }
}

#[async_trait]
impl CostDataProvider for SnapshotProvider {
    async fn get_cost_data(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        _filters: &CostFilters,
    ) -> Result<CostData, CallError> {
        if end <= start {
            return Err(CallError::permanent("cost query end must be after start"));
        }

        Ok(CostData {
            currency: self.snapshot.currency.clone(),
            start,
            end,
            daily: within(&self.snapshot.daily_costs, start, end),
            by_service: self.snapshot.services.clone(),
            by_cost_center: self
                .snapshot
                .cost_centers
                .iter()
                .map(|(center, days)| (center.clone(), within(days, start, end)))
                .collect(),
        })
    }
}
