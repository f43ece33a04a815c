//! Collection of inventories, metrics and cost data
//!
//! This module defines the collaborator traits the orchestrator consumes
//! and the [`CollectionOrchestrator`] that fans out one task per
//! collection unit, isolating failures in a [`PartialFailureLedger`].

mod ledger;
mod orchestrator;
mod snapshot;


pub use ledger::{PartialFailure, PartialFailureLedger};
pub use orchestrator::{
    plan_units, CollectionConfig, CollectionOrchestrator, CollectionOutcome, EnrichmentOutcome,
};
pub use snapshot::{InventorySnapshot, SnapshotProvider};

use crate::error::CallError;
use crate::models::{CostData, CostFilters, MetricSeries, Resource, ResourceType};
use chrono::{DateTime, Utc};

pub use async_trait::async_trait;

/// Lists the resources of one category in one region
#[async_trait]
pub trait InventoryCollector: Send + Sync {
    /// `region` is [`GLOBAL_REGION`](crate::models::GLOBAL_REGION) for global categories
    async fn list_resources(
        &self,
        region: &str,
        category: ResourceType,
    ) -> Result<Vec<Resource>, CallError>;
}

/// Fetches a metric time series for one resource
#[async_trait]
pub trait MetricsProvider: Send + Sync {
    async fn fetch_series(
        &self,
        resource_id: &str,
        category: ResourceType,
        metric_name: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<MetricSeries, CallError>;
}

/// Reads billed cost for a period
#[async_trait]
pub trait CostDataProvider: Send + Sync {
    async fn get_cost_data(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        filters: &CostFilters,
    ) -> Result<CostData, CallError>;
}
