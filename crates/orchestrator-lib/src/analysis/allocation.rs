//! Allocation of effective monthly cost by tag value

use super::PricingPipeline;
use crate::models::{Money, Resource};
use serde::Serialize;
use std::collections::BTreeMap;

/// Bucket for resources without the allocation tag
pub const UNTAGGED: &str = "untagged";

/// Cost attributed to one tag value
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CostAllocation {
    pub key: String,
    pub monthly_cost: Money,
    /// Fraction of the total, shares of one run sum to 1
    pub share: f64,
    pub resource_count: usize,
}

/// Group resources by the value of `tag` and split the total monthly cost
///
/// Shares follow cost; when every resource is free they follow resource
/// count instead. Sorted by descending cost, then key.
pub fn allocate_by_tag(
    resources: &[Resource],
    tag: &str,
    pricing: &PricingPipeline,
    currency: &str,
) -> Vec<CostAllocation> {
    let mut buckets: BTreeMap<String, (f64, usize)> = BTreeMap::new();
    for resource in resources {
        let key = resource
            .tag(tag)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .unwrap_or(UNTAGGED)
            .to_string();
        let cost = pricing.apply(&Money::new(resource.list_monthly_cost(), currency));
        let bucket = buckets.entry(key).or_insert((0.0, 0));
        bucket.0 += cost.amount;
        bucket.1 += 1;
    }

    let total_cost: f64 = buckets.values().map(|(cost, _)| cost).sum();
    let total_count = resources.len().max(1) as f64;

    let mut allocations: Vec<CostAllocation> = buckets
        .into_iter()
        .map(|(key, (cost, count))| CostAllocation {
            share: if total_cost > 0.0 {
                cost / total_cost
            } else {
                count as f64 / total_count
            },
            monthly_cost: Money::new(cost, currency),
            resource_count: count,
            key,
        })
        .collect();

    allocations.sort_by(|a, b| {
        b.monthly_cost
            .amount
            .total_cmp(&a.monthly_cost.amount)
            .then_with(|| a.key.cmp(&b.key))
    });
    allocations
}
