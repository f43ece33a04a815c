//! Core data models for the cost orchestrator

use crate::error::ValidationError;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

/// Region label used for categories collected once per account
pub const GLOBAL_REGION: &str = "global";

/// Hours used to turn an hourly rate into a monthly cost
pub const HOURS_PER_MONTH: f64 = 730.0;

/// Well-known metric names fetched during enrichment
pub mod metric_names {
    pub const CPU_UTILIZATION: &str = "CPUUtilization";
    pub const NETWORK_IN: &str = "NetworkIn";
    pub const NETWORK_OUT: &str = "NetworkOut";
    pub const DATABASE_CONNECTIONS: &str = "DatabaseConnections";
    pub const FREE_STORAGE_SPACE: &str = "FreeStorageSpace";
    pub const CURR_CONNECTIONS: &str = "CurrConnections";
    pub const INVOCATIONS: &str = "Invocations";
    pub const DURATION: &str = "Duration";
    pub const VOLUME_READ_OPS: &str = "VolumeReadOps";
    pub const VOLUME_WRITE_OPS: &str = "VolumeWriteOps";
    pub const REQUEST_COUNT: &str = "RequestCount";
    pub const BUCKET_SIZE_BYTES: &str = "BucketSizeBytes";
    pub const REQUESTS: &str = "Requests";
}

/// Cloud resource categories the collectors know how to list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Ec2,
    Rds,
    Ebs,
    Elb,
    ElastiCache,
    Lambda,
    S3,
    CloudFront,
    Route53,
}

impl ResourceType {
    pub const ALL: [ResourceType; 9] = [
        ResourceType::Ec2,
        ResourceType::Rds,
        ResourceType::Ebs,
        ResourceType::Elb,
        ResourceType::ElastiCache,
        ResourceType::Lambda,
        ResourceType::S3,
        ResourceType::CloudFront,
        ResourceType::Route53,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Ec2 => "ec2",
            ResourceType::Rds => "rds",
            ResourceType::Ebs => "ebs",
            ResourceType::Elb => "elb",
            ResourceType::ElastiCache => "elasticache",
            ResourceType::Lambda => "lambda",
            ResourceType::S3 => "s3",
            ResourceType::CloudFront => "cloudfront",
            ResourceType::Route53 => "route53",
        }
    }

    /// Global categories are listed once per account, not per region
    pub fn is_global(&self) -> bool {
        matches!(
            self,
            ResourceType::S3 | ResourceType::CloudFront | ResourceType::Route53
        )
    }

    /// Metrics fetched for this category during enrichment
    pub fn default_metrics(&self) -> &'static [&'static str] {
        use metric_names::*;
        match self {
            ResourceType::Ec2 => &[CPU_UTILIZATION, NETWORK_IN, NETWORK_OUT],
            ResourceType::Rds => &[CPU_UTILIZATION, DATABASE_CONNECTIONS, FREE_STORAGE_SPACE],
            ResourceType::ElastiCache => &[CPU_UTILIZATION, CURR_CONNECTIONS],
            ResourceType::Lambda => &[INVOCATIONS, DURATION],
            ResourceType::Ebs => &[VOLUME_READ_OPS, VOLUME_WRITE_OPS],
            ResourceType::Elb => &[REQUEST_COUNT],
            ResourceType::S3 => &[BUCKET_SIZE_BYTES],
            ResourceType::CloudFront => &[REQUESTS],
            ResourceType::Route53 => &[],
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        ResourceType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == normalized)
            .ok_or_else(|| ValidationError::Unknown {
                kind: "resource category",
                value: s.to_string(),
            })
    }
}

/// A single observation in a metric series
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

impl MetricPoint {
    pub fn new(timestamp: DateTime<Utc>, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// Time series ordered ascending by timestamp, not necessarily regular
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<MetricPoint>", into = "Vec<MetricPoint>")]
pub struct MetricSeries {
    points: Vec<MetricPoint>,
}

impl From<Vec<MetricPoint>> for MetricSeries {
    fn from(points: Vec<MetricPoint>) -> Self {
        Self::new(points)
    }
}

impl From<MetricSeries> for Vec<MetricPoint> {
    fn from(series: MetricSeries) -> Self {
        series.points
    }
}

/// Derived statistics over a whole series
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub count: usize,
    pub mean: f64,
    pub p95: f64,
    pub p99: f64,
    pub max: f64,
}

impl MetricSeries {
    pub fn new(mut points: Vec<MetricPoint>) -> Self {
        points.retain(|p| p.value.is_finite());
        points.sort_by_key(|p| p.timestamp);
        Self { points }
    }

    pub fn points(&self) -> &[MetricPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn mean(&self) -> Option<f64> {
        if self.points.is_empty() {
            return None;
        }
        Some(self.points.iter().map(|p| p.value).sum::<f64>() / self.points.len() as f64)
    }

    pub fn max(&self) -> Option<f64> {
        self.points.iter().map(|p| p.value).reduce(f64::max)
    }

    /// Nearest-rank percentile, `p` in [0, 100]
    pub fn percentile(&self, p: f64) -> Option<f64> {
        if self.points.is_empty() {
            return None;
        }
        let mut sorted: Vec<f64> = self.points.iter().map(|p| p.value).collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let idx = ((p.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64).round() as usize;
        Some(sorted[idx.min(sorted.len() - 1)])
    }

    pub fn summary(&self) -> Option<MetricSummary> {
        Some(MetricSummary {
            count: self.points.len(),
            mean: self.mean()?,
            p95: self.percentile(95.0)?,
            p99: self.percentile(99.0)?,
            max: self.max()?,
        })
    }
}

/// A cloud resource as produced by the collection step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: String,
    #[serde(rename = "type")]
    pub resource_type: ResourceType,
    pub region: String,
    pub account: String,
    #[serde(default)]
    pub tags: HashMap<String, String>,
    #[serde(default)]
    pub configuration: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<BTreeMap<String, MetricSeries>>,
    pub created_at: DateTime<Utc>,
}

impl Resource {
    pub fn new(
        id: impl Into<String>,
        resource_type: ResourceType,
        region: impl Into<String>,
        account: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        let resource = Self {
            id: id.into(),
            resource_type,
            region: region.into(),
            account: account.into(),
            tags: HashMap::new(),
            configuration: BTreeMap::new(),
            metrics: None,
            created_at: Utc::now(),
        };
        resource.validate()?;
        Ok(resource)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.id.trim().is_empty() {
            return Err(ValidationError::Empty("resource id"));
        }
        if self.region.trim().is_empty() {
            return Err(ValidationError::Empty("resource region"));
        }
        Ok(())
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn with_config(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.configuration.insert(key.into(), value);
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Attach fetched metrics; the resource is read-only afterwards
    pub fn with_metrics(mut self, metrics: Option<BTreeMap<String, MetricSeries>>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Tag lookup with a case-insensitive key
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_production(&self) -> bool {
        ["environment", "env", "stage"].iter().any(|key| {
            self.tag(key)
                .map(|v| matches!(v.to_ascii_lowercase().as_str(), "production" | "prod"))
                .unwrap_or(false)
        })
    }

    pub fn is_high_criticality(&self) -> bool {
        self.tag("criticality")
            .map(|v| matches!(v.to_ascii_lowercase().as_str(), "high" | "critical"))
            .unwrap_or(false)
    }

    pub fn config_f64(&self, key: &str) -> Option<f64> {
        self.configuration.get(key).and_then(|v| v.as_f64())
    }

    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.configuration.get(key).and_then(|v| v.as_str())
    }

    /// List-price monthly cost from `monthly_cost` or `hourly_cost`
    pub fn list_monthly_cost(&self) -> f64 {
        self.config_f64("monthly_cost")
            .or_else(|| self.config_f64("hourly_cost").map(|h| h * HOURS_PER_MONTH))
            .filter(|c| c.is_finite() && *c > 0.0)
            .unwrap_or(0.0)
    }

    pub fn metric(&self, name: &str) -> Option<&MetricSeries> {
        self.metrics.as_ref().and_then(|m| m.get(name))
    }

    pub fn age_days(&self, now: DateTime<Utc>) -> i64 {
        (now - self.created_at).num_days().max(0)
    }
}

/// Atomic unit of collection fan-out
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CollectionUnit {
    pub region: String,
    pub category: ResourceType,
}

impl CollectionUnit {
    pub fn new(region: impl Into<String>, category: ResourceType) -> Self {
        Self {
            region: region.into(),
            category,
        }
    }

    pub fn global(category: ResourceType) -> Self {
        Self::new(GLOBAL_REGION, category)
    }

    pub fn is_global(&self) -> bool {
        self.region == GLOBAL_REGION
    }
}

impl fmt::Display for CollectionUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.region, self.category)
    }
}

/// Non-negative monetary amount
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Money {
    pub amount: f64,
    pub currency: String,
}

impl Money {
    /// Negative or non-finite amounts are normalized to zero
    pub fn new(amount: f64, currency: impl Into<String>) -> Self {
        let amount = if amount.is_finite() && amount > 0.0 {
            amount
        } else {
            0.0
        };
        Self {
            amount,
            currency: currency.into(),
        }
    }

    pub fn zero(currency: impl Into<String>) -> Self {
        Self::new(0.0, currency)
    }

    pub fn is_zero(&self) -> bool {
        self.amount == 0.0
    }

    pub fn scale(&self, factor: f64) -> Self {
        Self::new(self.amount * factor, self.currency.clone())
    }

    pub fn checked_add(&self, other: &Money) -> Result<Money, ValidationError> {
        if self.currency != other.currency {
            return Err(ValidationError::CurrencyMismatch {
                expected: self.currency.clone(),
                actual: other.currency.clone(),
            });
        }
        Ok(Self::new(self.amount + other.amount, self.currency.clone()))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2} {}", self.amount, self.currency)
    }
}

/// Proposed cost-optimization action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    Downsize,
    Upsize,
    Delete,
    Optimize,
    Reserve,
    NoChange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

/// A suggested action for one resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub resource_id: String,
    pub resource_type: ResourceType,
    pub region: String,
    pub action: Action,
    pub monthly_savings: Money,
    /// In [0, 1]
    pub confidence: f64,
    pub risk: RiskLevel,
    pub priority: Priority,
    pub reason: String,
    #[serde(default)]
    pub manual_review: bool,
}

impl Recommendation {
    pub fn new(
        resource: &Resource,
        action: Action,
        monthly_savings: Money,
        confidence: f64,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            resource_id: resource.id.clone(),
            resource_type: resource.resource_type,
            region: resource.region.clone(),
            action,
            monthly_savings,
            confidence: clamp_unit(confidence),
            risk: RiskLevel::Low,
            priority: Priority::Low,
            reason: reason.into(),
            manual_review: false,
        }
    }

    /// Placeholder used when the backend could not analyze the resource
    pub fn manual_review(resource: &Resource, currency: &str, reason: impl Into<String>) -> Self {
        let mut rec = Self::new(resource, Action::NoChange, Money::zero(currency), 0.0, reason);
        rec.manual_review = true;
        rec
    }

    pub fn with_assessment(mut self, risk: RiskLevel, priority: Priority) -> Self {
        self.risk = risk;
        self.priority = priority;
        self
    }

    pub fn annual_savings(&self) -> Money {
        self.monthly_savings.scale(12.0)
    }
}

/// Forecasting model selected by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForecastModel {
    #[default]
    Linear,
    Exponential,
    Seasonal,
}

impl fmt::Display for ForecastModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ForecastModel::Linear => f.write_str("linear"),
            ForecastModel::Exponential => f.write_str("exponential"),
            ForecastModel::Seasonal => f.write_str("seasonal"),
        }
    }
}

impl FromStr for ForecastModel {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "linear" => Ok(ForecastModel::Linear),
            "exponential" => Ok(ForecastModel::Exponential),
            "seasonal" => Ok(ForecastModel::Seasonal),
            _ => Err(ValidationError::Unknown {
                kind: "forecast model",
                value: s.to_string(),
            }),
        }
    }
}

/// Predicted cost over a horizon with the coefficients that produced it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostForecast {
    /// Cost center, or `total` for the account-wide series
    pub target: String,
    pub model: ForecastModel,
    pub predicted_amount: Money,
    /// In [0, 1]
    pub confidence_interval: f64,
    pub horizon_days: u32,
    pub factors: BTreeMap<String, f64>,
}

/// Cost incurred on one day
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DailyCost {
    pub date: NaiveDate,
    pub amount: f64,
}

/// Cost totals for a period as returned by the cost data provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostData {
    pub currency: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Ascending by date
    pub daily: Vec<DailyCost>,
    #[serde(default)]
    pub by_service: BTreeMap<String, f64>,
    #[serde(default)]
    pub by_cost_center: BTreeMap<String, Vec<DailyCost>>,
}

impl CostData {
    pub fn total(&self) -> Money {
        Money::new(self.daily.iter().map(|d| d.amount).sum(), self.currency.clone())
    }
}

/// Narrowing applied to cost queries
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostFilters {
    #[serde(default)]
    pub regions: Vec<String>,
    #[serde(default)]
    pub services: Vec<String>,
}

impl CostFilters {
    pub fn for_regions(regions: &[String]) -> Self {
        Self {
            regions: regions.to_vec(),
            services: Vec::new(),
        }
    }

    /// Stable fragment for cache keys
    pub fn cache_fragment(&self) -> String {
        let mut regions = self.regions.clone();
        regions.sort();
        let mut services = self.services.clone();
        services.sort();
        format!("r={};s={}", regions.join(","), services.join(","))
    }
}

/// Spending limit over a time range with utilization alert thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Budget {
    id: String,
    name: String,
    allocated: Money,
    spent: Money,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    thresholds: Vec<f64>,
}

impl Budget {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        allocated: Money,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        mut thresholds: Vec<f64>,
    ) -> Result<Self, ValidationError> {
        if end <= start {
            return Err(ValidationError::InvalidTimeRange);
        }
        for t in &thresholds {
            if !(0.0..=1.0).contains(t) {
                return Err(ValidationError::OutOfUnitRange {
                    field: "alert threshold",
                    value: *t,
                });
            }
        }
        thresholds.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        thresholds.dedup();

        let spent = Money::zero(allocated.currency.clone());
        Ok(Self {
            id: id.into(),
            name: name.into(),
            allocated,
            spent,
            start,
            end,
            thresholds,
        })
    }

    /// Spend known at construction time, before any refresh
    pub fn with_initial_spent(mut self, amount: f64) -> Self {
        self.spent = Money::new(amount, self.allocated.currency.clone());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn allocated(&self) -> &Money {
        &self.allocated
    }

    pub fn spent(&self) -> &Money {
        &self.spent
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn thresholds(&self) -> &[f64] {
        &self.thresholds
    }

    /// spent / allocated, 0 when nothing is allocated
    pub fn utilization(&self) -> f64 {
        if self.allocated.amount == 0.0 {
            return 0.0;
        }
        self.spent.amount / self.allocated.amount
    }

    /// Every threshold with `utilization >= threshold`, ascending
    pub fn exceeded_thresholds(&self) -> Vec<f64> {
        let utilization = self.utilization();
        self.thresholds
            .iter()
            .copied()
            .filter(|t| utilization >= *t)
            .collect()
    }

    pub(crate) fn refresh_spent(&mut self, spent: &Money) -> Result<(), ValidationError> {
        if spent.currency != self.allocated.currency {
            return Err(ValidationError::CurrencyMismatch {
                expected: self.allocated.currency.clone(),
                actual: spent.currency.clone(),
            });
        }
        self.spent = spent.clone();
        Ok(())
    }
}

pub(crate) fn clamp_unit(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn ts(offset_secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + offset_secs, 0).unwrap()
    }

    #[test]
    fn test_resource_validation() {
        assert!(Resource::new("i-1", ResourceType::Ec2, "us-east-1", "123").is_ok());
        assert_eq!(
            Resource::new("", ResourceType::Ec2, "us-east-1", "123").unwrap_err(),
            ValidationError::Empty("resource id")
        );
        assert_eq!(
            Resource::new("i-1", ResourceType::Ec2, " ", "123").unwrap_err(),
            ValidationError::Empty("resource region")
        );
    }

    #[test]
    fn test_production_and_criticality_tags() {
        let r = Resource::new("i-1", ResourceType::Ec2, "us-east-1", "123")
            .unwrap()
            .with_tag("Environment", "Prod")
            .with_tag("Criticality", "high");
        assert!(r.is_production());
        assert!(r.is_high_criticality());

        let dev = Resource::new("i-2", ResourceType::Ec2, "us-east-1", "123")
            .unwrap()
            .with_tag("env", "dev");
        assert!(!dev.is_production());
        assert!(!dev.is_high_criticality());
    }

    #[test]
    fn test_monthly_cost_from_hourly() {
        let r = Resource::new("i-1", ResourceType::Ec2, "us-east-1", "123")
            .unwrap()
            .with_config("hourly_cost", serde_json::json!(0.1));
        assert!((r.list_monthly_cost() - 73.0).abs() < 1e-9);
    }

    #[test]
    fn test_metric_series_sorted_and_stats() {
        let series = MetricSeries::new(vec![
            MetricPoint::new(ts(20), 3.0),
            MetricPoint::new(ts(0), 1.0),
            MetricPoint::new(ts(10), 2.0),
        ]);
        let values: Vec<f64> = series.points().iter().map(|p| p.value).collect();
        assert_eq!(values, vec![1.0, 2.0, 3.0]);

        let summary = series.summary().unwrap();
        assert_eq!(summary.count, 3);
        assert!((summary.mean - 2.0).abs() < 1e-9);
        assert_eq!(summary.max, 3.0);
        assert_eq!(summary.p99, 3.0);
        assert!(MetricSeries::default().summary().is_none());
    }

    #[test]
    fn test_metric_series_deserialize_sorts() {
        let json = r#"[{"timestamp":"2024-01-02T00:00:00Z","value":2.0},
                       {"timestamp":"2024-01-01T00:00:00Z","value":1.0}]"#;
        let series: MetricSeries = serde_json::from_str(json).unwrap();
        assert_eq!(series.points()[0].value, 1.0);
    }

    #[test]
    fn test_money_is_never_negative() {
        assert_eq!(Money::new(-5.0, "USD").amount, 0.0);
        assert_eq!(Money::new(f64::NAN, "USD").amount, 0.0);
        assert!(Money::new(1.0, "USD")
            .checked_add(&Money::new(1.0, "EUR"))
            .is_err());
    }

    #[test]
    fn test_budget_utilization_and_thresholds() {
        let budget = Budget::new(
            "b-1",
            "platform",
            Money::new(1000.0, "USD"),
            ts(0),
            ts(0) + Duration::days(30),
            vec![1.0, 0.8, 0.9],
        )
        .unwrap()
        .with_initial_spent(850.0);

        assert!((budget.utilization() - 0.85).abs() < 1e-9);
        assert_eq!(budget.thresholds(), &[0.8, 0.9, 1.0]);
        assert_eq!(budget.exceeded_thresholds(), vec![0.8]);
    }

    #[test]
    fn test_budget_zero_allocation_and_invalid_range() {
        let budget = Budget::new(
            "b-1",
            "empty",
            Money::zero("USD"),
            ts(0),
            ts(60),
            vec![0.5],
        )
        .unwrap()
        .with_initial_spent(10.0);
        assert_eq!(budget.utilization(), 0.0);
        assert!(budget.exceeded_thresholds().is_empty());

        assert_eq!(
            Budget::new("b", "bad", Money::zero("USD"), ts(60), ts(60), vec![]).unwrap_err(),
            ValidationError::InvalidTimeRange
        );
        assert!(Budget::new("b", "bad", Money::zero("USD"), ts(0), ts(60), vec![1.5]).is_err());
    }

    #[test]
    fn test_resource_type_parsing() {
        assert_eq!("EC2".parse::<ResourceType>().unwrap(), ResourceType::Ec2);
        assert_eq!(" s3 ".parse::<ResourceType>().unwrap(), ResourceType::S3);
        assert!("mainframe".parse::<ResourceType>().is_err());
        assert!(ResourceType::S3.is_global());
        assert!(!ResourceType::Rds.is_global());
    }
}
