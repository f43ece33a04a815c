//! Heuristic recommendation backend driven by metric statistics

use super::rules::{derive_priority, derive_risk};
use super::{PricingPipeline, RecommendationBackend};
use crate::error::CallError;
use crate::models::{metric_names, Action, Money, Recommendation, Resource, ResourceType};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// CPU p95 and max under which a compute resource counts as idle
const IDLE_P95: f64 = 5.0;
const IDLE_MAX: f64 = 10.0;
const UNDERUSED_P95: f64 = 40.0;
const SATURATED_P95: f64 = 85.0;

/// Age after which steady compute is worth reserving
const RESERVE_AFTER_DAYS: i64 = 90;

/// Lambda memory above which tuning is suggested
const LAMBDA_MEMORY_MB: f64 = 1024.0;

/// Recommends actions from CPU statistics and resource configuration
#[derive(Debug, Clone)]
pub struct RuleBasedBackend {
    pricing: PricingPipeline,
    currency: String,
}

impl RuleBasedBackend {
    pub fn new(pricing: PricingPipeline, currency: impl Into<String>) -> Self {
        Self {
            pricing,
            currency: currency.into(),
        }
    }

    fn effective_cost(&self, resource: &Resource) -> Money {
        self.pricing
            .apply(&Money::new(resource.list_monthly_cost(), self.currency.clone()))
    }

    fn build(
        &self,
        resource: &Resource,
        action: Action,
        savings_fraction: f64,
        confidence: f64,
        reason: String,
    ) -> Recommendation {
        let savings = self.effective_cost(resource).scale(savings_fraction);
        let risk = derive_risk(action, resource, confidence);
        let priority = derive_priority(savings.amount);
        Recommendation::new(resource, action, savings, confidence, reason).with_assessment(risk, priority)
    }

    /// Recommendation for a single resource
    pub fn recommend(&self, resource: &Resource, now: DateTime<Utc>) -> Recommendation {
        match resource.resource_type {
            ResourceType::Ebs if resource.config_str("state") == Some("available") => self.build(
                resource,
                Action::Delete,
                1.0,
                0.9,
                "volume is not attached to any instance".to_string(),
            ),
            ResourceType::S3
                if resource
                    .config_str("storage_class")
                    .map(|c| c.eq_ignore_ascii_case("standard"))
                    .unwrap_or(false) =>
            {
                self.build(
                    resource,
                    Action::Optimize,
                    0.3,
                    0.6,
                    "move infrequently accessed objects to a cheaper storage class".to_string(),
                )
            }
            ResourceType::Lambda
                if resource.config_f64("memory_mb").unwrap_or(0.0) > LAMBDA_MEMORY_MB =>
            {
                self.build(
                    resource,
                    Action::Optimize,
                    0.25,
                    0.6,
                    "memory allocation above 1 GiB, tune to observed usage".to_string(),
                )
            }
            ResourceType::Ec2 | ResourceType::Rds | ResourceType::ElastiCache => {
                self.recommend_compute(resource, now)
            }
            _ => self.build(resource, Action::NoChange, 0.0, 0.5, "no rule applies".to_string()),
        }
    }

    fn recommend_compute(&self, resource: &Resource, now: DateTime<Utc>) -> Recommendation {
        let Some(cpu) = resource
            .metric(metric_names::CPU_UTILIZATION)
            .and_then(|series| series.summary())
        else {
            return self.build(
                resource,
                Action::NoChange,
                0.0,
                0.3,
                "insufficient metrics".to_string(),
            );
        };

        let confidence = if cpu.count >= 168 {
            0.9
        } else if cpu.count >= 24 {
            0.7
        } else {
            0.5
        };

        if cpu.p95 < IDLE_P95 && cpu.max < IDLE_MAX {
            return if resource.is_production() {
                self.build(
                    resource,
                    Action::Downsize,
                    0.5,
                    confidence,
                    format!("idle production resource (cpu p95 {:.1}%)", cpu.p95),
                )
            } else {
                self.build(
                    resource,
                    Action::Delete,
                    1.0,
                    confidence,
                    format!("idle resource (cpu p95 {:.1}%, max {:.1}%)", cpu.p95, cpu.max),
                )
            };
        }
        if cpu.p95 < UNDERUSED_P95 {
            return self.build(
                resource,
                Action::Downsize,
                0.4,
                confidence,
                format!("cpu p95 {:.1}% leaves headroom for a smaller size", cpu.p95),
            );
        }
        if cpu.p95 > SATURATED_P95 {
            return self.build(
                resource,
                Action::Upsize,
                0.0,
                confidence,
                format!("cpu p95 {:.1}% indicates saturation", cpu.p95),
            );
        }
        if resource.age_days(now) > RESERVE_AFTER_DAYS && resource.tag("reserved").is_none() {
            return self.build(
                resource,
                Action::Reserve,
                0.3,
                confidence,
                format!("steady usage for {} days without a reservation", resource.age_days(now)),
            );
        }
        self.build(
            resource,
            Action::NoChange,
            0.0,
            confidence,
            "utilization within target range".to_string(),
        )
    }
}

#[async_trait]
impl RecommendationBackend for RuleBasedBackend {
    async fn analyze_batch(&self, resources: &[Resource]) -> Result<Vec<Recommendation>, CallError> {
        let now = Utc::now();
        Ok(resources.iter().map(|r| self.recommend(r, now)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MetricPoint, MetricSeries, Priority, RiskLevel};
    use chrono::{Duration, TimeZone};
    use serde_json::json;
    use std::collections::BTreeMap;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
    }

    fn with_cpu(resource: Resource, values: &[f64]) -> Resource {
        let points: Vec<MetricPoint> = values
            .iter()
            .enumerate()
            .map(|(i, v)| MetricPoint::new(now() - Duration::hours(i as i64 + 1), *v))
            .collect();
        resource.with_metrics(Some(BTreeMap::from([(
            metric_names::CPU_UTILIZATION.to_string(),
            MetricSeries::new(points),
        )])))
    }

    fn ec2(id: &str, monthly: f64) -> Resource {
        Resource::new(id, ResourceType::Ec2, "us-east-1", "acct")
            .unwrap()
            .with_config("monthly_cost", json!(monthly))
            .with_created_at(now() - Duration::days(10))
    }

    fn backend() -> RuleBasedBackend {
        RuleBasedBackend::new(PricingPipeline::identity(), "USD")
    }

    #[test]
    fn test_idle_non_production_is_deleted() {
        let r = with_cpu(ec2("i-idle", 300.0), &[1.0; 30]);
        let rec = backend().recommend(&r, now());
        assert_eq!(rec.action, Action::Delete);
        assert_eq!(rec.monthly_savings.amount, 300.0);
        assert_eq!(rec.confidence, 0.7);
        assert_eq!(rec.risk, RiskLevel::High);
        assert_eq!(rec.priority, Priority::High);
    }

    #[test]
    fn test_idle_production_is_downsized() {
        let r = with_cpu(ec2("i-prod", 300.0).with_tag("env", "prod"), &[1.0; 200]);
        let rec = backend().recommend(&r, now());
        assert_eq!(rec.action, Action::Downsize);
        assert_eq!(rec.monthly_savings.amount, 150.0);
        assert_eq!(rec.confidence, 0.9);
        assert_eq!(rec.risk, RiskLevel::Medium);
    }

    #[test]
    fn test_underused_and_saturated() {
        let low = backend().recommend(&with_cpu(ec2("i-low", 100.0), &[20.0; 24]), now());
        assert_eq!(low.action, Action::Downsize);
        assert!((low.monthly_savings.amount - 40.0).abs() < 1e-9);

        let hot = backend().recommend(&with_cpu(ec2("i-hot", 100.0), &[95.0; 24]), now());
        assert_eq!(hot.action, Action::Upsize);
        assert!(hot.monthly_savings.is_zero());
    }

    #[test]
    fn test_old_steady_compute_is_reserved() {
        let r = with_cpu(
            ec2("i-steady", 1000.0).with_created_at(now() - Duration::days(200)),
            &[60.0; 24],
        );
        let rec = backend().recommend(&r, now());
        assert_eq!(rec.action, Action::Reserve);
        assert!((rec.monthly_savings.amount - 300.0).abs() < 1e-9);

        let reserved = backend().recommend(&r.clone().with_tag("reserved", "true"), now());
        assert_eq!(reserved.action, Action::NoChange);
    }

    #[test]
    fn test_missing_metrics_gives_low_confidence_no_change() {
        let rec = backend().recommend(&ec2("i-blind", 500.0), now());
        assert_eq!(rec.action, Action::NoChange);
        assert_eq!(rec.confidence, 0.3);
    }

    #[test]
    fn test_configuration_rules() {
        let volume = Resource::new("vol-1", ResourceType::Ebs, "us-east-1", "acct")
            .unwrap()
            .with_config("state", json!("available"))
            .with_config("monthly_cost", json!(80.0));
        assert_eq!(backend().recommend(&volume, now()).action, Action::Delete);

        let bucket = Resource::new("bucket", ResourceType::S3, "global", "acct")
            .unwrap()
            .with_config("storage_class", json!("STANDARD"));
        assert_eq!(backend().recommend(&bucket, now()).action, Action::Optimize);

        let function = Resource::new("fn", ResourceType::Lambda, "us-east-1", "acct")
            .unwrap()
            .with_config("memory_mb", json!(3008));
        assert_eq!(backend().recommend(&function, now()).action, Action::Optimize);
    }

    #[tokio::test]
    async fn test_batch_returns_one_per_resource() {
        let batch = vec![ec2("a", 10.0), ec2("b", 10.0)];
        let recs = backend().analyze_batch(&batch).await.unwrap();
        let ids: Vec<&str> = recs.iter().map(|r| r.resource_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
