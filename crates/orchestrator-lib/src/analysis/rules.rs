//! Risk and priority business rules

use crate::models::{Action, Priority, Recommendation, Resource, RiskLevel};
use tracing::debug;

/// Confidence below which a recommendation is treated as speculative
pub const LOW_CONFIDENCE: f64 = 0.5;

/// Priority from monthly savings magnitude
pub fn derive_priority(monthly_savings: f64) -> Priority {
    if monthly_savings >= 1000.0 {
        Priority::Critical
    } else if monthly_savings >= 200.0 {
        Priority::High
    } else if monthly_savings >= 50.0 {
        Priority::Medium
    } else {
        Priority::Low
    }
}

/// Risk from the action, the production tag and confidence
pub fn derive_risk(action: Action, resource: &Resource, confidence: f64) -> RiskLevel {
    if confidence < LOW_CONFIDENCE {
        return RiskLevel::High;
    }
    match action {
        Action::Delete => RiskLevel::High,
        Action::Downsize | Action::Upsize if resource.is_production() => RiskLevel::Medium,
        _ => RiskLevel::Low,
    }
}

/// Post-processing applied to every backend recommendation
#[derive(Debug, Clone)]
pub struct BusinessRules {
    /// Savings below this keep priority at low (default: 10.0)
    pub min_monthly_savings: f64,
}

impl Default for BusinessRules {
    fn default() -> Self {
        Self {
            min_monthly_savings: 10.0,
        }
    }
}

impl BusinessRules {
    pub fn new(min_monthly_savings: f64) -> Self {
        Self {
            min_monthly_savings,
        }
    }

    /// Apply the rules in their fixed order
    ///
    /// 1. production resources never carry low risk
    /// 2. high-criticality resources never carry low priority
    /// 3. savings under the minimum force low priority
    /// 4. low confidence caps priority at medium and forces high risk
    pub fn apply(&self, mut rec: Recommendation, resource: &Resource) -> Recommendation {
        let (risk, priority) = (rec.risk, rec.priority);

        if resource.is_production() && rec.risk == RiskLevel::Low {
            rec.risk = RiskLevel::Medium;
        }
        if resource.is_high_criticality() && rec.priority == Priority::Low {
            rec.priority = Priority::Medium;
        }
        if rec.monthly_savings.amount < self.min_monthly_savings {
            rec.priority = Priority::Low;
        }
        if rec.confidence < LOW_CONFIDENCE {
            rec.priority = rec.priority.min(Priority::Medium);
            rec.risk = RiskLevel::High;
        }

        if (risk, priority) != (rec.risk, rec.priority) {
            debug!(
                resource_id = %rec.resource_id,
                from_risk = ?risk,
                to_risk = ?rec.risk,
                from_priority = ?priority,
                to_priority = ?rec.priority,
                "Business rules adjusted recommendation"
            );
        }
        rec
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Money, ResourceType};

    fn resource(tags: &[(&str, &str)]) -> Resource {
        tags.iter().fold(
            Resource::new("i-1", ResourceType::Ec2, "us-east-1", "acct").unwrap(),
            |r, (k, v)| r.with_tag(*k, *v),
        )
    }

    fn rec(r: &Resource, savings: f64, confidence: f64, risk: RiskLevel, priority: Priority) -> Recommendation {
        Recommendation::new(r, Action::Downsize, Money::new(savings, "USD"), confidence, "test")
            .with_assessment(risk, priority)
    }

    #[test]
    fn test_priority_thresholds() {
        assert_eq!(derive_priority(0.0), Priority::Low);
        assert_eq!(derive_priority(50.0), Priority::Medium);
        assert_eq!(derive_priority(200.0), Priority::High);
        assert_eq!(derive_priority(1500.0), Priority::Critical);
    }

    #[test]
    fn test_risk_derivation() {
        let prod = resource(&[("Environment", "Production")]);
        let dev = resource(&[("env", "dev")]);
        assert_eq!(derive_risk(Action::Downsize, &prod, 0.9), RiskLevel::Medium);
        assert_eq!(derive_risk(Action::Downsize, &dev, 0.9), RiskLevel::Low);
        assert_eq!(derive_risk(Action::Delete, &dev, 0.9), RiskLevel::High);
        assert_eq!(derive_risk(Action::Reserve, &dev, 0.3), RiskLevel::High);
    }

    #[test]
    fn test_production_raises_low_risk() {
        let r = resource(&[("environment", "prod")]);
        let out = BusinessRules::default().apply(rec(&r, 500.0, 0.9, RiskLevel::Low, Priority::High), &r);
        assert_eq!(out.risk, RiskLevel::Medium);
        assert_eq!(out.priority, Priority::High);
    }

    #[test]
    fn test_criticality_raises_low_priority() {
        let r = resource(&[("criticality", "high")]);
        let out = BusinessRules::default().apply(rec(&r, 20.0, 0.9, RiskLevel::Low, Priority::Low), &r);
        assert_eq!(out.priority, Priority::Medium);
    }

    #[test]
    fn test_small_savings_cap_priority_after_criticality() {
        let r = resource(&[("criticality", "critical")]);
        let out = BusinessRules::new(10.0).apply(rec(&r, 5.0, 0.9, RiskLevel::Low, Priority::High), &r);
        assert_eq!(out.priority, Priority::Low);
    }

    #[test]
    fn test_low_confidence_caps_priority_and_raises_risk() {
        let r = resource(&[]);
        let out = BusinessRules::default().apply(rec(&r, 5000.0, 0.4, RiskLevel::Low, Priority::Critical), &r);
        assert_eq!(out.priority, Priority::Medium);
        assert_eq!(out.risk, RiskLevel::High);
    }

    #[test]
    fn test_manual_review_defaults() {
        let r = resource(&[("env", "production")]);
        let out = BusinessRules::default().apply(Recommendation::manual_review(&r, "USD", "backend down"), &r);
        assert_eq!(out.priority, Priority::Low);
        assert_eq!(out.risk, RiskLevel::High);
        assert!(out.manual_review);
        assert!(out.monthly_savings.is_zero());
    }
}
