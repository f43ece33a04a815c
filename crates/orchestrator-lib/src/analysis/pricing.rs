//! Ordered price adjustments applied to list costs
//!
//! Steps always run as discount, then reserved-instance coverage, then tax,
//! whatever order they were configured in.

use crate::error::ValidationError;
use crate::models::Money;
use serde::{Deserialize, Serialize};

/// A single `Money -> Money` pricing step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PriceAdjustment {
    /// Negotiated discount, `percent` in [0, 100]
    Discount { percent: f64 },
    /// Fraction of usage covered by reservations and their discount, both in [0, 1]
    ReservedInstance { coverage: f64, discount: f64 },
    /// Sales tax as a non-negative fraction
    Tax { rate: f64 },
}

impl PriceAdjustment {
    fn stage(&self) -> u8 {
        match self {
            PriceAdjustment::Discount { .. } => 0,
            PriceAdjustment::ReservedInstance { .. } => 1,
            PriceAdjustment::Tax { .. } => 2,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let unit = |field: &'static str, value: f64| {
            if (0.0..=1.0).contains(&value) {
                Ok(())
            } else {
                Err(ValidationError::OutOfUnitRange { field, value })
            }
        };
        match *self {
            PriceAdjustment::Discount { percent } => unit("discount percent / 100", percent / 100.0),
            PriceAdjustment::ReservedInstance { coverage, discount } => {
                unit("reserved coverage", coverage)?;
                unit("reserved discount", discount)
            }
            PriceAdjustment::Tax { rate } if rate >= 0.0 && rate.is_finite() => Ok(()),
            PriceAdjustment::Tax { rate } => Err(ValidationError::Negative {
                field: "tax rate",
                value: rate,
            }),
        }
    }

    pub fn apply(&self, price: &Money) -> Money {
        let factor = match *self {
            PriceAdjustment::Discount { percent } => 1.0 - percent / 100.0,
            PriceAdjustment::ReservedInstance { coverage, discount } => 1.0 - coverage * discount,
            PriceAdjustment::Tax { rate } => 1.0 + rate,
        };
        price.scale(factor)
    }
}

/// Fixed-order chain of price adjustments
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PricingPipeline {
    steps: Vec<PriceAdjustment>,
}

impl PricingPipeline {
    pub fn new(mut steps: Vec<PriceAdjustment>) -> Result<Self, ValidationError> {
        for step in &steps {
            step.validate()?;
        }
        steps.sort_by_key(PriceAdjustment::stage);
        Ok(Self { steps })
    }

    /// No adjustments, list price is the effective price
    pub fn identity() -> Self {
        Self::default()
    }

    pub fn steps(&self) -> &[PriceAdjustment] {
        &self.steps
    }

    pub fn apply(&self, list_price: &Money) -> Money {
        self.steps
            .iter()
            .fold(list_price.clone(), |price, step| step.apply(&price))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_steps_run_in_fixed_order() {
        let pipeline = PricingPipeline::new(vec![
            PriceAdjustment::Tax { rate: 0.1 },
            PriceAdjustment::Discount { percent: 20.0 },
            PriceAdjustment::ReservedInstance {
                coverage: 0.5,
                discount: 0.4,
            },
        ])
        .unwrap();

        assert!(matches!(pipeline.steps()[0], PriceAdjustment::Discount { .. }));
        assert!(matches!(pipeline.steps()[2], PriceAdjustment::Tax { .. }));

        // 100 * 0.8 * 0.8 * 1.1
        let effective = pipeline.apply(&Money::new(100.0, "USD"));
        assert!(close(effective.amount, 70.4), "{}", effective);
        assert_eq!(effective.currency, "USD");
    }

    #[test]
    fn test_identity_keeps_list_price() {
        let price = Money::new(42.5, "EUR");
        assert_eq!(PricingPipeline::identity().apply(&price), price);
    }

    #[test]
    fn test_rejects_out_of_range_steps() {
        assert!(PricingPipeline::new(vec![PriceAdjustment::Discount { percent: 120.0 }]).is_err());
        assert!(PricingPipeline::new(vec![PriceAdjustment::Tax { rate: -0.2 }]).is_err());
        assert!(PricingPipeline::new(vec![PriceAdjustment::ReservedInstance {
            coverage: 1.5,
            discount: 0.3
        }])
        .is_err());
    }

    #[test]
    fn test_adjustment_from_json() {
        let step: PriceAdjustment =
            serde_json::from_str(r#"{"kind": "reserved_instance", "coverage": 0.6, "discount": 0.3}"#)
                .unwrap();
        assert_eq!(
            step,
            PriceAdjustment::ReservedInstance {
                coverage: 0.6,
                discount: 0.3
            }
        );
    }
}
