//! Deterministic cost forecasting over daily history
//!
//! All three models are pure functions of the history: the same input
//! always yields the same prediction, confidence and factors.

use crate::models::{CostData, CostForecast, DailyCost, ForecastModel, Money};
use chrono::{Datelike, Duration as ChronoDuration, NaiveDate, Weekday};
use std::collections::BTreeMap;

/// Smoothing factor of the exponential model
pub const SMOOTHING_ALPHA: f64 = 0.3;

pub const EXPONENTIAL_CONFIDENCE: f64 = 0.7;
pub const SEASONAL_CONFIDENCE: f64 = 0.8;

/// History needed before the weekday pattern is trusted
pub const SEASONAL_MIN_POINTS: usize = 7;

const LINEAR_CONFIDENCE_FLOOR: f64 = 0.1;
const LINEAR_CONFIDENCE_CEILING: f64 = 0.9;

/// Target name of the account-wide forecast
pub const TOTAL_TARGET: &str = "total";

/// Model and horizon used for every forecast of a run
#[derive(Debug, Clone)]
pub struct ForecastConfig {
    pub model: ForecastModel,
    /// Days predicted after the last historical day (default: 30)
    pub horizon_days: u32,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            model: ForecastModel::Linear,
            horizon_days: 30,
        }
    }
}

fn sorted(history: &[DailyCost]) -> Vec<DailyCost> {
    let mut days = history.to_vec();
    days.sort_by_key(|d| d.date);
    days
}

fn weekday_key(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "weekday_mon",
        Weekday::Tue => "weekday_tue",
        Weekday::Wed => "weekday_wed",
        Weekday::Thu => "weekday_thu",
        Weekday::Fri => "weekday_fri",
        Weekday::Sat => "weekday_sat",
        Weekday::Sun => "weekday_sun",
    }
}

/// Forecast `horizon_days` of cost for one target
pub fn forecast(
    target: &str,
    history: &[DailyCost],
    model: ForecastModel,
    horizon_days: u32,
    currency: &str,
) -> CostForecast {
    let days = sorted(history);
    let (model, predicted, confidence, factors) = match model {
        ForecastModel::Linear => linear(&days, horizon_days),
        ForecastModel::Exponential => exponential(&days, horizon_days),
        ForecastModel::Seasonal => seasonal(&days, horizon_days),
    };

    CostForecast {
        target: target.to_string(),
        model,
        predicted_amount: Money::new(predicted, currency),
        confidence_interval: confidence,
        horizon_days,
        factors,
    }
}

/// One forecast for the account total plus one per cost center
pub fn forecast_costs(data: &CostData, config: &ForecastConfig) -> Vec<CostForecast> {
    let mut forecasts = vec![forecast(
        TOTAL_TARGET,
        &data.daily,
        config.model,
        config.horizon_days,
        &data.currency,
    )];
    forecasts.extend(data.by_cost_center.iter().map(|(center, history)| {
        forecast(center, history, config.model, config.horizon_days, &data.currency)
    }));
    forecasts
}

type ModelOutput = (ForecastModel, f64, f64, BTreeMap<String, f64>);

/// Ordinary least squares over day index
fn linear(days: &[DailyCost], horizon: u32) -> ModelOutput {
    let mut factors = BTreeMap::new();
    factors.insert("horizon_days".to_string(), f64::from(horizon));
    if days.is_empty() {
        return (ForecastModel::Linear, 0.0, LINEAR_CONFIDENCE_FLOOR, factors);
    }

    let n = days.len() as f64;
    let ys: Vec<f64> = days.iter().map(|d| d.amount).collect();
    let mean_x = (n - 1.0) / 2.0;
    let mean_y = ys.iter().sum::<f64>() / n;

    let (mut sxy, mut sxx) = (0.0, 0.0);
    for (i, y) in ys.iter().enumerate() {
        let dx = i as f64 - mean_x;
        sxy += dx * (y - mean_y);
        sxx += dx * dx;
    }
    let slope = if sxx > 0.0 { sxy / sxx } else { 0.0 };
    let intercept = mean_y - slope * mean_x;

    let residual_variance = ys
        .iter()
        .enumerate()
        .map(|(i, y)| {
            let fitted = intercept + slope * i as f64;
            (y - fitted).powi(2)
        })
        .sum::<f64>()
        / n;

    let predicted: f64 = (1..=horizon)
        .map(|h| (intercept + slope * (n - 1.0 + f64::from(h))).max(0.0))
        .sum();

    let confidence = if mean_y.abs() > f64::EPSILON {
        1.0 / (1.0 + residual_variance / (mean_y * mean_y))
    } else if residual_variance == 0.0 {
        LINEAR_CONFIDENCE_CEILING
    } else {
        LINEAR_CONFIDENCE_FLOOR
    };

    factors.insert("slope".to_string(), slope);
    factors.insert("intercept".to_string(), intercept);
    factors.insert("residual_variance".to_string(), residual_variance);

    (
        ForecastModel::Linear,
        predicted,
        confidence.clamp(LINEAR_CONFIDENCE_FLOOR, LINEAR_CONFIDENCE_CEILING),
        factors,
    )
}

/// Single exponential smoothing, flat projection of the final level
///
/// Confidence is fixed at 0.7 once there is any history. With no history
/// there is no level to project, so the forecast is zero at the 0.1 floor
/// the linear model uses for the same case.
fn exponential(days: &[DailyCost], horizon: u32) -> ModelOutput {
    let mut factors = BTreeMap::new();
    factors.insert("alpha".to_string(), SMOOTHING_ALPHA);
    factors.insert("horizon_days".to_string(), f64::from(horizon));

    let Some((first, rest)) = days.split_first() else {
        return (ForecastModel::Exponential, 0.0, LINEAR_CONFIDENCE_FLOOR, factors);
    };
    let level = rest.iter().fold(first.amount, |level, d| {
        SMOOTHING_ALPHA * d.amount + (1.0 - SMOOTHING_ALPHA) * level
    });
    factors.insert("level".to_string(), level);

    (
        ForecastModel::Exponential,
        level.max(0.0) * f64::from(horizon),
        EXPONENTIAL_CONFIDENCE,
        factors,
    )
}

/// Per-weekday averages replayed over the horizon
fn seasonal(days: &[DailyCost], horizon: u32) -> ModelOutput {
    if days.len() < SEASONAL_MIN_POINTS {
        let (model, predicted, confidence, mut factors) = linear(days, horizon);
        factors.insert("seasonal_fallback".to_string(), 1.0);
        return (model, predicted, confidence, factors);
    }

    let mut buckets: BTreeMap<u32, (f64, usize)> = BTreeMap::new();
    for d in days {
        let bucket = buckets
            .entry(d.date.weekday().num_days_from_monday())
            .or_insert((0.0, 0));
        bucket.0 += d.amount;
        bucket.1 += 1;
    }
    let overall = days.iter().map(|d| d.amount).sum::<f64>() / days.len() as f64;
    let average = |day: Weekday| {
        buckets
            .get(&day.num_days_from_monday())
            .map(|(sum, count)| sum / *count as f64)
            .unwrap_or(overall)
    };

    let last: NaiveDate = days[days.len() - 1].date;
    let predicted: f64 = (1..=i64::from(horizon))
        .filter_map(|h| last.checked_add_signed(ChronoDuration::days(h)))
        .map(|date| average(date.weekday()).max(0.0))
        .sum();

    let mut factors = BTreeMap::new();
    factors.insert("horizon_days".to_string(), f64::from(horizon));
    for day in [
        Weekday::Mon,
        Weekday::Tue,
        Weekday::Wed,
        Weekday::Thu,
        Weekday::Fri,
        Weekday::Sat,
        Weekday::Sun,
    ] {
        factors.insert(weekday_key(day).to_string(), average(day));
    }

    (ForecastModel::Seasonal, predicted, SEASONAL_CONFIDENCE, factors)
}
