use chrono::{Duration, Utc};
use rand::Rng;
use tracing::debug;

use crate::dto::{HistoricalPoint, Karat, PredictionPoint, PredictionSet, Trend, VolatilityLevel};
use crate::helpers::{linear_fit, mean, population_std_dev, round2};

pub const MODEL_VERSION: &str = "v1.0-linear-regression";

/// Accuracy is a fixed placeholder until real backtesting exists; it must not
/// be read as a verified statistic.
const PLACEHOLDER_ACCURACY: f64 = 88.5;

const MIN_REGRESSION_POINTS: usize = 30;
const VOLATILITY_WINDOW: usize = 30;
const SEASONAL_PERIOD: f64 = 30.0;
const SEASONAL_AMPLITUDE: f64 = 50.0;
const COLD_START_PRICE: f64 = 7400.0;

/// Produce `horizon_days` daily predictions from a time-ordered series.
///
/// With at least [`MIN_REGRESSION_POINTS`] observations the projection is an
/// OLS line plus a fixed-amplitude sinusoid, with uncertainty bands scaled by
/// trailing volatility; this branch is fully deterministic for a given
/// series. Shorter series fall back to a random walk around the last known
/// price so a cold start still answers.
pub fn project(series: &[HistoricalPoint], horizon_days: usize) -> Vec<PredictionPoint> {
    if series.len() < MIN_REGRESSION_POINTS {
        return project_random_walk(series, horizon_days);
    }

    let prices: Vec<f64> = series.iter().map(|point| point.price).collect();
    let (slope, intercept) = linear_fit(&prices);

    let recent = &prices[prices.len() - VOLATILITY_WINDOW..];
    let ma7 = mean(&recent[recent.len() - 7..]);
    let ma30 = mean(recent);
    let short_trend = if ma7 > ma30 {
        Trend::Upward
    } else if ma7 < ma30 {
        Trend::Downward
    } else {
        Trend::Sideways
    };
    debug!(?short_trend, "moving-average drift over the last 30 points");

    let volatility = population_std_dev(recent);
    let last_index = prices.len() - 1;

    (1..=horizon_days)
        .map(|day| {
            let x = (last_index + day) as f64;
            let regression = slope * x + intercept;
            let seasonal = (x / SEASONAL_PERIOD).sin() * SEASONAL_AMPLITUDE;
            let predicted = (regression + seasonal).round();

            let confidence = (0.92 - day as f64 * 0.015).max(0.5);
            let margin = volatility * (1.0 + day as f64 * 0.1);

            let (date, timestamp) = future_day(day);
            PredictionPoint {
                date,
                timestamp,
                price: predicted,
                confidence: round2(confidence),
                lower_bound: (predicted - margin).round(),
                upper_bound: (predicted + margin).round(),
            }
        })
        .collect()
}

/// Low-fidelity cold-start branch: jitter around the last known price with a
/// slight upward bias. Exists only to avoid a hard failure before enough
/// history has accumulated.
fn project_random_walk(series: &[HistoricalPoint], horizon_days: usize) -> Vec<PredictionPoint> {
    let last_price = series
        .last()
        .map(|point| point.price)
        .unwrap_or(COLD_START_PRICE);
    let mut rng = rand::thread_rng();

    (1..=horizon_days)
        .map(|day| {
            let variation = (rng.gen::<f64>() - 0.48) * 50.0;
            let confidence = (0.95 - day as f64 * 0.02).max(0.5);
            let spread = 50.0 * (1.0 - confidence);

            let (date, timestamp) = future_day(day);
            PredictionPoint {
                date,
                timestamp,
                price: (last_price + variation).round(),
                confidence: round2(confidence),
                lower_bound: (last_price + variation - spread).round(),
                upper_bound: (last_price + variation + spread).round(),
            }
        })
        .collect()
}

/// Band a requested horizon up to the next stored granularity.
pub fn banded_horizon(days: usize) -> usize {
    if days <= 7 {
        7
    } else if days <= 14 {
        14
    } else {
        30
    }
}

/// Build the cacheable per-karat prediction set from a 90-day lookback
/// series. Trend and volatility labels always come from the supplied series,
/// independent of the requested horizon.
pub fn build_prediction_set(
    karat: Karat,
    series: &[HistoricalPoint],
    horizon_days: usize,
) -> PredictionSet {
    let predictions = project(series, banded_horizon(horizon_days));
    let prices: Vec<f64> = series.iter().map(|point| point.price).collect();

    PredictionSet {
        model_version: MODEL_VERSION.to_string(),
        last_trained: Utc::now().to_rfc3339(),
        accuracy: PLACEHOLDER_ACCURACY,
        predictions,
        trend: classify_trend(&prices),
        volatility: classify_volatility(&prices),
        karat,
    }
}

/// Week-over-week trend: the last seven observations against the seven
/// before them, with a 2% dead band. Sideways until two full weeks exist.
pub(crate) fn classify_trend(prices: &[f64]) -> Trend {
    if prices.len() < 14 {
        return Trend::Sideways;
    }
    let last_week = mean(&prices[prices.len() - 7..]);
    let previous_week = mean(&prices[prices.len() - 14..prices.len() - 7]);

    if last_week > previous_week * 1.02 {
        Trend::Upward
    } else if last_week < previous_week * 0.98 {
        Trend::Downward
    } else {
        Trend::Sideways
    }
}

/// Volatility label from the relative standard deviation of the series:
/// under 3% low, 3-5% medium, above 5% high.
pub(crate) fn classify_volatility(prices: &[f64]) -> VolatilityLevel {
    let average = mean(prices);
    if prices.is_empty() || average <= 0.0 {
        return VolatilityLevel::Low;
    }
    let percent = population_std_dev(prices) / average * 100.0;
    if percent > 5.0 {
        VolatilityLevel::High
    } else if percent > 3.0 {
        VolatilityLevel::Medium
    } else {
        VolatilityLevel::Low
    }
}

fn future_day(days_ahead: usize) -> (String, i64) {
    let when = Utc::now() + Duration::days(days_ahead as i64);
    (when.format("%Y-%m-%d").to_string(), when.timestamp_millis())
}
