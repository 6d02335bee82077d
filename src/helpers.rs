use chrono::{Duration, TimeZone, Utc};

use crate::dto::Karat;

pub(crate) const TROY_OUNCE_GRAMS: f64 = 31.1035;

/// Day-over-day movement of a single karat price.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PriceChange {
    pub change: f64,
    pub change_percent: f64,
}

/// Compute the absolute and relative change between two prices, both rounded
/// to two decimals.
///
/// A `previous` of zero is not specially guarded: the percentage degenerates
/// to an infinity (or NaN when `current` is also zero), mirroring the
/// behavior callers are expected to have excluded upstream by never storing
/// non-positive prices.
pub fn calculate_price_change(current: f64, previous: f64) -> PriceChange {
    let change = current - previous;
    let change_percent = (change / previous) * 100.0;

    PriceChange {
        change: round2(change),
        change_percent: round2(change_percent),
    }
}

/// Convert a 24k gram price to the equivalent lower-karat price, rounded to
/// whole EGP.
pub(crate) fn karat_price_from_24k(price_24k: f64, karat: Karat) -> f64 {
    (price_24k * karat.fineness()).round()
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Population standard deviation: `sqrt(mean((x - mean)^2))`. Zero for an
/// empty slice.
pub(crate) fn population_std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let variance = values
        .iter()
        .map(|value| (value - mean).powi(2))
        .sum::<f64>()
        / values.len() as f64;
    variance.sqrt()
}

/// Closed-form ordinary least squares fit of `values` against their index,
/// returning `(slope, intercept)`.
///
/// The index is always `0..n`, so the denominator only vanishes for slices
/// shorter than two elements; callers gate on a 30-point minimum.
pub(crate) fn linear_fit(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mut sum_x = 0.0;
    let mut sum_y = 0.0;
    let mut sum_xy = 0.0;
    let mut sum_xx = 0.0;
    for (idx, value) in values.iter().enumerate() {
        let x = idx as f64;
        sum_x += x;
        sum_y += value;
        sum_xy += x * value;
        sum_xx += x * x;
    }

    let slope = (n * sum_xy - sum_x * sum_y) / (n * sum_xx - sum_x * sum_x);
    let intercept = (sum_y - slope * sum_x) / n;
    (slope, intercept)
}

pub(crate) fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// ISO day string (`YYYY-MM-DD`) for a millisecond epoch timestamp.
pub(crate) fn iso_day(timestamp_ms: i64) -> String {
    Utc.timestamp_millis_opt(timestamp_ms)
        .single()
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .unwrap_or_default()
}

/// Compact `YYYYMMDD` key for a date `days_back` days before now, as expected
/// by the primary API's historical endpoint.
pub(crate) fn date_key_days_ago(days_back: i64) -> String {
    (Utc::now() - Duration::days(days_back))
        .format("%Y%m%d")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn price_change_matches_worked_example() {
        let result = calculate_price_change(110.0, 100.0);

        assert_eq!(result.change, 10.0);
        assert_eq!(result.change_percent, 10.0);
    }

    #[test]
    fn price_change_rounds_to_two_decimals() {
        let result = calculate_price_change(101.239, 100.0);

        assert_eq!(result.change, 1.24);
        assert_eq!(result.change_percent, 1.24);
    }

    #[test]
    fn price_change_with_zero_previous_degenerates() {
        let result = calculate_price_change(110.0, 0.0);

        assert_eq!(result.change, 110.0);
        assert!(result.change_percent.is_infinite());
    }

    #[test]
    fn karat_prices_derive_from_fineness_ratios() {
        assert_eq!(karat_price_from_24k(7400.0, Karat::K24), 7400.0);
        assert_eq!(karat_price_from_24k(7400.0, Karat::K22), 6784.0);
        assert_eq!(karat_price_from_24k(7400.0, Karat::K21), 6475.0);
        assert_eq!(karat_price_from_24k(7400.0, Karat::K18), 5550.0);
    }

    #[test]
    fn population_std_dev_uses_n_divisor() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];

        assert!((population_std_dev(&values) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn population_std_dev_of_empty_slice_is_zero() {
        assert_eq!(population_std_dev(&[]), 0.0);
    }

    #[test]
    fn linear_fit_recovers_a_perfect_line() {
        let values: Vec<f64> = (0..40).map(|idx| 3.0 * idx as f64 + 10.0).collect();

        let (slope, intercept) = linear_fit(&values);

        assert!((slope - 3.0).abs() < 1e-9);
        assert!((intercept - 10.0).abs() < 1e-9);
    }

    #[test]
    fn iso_day_formats_millisecond_timestamps() {
        assert_eq!(iso_day(1_700_000_000_000), "2023-11-14");
    }
}
