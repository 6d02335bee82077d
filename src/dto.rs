use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Gold purity grade. The set is closed: every I/O path rejects anything
/// outside these four values.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Karat {
    #[serde(rename = "24k")]
    K24,
    #[serde(rename = "22k")]
    K22,
    #[serde(rename = "21k")]
    K21,
    #[serde(rename = "18k")]
    K18,
}

impl Karat {
    pub const ALL: [Karat; 4] = [Karat::K24, Karat::K22, Karat::K21, Karat::K18];

    pub fn as_str(&self) -> &'static str {
        match self {
            Karat::K24 => "24k",
            Karat::K22 => "22k",
            Karat::K21 => "21k",
            Karat::K18 => "18k",
        }
    }

    /// Fineness ratio relative to pure (24k) gold.
    pub fn fineness(&self) -> f64 {
        match self {
            Karat::K24 => 1.0,
            Karat::K22 => 0.9167,
            Karat::K21 => 0.875,
            Karat::K18 => 0.75,
        }
    }
}

impl fmt::Display for Karat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Karat {
    type Err = PriceError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "24k" => Ok(Karat::K24),
            "22k" => Ok(Karat::K22),
            "21k" => Ok(Karat::K21),
            "18k" => Ok(Karat::K18),
            other => Err(PriceError::UnknownKarat(other.to_string())),
        }
    }
}

/// Per-karat price entry inside a [`CurrentGoldData`] snapshot.
///
/// * `gram` and `ounce` are EGP, rounded to whole pounds.
/// * `change`/`change_percent` are day-over-day figures relative to the
///   latest stored historical point for the karat; absent until ingestion
///   has computed them.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KaratPrice {
    pub gram: f64,
    pub ounce: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_percent: Option<f64>,
}

/// The single live price record for all karats at a point in time.
///
/// Overwritten wholesale on each successful ingestion; `timestamp` is in
/// milliseconds since the Unix epoch and `date` is the matching ISO day.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CurrentGoldData {
    pub timestamp: i64,
    pub date: String,
    pub prices: BTreeMap<Karat, KaratPrice>,
    pub usd_egp_rate: f64,
    pub global_ounce_usd: f64,
}

/// A single stored observation in a per-karat historical series.
///
/// This is the exact shape persisted as a sorted-set member; the sort score
/// is the timestamp, so duplicates at the same instant are tolerated.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PricePoint {
    pub timestamp: i64,
    pub price: f64,
}

/// A historical observation as served to clients, with the ISO day derived
/// from the stored timestamp.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct HistoricalPoint {
    pub date: String,
    pub timestamp: i64,
    pub price: f64,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Upward,
    Downward,
    Sideways,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VolatilityLevel {
    Low,
    Medium,
    High,
}

/// One forecasted day.
///
/// Prices and bounds are whole EGP; `confidence` is in `[0.5, 1.0]` and
/// non-increasing with the days-ahead index.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PredictionPoint {
    pub date: String,
    pub timestamp: i64,
    pub price: f64,
    pub confidence: f64,
    pub lower_bound: f64,
    pub upper_bound: f64,
}

/// Cached forecast output for one karat.
///
/// `accuracy` is a fixed placeholder, not an empirically measured statistic;
/// callers must not treat it as ground truth. Regenerated when absent or when
/// `last_trained` is older than 24 hours.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PredictionSet {
    pub model_version: String,
    pub last_trained: String,
    pub accuracy: f64,
    pub predictions: Vec<PredictionPoint>,
    pub trend: Trend,
    pub volatility: VolatilityLevel,
    pub karat: Karat,
}

/// Raw payload of the primary pricing API's `/XAU/EGP` endpoint.
///
/// `timestamp` is in seconds; missing numeric fields fail deserialization,
/// which the adapter treats the same as an unavailable upstream.
#[derive(Clone, Debug, Deserialize)]
pub struct GoldApiQuote {
    pub timestamp: i64,
    pub price: f64,
    pub price_gram_24k: f64,
    pub price_gram_22k: f64,
    pub price_gram_21k: f64,
    pub price_gram_18k: f64,
}

/// Outcome of one backfilled day.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct BackfillDayResult {
    pub date: String,
    pub status: BackfillStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackfillStatus {
    Success,
    Failed,
}

#[derive(Debug, Error)]
/// Errors raised by the price source and store adapters.
///
/// These never reach clients directly: adapters degrade to fallbacks and the
/// handlers translate caller mistakes into HTTP error bodies.
pub enum PriceError {
    #[error("network call failed: {0}")]
    Network(String),
    #[error("failed to deserialize response: {0}")]
    Serialization(String),
    #[error("upstream payload failed validation")]
    InvalidPayload,
    #[error("store call failed: {0}")]
    Store(String),
    #[error("store is not configured")]
    StoreUnconfigured,
    #[error("unknown karat: {0}")]
    UnknownKarat(String),
}
