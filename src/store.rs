use std::time::Duration;

use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use crate::dto::{CurrentGoldData, HistoricalPoint, Karat, PredictionSet, PriceError, PricePoint};
use crate::helpers::iso_day;

const STORE_TIMEOUT: Duration = Duration::from_secs(3);
const PREDICTION_HISTORY_LIMIT: usize = 100;

const KEY_CURRENT: &str = "gold:current";

fn history_key(karat: Karat) -> String {
    format!("gold:history:{karat}")
}

fn predictions_latest_key(karat: Karat) -> String {
    format!("predictions:latest:{karat}")
}

fn predictions_history_key(karat: Karat) -> String {
    format!("predictions:history:{karat}")
}

/// Adapter over the REST-reachable key-value + sorted-set store.
///
/// Every operation is best-effort: calls are bounded by a short timeout and
/// any transport, protocol, or decode failure resolves to the caller-supplied
/// fallback instead of an error. With no URL or token configured the store
/// runs in a degraded always-miss mode where every operation is a no-op.
pub struct PriceStore {
    client: Client,
    base_url: Option<String>,
    token: Option<String>,
}

#[derive(Deserialize)]
struct CommandReply {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<String>,
}

impl PriceStore {
    pub fn new(base_url: Option<String>, token: Option<String>) -> Result<Self, PriceError> {
        let client = Client::builder()
            .build()
            .map_err(|err| PriceError::Network(err.to_string()))?;
        Ok(Self::with_client(client, base_url, token))
    }

    /// Build a store with a pre-configured HTTP client; point `base_url` at a
    /// mock server in tests.
    pub fn with_client(client: Client, base_url: Option<String>, token: Option<String>) -> Self {
        Self {
            client,
            base_url,
            token,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.base_url.is_some() && self.token.is_some()
    }

    /// Read the live snapshot. `None` when absent, invalid, or the store is
    /// unreachable.
    pub async fn get_current(&self) -> Option<CurrentGoldData> {
        let raw = self.fetch_string(json!(["GET", KEY_CURRENT])).await?;
        match serde_json::from_str::<CurrentGoldData>(&raw) {
            Ok(data) if validate_snapshot(&data) => Some(data),
            Ok(_) => {
                warn!("stored snapshot failed shape validation");
                None
            }
            Err(err) => {
                warn!("stored snapshot failed to decode: {err}");
                None
            }
        }
    }

    /// Overwrite the live snapshot. Invalid payloads are logged and dropped.
    pub async fn set_current(&self, data: &CurrentGoldData) {
        if !validate_snapshot(data) {
            warn!("refusing to store snapshot that fails shape validation");
            return;
        }
        let Ok(encoded) = serde_json::to_string(data) else {
            warn!("failed to encode snapshot for storage");
            return;
        };
        if let Err(err) = self.command(json!(["SET", KEY_CURRENT, encoded])).await {
            warn!("failed to store current prices: {err}");
        }
    }

    /// Append one observation to a karat's historical series. Non-positive
    /// timestamps or prices are rejected without touching the store.
    pub async fn add_historical_point(&self, karat: Karat, timestamp: i64, price: f64) {
        if timestamp <= 0 || !price.is_finite() || price <= 0.0 {
            warn!("rejecting invalid historical point for {karat}: ts={timestamp} price={price}");
            return;
        }
        let member = PricePoint { timestamp, price };
        let Ok(encoded) = serde_json::to_string(&member) else {
            return;
        };
        let command = json!(["ZADD", history_key(karat), timestamp.to_string(), encoded]);
        if let Err(err) = self.command(command).await {
            warn!("failed to append historical point for {karat}: {err}");
        }
    }

    /// Range query over `[now - days, now]`, oldest first. Malformed members
    /// are dropped individually; an unreachable store yields an empty vec.
    pub async fn get_historical(&self, karat: Karat, days: i64) -> Vec<HistoricalPoint> {
        let end = Utc::now().timestamp_millis();
        let start = end - days * 24 * 60 * 60 * 1000;
        let command = json!([
            "ZRANGE",
            history_key(karat),
            start.to_string(),
            end.to_string(),
            "BYSCORE"
        ]);

        let members = match self.command(command).await {
            Ok(Value::Array(members)) => members,
            Ok(_) => return Vec::new(),
            Err(err) => {
                warn!("historical range query for {karat} failed: {err}");
                return Vec::new();
            }
        };

        members
            .iter()
            .filter_map(|member| {
                let raw = member.as_str()?;
                match serde_json::from_str::<PricePoint>(raw) {
                    Ok(point) => Some(HistoricalPoint {
                        date: iso_day(point.timestamp),
                        timestamp: point.timestamp,
                        price: point.price,
                    }),
                    Err(err) => {
                        warn!("dropping malformed historical member for {karat}: {err}");
                        None
                    }
                }
            })
            .collect()
    }

    /// The single most recent stored observation for a karat.
    pub async fn get_last_historical_point(&self, karat: Karat) -> Option<HistoricalPoint> {
        let command = json!([
            "ZRANGE",
            history_key(karat),
            "+inf",
            "-inf",
            "BYSCORE",
            "REV",
            "LIMIT",
            "0",
            "1"
        ]);

        let result = match self.command(command).await {
            Ok(result) => result,
            Err(err) => {
                warn!("latest historical point query for {karat} failed: {err}");
                return None;
            }
        };

        let raw = result.as_array()?.first()?.as_str()?;
        let point = serde_json::from_str::<PricePoint>(raw).ok()?;
        Some(HistoricalPoint {
            date: iso_day(point.timestamp),
            timestamp: point.timestamp,
            price: point.price,
        })
    }

    pub async fn get_latest_prediction(&self, karat: Karat) -> Option<PredictionSet> {
        let raw = self
            .fetch_string(json!(["GET", predictions_latest_key(karat)]))
            .await?;
        match serde_json::from_str::<PredictionSet>(&raw) {
            Ok(set) => Some(set),
            Err(err) => {
                warn!("cached prediction set for {karat} failed to decode: {err}");
                None
            }
        }
    }

    /// Overwrite the latest prediction set and append it to the bounded
    /// prediction history log (most recent 100 entries retained).
    pub async fn set_latest_prediction(&self, karat: Karat, set: &PredictionSet) {
        let Ok(encoded) = serde_json::to_string(set) else {
            warn!("failed to encode prediction set for storage");
            return;
        };

        if let Err(err) = self
            .command(json!(["SET", predictions_latest_key(karat), encoded]))
            .await
        {
            warn!("failed to store prediction set for {karat}: {err}");
            return;
        }

        let history = predictions_history_key(karat);
        if let Err(err) = self.command(json!(["LPUSH", history, encoded])).await {
            warn!("failed to append prediction history for {karat}: {err}");
            return;
        }
        let trim = json!([
            "LTRIM",
            history,
            "0",
            (PREDICTION_HISTORY_LIMIT - 1).to_string()
        ]);
        if let Err(err) = self.command(trim).await {
            warn!("failed to trim prediction history for {karat}: {err}");
        }
    }

    async fn fetch_string(&self, command: Value) -> Option<String> {
        match self.command(command).await {
            Ok(Value::String(raw)) => Some(raw),
            Ok(_) => None,
            Err(PriceError::StoreUnconfigured) => None,
            Err(err) => {
                warn!("store read failed: {err}");
                None
            }
        }
    }

    async fn command(&self, command: Value) -> Result<Value, PriceError> {
        let (base_url, token) = match (self.base_url.as_deref(), self.token.as_deref()) {
            (Some(url), Some(token)) => (url, token),
            _ => return Err(PriceError::StoreUnconfigured),
        };

        let response = self
            .client
            .post(base_url)
            .bearer_auth(token)
            .json(&command)
            .timeout(STORE_TIMEOUT)
            .send()
            .await
            .map_err(|err| PriceError::Store(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PriceError::Store(format!("unexpected status: {status}")));
        }

        let reply: CommandReply = response
            .json()
            .await
            .map_err(|err| PriceError::Serialization(err.to_string()))?;

        if let Some(error) = reply.error {
            return Err(PriceError::Store(error));
        }
        Ok(reply.result)
    }
}

/// Shape validation applied on both sides of the store boundary: all four
/// karats present with finite positive gram prices, a positive timestamp, a
/// non-empty date, and a finite positive exchange rate.
fn validate_snapshot(data: &CurrentGoldData) -> bool {
    if data.timestamp <= 0 || data.date.is_empty() {
        return false;
    }
    if !data.usd_egp_rate.is_finite() || data.usd_egp_rate <= 0.0 {
        return false;
    }
    Karat::ALL.iter().all(|karat| {
        data.prices
            .get(karat)
            .map(|entry| entry.gram.is_finite() && entry.gram > 0.0 && entry.ounce.is_finite())
            .unwrap_or(false)
    })
}
