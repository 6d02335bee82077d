use std::collections::BTreeMap;
use std::time::Duration;

use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use tracing::warn;

use crate::dto::{CurrentGoldData, GoldApiQuote, Karat, KaratPrice, PriceError};
use crate::helpers::{iso_day, karat_price_from_24k, round2, TROY_OUNCE_GRAMS};

const DEFAULT_PRIMARY_BASE_URL: &str = "https://www.goldapi.io/api";
const DEFAULT_FALLBACK_BASE_URL: &str = "https://api.gold-api.com";
const DEFAULT_EXCHANGE_BASE_URL: &str = "https://api.exchangerate-api.com";

const PRIMARY_TIMEOUT: Duration = Duration::from_secs(10);
const SECONDARY_TIMEOUT: Duration = Duration::from_secs(5);

const DEFAULT_GLOBAL_OUNCE_USD: f64 = 2800.0;
const DEFAULT_USD_EGP_RATE: f64 = 50.85;

/// Adapter over the external pricing APIs.
///
/// The fetch path degrades in order: keyed primary quote, computed fallback
/// (global USD ounce x exchange rate), hardcoded defaults. Transport errors,
/// timeouts, and invalid payloads all take the next rung of the ladder; the
/// current-price fetch therefore never fails.
pub struct GoldPriceSource {
    client: Client,
    api_key: Option<String>,
    primary_base_url: String,
    fallback_base_url: String,
    exchange_base_url: String,
}

impl GoldPriceSource {
    /// Construct a source that talks to the production endpoints.
    ///
    /// Without an API key the primary endpoint is skipped entirely and every
    /// fetch starts at the computed fallback.
    pub fn new(api_key: Option<String>) -> Result<Self, PriceError> {
        let client = Client::builder()
            .build()
            .map_err(|err| PriceError::Network(err.to_string()))?;
        Ok(Self::with_client(client, api_key, None, None, None))
    }

    /// Build a source with a pre-configured HTTP client and optional base URL
    /// overrides. Use this to point the adapter at mock servers in tests.
    pub fn with_client(
        client: Client,
        api_key: Option<String>,
        primary_base_url: Option<String>,
        fallback_base_url: Option<String>,
        exchange_base_url: Option<String>,
    ) -> Self {
        Self {
            client,
            api_key,
            primary_base_url: primary_base_url
                .unwrap_or_else(|| DEFAULT_PRIMARY_BASE_URL.to_string()),
            fallback_base_url: fallback_base_url
                .unwrap_or_else(|| DEFAULT_FALLBACK_BASE_URL.to_string()),
            exchange_base_url: exchange_base_url
                .unwrap_or_else(|| DEFAULT_EXCHANGE_BASE_URL.to_string()),
        }
    }

    /// Fetch the current snapshot, degrading through the fallback chain.
    pub async fn fetch_current(&self) -> CurrentGoldData {
        if let Some(key) = self.api_key.clone() {
            let url = format!("{}/XAU/EGP", self.primary_base_url);
            match self.request_snapshot(&url, &key).await {
                Ok(snapshot) => return snapshot,
                Err(err) => warn!("primary gold quote unavailable: {err}"),
            }
        }

        self.fallback_snapshot().await
    }

    /// Fetch the snapshot for a past day (`date_key` is `YYYYMMDD`).
    ///
    /// Historical fetches are primary-only: substituting a live fallback
    /// price would mislabel the requested day, so any failure yields `None`
    /// and the caller records the day as failed.
    pub async fn fetch_historical(&self, date_key: &str) -> Option<CurrentGoldData> {
        let key = self.api_key.clone()?;
        let url = format!("{}/XAU/EGP/{}", self.primary_base_url, date_key);
        match self.request_snapshot(&url, &key).await {
            Ok(snapshot) => Some(snapshot),
            Err(err) => {
                warn!("historical gold quote for {date_key} unavailable: {err}");
                None
            }
        }
    }

    async fn request_snapshot(
        &self,
        url: &str,
        api_key: &str,
    ) -> Result<CurrentGoldData, PriceError> {
        let response = self
            .client
            .get(url)
            .header("x-access-token", api_key)
            .header("Content-Type", "application/json")
            .timeout(PRIMARY_TIMEOUT)
            .send()
            .await
            .map_err(|err| PriceError::Network(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PriceError::Network(format!("unexpected status: {status}")));
        }

        let quote = response
            .json::<GoldApiQuote>()
            .await
            .map_err(|err| PriceError::Serialization(err.to_string()))?;

        snapshot_from_quote(&quote).ok_or(PriceError::InvalidPayload)
    }

    async fn fallback_snapshot(&self) -> CurrentGoldData {
        let global_ounce_usd = self.fetch_global_ounce_usd().await;
        let usd_egp_rate = self.fetch_usd_egp_rate().await;

        let ounce_egp = global_ounce_usd * usd_egp_rate;
        let gram_24k = ounce_egp / TROY_OUNCE_GRAMS;
        if !gram_24k.is_finite() || gram_24k <= 0.0 {
            return default_snapshot();
        }

        let mut prices = BTreeMap::new();
        for karat in Karat::ALL {
            prices.insert(
                karat,
                KaratPrice {
                    gram: karat_price_from_24k(gram_24k, karat),
                    ounce: karat_price_from_24k(ounce_egp, karat),
                    change: None,
                    change_percent: None,
                },
            );
        }

        let timestamp = Utc::now().timestamp_millis();
        CurrentGoldData {
            timestamp,
            date: iso_day(timestamp),
            prices,
            usd_egp_rate,
            global_ounce_usd: global_ounce_usd.round(),
        }
    }

    async fn fetch_global_ounce_usd(&self) -> f64 {
        #[derive(Deserialize)]
        struct GlobalQuote {
            #[serde(default)]
            price: Option<f64>,
        }

        let url = format!("{}/price/XAU", self.fallback_base_url);
        let result = self
            .client
            .get(&url)
            .timeout(SECONDARY_TIMEOUT)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => response
                .json::<GlobalQuote>()
                .await
                .ok()
                .and_then(|quote| quote.price)
                .filter(|price| price.is_finite() && *price > 0.0)
                .unwrap_or(DEFAULT_GLOBAL_OUNCE_USD),
            Ok(response) => {
                warn!("global ounce quote returned {}", response.status());
                DEFAULT_GLOBAL_OUNCE_USD
            }
            Err(err) => {
                warn!("global ounce quote unavailable: {err}");
                DEFAULT_GLOBAL_OUNCE_USD
            }
        }
    }

    async fn fetch_usd_egp_rate(&self) -> f64 {
        #[derive(Deserialize)]
        struct ExchangeRates {
            #[serde(default)]
            rates: BTreeMap<String, f64>,
        }

        let url = format!("{}/v4/latest/USD", self.exchange_base_url);
        let result = self
            .client
            .get(&url)
            .timeout(SECONDARY_TIMEOUT)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => response
                .json::<ExchangeRates>()
                .await
                .ok()
                .and_then(|payload| payload.rates.get("EGP").copied())
                .filter(|rate| rate.is_finite() && *rate > 0.0)
                .unwrap_or(DEFAULT_USD_EGP_RATE),
            Ok(response) => {
                warn!("exchange rate quote returned {}", response.status());
                DEFAULT_USD_EGP_RATE
            }
            Err(err) => {
                warn!("exchange rate quote unavailable: {err}");
                DEFAULT_USD_EGP_RATE
            }
        }
    }
}

/// Transform a validated primary quote into a snapshot, or `None` when any
/// required figure is non-finite or non-positive.
fn snapshot_from_quote(quote: &GoldApiQuote) -> Option<CurrentGoldData> {
    let grams = [
        (Karat::K24, quote.price_gram_24k),
        (Karat::K22, quote.price_gram_22k),
        (Karat::K21, quote.price_gram_21k),
        (Karat::K18, quote.price_gram_18k),
    ];

    if quote.timestamp <= 0 || !quote.price.is_finite() || quote.price <= 0.0 {
        return None;
    }
    if grams.iter().any(|(_, gram)| !gram.is_finite() || *gram <= 0.0) {
        return None;
    }

    let usd_egp_rate = quote.price / (quote.price_gram_24k * TROY_OUNCE_GRAMS);
    if !usd_egp_rate.is_finite() || usd_egp_rate <= 0.0 {
        return None;
    }

    let mut prices = BTreeMap::new();
    for (karat, gram) in grams {
        prices.insert(
            karat,
            KaratPrice {
                gram: gram.round(),
                ounce: karat_price_from_24k(quote.price, karat),
                change: None,
                change_percent: None,
            },
        );
    }

    let timestamp = quote.timestamp * 1000;
    Some(CurrentGoldData {
        timestamp,
        date: iso_day(timestamp),
        prices,
        usd_egp_rate: round2(usd_egp_rate),
        global_ounce_usd: (quote.price / usd_egp_rate).round(),
    })
}

fn default_snapshot() -> CurrentGoldData {
    let defaults = [
        (Karat::K24, 7408.0, 230_400.0),
        (Karat::K22, 6829.0, 212_400.0),
        (Karat::K21, 6482.0, 201_600.0),
        (Karat::K18, 5556.0, 172_800.0),
    ];

    let mut prices = BTreeMap::new();
    for (karat, gram, ounce) in defaults {
        prices.insert(
            karat,
            KaratPrice {
                gram,
                ounce,
                change: None,
                change_percent: None,
            },
        );
    }

    let timestamp = Utc::now().timestamp_millis();
    CurrentGoldData {
        timestamp,
        date: iso_day(timestamp),
        prices,
        usd_egp_rate: DEFAULT_USD_EGP_RATE,
        global_ounce_usd: DEFAULT_GLOBAL_OUNCE_USD,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn build_source(server: &MockServer, api_key: Option<&str>) -> GoldPriceSource {
        let client = Client::builder().build().unwrap();
        GoldPriceSource::with_client(
            client,
            api_key.map(str::to_string),
            Some(server.base_url()),
            Some(server.base_url()),
            Some(server.base_url()),
        )
    }

    fn primary_payload() -> serde_json::Value {
        json!({
            "timestamp": 1_700_000_000,
            "metal": "XAU",
            "currency": "EGP",
            "price": 230_165.9,
            "price_gram_24k": 7400.0,
            "price_gram_22k": 6783.5,
            "price_gram_21k": 6475.0,
            "price_gram_18k": 5550.0,
            "exchange": "FOREXCOM",
            "symbol": "FOREXCOM:XAUEGP"
        })
    }

    #[tokio::test]
    async fn primary_quote_transforms_into_snapshot() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/XAU/EGP")
                    .header("x-access-token", "test-key");
                then.status(200).json_body(primary_payload());
            })
            .await;

        let source = build_source(&server, Some("test-key"));
        let snapshot = source.fetch_current().await;

        mock.assert_async().await;
        assert_eq!(snapshot.timestamp, 1_700_000_000_000);
        assert_eq!(snapshot.date, "2023-11-14");

        let k24 = &snapshot.prices[&Karat::K24];
        assert_eq!(k24.gram, 7400.0);
        assert_eq!(k24.ounce, 230_166.0);

        // 22k gram comes from the payload; ounce derives from the 24k ounce.
        let k22 = &snapshot.prices[&Karat::K22];
        assert_eq!(k22.gram, 6784.0);
        assert_eq!(k22.ounce, (230_165.9f64 * 0.9167).round());

        let expected_rate = 230_165.9 / (7400.0 * TROY_OUNCE_GRAMS);
        assert_eq!(snapshot.usd_egp_rate, round2(expected_rate));
        assert!(snapshot.global_ounce_usd > 0.0);
    }

    #[tokio::test]
    async fn primary_failure_degrades_to_computed_fallback() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/XAU/EGP");
                then.status(500);
            })
            .await;
        let global = server
            .mock_async(|when, then| {
                when.method(GET).path("/price/XAU");
                then.status(200).json_body(json!({ "name": "Gold", "price": 3000.0 }));
            })
            .await;
        let rates = server
            .mock_async(|when, then| {
                when.method(GET).path("/v4/latest/USD");
                then.status(200)
                    .json_body(json!({ "base": "USD", "rates": { "EGP": 50.0 } }));
            })
            .await;

        let source = build_source(&server, Some("test-key"));
        let snapshot = source.fetch_current().await;

        global.assert_async().await;
        rates.assert_async().await;
        let expected_gram = (3000.0 * 50.0 / TROY_OUNCE_GRAMS).round();
        assert_eq!(snapshot.prices[&Karat::K24].gram, expected_gram);
        assert_eq!(snapshot.usd_egp_rate, 50.0);
        assert_eq!(snapshot.global_ounce_usd, 3000.0);
    }

    #[tokio::test]
    async fn missing_api_key_skips_the_primary_endpoint() {
        let server = MockServer::start_async().await;
        let primary = server
            .mock_async(|when, then| {
                when.method(GET).path("/XAU/EGP");
                then.status(200).json_body(primary_payload());
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/price/XAU");
                then.status(503);
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/v4/latest/USD");
                then.status(503);
            })
            .await;

        let source = build_source(&server, None);
        let snapshot = source.fetch_current().await;

        primary.assert_hits_async(0).await;
        // Both fallback feeds failed, so the computed path ran on defaults.
        assert_eq!(snapshot.usd_egp_rate, DEFAULT_USD_EGP_RATE);
        assert_eq!(snapshot.global_ounce_usd, DEFAULT_GLOBAL_OUNCE_USD);
    }

    #[tokio::test]
    async fn invalid_primary_payload_is_treated_as_unavailable() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/XAU/EGP");
                then.status(200).json_body(json!({
                    "timestamp": 1_700_000_000,
                    "price": 0.0,
                    "price_gram_24k": 7400.0,
                    "price_gram_22k": 6783.5,
                    "price_gram_21k": 6475.0,
                    "price_gram_18k": 5550.0
                }));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/price/XAU");
                then.status(503);
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/v4/latest/USD");
                then.status(503);
            })
            .await;

        let source = build_source(&server, Some("test-key"));
        let snapshot = source.fetch_current().await;

        assert_eq!(snapshot.usd_egp_rate, DEFAULT_USD_EGP_RATE);
    }

    #[tokio::test]
    async fn historical_fetch_returns_snapshot_for_the_requested_day() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/XAU/EGP/20231114");
                then.status(200).json_body(primary_payload());
            })
            .await;

        let source = build_source(&server, Some("test-key"));
        let snapshot = source.fetch_historical("20231114").await;

        mock.assert_async().await;
        let snapshot = snapshot.expect("historical quote should parse");
        assert_eq!(snapshot.prices[&Karat::K24].gram, 7400.0);
    }

    #[tokio::test]
    async fn historical_fetch_fails_closed() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/XAU/EGP/20231114");
                then.status(404);
            })
            .await;

        let source = build_source(&server, Some("test-key"));
        assert!(source.fetch_historical("20231114").await.is_none());

        let keyless = build_source(&server, None);
        assert!(keyless.fetch_historical("20231114").await.is_none());
    }
}
