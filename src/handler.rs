use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Query, Request, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use chrono::{DateTime, Duration, Utc};
use governor::clock::DefaultClock;
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter};
use nonzero_ext::nonzero;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::config::Config;
use crate::dto::{CurrentGoldData, HistoricalPoint, Karat, PredictionSet, PriceError};
use crate::forecast;
use crate::implementation::GoldPriceSource;
use crate::ingest;
use crate::store::PriceStore;

const CURRENT_MAX_AGE_MS: i64 = 60 * 60 * 1000;
const PREDICTION_MAX_AGE_HOURS: i64 = 24;
const PREDICTION_LOOKBACK_DAYS: i64 = 90;
const MAX_HISTORY_DAYS: i64 = 1825;
const MAX_PREDICT_DAYS: i64 = 30;

type IpRateLimiter = RateLimiter<IpAddr, DefaultKeyedStateStore<IpAddr>, DefaultClock>;

/// Process-wide context shared by every handler. Owns the adapters and the
/// rate limiter so nothing lives in ambient globals.
pub struct AppState {
    pub source: GoldPriceSource,
    pub store: PriceStore,
    pub config: Config,
    limiter: IpRateLimiter,
}

impl AppState {
    /// Wire the adapters from configuration. 100 requests per minute per
    /// client IP.
    pub fn new(config: Config) -> Result<Self, PriceError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|err| PriceError::Network(err.to_string()))?;
        let source = GoldPriceSource::with_client(
            client.clone(),
            config.gold_api_key.clone(),
            config.gold_api_base_url.clone(),
            config.fallback_api_base_url.clone(),
            config.exchange_api_base_url.clone(),
        );
        let store = PriceStore::with_client(
            client,
            config.store_rest_url.clone(),
            config.store_rest_token.clone(),
        );
        Ok(Self::with_components(source, store, config))
    }

    /// Assemble state from pre-built adapters; used by tests that point the
    /// adapters at mock servers.
    pub fn with_components(source: GoldPriceSource, store: PriceStore, config: Config) -> Self {
        Self {
            source,
            store,
            config,
            limiter: RateLimiter::keyed(Quota::per_minute(nonzero!(100u32))),
        }
    }
}

/// Client-facing error body: `{"error": "..."}` with the matching status.
pub(crate) struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn unauthorized() -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            message: "Unauthorized".to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/current-price", get(current_price))
        .route("/history", get(history))
        .route("/predict", get(predict))
        .route("/ingest/current", get(ingest_current))
        .route("/ingest/backfill", get(ingest_backfill))
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit))
        .layer(middleware::from_fn(security_headers))
        .with_state(state)
}

async fn rate_limit(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));

    if state.limiter.check_key(&ip).is_err() {
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({ "error": "Too many requests" })),
        )
            .into_response();
    }

    next.run(request).await
}

async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        header::REFERRER_POLICY,
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, OPTIONS"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store, max-age=0"));
    response
}

/// Serve the stored snapshot while it is under an hour old; otherwise
/// refresh synchronously through the source adapter's fallback chain.
async fn current_price(State(state): State<Arc<AppState>>) -> Json<CurrentGoldData> {
    if let Some(data) = state.store.get_current().await {
        let one_hour_ago = Utc::now().timestamp_millis() - CURRENT_MAX_AGE_MS;
        if data.timestamp >= one_hour_ago {
            debug!("serving cached current prices");
            return Json(data);
        }
    }

    Json(ingest::refresh_snapshot(&state.source, &state.store).await)
}

#[derive(Deserialize)]
struct HistoryParams {
    karat: Option<String>,
    days: Option<String>,
}

#[derive(Serialize)]
struct HistoryResponse {
    karat: Karat,
    days: i64,
    count: usize,
    data: Vec<HistoricalPoint>,
}

async fn history(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let karat = parse_karat(params.karat.as_deref())?;
    let days = parse_days(params.days.as_deref(), "90", MAX_HISTORY_DAYS)?;

    let data = state.store.get_historical(karat, days).await;
    Ok(Json(HistoryResponse {
        karat,
        days,
        count: data.len(),
        data,
    }))
}

#[derive(Deserialize)]
struct PredictParams {
    karat: Option<String>,
    days: Option<String>,
}

/// Serve the cached prediction set while it is under 24 hours old, truncated
/// to the requested horizon; otherwise rebuild it from a 90-day lookback and
/// cache the banded result.
///
/// Truncation never extends: a set cached for a shorter band than the
/// request answers with fewer points than asked for.
async fn predict(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PredictParams>,
) -> Result<Json<PredictionSet>, ApiError> {
    let karat = parse_karat(params.karat.as_deref())?;
    let days = parse_days(params.days.as_deref(), "7", MAX_PREDICT_DAYS)? as usize;

    if let Some(mut cached) = state.store.get_latest_prediction(karat).await {
        if is_fresh(&cached.last_trained) {
            cached.predictions.truncate(days);
            return Ok(Json(cached));
        }
    }

    let series = state
        .store
        .get_historical(karat, PREDICTION_LOOKBACK_DAYS)
        .await;
    let set = forecast::build_prediction_set(karat, &series, days);
    state.store.set_latest_prediction(karat, &set).await;

    let mut response = set;
    response.predictions.truncate(days);
    Ok(Json(response))
}

fn is_fresh(last_trained: &str) -> bool {
    DateTime::parse_from_rfc3339(last_trained)
        .map(|trained| {
            trained.with_timezone(&Utc) > Utc::now() - Duration::hours(PREDICTION_MAX_AGE_HOURS)
        })
        .unwrap_or(false)
}

async fn ingest_current(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    authorize(&state, &headers)?;

    let snapshot = ingest::refresh_current(&state.source, &state.store).await;
    Ok(Json(json!({
        "success": true,
        "message": "Gold prices updated successfully",
        "timestamp": snapshot.timestamp,
        "date": snapshot.date,
        "prices": snapshot.prices,
    })))
}

#[derive(Deserialize)]
struct BackfillParams {
    days: Option<String>,
    offset: Option<String>,
    limit: Option<String>,
}

async fn ingest_backfill(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<BackfillParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    authorize(&state, &headers)?;

    let days = parse_count(params.days.as_deref(), "30")?;
    let offset = parse_count(params.offset.as_deref(), "0")?;
    let limit = parse_count(params.limit.as_deref(), "5")?;

    let results = ingest::backfill(&state.source, &state.store, days, offset, limit).await;
    Ok(Json(json!({
        "success": true,
        "processed": results.len(),
        "results": results,
    })))
}

/// Ingestion endpoints require the configured bearer secret. With no secret
/// configured they stay open, matching the degrade-not-crash configuration
/// policy.
fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(secret) = state.config.ingest_secret.as_deref() else {
        return Ok(());
    };
    let expected = format!("Bearer {secret}");
    let provided = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());
    if provided != Some(expected.as_str()) {
        return Err(ApiError::unauthorized());
    }
    Ok(())
}

fn parse_karat(raw: Option<&str>) -> Result<Karat, ApiError> {
    Karat::from_str(raw.unwrap_or("24k"))
        .map_err(|_| ApiError::bad_request("Invalid karat. Must be one of: 24k, 22k, 21k, 18k"))
}

fn parse_days(raw: Option<&str>, default: &str, max: i64) -> Result<i64, ApiError> {
    let days = raw
        .unwrap_or(default)
        .parse::<i64>()
        .map_err(|_| invalid_days(max))?;
    if days < 1 || days > max {
        return Err(invalid_days(max));
    }
    Ok(days)
}

fn invalid_days(max: i64) -> ApiError {
    ApiError::bad_request(format!("Invalid days parameter. Must be between 1 and {max}"))
}

fn parse_count(raw: Option<&str>, default: &str) -> Result<usize, ApiError> {
    raw.unwrap_or(default)
        .parse::<usize>()
        .map_err(|_| ApiError::bad_request("Invalid numeric parameter"))
}
