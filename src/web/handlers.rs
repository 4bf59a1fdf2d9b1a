//! Dashboard JSON handlers.

use super::auth::ApiCredentials;
use super::error::ApiError;
use super::AppState;
use crate::analytics::{ChartSeries, PositionDetail, PositionSummary, Summary, VolumeSeries};
use crate::utils::decimal::{format_rate_percent, format_usd};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

const MAX_DAYS: u32 = 90;
const DEFAULT_CHART_DAYS: u32 = 7;
const DEFAULT_VOLUME_DAYS: u32 = 30;
const NO_CACHE_MESSAGE: &str = "No cached data available. Please refresh the main chart first.";

#[derive(Debug, Default, Deserialize)]
pub struct PeriodQuery {
    pub days: Option<String>,
    pub force_refresh: Option<String>,
}

impl PeriodQuery {
    /// `days` as an integer in `1..=90`, `default` when absent.
    pub fn days(&self, default: u32) -> Result<u32, ApiError> {
        let Some(raw) = self.days.as_deref() else {
            return Ok(default);
        };
        let days: i64 = raw
            .trim()
            .parse()
            .map_err(|_| ApiError::bad_request("Days must be a valid integer"))?;
        if !(1..=i64::from(MAX_DAYS)).contains(&days) {
            return Err(ApiError::bad_request("Days must be between 1 and 90"));
        }
        Ok(days as u32)
    }

    pub fn force_refresh(&self) -> bool {
        self.force_refresh
            .as_deref()
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }
}

/// Cached-only payload with a hint when nothing was cached yet.
#[derive(Debug, Serialize)]
struct CachedView<T: Serialize> {
    #[serde(flatten)]
    data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'static str>,
}

// ==================== Service ====================

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy", "service": "kraken-dashboard" }))
}

pub async fn api_index() -> Json<Value> {
    Json(json!({
        "version": "2.0",
        "endpoints": {
            "auth": {
                "GET /api/auth/status": "Check authentication status",
                "POST /api/auth/credentials": "Set API credentials",
                "DELETE /api/auth/credentials": "Clear API credentials"
            },
            "positions": {
                "GET /api/positions/": "Get open positions (basic)",
                "GET /api/positions/detailed": "Get positions with P&L"
            },
            "market": {
                "GET /api/market/ticker/<symbol>": "Get ticker data",
                "POST /api/market/tickers": "Get multiple tickers",
                "GET /api/market/price/<symbol>": "Get mark price only",
                "GET /api/market/fees": "Get fee tier and 30-day volume"
            },
            "analytics": {
                "GET /api/analytics/chart-data": "Get chart data",
                "GET /api/analytics/fees": "Get fees data",
                "GET /api/analytics/funding": "Get funding data",
                "GET /api/analytics/summary": "Get summary statistics"
            },
            "volumes": {
                "GET /api/volumes": "Get daily trading volumes"
            }
        }
    }))
}

pub async fn api_test() -> Json<Value> {
    Json(json!({ "status": "ok", "message": "API is working" }))
}

pub async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, Json(json!({ "error": "Endpoint not found" })))
}

// ==================== Positions ====================

pub async fn positions(
    State(state): State<Arc<AppState>>,
    ApiCredentials(creds): ApiCredentials,
) -> Result<Json<Vec<PositionSummary>>, ApiError> {
    Ok(Json(state.service.positions(&creds).await?))
}

pub async fn detailed_positions(
    State(state): State<Arc<AppState>>,
    ApiCredentials(creds): ApiCredentials,
) -> Result<Json<Vec<PositionDetail>>, ApiError> {
    let details = state.service.detailed_positions(&creds).await?;
    info!("Returning {} detailed positions", details.len());
    Ok(Json(details))
}

// ==================== Market ====================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TickerView {
    pub symbol: String,
    pub mark_price: Option<Decimal>,
    pub bid: Option<Decimal>,
    pub ask: Option<Decimal>,
    pub last: Option<Decimal>,
    #[serde(rename = "volume24h")]
    pub volume_24h: Option<Decimal>,
    pub timestamp: Option<String>,
}

pub async fn ticker(
    State(state): State<Arc<AppState>>,
    ApiCredentials(creds): ApiCredentials,
    Path(symbol): Path<String>,
) -> Result<Json<TickerView>, ApiError> {
    let ticker = state
        .service
        .ticker(&creds, &symbol)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("No data for symbol {}", symbol)))?;

    Ok(Json(TickerView {
        symbol: ticker.symbol,
        mark_price: ticker.mark_price,
        bid: ticker.bid,
        ask: ticker.ask,
        last: ticker.last,
        volume_24h: ticker.vol24h,
        timestamp: ticker.last_time,
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct TickersRequest {
    #[serde(default)]
    pub symbols: Vec<String>,
}

pub async fn tickers(
    State(state): State<Arc<AppState>>,
    ApiCredentials(creds): ApiCredentials,
    Json(request): Json<TickersRequest>,
) -> Result<Json<BTreeMap<String, Value>>, ApiError> {
    if request.symbols.is_empty() {
        return Err(ApiError::bad_request("No symbols provided"));
    }
    let max = state.service.settings().max_batch_symbols;
    if request.symbols.len() > max {
        return Err(ApiError::bad_request(format!("Too many symbols (max {})", max)));
    }

    let tickers = state.service.batch_tickers(&creds, &request.symbols).await;
    let result = tickers
        .into_iter()
        .filter_map(|(symbol, ticker)| {
            let price = ticker.mark_price?;
            Some((symbol.clone(), json!({ "symbol": symbol, "markPrice": price })))
        })
        .collect();
    Ok(Json(result))
}

pub async fn price(
    State(state): State<Arc<AppState>>,
    ApiCredentials(creds): ApiCredentials,
    Path(symbol): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let price = state
        .service
        .ticker(&creds, &symbol)
        .await?
        .and_then(|t| t.mark_price)
        .ok_or_else(|| ApiError::not_found(format!("No price data for {}", symbol)))?;

    Ok(Json(json!({ "symbol": symbol, "price": price })))
}

pub async fn fees(
    State(state): State<Arc<AppState>>,
    ApiCredentials(creds): ApiCredentials,
) -> Result<Json<Value>, ApiError> {
    let info = state.service.fee_info(&creds).await?;

    Ok(Json(json!({
        "volume_30d": info.volume_30d,
        "volume_30d_formatted": format_usd(info.volume_30d),
        "maker_fee": info.maker_fee,
        "maker_fee_percentage": format_rate_percent(info.maker_fee),
        "taker_fee": info.taker_fee,
        "taker_fee_percentage": format_rate_percent(info.taker_fee),
    })))
}

// ==================== Analytics ====================

pub async fn chart_data(
    State(state): State<Arc<AppState>>,
    ApiCredentials(creds): ApiCredentials,
    Query(query): Query<PeriodQuery>,
) -> Result<Json<ChartSeries>, ApiError> {
    let days = query.days(DEFAULT_CHART_DAYS)?;
    let chart = state
        .service
        .chart_data(&creds, days, query.force_refresh())
        .await?;
    Ok(Json(chart))
}

#[derive(Debug, Serialize)]
struct FeesView {
    labels: Vec<String>,
    fees: Vec<Decimal>,
    total: Decimal,
}

#[derive(Debug, Serialize)]
struct FundingView {
    labels: Vec<String>,
    funding: Vec<Decimal>,
    total: Decimal,
}

/// Cached chart slice or `None`; never calls Kraken.
fn cached_chart(state: &AppState, creds: &crate::exchange::Credentials, days: u32) -> Option<ChartSeries> {
    state
        .service
        .cached_history(creds, days)
        .map(|history| history.chart())
}

pub async fn analytics_fees(
    State(state): State<Arc<AppState>>,
    ApiCredentials(creds): ApiCredentials,
    Query(query): Query<PeriodQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let days = query.days(DEFAULT_CHART_DAYS)?;
    let view = match cached_chart(&state, &creds, days) {
        Some(chart) => CachedView {
            data: FeesView {
                labels: chart.labels,
                fees: chart.fees,
                total: chart.total_fees,
            },
            message: None,
        },
        None => CachedView {
            data: FeesView {
                labels: Vec::new(),
                fees: Vec::new(),
                total: Decimal::ZERO,
            },
            message: Some(NO_CACHE_MESSAGE),
        },
    };
    Ok(Json(view))
}

pub async fn analytics_funding(
    State(state): State<Arc<AppState>>,
    ApiCredentials(creds): ApiCredentials,
    Query(query): Query<PeriodQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let days = query.days(DEFAULT_CHART_DAYS)?;
    let view = match cached_chart(&state, &creds, days) {
        Some(chart) => CachedView {
            data: FundingView {
                labels: chart.labels,
                funding: chart.funding,
                total: chart.total_funding,
            },
            message: None,
        },
        None => CachedView {
            data: FundingView {
                labels: Vec::new(),
                funding: Vec::new(),
                total: Decimal::ZERO,
            },
            message: Some(NO_CACHE_MESSAGE),
        },
    };
    Ok(Json(view))
}

pub async fn analytics_summary(
    State(state): State<Arc<AppState>>,
    ApiCredentials(creds): ApiCredentials,
    Query(query): Query<PeriodQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let days = query.days(DEFAULT_CHART_DAYS)?;
    let view = match state.service.cached_history(&creds, days) {
        Some(history) => CachedView {
            data: history.summary,
            message: None,
        },
        None => CachedView {
            data: Summary::empty(days),
            message: Some(NO_CACHE_MESSAGE),
        },
    };
    Ok(Json(view))
}

pub async fn volumes(
    State(state): State<Arc<AppState>>,
    ApiCredentials(creds): ApiCredentials,
    Query(query): Query<PeriodQuery>,
) -> Result<Json<VolumeSeries>, ApiError> {
    let days = query.days(DEFAULT_VOLUME_DAYS)?;
    let volumes = state
        .service
        .volumes(&creds, days, query.force_refresh())
        .await?;
    Ok(Json(volumes))
}

#[derive(Debug, Serialize)]
pub struct DashboardData {
    #[serde(flatten)]
    pub chart: ChartSeries,
    pub positions: Vec<PositionDetail>,
}

/// Chart data and detailed positions in one response.
pub async fn dashboard_data(
    State(state): State<Arc<AppState>>,
    ApiCredentials(creds): ApiCredentials,
    Query(query): Query<PeriodQuery>,
) -> Result<Json<DashboardData>, ApiError> {
    let days = query.days(DEFAULT_VOLUME_DAYS)?;
    let (chart, positions) = tokio::try_join!(
        state.service.chart_data(&creds, days, query.force_refresh()),
        state.service.detailed_positions(&creds)
    )?;
    Ok(Json(DashboardData { chart, positions }))
}
