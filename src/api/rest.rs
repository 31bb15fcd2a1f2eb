use axum::{
    Router,
    routing::{get, post},
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use crate::api::error::ApiError;
use crate::observability::metrics;
use crate::price_infra::manager::{ExchangeManager, SourceHealth};
use crate::service::MarketService;
use crate::types::{Exchange, PriceStats, PriceTick, Symbol};
use crate::utils::helper::{current_timestamp_ms, parse_period};

pub struct ApiState {
    pub market: Arc<MarketService>,
    pub manager: Arc<ExchangeManager>,
    /// Reported by `/health`.
    pub address: String,
    pub health_timeout: Duration,
}

pub fn create_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_text))
        .route("/prices/latest/:symbol", get(latest_price))
        .route("/prices/latest/:exchange/:symbol", get(latest_price_by_exchange))
        .route("/prices/highest/:symbol", get(highest_price))
        .route("/prices/highest/:exchange/:symbol", get(highest_price_by_exchange))
        .route("/prices/lowest/:symbol", get(lowest_price))
        .route("/prices/lowest/:exchange/:symbol", get(lowest_price_by_exchange))
        .route("/prices/average/:symbol", get(average_price))
        .route("/prices/average/:exchange/:symbol", get(average_price_by_exchange))
        .route("/mode/test", post(test_mode))
        .route("/mode/live", post(live_mode))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Body of every price endpoint.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct PriceResponse {
    pub symbol: Symbol,
    pub exchange: Exchange,
    pub price: f64,
    pub timestamp: DateTime<Utc>,
}

impl From<PriceTick> for PriceResponse {
    fn from(tick: PriceTick) -> Self {
        PriceResponse {
            symbol: tick.symbol,
            exchange: tick.exchange,
            price: tick.price,
            timestamp: tick.timestamp,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PeriodQuery {
    period: Option<String>,
}

#[derive(Clone, Copy)]
enum StatKind {
    Highest,
    Lowest,
    Average,
}

impl StatKind {
    fn pick(self, stats: &PriceStats) -> f64 {
        match self {
            StatKind::Highest => stats.max,
            StatKind::Lowest => stats.min,
            StatKind::Average => stats.average,
        }
    }
}

fn parse_exchange(raw: &str) -> Result<Exchange, ApiError> {
    Ok(raw.parse::<Exchange>()?)
}

fn parse_symbol(raw: &str) -> Result<Symbol, ApiError> {
    Ok(raw.parse::<Symbol>()?)
}

async fn latest(state: &ApiState, exchange: Exchange, symbol: &str) -> Result<Json<PriceResponse>, ApiError> {
    let symbol = parse_symbol(symbol)?;
    let tick = state.market.get_latest(exchange, symbol).await?;
    Ok(Json(tick.into()))
}

async fn stat(
    state: &ApiState,
    kind: StatKind,
    exchange: Exchange,
    symbol: &str,
    query: PeriodQuery,
) -> Result<Json<PriceResponse>, ApiError> {
    let symbol = parse_symbol(symbol)?;
    let period = parse_period(query.period.as_deref())?;

    let stats = match kind {
        StatKind::Highest => state.market.get_highest(exchange, symbol, period).await?,
        StatKind::Lowest => state.market.get_lowest(exchange, symbol, period).await?,
        StatKind::Average => state.market.get_average(exchange, symbol, period).await?,
    };

    Ok(Json(PriceResponse {
        symbol: stats.symbol,
        exchange: stats.exchange,
        price: kind.pick(&stats),
        timestamp: stats.timestamp,
    }))
}

async fn latest_price(
    State(state): State<Arc<ApiState>>,
    Path(symbol): Path<String>,
) -> Result<Json<PriceResponse>, ApiError> {
    latest(&state, Exchange::All, &symbol).await
}

async fn latest_price_by_exchange(
    State(state): State<Arc<ApiState>>,
    Path((exchange, symbol)): Path<(String, String)>,
) -> Result<Json<PriceResponse>, ApiError> {
    latest(&state, parse_exchange(&exchange)?, &symbol).await
}

async fn highest_price(
    State(state): State<Arc<ApiState>>,
    Path(symbol): Path<String>,
    Query(query): Query<PeriodQuery>,
) -> Result<Json<PriceResponse>, ApiError> {
    stat(&state, StatKind::Highest, Exchange::All, &symbol, query).await
}

async fn highest_price_by_exchange(
    State(state): State<Arc<ApiState>>,
    Path((exchange, symbol)): Path<(String, String)>,
    Query(query): Query<PeriodQuery>,
) -> Result<Json<PriceResponse>, ApiError> {
    stat(&state, StatKind::Highest, parse_exchange(&exchange)?, &symbol, query).await
}

async fn lowest_price(
    State(state): State<Arc<ApiState>>,
    Path(symbol): Path<String>,
    Query(query): Query<PeriodQuery>,
) -> Result<Json<PriceResponse>, ApiError> {
    stat(&state, StatKind::Lowest, Exchange::All, &symbol, query).await
}

async fn lowest_price_by_exchange(
    State(state): State<Arc<ApiState>>,
    Path((exchange, symbol)): Path<(String, String)>,
    Query(query): Query<PeriodQuery>,
) -> Result<Json<PriceResponse>, ApiError> {
    stat(&state, StatKind::Lowest, parse_exchange(&exchange)?, &symbol, query).await
}

async fn average_price(
    State(state): State<Arc<ApiState>>,
    Path(symbol): Path<String>,
    Query(query): Query<PeriodQuery>,
) -> Result<Json<PriceResponse>, ApiError> {
    stat(&state, StatKind::Average, Exchange::All, &symbol, query).await
}

async fn average_price_by_exchange(
    State(state): State<Arc<ApiState>>,
    Path((exchange, symbol)): Path<(String, String)>,
    Query(query): Query<PeriodQuery>,
) -> Result<Json<PriceResponse>, ApiError> {
    stat(&state, StatKind::Average, parse_exchange(&exchange)?, &symbol, query).await
}

async fn test_mode(State(state): State<Arc<ApiState>>) -> Result<impl IntoResponse, ApiError> {
    state.manager.switch_to_test().await?;
    Ok(Json(json!({ "message": "switched to test mode" })))
}

async fn live_mode(State(state): State<Arc<ApiState>>) -> Result<impl IntoResponse, ApiError> {
    state.manager.switch_to_live().await?;
    Ok(Json(json!({ "message": "switched to live mode" })))
}

#[derive(Debug, Serialize)]
struct ComponentHealth {
    name: String,
    healthy: bool,
}

impl From<SourceHealth> for ComponentHealth {
    fn from(health: SourceHealth) -> Self {
        ComponentHealth {
            name: health.name,
            healthy: health.healthy,
        }
    }
}

async fn bounded(limit: Duration, probe: impl std::future::Future<Output = (String, bool)>, fallback: &str) -> ComponentHealth {
    match tokio::time::timeout(limit, probe).await {
        Ok((name, healthy)) => ComponentHealth { name, healthy },
        Err(_) => ComponentHealth {
            name: fallback.to_string(),
            healthy: false,
        },
    }
}

async fn health_check(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    let (sources, cache, store) = tokio::join!(
        state.manager.source_health(),
        bounded(state.health_timeout, state.market.cache_health(), "cache"),
        bounded(state.health_timeout, state.market.store_health(), "store"),
    );

    let sources: Vec<ComponentHealth> = sources.into_iter().map(Into::into).collect();
    let healthy = cache.healthy && store.healthy && sources.iter().all(|s| s.healthy);

    Json(json!({
        "status": if healthy { "available" } else { "degraded" },
        "mode": state.manager.mode(),
        "running": state.manager.is_running().await,
        "system_info": {
            "address": state.address,
        },
        "components": {
            "sources": sources,
            "cache": cache,
            "store": store,
        },
        "timestamp": current_timestamp_ms(),
    }))
}

async fn metrics_text() -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::render(),
    )
}
