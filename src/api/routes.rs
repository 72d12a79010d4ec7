use std::sync::Arc;

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;

use crate::api::health::RefreshHealth;
use crate::api::latency::CycleStats;
use crate::error::AppError;
use crate::state::CryptoCache;
use crate::types::{Crypto, RankKey};

#[derive(Clone)]
pub struct ApiState {
    pub cache: Arc<CryptoCache>,
    pub health: Arc<RefreshHealth>,
    pub cycle_stats: Arc<CycleStats>,
    /// Default size of `/cryptos`.
    pub top_n: usize,
    /// Largest `limit` accepted: the cache never holds more than one fetch.
    pub max_limit: usize,
    pub mode: &'static str,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/", get(get_root))
        .route("/cryptos", get(get_top_cryptos))
        .route("/cryptos/all", get(get_all_cryptos))
        .route("/health", get(get_health))
        .route("/stats/cycles", get(get_cycle_stats))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Query param structs
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct TopQuery {
    pub limit: Option<usize>,
    pub sort: Option<String>,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

/// Same shape as the upstream listing entries, so existing clients read it unchanged.
#[derive(Serialize)]
pub struct CryptoResponse {
    pub id: i64,
    pub name: String,
    pub symbol: String,
    pub cmc_rank: i64,
    pub quote: QuoteBlock,
    pub last_updated: DateTime<Utc>,
}

#[derive(Serialize)]
pub struct QuoteBlock {
    #[serde(rename = "USD")]
    pub usd: QuoteResponse,
}

#[derive(Serialize)]
pub struct QuoteResponse {
    pub price: f64,
    pub volume_24h: f64,
    pub percent_change_24h: f64,
    pub market_cap: f64,
}

impl From<&Crypto> for CryptoResponse {
    fn from(c: &Crypto) -> Self {
        CryptoResponse {
            id: c.id,
            name: c.name.clone(),
            symbol: c.symbol.clone(),
            cmc_rank: c.rank,
            quote: QuoteBlock {
                usd: QuoteResponse {
                    price: c.quote.price,
                    volume_24h: c.quote.volume_24h,
                    percent_change_24h: c.quote.percent_change_24h,
                    market_cap: c.quote.market_cap,
                },
            },
            last_updated: c.last_updated,
        }
    }
}

#[derive(Serialize)]
pub struct TopResponse {
    pub last_update: Option<DateTime<Utc>>,
    pub cryptos: Vec<CryptoResponse>,
}

#[derive(Serialize)]
pub struct AllResponse {
    pub last_update: Option<DateTime<Utc>>,
    pub count: usize,
    pub cryptos: Vec<CryptoResponse>,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub mode: &'static str,
    pub last_update: Option<DateTime<Utc>>,
    pub cached: usize,
    pub cycles_total: u64,
    pub consecutive_failures: u64,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_outcome: Option<String>,
}

#[derive(Serialize)]
pub struct CycleStatsResponse {
    pub p50_ms: Option<u64>,
    pub p95_ms: Option<u64>,
    pub p99_ms: Option<u64>,
    pub sample_count: u64,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn get_root(State(state): State<ApiState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "message": format!("Crypto API (upsert by coin id). Current mode: {}.", state.mode),
    }))
}

async fn get_top_cryptos(
    State(state): State<ApiState>,
    Query(params): Query<TopQuery>,
) -> Result<Json<TopResponse>, AppError> {
    let limit = params.limit.unwrap_or(state.top_n);
    if limit == 0 || limit > state.max_limit {
        return Err(AppError::Query(format!(
            "limit must be between 1 and {}",
            state.max_limit
        )));
    }
    let key = match params.sort.as_deref() {
        Some(s) => s.parse::<RankKey>()?,
        None => RankKey::default(),
    };

    let (last_update, top) = state.cache.top_n(limit, key);
    Ok(Json(TopResponse {
        last_update,
        cryptos: top.iter().map(CryptoResponse::from).collect(),
    }))
}

async fn get_all_cryptos(State(state): State<ApiState>) -> Json<AllResponse> {
    let snap = state.cache.all();
    Json(AllResponse {
        last_update: snap.last_update,
        count: snap.data.len(),
        cryptos: snap.data.iter().map(CryptoResponse::from).collect(),
    })
}

async fn get_health(State(state): State<ApiState>) -> Json<HealthResponse> {
    let snap = state.cache.snapshot();
    let status = if snap.last_update.is_none() {
        "starting"
    } else if state.health.consecutive_failures() > 0 {
        "stale"
    } else {
        "ok"
    };
    Json(HealthResponse {
        status,
        mode: state.mode,
        last_update: snap.last_update,
        cached: snap.data.len(),
        cycles_total: state.health.cycles_total(),
        consecutive_failures: state.health.consecutive_failures(),
        last_success_at: match state.health.last_success_at_ms() {
            0 => None,
            ms => DateTime::from_timestamp_millis(ms),
        },
        last_outcome: state.health.last_outcome(),
    })
}

async fn get_cycle_stats(State(state): State<ApiState>) -> Json<CycleStatsResponse> {
    let (p50_ms, p95_ms, p99_ms) = state.cycle_stats.percentiles();
    Json(CycleStatsResponse {
        p50_ms,
        p95_ms,
        p99_ms,
        sample_count: state.cycle_stats.len(),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
