// HTTP request handlers for markets, bets and the ledger

use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::app_state::SharedState;
use crate::error::LedgerResult;
use crate::ledger::{verify_chain, LedgerEntry, LedgerStats};
use crate::market_resolve::{self, ResolutionSummary};
use crate::models::{Bet, Market, MarketDetail, Side};

pub type ApiResult<T> = LedgerResult<Json<T>>;

// ===== HEALTH =====

pub async fn health_check() -> &'static str {
    "Parimutuel ledger - Online ✅"
}

// ===== MARKET ENDPOINTS =====

#[derive(Debug, Deserialize)]
pub struct CreateMarketRequest {
    pub creator_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

pub async fn list_markets(State(state): State<SharedState>) -> ApiResult<Value> {
    let markets = market_resolve::list_open_markets(&state.store)?;
    Ok(Json(json!({ "markets": markets })))
}

pub async fn create_market(
    State(state): State<SharedState>,
    Json(request): Json<CreateMarketRequest>,
) -> ApiResult<Market> {
    let market = state
        .store
        .blocking(move |store| {
            market_resolve::create_market(
                store,
                request.creator_id,
                &request.title,
                request.description,
                request.expires_at,
            )
        })
        .await?;
    Ok(Json(market))
}

pub async fn get_market(
    State(state): State<SharedState>,
    Path(market_id): Path<Uuid>,
) -> ApiResult<MarketDetail> {
    Ok(Json(market_resolve::get_market(&state.store, &market_id)?))
}

pub async fn close_market(
    State(state): State<SharedState>,
    Path(market_id): Path<Uuid>,
) -> ApiResult<Market> {
    let market = state
        .store
        .blocking(move |store| market_resolve::close_market(store, &market_id))
        .await?;
    Ok(Json(market))
}

#[derive(Debug, Deserialize)]
pub struct ResolveRequest {
    pub winning_side: String,
}

#[derive(Debug, Serialize)]
pub struct ResolveResponse {
    pub resolved: bool,
    #[serde(flatten)]
    pub summary: ResolutionSummary,
}

pub async fn resolve_market(
    State(state): State<SharedState>,
    Path(market_id): Path<Uuid>,
    Json(request): Json<ResolveRequest>,
) -> ApiResult<ResolveResponse> {
    let winning_side: Side = request.winning_side.parse()?;
    let summary = state
        .store
        .blocking(move |store| market_resolve::resolve_market(store, market_id, winning_side))
        .await?;
    Ok(Json(ResolveResponse {
        resolved: true,
        summary,
    }))
}

// ===== BETTING ENDPOINTS =====

#[derive(Debug, Deserialize)]
pub struct PlaceBetRequest {
    pub user_id: Uuid,
    pub market_id: Uuid,
    pub side: String,
    pub amount: Decimal,
}

#[derive(Debug, Serialize)]
pub struct PlaceBetResponse {
    pub bet: Bet,
}

pub async fn place_bet(
    State(state): State<SharedState>,
    Json(request): Json<PlaceBetRequest>,
) -> ApiResult<PlaceBetResponse> {
    let side: Side = request.side.parse()?;
    let bet = state
        .store
        .blocking(move |store| {
            market_resolve::place_bet(store, request.user_id, request.market_id, side, request.amount)
        })
        .await?;
    Ok(Json(PlaceBetResponse { bet }))
}

// ===== LEDGER ENDPOINTS =====

#[derive(Debug, Deserialize)]
pub struct LedgerQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct LedgerActivity {
    pub entries: Vec<LedgerEntry>,
    pub stats: LedgerStats,
    pub chain_valid: bool,
    /// First entry whose digest doesn't check out
    pub broken_at: Option<u64>,
}

/// Recent entries (newest first), totals and hash-chain verification.
pub async fn get_ledger_activity(
    State(state): State<SharedState>,
    Query(query): Query<LedgerQuery>,
) -> ApiResult<LedgerActivity> {
    let limit = query.limit.unwrap_or(100).min(1000);
    let all = state.store.blocking(|store| store.ledger_entries()).await?;
    let verification = verify_chain(&all);
    if let Err(seq) = verification {
        tracing::error!("🚨 Ledger hash chain broken at seq {}", seq);
    }

    Ok(Json(LedgerActivity {
        entries: all.iter().rev().take(limit).cloned().collect(),
        stats: LedgerStats::from_entries(&all),
        chain_valid: verification.is_ok(),
        broken_at: verification.err(),
    }))
}
