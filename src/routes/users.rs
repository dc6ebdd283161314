// User routes: bootstrap from the auth provider identity, profile, history

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    response::Json,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::app_state::SharedState;
use crate::error::LedgerError;
use crate::handlers::ApiResult;
use crate::ledger::{AdjustmentDirection, BalanceReplay, LedgerEntry};
use crate::market_resolve;
use crate::models::{Bet, User};
use crate::users;

/// Header carrying the auth provider's stable user id
pub const EXTERNAL_USER_HEADER: &str = "x-external-user-id";

// ===== REQUEST/RESPONSE TYPES =====

#[derive(Debug, Deserialize)]
pub struct BootstrapRequest {
    pub external_id: String,
    pub email: Option<String>,
    pub wallet_address: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BootstrapResponse {
    pub user: User,
    pub is_new_account: bool,
}

#[derive(Debug, Deserialize)]
pub struct UsernameRequest {
    pub username: String,
}

#[derive(Debug, Serialize)]
pub struct UserLedger {
    pub entries: Vec<LedgerEntry>,
    /// Balance implied by `entries`; equals the stored balance
    pub replayed: BalanceReplay,
    pub balance_available: Decimal,
    pub balance_locked: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct AdjustmentRequest {
    pub user_id: Uuid,
    pub direction: AdjustmentDirection,
    pub amount: Decimal,
    pub note: String,
}

// ===== ROUTE HANDLERS =====

/// POST /users/bootstrap
pub async fn bootstrap_user(
    State(state): State<SharedState>,
    Json(request): Json<BootstrapRequest>,
) -> ApiResult<BootstrapResponse> {
    let (user, is_new_account) = state
        .store
        .blocking(move |store| {
            users::bootstrap_user(store, &request.external_id, request.email, request.wallet_address)
        })
        .await?;
    Ok(Json(BootstrapResponse {
        user,
        is_new_account,
    }))
}

/// GET /me
pub async fn get_me(State(state): State<SharedState>, headers: HeaderMap) -> ApiResult<User> {
    let external_id = headers
        .get(EXTERNAL_USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| LedgerError::InvalidInput(format!("missing {} header", EXTERNAL_USER_HEADER)))?;
    Ok(Json(users::get_user_by_external_id(&state.store, external_id)?))
}

/// PUT /users/:id/username
pub async fn set_username(
    State(state): State<SharedState>,
    Path(user_id): Path<Uuid>,
    Json(request): Json<UsernameRequest>,
) -> ApiResult<User> {
    let user = state
        .store
        .blocking(move |store| users::set_username(store, &user_id, &request.username))
        .await?;
    Ok(Json(user))
}

/// GET /users/:id/bets
pub async fn get_user_bets(
    State(state): State<SharedState>,
    Path(user_id): Path<Uuid>,
) -> ApiResult<Vec<Bet>> {
    Ok(Json(market_resolve::user_bets(&state.store, &user_id)?))
}

/// GET /users/:id/ledger
pub async fn get_user_ledger(
    State(state): State<SharedState>,
    Path(user_id): Path<Uuid>,
) -> ApiResult<UserLedger> {
    let user = users::get_user(&state.store, &user_id)?;
    let entries = state.store.ledger_for_user(&user_id)?;
    let replayed = BalanceReplay::from_entries(&entries);
    if replayed.available != user.balance_available || replayed.locked != user.balance_locked {
        tracing::error!(
            "🚨 Ledger replay for user {} gives {:?}, stored ({}, {})",
            user_id,
            replayed,
            user.balance_available,
            user.balance_locked
        );
    }

    Ok(Json(UserLedger {
        entries,
        replayed,
        balance_available: user.balance_available,
        balance_locked: user.balance_locked,
    }))
}

/// POST /admin/adjustments
pub async fn admin_adjust(
    State(state): State<SharedState>,
    Json(request): Json<AdjustmentRequest>,
) -> ApiResult<User> {
    let user = state
        .store
        .blocking(move |store| {
            users::admin_adjust(store, &request.user_id, request.direction, request.amount, &request.note)
        })
        .await?;
    Ok(Json(user))
}
