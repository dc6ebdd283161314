// Deposit and withdrawal routes

use axum::{
    extract::{Path, State},
    response::Json,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

use crate::app_state::SharedState;
use crate::handlers::ApiResult;
use crate::models::{Deposit, Withdrawal};
use crate::payments::{self, DepositInstructions};

#[derive(Debug, Deserialize)]
pub struct AmountRequest {
    pub user_id: Uuid,
    pub amount: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct ConfirmDepositRequest {
    pub tx_signature: String,
}

/// POST /deposits
pub async fn init_deposit(
    State(state): State<SharedState>,
    Json(request): Json<AmountRequest>,
) -> ApiResult<DepositInstructions> {
    let config = state.config.clone();
    let instructions = state
        .store
        .blocking(move |store| payments::init_deposit(store, &config, request.user_id, request.amount))
        .await?;
    Ok(Json(instructions))
}

/// POST /deposits/:id/confirm
pub async fn confirm_deposit(
    State(state): State<SharedState>,
    Path(deposit_id): Path<Uuid>,
    Json(request): Json<ConfirmDepositRequest>,
) -> ApiResult<Deposit> {
    let deposit = payments::confirm_deposit(
        &state.store,
        state.chain.as_ref(),
        &state.config,
        deposit_id,
        &request.tx_signature,
    )
    .await?;
    Ok(Json(deposit))
}

/// POST /withdrawals
pub async fn withdraw(
    State(state): State<SharedState>,
    Json(request): Json<AmountRequest>,
) -> ApiResult<Withdrawal> {
    let withdrawal = payments::withdraw(
        &state.store,
        state.chain.as_ref(),
        &state.config,
        request.user_id,
        request.amount,
    )
    .await?;
    Ok(Json(withdrawal))
}
