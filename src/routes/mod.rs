// Routes module - organizes all HTTP endpoints
// Each sub-module handles a specific domain; market/bet/ledger handlers
// live in crate::handlers.

pub mod payments;
pub mod users;

use axum::{
    routing::{get, post, put},
    Router,
};
use tower_http::cors::{Any, CorsLayer};

use crate::app_state::SharedState;
use crate::handlers::*;

pub fn build_router(state: SharedState) -> Router {
    Router::new()
        // ===== CORE MARKET ENDPOINTS =====
        .route("/markets", get(list_markets).post(create_market))
        .route("/markets/:id", get(get_market))
        .route("/markets/:id/close", post(close_market))
        .route("/markets/:id/resolve", post(resolve_market))

        // ===== BETTING ENDPOINTS =====
        .route("/bets", post(place_bet))

        // ===== USER ENDPOINTS =====
        .route("/users/bootstrap", post(users::bootstrap_user))
        .route("/me", get(users::get_me))
        .route("/users/:id/username", put(users::set_username))
        .route("/users/:id/bets", get(users::get_user_bets))
        .route("/users/:id/ledger", get(users::get_user_ledger))

        // ===== PAYMENT ENDPOINTS =====
        .route("/deposits", post(payments::init_deposit))
        .route("/deposits/:id/confirm", post(payments::confirm_deposit))
        .route("/withdrawals", post(payments::withdraw))

        // ===== ADMIN & LEDGER ENDPOINTS =====
        .route("/admin/adjustments", post(users::admin_adjust))
        .route("/ledger", get(get_ledger_activity))

        // ===== HEALTH CHECK =====
        .route("/", get(health_check))
        .route("/health", get(health_check))

        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
