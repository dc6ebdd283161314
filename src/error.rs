//! Error taxonomy shared by every ledger operation.
//!
//! Validation errors are returned verbatim to callers. Storage and invariant
//! failures abort the enclosing store transaction and are reported to HTTP
//! clients with a generic message.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rust_decimal::Decimal;
use serde_json::json;

pub type LedgerResult<T> = Result<T, LedgerError>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LedgerError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Insufficient balance: available {available}, requested {requested}")]
    InsufficientBalance {
        available: Decimal,
        requested: Decimal,
    },

    #[error("Market is not open for betting")]
    MarketClosed,

    #[error("Market has expired")]
    MarketExpired,

    #[error("Market already resolved")]
    AlreadyResolved,

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("External verification failed: {0}")]
    ExternalVerificationFailed(String),

    #[error("Blockchain RPC unavailable: {0}")]
    ChainUnavailable(String),

    #[error("Transfer failed: {0}")]
    TransferFailed(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Ledger invariant violated: {0}")]
    Invariant(String),
}

impl LedgerError {
    pub fn not_found(what: impl std::fmt::Display) -> Self {
        LedgerError::NotFound(what.to_string())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            LedgerError::InvalidAmount(_)
            | LedgerError::InvalidInput(_)
            | LedgerError::InsufficientBalance { .. }
            | LedgerError::MarketClosed
            | LedgerError::MarketExpired
            | LedgerError::AlreadyResolved
            | LedgerError::ExternalVerificationFailed(_) => StatusCode::BAD_REQUEST,
            LedgerError::NotFound(_) => StatusCode::NOT_FOUND,
            LedgerError::Conflict(_) => StatusCode::CONFLICT,
            LedgerError::ChainUnavailable(_) | LedgerError::TransferFailed(_) => {
                StatusCode::BAD_GATEWAY
            }
            LedgerError::Storage(_) | LedgerError::Invariant(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Message safe to show to API clients.
    pub fn public_message(&self) -> String {
        match self {
            LedgerError::Storage(_) | LedgerError::Invariant(_) => {
                "Internal ledger error".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl From<sled::Error> for LedgerError {
    fn from(err: sled::Error) -> Self {
        LedgerError::Storage(err.to_string())
    }
}

impl From<sled::transaction::UnabortableTransactionError> for LedgerError {
    // Writers are serialized by the store's write gate, so a conflict here
    // means the tree was touched outside `Store::transaction`.
    fn from(err: sled::transaction::UnabortableTransactionError) -> Self {
        LedgerError::Storage(format!("transaction error: {}", err))
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> Self {
        LedgerError::Storage(format!("record encoding: {}", err))
    }
}

impl IntoResponse for LedgerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, "request rejected");
        }
        (status, Json(json!({ "error": self.public_message() }))).into_response()
    }
}
