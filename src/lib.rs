/// Parimutuel prediction-market ledger
/// Exports all modules for use as a library crate

pub mod app_state;
pub mod balance;
pub mod chain;
pub mod config;
pub mod error;
pub mod handlers;
pub mod ledger;
pub mod market_resolve;
pub mod models;
pub mod payments;
pub mod routes;
pub mod store;
pub mod users;

pub use app_state::{AppState, SharedState};
pub use chain::{ChainError, ChainInstruction, ChainRpc, ChainTransaction, RpcChainClient};
pub use config::{Config, ConfigError};
pub use error::{LedgerError, LedgerResult};
pub use ledger::{verify_chain, BalanceReplay, EntryKind, EntryMeta, LedgerEntry, LedgerStats};
pub use market_resolve::{
    close_market, create_market, get_market, list_open_markets, place_bet, resolve_market,
    user_bets, ResolutionSummary, SettlementPlan,
};
pub use models::{
    Bet, BetStatus, Deposit, DepositStatus, Market, MarketStatus, Side, User, Withdrawal,
    WithdrawalStatus,
};
pub use routes::build_router;
pub use store::Store;
