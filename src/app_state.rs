// Application state shared by every handler

use std::sync::Arc;

use crate::chain::{ChainRpc, RpcChainClient};
use crate::config::Config;
use crate::error::LedgerResult;
use crate::store::Store;

pub type SharedState = Arc<AppState>;

pub struct AppState {
    pub store: Store,
    pub chain: Arc<dyn ChainRpc>,
    pub config: Config,
}

impl AppState {
    pub fn new(store: Store, chain: Arc<dyn ChainRpc>, config: Config) -> Self {
        Self {
            store,
            chain,
            config,
        }
    }

    /// Open the store and build the RPC client described by `config`.
    pub fn from_config(config: Config) -> LedgerResult<Self> {
        tracing::info!("🚀 Opening ledger store at {}", config.data_dir);
        let store = Store::open(&config.data_dir)?;
        let chain: Arc<dyn ChainRpc> = Arc::new(RpcChainClient::from_config(&config));

        let head = store.recent_ledger(1)?;
        match head.first() {
            Some(entry) => tracing::info!("📒 Ledger resumed at seq {}", entry.seq),
            None => tracing::info!("📒 Ledger is empty"),
        }

        Ok(Self::new(store, chain, config))
    }

    pub fn shared(self) -> SharedState {
        Arc::new(self)
    }
}
