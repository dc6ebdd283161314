// Shared fixtures for integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use parimutuel_ledger::ledger::AdjustmentDirection;
use parimutuel_ledger::{
    users, BalanceReplay, Bet, ChainError, ChainInstruction, ChainRpc, ChainTransaction, Market,
    Store, User,
};
use parimutuel_ledger::chain::MEMO_PROGRAM_ID;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Mutex;

pub const TREASURY: &str = "TreasuryWa11et1111111111111111111111111111";

pub fn user_with_balance(store: &Store, name: &str, available: Decimal) -> User {
    let wallet = format!("{}_wallet", name);
    let (user, _) = users::bootstrap_user(store, &format!("ext-{}", name), None, Some(wallet)).unwrap();
    if available > Decimal::ZERO {
        users::admin_adjust(store, &user.id, AdjustmentDirection::Credit, available, "test funding").unwrap()
    } else {
        user
    }
}

pub fn open_market(store: &Store, creator: &User, title: &str) -> Market {
    parimutuel_ledger::create_market(store, creator.id, title, None, None).unwrap()
}

pub fn balances(store: &Store, user: &User) -> (Decimal, Decimal) {
    let u = store.user(&user.id).unwrap().unwrap();
    (u.balance_available, u.balance_locked)
}

/// prize_pool == sum of ACTIVE stakes
pub fn assert_pool_conserved(store: &Store, market: &Market) {
    let market = store.market(&market.id).unwrap().unwrap();
    let active: Decimal = store
        .bets_for_market(&market.id)
        .unwrap()
        .iter()
        .filter(|b| b.is_active())
        .map(|b: &Bet| b.amount)
        .sum();
    assert_eq!(market.prize_pool, active, "prize pool out of sync with active stakes");
}

/// Every user's ledger replays to their stored balance
pub fn assert_ledger_reconciles(store: &Store) {
    for user in store.users().unwrap() {
        let entries = store.ledger_for_user(&user.id).unwrap();
        let replay = BalanceReplay::from_entries(&entries);
        assert_eq!(replay.available, user.balance_available, "available for {}", user.id);
        assert_eq!(replay.locked, user.balance_locked, "locked for {}", user.id);
        assert!(user.balance_available >= Decimal::ZERO);
        assert!(user.balance_locked >= Decimal::ZERO);
    }
}

// ============================================================================
// MOCK CHAIN
// ============================================================================

#[derive(Default)]
pub struct MockChain {
    pub transactions: Mutex<HashMap<String, ChainTransaction>>,
    pub rpc_down: Mutex<bool>,
    pub fail_transfers: Mutex<bool>,
    pub transfers: Mutex<Vec<(String, u64)>>,
}

impl MockChain {
    pub fn add_transfer(&self, signature: &str, from: &str, lamports: u64, memo: &str) {
        let tx = ChainTransaction {
            failed: false,
            account_keys: vec![from.to_string(), TREASURY.to_string()],
            pre_balances: vec![100_000_000_000, 5_000],
            post_balances: vec![100_000_000_000 - lamports - 5_000, 5_000 + lamports],
            instructions: vec![ChainInstruction {
                program_id: MEMO_PROGRAM_ID.to_string(),
                data: memo.as_bytes().to_vec(),
            }],
        };
        self.transactions.lock().unwrap().insert(signature.to_string(), tx);
    }
}

#[async_trait]
impl ChainRpc for MockChain {
    async fn get_transaction(&self, signature: &str) -> Result<Option<ChainTransaction>, ChainError> {
        if *self.rpc_down.lock().unwrap() {
            return Err(ChainError::Request("connection refused".into()));
        }
        Ok(self.transactions.lock().unwrap().get(signature).cloned())
    }

    async fn send_transfer(&self, to: &str, lamports: u64) -> Result<String, ChainError> {
        if *self.fail_transfers.lock().unwrap() {
            return Err(ChainError::Rejected("insufficient treasury funds".into()));
        }
        let mut transfers = self.transfers.lock().unwrap();
        transfers.push((to.to_string(), lamports));
        Ok(format!("sig_withdraw_{}", transfers.len()))
    }
}
