//! Persistent store for users, markets, bets, payments and the ledger.
//!
//! Everything lives in a single sled tree under prefixed keys, JSON encoded.
//! State changes go through [`Store::transaction`], which:
//! 1. takes the process-wide write gate, so read-modify-write cycles on
//!    balances and markets never interleave
//! 2. runs the closure inside a sled transaction, so either every write in it
//!    commits or none does
//! 3. flushes to disk before returning
//!
//! Async callers hand that work to [`Store::blocking`].
//!
//! Plain reads (`market`, `markets`, `bets_for_market`, ...) go straight to
//! the tree and never block on the gate.

use serde::{de::DeserializeOwned, Serialize};
use sled::transaction::{ConflictableTransactionError, TransactionError, TransactionalTree};
use std::path::Path;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::error::{LedgerError, LedgerResult};
use crate::ledger::{LedgerEntry, LedgerHead};
use crate::models::{Bet, Deposit, Market, MarketId, User, UserId, Withdrawal};

const TREE_NAME: &str = "ledger_v1";

mod keys {
    use uuid::Uuid;

    pub const USER: &str = "user/";
    pub const MARKET: &str = "market/";
    pub const LEDGER: &str = "ledger/";
    pub const LEDGER_HEAD: &str = "ledger_head";

    pub fn user(id: &Uuid) -> String {
        format!("{}{}", USER, id)
    }
    pub fn external_id(external: &str) -> String {
        format!("user_ext/{}", external)
    }
    pub fn username(name: &str) -> String {
        format!("username/{}", name.to_lowercase())
    }
    pub fn market(id: &Uuid) -> String {
        format!("{}{}", MARKET, id)
    }
    pub fn bet(id: &Uuid) -> String {
        format!("bet/{}", id)
    }
    pub fn market_bets(market: &Uuid) -> String {
        format!("market_bets/{}", market)
    }
    pub fn user_bets(user: &Uuid) -> String {
        format!("user_bets/{}", user)
    }
    pub fn deposit(id: &Uuid) -> String {
        format!("deposit/{}", id)
    }
    pub fn withdrawal(id: &Uuid) -> String {
        format!("withdrawal/{}", id)
    }
    pub fn ledger(seq: u64) -> String {
        format!("{}{:020}", LEDGER, seq)
    }
    pub fn user_ledger_prefix(user: &Uuid) -> String {
        format!("user_ledger/{}/", user)
    }
    pub fn user_ledger(user: &Uuid, seq: u64) -> String {
        format!("{}{:020}", user_ledger_prefix(user), seq)
    }
}

#[derive(Clone)]
pub struct Store {
    db: sled::Db,
    tree: sled::Tree,
    write_gate: Arc<Mutex<()>>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").field("tree", &TREE_NAME).finish()
    }
}

impl Store {
    /// Open (or create) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> LedgerResult<Self> {
        let db = sled::open(path.as_ref())?;
        Self::from_db(db)
    }

    /// Throwaway database, removed when the last handle drops.
    pub fn temporary() -> LedgerResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: sled::Db) -> LedgerResult<Self> {
        let tree = db.open_tree(TREE_NAME)?;
        Ok(Self {
            db,
            tree,
            write_gate: Arc::new(Mutex::new(())),
        })
    }

    /// Run `f` as one atomic unit. Any `Err` from `f` rolls back every write
    /// it made. `f` must not have side effects outside `StoreTx`.
    pub fn transaction<T, F>(&self, f: F) -> LedgerResult<T>
    where
        F: Fn(&StoreTx<'_>) -> LedgerResult<T>,
    {
        let _gate = self
            .write_gate
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let result: Result<T, TransactionError<LedgerError>> = self.tree.transaction(|tree| {
            let tx = StoreTx { tree };
            f(&tx).map_err(ConflictableTransactionError::Abort)
        });

        match result {
            Ok(value) => {
                self.tree.flush()?;
                Ok(value)
            }
            Err(TransactionError::Abort(err)) => Err(err),
            Err(TransactionError::Storage(err)) => Err(LedgerError::Storage(err.to_string())),
        }
    }

    /// Run store work on tokio's blocking pool. Transactions wait on the
    /// write gate and flush to disk, neither of which belongs on an async
    /// worker thread.
    pub async fn blocking<T, F>(&self, f: F) -> LedgerResult<T>
    where
        F: FnOnce(&Store) -> LedgerResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || f(&store))
            .await
            .map_err(|e| LedgerError::Storage(format!("store task failed: {}", e)))?
    }

    pub fn flush(&self) -> LedgerResult<()> {
        self.db.flush()?;
        Ok(())
    }

    // ========================================================================
    // READS
    // ========================================================================

    fn get<T: DeserializeOwned>(&self, key: &str) -> LedgerResult<Option<T>> {
        match self.tree.get(key.as_bytes())? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    fn scan<T: DeserializeOwned>(&self, prefix: &str) -> LedgerResult<Vec<T>> {
        self.tree
            .scan_prefix(prefix.as_bytes())
            .map(|item| -> LedgerResult<T> {
                let (_, raw) = item?;
                Ok(serde_json::from_slice(&raw)?)
            })
            .collect()
    }

    fn index(&self, key: &str) -> LedgerResult<Vec<Uuid>> {
        Ok(self.get::<Vec<Uuid>>(key)?.unwrap_or_default())
    }

    pub fn user(&self, id: &UserId) -> LedgerResult<Option<User>> {
        self.get(&keys::user(id))
    }

    pub fn user_by_external_id(&self, external_id: &str) -> LedgerResult<Option<User>> {
        match self.get::<Uuid>(&keys::external_id(external_id))? {
            Some(id) => self.user(&id),
            None => Ok(None),
        }
    }

    pub fn users(&self) -> LedgerResult<Vec<User>> {
        self.scan(keys::USER)
    }

    pub fn market(&self, id: &MarketId) -> LedgerResult<Option<Market>> {
        self.get(&keys::market(id))
    }

    pub fn markets(&self) -> LedgerResult<Vec<Market>> {
        self.scan(keys::MARKET)
    }

    pub fn bet(&self, id: &Uuid) -> LedgerResult<Option<Bet>> {
        self.get(&keys::bet(id))
    }

    /// Bets on a market, in placement order.
    pub fn bets_for_market(&self, market: &MarketId) -> LedgerResult<Vec<Bet>> {
        self.bets_by_ids(&self.index(&keys::market_bets(market))?)
    }

    /// Bets placed by a user, in placement order.
    pub fn bets_for_user(&self, user: &UserId) -> LedgerResult<Vec<Bet>> {
        self.bets_by_ids(&self.index(&keys::user_bets(user))?)
    }

    fn bets_by_ids(&self, ids: &[Uuid]) -> LedgerResult<Vec<Bet>> {
        let mut bets = Vec::with_capacity(ids.len());
        for id in ids {
            let bet = self
                .bet(id)?
                .ok_or_else(|| LedgerError::Invariant(format!("indexed bet {} missing", id)))?;
            bets.push(bet);
        }
        Ok(bets)
    }

    pub fn deposit(&self, id: &Uuid) -> LedgerResult<Option<Deposit>> {
        self.get(&keys::deposit(id))
    }

    pub fn withdrawal(&self, id: &Uuid) -> LedgerResult<Option<Withdrawal>> {
        self.get(&keys::withdrawal(id))
    }

    /// Whole ledger, ascending by seq.
    pub fn ledger_entries(&self) -> LedgerResult<Vec<LedgerEntry>> {
        self.scan(keys::LEDGER)
    }

    /// A user's entries, ascending by seq, read through the per-user index.
    pub fn ledger_for_user(&self, user: &UserId) -> LedgerResult<Vec<LedgerEntry>> {
        self.tree
            .scan_prefix(keys::user_ledger_prefix(user).as_bytes())
            .map(|item| -> LedgerResult<LedgerEntry> {
                let (_, raw) = item?;
                let seq: u64 = serde_json::from_slice(&raw)?;
                self.get(&keys::ledger(seq))?.ok_or_else(|| {
                    LedgerError::Invariant(format!("indexed ledger entry {} missing", seq))
                })
            })
            .collect()
    }

    /// Most recent entries first.
    pub fn recent_ledger(&self, limit: usize) -> LedgerResult<Vec<LedgerEntry>> {
        self.tree
            .scan_prefix(keys::LEDGER.as_bytes())
            .rev()
            .take(limit)
            .map(|item| -> LedgerResult<LedgerEntry> {
                let (_, raw) = item?;
                Ok(serde_json::from_slice(&raw)?)
            })
            .collect()
    }
}

// ============================================================================
// TRANSACTION VIEW
// ============================================================================

/// Reads and writes inside one `Store::transaction`. Reads observe the
/// transaction's own earlier writes.
pub struct StoreTx<'a> {
    tree: &'a TransactionalTree,
}

impl<'a> StoreTx<'a> {
    fn get<T: DeserializeOwned>(&self, key: &str) -> LedgerResult<Option<T>> {
        match self.tree.get(key.as_bytes())? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    fn put<T: Serialize>(&self, key: &str, value: &T) -> LedgerResult<()> {
        let raw = serde_json::to_vec(value)?;
        self.tree.insert(key.as_bytes(), raw)?;
        Ok(())
    }

    fn index(&self, key: &str) -> LedgerResult<Vec<Uuid>> {
        Ok(self.get::<Vec<Uuid>>(key)?.unwrap_or_default())
    }

    fn push_index(&self, key: &str, id: Uuid) -> LedgerResult<()> {
        let mut ids = self.index(key)?;
        ids.push(id);
        self.put(key, &ids)
    }

    // ----- users -----

    pub fn user(&self, id: &UserId) -> LedgerResult<Option<User>> {
        self.get(&keys::user(id))
    }

    pub fn require_user(&self, id: &UserId) -> LedgerResult<User> {
        self.user(id)?.ok_or_else(|| LedgerError::not_found("User"))
    }

    pub fn put_user(&self, user: &User) -> LedgerResult<()> {
        self.put(&keys::user(&user.id), user)
    }

    pub fn user_id_by_external_id(&self, external_id: &str) -> LedgerResult<Option<UserId>> {
        self.get(&keys::external_id(external_id))
    }

    pub fn put_external_id(&self, external_id: &str, user: &UserId) -> LedgerResult<()> {
        self.put(&keys::external_id(external_id), user)
    }

    /// Owner of a username, compared case-insensitively.
    pub fn username_owner(&self, name: &str) -> LedgerResult<Option<UserId>> {
        self.get(&keys::username(name))
    }

    pub fn claim_username(&self, name: &str, user: &UserId) -> LedgerResult<()> {
        self.put(&keys::username(name), user)
    }

    pub fn release_username(&self, name: &str) -> LedgerResult<()> {
        self.tree.remove(keys::username(name).as_bytes())?;
        Ok(())
    }

    // ----- markets & bets -----

    pub fn market(&self, id: &MarketId) -> LedgerResult<Option<Market>> {
        self.get(&keys::market(id))
    }

    pub fn put_market(&self, market: &Market) -> LedgerResult<()> {
        self.put(&keys::market(&market.id), market)
    }

    pub fn bet(&self, id: &Uuid) -> LedgerResult<Option<Bet>> {
        self.get(&keys::bet(id))
    }

    pub fn put_bet(&self, bet: &Bet) -> LedgerResult<()> {
        self.put(&keys::bet(&bet.id), bet)
    }

    /// Store a newly placed bet and index it under its market and user.
    pub fn insert_bet(&self, bet: &Bet) -> LedgerResult<()> {
        self.put_bet(bet)?;
        self.push_index(&keys::market_bets(&bet.market_id), bet.id)?;
        self.push_index(&keys::user_bets(&bet.user_id), bet.id)
    }

    pub fn bets_for_market(&self, market: &MarketId) -> LedgerResult<Vec<Bet>> {
        let ids = self.index(&keys::market_bets(market))?;
        let mut bets = Vec::with_capacity(ids.len());
        for id in &ids {
            let bet = self
                .bet(id)?
                .ok_or_else(|| LedgerError::Invariant(format!("indexed bet {} missing", id)))?;
            bets.push(bet);
        }
        Ok(bets)
    }

    // ----- payments -----

    pub fn deposit(&self, id: &Uuid) -> LedgerResult<Option<Deposit>> {
        self.get(&keys::deposit(id))
    }

    pub fn put_deposit(&self, deposit: &Deposit) -> LedgerResult<()> {
        self.put(&keys::deposit(&deposit.id), deposit)
    }

    pub fn withdrawal(&self, id: &Uuid) -> LedgerResult<Option<Withdrawal>> {
        self.get(&keys::withdrawal(id))
    }

    pub fn put_withdrawal(&self, withdrawal: &Withdrawal) -> LedgerResult<()> {
        self.put(&keys::withdrawal(&withdrawal.id), withdrawal)
    }

    // ----- ledger -----

    pub fn ledger_head(&self) -> LedgerResult<LedgerHead> {
        Ok(self.get(keys::LEDGER_HEAD)?.unwrap_or_default())
    }

    pub fn put_ledger_head(&self, head: &LedgerHead) -> LedgerResult<()> {
        self.put(keys::LEDGER_HEAD, head)
    }

    /// Entries are insert-only; an existing seq is an invariant violation.
    /// User entries are also indexed under `user_ledger/<user>/<seq>`.
    pub fn put_ledger_entry(&self, entry: &LedgerEntry) -> LedgerResult<()> {
        let key = keys::ledger(entry.seq);
        if self.tree.get(key.as_bytes())?.is_some() {
            return Err(LedgerError::Invariant(format!(
                "ledger entry {} already exists",
                entry.seq
            )));
        }
        self.put(&key, entry)?;
        if let Some(user) = &entry.user_id {
            self.put(&keys::user_ledger(user, entry.seq), &entry.seq)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Side;
    use rust_decimal_macros::dec;

    #[test]
    fn test_transaction_commits() {
        let store = Store::temporary().unwrap();
        let user = User::new("ext-1".into(), None, None);

        store
            .transaction(|tx| {
                tx.put_user(&user)?;
                tx.put_external_id(&user.external_id, &user.id)
            })
            .unwrap();

        assert_eq!(store.user(&user.id).unwrap(), Some(user.clone()));
        assert_eq!(store.user_by_external_id("ext-1").unwrap(), Some(user));
    }

    #[test]
    fn test_failed_transaction_rolls_back_every_write() {
        let store = Store::temporary().unwrap();
        let user = User::new("ext-2".into(), None, None);
        let market = Market::new(user.id, "Will it snow?".into(), None, None);

        let result: LedgerResult<()> = store.transaction(|tx| {
            tx.put_user(&user)?;
            tx.put_market(&market)?;
            Err(LedgerError::MarketClosed)
        });

        assert_eq!(result, Err(LedgerError::MarketClosed));
        assert!(store.user(&user.id).unwrap().is_none());
        assert!(store.market(&market.id).unwrap().is_none());
    }

    #[test]
    fn test_bet_indexes() {
        let store = Store::temporary().unwrap();
        let market_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();
        let first = Bet::new(market_id, user_id, dec!(1), Side::Yes);
        let second = Bet::new(market_id, Uuid::new_v4(), dec!(2), Side::No);

        store
            .transaction(|tx| {
                tx.insert_bet(&first)?;
                tx.insert_bet(&second)?;
                assert_eq!(tx.bets_for_market(&market_id)?.len(), 2);
                Ok(())
            })
            .unwrap();

        let bets = store.bets_for_market(&market_id).unwrap();
        assert_eq!(bets, vec![first.clone(), second]);
        assert_eq!(store.bets_for_user(&user_id).unwrap(), vec![first]);
    }

    #[test]
    fn test_user_ledger_index() {
        use crate::ledger::{self, AdjustmentDirection, EntryMeta};

        let store = Store::temporary().unwrap();
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        let credit = |note: &str| EntryMeta::Adjustment {
            direction: AdjustmentDirection::Credit,
            note: note.to_string(),
        };

        store
            .transaction(|tx| {
                ledger::record(tx, Some(alice), credit("a1"), dec!(1))?;
                ledger::record(tx, Some(bob), credit("b1"), dec!(2))?;
                ledger::record(tx, None, EntryMeta::ResolutionDust { market_id: Uuid::new_v4() }, dec!(0.000000001))?;
                ledger::record(tx, Some(alice), credit("a2"), dec!(3))?;
                Ok(())
            })
            .unwrap();

        let seqs: Vec<u64> = store.ledger_for_user(&alice).unwrap().iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![1, 4]);
        assert_eq!(store.ledger_for_user(&bob).unwrap()[0].amount, dec!(2));
        assert!(store.ledger_for_user(&Uuid::new_v4()).unwrap().is_empty());
        assert_eq!(store.ledger_entries().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_blocking_runs_transactions_off_the_runtime() {
        let store = Store::temporary().unwrap();
        let user = User::new("ext-3".into(), None, None);
        let id = user.id;

        store
            .blocking(move |store| store.transaction(|tx| tx.put_user(&user)))
            .await
            .unwrap();
        assert!(store.user(&id).unwrap().is_some());

        let err = store
            .blocking(|_| -> LedgerResult<()> { Err(LedgerError::MarketClosed) })
            .await
            .unwrap_err();
        assert_eq!(err, LedgerError::MarketClosed);
    }

    #[test]
    fn test_username_keys_are_case_insensitive() {
        let store = Store::temporary().unwrap();
        let owner = Uuid::new_v4();
        store.transaction(|tx| tx.claim_username("Alice_1", &owner)).unwrap();
        let found = store
            .transaction(|tx| tx.username_owner("alice_1"))
            .unwrap();
        assert_eq!(found, Some(owner));
    }
}
