/// Append-only Ledger
///
/// Every balance-affecting event is written here inside the same store
/// transaction as the balance change it describes:
/// - entries are never updated or deleted
/// - each entry is chained to its predecessor by a SHA-256 digest
/// - replaying a user's entries reproduces their (available, locked) balance

use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use uuid::Uuid;

use crate::error::{LedgerError, LedgerResult};
use crate::models::{BetId, MarketId, Side, UserId};
use crate::store::StoreTx;

/// Digest that the first entry chains from
pub const GENESIS_DIGEST: &str = "0000000000000000000000000000000000000000000000000000000000000000";

// ============================================================================
// ENTRY KINDS & METADATA
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryKind {
    Deposit,
    Withdrawal,
    BetPlace,
    BetWin,
    BetLoss,
    AdminAdjustment,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Deposit => "DEPOSIT",
            EntryKind::Withdrawal => "WITHDRAWAL",
            EntryKind::BetPlace => "BET_PLACE",
            EntryKind::BetWin => "BET_WIN",
            EntryKind::BetLoss => "BET_LOSS",
            EntryKind::AdminAdjustment => "ADMIN_ADJUSTMENT",
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdjustmentDirection {
    Credit,
    Debit,
}

/// What happened, with only the fields relevant to that event.
/// The variant decides the entry kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EntryMeta {
    Deposit {
        deposit_id: Uuid,
        tx_signature: String,
    },
    Withdrawal {
        withdrawal_id: Uuid,
        to_address: String,
    },
    BetPlaced {
        market_id: MarketId,
        bet_id: BetId,
        side: Side,
    },
    BetWon {
        market_id: MarketId,
        bet_id: BetId,
        side: Side,
        original_stake: Decimal,
    },
    BetRefunded {
        market_id: MarketId,
        bet_id: BetId,
        side: Side,
    },
    BetLost {
        market_id: MarketId,
        bet_id: BetId,
        side: Side,
        winning_side: Side,
    },
    Adjustment {
        direction: AdjustmentDirection,
        note: String,
    },
    WithdrawalReversed {
        withdrawal_id: Uuid,
        reason: String,
    },
    ResolutionDust {
        market_id: MarketId,
    },
}

impl EntryMeta {
    pub fn kind(&self) -> EntryKind {
        match self {
            EntryMeta::Deposit { .. } => EntryKind::Deposit,
            EntryMeta::Withdrawal { .. } => EntryKind::Withdrawal,
            EntryMeta::BetPlaced { .. } => EntryKind::BetPlace,
            EntryMeta::BetWon { .. } | EntryMeta::BetRefunded { .. } => EntryKind::BetWin,
            EntryMeta::BetLost { .. } => EntryKind::BetLoss,
            EntryMeta::Adjustment { .. }
            | EntryMeta::WithdrawalReversed { .. }
            | EntryMeta::ResolutionDust { .. } => EntryKind::AdminAdjustment,
        }
    }
}

// ============================================================================
// LEDGER ENTRY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Position in the ledger, starting at 1
    pub seq: u64,
    pub id: Uuid,
    /// None for system-level entries
    pub user_id: Option<UserId>,
    pub kind: EntryKind,
    /// Always a positive magnitude; direction follows from `meta`
    pub amount: Decimal,
    pub meta: EntryMeta,
    pub created_at: DateTime<Utc>,
    pub prev_digest: String,
    pub digest: String,
}

impl LedgerEntry {
    fn chained(head: &LedgerHead, user_id: Option<UserId>, meta: EntryMeta, amount: Decimal) -> LedgerResult<Self> {
        let mut entry = Self {
            seq: head.seq + 1,
            id: Uuid::new_v4(),
            user_id,
            kind: meta.kind(),
            amount,
            meta,
            created_at: Utc::now(),
            prev_digest: head.digest.clone(),
            digest: String::new(),
        };
        entry.digest = entry.compute_digest()?;
        Ok(entry)
    }

    pub fn compute_digest(&self) -> LedgerResult<String> {
        let meta = serde_json::to_string(&self.meta)?;
        let user = self
            .user_id
            .map(|u| u.to_string())
            .unwrap_or_else(|| "-".to_string());
        let preimage = format!(
            "{}|{}|{}|{}|{}|{}|{}",
            self.prev_digest,
            self.seq,
            self.kind,
            user,
            self.amount,
            meta,
            self.created_at.to_rfc3339_opts(SecondsFormat::Nanos, true),
        );
        Ok(hash(&preimage))
    }
}

/// Tail of the chain, stored alongside the entries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerHead {
    pub seq: u64,
    pub digest: String,
}

impl Default for LedgerHead {
    fn default() -> Self {
        Self {
            seq: 0,
            digest: GENESIS_DIGEST.to_string(),
        }
    }
}

// ============================================================================
// RECORDING
// ============================================================================

/// Append an entry inside the caller's transaction.
pub fn record(
    tx: &StoreTx<'_>,
    user_id: Option<UserId>,
    meta: EntryMeta,
    amount: Decimal,
) -> LedgerResult<LedgerEntry> {
    if amount <= Decimal::ZERO {
        return Err(LedgerError::InvalidAmount(format!(
            "ledger amount must be positive, got {}",
            amount
        )));
    }

    let head = tx.ledger_head()?;
    let entry = LedgerEntry::chained(&head, user_id, meta, amount)?;
    tx.put_ledger_entry(&entry)?;
    tx.put_ledger_head(&LedgerHead {
        seq: entry.seq,
        digest: entry.digest.clone(),
    })?;
    Ok(entry)
}

/// Check that `entries` (the full ledger, ascending) form an unbroken chain.
/// Returns the seq of the first bad entry on failure.
pub fn verify_chain(entries: &[LedgerEntry]) -> Result<(), u64> {
    let mut prev = GENESIS_DIGEST.to_string();
    let mut expected_seq = 1;
    for entry in entries {
        if entry.seq != expected_seq || entry.prev_digest != prev {
            return Err(entry.seq);
        }
        match entry.compute_digest() {
            Ok(digest) if digest == entry.digest => {}
            _ => return Err(entry.seq),
        }
        prev = entry.digest.clone();
        expected_seq += 1;
    }
    Ok(())
}

// ============================================================================
// REPLAY
// ============================================================================

/// Balance implied by a user's ledger entries
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BalanceReplay {
    pub available: Decimal,
    pub locked: Decimal,
}

impl BalanceReplay {
    pub fn from_entries<'a>(entries: impl IntoIterator<Item = &'a LedgerEntry>) -> Self {
        let mut replay = Self::default();
        for entry in entries {
            replay.apply(entry);
        }
        replay
    }

    pub fn apply(&mut self, entry: &LedgerEntry) {
        let amount = entry.amount;
        match &entry.meta {
            EntryMeta::Deposit { .. } | EntryMeta::WithdrawalReversed { .. } => {
                self.available += amount
            }
            EntryMeta::Withdrawal { .. } => self.available -= amount,
            EntryMeta::BetPlaced { .. } => {
                self.available -= amount;
                self.locked += amount;
            }
            EntryMeta::BetWon { original_stake, .. } => {
                self.locked -= *original_stake;
                self.available += amount;
            }
            EntryMeta::BetRefunded { .. } => {
                self.locked -= amount;
                self.available += amount;
            }
            EntryMeta::BetLost { .. } => self.locked -= amount,
            EntryMeta::Adjustment { direction, .. } => match direction {
                AdjustmentDirection::Credit => self.available += amount,
                AdjustmentDirection::Debit => self.available -= amount,
            },
            EntryMeta::ResolutionDust { .. } => {}
        }
    }
}

// ============================================================================
// STATS
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerStats {
    pub entries: usize,
    pub deposits: Decimal,
    pub withdrawals: Decimal,
    pub bets_placed: usize,
    pub bet_volume: Decimal,
    pub payouts: Decimal,
    pub forfeited: Decimal,
}

impl LedgerStats {
    pub fn from_entries<'a>(entries: impl IntoIterator<Item = &'a LedgerEntry>) -> Self {
        let mut stats = Self::default();
        for entry in entries {
            stats.entries += 1;
            match entry.kind {
                EntryKind::Deposit => stats.deposits += entry.amount,
                EntryKind::Withdrawal => stats.withdrawals += entry.amount,
                EntryKind::BetPlace => {
                    stats.bets_placed += 1;
                    stats.bet_volume += entry.amount;
                }
                EntryKind::BetWin => stats.payouts += entry.amount,
                EntryKind::BetLoss => stats.forfeited += entry.amount,
                EntryKind::AdminAdjustment => {}
            }
        }
        stats
    }
}

/// Compute SHA256 hash
pub fn hash(data: &str) -> String {
    hex::encode(Sha256::digest(data.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn chain(metas: Vec<(Option<UserId>, EntryMeta, Decimal)>) -> Vec<LedgerEntry> {
        let mut head = LedgerHead::default();
        let mut out = Vec::new();
        for (user, meta, amount) in metas {
            let entry = LedgerEntry::chained(&head, user, meta, amount).unwrap();
            head = LedgerHead {
                seq: entry.seq,
                digest: entry.digest.clone(),
            };
            out.push(entry);
        }
        out
    }

    #[test]
    fn test_meta_decides_kind() {
        let refund = EntryMeta::BetRefunded {
            market_id: Uuid::new_v4(),
            bet_id: Uuid::new_v4(),
            side: Side::No,
        };
        assert_eq!(refund.kind(), EntryKind::BetWin);
        let dust = EntryMeta::ResolutionDust { market_id: Uuid::new_v4() };
        assert_eq!(dust.kind(), EntryKind::AdminAdjustment);
    }

    #[test]
    fn test_meta_serializes_as_tagged_union() {
        let meta = EntryMeta::Deposit {
            deposit_id: Uuid::nil(),
            tx_signature: "5sig".into(),
        };
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["type"], "deposit");
        assert_eq!(json["tx_signature"], "5sig");
        assert_eq!(serde_json::to_string(&EntryKind::BetPlace).unwrap(), "\"BET_PLACE\"");
    }

    #[test]
    fn test_chain_verifies_and_detects_tampering() {
        let user = Uuid::new_v4();
        let market = Uuid::new_v4();
        let mut entries = chain(vec![
            (Some(user), EntryMeta::Adjustment { direction: AdjustmentDirection::Credit, note: "seed".into() }, dec!(10)),
            (Some(user), EntryMeta::BetPlaced { market_id: market, bet_id: Uuid::new_v4(), side: Side::Yes }, dec!(4)),
        ]);
        assert_eq!(verify_chain(&entries), Ok(()));
        assert_eq!(entries[0].prev_digest, GENESIS_DIGEST);
        assert_eq!(entries[1].prev_digest, entries[0].digest);

        entries[1].amount = dec!(40);
        assert_eq!(verify_chain(&entries), Err(2));
    }

    #[test]
    fn test_chain_detects_removed_entry() {
        let user = Uuid::new_v4();
        let entries = chain(vec![
            (Some(user), EntryMeta::Adjustment { direction: AdjustmentDirection::Credit, note: "a".into() }, dec!(1)),
            (Some(user), EntryMeta::Adjustment { direction: AdjustmentDirection::Credit, note: "b".into() }, dec!(2)),
            (Some(user), EntryMeta::Adjustment { direction: AdjustmentDirection::Debit, note: "c".into() }, dec!(1)),
        ]);
        let gapped = vec![entries[0].clone(), entries[2].clone()];
        assert_eq!(verify_chain(&gapped), Err(3));
    }

    #[test]
    fn test_replay_win_and_loss() {
        let user = Uuid::new_v4();
        let market = Uuid::new_v4();
        let (won_bet, lost_bet) = (Uuid::new_v4(), Uuid::new_v4());
        let entries = chain(vec![
            (Some(user), EntryMeta::Deposit { deposit_id: Uuid::new_v4(), tx_signature: "s".into() }, dec!(10)),
            (Some(user), EntryMeta::BetPlaced { market_id: market, bet_id: won_bet, side: Side::Yes }, dec!(4)),
            (Some(user), EntryMeta::BetPlaced { market_id: market, bet_id: lost_bet, side: Side::No }, dec!(2)),
            (Some(user), EntryMeta::BetWon { market_id: market, bet_id: won_bet, side: Side::Yes, original_stake: dec!(4) }, dec!(9)),
            (Some(user), EntryMeta::BetLost { market_id: market, bet_id: lost_bet, side: Side::No, winning_side: Side::Yes }, dec!(2)),
        ]);

        let replay = BalanceReplay::from_entries(&entries);
        assert_eq!(replay.available, dec!(13));
        assert_eq!(replay.locked, dec!(0));

        let stats = LedgerStats::from_entries(&entries);
        assert_eq!(stats.bets_placed, 2);
        assert_eq!(stats.bet_volume, dec!(6));
        assert_eq!(stats.payouts, dec!(9));
        assert_eq!(stats.forfeited, dec!(2));
    }

    #[test]
    fn test_hash() {
        assert_eq!(hash("abc").len(), 64);
        assert_ne!(hash("abc"), hash("abd"));
    }
}
