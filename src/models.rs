// Data models for the prediction market ledger

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::LedgerError;

pub type UserId = Uuid;
pub type MarketId = Uuid;
pub type BetId = Uuid;

/// Smallest currency unit is 1e-9 (one lamport)
pub const AMOUNT_SCALE: u32 = 9;

/// Lamports per whole unit
pub const LAMPORTS_PER_UNIT: u64 = 1_000_000_000;

// ============================================================================
// USER
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: UserId,
    /// Stable identifier from the wallet/auth provider
    pub external_id: String,
    pub email: Option<String>,
    pub wallet_address: Option<String>,
    pub balance_available: Decimal,
    pub balance_locked: Decimal,
    pub username: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn new(external_id: String, email: Option<String>, wallet_address: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            external_id,
            email,
            wallet_address,
            balance_available: Decimal::ZERO,
            balance_locked: Decimal::ZERO,
            username: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn total_balance(&self) -> Decimal {
        self.balance_available + self.balance_locked
    }
}

// ============================================================================
// SIDE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Yes,
    No,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Yes => "YES",
            Side::No => "NO",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Side {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "YES" => Ok(Side::Yes),
            "NO" => Ok(Side::No),
            other => Err(LedgerError::InvalidInput(format!(
                "side must be YES or NO, got {:?}",
                other
            ))),
        }
    }
}

// ============================================================================
// MARKET
// ============================================================================

/// Market lifecycle
///
/// Flow: Open → Resolved
///         ↓
///       Closed → Resolved
/// Canceled is terminal and only set outside the settlement engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MarketStatus {
    Open,
    Closed,
    Resolved,
    Canceled,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Market {
    pub id: MarketId,
    pub creator_id: UserId,
    pub title: String,
    pub description: Option<String>,
    /// Sum of all ACTIVE stakes on this market
    pub prize_pool: Decimal,
    pub expires_at: Option<DateTime<Utc>>,
    pub status: MarketStatus,
    pub winner_side: Option<Side>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    /// Residue left unattributed after payouts were rounded down
    #[serde(default)]
    pub settlement_dust: Decimal,
}

impl Market {
    pub fn new(
        creator_id: UserId,
        title: String,
        description: Option<String>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            creator_id,
            title,
            description,
            prize_pool: Decimal::ZERO,
            expires_at,
            status: MarketStatus::Open,
            winner_side: None,
            created_at: Utc::now(),
            resolved_at: None,
            settlement_dust: Decimal::ZERO,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|expiry| now >= expiry).unwrap_or(false)
    }
}

// ============================================================================
// BET
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BetStatus {
    Active,
    Won,
    Lost,
    Refunded,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Bet {
    pub id: BetId,
    pub market_id: MarketId,
    pub user_id: UserId,
    pub amount: Decimal,
    pub prediction: Side,
    pub status: BetStatus,
    /// Set only when WON or REFUNDED
    pub payout: Option<Decimal>,
    pub created_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl Bet {
    pub fn new(market_id: MarketId, user_id: UserId, amount: Decimal, prediction: Side) -> Self {
        Self {
            id: Uuid::new_v4(),
            market_id,
            user_id,
            amount,
            prediction,
            status: BetStatus::Active,
            payout: None,
            created_at: Utc::now(),
            settled_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == BetStatus::Active
    }
}

// ============================================================================
// MARKET VIEWS
// ============================================================================

/// Per-market volume aggregates (over all bets, whatever their status)
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MarketStats {
    pub yes_volume: Decimal,
    pub no_volume: Decimal,
    pub total_bets: usize,
}

impl MarketStats {
    pub fn from_bets<'a>(bets: impl IntoIterator<Item = &'a Bet>) -> Self {
        let mut stats = MarketStats::default();
        for bet in bets {
            match bet.prediction {
                Side::Yes => stats.yes_volume += bet.amount,
                Side::No => stats.no_volume += bet.amount,
            }
            stats.total_bets += 1;
        }
        stats
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSummary {
    pub market: Market,
    pub stats: MarketStats,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketDetail {
    pub market: Market,
    pub creator: Option<User>,
    /// Newest first
    pub bets: Vec<Bet>,
    pub stats: MarketStats,
}

// ============================================================================
// DEPOSITS & WITHDRAWALS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DepositStatus {
    Pending,
    Confirmed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Deposit {
    pub id: Uuid,
    pub user_id: UserId,
    pub amount: Decimal,
    pub from_address: String,
    /// Tag the depositor must attach as a memo instruction
    pub memo: String,
    pub status: DepositStatus,
    pub tx_signature: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Deposit {
    pub fn new(user_id: UserId, amount: Decimal, from_address: String) -> Self {
        let id = Uuid::new_v4();
        let now = Utc::now();
        Self {
            id,
            user_id,
            amount,
            from_address,
            memo: format!("DEP_{}", id),
            status: DepositStatus::Pending,
            tx_signature: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WithdrawalStatus {
    Pending,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Withdrawal {
    pub id: Uuid,
    pub user_id: UserId,
    pub amount: Decimal,
    pub to_address: String,
    pub status: WithdrawalStatus,
    pub tx_signature: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Withdrawal {
    pub fn new(user_id: UserId, amount: Decimal, to_address: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            amount,
            to_address,
            status: WithdrawalStatus::Pending,
            tx_signature: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }
}

// ============================================================================
// AMOUNT VALIDATION
// ============================================================================

/// Largest amount that fits in a u64 lamport count (18446744073.709551615).
pub fn max_amount() -> Decimal {
    from_lamports(u64::MAX)
}

/// Reject zero, negative, sub-lamport and out-of-range amounts.
pub fn validate_amount(amount: Decimal) -> Result<Decimal, LedgerError> {
    if amount <= Decimal::ZERO {
        return Err(LedgerError::InvalidAmount(format!(
            "amount must be positive, got {}",
            amount
        )));
    }
    let normalized = amount.normalize();
    if normalized.scale() > AMOUNT_SCALE {
        return Err(LedgerError::InvalidAmount(format!(
            "amount {} has more than {} decimal places",
            amount, AMOUNT_SCALE
        )));
    }
    if normalized > max_amount() {
        return Err(LedgerError::InvalidAmount(format!(
            "amount {} exceeds the maximum of {}",
            amount,
            max_amount()
        )));
    }
    Ok(normalized)
}

/// Whole lamports in `amount`, rounded down.
pub fn to_lamports(amount: Decimal) -> Option<u64> {
    use rust_decimal::prelude::ToPrimitive;
    amount
        .checked_mul(Decimal::from(LAMPORTS_PER_UNIT))?
        .trunc()
        .to_u64()
}

pub fn from_lamports(lamports: u64) -> Decimal {
    Decimal::from(lamports) / Decimal::from(LAMPORTS_PER_UNIT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_side_parsing() {
        assert_eq!("YES".parse::<Side>().unwrap(), Side::Yes);
        assert_eq!("NO".parse::<Side>().unwrap(), Side::No);
        assert!(matches!("yes".parse::<Side>(), Err(LedgerError::InvalidInput(_))));
        assert!("MAYBE".parse::<Side>().is_err());
    }

    #[test]
    fn test_side_serde_uses_uppercase() {
        assert_eq!(serde_json::to_string(&Side::Yes).unwrap(), "\"YES\"");
        let status: BetStatus = serde_json::from_str("\"REFUNDED\"").unwrap();
        assert_eq!(status, BetStatus::Refunded);
    }

    #[test]
    fn test_validate_amount() {
        assert!(matches!(validate_amount(dec!(0)), Err(LedgerError::InvalidAmount(_))));
        assert!(matches!(validate_amount(dec!(-1)), Err(LedgerError::InvalidAmount(_))));
        assert!(validate_amount(dec!(0.0000000001)).is_err());
        assert_eq!(validate_amount(dec!(4.500)).unwrap(), dec!(4.5));
        assert_eq!(validate_amount(dec!(0.000000001)).unwrap(), dec!(0.000000001));
    }

    #[test]
    fn test_validate_amount_upper_bound() {
        assert_eq!(validate_amount(max_amount()).unwrap(), dec!(18446744073.709551615));
        assert!(matches!(
            validate_amount(max_amount() + dec!(0.000000001)),
            Err(LedgerError::InvalidAmount(_))
        ));
        assert!(matches!(validate_amount(dec!(100000000000000000000)), Err(LedgerError::InvalidAmount(_))));
        assert!(matches!(validate_amount(Decimal::MAX), Err(LedgerError::InvalidAmount(_))));
        assert_eq!(to_lamports(max_amount()), Some(u64::MAX));
        assert_eq!(to_lamports(Decimal::MAX), None);
    }

    #[test]
    fn test_lamport_conversion() {
        assert_eq!(to_lamports(dec!(0.05)), Some(50_000_000));
        assert_eq!(to_lamports(dec!(1.0000000019)), Some(1_000_000_001));
        assert_eq!(from_lamports(1_500_000_000), dec!(1.5));
    }

    #[test]
    fn test_market_expiry() {
        let now = Utc::now();
        let mut market = Market::new(Uuid::new_v4(), "Rain tomorrow?".into(), None, None);
        assert!(!market.is_expired_at(now));

        market.expires_at = Some(now - chrono::Duration::seconds(1));
        assert!(market.is_expired_at(now));

        market.expires_at = Some(now + chrono::Duration::hours(1));
        assert!(!market.is_expired_at(now));
    }

    #[test]
    fn test_stats_count_both_sides() {
        let market = Uuid::new_v4();
        let bets = vec![
            Bet::new(market, Uuid::new_v4(), dec!(4), Side::Yes),
            Bet::new(market, Uuid::new_v4(), dec!(6), Side::No),
            Bet::new(market, Uuid::new_v4(), dec!(1.5), Side::Yes),
        ];
        let stats = MarketStats::from_bets(&bets);
        assert_eq!(stats.yes_volume, dec!(5.5));
        assert_eq!(stats.no_volume, dec!(6));
        assert_eq!(stats.total_bets, 3);
    }
}
