// Bet placement: stake moves from the user's available balance into the
// market's prize pool.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::balance;
use crate::error::{LedgerError, LedgerResult};
use crate::ledger::{self, EntryMeta};
use crate::models::{max_amount, validate_amount, Bet, MarketId, MarketStatus, Side, UserId};
use crate::store::Store;

pub fn place_bet(
    store: &Store,
    user_id: UserId,
    market_id: MarketId,
    side: Side,
    stake: Decimal,
) -> LedgerResult<Bet> {
    place_bet_at(store, user_id, market_id, side, stake, Utc::now())
}

/// Checks run in this order and the first failure wins:
/// stake, market exists, market OPEN, not expired, user balance, pool capacity.
/// Nothing is written unless every check passes.
pub fn place_bet_at(
    store: &Store,
    user_id: UserId,
    market_id: MarketId,
    side: Side,
    stake: Decimal,
    now: DateTime<Utc>,
) -> LedgerResult<Bet> {
    let stake = validate_amount(stake)?;

    let bet = store.transaction(|tx| {
        let mut market = tx
            .market(&market_id)?
            .ok_or_else(|| LedgerError::not_found("Market"))?;
        if market.status != MarketStatus::Open {
            return Err(LedgerError::MarketClosed);
        }
        if market.is_expired_at(now) {
            return Err(LedgerError::MarketExpired);
        }

        balance::lock(tx, &user_id, stake)?;

        market.prize_pool = market
            .prize_pool
            .checked_add(stake)
            .filter(|pool| *pool <= max_amount())
            .ok_or_else(|| {
                LedgerError::InvalidAmount(format!(
                    "prize pool {} cannot take another {} (maximum {})",
                    market.prize_pool,
                    stake,
                    max_amount()
                ))
            })?;
        tx.put_market(&market)?;

        let bet = Bet::new(market_id, user_id, stake, side);
        tx.insert_bet(&bet)?;

        ledger::record(
            tx,
            Some(user_id),
            EntryMeta::BetPlaced {
                market_id,
                bet_id: bet.id,
                side,
            },
            stake,
        )?;
        Ok(bet)
    })?;

    tracing::info!(
        "🎯 Bet placed: user {} staked {} on {} in market {}",
        user_id,
        stake,
        side,
        market_id
    );
    Ok(bet)
}
