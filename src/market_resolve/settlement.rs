// ============================================================================
// Settlement Engine - parimutuel resolution of a market
// ============================================================================
//
// Winners split the entire prize pool in proportion to their stakes. If no
// active stake backed the winning side, every active bet is refunded instead.
//
// Payouts are computed in whole lamports and rounded down; whatever the
// rounding leaves behind is recorded as dust on the market and in a system
// ledger entry, so that payouts + dust == prize pool exactly.
//
// ============================================================================

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::balance;
use crate::error::{LedgerError, LedgerResult};
use crate::ledger::{self, EntryMeta};
use crate::models::{Bet, BetId, BetStatus, MarketId, MarketStatus, Side, UserId, AMOUNT_SCALE};
use crate::store::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Won,
    Lost,
    Refunded,
}

/// What happens to one active bet
#[derive(Debug, Clone, PartialEq)]
pub struct BetSettlement {
    pub bet_id: BetId,
    pub user_id: UserId,
    pub side: Side,
    pub stake: Decimal,
    pub outcome: Outcome,
    /// Amount credited to available balance (zero for losers)
    pub credit: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SettlementPlan {
    pub winning_side: Side,
    pub total_pool: Decimal,
    pub winning_pool: Decimal,
    pub refund: bool,
    /// Same order as the bets the plan was computed from
    pub settlements: Vec<BetSettlement>,
    pub total_paid: Decimal,
    pub dust: Decimal,
}

impl SettlementPlan {
    /// Pure computation over the market's ACTIVE bets.
    pub fn compute(total_pool: Decimal, active_bets: &[Bet], winning_side: Side) -> LedgerResult<Self> {
        let staked: Decimal = active_bets.iter().map(|b| b.amount).sum();
        if total_pool < staked {
            return Err(LedgerError::Invariant(format!(
                "prize pool {} is smaller than active stakes {}",
                total_pool, staked
            )));
        }

        let winning_pool: Decimal = active_bets
            .iter()
            .filter(|b| b.prediction == winning_side)
            .map(|b| b.amount)
            .sum();
        let refund = winning_pool.is_zero();

        let total_l = lamports(total_pool)?;
        let winning_l = lamports(winning_pool)?;

        let mut settlements = Vec::with_capacity(active_bets.len());
        for bet in active_bets {
            let (outcome, credit) = if refund {
                (Outcome::Refunded, bet.amount)
            } else if bet.prediction == winning_side {
                // stake and pool are both below u64::MAX lamports, so the
                // product fits in u128
                let payout_l = lamports(bet.amount)?
                    .checked_mul(total_l)
                    .ok_or_else(|| LedgerError::Invariant("payout overflow".into()))?
                    / winning_l;
                let payout = i128::try_from(payout_l)
                    .ok()
                    .and_then(|l| Decimal::try_from_i128_with_scale(l, AMOUNT_SCALE).ok())
                    .ok_or_else(|| LedgerError::Invariant(format!("payout {} out of range", payout_l)))?;
                (Outcome::Won, payout.normalize())
            } else {
                (Outcome::Lost, Decimal::ZERO)
            };

            settlements.push(BetSettlement {
                bet_id: bet.id,
                user_id: bet.user_id,
                side: bet.prediction,
                stake: bet.amount,
                outcome,
                credit,
            });
        }

        let total_paid: Decimal = settlements.iter().map(|s| s.credit).sum();
        let dust = total_pool - total_paid;
        if dust < Decimal::ZERO {
            return Err(LedgerError::Invariant(format!(
                "payouts {} exceed prize pool {}",
                total_paid, total_pool
            )));
        }

        Ok(Self {
            winning_side,
            total_pool,
            winning_pool,
            refund,
            settlements,
            total_paid,
            dust,
        })
    }

    /// (release, credit) per user, so each user is read and written once.
    pub fn per_user(&self) -> BTreeMap<UserId, (Decimal, Decimal)> {
        let mut totals: BTreeMap<UserId, (Decimal, Decimal)> = BTreeMap::new();
        for s in &self.settlements {
            let entry = totals.entry(s.user_id).or_default();
            entry.0 += s.stake;
            entry.1 += s.credit;
        }
        totals
    }
}

/// Amount in whole lamports. Amounts in the store never carry more than
/// nine decimal places.
fn lamports(amount: Decimal) -> LedgerResult<u128> {
    let mut scaled = amount;
    scaled.rescale(AMOUNT_SCALE);
    if scaled != amount {
        return Err(LedgerError::Invariant(format!(
            "amount {} is finer than one lamport",
            amount
        )));
    }
    u128::try_from(scaled.mantissa())
        .map_err(|_| LedgerError::Invariant(format!("amount {} is negative", amount)))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolutionSummary {
    pub market_id: MarketId,
    pub winning_side: Side,
    pub total_pool: Decimal,
    pub winning_pool: Decimal,
    pub refund: bool,
    pub winners: usize,
    pub losers: usize,
    pub refunded: usize,
    pub total_paid: Decimal,
    pub dust: Decimal,
}

impl ResolutionSummary {
    fn from_plan(market_id: MarketId, plan: &SettlementPlan) -> Self {
        let count = |o: Outcome| plan.settlements.iter().filter(|s| s.outcome == o).count();
        Self {
            market_id,
            winning_side: plan.winning_side,
            total_pool: plan.total_pool,
            winning_pool: plan.winning_pool,
            refund: plan.refund,
            winners: count(Outcome::Won),
            losers: count(Outcome::Lost),
            refunded: count(Outcome::Refunded),
            total_paid: plan.total_paid,
            dust: plan.dust,
        }
    }
}

/// Resolve a market in one store transaction: every bet, balance, ledger
/// entry and the market itself change together or not at all.
pub fn resolve_market(
    store: &Store,
    market_id: MarketId,
    winning_side: Side,
) -> LedgerResult<ResolutionSummary> {
    let summary = store.transaction(|tx| {
        let mut market = tx
            .market(&market_id)?
            .ok_or_else(|| LedgerError::not_found("Market"))?;
        match market.status {
            MarketStatus::Resolved => return Err(LedgerError::AlreadyResolved),
            MarketStatus::Canceled => return Err(LedgerError::MarketClosed),
            MarketStatus::Open | MarketStatus::Closed => {}
        }

        let active: Vec<Bet> = tx
            .bets_for_market(&market_id)?
            .into_iter()
            .filter(Bet::is_active)
            .collect();
        let plan = SettlementPlan::compute(market.prize_pool, &active, winning_side)?;
        let now = Utc::now();

        for (bet, settlement) in active.iter().zip(&plan.settlements) {
            let mut bet = bet.clone();
            bet.settled_at = Some(now);
            let meta = match settlement.outcome {
                Outcome::Won => {
                    bet.status = BetStatus::Won;
                    bet.payout = Some(settlement.credit);
                    EntryMeta::BetWon {
                        market_id,
                        bet_id: bet.id,
                        side: bet.prediction,
                        original_stake: bet.amount,
                    }
                }
                Outcome::Refunded => {
                    bet.status = BetStatus::Refunded;
                    bet.payout = Some(settlement.credit);
                    EntryMeta::BetRefunded {
                        market_id,
                        bet_id: bet.id,
                        side: bet.prediction,
                    }
                }
                Outcome::Lost => {
                    bet.status = BetStatus::Lost;
                    EntryMeta::BetLost {
                        market_id,
                        bet_id: bet.id,
                        side: bet.prediction,
                        winning_side,
                    }
                }
            };
            tx.put_bet(&bet)?;

            let amount = match settlement.outcome {
                Outcome::Lost => settlement.stake,
                Outcome::Won | Outcome::Refunded => settlement.credit,
            };
            ledger::record(tx, Some(bet.user_id), meta, amount)?;
        }

        for (user_id, (release, credit)) in plan.per_user() {
            let mut user = tx.require_user(&user_id)?;
            balance::apply_settle(&mut user, release, credit)?;
            tx.put_user(&user)?;
        }

        if plan.dust > Decimal::ZERO {
            ledger::record(tx, None, EntryMeta::ResolutionDust { market_id }, plan.dust)?;
        }

        market.status = MarketStatus::Resolved;
        market.winner_side = Some(winning_side);
        market.resolved_at = Some(now);
        market.settlement_dust = plan.dust;
        market.prize_pool = Decimal::ZERO;
        tx.put_market(&market)?;

        Ok(ResolutionSummary::from_plan(market_id, &plan))
    })?;

    if summary.refund {
        tracing::info!(
            "↩️  Market {} resolved {} with no winning stake: refunded {} bets ({})",
            market_id,
            winning_side,
            summary.refunded,
            summary.total_paid
        );
    } else {
        tracing::info!(
            "🏁 Market {} resolved {}: {} winners paid {} of {}, {} losers, dust {}",
            market_id,
            winning_side,
            summary.winners,
            summary.total_paid,
            summary.total_pool,
            summary.losers,
            summary.dust
        );
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn bet(market: MarketId, amount: Decimal, side: Side) -> Bet {
        Bet::new(market, Uuid::new_v4(), amount, side)
    }

    #[test]
    fn test_winner_takes_whole_pool() {
        let market = Uuid::new_v4();
        let bets = vec![bet(market, dec!(4), Side::Yes), bet(market, dec!(6), Side::No)];

        let plan = SettlementPlan::compute(dec!(10), &bets, Side::Yes).unwrap();
        assert!(!plan.refund);
        assert_eq!(plan.winning_pool, dec!(4));
        assert_eq!(plan.settlements[0].outcome, Outcome::Won);
        assert_eq!(plan.settlements[0].credit, dec!(10));
        assert_eq!(plan.settlements[1].outcome, Outcome::Lost);
        assert_eq!(plan.settlements[1].credit, dec!(0));
        assert_eq!(plan.dust, dec!(0));
    }

    #[test]
    fn test_no_winning_stake_refunds_everyone() {
        let market = Uuid::new_v4();
        let bets = vec![bet(market, dec!(5), Side::No)];

        let plan = SettlementPlan::compute(dec!(5), &bets, Side::Yes).unwrap();
        assert!(plan.refund);
        assert_eq!(plan.settlements[0].outcome, Outcome::Refunded);
        assert_eq!(plan.settlements[0].credit, dec!(5));
        assert_eq!(plan.total_paid, dec!(5));
    }

    #[test]
    fn test_empty_market_is_a_refund_of_nothing() {
        let plan = SettlementPlan::compute(dec!(0), &[], Side::No).unwrap();
        assert!(plan.refund);
        assert!(plan.settlements.is_empty());
        assert_eq!(plan.dust, dec!(0));
    }

    #[test]
    fn test_rounding_goes_down_and_dust_is_kept() {
        let market = Uuid::new_v4();
        let bets = vec![
            bet(market, dec!(1), Side::Yes),
            bet(market, dec!(1), Side::Yes),
            bet(market, dec!(1), Side::Yes),
            bet(market, dec!(7), Side::No),
        ];

        let plan = SettlementPlan::compute(dec!(10), &bets, Side::Yes).unwrap();
        for s in &plan.settlements[..3] {
            assert_eq!(s.credit, dec!(3.333333333));
        }
        assert_eq!(plan.total_paid, dec!(9.999999999));
        assert_eq!(plan.dust, dec!(0.000000001));
        assert_eq!(plan.total_paid + plan.dust, plan.total_pool);
    }

    #[test]
    fn test_proportional_split() {
        let market = Uuid::new_v4();
        let bets = vec![
            bet(market, dec!(1), Side::No),
            bet(market, dec!(3), Side::No),
            bet(market, dec!(2.5), Side::Yes),
        ];

        let plan = SettlementPlan::compute(dec!(6.5), &bets, Side::No).unwrap();
        assert_eq!(plan.settlements[0].credit, dec!(1.625));
        assert_eq!(plan.settlements[1].credit, dec!(4.875));
        assert_eq!(plan.dust, dec!(0));
    }

    #[test]
    fn test_largest_pool_does_not_overflow() {
        let market = Uuid::new_v4();
        let max = crate::models::max_amount();
        let bets = vec![
            bet(market, max - dec!(1), Side::Yes),
            bet(market, dec!(1), Side::No),
        ];

        let plan = SettlementPlan::compute(max, &bets, Side::Yes).unwrap();
        assert_eq!(plan.settlements[0].credit, max);
        assert_eq!(plan.dust, dec!(0));
    }

    #[test]
    fn test_pool_short_of_stakes_is_an_invariant_error() {
        let market = Uuid::new_v4();
        let bets = vec![bet(market, dec!(4), Side::Yes)];
        assert!(matches!(
            SettlementPlan::compute(dec!(3), &bets, Side::Yes),
            Err(LedgerError::Invariant(_))
        ));
    }

    #[test]
    fn test_per_user_batches_multiple_bets() {
        let market = Uuid::new_v4();
        let user = Uuid::new_v4();
        let mut a = bet(market, dec!(2), Side::Yes);
        let mut b = bet(market, dec!(3), Side::No);
        a.user_id = user;
        b.user_id = user;

        let plan = SettlementPlan::compute(dec!(5), &[a, b], Side::Yes).unwrap();
        let totals = plan.per_user();
        assert_eq!(totals.len(), 1);
        assert_eq!(totals[&user], (dec!(5), dec!(5)));
    }
}
