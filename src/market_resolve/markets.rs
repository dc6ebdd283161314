// Market repository operations: creation, lookup, listing, closing

use chrono::{DateTime, Utc};

use crate::error::{LedgerError, LedgerResult};
use crate::models::{Bet, Market, MarketDetail, MarketId, MarketStats, MarketStatus, MarketSummary, UserId};
use crate::store::Store;

/// Create a new OPEN market with an empty prize pool.
pub fn create_market(
    store: &Store,
    creator_id: UserId,
    title: &str,
    description: Option<String>,
    expires_at: Option<DateTime<Utc>>,
) -> LedgerResult<Market> {
    let title = title.trim();
    if title.is_empty() {
        return Err(LedgerError::InvalidInput("title must not be empty".into()));
    }
    if let Some(expiry) = expires_at {
        if expiry <= Utc::now() {
            return Err(LedgerError::InvalidInput(
                "expiry must be in the future".into(),
            ));
        }
    }
    let description = description
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty());

    let market = store.transaction(|tx| {
        tx.require_user(&creator_id)?;
        let market = Market::new(creator_id, title.to_string(), description.clone(), expires_at);
        tx.put_market(&market)?;
        Ok(market)
    })?;

    tracing::info!("📈 Market created: {} ({})", market.title, market.id);
    Ok(market)
}

/// Market with its creator, bets (newest first) and volume stats.
pub fn get_market(store: &Store, market_id: &MarketId) -> LedgerResult<MarketDetail> {
    let market = store
        .market(market_id)?
        .ok_or_else(|| LedgerError::not_found("Market"))?;
    let creator = store.user(&market.creator_id)?;
    let mut bets = store.bets_for_market(market_id)?;
    let stats = MarketStats::from_bets(&bets);
    bets.reverse();

    Ok(MarketDetail {
        market,
        creator,
        bets,
        stats,
    })
}

/// OPEN markets, newest first, each with volume aggregates.
pub fn list_open_markets(store: &Store) -> LedgerResult<Vec<MarketSummary>> {
    let mut open: Vec<Market> = store
        .markets()?
        .into_iter()
        .filter(|m| m.status == MarketStatus::Open)
        .collect();
    open.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    open.into_iter()
        .map(|market| -> LedgerResult<MarketSummary> {
            let stats = MarketStats::from_bets(&store.bets_for_market(&market.id)?);
            Ok(MarketSummary { market, stats })
        })
        .collect()
}

/// Stop accepting bets. The market can still be resolved afterwards.
pub fn close_market(store: &Store, market_id: &MarketId) -> LedgerResult<Market> {
    let market = store.transaction(|tx| {
        let mut market = tx
            .market(market_id)?
            .ok_or_else(|| LedgerError::not_found("Market"))?;
        if market.status != MarketStatus::Open {
            return Err(LedgerError::MarketClosed);
        }
        market.status = MarketStatus::Closed;
        tx.put_market(&market)?;
        Ok(market)
    })?;

    tracing::info!("🔒 Market closed: {}", market.id);
    Ok(market)
}

/// A user's bets, newest first.
pub fn user_bets(store: &Store, user_id: &UserId) -> LedgerResult<Vec<Bet>> {
    if store.user(user_id)?.is_none() {
        return Err(LedgerError::not_found("User"));
    }
    let mut bets = store.bets_for_user(user_id)?;
    bets.reverse();
    Ok(bets)
}
