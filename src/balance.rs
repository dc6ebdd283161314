// ============================================================================
// Balance Manager - two-part (available, locked) balances
// ============================================================================
//
// All functions take the caller's StoreTx so the balance change commits or
// rolls back together with the bet/market/ledger writes around it. They never
// write a user whose available or locked balance would go negative.
//
// ============================================================================

use rust_decimal::Decimal;

use crate::error::{LedgerError, LedgerResult};
use crate::models::{validate_amount, User, UserId};
use crate::store::StoreTx;

/// Move `amount` from available to locked.
pub fn lock(tx: &StoreTx<'_>, user_id: &UserId, amount: Decimal) -> LedgerResult<User> {
    let amount = validate_amount(amount)?;
    let mut user = tx.require_user(user_id)?;
    apply_lock(&mut user, amount)?;
    tx.put_user(&user)?;
    Ok(user)
}

/// Release `release` from locked and credit `credit` to available, in one write.
pub fn settle(
    tx: &StoreTx<'_>,
    user_id: &UserId,
    release: Decimal,
    credit: Decimal,
) -> LedgerResult<User> {
    let mut user = tx.require_user(user_id)?;
    apply_settle(&mut user, release, credit)?;
    tx.put_user(&user)?;
    Ok(user)
}

pub fn credit(tx: &StoreTx<'_>, user_id: &UserId, amount: Decimal) -> LedgerResult<User> {
    let amount = validate_amount(amount)?;
    let mut user = tx.require_user(user_id)?;
    user.balance_available = checked_add(user.balance_available, amount)?;
    user.updated_at = chrono::Utc::now();
    tx.put_user(&user)?;
    Ok(user)
}

pub fn debit(tx: &StoreTx<'_>, user_id: &UserId, amount: Decimal) -> LedgerResult<User> {
    let amount = validate_amount(amount)?;
    let mut user = tx.require_user(user_id)?;
    if user.balance_available < amount {
        return Err(LedgerError::InsufficientBalance {
            available: user.balance_available,
            requested: amount,
        });
    }
    user.balance_available -= amount;
    user.updated_at = chrono::Utc::now();
    tx.put_user(&user)?;
    Ok(user)
}

// ===== IN-MEMORY TRANSITIONS =====
// Used directly by settlement, which batches every change for a user into a
// single read and write.

pub fn apply_lock(user: &mut User, amount: Decimal) -> LedgerResult<()> {
    if user.balance_available < amount {
        return Err(LedgerError::InsufficientBalance {
            available: user.balance_available,
            requested: amount,
        });
    }
    let locked = checked_add(user.balance_locked, amount)?;
    user.balance_available -= amount;
    user.balance_locked = locked;
    user.updated_at = chrono::Utc::now();
    Ok(())
}

pub fn apply_settle(user: &mut User, release: Decimal, credit: Decimal) -> LedgerResult<()> {
    if release < Decimal::ZERO || credit < Decimal::ZERO {
        return Err(LedgerError::InvalidAmount(format!(
            "settle amounts must be non-negative (release {}, credit {})",
            release, credit
        )));
    }
    if release > user.balance_locked {
        return Err(LedgerError::Invariant(format!(
            "user {} releases {} but only {} is locked",
            user.id, release, user.balance_locked
        )));
    }
    let available = checked_add(user.balance_available, credit)?;
    user.balance_locked -= release;
    user.balance_available = available;
    user.updated_at = chrono::Utc::now();
    Ok(())
}

fn checked_add(balance: Decimal, amount: Decimal) -> LedgerResult<Decimal> {
    balance.checked_add(amount).ok_or_else(|| {
        LedgerError::InvalidAmount(format!("balance {} cannot take another {}", balance, amount))
    })
}
