// Deposits: a PENDING record with a memo tag, confirmed against the chain.

use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::balance;
use crate::chain::{ChainRpc, ChainTransaction};
use crate::config::Config;
use crate::error::{LedgerError, LedgerResult};
use crate::ledger::{self, EntryMeta};
use crate::models::{from_lamports, validate_amount, Deposit, DepositStatus, User, UserId};
use crate::store::Store;

/// What the client needs to build the on-chain transfer
#[derive(Debug, Clone, Serialize)]
pub struct DepositInstructions {
    pub deposit_id: Uuid,
    pub treasury_address: String,
    pub memo: String,
    pub amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum VerifyFailure {
    #[error("Transaction failed on blockchain")]
    TransactionFailed,

    #[error("Invalid transaction: accounts not found")]
    AccountsNotFound,

    #[error("No transfer detected in transaction")]
    NoTransfer,

    #[error("Amount mismatch: expected {expected}, got {received}")]
    AmountMismatch { expected: Decimal, received: Decimal },

    #[error("Memo mismatch or not found in transaction")]
    MemoMismatch,
}

pub fn init_deposit(
    store: &Store,
    config: &Config,
    user_id: UserId,
    amount: Decimal,
) -> LedgerResult<DepositInstructions> {
    let amount = validate_amount(amount)?;
    if amount < config.min_deposit {
        return Err(LedgerError::InvalidAmount(format!(
            "minimum deposit is {}",
            config.min_deposit
        )));
    }
    let treasury = config
        .treasury_public_key
        .clone()
        .ok_or_else(|| LedgerError::ChainUnavailable("treasury wallet is not configured".into()))?;

    let deposit = store.transaction(|tx| {
        let user = tx.require_user(&user_id)?;
        let wallet = wallet_of(&user)?;
        let deposit = Deposit::new(user_id, amount, wallet);
        tx.put_deposit(&deposit)?;
        Ok(deposit)
    })?;

    tracing::info!("💳 Deposit {} initiated: {} for user {}", deposit.id, amount, user_id);
    Ok(DepositInstructions {
        deposit_id: deposit.id,
        treasury_address: treasury,
        memo: deposit.memo,
        amount,
    })
}

pub(crate) fn wallet_of(user: &User) -> LedgerResult<String> {
    user.wallet_address
        .clone()
        .filter(|w| !w.trim().is_empty())
        .ok_or_else(|| LedgerError::InvalidInput("no wallet connected".into()))
}

/// Check a fetched transaction against a pending deposit. Returns the
/// lamports the treasury received.
pub fn verify_transfer(
    tx: &ChainTransaction,
    deposit: &Deposit,
    treasury: &str,
    tolerance: Decimal,
) -> Result<u64, VerifyFailure> {
    if tx.failed {
        return Err(VerifyFailure::TransactionFailed);
    }

    let (Some(_), Some(treasury_index)) = (
        tx.account_index(&deposit.from_address),
        tx.account_index(treasury),
    ) else {
        return Err(VerifyFailure::AccountsNotFound);
    };

    let lamports = tx.received(treasury_index);
    if lamports == 0 {
        return Err(VerifyFailure::NoTransfer);
    }

    let received = from_lamports(lamports);
    if (received - deposit.amount).abs() > tolerance {
        return Err(VerifyFailure::AmountMismatch {
            expected: deposit.amount,
            received,
        });
    }

    if !tx.memos().any(|memo| memo == deposit.memo.as_bytes()) {
        return Err(VerifyFailure::MemoMismatch);
    }

    Ok(lamports)
}

/// Confirm a deposit by its on-chain signature. The chain lookup happens
/// outside any store transaction; the credit re-checks PENDING when it commits.
pub async fn confirm_deposit(
    store: &Store,
    chain: &dyn ChainRpc,
    config: &Config,
    deposit_id: Uuid,
    signature: &str,
) -> LedgerResult<Deposit> {
    let signature = signature.trim().to_string();
    if signature.is_empty() {
        return Err(LedgerError::InvalidInput("missing transaction signature".into()));
    }

    let deposit = store
        .deposit(&deposit_id)?
        .ok_or_else(|| LedgerError::not_found("Deposit"))?;
    if deposit.status != DepositStatus::Pending {
        return Err(LedgerError::InvalidInput("Deposit already processed".into()));
    }
    let treasury = config
        .treasury_public_key
        .as_deref()
        .ok_or_else(|| LedgerError::ChainUnavailable("treasury wallet is not configured".into()))?;

    let transaction = chain
        .get_transaction(&signature)
        .await
        .map_err(|e| {
            tracing::warn!("⚠️  Could not fetch {} for deposit {}: {}", signature, deposit_id, e);
            LedgerError::ChainUnavailable(e.to_string())
        })?
        .ok_or_else(|| LedgerError::not_found("Transaction"))?;

    if let Err(failure) = verify_transfer(&transaction, &deposit, treasury, config.deposit_tolerance) {
        let reason = failure.to_string();
        let stored_reason = reason.clone();
        store
            .blocking(move |store| {
                store.transaction(|tx| {
                    if let Some(mut pending) = tx.deposit(&deposit_id)? {
                        if pending.status == DepositStatus::Pending {
                            pending.status = DepositStatus::Failed;
                            pending.failure_reason = Some(stored_reason.clone());
                            pending.updated_at = chrono::Utc::now();
                            tx.put_deposit(&pending)?;
                        }
                    }
                    Ok(())
                })
            })
            .await?;
        tracing::warn!("❌ Deposit {} failed verification: {}", deposit_id, reason);
        return Err(LedgerError::ExternalVerificationFailed(reason));
    }

    let confirmed = store
        .blocking(move |store| {
            store.transaction(|tx| {
                let mut deposit = tx
                    .deposit(&deposit_id)?
                    .ok_or_else(|| LedgerError::not_found("Deposit"))?;
                if deposit.status != DepositStatus::Pending {
                    return Err(LedgerError::InvalidInput("Deposit already processed".into()));
                }

                balance::credit(tx, &deposit.user_id, deposit.amount)?;

                deposit.status = DepositStatus::Confirmed;
                deposit.tx_signature = Some(signature.clone());
                deposit.updated_at = chrono::Utc::now();
                tx.put_deposit(&deposit)?;

                ledger::record(
                    tx,
                    Some(deposit.user_id),
                    EntryMeta::Deposit {
                        deposit_id,
                        tx_signature: signature.clone(),
                    },
                    deposit.amount,
                )?;
                Ok(deposit)
            })
        })
        .await?;

    tracing::info!(
        "✅ Deposit {} confirmed: {} credited to user {}",
        deposit_id,
        confirmed.amount,
        confirmed.user_id
    );
    Ok(confirmed)
}
