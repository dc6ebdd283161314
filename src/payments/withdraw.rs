// Withdrawals: debit first, send, and compensate if the transfer fails.
//
// The outbound transfer can't take part in a store transaction, so this is
// three short transactions (each on the blocking pool) around one network call:
//   1. debit + PENDING withdrawal + WITHDRAWAL entry
//   2. on success: mark COMPLETED with the signature
//   3. on failure: credit back + mark FAILED + WithdrawalReversed entry

use rust_decimal::Decimal;

use crate::balance;
use crate::chain::ChainRpc;
use crate::config::Config;
use crate::error::{LedgerError, LedgerResult};
use crate::ledger::{self, EntryMeta};
use crate::models::{to_lamports, validate_amount, UserId, Withdrawal, WithdrawalStatus};
use crate::payments::deposit::wallet_of;
use crate::store::Store;

pub async fn withdraw(
    store: &Store,
    chain: &dyn ChainRpc,
    config: &Config,
    user_id: UserId,
    amount: Decimal,
) -> LedgerResult<Withdrawal> {
    let amount = validate_amount(amount)?;
    if amount < config.min_withdrawal {
        return Err(LedgerError::InvalidAmount(format!(
            "minimum withdrawal is {}",
            config.min_withdrawal
        )));
    }
    let lamports = to_lamports(amount)
        .ok_or_else(|| LedgerError::InvalidAmount(format!("{} is out of range", amount)))?;

    let pending = store
        .blocking(move |store| {
            store.transaction(|tx| {
                let user = tx.require_user(&user_id)?;
                let wallet = wallet_of(&user)?;
                balance::debit(tx, &user_id, amount)?;

                let withdrawal = Withdrawal::new(user_id, amount, wallet);
                tx.put_withdrawal(&withdrawal)?;
                ledger::record(
                    tx,
                    Some(user_id),
                    EntryMeta::Withdrawal {
                        withdrawal_id: withdrawal.id,
                        to_address: withdrawal.to_address.clone(),
                    },
                    amount,
                )?;
                Ok(withdrawal)
            })
        })
        .await?;
    let withdrawal_id = pending.id;

    tracing::info!(
        "💸 Withdrawal {} debited: {} to {}",
        pending.id,
        amount,
        pending.to_address
    );

    match chain.send_transfer(&pending.to_address, lamports).await {
        Ok(signature) => {
            let stored_signature = signature.clone();
            let completed = store
                .blocking(move |store| {
                    store.transaction(|tx| {
                        let mut withdrawal = tx
                            .withdrawal(&withdrawal_id)?
                            .ok_or_else(|| LedgerError::not_found("Withdrawal"))?;
                        withdrawal.status = WithdrawalStatus::Completed;
                        withdrawal.tx_signature = Some(stored_signature.clone());
                        withdrawal.updated_at = chrono::Utc::now();
                        tx.put_withdrawal(&withdrawal)?;
                        Ok(withdrawal)
                    })
                })
                .await?;
            tracing::info!("✅ Withdrawal {} sent: {}", completed.id, signature);
            Ok(completed)
        }
        Err(err) => {
            let reason = err.to_string();
            tracing::error!("❌ Withdrawal {} transfer failed: {}", pending.id, reason);

            let stored_reason = reason.clone();
            store
                .blocking(move |store| {
                    store.transaction(|tx| {
                        let mut withdrawal = tx
                            .withdrawal(&withdrawal_id)?
                            .ok_or_else(|| LedgerError::not_found("Withdrawal"))?;
                        if withdrawal.status != WithdrawalStatus::Pending {
                            return Ok(());
                        }
                        balance::credit(tx, &user_id, amount)?;
                        withdrawal.status = WithdrawalStatus::Failed;
                        withdrawal.failure_reason = Some(stored_reason.clone());
                        withdrawal.updated_at = chrono::Utc::now();
                        tx.put_withdrawal(&withdrawal)?;
                        ledger::record(
                            tx,
                            Some(user_id),
                            EntryMeta::WithdrawalReversed {
                                withdrawal_id: withdrawal.id,
                                reason: stored_reason.clone(),
                            },
                            amount,
                        )?;
                        Ok(())
                    })
                })
                .await?;

            tracing::info!("↩️  Withdrawal {} reversed: {} returned to user {}", pending.id, amount, user_id);
            Err(LedgerError::TransferFailed(reason))
        }
    }
}
