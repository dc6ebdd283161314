// Users: resolve-or-create from the auth provider identity, display names,
// and manual balance adjustments.

use regex::Regex;
use rust_decimal::Decimal;

use crate::balance;
use crate::error::{LedgerError, LedgerResult};
use crate::ledger::{self, AdjustmentDirection, EntryMeta};
use crate::models::{User, UserId};
use crate::store::{Store, StoreTx};

const USERNAME_PATTERN: &str = r"^[A-Za-z0-9_]{3,25}$";

fn username_regex() -> LedgerResult<Regex> {
    Regex::new(USERNAME_PATTERN).map_err(|e| LedgerError::Invariant(e.to_string()))
}

/// Get the user for an external identity, creating it on first sight.
/// Returns the user and whether it was just created.
pub fn bootstrap_user(
    store: &Store,
    external_id: &str,
    email: Option<String>,
    wallet_address: Option<String>,
) -> LedgerResult<(User, bool)> {
    let external_id = external_id.trim();
    if external_id.is_empty() {
        return Err(LedgerError::InvalidInput("external user id is required".into()));
    }
    let email = email.map(|e| e.trim().to_string()).filter(|e| !e.is_empty());
    let wallet_address = wallet_address
        .map(|w| w.trim().to_string())
        .filter(|w| !w.is_empty());
    let pattern = username_regex()?;

    let (user, created) = store.transaction(|tx| {
        if let Some(id) = tx.user_id_by_external_id(external_id)? {
            let mut user = tx.require_user(&id)?;
            if user.wallet_address.is_none() && wallet_address.is_some() {
                user.wallet_address = wallet_address.clone();
                user.updated_at = chrono::Utc::now();
                tx.put_user(&user)?;
            }
            return Ok((user, false));
        }

        let mut user = User::new(external_id.to_string(), email.clone(), wallet_address.clone());
        user.username = default_username(tx, &pattern, external_id, email.as_deref())?;
        if let Some(name) = &user.username {
            tx.claim_username(name, &user.id)?;
        }
        tx.put_user(&user)?;
        tx.put_external_id(external_id, &user.id)?;
        Ok((user, true))
    })?;

    if created {
        tracing::info!("🆕 User created: {} ({})", user.id, external_id);
    }
    Ok((user, created))
}

/// Email local part, else `user_` + the first 8 alphanumerics of the
/// external id; only if it is a valid, unclaimed name.
fn default_username(
    tx: &StoreTx<'_>,
    pattern: &Regex,
    external_id: &str,
    email: Option<&str>,
) -> LedgerResult<Option<String>> {
    let candidate = match email.and_then(|e| e.split('@').next()).filter(|l| !l.is_empty()) {
        Some(local) => local.to_string(),
        None => {
            let short: String = external_id
                .chars()
                .filter(|c| c.is_ascii_alphanumeric())
                .take(8)
                .collect();
            format!("user_{}", short)
        }
    };

    if !pattern.is_match(&candidate) || tx.username_owner(&candidate)?.is_some() {
        return Ok(None);
    }
    Ok(Some(candidate))
}

pub fn get_user(store: &Store, user_id: &UserId) -> LedgerResult<User> {
    store.user(user_id)?.ok_or_else(|| LedgerError::not_found("User"))
}

pub fn get_user_by_external_id(store: &Store, external_id: &str) -> LedgerResult<User> {
    store
        .user_by_external_id(external_id)?
        .ok_or_else(|| LedgerError::not_found("User"))
}

/// 3-25 characters of letters, digits and underscores, unique ignoring case.
pub fn set_username(store: &Store, user_id: &UserId, name: &str) -> LedgerResult<User> {
    let name = name.trim();
    if !username_regex()?.is_match(name) {
        return Err(LedgerError::InvalidInput(
            "username must be 3-25 characters of letters, numbers or underscores".into(),
        ));
    }

    let user = store.transaction(|tx| {
        let mut user = tx.require_user(user_id)?;
        match tx.username_owner(name)? {
            Some(owner) if owner != user.id => {
                return Err(LedgerError::Conflict(format!("username {} is taken", name)))
            }
            _ => {}
        }
        if let Some(previous) = &user.username {
            tx.release_username(previous)?;
        }
        tx.claim_username(name, &user.id)?;
        user.username = Some(name.to_string());
        user.updated_at = chrono::Utc::now();
        tx.put_user(&user)?;
        Ok(user)
    })?;

    tracing::info!("✏️  User {} is now {}", user.id, name);
    Ok(user)
}

/// Manual credit or debit of available balance, recorded as ADMIN_ADJUSTMENT.
pub fn admin_adjust(
    store: &Store,
    user_id: &UserId,
    direction: AdjustmentDirection,
    amount: Decimal,
    note: &str,
) -> LedgerResult<User> {
    let user = store.transaction(|tx| {
        let user = match direction {
            AdjustmentDirection::Credit => balance::credit(tx, user_id, amount)?,
            AdjustmentDirection::Debit => balance::debit(tx, user_id, amount)?,
        };
        ledger::record(
            tx,
            Some(*user_id),
            EntryMeta::Adjustment {
                direction,
                note: note.to_string(),
            },
            amount,
        )?;
        Ok(user)
    })?;

    tracing::info!("🛠️  Admin {:?} of {} for user {}: {}", direction, amount, user_id, note);
    Ok(user)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_bootstrap_is_idempotent_and_adopts_wallet() {
        let store = Store::temporary().unwrap();

        let (first, created) = bootstrap_user(&store, "did:privy:abc123xyz", Some("alice@example.com".into()), None).unwrap();
        assert!(created);
        assert_eq!(first.username.as_deref(), Some("alice"));
        assert_eq!(first.balance_available, dec!(0));

        let (again, created) = bootstrap_user(&store, "did:privy:abc123xyz", None, Some("Wallet1".into())).unwrap();
        assert!(!created);
        assert_eq!(again.id, first.id);
        assert_eq!(again.wallet_address.as_deref(), Some("Wallet1"));
    }

    #[test]
    fn test_default_username_fallbacks() {
        let store = Store::temporary().unwrap();

        let (no_email, _) = bootstrap_user(&store, "did:privy:abc123xyz", None, None).unwrap();
        assert_eq!(no_email.username.as_deref(), Some("user_didprivy"));

        // local part already taken: stays unnamed
        bootstrap_user(&store, "ext-a", Some("bob@a.com".into()), None).unwrap();
        let (second_bob, _) = bootstrap_user(&store, "ext-b", Some("bob@b.com".into()), None).unwrap();
        assert_eq!(second_bob.username, None);
    }

    #[test]
    fn test_set_username_rules() {
        let store = Store::temporary().unwrap();
        let (alice, _) = bootstrap_user(&store, "ext-alice", None, None).unwrap();
        let (bob, _) = bootstrap_user(&store, "ext-bob", None, None).unwrap();

        assert!(matches!(set_username(&store, &alice.id, "ab"), Err(LedgerError::InvalidInput(_))));
        assert!(matches!(set_username(&store, &alice.id, "no spaces"), Err(LedgerError::InvalidInput(_))));

        set_username(&store, &alice.id, "Alice_1").unwrap();
        assert!(matches!(set_username(&store, &bob.id, "alice_1"), Err(LedgerError::Conflict(_))));

        // renaming frees the old name
        set_username(&store, &alice.id, "Alice_2").unwrap();
        assert_eq!(set_username(&store, &bob.id, "alice_1").unwrap().username.as_deref(), Some("alice_1"));
    }

    #[test]
    fn test_admin_adjust_records_entry() {
        let store = Store::temporary().unwrap();
        let (user, _) = bootstrap_user(&store, "ext-adj", None, None).unwrap();

        let credited = admin_adjust(&store, &user.id, AdjustmentDirection::Credit, dec!(10), "seed").unwrap();
        assert_eq!(credited.balance_available, dec!(10));
        assert!(matches!(
            admin_adjust(&store, &user.id, AdjustmentDirection::Debit, dec!(11), "too much"),
            Err(LedgerError::InsufficientBalance { .. })
        ));

        let entries = store.ledger_for_user(&user.id).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].amount, dec!(10));
    }
}
