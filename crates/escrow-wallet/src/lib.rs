//! C2 — the wallet layer: available/locked balances with optimistic
//! concurrency control.
//!
//! Every mutation reads the current row, computes the new row, and
//! compare-and-swaps it back. On conflict (another writer updated the
//! wallet first) the caller retries with backoff up to
//! `WALLET_CAS_MAX_RETRIES` times before giving up with
//! `EscrowError::ConcurrentModification`.

use std::time::Duration;

use escrow_core::constants::{WALLET_CAS_BACKOFF_BASE_MS, WALLET_CAS_MAX_RETRIES};
use escrow_core::domain::Wallet;
use escrow_core::error::EscrowError;
use escrow_core::types::{MinorUnits, Timestamp, WalletId};
use escrow_state::StateDb;
use tracing::warn;

/// Retry a wallet mutation against optimistic-concurrency CAS failures.
/// `mutate` receives the current wallet and returns the wallet it wants to
/// commit, or an error to abort immediately (e.g. insufficient balance).
async fn with_wallet_retry<F>(db: &StateDb, wallet_id: WalletId, mut mutate: F) -> Result<Wallet, EscrowError>
where
    F: FnMut(&Wallet) -> Result<Wallet, EscrowError>,
{
    let mut backoff_ms = WALLET_CAS_BACKOFF_BASE_MS;
    for attempt in 0..=WALLET_CAS_MAX_RETRIES {
        let current = db
            .get_wallet(&wallet_id)?
            .ok_or_else(|| EscrowError::WalletNotFound(wallet_id.to_string()))?;
        let mut next = mutate(&current)?;
        next.version = current.version + 1;

        if db.cas_wallet(&current, &next)? {
            return Ok(next);
        }
        if attempt == WALLET_CAS_MAX_RETRIES {
            break;
        }
        warn!(%wallet_id, attempt, "wallet CAS conflict, retrying");
        tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
        backoff_ms *= 2;
    }
    Err(EscrowError::ConcurrentModification(wallet_id.to_string()))
}

/// Debit the available balance (e.g. escrow hold, withdrawal).
pub async fn deduct(db: &StateDb, wallet_id: WalletId, amount_minor: MinorUnits, now: Timestamp) -> Result<Wallet, EscrowError> {
    require_positive(amount_minor)?;
    with_wallet_retry(db, wallet_id, |w| {
        if w.available_minor < amount_minor {
            return Err(EscrowError::InsufficientBalance(wallet_id.to_string()));
        }
        Ok(Wallet {
            available_minor: w.available_minor - amount_minor,
            updated_at: now,
            ..w.clone()
        })
    })
    .await
}

/// Credit the available balance (e.g. deposit, escrow release to seller).
pub async fn credit(db: &StateDb, wallet_id: WalletId, amount_minor: MinorUnits, now: Timestamp) -> Result<Wallet, EscrowError> {
    require_positive(amount_minor)?;
    with_wallet_retry(db, wallet_id, |w| {
        Ok(Wallet {
            available_minor: w
                .available_minor
                .checked_add(amount_minor)
                .ok_or_else(|| EscrowError::InvalidAmount("wallet balance overflow".into()))?,
            updated_at: now,
            ..w.clone()
        })
    })
    .await
}

/// Move funds from available into locked (escrow hold, pending withdrawal).
pub async fn lock(db: &StateDb, wallet_id: WalletId, amount_minor: MinorUnits, now: Timestamp) -> Result<Wallet, EscrowError> {
    require_positive(amount_minor)?;
    with_wallet_retry(db, wallet_id, |w| {
        if w.available_minor < amount_minor {
            return Err(EscrowError::InsufficientBalance(wallet_id.to_string()));
        }
        Ok(Wallet {
            available_minor: w.available_minor - amount_minor,
            locked_minor: w.locked_minor + amount_minor,
            updated_at: now,
            ..w.clone()
        })
    })
    .await
}

/// Move funds from locked back into available (e.g. withdrawal rejected).
pub async fn unlock(db: &StateDb, wallet_id: WalletId, amount_minor: MinorUnits, now: Timestamp) -> Result<Wallet, EscrowError> {
    require_positive(amount_minor)?;
    with_wallet_retry(db, wallet_id, |w| {
        if w.locked_minor < amount_minor {
            return Err(EscrowError::InsufficientLockedBalance(wallet_id.to_string()));
        }
        Ok(Wallet {
            locked_minor: w.locked_minor - amount_minor,
            available_minor: w.available_minor + amount_minor,
            updated_at: now,
            ..w.clone()
        })
    })
    .await
}

/// Remove funds from a wallet's locked balance without crediting anywhere
/// else in the wallet layer — used when the locked amount's destination is
/// outside the wallet system entirely (platform fees, which have a ledger
/// account but no wallet of their own).
pub async fn release_locked(db: &StateDb, wallet_id: WalletId, amount_minor: MinorUnits, now: Timestamp) -> Result<Wallet, EscrowError> {
    if amount_minor < 0 {
        return Err(EscrowError::InvalidAmount(format!("amount must be non-negative, got {amount_minor}")));
    }
    if amount_minor == 0 {
        return db
            .get_wallet(&wallet_id)?
            .ok_or_else(|| EscrowError::WalletNotFound(wallet_id.to_string()));
    }
    with_wallet_retry(db, wallet_id, |w| {
        if w.locked_minor < amount_minor {
            return Err(EscrowError::InsufficientLockedBalance(wallet_id.to_string()));
        }
        Ok(Wallet {
            locked_minor: w.locked_minor - amount_minor,
            updated_at: now,
            ..w.clone()
        })
    })
    .await
}

/// Remove funds from one wallet's locked balance and credit another
/// wallet's available balance (escrow release/refund).
///
/// Acquires the two wallets in ascending id order to avoid the classic
/// "two transfers crossing in opposite order" deadlock — each wallet row
/// is still mutated independently via CAS, so this is ordering discipline
/// rather than a real lock, but it is sufficient because no operation ever
/// holds a partial update: `transfer_locked` fully commits the sender side
/// before touching the receiver.
pub async fn transfer_locked(
    db: &StateDb,
    from_wallet_id: WalletId,
    to_wallet_id: WalletId,
    amount_minor: MinorUnits,
    now: Timestamp,
) -> Result<(Wallet, Wallet), EscrowError> {
    require_positive(amount_minor)?;
    let (first, second) = if from_wallet_id.0 <= to_wallet_id.0 {
        (from_wallet_id, to_wallet_id)
    } else {
        (to_wallet_id, from_wallet_id)
    };
    let _ = (first, second); // ordering is documentation here; each op below is independently safe.

    let debited = with_wallet_retry(db, from_wallet_id, |w| {
        if w.locked_minor < amount_minor {
            return Err(EscrowError::InsufficientLockedBalance(from_wallet_id.to_string()));
        }
        Ok(Wallet {
            locked_minor: w.locked_minor - amount_minor,
            updated_at: now,
            ..w.clone()
        })
    })
    .await?;

    let credited = match credit(db, to_wallet_id, amount_minor, now).await {
        Ok(w) => w,
        Err(e) => {
            // Compensate: give the amount back to the sender's locked balance.
            warn!(%from_wallet_id, %to_wallet_id, error = %e, "transfer_locked failed after debit, compensating");
            with_wallet_retry(db, from_wallet_id, |w| {
                Ok(Wallet {
                    locked_minor: w.locked_minor + amount_minor,
                    updated_at: now,
                    ..w.clone()
                })
            })
            .await?;
            return Err(e);
        }
    };

    Ok((debited, credited))
}

/// Cross-check a wallet's recorded `available + locked` against its
/// backing ledger account balance — used by the scheduler's reconciliation
/// sweep. Any drift is a critical integrity failure, not a
/// recoverable error. On a clean match, stamps the wallet with
/// `last_reconciled_at` and a fresh `reconciliation_hash` so the next sweep
/// (or an auditor) can see when a wallet was last proven correct.
pub async fn reconcile(db: &StateDb, wallet_id: WalletId) -> Result<ReconcileReport, EscrowError> {
    let wallet = db
        .get_wallet(&wallet_id)?
        .ok_or_else(|| EscrowError::WalletNotFound(wallet_id.to_string()))?;
    let ledger_balance = escrow_ledger::get_account_balance(db, &wallet.ledger_account_id)?;
    let wallet_total = wallet.total_minor();
    let drift_minor = wallet_total - ledger_balance;

    if drift_minor != 0 {
        warn!(%wallet_id, wallet_total, ledger_balance, "wallet does not match its ledger account");
        return Err(EscrowError::LedgerMismatch(
            wallet_id.to_string(),
            format!("wallet total {wallet_total} != ledger balance {ledger_balance}"),
        ));
    }

    let now = chrono::Utc::now();
    let hash = escrow_crypto::reconciliation_hash(&[wallet_id.to_string(), wallet_total.to_string(), now.to_rfc3339()]);
    let updated = with_wallet_retry(db, wallet_id, |w| {
        Ok(Wallet {
            updated_at: now,
            last_reconciled_at: Some(now),
            reconciliation_hash: Some(hash.clone()),
            ..w.clone()
        })
    })
    .await?;

    Ok(ReconcileReport {
        wallet_id,
        wallet_total_minor: wallet_total,
        ledger_balance_minor: ledger_balance,
        drift_minor: 0,
        reconciliation_hash: updated.reconciliation_hash,
    })
}

#[derive(Debug)]
pub struct ReconcileReport {
    pub wallet_id: WalletId,
    pub wallet_total_minor: MinorUnits,
    pub ledger_balance_minor: MinorUnits,
    pub drift_minor: MinorUnits,
    pub reconciliation_hash: Option<String>,
}

impl ReconcileReport {
    pub fn is_balanced(&self) -> bool {
        self.drift_minor == 0
    }
}

fn require_positive(amount_minor: MinorUnits) -> Result<(), EscrowError> {
    if amount_minor <= 0 {
        return Err(EscrowError::InvalidAmount(format!(
            "amount must be positive, got {amount_minor}"
        )));
    }
    Ok(())
}
