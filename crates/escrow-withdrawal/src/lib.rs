//! C4 — the withdrawal pipeline: tiered limits, velocity scoring, and dual
//! admin approval over a threshold.
//!
//! The core state machine lives here as plain functions over `Withdrawal`
//! rows; `escrow-state` provides storage and `escrow-wallet`/`escrow-ledger`
//! move the actual money once a withdrawal clears.

pub mod approval;
pub mod limits;
pub mod query;
pub mod velocity;

use escrow_core::constants::{MONTHLY_LOOKBACK_DAYS, VELOCITY_LOOKBACK_HOURS};
use escrow_core::domain::{Withdrawal, WithdrawalStatus, WithdrawalVelocityLog};
use escrow_core::error::EscrowError;
use escrow_core::types::{
    BankAccountId, EntryId, LedgerAccountId, MinorUnits, Timestamp, UserId, WalletId, WithdrawalId,
};
use escrow_state::StateDb;
use tracing::info;

pub use query::WithdrawalQuery;
pub use velocity::VelocityVerdict;

/// Submit a withdrawal request: checks tiered limits, scores velocity risk,
/// and lands in `Pending` (clear), `Flagged` (needs approval), or
/// `Blocked` (risk score too high to proceed at all). Idempotent on
/// `idempotency_key` (`Withdrawal.idempotency_key` is unique): a
/// retry with the same key returns the original withdrawal unchanged.
pub async fn create_withdrawal(
    db: &StateDb,
    user_id: UserId,
    wallet_id: WalletId,
    bank_account_id: BankAccountId,
    idempotency_key: &str,
    amount_minor: MinorUnits,
    now: Timestamp,
) -> Result<Withdrawal, EscrowError> {
    if let Some(existing) = db.find_withdrawal_by_idempotency_key(idempotency_key)? {
        info!(withdrawal_id = %existing.id, %idempotency_key, "withdrawal already submitted, returning existing");
        return Ok(existing);
    }

    if amount_minor <= 0 {
        return Err(EscrowError::InvalidAmount(format!("amount must be positive, got {amount_minor}")));
    }

    let user = db
        .get_user(&user_id)?
        .ok_or_else(|| EscrowError::InvalidInput(format!("unknown user {user_id}")))?;
    if !user.is_active(now) {
        return Err(EscrowError::UserSuspended(user_id.to_string()));
    }

    let bank_account = db
        .get_bank_account(&bank_account_id)?
        .ok_or_else(|| EscrowError::BankAccountNotFound(bank_account_id.to_string()))?;
    if bank_account.user_id != user_id || !bank_account.is_usable() {
        return Err(EscrowError::BankAccountInvalid(bank_account_id.to_string()));
    }

    let limit = limits::limit_for_tier(db, user.kyc_tier)?;

    let since = now - chrono::Duration::hours(VELOCITY_LOOKBACK_HOURS);
    let recent = db.iter_velocity_log_for_user(&user_id, since)?;
    let last_withdrawal_at = recent.iter().map(|e| e.created_at).max();
    limits::check_cooling_period(&limit, user_id, last_withdrawal_at, now)?;

    let daily_total: MinorUnits = recent
        .iter()
        .filter(|e| (now - e.created_at).num_hours() < 24)
        .map(|e| e.amount_minor)
        .sum();

    // `recent` only spans `VELOCITY_LOOKBACK_HOURS` (24h) — too narrow for
    // the monthly cap, so it gets its own wider query rather than being
    // derived from the daily one.
    let monthly_since = now - chrono::Duration::days(MONTHLY_LOOKBACK_DAYS);
    let monthly_total: MinorUnits = db
        .iter_velocity_log_for_user(&user_id, monthly_since)?
        .iter()
        .map(|e| e.amount_minor)
        .sum();

    limits::check_limits(&limit, amount_minor, daily_total, monthly_total)?;

    let (risk_score, verdict) = velocity::score(&recent, amount_minor, limit.daily_limit_minor, now);
    if verdict == VelocityVerdict::Blocked {
        return Err(EscrowError::VelocityBlocked(user_id.to_string(), risk_score));
    }

    let needs_dual_approval = limits::requires_dual_approval(&limit, amount_minor);
    let status = if verdict == VelocityVerdict::Flagged || needs_dual_approval {
        WithdrawalStatus::Flagged
    } else {
        WithdrawalStatus::Pending
    };
    let required_approvals = if needs_dual_approval {
        escrow_core::constants::REQUIRED_DUAL_APPROVALS
    } else if verdict == VelocityVerdict::Flagged {
        1
    } else {
        0
    };

    // Lock the funds before persisting anything: `lock` itself rejects an
    // unfunded wallet, so if it fails here nothing about this withdrawal
    // exists yet — no row, no velocity entry, no dedup pointer for a retry
    // to pick up as a phantom success.
    escrow_wallet::lock(db, wallet_id, amount_minor, now).await?;

    let withdrawal = Withdrawal {
        id: WithdrawalId::new(),
        user_id,
        wallet_id,
        bank_account_id,
        idempotency_key: idempotency_key.to_string(),
        amount_minor,
        status,
        risk_score,
        required_approvals,
        approvals: Vec::new(),
        rejections: Vec::new(),
        created_at: now,
        decided_at: None,
    };
    db.put_withdrawal(&withdrawal)?;
    db.put_velocity_entry(&WithdrawalVelocityLog {
        id: EntryId::new(),
        user_id,
        withdrawal_id: withdrawal.id,
        amount_minor,
        risk_score,
        created_at: now,
    })?;

    info!(withdrawal_id = %withdrawal.id, %risk_score, ?status, "withdrawal submitted");
    Ok(withdrawal)
}

pub fn approve_withdrawal(db: &StateDb, id: WithdrawalId, admin_id: UserId, now: Timestamp) -> Result<Withdrawal, EscrowError> {
    let mut w = db.get_withdrawal(&id)?.ok_or_else(|| EscrowError::WithdrawalNotFound(id.to_string()))?;
    approval::approve(&mut w, admin_id, now)?;
    db.put_withdrawal(&w)?;
    Ok(w)
}

pub fn reject_withdrawal(db: &StateDb, id: WithdrawalId, admin_id: UserId, now: Timestamp) -> Result<Withdrawal, EscrowError> {
    let mut w = db.get_withdrawal(&id)?.ok_or_else(|| EscrowError::WithdrawalNotFound(id.to_string()))?;
    approval::reject(&mut w, admin_id, now)?;
    db.put_withdrawal(&w)?;

    // Funds that were locked on submission return to the user.
    Ok(w)
}

/// Release a rejected withdrawal's locked funds back to the user's
/// available balance. Split from `reject_withdrawal` so the caller can
/// choose to do it within the same request or let the scheduler sweep it.
pub async fn release_rejected_funds(db: &StateDb, withdrawal: &Withdrawal, now: Timestamp) -> Result<(), EscrowError> {
    if withdrawal.status != WithdrawalStatus::Rejected {
        return Err(EscrowError::InvalidStateTransition {
            from: format!("{:?}", withdrawal.status),
            to: "funds released".into(),
        });
    }
    escrow_wallet::unlock(db, withdrawal.wallet_id, withdrawal.amount_minor, now).await?;
    Ok(())
}

/// Settle an approved (or never-flagged) withdrawal: removes the funds from
/// the wallet's locked balance and books the ledger movement out to the
/// payment provider's float account.
pub async fn complete_withdrawal(
    db: &StateDb,
    id: WithdrawalId,
    wallet_account: LedgerAccountId,
    provider_float_account: LedgerAccountId,
    now: Timestamp,
) -> Result<Withdrawal, EscrowError> {
    let mut w = db.get_withdrawal(&id)?.ok_or_else(|| EscrowError::WithdrawalNotFound(id.to_string()))?;
    if !matches!(w.status, WithdrawalStatus::Pending | WithdrawalStatus::Approved) {
        return Err(EscrowError::InvalidStateTransition {
            from: format!("{:?}", w.status),
            to: "Completed".into(),
        });
    }

    escrow_wallet::release_locked(db, w.wallet_id, w.amount_minor, now).await?;
    escrow_ledger::record_withdrawal(
        db,
        wallet_account,
        provider_float_account,
        w.amount_minor,
        &format!("withdrawal:{id}"),
        now,
    )?;

    w.status = WithdrawalStatus::Completed;
    w.decided_at = Some(now);
    db.put_withdrawal(&w)?;
    info!(withdrawal_id = %id, "withdrawal completed");
    Ok(w)
}

#[cfg(test)]
mod tests {
    use super::*;
    use escrow_core::domain::{BankAccount, LedgerAccount, User, Wallet};
    use escrow_core::types::{KycTier, LedgerAccountId, LedgerAccountType};

    fn setup_user_and_wallet(
        db: &StateDb,
        tier: KycTier,
        available: MinorUnits,
    ) -> (UserId, WalletId, BankAccountId) {
        let user_id = UserId::new();
        db.put_user(&User {
            id: user_id,
            email: "user@example.com".into(),
            kyc_tier: tier,
            is_admin: false,
            suspended_until: None,
            deleted_at: None,
            created_at: chrono::Utc::now(),
        })
        .unwrap();
        db.put_transaction_limit(&limits::default_limit_for_tier(tier)).unwrap();

        let bank_account_id = BankAccountId::new();
        db.put_bank_account(&BankAccount {
            id: bank_account_id,
            user_id,
            bank_code: "BCA".into(),
            account_number: "1234567890".into(),
            is_active: true,
            deleted_at: None,
            created_at: chrono::Utc::now(),
        })
        .unwrap();

        let ledger_account_id = LedgerAccountId::new();
        db.put_ledger_account(&LedgerAccount {
            id: ledger_account_id,
            account_type: LedgerAccountType::UserWallet,
            owner_wallet_id: None,
            currency: "IDR".into(),
        })
        .unwrap();
        let wallet_id = WalletId::new();
        db.put_wallet(&Wallet {
            id: wallet_id,
            user_id,
            ledger_account_id,
            currency: "IDR".into(),
            available_minor: available,
            locked_minor: 0,
            version: 0,
            updated_at: chrono::Utc::now(),
            last_reconciled_at: None,
            reconciliation_hash: None,
        })
        .unwrap();
        (user_id, wallet_id, bank_account_id)
    }

    #[tokio::test]
    async fn small_withdrawal_lands_pending_and_locks_funds() {
        let db = StateDb::open_temporary().unwrap();
        let (user_id, wallet_id, bank_account_id) = setup_user_and_wallet(&db, KycTier::Verified, 100_000_00);
        let now = chrono::Utc::now();

        let w = create_withdrawal(&db, user_id, wallet_id, bank_account_id, "idem-1", 1_000_00, now)
            .await
            .unwrap();
        assert_eq!(w.status, WithdrawalStatus::Pending);

        let wallet = db.get_wallet(&wallet_id).unwrap().unwrap();
        assert_eq!(wallet.locked_minor, 1_000_00);
    }

    #[tokio::test]
    async fn retry_with_same_idempotency_key_returns_original_without_double_locking() {
        let db = StateDb::open_temporary().unwrap();
        let (user_id, wallet_id, bank_account_id) = setup_user_and_wallet(&db, KycTier::Verified, 100_000_00);
        let now = chrono::Utc::now();

        let first = create_withdrawal(&db, user_id, wallet_id, bank_account_id, "idem-retry", 1_000_00, now)
            .await
            .unwrap();
        let second = create_withdrawal(&db, user_id, wallet_id, bank_account_id, "idem-retry", 1_000_00, now)
            .await
            .unwrap();
        assert_eq!(first.id, second.id);

        let wallet = db.get_wallet(&wallet_id).unwrap().unwrap();
        assert_eq!(wallet.locked_minor, 1_000_00);
    }

    #[tokio::test]
    async fn large_withdrawal_requires_dual_approval() {
        let db = StateDb::open_temporary().unwrap();
        let (user_id, wallet_id, bank_account_id) = setup_user_and_wallet(&db, KycTier::Verified, 1_000_000_00);
        let now = chrono::Utc::now();

        let w = create_withdrawal(&db, user_id, wallet_id, bank_account_id, "idem-2", 20_000_00, now)
            .await
            .unwrap();
        assert_eq!(w.status, WithdrawalStatus::Flagged);
        assert_eq!(w.required_approvals, 2);
    }

    #[tokio::test]
    async fn second_withdrawal_inside_cooling_period_is_rejected() {
        let db = StateDb::open_temporary().unwrap();
        let (user_id, wallet_id, bank_account_id) = setup_user_and_wallet(&db, KycTier::Verified, 1_000_000_00);
        let first_at = chrono::Utc::now();

        create_withdrawal(&db, user_id, wallet_id, bank_account_id, "idem-3", 1_000_00, first_at)
            .await
            .unwrap();

        let ten_minutes_later = first_at + chrono::Duration::minutes(10);
        let err = create_withdrawal(&db, user_id, wallet_id, bank_account_id, "idem-4", 1_000_00, ten_minutes_later)
            .await
            .unwrap_err();
        assert!(matches!(err, EscrowError::WithdrawalCoolingPeriod(_, wait) if wait == 5));
    }

    #[tokio::test]
    async fn suspended_user_cannot_withdraw() {
        let db = StateDb::open_temporary().unwrap();
        let (user_id, wallet_id, bank_account_id) = setup_user_and_wallet(&db, KycTier::Verified, 1_000_000_00);
        let now = chrono::Utc::now();
        let mut user = db.get_user(&user_id).unwrap().unwrap();
        user.suspended_until = Some(now + chrono::Duration::hours(1));
        db.put_user(&user).unwrap();

        let err = create_withdrawal(&db, user_id, wallet_id, bank_account_id, "idem-5", 1_000_00, now)
            .await
            .unwrap_err();
        assert!(matches!(err, EscrowError::UserSuspended(_)));
    }

    #[tokio::test]
    async fn over_per_tx_limit_is_rejected() {
        let db = StateDb::open_temporary().unwrap();
        let (user_id, wallet_id, bank_account_id) = setup_user_and_wallet(&db, KycTier::None, 1_000_000_00);
        let now = chrono::Utc::now();

        let err = create_withdrawal(&db, user_id, wallet_id, bank_account_id, "idem-6", 1_000_000, now)
            .await
            .unwrap_err();
        assert!(matches!(err, EscrowError::PerTransactionLimitExceeded(_)));
    }

    #[tokio::test]
    async fn approved_withdrawal_completes_and_debits_ledger() {
        let db = StateDb::open_temporary().unwrap();
        let (user_id, wallet_id, bank_account_id) = setup_user_and_wallet(&db, KycTier::Verified, 1_000_000_00);
        let now = chrono::Utc::now();

        let wallet = db.get_wallet(&wallet_id).unwrap().unwrap();
        let provider_account = LedgerAccountId::new();
        db.put_ledger_account(&LedgerAccount {
            id: provider_account,
            account_type: LedgerAccountType::ProviderFloat,
            owner_wallet_id: None,
            currency: "IDR".into(),
        })
        .unwrap();

        let w = create_withdrawal(&db, user_id, wallet_id, bank_account_id, "idem-7", 1_000_00, now)
            .await
            .unwrap();
        let w = complete_withdrawal(&db, w.id, wallet.ledger_account_id, provider_account, now)
            .await
            .unwrap();
        assert_eq!(w.status, WithdrawalStatus::Completed);

        let wallet_after = db.get_wallet(&wallet_id).unwrap().unwrap();
        assert_eq!(wallet_after.locked_minor, 0);
        assert_eq!(escrow_ledger::get_account_balance(&db, &provider_account).unwrap(), 1_000_00);
    }

    #[tokio::test]
    async fn deactivated_bank_account_is_rejected() {
        let db = StateDb::open_temporary().unwrap();
        let (user_id, wallet_id, bank_account_id) = setup_user_and_wallet(&db, KycTier::Verified, 1_000_000_00);
        let now = chrono::Utc::now();
        let mut account = db.get_bank_account(&bank_account_id).unwrap().unwrap();
        account.is_active = false;
        db.put_bank_account(&account).unwrap();

        let err = create_withdrawal(&db, user_id, wallet_id, bank_account_id, "idem-8", 1_000_00, now)
            .await
            .unwrap_err();
        assert!(matches!(err, EscrowError::BankAccountInvalid(_)));
    }

    #[tokio::test]
    async fn unknown_bank_account_is_rejected() {
        let db = StateDb::open_temporary().unwrap();
        let (user_id, wallet_id, _) = setup_user_and_wallet(&db, KycTier::Verified, 1_000_000_00);
        let now = chrono::Utc::now();

        let err = create_withdrawal(&db, user_id, wallet_id, BankAccountId::new(), "idem-9", 1_000_00, now)
            .await
            .unwrap_err();
        assert!(matches!(err, EscrowError::BankAccountNotFound(_)));
    }
}
