//! Tiered transaction limits. The authoritative row for a tier lives
//! in the `transaction_limits` tree, seeded by genesis from the bootstrap
//! constants in `escrow_core::constants` — those constants are defaults,
//! never read directly by the withdrawal pipeline.

use escrow_core::constants::{
    DUAL_APPROVAL_THRESHOLD_MINOR, TIER_NONE_COOLING_MINUTES, TIER_NONE_DAILY_LIMIT_MINOR,
    TIER_NONE_MONTHLY_LIMIT_MINOR, TIER_NONE_PER_TX_LIMIT_MINOR, TIER_PENDING_COOLING_MINUTES,
    TIER_PENDING_DAILY_LIMIT_MINOR, TIER_PENDING_MONTHLY_LIMIT_MINOR, TIER_PENDING_PER_TX_LIMIT_MINOR,
    TIER_VERIFIED_COOLING_MINUTES, TIER_VERIFIED_DAILY_LIMIT_MINOR, TIER_VERIFIED_MONTHLY_LIMIT_MINOR,
    TIER_VERIFIED_PER_TX_LIMIT_MINOR,
};
use escrow_core::domain::TransactionLimit;
use escrow_core::error::EscrowError;
use escrow_core::types::{KycTier, Timestamp, UserId};
use escrow_state::StateDb;

/// The bootstrap default for a tier, used by genesis and as a fallback if a
/// tier row is somehow missing (logged loudly rather than silently assumed).
pub fn default_limit_for_tier(tier: KycTier) -> TransactionLimit {
    let (daily, monthly, per_tx, cooling_minutes) = match tier {
        KycTier::None => (
            TIER_NONE_DAILY_LIMIT_MINOR,
            TIER_NONE_MONTHLY_LIMIT_MINOR,
            TIER_NONE_PER_TX_LIMIT_MINOR,
            TIER_NONE_COOLING_MINUTES,
        ),
        KycTier::Pending => (
            TIER_PENDING_DAILY_LIMIT_MINOR,
            TIER_PENDING_MONTHLY_LIMIT_MINOR,
            TIER_PENDING_PER_TX_LIMIT_MINOR,
            TIER_PENDING_COOLING_MINUTES,
        ),
        KycTier::Verified => (
            TIER_VERIFIED_DAILY_LIMIT_MINOR,
            TIER_VERIFIED_MONTHLY_LIMIT_MINOR,
            TIER_VERIFIED_PER_TX_LIMIT_MINOR,
            TIER_VERIFIED_COOLING_MINUTES,
        ),
    };
    TransactionLimit {
        kyc_tier: tier,
        daily_limit_minor: daily,
        monthly_limit_minor: monthly,
        per_tx_limit_minor: per_tx,
        dual_approval_threshold_minor: DUAL_APPROVAL_THRESHOLD_MINOR,
        cooling_minutes,
    }
}

pub fn limit_for_tier(db: &StateDb, tier: KycTier) -> Result<TransactionLimit, EscrowError> {
    match db.get_transaction_limit(tier)? {
        Some(limit) => Ok(limit),
        None => Err(EscrowError::LimitTierNotConfigured(tier.to_string())),
    }
}

/// Check a proposed withdrawal amount against the per-transaction and
/// rolling daily/monthly caps for a tier. `daily_total`/`monthly_total` are
/// the sums of the user's already-completed withdrawals in each window,
/// excluding the amount under consideration.
pub fn check_limits(
    limit: &TransactionLimit,
    amount_minor: i64,
    daily_total_minor: i64,
    monthly_total_minor: i64,
) -> Result<(), EscrowError> {
    if amount_minor > limit.per_tx_limit_minor {
        return Err(EscrowError::PerTransactionLimitExceeded(format!(
            "{amount_minor} > {}",
            limit.per_tx_limit_minor
        )));
    }
    if daily_total_minor + amount_minor > limit.daily_limit_minor {
        return Err(EscrowError::DailyLimitExceeded(format!(
            "{} > {}",
            daily_total_minor + amount_minor,
            limit.daily_limit_minor
        )));
    }
    if monthly_total_minor + amount_minor > limit.monthly_limit_minor {
        return Err(EscrowError::MonthlyLimitExceeded(format!(
            "{} > {}",
            monthly_total_minor + amount_minor,
            limit.monthly_limit_minor
        )));
    }
    Ok(())
}

pub fn requires_dual_approval(limit: &TransactionLimit, amount_minor: i64) -> bool {
    amount_minor >= limit.dual_approval_threshold_minor
}

/// Reject if the user's most recent withdrawal landed inside the tier's
/// cooling period. `last_withdrawal_at` is `None` for a user's first
/// withdrawal, which is never subject to cooling.
pub fn check_cooling_period(
    limit: &TransactionLimit,
    user_id: UserId,
    last_withdrawal_at: Option<Timestamp>,
    now: Timestamp,
) -> Result<(), EscrowError> {
    let Some(last) = last_withdrawal_at else {
        return Ok(());
    };
    let elapsed_minutes = (now - last).num_minutes();
    if elapsed_minutes < limit.cooling_minutes {
        let wait_minutes = limit.cooling_minutes - elapsed_minutes;
        return Err(EscrowError::WithdrawalCoolingPeriod(user_id.to_string(), wait_minutes));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_tx_limit_rejects_oversized_withdrawal() {
        let limit = default_limit_for_tier(KycTier::None);
        let err = check_limits(&limit, limit.per_tx_limit_minor + 1, 0, 0).unwrap_err();
        assert!(matches!(err, EscrowError::PerTransactionLimitExceeded(_)));
    }

    #[test]
    fn daily_limit_accounts_for_prior_withdrawals() {
        let limit = default_limit_for_tier(KycTier::Verified);
        let err = check_limits(&limit, 1, limit.daily_limit_minor, 0).unwrap_err();
        assert!(matches!(err, EscrowError::DailyLimitExceeded(_)));
    }

    #[test]
    fn daily_limit_boundary_exact_remainder_succeeds_one_more_fails() {
        let limit = default_limit_for_tier(KycTier::Verified);
        let prior = limit.daily_limit_minor - 10_000;
        check_limits(&limit, 10_000, prior, 0).unwrap();
        let err = check_limits(&limit, 10_001, prior, 0).unwrap_err();
        assert!(matches!(err, EscrowError::DailyLimitExceeded(_)));
    }

    #[test]
    fn dual_approval_triggers_at_threshold() {
        let limit = default_limit_for_tier(KycTier::Verified);
        assert!(requires_dual_approval(&limit, limit.dual_approval_threshold_minor));
        assert!(!requires_dual_approval(&limit, limit.dual_approval_threshold_minor - 1));
    }

    #[test]
    fn cooling_period_rejects_one_second_before_expiry_and_allows_one_second_after() {
        let limit = default_limit_for_tier(KycTier::Verified);
        let last = chrono::Utc::now();
        let user_id = UserId::new();

        let expiry = last + chrono::Duration::minutes(limit.cooling_minutes);

        let before = expiry - chrono::Duration::seconds(1);
        let err = check_cooling_period(&limit, user_id, Some(last), before).unwrap_err();
        assert!(matches!(err, EscrowError::WithdrawalCoolingPeriod(_, _)));

        let after = expiry + chrono::Duration::seconds(1);
        check_cooling_period(&limit, user_id, Some(last), after).unwrap();
    }

    #[test]
    fn first_withdrawal_has_no_cooling_period() {
        let limit = default_limit_for_tier(KycTier::None);
        check_cooling_period(&limit, UserId::new(), None, chrono::Utc::now()).unwrap();
    }
}
