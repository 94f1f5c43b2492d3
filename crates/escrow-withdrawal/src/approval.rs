//! Dual admin approval for withdrawals over the configured threshold.
//! Modeled on the verifier-quorum pattern: a withdrawal collects
//! distinct admin votes until it reaches `required_approvals`, any single
//! rejection kills it.

use escrow_core::domain::{Withdrawal, WithdrawalStatus};
use escrow_core::error::EscrowError;
use escrow_core::types::{Timestamp, UserId};

pub fn approve(withdrawal: &mut Withdrawal, admin_id: UserId, now: Timestamp) -> Result<(), EscrowError> {
    require_decidable(withdrawal)?;
    if withdrawal.approvals.contains(&admin_id) {
        return Err(EscrowError::DuplicateApproval(withdrawal.id.to_string(), admin_id.to_string()));
    }
    withdrawal.approvals.push(admin_id);
    if withdrawal.approvals.len() as u32 >= withdrawal.required_approvals {
        withdrawal.status = WithdrawalStatus::Approved;
        withdrawal.decided_at = Some(now);
    }
    Ok(())
}

pub fn reject(withdrawal: &mut Withdrawal, admin_id: UserId, now: Timestamp) -> Result<(), EscrowError> {
    require_decidable(withdrawal)?;
    if withdrawal.rejections.contains(&admin_id) {
        return Err(EscrowError::DuplicateApproval(withdrawal.id.to_string(), admin_id.to_string()));
    }
    withdrawal.rejections.push(admin_id);
    withdrawal.status = WithdrawalStatus::Rejected;
    withdrawal.decided_at = Some(now);
    Ok(())
}

fn require_decidable(withdrawal: &Withdrawal) -> Result<(), EscrowError> {
    match withdrawal.status {
        WithdrawalStatus::Pending | WithdrawalStatus::Flagged => Ok(()),
        other => Err(EscrowError::InvalidStateTransition {
            from: format!("{other:?}"),
            to: "Approved/Rejected".into(),
        }),
    }
}

/// How many more distinct approvals a withdrawal needs before it clears.
pub fn approvals_remaining(withdrawal: &Withdrawal) -> u32 {
    withdrawal
        .required_approvals
        .saturating_sub(withdrawal.approvals.len() as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use escrow_core::types::{BankAccountId, MinorUnits, WalletId, WithdrawalId};

    fn pending_withdrawal(required: u32) -> Withdrawal {
        Withdrawal {
            id: WithdrawalId::new(),
            user_id: UserId::new(),
            wallet_id: WalletId::new(),
            bank_account_id: BankAccountId::new(),
            idempotency_key: "idem-test".to_string(),
            amount_minor: 20_000_00 as MinorUnits,
            status: WithdrawalStatus::Flagged,
            risk_score: 10,
            required_approvals: required,
            approvals: vec![],
            rejections: vec![],
            created_at: chrono::Utc::now(),
            decided_at: None,
        }
    }

    #[test]
    fn two_distinct_approvals_clears_withdrawal() {
        let mut w = pending_withdrawal(2);
        let now = chrono::Utc::now();
        approve(&mut w, UserId::new(), now).unwrap();
        assert_eq!(w.status, WithdrawalStatus::Flagged);
        approve(&mut w, UserId::new(), now).unwrap();
        assert_eq!(w.status, WithdrawalStatus::Approved);
    }

    #[test]
    fn same_admin_cannot_approve_twice() {
        let mut w = pending_withdrawal(2);
        let admin = UserId::new();
        approve(&mut w, admin, chrono::Utc::now()).unwrap();
        let err = approve(&mut w, admin, chrono::Utc::now()).unwrap_err();
        assert!(matches!(err, EscrowError::DuplicateApproval(_, _)));
    }

    #[test]
    fn single_rejection_kills_withdrawal() {
        let mut w = pending_withdrawal(2);
        reject(&mut w, UserId::new(), chrono::Utc::now()).unwrap();
        assert_eq!(w.status, WithdrawalStatus::Rejected);
    }
}
