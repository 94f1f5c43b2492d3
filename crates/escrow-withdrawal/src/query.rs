//! Read-only query helpers over withdrawal state.

use escrow_core::domain::WithdrawalStatus;
use escrow_core::error::EscrowError;
use escrow_core::types::WithdrawalId;
use escrow_state::StateDb;

use crate::approval::approvals_remaining;

pub struct WithdrawalQuery<'a> {
    db: &'a StateDb,
}

impl<'a> WithdrawalQuery<'a> {
    pub fn new(db: &'a StateDb) -> Self {
        Self { db }
    }

    /// Human-readable status line, e.g. for an admin review queue.
    pub fn describe(&self, id: &WithdrawalId) -> Result<String, EscrowError> {
        let w = self
            .db
            .get_withdrawal(id)?
            .ok_or_else(|| EscrowError::WithdrawalNotFound(id.to_string()))?;

        match w.status {
            WithdrawalStatus::Pending => Ok(format!("Withdrawal {id} — pending review")),
            WithdrawalStatus::Flagged => Ok(format!(
                "Withdrawal {id} — flagged (risk {}), {} approval(s) remaining",
                w.risk_score,
                approvals_remaining(&w)
            )),
            WithdrawalStatus::Blocked => Ok(format!("Withdrawal {id} — blocked by velocity scoring (risk {})", w.risk_score)),
            WithdrawalStatus::Approved => Ok(format!("Withdrawal {id} — approved, awaiting settlement")),
            WithdrawalStatus::Rejected => Ok(format!("Withdrawal {id} — rejected")),
            WithdrawalStatus::Completed => Ok(format!("Withdrawal {id} — completed")),
        }
    }
}
