//! Velocity risk scoring. Pure, side-effect-free scoring function —
//! the caller is responsible for fetching the user's recent withdrawal
//! history and feeding it in, and for persisting the resulting log entry.

use escrow_core::constants::{
    VELOCITY_BLOCK_THRESHOLD, VELOCITY_FLAG_THRESHOLD, VELOCITY_POINTS_LARGE_AMOUNT,
    VELOCITY_POINTS_PER_WITHDRAWAL, VELOCITY_POINTS_RAPID_SUCCESSION,
};
use escrow_core::domain::WithdrawalVelocityLog;
use escrow_core::types::{MinorUnits, Timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VelocityVerdict {
    Clear,
    Flagged,
    Blocked,
}

/// Score a proposed withdrawal against the user's recent velocity log.
/// `recent` must already be filtered to the scoring lookback window.
pub fn score(recent: &[WithdrawalVelocityLog], amount_minor: MinorUnits, daily_limit_minor: MinorUnits, now: Timestamp) -> (u32, VelocityVerdict) {
    let mut score = recent.len() as u32 * VELOCITY_POINTS_PER_WITHDRAWAL;

    if amount_minor * 2 > daily_limit_minor {
        score += VELOCITY_POINTS_LARGE_AMOUNT;
    }

    let rapid = recent
        .iter()
        .filter(|e| (now - e.created_at).num_minutes() <= 60)
        .count();
    if rapid >= 3 {
        score += VELOCITY_POINTS_RAPID_SUCCESSION;
    }

    let verdict = if score >= VELOCITY_BLOCK_THRESHOLD {
        VelocityVerdict::Blocked
    } else if score >= VELOCITY_FLAG_THRESHOLD {
        VelocityVerdict::Flagged
    } else {
        VelocityVerdict::Clear
    };
    (score, verdict)
}

#[cfg(test)]
mod tests {
    use super::*;
    use escrow_core::types::{EntryId, UserId, WithdrawalId};

    fn log_entry(minutes_ago: i64, now: Timestamp) -> WithdrawalVelocityLog {
        WithdrawalVelocityLog {
            id: EntryId::new(),
            user_id: UserId::new(),
            withdrawal_id: WithdrawalId::new(),
            amount_minor: 1_000,
            risk_score: 0,
            created_at: now - chrono::Duration::minutes(minutes_ago),
        }
    }

    #[test]
    fn clean_history_scores_clear() {
        let now = chrono::Utc::now();
        let (s, v) = score(&[], 1_000, 100_000, now);
        assert_eq!(s, 0);
        assert_eq!(v, VelocityVerdict::Clear);
    }

    #[test]
    fn rapid_succession_adds_points_and_flags() {
        let now = chrono::Utc::now();
        let recent: Vec<_> = (0..3).map(|m| log_entry(m * 5, now)).collect();
        let (s, v) = score(&recent, 1_000, 100_000, now);
        assert!(s >= VELOCITY_FLAG_THRESHOLD);
        assert_eq!(v, VelocityVerdict::Flagged);
    }

    #[test]
    fn large_amount_relative_to_daily_limit_adds_points() {
        let now = chrono::Utc::now();
        let (s, _) = score(&[], 60_000, 100_000, now);
        assert!(s >= VELOCITY_POINTS_LARGE_AMOUNT);
    }
}
