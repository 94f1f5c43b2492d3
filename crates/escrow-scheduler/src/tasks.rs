//! Individual scheduler sweeps. Each is a plain function over
//! `StateDb` so it can be invoked directly by the `run` loop, by an admin
//! "run now" RPC, or by a test without any tokio timer involved.

use escrow_core::error::EscrowError;
use escrow_core::types::{LedgerAccountId, MinorUnits, Timestamp, WalletId};
use escrow_state::StateDb;
use tracing::{info, warn};

/// Static configuration the sweeps need that isn't derivable from state
/// alone — the chart-of-accounts ids seeded by genesis.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    pub escrow_holding_account: LedgerAccountId,
    pub platform_fees_account: LedgerAccountId,
    /// Platform fee skimmed on auto-release, in basis points (1/100th of a
    /// percent). 0 disables the fee.
    pub escrow_fee_bps: u32,
}

fn fee_for(amount_minor: MinorUnits, bps: u32) -> MinorUnits {
    (amount_minor as i128 * bps as i128 / 10_000) as MinorUnits
}

/// Release every escrow hold whose order passed its auto-release deadline
/// without the buyer confirming or disputing.
pub async fn run_auto_release_sweep(db: &StateDb, config: &SchedulerConfig, now: Timestamp) -> Result<u64, EscrowError> {
    let due = db.iter_orders_due_for_auto_release(now)?;
    let mut released = 0u64;
    for order in due {
        let fee = fee_for(order.amount_minor, config.escrow_fee_bps);
        match escrow_escrow::auto_release_escrow(
            db,
            order.id,
            config.escrow_holding_account,
            config.platform_fees_account,
            fee,
            now,
        )
        .await
        {
            Ok(_) => {
                released += 1;
                info!(order_id = %order.id, "auto-released escrow on timeout");
            }
            Err(e) => warn!(order_id = %order.id, error = %e, "auto-release sweep failed for order"),
        }
    }
    Ok(released)
}

/// Cross-check every wallet's `available + locked` against its ledger
/// account balance. A mismatch is a critical integrity failure (`LEDGER_MISMATCH`)
/// and is logged as such, but one wallet's drift must not stop the sweep from
/// reaching the rest — each wallet reconciles independently.
pub async fn run_reconciliation_sweep(db: &StateDb) -> Result<Vec<WalletId>, EscrowError> {
    let wallets = db.iter_all_wallets()?;
    let mut mismatched = Vec::new();
    for wallet in wallets {
        if let Err(e) = escrow_wallet::reconcile(db, wallet.id).await {
            warn!(wallet_id = %wallet.id, error = %e, "wallet/ledger balance mismatch, critical");
            mismatched.push(wallet.id);
        }
    }
    Ok(mismatched)
}

/// Drop velocity log entries that have fallen out of every scoring window
/// keeping the tree bounded.
pub fn run_velocity_log_prune(db: &StateDb, now: Timestamp) -> Result<u64, EscrowError> {
    let cutoff = now - chrono::Duration::days(31);
    db.prune_velocity_log_before(cutoff)
}

/// Retry webhook events sitting in `Retrying` — `apply` is the caller's
/// business-effect closure keyed by provider and event id, same contract
/// `escrow_webhook::ingest` uses internally.
pub fn run_webhook_retry_sweep(
    db: &StateDb,
    apply: impl Fn(&str, &str, &serde_json::Value) -> Result<(), EscrowError>,
    now: Timestamp,
) -> Result<u64, EscrowError> {
    let pending = escrow_webhook::events_pending_retry(db)?;
    let mut retried = 0u64;
    for mut event in pending {
        let provider = event.provider.clone();
        let event_id = event.event_id.clone();
        let effect: Box<escrow_webhook::ApplyEffect> = Box::new(move |p| apply(&provider, &event_id, p));
        escrow_webhook::retry(db, &mut event, effect.as_ref(), now)?;
        retried += 1;
    }
    Ok(retried)
}
