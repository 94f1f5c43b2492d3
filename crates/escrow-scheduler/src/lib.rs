//! C7 — scheduler. Drives the periodic sweeps each named task in
//! `tasks.rs` implements, one `tokio::time::interval` per cadence, guarded
//! by an advisory lock in `StateDb` so only one node in a multi-instance
//! deployment runs a given sweep at a time.
//!
//! Build a [`Scheduler`] and `tokio::spawn(scheduler.run())` it alongside
//! the RPC server; each tick is independent so a slow or failing sweep
//! never blocks the others.

pub mod tasks;

pub use tasks::SchedulerConfig;

use escrow_core::constants::{
    SCHEDULER_AUTO_RELEASE_INTERVAL_SECS, SCHEDULER_DAILY_RESET_INTERVAL_SECS,
    SCHEDULER_LOCK_TTL_SECS, SCHEDULER_MONTHLY_RESET_INTERVAL_SECS,
    SCHEDULER_RECONCILIATION_INTERVAL_SECS, SCHEDULER_WEBHOOK_RETRY_INTERVAL_SECS,
};
use escrow_core::error::EscrowError;
use escrow_state::StateDb;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

const TASK_AUTO_RELEASE: &str = "auto_release";
const TASK_RECONCILIATION: &str = "reconciliation";
const TASK_VELOCITY_PRUNE: &str = "velocity_prune";
const TASK_WEBHOOK_RETRY: &str = "webhook_retry";

/// Runs one named sweep under its advisory lock, releasing it whether the
/// sweep succeeds or fails. A lock held by another node (or still within
/// its TTL after a crash) means `try_acquire_task_lock` returns `false`
/// and this tick is simply skipped.
async fn with_task_lock<F, Fut>(db: &StateDb, task: &str, holder: &str, f: F)
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<u64, EscrowError>>,
{
    let now = chrono::Utc::now();
    match db.try_acquire_task_lock(task, holder, now, SCHEDULER_LOCK_TTL_SECS) {
        Ok(false) => return,
        Err(e) => {
            error!(task, error = %e, "failed to acquire scheduler lock");
            return;
        }
        Ok(true) => {}
    }

    match f().await {
        Ok(n) => info!(task, count = n, "scheduler sweep completed"),
        Err(e) => error!(task, error = %e, "scheduler sweep failed"),
    }

    if let Err(e) = db.release_task_lock(task) {
        error!(task, error = %e, "failed to release scheduler lock");
    }
}

/// Business-effect hook for retried webhooks — the node wires this to
/// whatever ingestion does with a confirmed payment notification.
pub type WebhookApply = dyn Fn(&str, &str, &serde_json::Value) -> Result<(), EscrowError> + Send + Sync;

pub struct Scheduler {
    db: Arc<StateDb>,
    config: SchedulerConfig,
    holder: String,
    webhook_apply: Arc<WebhookApply>,
}

impl Scheduler {
    pub fn new(db: Arc<StateDb>, config: SchedulerConfig, holder: impl Into<String>, webhook_apply: Arc<WebhookApply>) -> Self {
        Self {
            db,
            config,
            holder: holder.into(),
            webhook_apply,
        }
    }

    /// Drive every sweep on its own interval. Runs until cancelled — pass
    /// this to `tokio::spawn` and hold the `JoinHandle`, or race it against
    /// a shutdown signal with `tokio::select!` at the call site.
    pub async fn run(self) {
        let mut auto_release = tokio::time::interval(Duration::from_secs(SCHEDULER_AUTO_RELEASE_INTERVAL_SECS as u64));
        let mut reconciliation = tokio::time::interval(Duration::from_secs(SCHEDULER_RECONCILIATION_INTERVAL_SECS as u64));
        let mut velocity_prune = tokio::time::interval(Duration::from_secs(
            SCHEDULER_DAILY_RESET_INTERVAL_SECS.max(SCHEDULER_MONTHLY_RESET_INTERVAL_SECS) as u64,
        ));
        let mut webhook_retry = tokio::time::interval(Duration::from_secs(SCHEDULER_WEBHOOK_RETRY_INTERVAL_SECS as u64));

        loop {
            tokio::select! {
                _ = auto_release.tick() => {
                    let db = self.db.clone();
                    let config = self.config;
                    with_task_lock(&db, TASK_AUTO_RELEASE, &self.holder, || async move {
                        tasks::run_auto_release_sweep(&db, &config, chrono::Utc::now()).await
                    }).await;
                }

                _ = reconciliation.tick() => {
                    let db = self.db.clone();
                    with_task_lock(&db, TASK_RECONCILIATION, &self.holder, || async move {
                        let mismatched = tasks::run_reconciliation_sweep(&db).await?;
                        Ok(mismatched.len() as u64)
                    }).await;
                }

                _ = velocity_prune.tick() => {
                    let db = self.db.clone();
                    with_task_lock(&db, TASK_VELOCITY_PRUNE, &self.holder, || async move {
                        tasks::run_velocity_log_prune(&db, chrono::Utc::now())
                    }).await;
                }

                _ = webhook_retry.tick() => {
                    let db = self.db.clone();
                    let apply = self.webhook_apply.clone();
                    with_task_lock(&db, TASK_WEBHOOK_RETRY, &self.holder, || async move {
                        tasks::run_webhook_retry_sweep(&db, |provider, event_id, payload| apply(provider, event_id, payload), chrono::Utc::now())
                    }).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use escrow_core::types::LedgerAccountId;

    #[tokio::test]
    async fn sweeps_run_once_under_lock_then_release_it() {
        let db = Arc::new(StateDb::open_temporary().unwrap());
        let now = chrono::Utc::now();

        let config = SchedulerConfig {
            escrow_holding_account: LedgerAccountId::new(),
            platform_fees_account: LedgerAccountId::new(),
            escrow_fee_bps: 0,
        };

        with_task_lock(&db, TASK_RECONCILIATION, "node-a", || async {
            tasks::run_reconciliation_sweep(&db).await.map(|v| v.len() as u64)
        })
        .await;

        // Lock released after the sweep, so a second node can take it on the next tick.
        assert!(db
            .try_acquire_task_lock(TASK_RECONCILIATION, "node-b", now, SCHEDULER_LOCK_TTL_SECS)
            .unwrap());
        db.release_task_lock(TASK_RECONCILIATION).unwrap();

        let _ = config.escrow_fee_bps;
    }

    #[tokio::test]
    async fn held_lock_skips_the_tick() {
        let db = Arc::new(StateDb::open_temporary().unwrap());
        let now = chrono::Utc::now();

        assert!(db
            .try_acquire_task_lock(TASK_VELOCITY_PRUNE, "node-a", now, SCHEDULER_LOCK_TTL_SECS)
            .unwrap());
        // Still held by node-a, so node-b cannot acquire it.
        assert!(!db
            .try_acquire_task_lock(TASK_VELOCITY_PRUNE, "node-b", now, SCHEDULER_LOCK_TTL_SECS)
            .unwrap());
    }
}
