//! ─── Escrow Ledger Constants ─────────────────────────────────────────────────

// ── Retry / backoff (wallet optimistic concurrency) ──────────────────────────

/// Maximum CAS retries on a wallet version conflict before giving up.
pub const WALLET_CAS_MAX_RETRIES: u32 = 3;

/// Base backoff before the first retry (doubles each attempt: 100/200/400ms).
pub const WALLET_CAS_BACKOFF_BASE_MS: u64 = 100;

// ── Withdrawal tiers — bootstrap defaults, authoritative row lives
// in the `transaction_limits` tree once genesis has seeded it. ───────────────

/// Minor units per unit currency (assumes a 2-decimal currency, e.g. cents).
pub const MINOR_UNITS_PER_UNIT: i64 = 100;

pub const TIER_NONE_DAILY_LIMIT_MINOR: i64 = 500_00;
pub const TIER_NONE_MONTHLY_LIMIT_MINOR: i64 = 2_000_00;
pub const TIER_NONE_PER_TX_LIMIT_MINOR: i64 = 500_00;
pub const TIER_NONE_COOLING_MINUTES: i64 = 60;

pub const TIER_PENDING_DAILY_LIMIT_MINOR: i64 = 5_000_00;
pub const TIER_PENDING_MONTHLY_LIMIT_MINOR: i64 = 25_000_00;
pub const TIER_PENDING_PER_TX_LIMIT_MINOR: i64 = 5_000_00;
pub const TIER_PENDING_COOLING_MINUTES: i64 = 30;

pub const TIER_VERIFIED_DAILY_LIMIT_MINOR: i64 = 50_000_00;
pub const TIER_VERIFIED_MONTHLY_LIMIT_MINOR: i64 = 500_000_00;
pub const TIER_VERIFIED_PER_TX_LIMIT_MINOR: i64 = 50_000_00;
pub const TIER_VERIFIED_COOLING_MINUTES: i64 = 15;

/// Withdrawals at or above this amount require dual admin approval,
/// regardless of tier.
pub const DUAL_APPROVAL_THRESHOLD_MINOR: i64 = 10_000_00;

/// Number of distinct admin approvals required once dual approval applies.
pub const REQUIRED_DUAL_APPROVALS: u32 = 2;

// ── Velocity scoring ──────────────────────────────────────────────────────────

/// Risk points added per withdrawal within the lookback window.
pub const VELOCITY_POINTS_PER_WITHDRAWAL: u32 = 5;

/// Additional risk points when a withdrawal's amount exceeds half the
/// account's daily limit.
pub const VELOCITY_POINTS_LARGE_AMOUNT: u32 = 15;

/// Additional risk points when 3+ withdrawals have landed in the last hour.
pub const VELOCITY_POINTS_RAPID_SUCCESSION: u32 = 20;

/// Score at/above which a withdrawal is flagged for manual review but not blocked.
pub const VELOCITY_FLAG_THRESHOLD: u32 = 40;

/// Score at/above which a withdrawal is blocked outright.
pub const VELOCITY_BLOCK_THRESHOLD: u32 = 70;

/// Lookback window for velocity scoring.
pub const VELOCITY_LOOKBACK_HOURS: i64 = 24;

/// Rolling window a user's monthly withdrawal total is computed over,
/// checked against `TransactionLimit.monthly_limit_minor` on every new
/// withdrawal — distinct from `VELOCITY_LOOKBACK_HOURS`, which only
/// covers the same-day scoring window.
pub const MONTHLY_LOOKBACK_DAYS: i64 = 30;

/// Cooling period enforced after a withdrawal is flagged (hours) before the
/// same user may submit another.
pub const VELOCITY_COOLING_PERIOD_HOURS: i64 = 1;

// ── Webhook processing ────────────────────────────────────────────────────────

/// Maximum internal retry attempts for a webhook event before it is marked Failed.
pub const WEBHOOK_MAX_RETRIES: u32 = 5;

/// Base backoff for webhook retry (doubles each attempt).
pub const WEBHOOK_RETRY_BACKOFF_BASE_SECS: i64 = 2;

/// Replay-protection window for the optional `x-timestamp` header: a
/// delivery whose timestamp falls outside this window on either side is
/// treated the same as a bad signature.
pub const WEBHOOK_REPLAY_WINDOW_SECS: i64 = 300;

// ── Idempotency cache ─────────────────────────────────────────────────────────

/// TTL for a cached idempotency record.
pub const IDEMPOTENCY_TTL_HOURS: i64 = 24;

/// A "processing" record older than this is considered stale (the original
/// request likely crashed) and may be retried rather than rejected.
pub const IDEMPOTENCY_PROCESSING_STALE_SECS: i64 = 30;

// ── Escrow & order ────────────────────────────────────────────────────────────

/// An order paid into escrow is auto-released to the seller if the buyer
/// does not confirm receipt or dispute within this many hours.
pub const ESCROW_AUTO_RELEASE_HOURS: i64 = 72;

// ── Scheduler (C7) cadences ───────────────────────────────────────────────────

pub const SCHEDULER_AUTO_RELEASE_INTERVAL_SECS: u64 = 60;
pub const SCHEDULER_DAILY_RESET_INTERVAL_SECS: u64 = 3600;
pub const SCHEDULER_MONTHLY_RESET_INTERVAL_SECS: u64 = 3600 * 6;
pub const SCHEDULER_RECONCILIATION_INTERVAL_SECS: u64 = 3600 * 6;
pub const SCHEDULER_WEBHOOK_RETRY_INTERVAL_SECS: u64 = 60 * 15;

/// How long a named scheduler lock is held before it is considered stale
/// and may be reclaimed by another runner.
pub const SCHEDULER_LOCK_TTL_SECS: i64 = 300;
