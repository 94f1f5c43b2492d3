//! ─── Escrow Ledger Error Taxonomy ───────────────────────────────────────────
//!
//! One flat enum, grouped by domain, each mapped to an error `kind` and
//! HTTP status via `EscrowError::kind()` / `http_status()`.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EscrowError {
    // ── Validation ───────────────────────────────────────────────────────
    #[error("invalid amount: {0}")]
    InvalidAmount(String),
    #[error("unsupported currency: {0}")]
    UnsupportedCurrency(String),
    #[error("missing or malformed field: {0}")]
    InvalidInput(String),

    // ── Ledger (C1) ──────────────────────────────────────────────────────
    #[error("journal {0} does not balance: debits != credits")]
    JournalImbalance(String),
    #[error("ledger account not found: {0}")]
    LedgerAccountNotFound(String),
    #[error("ledger invariant violated: {0}")]
    LedgerInvariantViolation(String),

    // ── Wallet (C2) ──────────────────────────────────────────────────────
    #[error("wallet not found: {0}")]
    WalletNotFound(String),
    #[error("insufficient available balance in wallet {0}")]
    InsufficientBalance(String),
    #[error("insufficient locked balance in wallet {0}")]
    InsufficientLockedBalance(String),
    #[error("wallet {0} modified concurrently, retries exhausted")]
    ConcurrentModification(String),
    #[error("wallet {0} balance does not match its ledger account: {1}")]
    LedgerMismatch(String, String),

    // ── Escrow & Order (C3) ──────────────────────────────────────────────
    #[error("order not found: {0}")]
    OrderNotFound(String),
    #[error("escrow hold not found: {0}")]
    EscrowNotFound(String),
    #[error("invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },
    #[error("actor {actor} is not authorized to perform {action} on {resource}")]
    NotAuthorized {
        actor: String,
        action: String,
        resource: String,
    },
    #[error("dispute not found: {0}")]
    DisputeNotFound(String),

    // ── Withdrawal (C4) ──────────────────────────────────────────────────
    #[error("withdrawal not found: {0}")]
    WithdrawalNotFound(String),
    #[error("withdrawal {0} exceeds the configured per-transaction limit")]
    PerTransactionLimitExceeded(String),
    #[error("withdrawal {0} exceeds the configured daily limit")]
    DailyLimitExceeded(String),
    #[error("withdrawal {0} exceeds the configured monthly limit")]
    MonthlyLimitExceeded(String),
    #[error("withdrawal {0} blocked by velocity scoring (score {1})")]
    VelocityBlocked(String, u32),
    #[error("withdrawal {0} already has a pending decision from actor {1}")]
    DuplicateApproval(String, String),
    #[error("withdrawal {0} requires {1} approvals, has {2}")]
    InsufficientApprovals(String, u32, u32),
    #[error("transaction limit tier not configured: {0}")]
    LimitTierNotConfigured(String),
    #[error("withdrawal for user {0} is in its cooling period, wait {1} more minute(s)")]
    WithdrawalCoolingPeriod(String, i64),
    #[error("user {0} is suspended")]
    UserSuspended(String),
    #[error("bank account not found: {0}")]
    BankAccountNotFound(String),
    #[error("bank account {0} is not usable for a withdrawal")]
    BankAccountInvalid(String),

    // ── Webhook (C5) ──────────────────────────────────────────────────────
    #[error("unknown webhook provider: {0}")]
    UnknownProvider(String),
    #[error("webhook signature verification failed for provider {0}")]
    InvalidSignature(String),
    #[error("webhook event {0} already processed")]
    DuplicateWebhookEvent(String),

    // ── Idempotency (C6) ──────────────────────────────────────────────────
    #[error("request with fingerprint {0} is already being processed")]
    IdempotentRequestInFlight(String),
    #[error("idempotency record {0} not found")]
    IdempotencyRecordNotFound(String),
    #[error("idempotency key {0} was reused with a different request body")]
    IdempotencyKeyReused(String),

    // ── Scheduler (C7) ──────────────────────────────────────────────────
    #[error("could not acquire scheduler lock for task {0}")]
    SchedulerLockHeld(String),

    // ── Storage / serialization ───────────────────────────────────────────
    #[error("storage error: {0}")]
    Storage(String),
    #[error("serialization error: {0}")]
    Serialization(String),

    // ── Configuration ─────────────────────────────────────────────────────
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("{0}")]
    Other(String),
}

/// Coarse-grained error family, used for HTTP status mapping and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Authorization,
    NotFound,
    Conflict,
    Limit,
    Integrity,
    Internal,
}

impl EscrowError {
    pub fn kind(&self) -> ErrorKind {
        use EscrowError::*;
        match self {
            InvalidAmount(_)
            | UnsupportedCurrency(_)
            | InvalidInput(_)
            | IdempotencyKeyReused(_)
            | InvalidStateTransition { .. } => ErrorKind::Validation,
            NotAuthorized { .. } => ErrorKind::Authorization,
            WalletNotFound(_)
            | OrderNotFound(_)
            | EscrowNotFound(_)
            | DisputeNotFound(_)
            | WithdrawalNotFound(_)
            | LedgerAccountNotFound(_)
            | BankAccountNotFound(_)
            | IdempotencyRecordNotFound(_) => ErrorKind::NotFound,
            ConcurrentModification(_)
            | DuplicateApproval(_, _)
            | DuplicateWebhookEvent(_)
            | IdempotentRequestInFlight(_)
            | SchedulerLockHeld(_) => ErrorKind::Conflict,
            InsufficientBalance(_)
            | InsufficientLockedBalance(_)
            | PerTransactionLimitExceeded(_)
            | DailyLimitExceeded(_)
            | MonthlyLimitExceeded(_)
            | VelocityBlocked(_, _)
            | InsufficientApprovals(_, _, _)
            | LimitTierNotConfigured(_)
            | WithdrawalCoolingPeriod(_, _) => ErrorKind::Limit,
            JournalImbalance(_) | LedgerInvariantViolation(_) | LedgerMismatch(_, _) => ErrorKind::Integrity,
            UnknownProvider(_) | InvalidSignature(_) | BankAccountInvalid(_) => ErrorKind::Validation,
            UserSuspended(_) => ErrorKind::Authorization,
            Storage(_) | Serialization(_) | Configuration(_) | Other(_) => ErrorKind::Internal,
        }
    }

    pub fn http_status(&self) -> u16 {
        match self.kind() {
            ErrorKind::Validation => 400,
            ErrorKind::Authorization => 403,
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::Limit => 400,
            ErrorKind::Integrity => 500,
            ErrorKind::Internal => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Locks the error taxonomy's kind/HTTP-status pairing down to a
    // handful of representative variants per row.
    #[test]
    fn taxonomy_matches_the_kind_http_status_table() {
        assert_eq!(InvalidAmount("x".into()).http_status(), 400);
        assert_eq!(InvalidStateTransition { from: "a".into(), to: "b".into() }.http_status(), 400);

        assert_eq!(
            NotAuthorized { actor: "a".into(), action: "b".into(), resource: "c".into() }.http_status(),
            403
        );

        assert_eq!(WalletNotFound("w".into()).http_status(), 404);

        assert_eq!(ConcurrentModification("w".into()).http_status(), 409);
        assert_eq!(IdempotentRequestInFlight("fp".into()).http_status(), 409);

        assert_eq!(InsufficientBalance("w".into()).http_status(), 400);
        assert_eq!(WithdrawalCoolingPeriod("u".into(), 5).http_status(), 400);
        assert_eq!(DailyLimitExceeded("w".into()).http_status(), 400);

        assert_eq!(LedgerInvariantViolation("x".into()).http_status(), 500);
        assert_eq!(LedgerMismatch("w".into(), "x".into()).http_status(), 500);
    }
}
