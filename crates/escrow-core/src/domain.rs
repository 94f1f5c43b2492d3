//! Domain entities persisted by `escrow-state` and mutated by the engine
//! crates (`escrow-ledger`, `escrow-wallet`, `escrow-escrow`,
//! `escrow-withdrawal`, `escrow-webhook`).

use serde::{Deserialize, Serialize};

use crate::types::{
    BankAccountId, DisputeId, EntryDirection, EscrowId, IdempotencyRecordId, JournalId, KycTier,
    LedgerAccountId, LedgerAccountType, MinorUnits, OrderId, Timestamp, UserId, WalletId,
    WebhookEventId, WithdrawalId,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub kyc_tier: KycTier,
    pub is_admin: bool,
    pub suspended_until: Option<Timestamp>,
    pub deleted_at: Option<Timestamp>,
    pub created_at: Timestamp,
}

impl User {
    /// A user is active if they have not been soft-deleted and any
    /// suspension window has elapsed.
    pub fn is_active(&self, now: Timestamp) -> bool {
        if self.deleted_at.is_some() {
            return false;
        }
        match self.suspended_until {
            Some(until) => now >= until,
            None => true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BankAccount {
    pub id: BankAccountId,
    pub user_id: UserId,
    pub bank_code: String,
    pub account_number: String,
    pub is_active: bool,
    pub deleted_at: Option<Timestamp>,
    pub created_at: Timestamp,
}

impl BankAccount {
    /// A bank account can receive a disbursement if it hasn't been
    /// soft-deleted and hasn't been deactivated by the user or an admin.
    pub fn is_usable(&self) -> bool {
        self.is_active && self.deleted_at.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wallet {
    pub id: WalletId,
    pub user_id: UserId,
    pub ledger_account_id: LedgerAccountId,
    pub currency: String,
    pub available_minor: MinorUnits,
    pub locked_minor: MinorUnits,
    /// Optimistic-concurrency fencing token. Every mutating write must
    /// read this, compute the new row, and CAS on the unchanged value.
    pub version: u64,
    pub updated_at: Timestamp,
    pub last_reconciled_at: Option<Timestamp>,
    pub reconciliation_hash: Option<String>,
}

impl Wallet {
    pub fn total_minor(&self) -> MinorUnits {
        self.available_minor + self.locked_minor
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerAccount {
    pub id: LedgerAccountId,
    pub account_type: LedgerAccountType,
    pub owner_wallet_id: Option<WalletId>,
    pub currency: String,
}

/// A balanced group of `LedgerEntry` rows written atomically. Immutable
/// once created — corrections are new journals, never edits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerJournal {
    pub id: JournalId,
    pub idempotency_key: String,
    pub description: String,
    pub created_at: Timestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: crate::types::EntryId,
    pub journal_id: JournalId,
    pub account_id: LedgerAccountId,
    pub direction: EntryDirection,
    /// Always >= 0; direction carries the sign semantics.
    pub amount_minor: MinorUnits,
    /// The account's running balance immediately after this entry.
    pub running_balance_minor: MinorUnits,
    /// Monotonic per-account sequence number (continuation key).
    pub sequence: u64,
    pub created_at: Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Created,
    Accepted,
    Paid,
    Released,
    Refunded,
    Disputed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub buyer_id: UserId,
    pub seller_id: UserId,
    pub amount_minor: MinorUnits,
    pub currency: String,
    pub status: OrderStatus,
    pub auto_release_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EscrowStatus {
    Held,
    Released,
    Refunded,
    Disputed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscrowHold {
    pub id: EscrowId,
    pub order_id: OrderId,
    pub buyer_wallet_id: WalletId,
    pub seller_wallet_id: WalletId,
    pub amount_minor: MinorUnits,
    pub status: EscrowStatus,
    pub created_at: Timestamp,
    pub released_at: Option<Timestamp>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WithdrawalStatus {
    Pending,
    Flagged,
    Blocked,
    Approved,
    Rejected,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Withdrawal {
    pub id: WithdrawalId,
    pub user_id: UserId,
    pub wallet_id: WalletId,
    pub bank_account_id: BankAccountId,
    pub idempotency_key: String,
    pub amount_minor: MinorUnits,
    pub status: WithdrawalStatus,
    pub risk_score: u32,
    pub required_approvals: u32,
    pub approvals: Vec<UserId>,
    pub rejections: Vec<UserId>,
    pub created_at: Timestamp,
    pub decided_at: Option<Timestamp>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionLimit {
    pub kyc_tier: KycTier,
    pub daily_limit_minor: MinorUnits,
    pub monthly_limit_minor: MinorUnits,
    pub per_tx_limit_minor: MinorUnits,
    pub dual_approval_threshold_minor: MinorUnits,
    pub cooling_minutes: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawalVelocityLog {
    pub id: crate::types::EntryId,
    pub user_id: UserId,
    pub withdrawal_id: WithdrawalId,
    pub amount_minor: MinorUnits,
    pub risk_score: u32,
    pub created_at: Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WebhookEventStatus {
    Received,
    Processed,
    Failed,
    Retrying,
    Ignored,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub id: WebhookEventId,
    pub provider: String,
    /// Provider-assigned event identifier, used for idempotent dedup.
    pub event_id: String,
    pub signature_valid: bool,
    pub payload: serde_json::Value,
    pub redacted_headers: serde_json::Value,
    pub request_ip: Option<String>,
    pub status: WebhookEventStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub created_at: Timestamp,
    pub processed_at: Option<Timestamp>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisputeStatus {
    Open,
    ResolvedBuyer,
    ResolvedSeller,
    ResolvedSplit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dispute {
    pub id: DisputeId,
    pub order_id: OrderId,
    pub raised_by: UserId,
    pub reason: String,
    pub status: DisputeStatus,
    pub resolution_notes: Option<String>,
    pub created_at: Timestamp,
    pub resolved_at: Option<Timestamp>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IdempotencyState {
    Processing,
    Completed,
    Failed,
}

/// A cached record of a previously-seen idempotent request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub id: IdempotencyRecordId,
    pub fingerprint: String,
    pub state: IdempotencyState,
    /// The cached JSON response body, once completed.
    pub response: Option<serde_json::Value>,
    pub created_at: Timestamp,
    pub expires_at: Timestamp,
}
