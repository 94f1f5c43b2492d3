use serde::{Deserialize, Serialize};

// ── Entity summaries ──────────────────────────────────────────────────────

/// JSON-serializable order summary. Minor-unit amounts travel as decimal
/// strings so large values survive JSON's f64-based number type intact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcOrder {
    pub id: String,
    pub buyer_id: String,
    pub seller_id: String,
    pub amount_minor: String,
    pub currency: String,
    pub status: String,
    pub auto_release_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcEscrowHold {
    pub id: String,
    pub order_id: String,
    pub buyer_wallet_id: String,
    pub seller_wallet_id: String,
    pub amount_minor: String,
    pub status: String,
    pub created_at: i64,
    pub released_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcWithdrawal {
    pub id: String,
    pub user_id: String,
    pub wallet_id: String,
    pub bank_account_id: String,
    pub amount_minor: String,
    pub status: String,
    pub risk_score: u32,
    pub required_approvals: u32,
    pub approvals: Vec<String>,
    pub rejections: Vec<String>,
    pub created_at: i64,
    pub decided_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcDispute {
    pub id: String,
    pub order_id: String,
    pub raised_by: String,
    pub reason: String,
    pub status: String,
    pub resolution_notes: Option<String>,
    pub created_at: i64,
    pub resolved_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcWallet {
    pub id: String,
    pub user_id: String,
    pub currency: String,
    pub available_minor: String,
    pub locked_minor: String,
    pub version: u64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcWebhookAck {
    pub event_id: String,
    pub provider: String,
    pub signature_valid: bool,
    pub status: String,
}

// ── Request params ────────────────────────────────────────────────────────
//
// Each struct's fields mirror one row of the HTTP surface table: the
// mandatory `Authorization`/`X-Idempotency-Key` headers become explicit
// fields here since JSON-RPC carries no headers of its own.

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrderParams {
    pub actor_user_id: String,
    pub buyer_id: String,
    pub seller_id: String,
    pub amount_minor: i64,
    pub currency: String,
    pub idempotency_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceptOrderParams {
    pub actor_user_id: String,
    pub order_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayOrderParams {
    pub actor_user_id: String,
    pub order_id: String,
    pub buyer_wallet_id: String,
    pub seller_wallet_id: String,
    pub idempotency_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmReceiptParams {
    pub actor_user_id: String,
    pub order_id: String,
    pub idempotency_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisputeOrderParams {
    pub actor_user_id: String,
    pub order_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateWithdrawalParams {
    pub user_id: String,
    pub wallet_id: String,
    pub bank_account_id: String,
    pub amount_minor: i64,
    pub idempotency_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApproveWithdrawalParams {
    pub withdrawal_id: String,
    pub admin_id: String,
    /// Out-of-band MFA one-time code; this endpoint requires MFA alongside
    /// Auth. Checked by the caller's auth layer before
    /// this method is invoked — this crate only records who approved.
    pub mfa_code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectWithdrawalParams {
    pub withdrawal_id: String,
    pub admin_id: String,
    pub mfa_code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookNotificationParams {
    pub provider: String,
    /// Raw request body, base64 would round-trip binary bodies exactly;
    /// providers here always send JSON so this carries the UTF-8 text.
    pub body: String,
    pub signature_header: String,
    pub headers: serde_json::Value,
    /// (order_id, status_code, gross_amount) — required for Midtrans.
    pub midtrans_fields: Option<(String, String, String)>,
    /// Caller-observed source IP, forwarded by whatever terminates the
    /// actual HTTP connection (JSON-RPC itself carries no peer address).
    pub request_ip: Option<String>,
}
