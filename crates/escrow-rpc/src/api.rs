use jsonrpsee::core::RpcResult;
use jsonrpsee::proc_macros::rpc;

use crate::types::{
    AcceptOrderParams, ApproveWithdrawalParams, ConfirmReceiptParams, CreateOrderParams,
    CreateWithdrawalParams, DisputeOrderParams, PayOrderParams, RejectWithdrawalParams,
    RpcDispute, RpcEscrowHold, RpcOrder, RpcWallet, RpcWebhookAck, RpcWithdrawal,
    WebhookNotificationParams,
};

/// Escrow ledger JSON-RPC 2.0 API definition.
///
/// All method names are prefixed with "escrow_" via `namespace = "escrow"`.
/// Each money-moving method corresponds to one row of the HTTP surface
/// table; an HTTP gateway in front of this node is expected to translate
/// `POST /orders` etc. into the matching call here.
#[rpc(server, namespace = "escrow")]
pub trait EscrowApi {
    /// `POST /orders` — create an order in `PENDING_ACCEPT`.
    #[method(name = "createOrder")]
    async fn create_order(&self, params: CreateOrderParams) -> RpcResult<RpcOrder>;

    /// `POST /orders/{id}/accept`.
    #[method(name = "acceptOrder")]
    async fn accept_order(&self, params: AcceptOrderParams) -> RpcResult<RpcOrder>;

    /// `POST /orders/{id}/pay` — opens the escrow hold.
    #[method(name = "payOrder")]
    async fn pay_order(&self, params: PayOrderParams) -> RpcResult<RpcEscrowHold>;

    /// `POST /orders/{id}/confirm-receipt` — buyer-triggered release.
    #[method(name = "confirmReceipt")]
    async fn confirm_receipt(&self, params: ConfirmReceiptParams) -> RpcResult<RpcEscrowHold>;

    /// `POST /orders/{id}/dispute`.
    #[method(name = "disputeOrder")]
    async fn dispute_order(&self, params: DisputeOrderParams) -> RpcResult<RpcDispute>;

    /// `POST /withdrawals`.
    #[method(name = "createWithdrawal")]
    async fn create_withdrawal(&self, params: CreateWithdrawalParams) -> RpcResult<RpcWithdrawal>;

    /// `POST /admin/withdrawals/{id}/approve`.
    #[method(name = "approveWithdrawal")]
    async fn approve_withdrawal(&self, params: ApproveWithdrawalParams) -> RpcResult<RpcWithdrawal>;

    /// Companion to `approveWithdrawal` — not in the HTTP surface table under
    /// its own route, but the same admin surface needs a way to reject.
    #[method(name = "rejectWithdrawal")]
    async fn reject_withdrawal(&self, params: RejectWithdrawalParams) -> RpcResult<RpcWithdrawal>;

    /// `POST /webhooks/{provider}/notification` — always acks 200.
    #[method(name = "ingestWebhookNotification")]
    async fn ingest_webhook_notification(&self, params: WebhookNotificationParams) -> RpcResult<RpcWebhookAck>;

    // ── Peripheral queries (not in the HTTP surface table, but needed to
    // read back state) ──────────────────────────────────────────────────

    #[method(name = "getOrder")]
    async fn get_order(&self, order_id: String) -> RpcResult<Option<RpcOrder>>;

    #[method(name = "getWithdrawal")]
    async fn get_withdrawal(&self, withdrawal_id: String) -> RpcResult<Option<RpcWithdrawal>>;

    #[method(name = "getWallet")]
    async fn get_wallet(&self, wallet_id: String) -> RpcResult<Option<RpcWallet>>;

    #[method(name = "describeWithdrawal")]
    async fn describe_withdrawal(&self, withdrawal_id: String) -> RpcResult<String>;
}
