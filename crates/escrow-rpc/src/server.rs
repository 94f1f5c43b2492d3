use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;

use jsonrpsee::core::{async_trait, RpcResult};
use jsonrpsee::server::{Server, ServerHandle};
use jsonrpsee::types::ErrorObject;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use escrow_core::domain::{Dispute, EscrowHold, Order, Wallet, Withdrawal};
use escrow_core::error::EscrowError;
use escrow_core::types::{BankAccountId, OrderId, UserId, WalletId, WithdrawalId};
use escrow_genesis::PlatformAccounts;
use escrow_idempotency::{request_fingerprint, storage_key, IdempotencyStore, Lookup};
use escrow_state::StateDb;

use crate::api::EscrowApiServer;
use crate::types::{
    AcceptOrderParams, ApproveWithdrawalParams, ConfirmReceiptParams, CreateOrderParams,
    CreateWithdrawalParams, DisputeOrderParams, PayOrderParams, RejectWithdrawalParams,
    RpcDispute, RpcEscrowHold, RpcOrder, RpcWallet, RpcWebhookAck, RpcWithdrawal,
    WebhookNotificationParams,
};

fn rpc_err(e: EscrowError) -> ErrorObject<'static> {
    let code = -32000 - e.http_status() as i32;
    let message = escrow_crypto::redact::redact_pii(&e.to_string());
    ErrorObject::owned(code, message, None::<()>)
}

/// Reconstructs the JSON-RPC error a cached `Lookup::Failed` record
/// represents, without going back through `EscrowError`.
fn cached_error_to_rpc(v: serde_json::Value) -> ErrorObject<'static> {
    let code = v.get("code").and_then(|c| c.as_i64()).unwrap_or(500) as i32;
    let message = v
        .get("message")
        .and_then(|m| m.as_str())
        .unwrap_or("cached error")
        .to_string();
    ErrorObject::owned(-32000 - code, message, None::<()>)
}

fn parse_id<T: FromStr>(raw: &str, field: &str) -> RpcResult<T> {
    T::from_str(raw).map_err(|_| rpc_err(EscrowError::InvalidInput(format!("malformed {field}: {raw}"))))
}

/// Case-insensitive lookup of a header value out of the generic `headers`
/// JSON blob `ingestWebhookNotification` carries.
fn header_value<'a>(headers: &'a serde_json::Value, name: &str) -> Option<&'a str> {
    headers.as_object()?.iter().find(|(k, _)| k.eq_ignore_ascii_case(name))?.1.as_str()
}

/// Shared state passed to the RPC server. `S` is the idempotency backend —
/// `SledStore` (or the non-persistent `InMemoryStore`) for a single node,
/// `RedisStore` once there's more than one.
pub struct RpcServerState<S: IdempotencyStore> {
    pub db: Arc<StateDb>,
    pub platform_accounts: PlatformAccounts,
    pub escrow_fee_bps: u32,
    pub idempotency: S,
}

pub struct RpcServer<S: IdempotencyStore + 'static> {
    state: Arc<RpcServerState<S>>,
}

impl<S: IdempotencyStore + 'static> RpcServer<S> {
    pub fn new(state: Arc<RpcServerState<S>>) -> Self {
        Self { state }
    }

    /// Start the JSON-RPC server on `addr` with permissive CORS headers.
    pub async fn start(self, addr: SocketAddr) -> anyhow::Result<ServerHandle>
    where
        Self: EscrowApiServer,
    {
        let cors = CorsLayer::new().allow_methods(Any).allow_origin(Any).allow_headers(Any);

        let server = Server::builder()
            .set_http_middleware(tower::ServiceBuilder::new().layer(cors))
            .build(addr)
            .await?;

        let module = self.into_rpc();
        let handle = server.start(module);
        info!(%addr, "RPC server started");
        Ok(handle)
    }
}

/// Run `f` behind the idempotency cache keyed by `idempotency:{user_id}:{key}`:
/// a repeated key with the same request fingerprint replays the
/// cached response (or cached error) byte-for-byte instead of re-running the
/// side effect; the same key with a different fingerprint is rejected as
/// `IdempotencyKeyReused`.
async fn with_idempotency<S, T, F, Fut>(
    store: &S,
    user_id: &str,
    idempotency_key: &str,
    request_fp: &str,
    f: F,
) -> RpcResult<T>
where
    S: IdempotencyStore,
    T: serde::Serialize + serde::de::DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<T, EscrowError>>,
{
    let now = chrono::Utc::now();
    let key = storage_key(user_id, idempotency_key);

    match store.begin(&key, request_fp, now).await.map_err(rpc_err)? {
        Lookup::Completed(cached) => {
            return serde_json::from_value(cached)
                .map_err(|e| rpc_err(EscrowError::Serialization(e.to_string())));
        }
        Lookup::Failed(cached_err) => {
            return Err(cached_error_to_rpc(cached_err));
        }
        Lookup::InFlight => {
            return Err(rpc_err(EscrowError::IdempotentRequestInFlight(idempotency_key.to_string())));
        }
        Lookup::KeyReused => {
            return Err(rpc_err(EscrowError::IdempotencyKeyReused(idempotency_key.to_string())));
        }
        Lookup::Fresh => {}
    }

    match f().await {
        Ok(result) => {
            let json = serde_json::to_value(&result).map_err(|e| rpc_err(EscrowError::Serialization(e.to_string())))?;
            store.complete(&key, json, now).await.map_err(rpc_err)?;
            Ok(result)
        }
        Err(e) => {
            let err_json = serde_json::json!({"code": e.http_status(), "message": e.to_string()});
            store.fail(&key, err_json, now).await.map_err(rpc_err)?;
            Err(rpc_err(e))
        }
    }
}

// ── Entity → RPC DTO conversions ──────────────────────────────────────────

fn order_to_rpc(o: Order) -> RpcOrder {
    RpcOrder {
        id: o.id.to_string(),
        buyer_id: o.buyer_id.to_string(),
        seller_id: o.seller_id.to_string(),
        amount_minor: o.amount_minor.to_string(),
        currency: o.currency,
        status: format!("{:?}", o.status),
        auto_release_at: o.auto_release_at.map(|t| t.timestamp()),
        created_at: o.created_at.timestamp(),
        updated_at: o.updated_at.timestamp(),
    }
}

fn escrow_to_rpc(e: EscrowHold) -> RpcEscrowHold {
    RpcEscrowHold {
        id: e.id.to_string(),
        order_id: e.order_id.to_string(),
        buyer_wallet_id: e.buyer_wallet_id.to_string(),
        seller_wallet_id: e.seller_wallet_id.to_string(),
        amount_minor: e.amount_minor.to_string(),
        status: format!("{:?}", e.status),
        created_at: e.created_at.timestamp(),
        released_at: e.released_at.map(|t| t.timestamp()),
    }
}

fn withdrawal_to_rpc(w: Withdrawal) -> RpcWithdrawal {
    RpcWithdrawal {
        id: w.id.to_string(),
        user_id: w.user_id.to_string(),
        wallet_id: w.wallet_id.to_string(),
        bank_account_id: w.bank_account_id.to_string(),
        amount_minor: w.amount_minor.to_string(),
        status: format!("{:?}", w.status),
        risk_score: w.risk_score,
        required_approvals: w.required_approvals,
        approvals: w.approvals.iter().map(|a| a.to_string()).collect(),
        rejections: w.rejections.iter().map(|a| a.to_string()).collect(),
        created_at: w.created_at.timestamp(),
        decided_at: w.decided_at.map(|t| t.timestamp()),
    }
}

fn dispute_to_rpc(d: Dispute) -> RpcDispute {
    RpcDispute {
        id: d.id.to_string(),
        order_id: d.order_id.to_string(),
        raised_by: d.raised_by.to_string(),
        reason: d.reason,
        status: format!("{:?}", d.status),
        resolution_notes: d.resolution_notes,
        created_at: d.created_at.timestamp(),
        resolved_at: d.resolved_at.map(|t| t.timestamp()),
    }
}

fn wallet_to_rpc(w: Wallet) -> RpcWallet {
    RpcWallet {
        id: w.id.to_string(),
        user_id: w.user_id.to_string(),
        currency: w.currency,
        available_minor: w.available_minor.to_string(),
        locked_minor: w.locked_minor.to_string(),
        version: w.version,
        updated_at: w.updated_at.timestamp(),
    }
}

// ── RPC implementation ─────────────────────────────────────────────────────

#[async_trait]
impl<S: IdempotencyStore + 'static> EscrowApiServer for RpcServer<S> {
    async fn create_order(&self, params: CreateOrderParams) -> RpcResult<RpcOrder> {
        let buyer_id: UserId = parse_id(&params.buyer_id, "buyer_id")?;
        let seller_id: UserId = parse_id(&params.seller_id, "seller_id")?;
        let db = self.state.db.clone();
        let actor_user_id = params.actor_user_id.clone();
        let idempotency_key = params.idempotency_key.clone();
        let fp = request_fingerprint("create_order", &serde_json::to_value(&params).map_err(|e| rpc_err(EscrowError::Serialization(e.to_string())))?);

        with_idempotency(&self.state.idempotency, &actor_user_id, &idempotency_key, &fp, || async move {
            let now = chrono::Utc::now();
            let order = escrow_escrow::create_order(&db, buyer_id, seller_id, params.amount_minor, params.currency, now)?;
            Ok(order_to_rpc(order))
        })
        .await
    }

    async fn accept_order(&self, params: AcceptOrderParams) -> RpcResult<RpcOrder> {
        let order_id: OrderId = parse_id(&params.order_id, "order_id")?;
        let actor_id: UserId = parse_id(&params.actor_user_id, "actor_user_id")?;
        let now = chrono::Utc::now();
        let order = escrow_escrow::accept_order(&self.state.db, order_id, escrow_escrow::Actor::User(actor_id), now)
            .map_err(rpc_err)?;
        Ok(order_to_rpc(order))
    }

    async fn pay_order(&self, params: PayOrderParams) -> RpcResult<RpcEscrowHold> {
        let order_id: OrderId = parse_id(&params.order_id, "order_id")?;
        let actor_id: UserId = parse_id(&params.actor_user_id, "actor_user_id")?;
        let buyer_wallet_id: WalletId = parse_id(&params.buyer_wallet_id, "buyer_wallet_id")?;
        let seller_wallet_id: WalletId = parse_id(&params.seller_wallet_id, "seller_wallet_id")?;
        let db = self.state.db.clone();
        let escrow_holding_account = self.state.platform_accounts.escrow_holding;
        let actor_user_id = params.actor_user_id.clone();
        let idempotency_key = params.idempotency_key.clone();
        let fp = request_fingerprint("pay_order", &serde_json::to_value(&params).map_err(|e| rpc_err(EscrowError::Serialization(e.to_string())))?);

        with_idempotency(&self.state.idempotency, &actor_user_id, &idempotency_key, &fp, || async move {
            let now = chrono::Utc::now();
            let (_, hold) = escrow_escrow::pay_order(
                &db,
                order_id,
                escrow_escrow::Actor::User(actor_id),
                buyer_wallet_id,
                seller_wallet_id,
                escrow_holding_account,
                now,
            )
            .await?;
            Ok(escrow_to_rpc(hold))
        })
        .await
    }

    async fn confirm_receipt(&self, params: ConfirmReceiptParams) -> RpcResult<RpcEscrowHold> {
        let order_id: OrderId = parse_id(&params.order_id, "order_id")?;
        let actor_id: UserId = parse_id(&params.actor_user_id, "actor_user_id")?;
        let db = self.state.db.clone();
        let escrow_holding_account = self.state.platform_accounts.escrow_holding;
        let platform_fees_account = self.state.platform_accounts.platform_fees;
        let fee_bps = self.state.escrow_fee_bps;
        let actor_user_id = params.actor_user_id.clone();
        let idempotency_key = params.idempotency_key.clone();
        let fp = request_fingerprint("confirm_receipt", &serde_json::to_value(&params).map_err(|e| rpc_err(EscrowError::Serialization(e.to_string())))?);

        with_idempotency(&self.state.idempotency, &actor_user_id, &idempotency_key, &fp, || async move {
            let now = chrono::Utc::now();
            let order = db.get_order(&order_id)?.ok_or_else(|| EscrowError::OrderNotFound(order_id.to_string()))?;
            let fee = (order.amount_minor as i128 * fee_bps as i128 / 10_000) as i64;
            let (_, hold) = escrow_escrow::release_escrow(
                &db,
                order_id,
                escrow_escrow::Actor::User(actor_id),
                escrow_holding_account,
                platform_fees_account,
                fee,
                now,
            )
            .await?;
            Ok(escrow_to_rpc(hold))
        })
        .await
    }

    async fn dispute_order(&self, params: DisputeOrderParams) -> RpcResult<RpcDispute> {
        let order_id: OrderId = parse_id(&params.order_id, "order_id")?;
        let actor_id: UserId = parse_id(&params.actor_user_id, "actor_user_id")?;
        let now = chrono::Utc::now();
        let (_, dispute) = escrow_escrow::dispute_order(&self.state.db, order_id, escrow_escrow::Actor::User(actor_id), params.reason, now)
            .map_err(rpc_err)?;
        Ok(dispute_to_rpc(dispute))
    }

    async fn create_withdrawal(&self, params: CreateWithdrawalParams) -> RpcResult<RpcWithdrawal> {
        let user_id: UserId = parse_id(&params.user_id, "user_id")?;
        let wallet_id: WalletId = parse_id(&params.wallet_id, "wallet_id")?;
        let bank_account_id: BankAccountId = parse_id(&params.bank_account_id, "bank_account_id")?;
        let db = self.state.db.clone();
        let user_id_str = params.user_id.clone();
        let idempotency_key = params.idempotency_key.clone();
        let idempotency_key_for_withdrawal = idempotency_key.clone();
        let fp = request_fingerprint("create_withdrawal", &serde_json::to_value(&params).map_err(|e| rpc_err(EscrowError::Serialization(e.to_string())))?);

        with_idempotency(&self.state.idempotency, &user_id_str, &idempotency_key, &fp, || async move {
            let now = chrono::Utc::now();
            let withdrawal = escrow_withdrawal::create_withdrawal(
                &db,
                user_id,
                wallet_id,
                bank_account_id,
                &idempotency_key_for_withdrawal,
                params.amount_minor,
                now,
            )
            .await?;
            Ok(withdrawal_to_rpc(withdrawal))
        })
        .await
    }

    async fn approve_withdrawal(&self, params: ApproveWithdrawalParams) -> RpcResult<RpcWithdrawal> {
        if params.mfa_code.trim().is_empty() {
            return Err(rpc_err(EscrowError::InvalidInput("mfa_code required".into())));
        }
        let withdrawal_id: WithdrawalId = parse_id(&params.withdrawal_id, "withdrawal_id")?;
        let admin_id: UserId = parse_id(&params.admin_id, "admin_id")?;
        let now = chrono::Utc::now();

        let mut withdrawal = escrow_withdrawal::approve_withdrawal(&self.state.db, withdrawal_id, admin_id, now).map_err(rpc_err)?;

        if withdrawal.status == escrow_core::domain::WithdrawalStatus::Approved {
            let wallet = self
                .state
                .db
                .get_wallet(&withdrawal.wallet_id)
                .map_err(rpc_err)?
                .ok_or_else(|| rpc_err(EscrowError::WalletNotFound(withdrawal.wallet_id.to_string())))?;
            withdrawal = escrow_withdrawal::complete_withdrawal(
                &self.state.db,
                withdrawal_id,
                wallet.ledger_account_id,
                self.state.platform_accounts.provider_float,
                now,
            )
            .await
            .map_err(rpc_err)?;
        }
        Ok(withdrawal_to_rpc(withdrawal))
    }

    async fn reject_withdrawal(&self, params: RejectWithdrawalParams) -> RpcResult<RpcWithdrawal> {
        if params.mfa_code.trim().is_empty() {
            return Err(rpc_err(EscrowError::InvalidInput("mfa_code required".into())));
        }
        let withdrawal_id: WithdrawalId = parse_id(&params.withdrawal_id, "withdrawal_id")?;
        let admin_id: UserId = parse_id(&params.admin_id, "admin_id")?;
        let now = chrono::Utc::now();

        let withdrawal = escrow_withdrawal::reject_withdrawal(&self.state.db, withdrawal_id, admin_id, now).map_err(rpc_err)?;
        escrow_withdrawal::release_rejected_funds(&self.state.db, &withdrawal, now).await.map_err(rpc_err)?;
        Ok(withdrawal_to_rpc(withdrawal))
    }

    async fn ingest_webhook_notification(&self, params: WebhookNotificationParams) -> RpcResult<RpcWebhookAck> {
        let server_key = std::env::var("MIDTRANS_SERVER_KEY").unwrap_or_default();
        let midtrans_fields = params
            .midtrans_fields
            .as_ref()
            .map(|(a, b, c)| (a.as_str(), b.as_str(), c.as_str()));

        let timestamp_header = header_value(&params.headers, "x-timestamp").map(str::to_string);
        let delivery = escrow_webhook::Delivery {
            provider: &params.provider,
            body: params.body.as_bytes(),
            headers: params.headers,
            server_key: &server_key,
            provided_signature: &params.signature_header,
            midtrans_fields,
            event_id: None,
            request_ip: params.request_ip.as_deref(),
            timestamp_header: timestamp_header.as_deref(),
        };

        let now = chrono::Utc::now();
        let apply: Box<escrow_webhook::ApplyEffect> = Box::new(move |_payload| {
            // The concrete mapping from a provider payload to a ledger/wallet
            // effect is wired by the node binary, which knows which order or
            // withdrawal a given payload settles. This default is a no-op ack
            // so an unconfigured deployment never silently drops state.
            Ok(())
        });

        let event = escrow_webhook::ingest(&self.state.db, delivery, apply.as_ref(), now).map_err(rpc_err)?;
        warn!(provider = %event.provider, event_id = %event.event_id, "webhook ingested via default no-op effect; wire a real handler at the node binary");

        Ok(RpcWebhookAck {
            event_id: event.event_id,
            provider: event.provider,
            signature_valid: event.signature_valid,
            status: format!("{:?}", event.status),
        })
    }

    async fn get_order(&self, order_id: String) -> RpcResult<Option<RpcOrder>> {
        let id: OrderId = parse_id(&order_id, "order_id")?;
        Ok(self.state.db.get_order(&id).map_err(rpc_err)?.map(order_to_rpc))
    }

    async fn get_withdrawal(&self, withdrawal_id: String) -> RpcResult<Option<RpcWithdrawal>> {
        let id: WithdrawalId = parse_id(&withdrawal_id, "withdrawal_id")?;
        Ok(self.state.db.get_withdrawal(&id).map_err(rpc_err)?.map(withdrawal_to_rpc))
    }

    async fn get_wallet(&self, wallet_id: String) -> RpcResult<Option<RpcWallet>> {
        let id: WalletId = parse_id(&wallet_id, "wallet_id")?;
        Ok(self.state.db.get_wallet(&id).map_err(rpc_err)?.map(wallet_to_rpc))
    }

    async fn describe_withdrawal(&self, withdrawal_id: String) -> RpcResult<String> {
        let id: WithdrawalId = parse_id(&withdrawal_id, "withdrawal_id")?;
        escrow_withdrawal::WithdrawalQuery::new(&self.state.db).describe(&id).map_err(rpc_err)
    }
}
