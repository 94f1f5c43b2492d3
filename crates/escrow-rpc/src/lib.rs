//! JSON-RPC 2.0 server exposing the money-movement engine.
//!
//! Namespace: "escrow". Each money-moving method mirrors one row of the
//! HTTP surface table in the spec; an HTTP gateway in front of this node
//! translates `POST /orders` etc. into the matching `escrow_*` call here.
//! Query methods (`getOrder`, `getWallet`, ...) are peripheral read paths
//! not covered by that table but needed to look up what a mutation did.

pub mod api;
pub mod server;
pub mod types;

pub use server::{RpcServer, RpcServerState};
pub use types::{
    AcceptOrderParams, ApproveWithdrawalParams, ConfirmReceiptParams, CreateOrderParams,
    CreateWithdrawalParams, DisputeOrderParams, PayOrderParams, RejectWithdrawalParams,
    RpcDispute, RpcEscrowHold, RpcOrder, RpcWallet, RpcWebhookAck, RpcWithdrawal,
    WebhookNotificationParams,
};
