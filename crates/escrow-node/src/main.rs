//! escrow-node — the money-movement engine's process wrapper.
//!
//! Startup sequence:
//!   1. Open (or initialise) the state database
//!   2. Apply genesis if the DB is fresh (platform chart of accounts + limits)
//!   3. Start the scheduler's background sweeps (auto-release, reconciliation, ...)
//!   4. Start the JSON-RPC 2.0 server
//!
//! Exit codes: 0 normal, 1 config error, 2 DB unavailable, 3 migration failure.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use escrow_genesis::apply_genesis;
use escrow_idempotency::SledStore;
use escrow_rpc::server::RpcServerState;
use escrow_rpc::RpcServer;
use escrow_scheduler::{Scheduler, SchedulerConfig};
use escrow_state::StateDb;

#[derive(Parser, Debug)]
#[command(name = "escrow-node", version, about = "Escrow ledger money-movement engine")]
struct Args {
    /// Path to the embedded state store. Despite the env var's name
    /// (`DATABASE_URL`, inherited from the platform this engine sits
    /// behind), this engine's storage layer is an embedded sled tree, not
    /// a SQL connection string — see DESIGN.md.
    #[arg(long, env = "DATABASE_URL", default_value = "./data/escrow-ledger")]
    data_dir: PathBuf,

    /// JSON-RPC listen address.
    #[arg(long, default_value = "127.0.0.1:8645")]
    rpc_addr: SocketAddr,

    /// Platform fee charged on escrow release, in basis points.
    #[arg(long, default_value_t = 250)]
    escrow_fee_bps: u32,

    /// Identity this node registers as when it holds a scheduler advisory
    /// lock — distinguishes nodes in a multi-instance deployment.
    #[arg(long, env = "HOSTNAME", default_value = "escrow-node-local")]
    node_id: String,
}

fn required_env(name: &str) -> Result<String, ExitCode> {
    std::env::var(name).map_err(|_| {
        error!(var = name, "required environment variable is not set");
        ExitCode::from(1)
    })
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info,escrow=debug".parse().unwrap()),
        )
        .init();

    let args = Args::parse();
    info!("escrow-node starting");

    // ── Required configuration ──────────────────────────────────────────
    for var in ["JWT_SECRET", "JWT_REFRESH_SECRET", "MFA_ENCRYPTION_KEY"] {
        if let Err(code) = required_env(var) {
            return code;
        }
    }
    let node_env = std::env::var("NODE_ENV").unwrap_or_else(|_| "development".to_string());
    if !matches!(node_env.as_str(), "development" | "staging" | "production") {
        error!(%node_env, "NODE_ENV must be one of development, staging, production");
        return ExitCode::from(1);
    }
    // MIDTRANS_SERVER_KEY is read lazily by the webhook ingestion path
    // itself (missing just means Midtrans signatures always fail closed).

    // ── State database ───────────────────────────────────────────────────
    if let Err(e) = std::fs::create_dir_all(&args.data_dir) {
        error!(error = %e, dir = %args.data_dir.display(), "failed to create data directory");
        return ExitCode::from(2);
    }
    let db = match StateDb::open(&args.data_dir) {
        Ok(db) => Arc::new(db),
        Err(e) => {
            error!(error = %e, "failed to open state database");
            return ExitCode::from(2);
        }
    };

    // ── Genesis if fresh ──────────────────────────────────────────────────
    let platform_accounts = match apply_genesis(&db) {
        Ok(accounts) => accounts,
        Err(e) => {
            error!(error = %e, "failed to apply genesis");
            return ExitCode::from(3);
        }
    };

    // ── Scheduler ─────────────────────────────────────────────────────────
    let scheduler_config = SchedulerConfig {
        escrow_holding_account: platform_accounts.escrow_holding,
        platform_fees_account: platform_accounts.platform_fees,
        escrow_fee_bps: args.escrow_fee_bps,
    };
    let webhook_apply: Arc<escrow_scheduler::WebhookApply> = Arc::new(|provider, event_id, _payload| {
        info!(provider, event_id, "scheduler retried webhook via default no-op effect");
        Ok(())
    });
    let scheduler = Scheduler::new(Arc::clone(&db), scheduler_config, args.node_id.clone(), webhook_apply);
    tokio::spawn(scheduler.run());

    // ── RPC server ────────────────────────────────────────────────────────
    // Redis-backed idempotency needs REDIS_HOST; fall back to an in-process
    // store (fine for a single-node deployment) when it's unset.
    let redis_host = std::env::var("REDIS_HOST").ok();
    let rpc_result = if let Some(host) = redis_host {
        let port = std::env::var("REDIS_PORT").unwrap_or_else(|_| "6379".to_string());
        match connect_redis_idempotency(&host, &port).await {
            Ok(store) => {
                let state = Arc::new(RpcServerState {
                    db: Arc::clone(&db),
                    platform_accounts,
                    escrow_fee_bps: args.escrow_fee_bps,
                    idempotency: store,
                });
                RpcServer::new(state).start(args.rpc_addr).await
            }
            Err(e) => {
                error!(error = %e, "failed to connect to redis for idempotency store");
                return ExitCode::from(2);
            }
        }
    } else {
        info!("REDIS_HOST not set — using the sled-backed idempotency store (single node only)");
        let state = Arc::new(RpcServerState {
            db: Arc::clone(&db),
            platform_accounts,
            escrow_fee_bps: args.escrow_fee_bps,
            idempotency: SledStore::new(Arc::clone(&db)),
        });
        RpcServer::new(state).start(args.rpc_addr).await
    };

    let rpc_handle = match rpc_result {
        Ok(handle) => handle,
        Err(e) => {
            error!(error = %e, "failed to start RPC server");
            return ExitCode::from(1);
        }
    };

    info!(addr = %args.rpc_addr, "escrow-node ready");
    rpc_handle.stopped().await;
    ExitCode::SUCCESS
}

async fn connect_redis_idempotency(host: &str, port: &str) -> anyhow::Result<escrow_idempotency::RedisStore> {
    let client = redis::Client::open(format!("redis://{host}:{port}"))?;
    let conn = redis::aio::ConnectionManager::new(client).await?;
    Ok(escrow_idempotency::RedisStore::new(conn))
}
