//! Redis-backed idempotency store — shares the fingerprint cache across
//! every node in a multi-instance deployment. Each key is a single JSON
//! blob under its own Redis key with a TTL matching `IDEMPOTENCY_TTL_HOURS`;
//! the initial claim uses `SET ... NX` so two nodes racing on the same
//! key can't both see `Fresh`.

use escrow_core::constants::{IDEMPOTENCY_PROCESSING_STALE_SECS, IDEMPOTENCY_TTL_HOURS};
use escrow_core::domain::{IdempotencyRecord, IdempotencyState};
use escrow_core::error::EscrowError;
use escrow_core::types::{IdempotencyRecordId, Timestamp};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::{IdempotencyStore, Lookup};

type Cached = IdempotencyRecord;

fn new_cached(fingerprint: &str, state: IdempotencyState, response: Option<serde_json::Value>, now: Timestamp) -> Cached {
    IdempotencyRecord {
        id: IdempotencyRecordId::new(),
        fingerprint: fingerprint.to_string(),
        state,
        response,
        created_at: now,
        expires_at: now + chrono::Duration::hours(IDEMPOTENCY_TTL_HOURS),
    }
}

pub struct RedisStore {
    conn: ConnectionManager,
    key_prefix: String,
}

impl RedisStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            conn,
            key_prefix: "idem:".to_string(),
        }
    }

    fn redis_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    fn ttl_secs() -> i64 {
        IDEMPOTENCY_TTL_HOURS * 3600
    }
}

fn redis_err(e: redis::RedisError) -> EscrowError {
    EscrowError::Storage(format!("redis: {e}"))
}

fn ser_err(e: serde_json::Error) -> EscrowError {
    EscrowError::Serialization(e.to_string())
}

impl IdempotencyStore for RedisStore {
    async fn begin(&self, key: &str, request_fingerprint: &str, now: Timestamp) -> Result<Lookup, EscrowError> {
        let rkey = self.redis_key(key);
        let mut conn = self.conn.clone();

        let fresh = new_cached(request_fingerprint, IdempotencyState::Processing, None, now);
        let fresh_json = serde_json::to_string(&fresh).map_err(ser_err)?;

        let claimed: Option<String> = redis::cmd("SET")
            .arg(&rkey)
            .arg(&fresh_json)
            .arg("NX")
            .arg("EX")
            .arg(Self::ttl_secs())
            .query_async(&mut conn)
            .await
            .map_err(redis_err)?;
        if claimed.is_some() {
            return Ok(Lookup::Fresh);
        }

        let existing: Option<String> = conn.get(&rkey).await.map_err(redis_err)?;
        let Some(existing) = existing else {
            // Key expired between the failed NX and our GET; safe to claim now.
            conn.set_ex::<_, _, ()>(&rkey, &fresh_json, Self::ttl_secs() as u64)
                .await
                .map_err(redis_err)?;
            return Ok(Lookup::Fresh);
        };
        let cached: Cached = serde_json::from_str(&existing).map_err(ser_err)?;

        if cached.fingerprint != request_fingerprint {
            return Ok(Lookup::KeyReused);
        }

        match cached.state {
            IdempotencyState::Completed => Ok(Lookup::Completed(cached.response.unwrap_or(serde_json::Value::Null))),
            IdempotencyState::Failed => Ok(Lookup::Failed(cached.response.unwrap_or(serde_json::Value::Null))),
            IdempotencyState::Processing => {
                let stale = (now - cached.created_at).num_seconds() > IDEMPOTENCY_PROCESSING_STALE_SECS;
                if stale {
                    conn.set_ex::<_, _, ()>(&rkey, &fresh_json, Self::ttl_secs() as u64)
                        .await
                        .map_err(redis_err)?;
                    Ok(Lookup::Fresh)
                } else {
                    Ok(Lookup::InFlight)
                }
            }
        }
    }

    async fn complete(&self, key: &str, response: serde_json::Value, now: Timestamp) -> Result<(), EscrowError> {
        let mut conn = self.conn.clone();
        let rkey = self.redis_key(key);
        let fingerprint = self.current_fingerprint(&mut conn, &rkey).await?;
        let cached = new_cached(&fingerprint, IdempotencyState::Completed, Some(response), now);
        let json = serde_json::to_string(&cached).map_err(ser_err)?;
        conn.set_ex::<_, _, ()>(rkey, json, Self::ttl_secs() as u64)
            .await
            .map_err(redis_err)
    }

    async fn fail(&self, key: &str, response: serde_json::Value, now: Timestamp) -> Result<(), EscrowError> {
        let mut conn = self.conn.clone();
        let rkey = self.redis_key(key);
        let fingerprint = self.current_fingerprint(&mut conn, &rkey).await?;
        let cached = new_cached(&fingerprint, IdempotencyState::Failed, Some(response), now);
        let json = serde_json::to_string(&cached).map_err(ser_err)?;
        conn.set_ex::<_, _, ()>(rkey, json, Self::ttl_secs() as u64)
            .await
            .map_err(redis_err)
    }
}

impl RedisStore {
    /// The fingerprint stamped on `key` by `begin`, preserved across the
    /// `complete`/`fail` rewrite so a later `begin` can still detect key reuse.
    async fn current_fingerprint(&self, conn: &mut ConnectionManager, rkey: &str) -> Result<String, EscrowError> {
        let existing: Option<String> = conn.get(rkey).await.map_err(redis_err)?;
        match existing {
            Some(raw) => Ok(serde_json::from_str::<Cached>(&raw).map_err(ser_err)?.fingerprint),
            None => Ok(String::new()),
        }
    }
}
