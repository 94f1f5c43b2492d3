//! Sled-backed idempotency store — a single-node persistent fallback for
//! deployments with no Redis (`REDIS_HOST`/`REDIS_PORT` are optional
//! env vars, not mandatory). Shares `StateDb`'s `idempotency` tree with the
//! rest of this process's state, so a crash and restart doesn't lose
//! in-flight idempotency records the way [`crate::InMemoryStore`] would.

use std::sync::Arc;

use escrow_core::constants::{IDEMPOTENCY_PROCESSING_STALE_SECS, IDEMPOTENCY_TTL_HOURS};
use escrow_core::domain::{IdempotencyRecord, IdempotencyState};
use escrow_core::error::EscrowError;
use escrow_core::types::{IdempotencyRecordId, Timestamp};
use escrow_state::StateDb;

use crate::{IdempotencyStore, Lookup};

fn new_record(fingerprint: &str, state: IdempotencyState, response: Option<serde_json::Value>, now: Timestamp) -> IdempotencyRecord {
    IdempotencyRecord {
        id: IdempotencyRecordId::new(),
        fingerprint: fingerprint.to_string(),
        state,
        response,
        created_at: now,
        expires_at: now + chrono::Duration::hours(IDEMPOTENCY_TTL_HOURS),
    }
}

pub struct SledStore {
    db: Arc<StateDb>,
}

impl SledStore {
    pub fn new(db: Arc<StateDb>) -> Self {
        Self { db }
    }
}

impl IdempotencyStore for SledStore {
    async fn begin(&self, key: &str, request_fingerprint: &str, now: Timestamp) -> Result<Lookup, EscrowError> {
        if let Some(existing) = self.db.get_idempotency_record(key)? {
            if now < existing.expires_at {
                if existing.fingerprint != request_fingerprint {
                    return Ok(Lookup::KeyReused);
                }
                match existing.state {
                    IdempotencyState::Completed => {
                        return Ok(Lookup::Completed(existing.response.unwrap_or(serde_json::Value::Null)));
                    }
                    IdempotencyState::Failed => {
                        return Ok(Lookup::Failed(existing.response.unwrap_or(serde_json::Value::Null)));
                    }
                    IdempotencyState::Processing => {
                        let stale = (now - existing.created_at).num_seconds() > IDEMPOTENCY_PROCESSING_STALE_SECS;
                        if !stale {
                            return Ok(Lookup::InFlight);
                        }
                    }
                }
            }
        }

        let fresh = new_record(request_fingerprint, IdempotencyState::Processing, None, now);
        self.db.put_idempotency_record(key, &fresh)?;
        Ok(Lookup::Fresh)
    }

    async fn complete(&self, key: &str, response: serde_json::Value, now: Timestamp) -> Result<(), EscrowError> {
        let fingerprint = self.current_fingerprint(key)?;
        let record = new_record(&fingerprint, IdempotencyState::Completed, Some(response), now);
        self.db.put_idempotency_record(key, &record)
    }

    async fn fail(&self, key: &str, response: serde_json::Value, now: Timestamp) -> Result<(), EscrowError> {
        let fingerprint = self.current_fingerprint(key)?;
        let record = new_record(&fingerprint, IdempotencyState::Failed, Some(response), now);
        self.db.put_idempotency_record(key, &record)
    }
}

impl SledStore {
    /// The fingerprint stamped on `key` by `begin`, preserved across the
    /// `complete`/`fail` rewrite so a later `begin` can still detect key reuse.
    fn current_fingerprint(&self, key: &str) -> Result<String, EscrowError> {
        Ok(self.db.get_idempotency_record(key)?.map(|r| r.fingerprint).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fresh_then_completed_round_trips() {
        let db = Arc::new(StateDb::open_temporary().unwrap());
        let store = SledStore::new(Arc::clone(&db));
        let now = chrono::Utc::now();

        assert_eq!(store.begin("k1", "fp1", now).await.unwrap(), Lookup::Fresh);
        assert_eq!(store.begin("k1", "fp1", now).await.unwrap(), Lookup::InFlight);

        store.complete("k1", serde_json::json!({"ok": true}), now).await.unwrap();
        match store.begin("k1", "fp1", now).await.unwrap() {
            Lookup::Completed(v) => assert_eq!(v, serde_json::json!({"ok": true})),
            other => panic!("expected Completed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn reused_key_with_different_fingerprint_is_rejected() {
        let db = Arc::new(StateDb::open_temporary().unwrap());
        let store = SledStore::new(Arc::clone(&db));
        let now = chrono::Utc::now();

        store.begin("k2", "fp-a", now).await.unwrap();
        store.complete("k2", serde_json::json!({"ok": true}), now).await.unwrap();

        assert_eq!(store.begin("k2", "fp-b", now).await.unwrap(), Lookup::KeyReused);
    }
}
