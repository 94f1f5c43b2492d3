//! In-process idempotency store — a single `tokio::sync::Mutex`-guarded
//! map. Sufficient for a single-node deployment or tests; multi-node
//! deployments should use [`crate::RedisStore`] instead so every node
//! shares the same fingerprint cache.

use std::collections::HashMap;

use escrow_core::constants::{IDEMPOTENCY_PROCESSING_STALE_SECS, IDEMPOTENCY_TTL_HOURS};
use escrow_core::domain::IdempotencyState;
use escrow_core::error::EscrowError;
use escrow_core::types::Timestamp;
use tokio::sync::Mutex;

use crate::{IdempotencyStore, Lookup};

struct Entry {
    fingerprint: String,
    state: IdempotencyState,
    response: Option<serde_json::Value>,
    created_at: Timestamp,
    expires_at: Timestamp,
}

#[derive(Default)]
pub struct InMemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdempotencyStore for InMemoryStore {
    async fn begin(&self, key: &str, request_fingerprint: &str, now: Timestamp) -> Result<Lookup, EscrowError> {
        let mut guard = self.entries.lock().await;

        if let Some(entry) = guard.get(key) {
            if now < entry.expires_at {
                if entry.fingerprint != request_fingerprint {
                    return Ok(Lookup::KeyReused);
                }
                match entry.state {
                    IdempotencyState::Completed => {
                        return Ok(Lookup::Completed(entry.response.clone().unwrap_or(serde_json::Value::Null)));
                    }
                    IdempotencyState::Failed => {
                        return Ok(Lookup::Failed(entry.response.clone().unwrap_or(serde_json::Value::Null)));
                    }
                    IdempotencyState::Processing => {
                        let stale = (now - entry.created_at).num_seconds() > IDEMPOTENCY_PROCESSING_STALE_SECS;
                        if !stale {
                            return Ok(Lookup::InFlight);
                        }
                    }
                }
            }
        }

        guard.insert(
            key.to_string(),
            Entry {
                fingerprint: request_fingerprint.to_string(),
                state: IdempotencyState::Processing,
                response: None,
                created_at: now,
                expires_at: now + chrono::Duration::hours(IDEMPOTENCY_TTL_HOURS),
            },
        );
        Ok(Lookup::Fresh)
    }

    async fn complete(&self, key: &str, response: serde_json::Value, now: Timestamp) -> Result<(), EscrowError> {
        let mut guard = self.entries.lock().await;
        if let Some(entry) = guard.get_mut(key) {
            entry.state = IdempotencyState::Completed;
            entry.response = Some(response);
            entry.expires_at = now + chrono::Duration::hours(IDEMPOTENCY_TTL_HOURS);
        }
        Ok(())
    }

    async fn fail(&self, key: &str, response: serde_json::Value, now: Timestamp) -> Result<(), EscrowError> {
        let mut guard = self.entries.lock().await;
        if let Some(entry) = guard.get_mut(key) {
            entry.state = IdempotencyState::Failed;
            entry.response = Some(response);
            entry.expires_at = now + chrono::Duration::hours(IDEMPOTENCY_TTL_HOURS);
        }
        Ok(())
    }
}
