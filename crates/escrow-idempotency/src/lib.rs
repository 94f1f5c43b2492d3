//! C6 — the idempotency/concurrency cache.
//!
//! Every mutating RPC call carries a client-supplied `X-Idempotency-Key`,
//! scoped per user into a storage key `idempotency:{user_id}:{key}`. The
//! record behind that key also carries a short request fingerprint (operation
//! + normalized params); a second call on the same key with a different
//! fingerprint means the client reused the key for a different request and
//! is rejected rather than silently replayed. A fingerprint already
//! `Processing` means a concurrent duplicate request is in flight and is
//! rejected outright rather than queued; `Completed` replays the cached
//! response, `Failed` replays the cached error.

pub mod memory;
pub mod redis_store;
pub mod sled_store;

use escrow_core::error::EscrowError;
use escrow_core::types::Timestamp;

pub use memory::InMemoryStore;
pub use redis_store::RedisStore;
pub use sled_store::SledStore;

/// Outcome of looking up a key before running a handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// Not seen before — caller should proceed and eventually call
    /// `complete` or `fail`.
    Fresh,
    /// Already completed — caller should return the cached response
    /// without re-running the handler.
    Completed(serde_json::Value),
    /// Already failed — caller should return the cached error response
    /// without re-running the handler.
    Failed(serde_json::Value),
    /// A request with this key is currently in flight.
    InFlight,
    /// The same key was previously used with a different request fingerprint.
    KeyReused,
}

/// Backing store for idempotency records, swappable between an in-process
/// map (single-node deployments, tests) and Redis (multi-node).
pub trait IdempotencyStore: Send + Sync {
    /// Atomically check `key` against `request_fingerprint` and, if fresh,
    /// mark it `Processing`.
    fn begin(
        &self,
        key: &str,
        request_fingerprint: &str,
        now: Timestamp,
    ) -> impl std::future::Future<Output = Result<Lookup, EscrowError>> + Send;

    /// Mark a key `Completed` with its cached response.
    fn complete(
        &self,
        key: &str,
        response: serde_json::Value,
        now: Timestamp,
    ) -> impl std::future::Future<Output = Result<(), EscrowError>> + Send;

    /// Mark a key `Failed` with the cached error response to replay on a
    /// retry with the same fingerprint.
    fn fail(
        &self,
        key: &str,
        response: serde_json::Value,
        now: Timestamp,
    ) -> impl std::future::Future<Output = Result<(), EscrowError>> + Send;
}

/// Storage key for a user's idempotency record: `idempotency:{user_id}:{key}`.
pub fn storage_key(user_id: &str, idempotency_key: &str) -> String {
    format!("idempotency:{user_id}:{idempotency_key}")
}

/// Short fingerprint of the operation name and its request params, used to
/// detect a caller reusing the same idempotency key for a different request.
pub fn request_fingerprint(operation: &str, params: &serde_json::Value) -> String {
    escrow_crypto::short_fingerprint(format!("{operation}:{params}").as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(v: serde_json::Value) -> String {
        request_fingerprint("create_withdrawal", &v)
    }

    #[tokio::test]
    async fn fresh_then_completed_round_trips() {
        let store = InMemoryStore::new();
        let key = storage_key("user-1", "key-1");
        let fp = params(serde_json::json!({"amount": 100}));
        let now = chrono::Utc::now();

        assert_eq!(store.begin(&key, &fp, now).await.unwrap(), Lookup::Fresh);
        assert_eq!(store.begin(&key, &fp, now).await.unwrap(), Lookup::InFlight);

        store.complete(&key, serde_json::json!({"ok": true}), now).await.unwrap();
        match store.begin(&key, &fp, now).await.unwrap() {
            Lookup::Completed(v) => assert_eq!(v, serde_json::json!({"ok": true})),
            other => panic!("expected Completed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn failed_request_replays_cached_error_on_same_fingerprint() {
        let store = InMemoryStore::new();
        let key = storage_key("user-1", "key-2");
        let fp = params(serde_json::json!({"amount": 100}));
        let now = chrono::Utc::now();

        store.begin(&key, &fp, now).await.unwrap();
        store.fail(&key, serde_json::json!({"error": "insufficient_balance"}), now).await.unwrap();

        match store.begin(&key, &fp, now).await.unwrap() {
            Lookup::Failed(v) => assert_eq!(v, serde_json::json!({"error": "insufficient_balance"})),
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn reused_key_with_different_fingerprint_is_rejected() {
        let store = InMemoryStore::new();
        let key = storage_key("user-1", "key-3");
        let now = chrono::Utc::now();

        let fp_a = params(serde_json::json!({"amount": 100}));
        let fp_b = params(serde_json::json!({"amount": 200}));

        store.begin(&key, &fp_a, now).await.unwrap();
        store.complete(&key, serde_json::json!({"ok": true}), now).await.unwrap();

        assert_eq!(store.begin(&key, &fp_b, now).await.unwrap(), Lookup::KeyReused);
    }

    #[tokio::test]
    async fn stale_processing_entry_is_cleared_and_allowed() {
        let store = InMemoryStore::new();
        let key = storage_key("user-1", "key-4");
        let fp = params(serde_json::json!({"amount": 100}));
        let t0 = chrono::Utc::now();

        assert_eq!(store.begin(&key, &fp, t0).await.unwrap(), Lookup::Fresh);
        let t1 = t0 + chrono::Duration::seconds(31);
        assert_eq!(store.begin(&key, &fp, t1).await.unwrap(), Lookup::Fresh);
    }
}
