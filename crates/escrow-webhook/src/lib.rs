//! C5 — webhook ingestion: provider payment notifications are always
//! persisted before their signature is checked (so a forged or malformed
//! request still leaves an audit trail), deduplicated by provider+event_id,
//! and retried internally up to a bounded attempt count.
//!
//! The ingestion layer never tells the provider "no" — callers always ack
//! with 200 once `ingest` returns `Ok`, even if the signature failed or the
//! business effect could not be applied; provider retry semantics are
//! coarser than ours and re-delivering a rejected event rarely helps.

use escrow_core::constants::{WEBHOOK_MAX_RETRIES, WEBHOOK_REPLAY_WINDOW_SECS, WEBHOOK_RETRY_BACKOFF_BASE_SECS};
use escrow_core::domain::{WebhookEvent, WebhookEventStatus};
use escrow_core::error::EscrowError;
use escrow_core::types::{Timestamp, WebhookEventId};
use escrow_crypto::redact::redact_headers;
use escrow_crypto::webhook_sig::{payload_event_id, verify_signature};
use escrow_state::StateDb;
use tracing::{info, warn};

/// Everything needed to verify and persist one inbound webhook delivery.
pub struct Delivery<'a> {
    pub provider: &'a str,
    pub body: &'a [u8],
    pub headers: serde_json::Value,
    pub server_key: &'a str,
    pub provided_signature: &'a str,
    /// (order_id, status_code, gross_amount) — required for the Midtrans scheme.
    pub midtrans_fields: Option<(&'a str, &'a str, &'a str)>,
    /// Caller-supplied event id, if the provider puts one in the payload;
    /// falls back to a content hash (`payload_event_id`) if absent.
    pub event_id: Option<&'a str>,
    pub request_ip: Option<&'a str>,
    /// Optional `x-timestamp` header, unix seconds as a string. Checked
    /// against a 5-minute window for replay protection when present;
    /// providers that don't send it are unaffected.
    pub timestamp_header: Option<&'a str>,
}

/// Business effect to apply once a delivery's signature has verified —
/// e.g. crediting a wallet's ledger account for a confirmed payment.
/// Implemented by the caller so this crate stays agnostic of what a given
/// provider event actually means.
pub type ApplyEffect<'a> = dyn FnOnce(&serde_json::Value) -> Result<(), EscrowError> + 'a;

/// Ingest one webhook delivery: persist-then-verify-then-apply, idempotent
/// on (provider, event_id).
pub fn ingest(db: &StateDb, delivery: Delivery<'_>, apply: &ApplyEffect<'_>, now: Timestamp) -> Result<WebhookEvent, EscrowError> {
    let event_id = delivery
        .event_id
        .map(str::to_string)
        .unwrap_or_else(|| payload_event_id(delivery.body));

    if let Some(existing) = db.find_webhook_event(delivery.provider, &event_id)? {
        info!(provider = delivery.provider, %event_id, "webhook already seen, skipping re-application");
        return Ok(existing);
    }

    let payload: serde_json::Value = serde_json::from_slice(delivery.body).unwrap_or(serde_json::Value::Null);

    let mut event = WebhookEvent {
        id: WebhookEventId::new(),
        provider: delivery.provider.to_string(),
        event_id: event_id.clone(),
        signature_valid: false,
        payload: payload.clone(),
        redacted_headers: redact_headers(&delivery.headers),
        request_ip: delivery.request_ip.map(str::to_string),
        status: WebhookEventStatus::Received,
        attempts: 0,
        last_error: None,
        created_at: now,
        processed_at: None,
    };
    // Persist the raw delivery before trusting anything about it.
    db.put_webhook_event(&event)?;

    let sig_ok = verify_signature(
        delivery.provider,
        delivery.body,
        delivery.server_key,
        delivery.provided_signature,
        delivery.midtrans_fields,
    )
    .unwrap_or(false);
    event.signature_valid = sig_ok;

    if !sig_ok {
        event.status = WebhookEventStatus::Failed;
        event.last_error = Some("signature verification failed".to_string());
        warn!(provider = delivery.provider, %event_id, "webhook signature invalid");
        db.put_webhook_event(&event)?;
        return Ok(event);
    }

    if !within_replay_window(delivery.timestamp_header, now) {
        event.status = WebhookEventStatus::Failed;
        event.last_error = Some("x-timestamp outside the replay protection window".to_string());
        warn!(provider = delivery.provider, %event_id, "webhook timestamp outside replay window");
        db.put_webhook_event(&event)?;
        return Ok(event);
    }

    apply_and_record(db, &mut event, &payload, apply, now)?;
    Ok(event)
}

/// Re-attempt a `Retrying` event. Used by the scheduler's webhook retry
/// sweep.
pub fn retry(db: &StateDb, event: &mut WebhookEvent, apply: &ApplyEffect<'_>, now: Timestamp) -> Result<(), EscrowError> {
    if event.status != WebhookEventStatus::Retrying {
        return Ok(());
    }
    let payload = event.payload.clone();
    apply_and_record(db, event, &payload, apply, now)
}

fn apply_and_record(
    db: &StateDb,
    event: &mut WebhookEvent,
    payload: &serde_json::Value,
    apply: &ApplyEffect<'_>,
    now: Timestamp,
) -> Result<(), EscrowError> {
    match apply(payload) {
        Ok(()) => {
            event.status = WebhookEventStatus::Processed;
            event.processed_at = Some(now);
            event.last_error = None;
            info!(provider = %event.provider, event_id = %event.event_id, "webhook applied");
        }
        Err(e) => {
            event.attempts += 1;
            event.last_error = Some(e.to_string());
            event.status = if event.attempts >= WEBHOOK_MAX_RETRIES {
                WebhookEventStatus::Failed
            } else {
                WebhookEventStatus::Retrying
            };
            warn!(
                provider = %event.provider,
                event_id = %event.event_id,
                attempts = event.attempts,
                error = %e,
                "webhook effect failed"
            );
        }
    }
    db.put_webhook_event(event)?;
    Ok(())
}

/// `true` if the delivery has no timestamp header (the check is optional —
/// not every provider sends one) or its timestamp falls within
/// `WEBHOOK_REPLAY_WINDOW_SECS` of `now` on either side.
fn within_replay_window(timestamp_header: Option<&str>, now: Timestamp) -> bool {
    let Some(raw) = timestamp_header else {
        return true;
    };
    let Ok(ts) = raw.parse::<i64>() else {
        return false;
    };
    let Some(sent_at) = chrono::DateTime::<chrono::Utc>::from_timestamp(ts, 0) else {
        return false;
    };
    (now - sent_at).num_seconds().abs() <= WEBHOOK_REPLAY_WINDOW_SECS
}

/// Backoff before the next retry attempt, given how many have already run.
pub fn retry_backoff_secs(attempts: u32) -> i64 {
    WEBHOOK_RETRY_BACKOFF_BASE_SECS * (1i64 << attempts.min(10))
}

/// Events ready to be retried by the scheduler sweep.
pub fn events_pending_retry(db: &StateDb) -> Result<Vec<WebhookEvent>, EscrowError> {
    db.iter_webhook_events_for_retry()
}

#[cfg(test)]
mod tests {
    use super::*;
    use escrow_crypto::webhook_sig::verify_hmac_sha256;

    fn sign(body: &[u8], secret: &str) -> String {
        use hmac::{Hmac, Mac};
        use sha2::Sha256;
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn valid_signature_applies_and_marks_processed() {
        let db = StateDb::open_temporary().unwrap();
        let now = chrono::Utc::now();
        let body = br#"{"order_id":"o-1","status":"paid"}"#;
        let secret = "topsecret";
        let sig = sign(body, secret);
        assert!(verify_hmac_sha256(body, secret, &sig));

        let applied = std::cell::Cell::new(false);
        let apply: Box<ApplyEffect> = Box::new(|_payload| {
            applied.set(true);
            Ok(())
        });

        let delivery = Delivery {
            provider: "generic",
            body,
            headers: serde_json::json!({"authorization": "Bearer abc", "x-foo": "bar"}),
            server_key: secret,
            provided_signature: &sig,
            midtrans_fields: None,
            event_id: Some("evt-1"),
            request_ip: Some("203.0.113.9"),
            timestamp_header: None,
        };
        let event = ingest(&db, delivery, apply.as_ref(), now).unwrap();
        assert!(event.signature_valid);
        assert_eq!(event.status, WebhookEventStatus::Processed);
        assert!(applied.get());
        assert_eq!(
            event.redacted_headers.get("authorization").unwrap().as_str().unwrap(),
            "[REDACTED]"
        );
    }

    #[test]
    fn invalid_signature_is_persisted_but_not_applied() {
        let db = StateDb::open_temporary().unwrap();
        let now = chrono::Utc::now();
        let body = br#"{"order_id":"o-2"}"#;

        let apply: Box<ApplyEffect> = Box::new(|_| panic!("must not be called"));
        let delivery = Delivery {
            provider: "generic",
            body,
            headers: serde_json::json!({}),
            server_key: "topsecret",
            provided_signature: "deadbeef",
            midtrans_fields: None,
            event_id: Some("evt-2"),
            request_ip: None,
            timestamp_header: None,
        };
        let event = ingest(&db, delivery, apply.as_ref(), now).unwrap();
        assert!(!event.signature_valid);
        assert_eq!(event.status, WebhookEventStatus::Failed);
    }

    #[test]
    fn duplicate_event_id_is_not_reapplied() {
        let db = StateDb::open_temporary().unwrap();
        let now = chrono::Utc::now();
        let body = br#"{"order_id":"o-3"}"#;
        let secret = "topsecret";
        let sig = sign(body, secret);

        let count = std::cell::Cell::new(0);
        for _ in 0..2 {
            let apply: Box<ApplyEffect> = Box::new(|_| {
                count.set(count.get() + 1);
                Ok(())
            });
            let delivery = Delivery {
                provider: "generic",
                body,
                headers: serde_json::json!({}),
                server_key: secret,
                provided_signature: &sig,
                midtrans_fields: None,
                event_id: Some("evt-3"),
                request_ip: None,
                timestamp_header: None,
            };
            ingest(&db, delivery, apply.as_ref(), now).unwrap();
        }
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn stale_timestamp_header_is_rejected_even_with_a_valid_signature() {
        let db = StateDb::open_temporary().unwrap();
        let now = chrono::Utc::now();
        let body = br#"{"order_id":"o-4"}"#;
        let secret = "topsecret";
        let sig = sign(body, secret);

        let apply: Box<ApplyEffect> = Box::new(|_| panic!("must not be called"));
        let stale = (now - chrono::Duration::minutes(10)).timestamp().to_string();
        let delivery = Delivery {
            provider: "generic",
            body,
            headers: serde_json::json!({}),
            server_key: secret,
            provided_signature: &sig,
            midtrans_fields: None,
            event_id: Some("evt-4"),
            request_ip: None,
            timestamp_header: Some(&stale),
        };
        let event = ingest(&db, delivery, apply.as_ref(), now).unwrap();
        assert_eq!(event.status, WebhookEventStatus::Failed);
        assert!(event.signature_valid, "signature itself was fine, only the timestamp was stale");
    }

    #[test]
    fn fresh_timestamp_header_within_window_is_accepted() {
        let db = StateDb::open_temporary().unwrap();
        let now = chrono::Utc::now();
        let body = br#"{"order_id":"o-5"}"#;
        let secret = "topsecret";
        let sig = sign(body, secret);

        let applied = std::cell::Cell::new(false);
        let apply: Box<ApplyEffect> = Box::new(|_| {
            applied.set(true);
            Ok(())
        });
        let fresh = (now - chrono::Duration::minutes(2)).timestamp().to_string();
        let delivery = Delivery {
            provider: "generic",
            body,
            headers: serde_json::json!({}),
            server_key: secret,
            provided_signature: &sig,
            midtrans_fields: None,
            event_id: Some("evt-5"),
            request_ip: None,
            timestamp_header: Some(&fresh),
        };
        let event = ingest(&db, delivery, apply.as_ref(), now).unwrap();
        assert_eq!(event.status, WebhookEventStatus::Processed);
        assert!(applied.get());
    }
}
