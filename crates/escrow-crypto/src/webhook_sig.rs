//! Webhook signature verification, one scheme per provider.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256, Sha512};
use subtle::ConstantTimeEq;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
    #[error("malformed signature header")]
    Malformed,
}

/// Midtrans's scheme: `SHA512(order_id + status_code + gross_amount + server_key)`,
/// compared case-insensitively to the `signature_key` field of the payload.
pub fn verify_midtrans(
    order_id: &str,
    status_code: &str,
    gross_amount: &str,
    server_key: &str,
    provided_signature: &str,
) -> bool {
    let mut hasher = Sha512::new();
    hasher.update(order_id.as_bytes());
    hasher.update(status_code.as_bytes());
    hasher.update(gross_amount.as_bytes());
    hasher.update(server_key.as_bytes());
    let expected = hex::encode(hasher.finalize());
    constant_time_eq_str(&expected, &provided_signature.to_lowercase())
}

/// Generic `X-Signature: hex(HMAC-SHA256(body, secret))` scheme used by
/// providers without a bespoke format.
pub fn verify_hmac_sha256(body: &[u8], secret: &str, provided_signature: &str) -> bool {
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    let expected = hex::encode(mac.finalize().into_bytes());
    constant_time_eq_str(&expected, provided_signature)
}

fn constant_time_eq_str(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// Dispatch signature verification by provider name.
pub fn verify_signature(
    provider: &str,
    body: &[u8],
    server_key: &str,
    provided_signature: &str,
    midtrans_fields: Option<(&str, &str, &str)>,
) -> Result<bool, SignatureError> {
    match provider {
        "midtrans" => {
            let (order_id, status_code, gross_amount) =
                midtrans_fields.ok_or(SignatureError::Malformed)?;
            Ok(verify_midtrans(
                order_id,
                status_code,
                gross_amount,
                server_key,
                provided_signature,
            ))
        }
        "generic" | "xendit" | "doku" => {
            Ok(verify_hmac_sha256(body, server_key, provided_signature))
        }
        other => Err(SignatureError::UnknownProvider(other.to_string())),
    }
}

/// Not every log sink redacts consistently — used by `escrow-webhook` to
/// fingerprint a payload for the `WebhookEvent.event_id` dedup key when a
/// provider omits one.
pub fn payload_event_id(body: &[u8]) -> String {
    hex::encode(Sha256::digest(body))
}
