use sha2::{Digest, Sha256};

/// SHA-256 of arbitrary bytes, hex-encoded.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Deterministic reconciliation hash over a journal's canonical entry list —
/// used by the scheduler's reconciliation sweep to detect drift
/// without re-summing every entry on every run.
pub fn reconciliation_hash(parts: &[String]) -> String {
    let mut hasher = Sha256::new();
    for p in parts {
        hasher.update(p.as_bytes());
        hasher.update(b"|");
    }
    hex::encode(hasher.finalize())
}

/// Short (16 hex char) fingerprint used as an idempotency cache key.
/// Truncating a SHA-256 digest is safe here: collisions only cost a
/// spurious idempotency hit, not a security boundary.
pub fn short_fingerprint(data: &[u8]) -> String {
    let full = sha256_hex(data);
    full[..16].to_string()
}
