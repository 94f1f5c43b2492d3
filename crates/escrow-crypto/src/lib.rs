pub mod hash;
pub mod redact;
pub mod webhook_sig;

pub use hash::{reconciliation_hash, sha256_hex, short_fingerprint};
pub use webhook_sig::{verify_signature, SignatureError};
