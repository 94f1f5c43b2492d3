//! Primitive types shared across the escrow ledger crates.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Minor-unit money amount (e.g. cents). Always non-negative at rest;
/// signed so in-flight computations (debit - credit) can be checked for
/// overflow/underflow before being committed as an unsigned amount.
pub type MinorUnits = i64;

/// Wall-clock timestamp, UTC, second precision — matches the column type
/// every persisted entity uses.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

macro_rules! uuid_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn as_bytes(&self) -> [u8; 16] {
                *self.0.as_bytes()
            }

            pub fn from_bytes(bytes: [u8; 16]) -> Self {
                Self(Uuid::from_bytes(bytes))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }
    };
}

uuid_id!(UserId);
uuid_id!(WalletId);
uuid_id!(LedgerAccountId);
uuid_id!(JournalId);
uuid_id!(EntryId);
uuid_id!(OrderId);
uuid_id!(EscrowId);
uuid_id!(WithdrawalId);
uuid_id!(WebhookEventId);
uuid_id!(DisputeId);
uuid_id!(IdempotencyRecordId);
uuid_id!(BankAccountId);

/// KYC verification tier — gates withdrawal limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KycTier {
    None,
    Pending,
    Verified,
}

impl fmt::Display for KycTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            KycTier::None => "NONE",
            KycTier::Pending => "PENDING",
            KycTier::Verified => "VERIFIED",
        };
        write!(f, "{s}")
    }
}

/// Ledger entry direction. A journal's entries must sum to zero when
/// debits are read as negative and credits as positive (or vice versa) —
/// see `escrow_ledger::verify_all_journals_balanced`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryDirection {
    Debit,
    Credit,
}

/// The role of a ledger account within the platform's chart of accounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerAccountType {
    /// Mirrors a user's wallet — one per wallet.
    UserWallet,
    /// Funds currently held in escrow for in-flight orders.
    EscrowHolding,
    /// Platform fee revenue.
    PlatformFees,
    /// Float held with a payment provider (for webhook-originated credits).
    ProviderFloat,
    /// Operational reserve / rounding buffer.
    Reserve,
}
