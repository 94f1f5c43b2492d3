//! Bootstraps a fresh `StateDb` with the platform-owned chart of accounts
//! and the default tiered transaction limits, the two things the
//! engine needs in place before its first order can be created.
//!
//! This writes directly into the db, bypassing the normal wallet/ledger
//! engines — there is no wallet to debit yet, so there is nothing for
//! those engines to enforce. Run once per deployment; re-running against
//! an already-bootstrapped db is a no-op that returns the existing chart.

use escrow_core::domain::LedgerAccount;
use escrow_core::error::EscrowError;
use escrow_core::types::{KycTier, LedgerAccountId, LedgerAccountType};
use escrow_state::StateDb;
use serde::{Deserialize, Serialize};
use tracing::info;

const GENESIS_META_KEY: &str = "genesis_applied";

/// Currency this deployment settles in. Every platform-owned ledger account
/// genesis creates shares it; per-user wallets are free to use others, but
/// nothing in this codebase exercises multi-currency settlement yet.
pub const PLATFORM_CURRENCY: &str = "IDR";

/// The platform's fixed chart of accounts — one ledger account per
/// `LedgerAccountType` that isn't `UserWallet` (those are created
/// per-wallet, not at genesis).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PlatformAccounts {
    pub escrow_holding: LedgerAccountId,
    pub platform_fees: LedgerAccountId,
    pub provider_float: LedgerAccountId,
    pub reserve: LedgerAccountId,
}

/// Seed the platform chart of accounts and default transaction limits.
/// Returns the existing chart untouched if genesis already ran.
pub fn apply_genesis(db: &StateDb) -> Result<PlatformAccounts, EscrowError> {
    if let Some(existing) = load_platform_accounts(db)? {
        info!("genesis already applied, returning existing chart of accounts");
        return Ok(existing);
    }

    info!("applying genesis: seeding chart of accounts and transaction limits");

    let accounts = PlatformAccounts {
        escrow_holding: LedgerAccountId::new(),
        platform_fees: LedgerAccountId::new(),
        provider_float: LedgerAccountId::new(),
        reserve: LedgerAccountId::new(),
    };

    for (id, kind) in [
        (accounts.escrow_holding, LedgerAccountType::EscrowHolding),
        (accounts.platform_fees, LedgerAccountType::PlatformFees),
        (accounts.provider_float, LedgerAccountType::ProviderFloat),
        (accounts.reserve, LedgerAccountType::Reserve),
    ] {
        db.put_ledger_account(&LedgerAccount {
            id,
            account_type: kind,
            owner_wallet_id: None,
            currency: PLATFORM_CURRENCY.to_string(),
        })?;
    }
    info!("genesis: platform chart of accounts created");

    for tier in [KycTier::None, KycTier::Pending, KycTier::Verified] {
        let limit = escrow_withdrawal::limits::default_limit_for_tier(tier);
        db.put_transaction_limit(&limit)?;
    }
    info!("genesis: default transaction limits seeded for all KYC tiers");

    save_platform_accounts(db, &accounts)?;
    db.flush()?;
    info!("genesis state committed");

    Ok(accounts)
}

fn load_platform_accounts(db: &StateDb) -> Result<Option<PlatformAccounts>, EscrowError> {
    match db.get_meta(GENESIS_META_KEY)? {
        Some(bytes) => Ok(Some(
            serde_json::from_slice(&bytes).map_err(|e| EscrowError::Serialization(e.to_string()))?,
        )),
        None => Ok(None),
    }
}

fn save_platform_accounts(db: &StateDb, accounts: &PlatformAccounts) -> Result<(), EscrowError> {
    let bytes = serde_json::to_vec(accounts).map_err(|e| EscrowError::Serialization(e.to_string()))?;
    db.put_meta(GENESIS_META_KEY, &bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use escrow_core::types::KycTier;

    #[test]
    fn genesis_seeds_chart_of_accounts_and_limits() {
        let db = StateDb::open_temporary().unwrap();
        let accounts = apply_genesis(&db).unwrap();

        let fees = db.get_ledger_account(&accounts.platform_fees).unwrap().unwrap();
        assert_eq!(fees.account_type, LedgerAccountType::PlatformFees);
        assert_eq!(fees.currency, PLATFORM_CURRENCY);
        assert!(fees.owner_wallet_id.is_none());

        let limit = db.get_transaction_limit(KycTier::Verified).unwrap().unwrap();
        assert!(limit.daily_limit_minor > 0);
    }

    #[test]
    fn re_running_genesis_is_a_no_op() {
        let db = StateDb::open_temporary().unwrap();
        let first = apply_genesis(&db).unwrap();
        let second = apply_genesis(&db).unwrap();
        assert_eq!(first.escrow_holding.0, second.escrow_holding.0);
    }
}
