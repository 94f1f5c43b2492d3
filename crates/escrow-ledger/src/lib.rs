//! C1 — the double-entry ledger.
//!
//! A `LedgerJournal` groups one or more `LedgerEntry` rows that must sum to
//! zero (debits == credits). Journals are immutable and
//! idempotent: replaying the same `idempotency_key` returns the original
//! journal rather than creating a duplicate.

use escrow_core::domain::LedgerJournal;
use escrow_core::error::EscrowError;
use escrow_core::types::{EntryDirection, JournalId, LedgerAccountId, MinorUnits, Timestamp};
use escrow_state::StateDb;
use tracing::{info, warn};

/// One side of a journal: which account, which direction, how much.
#[derive(Debug, Clone, Copy)]
pub struct JournalLeg {
    pub account_id: LedgerAccountId,
    pub direction: EntryDirection,
    pub amount_minor: MinorUnits,
}

impl JournalLeg {
    pub fn debit(account_id: LedgerAccountId, amount_minor: MinorUnits) -> Self {
        Self {
            account_id,
            direction: EntryDirection::Debit,
            amount_minor,
        }
    }

    pub fn credit(account_id: LedgerAccountId, amount_minor: MinorUnits) -> Self {
        Self {
            account_id,
            direction: EntryDirection::Credit,
            amount_minor,
        }
    }
}

/// Create a balanced journal from a set of legs. Idempotent on
/// `idempotency_key`: a second call with the same key and already-committed
/// journal returns the original journal unchanged without re-applying it.
pub fn create_journal(
    db: &StateDb,
    idempotency_key: &str,
    description: &str,
    legs: &[JournalLeg],
    now: Timestamp,
) -> Result<LedgerJournal, EscrowError> {
    if let Some(existing) = db.find_journal_by_idempotency_key(idempotency_key)? {
        info!(journal_id = %existing.id, %idempotency_key, "journal already committed, returning existing");
        return Ok(existing);
    }

    if legs.is_empty() {
        return Err(EscrowError::InvalidInput("journal must have at least one leg".into()));
    }
    for leg in legs {
        if leg.amount_minor <= 0 {
            return Err(EscrowError::InvalidAmount(format!(
                "leg amount must be positive, got {}",
                leg.amount_minor
            )));
        }
    }

    let total_debits: i128 = legs
        .iter()
        .filter(|l| l.direction == EntryDirection::Debit)
        .map(|l| l.amount_minor as i128)
        .sum();
    let total_credits: i128 = legs
        .iter()
        .filter(|l| l.direction == EntryDirection::Credit)
        .map(|l| l.amount_minor as i128)
        .sum();
    if total_debits != total_credits {
        return Err(EscrowError::JournalImbalance(format!(
            "debits={total_debits} credits={total_credits}"
        )));
    }

    for leg in legs {
        if db.get_ledger_account(&leg.account_id)?.is_none() {
            return Err(EscrowError::LedgerAccountNotFound(leg.account_id.to_string()));
        }
    }

    let journal = LedgerJournal {
        id: JournalId::new(),
        idempotency_key: idempotency_key.to_string(),
        description: description.to_string(),
        created_at: now,
    };

    // The running balance/sequence per account is read, advanced and
    // written entirely inside `commit_journal`'s transaction, so two
    // journals touching the same account can't both read a stale balance
    // and stomp on each other's result.
    let raw_legs: Vec<(LedgerAccountId, EntryDirection, MinorUnits)> =
        legs.iter().map(|l| (l.account_id, l.direction, l.amount_minor)).collect();

    db.commit_journal(&journal, &raw_legs, now)?;
    info!(journal_id = %journal.id, legs = legs.len(), "journal committed");
    Ok(journal)
}

/// Current running balance for a ledger account.
pub fn get_account_balance(db: &StateDb, account_id: &LedgerAccountId) -> Result<MinorUnits, EscrowError> {
    Ok(db.get_account_balance_state(account_id)?.0)
}

// ── Typed convenience forms ───────────────────────────────────────────────────

pub fn record_deposit(
    db: &StateDb,
    provider_float_account: LedgerAccountId,
    wallet_account: LedgerAccountId,
    amount_minor: MinorUnits,
    idempotency_key: &str,
    now: Timestamp,
) -> Result<LedgerJournal, EscrowError> {
    create_journal(
        db,
        idempotency_key,
        "deposit",
        &[
            JournalLeg::debit(provider_float_account, amount_minor),
            JournalLeg::credit(wallet_account, amount_minor),
        ],
        now,
    )
}

pub fn record_withdrawal(
    db: &StateDb,
    wallet_account: LedgerAccountId,
    provider_float_account: LedgerAccountId,
    amount_minor: MinorUnits,
    idempotency_key: &str,
    now: Timestamp,
) -> Result<LedgerJournal, EscrowError> {
    create_journal(
        db,
        idempotency_key,
        "withdrawal",
        &[
            JournalLeg::debit(wallet_account, amount_minor),
            JournalLeg::credit(provider_float_account, amount_minor),
        ],
        now,
    )
}

pub fn record_escrow_hold(
    db: &StateDb,
    buyer_wallet_account: LedgerAccountId,
    escrow_holding_account: LedgerAccountId,
    amount_minor: MinorUnits,
    idempotency_key: &str,
    now: Timestamp,
) -> Result<LedgerJournal, EscrowError> {
    create_journal(
        db,
        idempotency_key,
        "escrow_hold",
        &[
            JournalLeg::debit(buyer_wallet_account, amount_minor),
            JournalLeg::credit(escrow_holding_account, amount_minor),
        ],
        now,
    )
}

/// Release escrowed funds to the seller, optionally skimming a platform fee.
pub fn record_escrow_release(
    db: &StateDb,
    escrow_holding_account: LedgerAccountId,
    seller_wallet_account: LedgerAccountId,
    platform_fees_account: LedgerAccountId,
    amount_minor: MinorUnits,
    fee_minor: MinorUnits,
    idempotency_key: &str,
    now: Timestamp,
) -> Result<LedgerJournal, EscrowError> {
    if fee_minor < 0 || fee_minor > amount_minor {
        return Err(EscrowError::InvalidAmount(format!(
            "fee {fee_minor} out of range for release of {amount_minor}"
        )));
    }
    let net = amount_minor - fee_minor;
    let mut legs = vec![JournalLeg::debit(escrow_holding_account, amount_minor)];
    if net > 0 {
        legs.push(JournalLeg::credit(seller_wallet_account, net));
    }
    if fee_minor > 0 {
        legs.push(JournalLeg::credit(platform_fees_account, fee_minor));
    }
    create_journal(db, idempotency_key, "escrow_release", &legs, now)
}

pub fn record_escrow_refund(
    db: &StateDb,
    escrow_holding_account: LedgerAccountId,
    buyer_wallet_account: LedgerAccountId,
    amount_minor: MinorUnits,
    idempotency_key: &str,
    now: Timestamp,
) -> Result<LedgerJournal, EscrowError> {
    create_journal(
        db,
        idempotency_key,
        "escrow_refund",
        &[
            JournalLeg::debit(escrow_holding_account, amount_minor),
            JournalLeg::credit(buyer_wallet_account, amount_minor),
        ],
        now,
    )
}

/// Split a disputed escrow hold between buyer and seller.
/// 2-4 entries depending on which of the three distributions are nonzero:
/// one debit against the hold, plus a credit each for whichever of buyer
/// refund, seller payout, and platform fee is > 0.
pub fn record_dispute_resolution(
    db: &StateDb,
    escrow_holding_account: LedgerAccountId,
    buyer_wallet_account: LedgerAccountId,
    seller_wallet_account: LedgerAccountId,
    platform_fees_account: LedgerAccountId,
    to_buyer_minor: MinorUnits,
    to_seller_minor: MinorUnits,
    platform_fee_minor: MinorUnits,
    idempotency_key: &str,
    now: Timestamp,
) -> Result<LedgerJournal, EscrowError> {
    let total = to_buyer_minor + to_seller_minor + platform_fee_minor;
    if total <= 0 {
        return Err(EscrowError::InvalidAmount("dispute split total must be positive".into()));
    }
    let mut legs = vec![JournalLeg::debit(escrow_holding_account, total)];
    if to_buyer_minor > 0 {
        legs.push(JournalLeg::credit(buyer_wallet_account, to_buyer_minor));
    }
    if to_seller_minor > 0 {
        legs.push(JournalLeg::credit(seller_wallet_account, to_seller_minor));
    }
    if platform_fee_minor > 0 {
        legs.push(JournalLeg::credit(platform_fees_account, platform_fee_minor));
    }
    create_journal(db, idempotency_key, "dispute_resolution", &legs, now)
}

// ── Integrity checks ──────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct BalanceReport {
    pub journals_checked: u64,
    pub imbalanced_journal_ids: Vec<JournalId>,
}

/// Scan every journal and confirm its entries sum to zero.
pub fn verify_all_journals_balanced(db: &StateDb) -> Result<BalanceReport, EscrowError> {
    let mut report = BalanceReport::default();
    for journal in db.iter_all_journals()? {
        report.journals_checked += 1;
        let entries = db.iter_entries_for_journal(&journal.id)?;
        let mut net: i128 = 0;
        for e in &entries {
            net += match e.direction {
                EntryDirection::Credit => e.amount_minor as i128,
                EntryDirection::Debit => -(e.amount_minor as i128),
            };
        }
        if net != 0 {
            warn!(journal_id = %journal.id, net, "journal does not balance");
            report.imbalanced_journal_ids.push(journal.id);
        }
    }
    Ok(report)
}

/// Confirm the sum of every ledger account's running balance is zero —
/// every credit has a matching debit somewhere in the chart of accounts.
pub fn verify_platform_balance(db: &StateDb) -> Result<MinorUnits, EscrowError> {
    let mut total: i128 = 0;
    for account in db.iter_ledger_accounts()? {
        total += get_account_balance(db, &account.id)? as i128;
    }
    if total != 0 {
        warn!(total, "platform balance does not sum to zero");
        return Err(EscrowError::LedgerInvariantViolation(format!(
            "platform balance is {total}, expected 0"
        )));
    }
    Ok(0)
}
