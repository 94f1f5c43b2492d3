use std::path::Path;

use escrow_core::domain::*;
use escrow_core::error::EscrowError;
use escrow_core::types::*;

/// Persistent state database backed by sled (pure-Rust, embedded, no C deps).
///
/// Named trees:
///   users                — UserId bytes        → bincode(User)
///   bank_accounts        — BankAccountId bytes → bincode(BankAccount)
///   wallets              — WalletId bytes       → bincode(Wallet)
///   ledger_accounts      — LedgerAccountId bytes → bincode(LedgerAccount)
///   ledger_journals      — JournalId bytes      → bincode(LedgerJournal)
///   ledger_journal_idem  — idempotency_key utf8 → JournalId bytes (dedup index)
///   withdrawal_idem      — idempotency_key utf8 → WithdrawalId bytes (dedup index)
///   ledger_entries       — (account_id || be_u64 seq) → bincode(LedgerEntry)
///   account_balances     — LedgerAccountId bytes → bincode((i64 balance, u64 next_seq))
///   orders               — OrderId bytes        → bincode(Order)
///   escrows              — EscrowId bytes       → bincode(EscrowHold)
///   withdrawals          — WithdrawalId bytes   → bincode(Withdrawal)
///   velocity_log         — (user_id || be_i64 ts) → bincode(WithdrawalVelocityLog)
///   transaction_limits   — kyc_tier discriminant byte → bincode(TransactionLimit)
///   webhook_events       — (provider || event_id) utf8 → bincode(WebhookEvent)
///   disputes             — DisputeId bytes      → bincode(Dispute)
///   idempotency          — fingerprint utf8      → bincode(IdempotencyRecord)
///   scheduler_locks      — task name utf8        → bincode((String holder, i64 expires_at))
///   meta                 — utf8 key               → raw bytes
pub struct StateDb {
    _db: sled::Db,
    pub(crate) users: sled::Tree,
    pub(crate) bank_accounts: sled::Tree,
    pub(crate) wallets: sled::Tree,
    pub(crate) ledger_accounts: sled::Tree,
    pub(crate) ledger_journals: sled::Tree,
    pub(crate) ledger_journal_idem: sled::Tree,
    pub(crate) withdrawal_idem: sled::Tree,
    pub(crate) ledger_entries: sled::Tree,
    pub(crate) ledger_entries_by_journal: sled::Tree,
    pub(crate) account_balances: sled::Tree,
    pub(crate) orders: sled::Tree,
    pub(crate) escrows: sled::Tree,
    pub(crate) withdrawals: sled::Tree,
    pub(crate) velocity_log: sled::Tree,
    pub(crate) transaction_limits: sled::Tree,
    pub(crate) webhook_events: sled::Tree,
    pub(crate) disputes: sled::Tree,
    pub(crate) idempotency: sled::Tree,
    pub(crate) scheduler_locks: sled::Tree,
    pub(crate) meta: sled::Tree,
}

fn storage_err(e: impl ToString) -> EscrowError {
    EscrowError::Storage(e.to_string())
}

fn ser_err(e: impl ToString) -> EscrowError {
    EscrowError::Serialization(e.to_string())
}

impl StateDb {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, EscrowError> {
        let db = sled::open(path).map_err(storage_err)?;
        macro_rules! tree {
            ($name:literal) => {
                db.open_tree($name).map_err(storage_err)?
            };
        }
        Ok(Self {
            users: tree!("users"),
            bank_accounts: tree!("bank_accounts"),
            wallets: tree!("wallets"),
            ledger_accounts: tree!("ledger_accounts"),
            ledger_journals: tree!("ledger_journals"),
            ledger_journal_idem: tree!("ledger_journal_idem"),
            withdrawal_idem: tree!("withdrawal_idem"),
            ledger_entries: tree!("ledger_entries"),
            ledger_entries_by_journal: tree!("ledger_entries_by_journal"),
            account_balances: tree!("account_balances"),
            orders: tree!("orders"),
            escrows: tree!("escrows"),
            withdrawals: tree!("withdrawals"),
            velocity_log: tree!("velocity_log"),
            transaction_limits: tree!("transaction_limits"),
            webhook_events: tree!("webhook_events"),
            disputes: tree!("disputes"),
            idempotency: tree!("idempotency"),
            scheduler_locks: tree!("scheduler_locks"),
            meta: tree!("meta"),
            _db: db,
        })
    }

    /// In-memory sled instance, for unit/integration tests.
    pub fn open_temporary() -> Result<Self, EscrowError> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(storage_err)?;
        macro_rules! tree {
            ($name:literal) => {
                db.open_tree($name).map_err(storage_err)?
            };
        }
        Ok(Self {
            users: tree!("users"),
            bank_accounts: tree!("bank_accounts"),
            wallets: tree!("wallets"),
            ledger_accounts: tree!("ledger_accounts"),
            ledger_journals: tree!("ledger_journals"),
            ledger_journal_idem: tree!("ledger_journal_idem"),
            withdrawal_idem: tree!("withdrawal_idem"),
            ledger_entries: tree!("ledger_entries"),
            ledger_entries_by_journal: tree!("ledger_entries_by_journal"),
            account_balances: tree!("account_balances"),
            orders: tree!("orders"),
            escrows: tree!("escrows"),
            withdrawals: tree!("withdrawals"),
            velocity_log: tree!("velocity_log"),
            transaction_limits: tree!("transaction_limits"),
            webhook_events: tree!("webhook_events"),
            disputes: tree!("disputes"),
            idempotency: tree!("idempotency"),
            scheduler_locks: tree!("scheduler_locks"),
            meta: tree!("meta"),
            _db: db,
        })
    }

    pub fn flush(&self) -> Result<(), EscrowError> {
        self._db.flush().map_err(storage_err)?;
        Ok(())
    }

    // ── Users ─────────────────────────────────────────────────────────────
    pub fn get_user(&self, id: &UserId) -> Result<Option<User>, EscrowError> {
        match self.users.get(id.as_bytes()).map_err(storage_err)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes).map_err(ser_err)?)),
            None => Ok(None),
        }
    }

    pub fn put_user(&self, user: &User) -> Result<(), EscrowError> {
        let bytes = bincode::serialize(user).map_err(ser_err)?;
        self.users.insert(user.id.as_bytes(), bytes).map_err(storage_err)?;
        Ok(())
    }

    pub fn iter_users(&self) -> Result<Vec<User>, EscrowError> {
        let mut out = Vec::new();
        for item in self.users.iter() {
            let (_, bytes) = item.map_err(storage_err)?;
            out.push(bincode::deserialize(&bytes).map_err(ser_err)?);
        }
        Ok(out)
    }

    // ── Bank accounts ────────────────────────────────────────────────────
    pub fn get_bank_account(&self, id: &BankAccountId) -> Result<Option<BankAccount>, EscrowError> {
        match self.bank_accounts.get(id.as_bytes()).map_err(storage_err)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes).map_err(ser_err)?)),
            None => Ok(None),
        }
    }

    pub fn put_bank_account(&self, account: &BankAccount) -> Result<(), EscrowError> {
        let bytes = bincode::serialize(account).map_err(ser_err)?;
        self.bank_accounts
            .insert(account.id.as_bytes(), bytes)
            .map_err(storage_err)?;
        Ok(())
    }

    // ── Wallets ───────────────────────────────────────────────────────────
    pub fn get_wallet(&self, id: &WalletId) -> Result<Option<Wallet>, EscrowError> {
        match self.wallets.get(id.as_bytes()).map_err(storage_err)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes).map_err(ser_err)?)),
            None => Ok(None),
        }
    }

    /// Unconditional write — only safe for creation. Mutating writes must
    /// go through `cas_wallet` to preserve the optimistic-concurrency
    /// invariant.
    pub fn put_wallet(&self, wallet: &Wallet) -> Result<(), EscrowError> {
        let bytes = bincode::serialize(wallet).map_err(ser_err)?;
        self.wallets
            .insert(wallet.id.as_bytes(), bytes)
            .map_err(storage_err)?;
        Ok(())
    }

    /// Compare-and-swap a wallet row. `expected` must be the value read by
    /// the caller immediately prior; on mismatch (including concurrent
    /// deletion) returns `Ok(false)` and the caller retries.
    pub fn cas_wallet(&self, expected: &Wallet, new: &Wallet) -> Result<bool, EscrowError> {
        let expected_bytes = bincode::serialize(expected).map_err(ser_err)?;
        let new_bytes = bincode::serialize(new).map_err(ser_err)?;
        let result = self.wallets.compare_and_swap(
            new.id.as_bytes(),
            Some(expected_bytes),
            Some(new_bytes),
        );
        match result {
            Ok(Ok(())) => Ok(true),
            Ok(Err(_)) => Ok(false),
            Err(e) => Err(storage_err(e)),
        }
    }

    pub fn iter_wallets_for_user(&self, user_id: &UserId) -> Result<Vec<Wallet>, EscrowError> {
        let mut out = Vec::new();
        for item in self.wallets.iter() {
            let (_, bytes) = item.map_err(storage_err)?;
            let w: Wallet = bincode::deserialize(&bytes).map_err(ser_err)?;
            if w.user_id == *user_id {
                out.push(w);
            }
        }
        Ok(out)
    }

    /// Every wallet in the system — used by the scheduler's reconciliation
    /// sweep.
    pub fn iter_all_wallets(&self) -> Result<Vec<Wallet>, EscrowError> {
        let mut out = Vec::new();
        for item in self.wallets.iter() {
            let (_, bytes) = item.map_err(storage_err)?;
            out.push(bincode::deserialize(&bytes).map_err(ser_err)?);
        }
        Ok(out)
    }

    // ── Ledger accounts ───────────────────────────────────────────────────
    pub fn get_ledger_account(
        &self,
        id: &LedgerAccountId,
    ) -> Result<Option<LedgerAccount>, EscrowError> {
        match self.ledger_accounts.get(id.as_bytes()).map_err(storage_err)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes).map_err(ser_err)?)),
            None => Ok(None),
        }
    }

    pub fn put_ledger_account(&self, acc: &LedgerAccount) -> Result<(), EscrowError> {
        let bytes = bincode::serialize(acc).map_err(ser_err)?;
        self.ledger_accounts
            .insert(acc.id.as_bytes(), bytes)
            .map_err(storage_err)?;
        Ok(())
    }

    pub fn iter_ledger_accounts(&self) -> Result<Vec<LedgerAccount>, EscrowError> {
        let mut out = Vec::new();
        for item in self.ledger_accounts.iter() {
            let (_, bytes) = item.map_err(storage_err)?;
            out.push(bincode::deserialize(&bytes).map_err(ser_err)?);
        }
        Ok(out)
    }

    // ── Journals / entries ────────────────────────────────────────────────

    /// Look up a previously-committed journal by idempotency key, for dedup.
    pub fn find_journal_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<LedgerJournal>, EscrowError> {
        match self
            .ledger_journal_idem
            .get(key.as_bytes())
            .map_err(storage_err)?
        {
            Some(id_bytes) => {
                let mut arr = [0u8; 16];
                arr.copy_from_slice(&id_bytes);
                let id = JournalId::from_bytes(arr);
                self.get_journal(&id)
            }
            None => Ok(None),
        }
    }

    pub fn get_journal(&self, id: &JournalId) -> Result<Option<LedgerJournal>, EscrowError> {
        match self.ledger_journals.get(id.as_bytes()).map_err(storage_err)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes).map_err(ser_err)?)),
            None => Ok(None),
        }
    }

    /// The current running balance and next entry sequence number for a
    /// ledger account — the continuation point for the next entry.
    pub fn get_account_balance_state(
        &self,
        account_id: &LedgerAccountId,
    ) -> Result<(MinorUnits, u64), EscrowError> {
        match self
            .account_balances
            .get(account_id.as_bytes())
            .map_err(storage_err)?
        {
            Some(bytes) => bincode::deserialize(&bytes).map_err(ser_err),
            None => Ok((0, 0)),
        }
    }

    /// Atomically commit a journal: for each leg, reads the account's
    /// current running balance, advances it, and writes the journal row,
    /// every entry, and each touched account's new running-balance/sequence
    /// state — all inside a single sled transaction, so the read-advance-write
    /// of `account_balances` is covered by sled's conflict detection instead
    /// of racing with a concurrent journal against the same account.
    pub fn commit_journal(
        &self,
        journal: &LedgerJournal,
        legs: &[(LedgerAccountId, EntryDirection, MinorUnits)],
        now: Timestamp,
    ) -> Result<Vec<LedgerEntry>, EscrowError> {
        use sled::transaction::{ConflictableTransactionError, Transactional, TransactionError};
        use std::collections::HashMap;

        let journal_bytes = bincode::serialize(journal).map_err(ser_err)?;

        let result = (
            &self.ledger_journals,
            &self.ledger_entries,
            &self.account_balances,
        )
            .transaction(|(journals, entries_tree, balances_tree)| {
                let mut running: HashMap<LedgerAccountId, (MinorUnits, u64)> = HashMap::new();
                let mut entries = Vec::with_capacity(legs.len());

                for &(account_id, direction, amount_minor) in legs {
                    let (balance, seq) = match running.get(&account_id) {
                        Some(&state) => state,
                        None => match balances_tree.get(account_id.as_bytes())? {
                            Some(bytes) => bincode::deserialize(&bytes).map_err(|e| {
                                ConflictableTransactionError::Abort(EscrowError::Serialization(e.to_string()))
                            })?,
                            None => (0, 0),
                        },
                    };
                    let delta = match direction {
                        EntryDirection::Credit => amount_minor,
                        EntryDirection::Debit => -amount_minor,
                    };
                    let new_balance = balance.checked_add(delta).ok_or_else(|| {
                        ConflictableTransactionError::Abort(EscrowError::InvalidAmount(
                            "ledger balance overflow".into(),
                        ))
                    })?;
                    let new_seq = seq + 1;
                    running.insert(account_id, (new_balance, new_seq));

                    let entry = LedgerEntry {
                        id: EntryId::new(),
                        journal_id: journal.id,
                        account_id,
                        direction,
                        amount_minor,
                        running_balance_minor: new_balance,
                        sequence: new_seq,
                        created_at: now,
                    };

                    let mut key = account_id.as_bytes().to_vec();
                    key.extend_from_slice(&new_seq.to_be_bytes());
                    let entry_bytes = bincode::serialize(&entry).map_err(|e| {
                        ConflictableTransactionError::Abort(EscrowError::Serialization(e.to_string()))
                    })?;
                    entries_tree.insert(key, entry_bytes)?;
                    entries.push(entry);
                }

                for (account_id, (balance, seq)) in &running {
                    let bytes = bincode::serialize(&(*balance, *seq)).map_err(|e| {
                        ConflictableTransactionError::Abort(EscrowError::Serialization(e.to_string()))
                    })?;
                    balances_tree.insert(account_id.as_bytes().as_ref(), bytes)?;
                }

                journals.insert(journal.id.as_bytes().as_ref(), journal_bytes.clone())?;

                Ok::<Vec<LedgerEntry>, ConflictableTransactionError<EscrowError>>(entries)
            });

        let entries = match result {
            Ok(entries) => entries,
            Err(TransactionError::Abort(e)) => return Err(e),
            Err(TransactionError::Storage(e)) => return Err(storage_err(e)),
        };

        // Idempotency index and by-journal entry index are best-effort
        // secondary structures; the journal/entry rows above are the
        // source of truth and are what the atomic transaction protects.
        self.ledger_journal_idem
            .insert(journal.idempotency_key.as_bytes(), journal.id.as_bytes().to_vec())
            .map_err(storage_err)?;
        for (i, e) in entries.iter().enumerate() {
            let mut key = journal.id.as_bytes().to_vec();
            key.extend_from_slice(&(i as u64).to_be_bytes());
            self.ledger_entries_by_journal
                .insert(key, bincode::serialize(e).map_err(ser_err)?)
                .map_err(storage_err)?;
        }

        Ok(entries)
    }

    pub fn iter_entries_for_journal(
        &self,
        journal_id: &JournalId,
    ) -> Result<Vec<LedgerEntry>, EscrowError> {
        let mut out = Vec::new();
        for item in self.ledger_entries_by_journal.scan_prefix(journal_id.as_bytes()) {
            let (_, bytes) = item.map_err(storage_err)?;
            out.push(bincode::deserialize(&bytes).map_err(ser_err)?);
        }
        Ok(out)
    }

    pub fn iter_entries_for_account(
        &self,
        account_id: &LedgerAccountId,
    ) -> Result<Vec<LedgerEntry>, EscrowError> {
        let mut out = Vec::new();
        for item in self.ledger_entries.scan_prefix(account_id.as_bytes()) {
            let (_, bytes) = item.map_err(storage_err)?;
            out.push(bincode::deserialize(&bytes).map_err(ser_err)?);
        }
        Ok(out)
    }

    pub fn iter_all_journals(&self) -> Result<Vec<LedgerJournal>, EscrowError> {
        let mut out = Vec::new();
        for item in self.ledger_journals.iter() {
            let (_, bytes) = item.map_err(storage_err)?;
            out.push(bincode::deserialize(&bytes).map_err(ser_err)?);
        }
        Ok(out)
    }

    pub fn iter_all_entries(&self) -> Result<Vec<LedgerEntry>, EscrowError> {
        let mut out = Vec::new();
        for item in self.ledger_entries.iter() {
            let (_, bytes) = item.map_err(storage_err)?;
            out.push(bincode::deserialize(&bytes).map_err(ser_err)?);
        }
        Ok(out)
    }

    // ── Orders ────────────────────────────────────────────────────────────
    pub fn get_order(&self, id: &OrderId) -> Result<Option<Order>, EscrowError> {
        match self.orders.get(id.as_bytes()).map_err(storage_err)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes).map_err(ser_err)?)),
            None => Ok(None),
        }
    }

    pub fn put_order(&self, order: &Order) -> Result<(), EscrowError> {
        let bytes = bincode::serialize(order).map_err(ser_err)?;
        self.orders.insert(order.id.as_bytes(), bytes).map_err(storage_err)?;
        Ok(())
    }

    pub fn iter_orders_due_for_auto_release(
        &self,
        now: Timestamp,
    ) -> Result<Vec<Order>, EscrowError> {
        let mut out = Vec::new();
        for item in self.orders.iter() {
            let (_, bytes) = item.map_err(storage_err)?;
            let o: Order = bincode::deserialize(&bytes).map_err(ser_err)?;
            if o.status == OrderStatus::Paid {
                if let Some(at) = o.auto_release_at {
                    if now >= at {
                        out.push(o);
                    }
                }
            }
        }
        Ok(out)
    }

    // ── Escrows ───────────────────────────────────────────────────────────
    pub fn get_escrow(&self, id: &EscrowId) -> Result<Option<EscrowHold>, EscrowError> {
        match self.escrows.get(id.as_bytes()).map_err(storage_err)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes).map_err(ser_err)?)),
            None => Ok(None),
        }
    }

    pub fn put_escrow(&self, escrow: &EscrowHold) -> Result<(), EscrowError> {
        let bytes = bincode::serialize(escrow).map_err(ser_err)?;
        self.escrows.insert(escrow.id.as_bytes(), bytes).map_err(storage_err)?;
        Ok(())
    }

    pub fn find_escrow_for_order(&self, order_id: &OrderId) -> Result<Option<EscrowHold>, EscrowError> {
        for item in self.escrows.iter() {
            let (_, bytes) = item.map_err(storage_err)?;
            let e: EscrowHold = bincode::deserialize(&bytes).map_err(ser_err)?;
            if e.order_id == *order_id {
                return Ok(Some(e));
            }
        }
        Ok(None)
    }

    // ── Withdrawals ───────────────────────────────────────────────────────
    pub fn get_withdrawal(&self, id: &WithdrawalId) -> Result<Option<Withdrawal>, EscrowError> {
        match self.withdrawals.get(id.as_bytes()).map_err(storage_err)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes).map_err(ser_err)?)),
            None => Ok(None),
        }
    }

    pub fn put_withdrawal(&self, w: &Withdrawal) -> Result<(), EscrowError> {
        let bytes = bincode::serialize(w).map_err(ser_err)?;
        self.withdrawals.insert(w.id.as_bytes(), bytes).map_err(storage_err)?;
        self.withdrawal_idem
            .insert(w.idempotency_key.as_bytes(), w.id.as_bytes().to_vec())
            .map_err(storage_err)?;
        Ok(())
    }

    /// Dedup lookup backing `Withdrawal.idempotency_key`'s uniqueness: a
    /// second `create_withdrawal` call with the same key returns the
    /// withdrawal already created rather than submitting a duplicate.
    pub fn find_withdrawal_by_idempotency_key(&self, idempotency_key: &str) -> Result<Option<Withdrawal>, EscrowError> {
        match self.withdrawal_idem.get(idempotency_key.as_bytes()).map_err(storage_err)? {
            Some(id_bytes) => {
                let mut arr = [0u8; 16];
                arr.copy_from_slice(&id_bytes);
                let id = WithdrawalId::from_bytes(arr);
                self.get_withdrawal(&id)
            }
            None => Ok(None),
        }
    }

    pub fn iter_withdrawals_pending(&self) -> Result<Vec<Withdrawal>, EscrowError> {
        let mut out = Vec::new();
        for item in self.withdrawals.iter() {
            let (_, bytes) = item.map_err(storage_err)?;
            let w: Withdrawal = bincode::deserialize(&bytes).map_err(ser_err)?;
            if matches!(w.status, WithdrawalStatus::Pending | WithdrawalStatus::Flagged) {
                out.push(w);
            }
        }
        Ok(out)
    }

    // ── Velocity log ──────────────────────────────────────────────────────
    pub fn put_velocity_entry(&self, entry: &WithdrawalVelocityLog) -> Result<(), EscrowError> {
        let mut key = entry.user_id.as_bytes().to_vec();
        key.extend_from_slice(&entry.created_at.timestamp().to_be_bytes());
        let bytes = bincode::serialize(entry).map_err(ser_err)?;
        self.velocity_log.insert(key, bytes).map_err(storage_err)?;
        Ok(())
    }

    pub fn iter_velocity_log_for_user(
        &self,
        user_id: &UserId,
        since: Timestamp,
    ) -> Result<Vec<WithdrawalVelocityLog>, EscrowError> {
        let mut out = Vec::new();
        for item in self.velocity_log.scan_prefix(user_id.as_bytes()) {
            let (_, bytes) = item.map_err(storage_err)?;
            let entry: WithdrawalVelocityLog = bincode::deserialize(&bytes).map_err(ser_err)?;
            if entry.created_at >= since {
                out.push(entry);
            }
        }
        Ok(out)
    }

    /// Drop velocity log rows older than `cutoff` — the daily/monthly
    /// housekeeping sweep keeps this tree from growing unbounded, since
    /// entries beyond the longest scoring lookback are never read again.
    pub fn prune_velocity_log_before(&self, cutoff: Timestamp) -> Result<u64, EscrowError> {
        let mut removed = 0u64;
        let mut stale_keys = Vec::new();
        for item in self.velocity_log.iter() {
            let (key, bytes) = item.map_err(storage_err)?;
            let entry: WithdrawalVelocityLog = bincode::deserialize(&bytes).map_err(ser_err)?;
            if entry.created_at < cutoff {
                stale_keys.push(key);
            }
        }
        for key in stale_keys {
            self.velocity_log.remove(key).map_err(storage_err)?;
            removed += 1;
        }
        Ok(removed)
    }

    // ── Transaction limits ────────────────────────────────────────────────
    pub fn get_transaction_limit(
        &self,
        tier: KycTier,
    ) -> Result<Option<TransactionLimit>, EscrowError> {
        let key = [tier as u8];
        match self.transaction_limits.get(key).map_err(storage_err)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes).map_err(ser_err)?)),
            None => Ok(None),
        }
    }

    pub fn put_transaction_limit(&self, limit: &TransactionLimit) -> Result<(), EscrowError> {
        let key = [limit.kyc_tier as u8];
        let bytes = bincode::serialize(limit).map_err(ser_err)?;
        self.transaction_limits.insert(key, bytes).map_err(storage_err)?;
        Ok(())
    }

    // ── Webhook events ────────────────────────────────────────────────────
    fn webhook_key(provider: &str, event_id: &str) -> Vec<u8> {
        let mut k = provider.as_bytes().to_vec();
        k.push(0);
        k.extend_from_slice(event_id.as_bytes());
        k
    }

    pub fn find_webhook_event(
        &self,
        provider: &str,
        event_id: &str,
    ) -> Result<Option<WebhookEvent>, EscrowError> {
        let key = Self::webhook_key(provider, event_id);
        match self.webhook_events.get(key).map_err(storage_err)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes).map_err(ser_err)?)),
            None => Ok(None),
        }
    }

    pub fn put_webhook_event(&self, event: &WebhookEvent) -> Result<(), EscrowError> {
        let key = Self::webhook_key(&event.provider, &event.event_id);
        let bytes = bincode::serialize(event).map_err(ser_err)?;
        self.webhook_events.insert(key, bytes).map_err(storage_err)?;
        Ok(())
    }

    pub fn iter_webhook_events_for_retry(&self) -> Result<Vec<WebhookEvent>, EscrowError> {
        let mut out = Vec::new();
        for item in self.webhook_events.iter() {
            let (_, bytes) = item.map_err(storage_err)?;
            let e: WebhookEvent = bincode::deserialize(&bytes).map_err(ser_err)?;
            if matches!(e.status, WebhookEventStatus::Retrying) {
                out.push(e);
            }
        }
        Ok(out)
    }

    // ── Disputes ──────────────────────────────────────────────────────────
    pub fn get_dispute(&self, id: &DisputeId) -> Result<Option<Dispute>, EscrowError> {
        match self.disputes.get(id.as_bytes()).map_err(storage_err)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes).map_err(ser_err)?)),
            None => Ok(None),
        }
    }

    pub fn put_dispute(&self, d: &Dispute) -> Result<(), EscrowError> {
        let bytes = bincode::serialize(d).map_err(ser_err)?;
        self.disputes.insert(d.id.as_bytes(), bytes).map_err(storage_err)?;
        Ok(())
    }

    pub fn find_dispute_for_order(&self, order_id: &OrderId) -> Result<Option<Dispute>, EscrowError> {
        for item in self.disputes.iter() {
            let (_, bytes) = item.map_err(storage_err)?;
            let d: Dispute = bincode::deserialize(&bytes).map_err(ser_err)?;
            if d.order_id == *order_id {
                return Ok(Some(d));
            }
        }
        Ok(None)
    }

    // ── Idempotency cache (single-node fallback store when Redis is
    // unconfigured) ─────────────────────────────────────────────────────
    // Keyed by the cache key (`idempotency:{user_id}:{key}`), not by
    // the record's own `fingerprint` field — the fingerprint lives inside
    // the stored record so a lookup can tell "same key, same request"
    // (replay) apart from "same key, different request" (rejected).
    pub fn get_idempotency_record(&self, key: &str) -> Result<Option<IdempotencyRecord>, EscrowError> {
        match self.idempotency.get(key.as_bytes()).map_err(storage_err)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes).map_err(ser_err)?)),
            None => Ok(None),
        }
    }

    pub fn put_idempotency_record(&self, key: &str, record: &IdempotencyRecord) -> Result<(), EscrowError> {
        let bytes = bincode::serialize(record).map_err(ser_err)?;
        self.idempotency.insert(key.as_bytes(), bytes).map_err(storage_err)?;
        Ok(())
    }

    // ── Scheduler advisory locks ──────────────────────────────────────────

    /// Attempt to acquire a named, TTL-bounded advisory lock — the sled
    /// equivalent of `pg_advisory_lock`. Returns `true` if acquired.
    pub fn try_acquire_task_lock(
        &self,
        task: &str,
        holder: &str,
        now: Timestamp,
        ttl_secs: i64,
    ) -> Result<bool, EscrowError> {
        let key = task.as_bytes();
        let existing = self.scheduler_locks.get(key).map_err(storage_err)?;
        let expired = match &existing {
            Some(bytes) => {
                let (_holder, expires_at): (String, i64) =
                    bincode::deserialize(bytes).map_err(ser_err)?;
                now.timestamp() >= expires_at
            }
            None => true,
        };
        if !expired {
            return Ok(false);
        }
        let new_value = bincode::serialize(&(holder.to_string(), now.timestamp() + ttl_secs))
            .map_err(ser_err)?;
        let result = self
            .scheduler_locks
            .compare_and_swap(key, existing, Some(new_value));
        match result {
            Ok(Ok(())) => Ok(true),
            Ok(Err(_)) => Ok(false),
            Err(e) => Err(storage_err(e)),
        }
    }

    pub fn release_task_lock(&self, task: &str) -> Result<(), EscrowError> {
        self.scheduler_locks.remove(task.as_bytes()).map_err(storage_err)?;
        Ok(())
    }

    // ── Meta ──────────────────────────────────────────────────────────────
    pub fn put_meta(&self, key: &str, value: &[u8]) -> Result<(), EscrowError> {
        self.meta.insert(key.as_bytes(), value).map_err(storage_err)?;
        Ok(())
    }

    pub fn get_meta(&self, key: &str) -> Result<Option<Vec<u8>>, EscrowError> {
        self.meta
            .get(key.as_bytes())
            .map(|v| v.map(|iv| iv.to_vec()))
            .map_err(storage_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wallet(id: WalletId) -> Wallet {
        Wallet {
            id,
            user_id: UserId::new(),
            ledger_account_id: LedgerAccountId::new(),
            currency: "IDR".into(),
            available_minor: 0,
            locked_minor: 0,
            version: 0,
            updated_at: chrono::Utc::now(),
            last_reconciled_at: None,
            reconciliation_hash: None,
        }
    }

    #[test]
    fn put_then_get_round_trips() {
        let db = StateDb::open_temporary().unwrap();
        let id = WalletId::new();
        db.put_wallet(&wallet(id)).unwrap();
        let fetched = db.get_wallet(&id).unwrap().unwrap();
        assert_eq!(fetched.id, id);
        assert!(db.get_wallet(&WalletId::new()).unwrap().is_none());
    }

    #[test]
    fn task_lock_is_exclusive_until_released() {
        let db = StateDb::open_temporary().unwrap();
        let now = chrono::Utc::now();
        assert!(db.try_acquire_task_lock("sweep", "node-a", now, 60).unwrap());
        assert!(!db.try_acquire_task_lock("sweep", "node-b", now, 60).unwrap());
        db.release_task_lock("sweep").unwrap();
        assert!(db.try_acquire_task_lock("sweep", "node-b", now, 60).unwrap());
    }

    #[test]
    fn task_lock_expires_after_its_ttl() {
        let db = StateDb::open_temporary().unwrap();
        let now = chrono::Utc::now();
        assert!(db.try_acquire_task_lock("sweep", "node-a", now, 1).unwrap());
        let later = now + chrono::Duration::seconds(2);
        assert!(db.try_acquire_task_lock("sweep", "node-b", later, 60).unwrap());
    }

    #[test]
    fn meta_put_then_get_round_trips() {
        let db = StateDb::open_temporary().unwrap();
        assert!(db.get_meta("genesis_applied").unwrap().is_none());
        db.put_meta("genesis_applied", b"{\"ok\":true}").unwrap();
        assert_eq!(db.get_meta("genesis_applied").unwrap().unwrap(), b"{\"ok\":true}");
    }
}
