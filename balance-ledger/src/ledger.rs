//! Main ledger orchestration layer
//!
//! This module ties storage, locking, and metrics into the high-level
//! money-movement API: [`BalanceLedger::settle`] and
//! [`BalanceLedger::transfer`].
//!
//! # Concurrency discipline
//!
//! Every balance mutation reads the current `(balance, version)` pair,
//! computes the new balance, and commits conditionally on the version
//! being unchanged. The version re-check and the RocksDB WriteBatch
//! happen under a per-user lock stripe, which makes check-and-write a
//! single atomic step without serializing unrelated users. A version
//! mismatch retries up to the configured budget; exhausting it surfaces
//! [`Error::Conflict`], which callers may retry safely because every
//! settlement is idempotent by reference id.

use crate::{
    metrics::Metrics,
    types::{
        Counterparty, EntryCategory, EntryDirection, LedgerEntry, ReferenceId, SettleOutcome,
        TransferOutcome, UserBalance, UserId,
    },
    Config, Error, Result, storage::Storage,
};
use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// The money-movement primitive
///
/// Owns `UserBalance` exclusively; balances are mutated only through
/// [`settle`](Self::settle) and [`transfer`](Self::transfer).
pub struct BalanceLedger {
    /// Storage backend
    storage: Arc<Storage>,

    /// Balance lock stripes (version re-check + commit atomicity)
    stripes: Vec<Mutex<()>>,

    /// Metrics collector
    metrics: Metrics,

    /// Optimistic retry budget
    max_attempts: u32,
}

impl BalanceLedger {
    /// Open ledger with configuration
    pub fn open(config: Config) -> Result<Self> {
        let storage = Arc::new(Storage::open(&config)?);
        let metrics = Metrics::new().map_err(|e| Error::Other(e.to_string()))?;

        let stripe_count = config.concurrency.lock_stripes.max(1);
        let stripes = (0..stripe_count).map(|_| Mutex::new(())).collect();

        Ok(Self {
            storage,
            stripes,
            metrics,
            max_attempts: config.concurrency.max_attempts.max(1),
        })
    }

    /// Settle one side of a money movement
    ///
    /// Idempotent: if an entry already exists for `reference`, returns
    /// [`SettleOutcome::AlreadySettled`] without moving money again.
    /// A debit that would leave the balance negative returns
    /// [`Error::InsufficientFunds`] and writes nothing.
    pub fn settle(
        &self,
        reference: &ReferenceId,
        user_id: &UserId,
        amount: Decimal,
        direction: EntryDirection,
        counterparty: Counterparty,
        category: EntryCategory,
    ) -> Result<SettleOutcome> {
        let started = Instant::now();

        if amount <= Decimal::ZERO {
            return Err(Error::InvalidAmount(amount));
        }

        if self.storage.get_reference(reference)?.is_some() {
            self.metrics.record_replay();
            return Ok(SettleOutcome::AlreadySettled);
        }

        for _attempt in 1..=self.max_attempts {
            let current = self
                .storage
                .get_balance(user_id)?
                .unwrap_or_else(|| UserBalance::opening(user_id.clone()));

            let new_balance = match direction {
                EntryDirection::Debit => {
                    if current.balance < amount {
                        self.metrics.record_insufficient_funds();
                        return Err(Error::InsufficientFunds {
                            available: current.balance,
                            requested: amount,
                        });
                    }
                    current.balance - amount
                }
                EntryDirection::Credit => current.balance + amount,
            };

            let _guard = self.stripes[self.stripe_of(user_id)].lock();

            // Version must be unchanged since the read above
            let latest_version = self
                .storage
                .get_balance(user_id)?
                .map(|b| b.version)
                .unwrap_or(0);
            if latest_version != current.version {
                self.metrics.record_conflict();
                continue;
            }

            // The reference may have settled while we were off the lock
            if self.storage.get_reference(reference)?.is_some() {
                self.metrics.record_replay();
                return Ok(SettleOutcome::AlreadySettled);
            }

            let now = Utc::now();
            let entry = LedgerEntry {
                entry_id: Uuid::now_v7(),
                user_id: user_id.clone(),
                direction,
                amount,
                counterparty: counterparty.clone(),
                category,
                reference_id: reference.clone(),
                created_at: now,
            };
            let updated = UserBalance {
                user_id: user_id.clone(),
                balance: new_balance,
                version: current.version + 1,
                updated_at: now,
            };

            self.storage
                .commit_settlement(std::slice::from_ref(&updated), std::slice::from_ref(&entry))?;

            self.metrics.record_settlement();
            self.metrics.record_duration(started.elapsed().as_secs_f64());

            tracing::info!(
                user = %user_id,
                reference = %reference,
                amount = %amount,
                direction = ?direction,
                balance = %new_balance,
                "Settlement applied"
            );

            return Ok(SettleOutcome::Applied {
                entry_id: entry.entry_id,
            });
        }

        tracing::warn!(
            user = %user_id,
            reference = %reference,
            attempts = self.max_attempts,
            "Settlement gave up after version conflicts"
        );
        Err(Error::Conflict {
            attempts: self.max_attempts,
        })
    }

    /// Atomically debit `payer` and credit `receiver` as a single unit
    ///
    /// Either both entries are written and both balances updated, or
    /// neither is. Idempotent by `reference` like [`settle`](Self::settle).
    pub fn transfer(
        &self,
        reference: &ReferenceId,
        payer: &UserId,
        receiver: &UserId,
        amount: Decimal,
    ) -> Result<TransferOutcome> {
        let started = Instant::now();

        if amount <= Decimal::ZERO {
            return Err(Error::InvalidAmount(amount));
        }
        if payer == receiver {
            return Err(Error::SelfTransfer(payer.to_string()));
        }

        if self.storage.get_reference(reference)?.is_some() {
            self.metrics.record_replay();
            return Ok(TransferOutcome::AlreadySettled);
        }

        for _attempt in 1..=self.max_attempts {
            let payer_row = self
                .storage
                .get_balance(payer)?
                .unwrap_or_else(|| UserBalance::opening(payer.clone()));
            let receiver_row = self
                .storage
                .get_balance(receiver)?
                .unwrap_or_else(|| UserBalance::opening(receiver.clone()));

            if payer_row.balance < amount {
                self.metrics.record_insufficient_funds();
                return Err(Error::InsufficientFunds {
                    available: payer_row.balance,
                    requested: amount,
                });
            }

            // Lock both stripes in index order so concurrent transfers
            // cannot deadlock
            let payer_stripe = self.stripe_of(payer);
            let receiver_stripe = self.stripe_of(receiver);
            let (first, second) = if payer_stripe <= receiver_stripe {
                (payer_stripe, receiver_stripe)
            } else {
                (receiver_stripe, payer_stripe)
            };
            let _guard_first = self.stripes[first].lock();
            let _guard_second = if second != first {
                Some(self.stripes[second].lock())
            } else {
                None
            };

            let payer_version = self
                .storage
                .get_balance(payer)?
                .map(|b| b.version)
                .unwrap_or(0);
            let receiver_version = self
                .storage
                .get_balance(receiver)?
                .map(|b| b.version)
                .unwrap_or(0);
            if payer_version != payer_row.version || receiver_version != receiver_row.version {
                self.metrics.record_conflict();
                continue;
            }

            if self.storage.get_reference(reference)?.is_some() {
                self.metrics.record_replay();
                return Ok(TransferOutcome::AlreadySettled);
            }

            let now = Utc::now();
            let debit = LedgerEntry {
                entry_id: Uuid::now_v7(),
                user_id: payer.clone(),
                direction: EntryDirection::Debit,
                amount,
                counterparty: Counterparty::user(receiver),
                category: EntryCategory::Transfer,
                reference_id: reference.clone(),
                created_at: now,
            };
            let credit = LedgerEntry {
                entry_id: Uuid::now_v7(),
                user_id: receiver.clone(),
                direction: EntryDirection::Credit,
                amount,
                counterparty: Counterparty::user(payer),
                category: EntryCategory::Transfer,
                reference_id: reference.clone(),
                created_at: now,
            };
            let updated_payer = UserBalance {
                user_id: payer.clone(),
                balance: payer_row.balance - amount,
                version: payer_row.version + 1,
                updated_at: now,
            };
            let updated_receiver = UserBalance {
                user_id: receiver.clone(),
                balance: receiver_row.balance + amount,
                version: receiver_row.version + 1,
                updated_at: now,
            };

            self.storage.commit_settlement(
                &[updated_payer, updated_receiver],
                &[debit.clone(), credit.clone()],
            )?;

            self.metrics.record_transfer();
            self.metrics.record_duration(started.elapsed().as_secs_f64());

            tracing::info!(
                payer = %payer,
                receiver = %receiver,
                reference = %reference,
                amount = %amount,
                "Transfer applied"
            );

            return Ok(TransferOutcome::Applied {
                debit_entry_id: debit.entry_id,
                credit_entry_id: credit.entry_id,
            });
        }

        tracing::warn!(
            payer = %payer,
            receiver = %receiver,
            reference = %reference,
            attempts = self.max_attempts,
            "Transfer gave up after version conflicts"
        );
        Err(Error::Conflict {
            attempts: self.max_attempts,
        })
    }

    /// Current balance for a user
    ///
    /// A user the ledger has never touched reads as a zero-balance row.
    pub fn balance_of(&self, user_id: &UserId) -> Result<UserBalance> {
        Ok(self
            .storage
            .get_balance(user_id)?
            .unwrap_or_else(|| UserBalance::opening(user_id.clone())))
    }

    /// All entries for a user, oldest first
    pub fn entries_for_user(&self, user_id: &UserId) -> Result<Vec<LedgerEntry>> {
        let mut entries = self.storage.entries_for_user(user_id)?;
        entries.sort_by_key(|e| e.created_at);
        Ok(entries)
    }

    /// Entries settled under a reference (empty if the reference never settled)
    pub fn reference_entries(&self, reference: &ReferenceId) -> Result<Vec<LedgerEntry>> {
        let ids = match self.storage.get_reference(reference)? {
            Some(ids) => ids,
            None => return Ok(vec![]),
        };

        let mut entries = Vec::with_capacity(ids.len());
        for id in ids {
            entries.push(self.storage.get_entry(id)?);
        }
        Ok(entries)
    }

    /// Check the conservation invariant for one user
    ///
    /// The stored balance must equal credits minus debits over the
    /// user's entries. A mismatch is an internal defect, not a
    /// recoverable condition.
    pub fn audit_user(&self, user_id: &UserId) -> Result<bool> {
        let balance = self.balance_of(user_id)?;
        let entries = self.storage.entries_for_user(user_id)?;

        let replayed: Decimal = entries.iter().map(|e| e.signed_amount()).sum();

        Ok(replayed == balance.balance)
    }

    /// Get metrics collector
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    fn stripe_of(&self, user_id: &UserId) -> usize {
        let mut hasher = DefaultHasher::new();
        user_id.hash(&mut hasher);
        (hasher.finish() as usize) % self.stripes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_ledger() -> (BalanceLedger, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        (BalanceLedger::open(config).unwrap(), temp_dir)
    }

    fn top_up(ledger: &BalanceLedger, user: &UserId, cents: i64, reference: &str) {
        let outcome = ledger
            .settle(
                &ReferenceId::new(reference),
                user,
                Decimal::new(cents, 2),
                EntryDirection::Credit,
                Counterparty::bank_card(format!("card-{}", reference)),
                EntryCategory::TopUp,
            )
            .unwrap();
        assert!(outcome.is_applied());
    }

    #[test]
    fn test_credit_then_debit() {
        let (ledger, _temp) = test_ledger();
        let user = UserId::new("u1");

        top_up(&ledger, &user, 1000, "topup-1"); // 10.00

        let outcome = ledger
            .settle(
                &ReferenceId::new("fare-1"),
                &user,
                Decimal::new(480, 2), // 4.80
                EntryDirection::Debit,
                Counterparty::system(),
                EntryCategory::Fare,
            )
            .unwrap();
        assert!(outcome.is_applied());

        let balance = ledger.balance_of(&user).unwrap();
        assert_eq!(balance.balance, Decimal::new(520, 2));
        assert_eq!(balance.version, 2);
    }

    #[test]
    fn test_debit_insufficient_funds() {
        let (ledger, _temp) = test_ledger();
        let user = UserId::new("u1");

        top_up(&ledger, &user, 100, "topup-1"); // 1.00

        let result = ledger.settle(
            &ReferenceId::new("fare-1"),
            &user,
            Decimal::new(480, 2),
            EntryDirection::Debit,
            Counterparty::system(),
            EntryCategory::Fare,
        );
        assert!(matches!(result, Err(Error::InsufficientFunds { .. })));

        // Nothing moved, nothing recorded
        let balance = ledger.balance_of(&user).unwrap();
        assert_eq!(balance.balance, Decimal::new(100, 2));
        assert!(ledger
            .reference_entries(&ReferenceId::new("fare-1"))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_debit_unknown_user_insufficient() {
        let (ledger, _temp) = test_ledger();

        let result = ledger.settle(
            &ReferenceId::new("fare-1"),
            &UserId::new("ghost"),
            Decimal::new(100, 2),
            EntryDirection::Debit,
            Counterparty::system(),
            EntryCategory::Fare,
        );
        assert!(matches!(result, Err(Error::InsufficientFunds { .. })));
    }

    #[test]
    fn test_settle_idempotent() {
        let (ledger, _temp) = test_ledger();
        let user = UserId::new("u1");
        top_up(&ledger, &user, 1000, "topup-1");

        let reference = ReferenceId::new("fare-1");
        let first = ledger
            .settle(
                &reference,
                &user,
                Decimal::new(300, 2),
                EntryDirection::Debit,
                Counterparty::system(),
                EntryCategory::Fare,
            )
            .unwrap();
        assert!(first.is_applied());

        let second = ledger
            .settle(
                &reference,
                &user,
                Decimal::new(300, 2),
                EntryDirection::Debit,
                Counterparty::system(),
                EntryCategory::Fare,
            )
            .unwrap();
        assert_eq!(second, SettleOutcome::AlreadySettled);

        // Exactly one entry for the reference, balance debited once
        assert_eq!(ledger.reference_entries(&reference).unwrap().len(), 1);
        assert_eq!(
            ledger.balance_of(&user).unwrap().balance,
            Decimal::new(700, 2)
        );
    }

    #[test]
    fn test_invalid_amount_rejected() {
        let (ledger, _temp) = test_ledger();
        let result = ledger.settle(
            &ReferenceId::new("x"),
            &UserId::new("u1"),
            Decimal::ZERO,
            EntryDirection::Credit,
            Counterparty::system(),
            EntryCategory::TopUp,
        );
        assert!(matches!(result, Err(Error::InvalidAmount(_))));
    }

    #[test]
    fn test_transfer_moves_both_sides() {
        let (ledger, _temp) = test_ledger();
        let payer = UserId::new("payer");
        let receiver = UserId::new("receiver");
        top_up(&ledger, &payer, 2000, "topup-1"); // 20.00

        let outcome = ledger
            .transfer(
                &ReferenceId::new("code-1"),
                &payer,
                &receiver,
                Decimal::new(750, 2), // 7.50
            )
            .unwrap();
        assert!(outcome.is_applied());

        assert_eq!(
            ledger.balance_of(&payer).unwrap().balance,
            Decimal::new(1250, 2)
        );
        assert_eq!(
            ledger.balance_of(&receiver).unwrap().balance,
            Decimal::new(750, 2)
        );

        // One opposing pair under the reference
        let entries = ledger
            .reference_entries(&ReferenceId::new("code-1"))
            .unwrap();
        assert_eq!(entries.len(), 2);
        let total: Decimal = entries.iter().map(|e| e.signed_amount()).sum();
        assert_eq!(total, Decimal::ZERO);
    }

    #[test]
    fn test_transfer_insufficient_funds() {
        let (ledger, _temp) = test_ledger();
        let payer = UserId::new("payer");
        let receiver = UserId::new("receiver");
        top_up(&ledger, &payer, 100, "topup-1");

        let result = ledger.transfer(
            &ReferenceId::new("code-1"),
            &payer,
            &receiver,
            Decimal::new(750, 2),
        );
        assert!(matches!(result, Err(Error::InsufficientFunds { .. })));

        // Receiver untouched, no entries written
        assert_eq!(ledger.balance_of(&receiver).unwrap().balance, Decimal::ZERO);
        assert!(ledger
            .reference_entries(&ReferenceId::new("code-1"))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_transfer_to_self_rejected() {
        let (ledger, _temp) = test_ledger();
        let user = UserId::new("u1");
        top_up(&ledger, &user, 1000, "topup-1");

        let result = ledger.transfer(
            &ReferenceId::new("code-1"),
            &user,
            &user,
            Decimal::new(100, 2),
        );
        assert!(matches!(result, Err(Error::SelfTransfer(_))));
    }

    #[test]
    fn test_transfer_idempotent() {
        let (ledger, _temp) = test_ledger();
        let payer = UserId::new("payer");
        let receiver = UserId::new("receiver");
        top_up(&ledger, &payer, 2000, "topup-1");

        let reference = ReferenceId::new("code-1");
        let first = ledger
            .transfer(&reference, &payer, &receiver, Decimal::new(500, 2))
            .unwrap();
        assert!(first.is_applied());

        let second = ledger
            .transfer(&reference, &payer, &receiver, Decimal::new(500, 2))
            .unwrap();
        assert_eq!(second, TransferOutcome::AlreadySettled);

        assert_eq!(
            ledger.balance_of(&payer).unwrap().balance,
            Decimal::new(1500, 2)
        );
        assert_eq!(ledger.reference_entries(&reference).unwrap().len(), 2);
    }

    #[test]
    fn test_audit_user() {
        let (ledger, _temp) = test_ledger();
        let user = UserId::new("u1");

        top_up(&ledger, &user, 1000, "topup-1");
        ledger
            .settle(
                &ReferenceId::new("fare-1"),
                &user,
                Decimal::new(333, 2),
                EntryDirection::Debit,
                Counterparty::system(),
                EntryCategory::Fare,
            )
            .unwrap();

        assert!(ledger.audit_user(&user).unwrap());
    }

    #[test]
    fn test_concurrent_credits_all_land() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        // Enough retry headroom for eight contenders on one stripe
        config.concurrency.max_attempts = 64;
        let ledger = Arc::new(BalanceLedger::open(config).unwrap());
        let user = UserId::new("u1");

        std::thread::scope(|scope| {
            for i in 0..8 {
                let ledger = Arc::clone(&ledger);
                let user = user.clone();
                scope.spawn(move || {
                    let outcome = ledger
                        .settle(
                            &ReferenceId::new(format!("topup-{}", i)),
                            &user,
                            Decimal::new(100, 2),
                            EntryDirection::Credit,
                            Counterparty::bank_card(format!("card-{}", i)),
                            EntryCategory::TopUp,
                        )
                        .unwrap();
                    assert!(outcome.is_applied());
                });
            }
        });

        let balance = ledger.balance_of(&user).unwrap();
        assert_eq!(balance.balance, Decimal::new(800, 2));
        assert_eq!(balance.version, 8);
        assert!(ledger.audit_user(&user).unwrap());
    }
}
