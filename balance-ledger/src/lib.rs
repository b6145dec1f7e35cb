//! FarePay Balance Ledger
//!
//! Atomic balance movements with an append-only audit trail.
//!
//! # Architecture
//!
//! - **One row per user**: `UserBalance` is the single authoritative
//!   balance record, created lazily on first ledger touch
//! - **Append-only entries**: every movement writes immutable
//!   `LedgerEntry` rows; entries are never updated or deleted
//! - **Idempotency by reference**: a reference id settles at most once;
//!   replays return [`SettleOutcome::AlreadySettled`] without moving money
//! - **Optimistic concurrency**: balance writes are conditional on an
//!   unchanged version counter, retried a bounded number of times
//!
//! # Invariants
//!
//! - `UserBalance.balance >= 0` for every user, at all times
//! - At most one settlement per reference id
//! - A stored balance always equals credits minus debits of its entries

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

pub mod config;
pub mod error;
pub mod ledger;
pub mod metrics;
pub mod storage;
pub mod types;

// Re-exports
pub use config::Config;
pub use error::{Error, ErrorKind, Result};
pub use ledger::BalanceLedger;
pub use types::{
    Counterparty, CounterpartyType, EntryCategory, EntryDirection, LedgerEntry, ReferenceId,
    SettleOutcome, TransferOutcome, UserBalance, UserId,
};
