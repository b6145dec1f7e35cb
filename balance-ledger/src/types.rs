//! Core types for the balance ledger
//!
//! All types are designed for:
//! - Deterministic serialization (bincode)
//! - Exact arithmetic (Decimal for money)
//! - Append-only auditing (entries carry everything needed to replay)

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// User identifier, as asserted by the upstream gateway
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(String);

impl UserId {
    /// Create new user ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Idempotency key for a settlement
///
/// A trip id, receipt code id, or bank-card transaction id. Each
/// reference settles at most once regardless of retries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReferenceId(String);

impl ReferenceId {
    /// Create new reference ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<Uuid> for ReferenceId {
    fn from(id: Uuid) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for ReferenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Direction of a ledger entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum EntryDirection {
    /// Money into the user balance
    Credit = 1,
    /// Money out of the user balance
    Debit = 2,
}

/// Kind of counterparty on the other side of a movement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum CounterpartyType {
    /// Another user (receipt-code transfer)
    User = 1,
    /// A merchant
    Merchant = 2,
    /// A bank card (top-up)
    BankCard = 3,
    /// The platform itself (fares, repayments)
    System = 4,
}

/// The other side of a money movement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counterparty {
    /// Counterparty kind
    pub kind: CounterpartyType,

    /// Counterparty identifier (user id, card reference, ...)
    pub id: String,
}

impl Counterparty {
    /// The platform as counterparty (fare collection, repayment)
    pub fn system() -> Self {
        Self {
            kind: CounterpartyType::System,
            id: "system".to_string(),
        }
    }

    /// Another user as counterparty
    pub fn user(user: &UserId) -> Self {
        Self {
            kind: CounterpartyType::User,
            id: user.as_str().to_string(),
        }
    }

    /// A bank card as counterparty
    pub fn bank_card(card_ref: impl Into<String>) -> Self {
        Self {
            kind: CounterpartyType::BankCard,
            id: card_ref.into(),
        }
    }

    /// A merchant as counterparty
    pub fn merchant(merchant_id: impl Into<String>) -> Self {
        Self {
            kind: CounterpartyType::Merchant,
            id: merchant_id.into(),
        }
    }
}

/// Business category of a ledger entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum EntryCategory {
    /// Transit fare collected at exit
    Fare = 1,
    /// Repayment of an under-settled trip
    FareRepay = 2,
    /// Receipt-code transfer between users
    Transfer = 3,
    /// Balance top-up from a bank card
    TopUp = 4,
}

/// Immutable audit record of one side of a money movement
///
/// Entries are append-only: never updated, never deleted. They are the
/// source of truth for whether a reference id has already settled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Unique entry ID (UUIDv7 for time-ordering)
    pub entry_id: Uuid,

    /// User whose balance moved
    pub user_id: UserId,

    /// Credit or debit
    pub direction: EntryDirection,

    /// Amount moved (always positive)
    pub amount: Decimal,

    /// The other side of the movement
    pub counterparty: Counterparty,

    /// Business category
    pub category: EntryCategory,

    /// Idempotency key this entry settled
    pub reference_id: ReferenceId,

    /// Entry timestamp
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Signed contribution of this entry to its user's balance
    pub fn signed_amount(&self) -> Decimal {
        match self.direction {
            EntryDirection::Credit => self.amount,
            EntryDirection::Debit => -self.amount,
        }
    }
}

/// Authoritative balance record, one row per user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserBalance {
    /// User ID
    pub user_id: UserId,

    /// Current balance (never negative)
    pub balance: Decimal,

    /// Monotonic version counter for optimistic concurrency
    pub version: u64,

    /// Last mutation timestamp
    pub updated_at: DateTime<Utc>,
}

impl UserBalance {
    /// Zero-balance record for a user the ledger has not seen yet
    ///
    /// Rows are created lazily: this record is only persisted once a
    /// first settlement against the user commits.
    pub fn opening(user_id: UserId) -> Self {
        Self {
            user_id,
            balance: Decimal::ZERO,
            version: 0,
            updated_at: Utc::now(),
        }
    }
}

/// Result of a single-sided settlement
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettleOutcome {
    /// Money moved; one entry was written
    Applied {
        /// The entry recording the movement
        entry_id: Uuid,
    },
    /// The reference had already settled; nothing moved
    AlreadySettled,
}

impl SettleOutcome {
    /// Whether this call moved money
    pub fn is_applied(&self) -> bool {
        matches!(self, SettleOutcome::Applied { .. })
    }
}

/// Result of a two-party transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    /// Money moved; both entries were written atomically
    Applied {
        /// Debit entry on the payer side
        debit_entry_id: Uuid,
        /// Credit entry on the receiver side
        credit_entry_id: Uuid,
    },
    /// The reference had already settled; nothing moved
    AlreadySettled,
}

impl TransferOutcome {
    /// Whether this call moved money
    pub fn is_applied(&self) -> bool {
        matches!(self, TransferOutcome::Applied { .. })
    }
}
