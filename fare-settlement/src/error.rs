//! Error types for fare settlement

use crate::types::{Capability, TripStatus};
use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

/// Result type for settlement operations
pub type Result<T> = std::result::Result<T, Error>;

/// Settlement errors
#[derive(Error, Debug)]
pub enum Error {
    /// Ledger error
    #[error("Ledger error: {0}")]
    Ledger(#[from] balance_ledger::Error),

    /// No fare rule and no flat fallback for a route
    #[error("No fare available for {city}/{mode} {from_site} -> {to_site}")]
    FareUnavailable {
        /// City of the lookup
        city: String,
        /// Transit mode
        mode: String,
        /// Entry site
        from_site: String,
        /// Exit site
        to_site: String,
    },

    /// Trip not found (or not owned by the caller)
    #[error("Trip not found: {0}")]
    TripNotFound(Uuid),

    /// Receipt code not found
    #[error("Receipt code not found: {0}")]
    CodeNotFound(Uuid),

    /// User already has an open trip
    #[error("User {0} already has an open trip")]
    AlreadyOnTrip(String),

    /// Exit without an open trip
    #[error("User {0} has no active trip")]
    NoActiveTrip(String),

    /// Repay on a trip that is not in the exception state
    #[error("Trip is not repayable in status {status:?}")]
    TripNotRepayable {
        /// Current trip status
        status: TripStatus,
    },

    /// Stated amount does not match the required amount exactly
    #[error("Amount mismatch: expected {expected}, got {actual}")]
    AmountMismatch {
        /// Amount the operation requires
        expected: Decimal,
        /// Amount the caller stated
        actual: Decimal,
    },

    /// Receipt code past its TTL
    #[error("Receipt code expired: {0}")]
    CodeExpired(Uuid),

    /// Receipt code already redeemed
    #[error("Receipt code already consumed: {0}")]
    CodeConsumed(Uuid),

    /// Payer confirming their own code
    #[error("Cannot pay your own receipt code")]
    SelfPayment,

    /// Amount was zero or negative
    #[error("Invalid amount: {0}")]
    InvalidAmount(Decimal),

    /// Caller lacks the required capability
    #[error("Permission denied: {capability:?} required")]
    PermissionDenied {
        /// Missing capability
        capability: Capability,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse classification of an error for transport mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing fare rule, trip, or code
    NotFound,
    /// Typed business-rule violation; never retried by the core
    BusinessRule,
    /// Retry budget exhausted; safe to retry the whole operation
    Conflict,
    /// Caller lacks a capability
    PermissionDenied,
    /// Storage, serialization, or configuration defect
    Internal,
}

impl Error {
    /// Classify this error into the transport-facing taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::FareUnavailable { .. }
            | Error::TripNotFound(_)
            | Error::CodeNotFound(_) => ErrorKind::NotFound,
            Error::AlreadyOnTrip(_)
            | Error::NoActiveTrip(_)
            | Error::TripNotRepayable { .. }
            | Error::AmountMismatch { .. }
            | Error::CodeExpired(_)
            | Error::CodeConsumed(_)
            | Error::SelfPayment
            | Error::InvalidAmount(_) => ErrorKind::BusinessRule,
            Error::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            Error::Ledger(inner) => match inner.kind() {
                balance_ledger::ErrorKind::NotFound => ErrorKind::NotFound,
                balance_ledger::ErrorKind::BusinessRule => ErrorKind::BusinessRule,
                balance_ledger::ErrorKind::Conflict => ErrorKind::Conflict,
                balance_ledger::ErrorKind::Internal => ErrorKind::Internal,
            },
            Error::Config(_) | Error::Io(_) => ErrorKind::Internal,
        }
    }

    /// Whether this is the ledger's insufficient-funds refusal
    pub fn is_insufficient_funds(&self) -> bool {
        matches!(
            self,
            Error::Ledger(balance_ledger::Error::InsufficientFunds { .. })
        )
    }
}
