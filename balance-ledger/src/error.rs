//! Error types for the balance ledger

use rust_decimal::Decimal;
use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Debit would leave the balance negative
    #[error("Insufficient funds: available {available}, requested {requested}")]
    InsufficientFunds {
        /// Balance at the time of the check
        available: Decimal,
        /// Amount the debit asked for
        requested: Decimal,
    },

    /// Optimistic-concurrency retry budget exhausted
    ///
    /// Safe for the caller to retry the whole operation; settlement is
    /// idempotent by reference id.
    #[error("Version conflict persisted after {attempts} attempts")]
    Conflict {
        /// Attempts made before giving up
        attempts: u32,
    },

    /// Amount was zero or negative
    #[error("Invalid amount: {0}")]
    InvalidAmount(Decimal),

    /// Transfer where payer and receiver are the same user
    #[error("Transfer payer and receiver are the same user: {0}")]
    SelfTransfer(String),

    /// Entry not found
    #[error("Entry not found: {0}")]
    EntryNotFound(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Other(msg)
    }
}

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Other(msg.to_string())
    }
}

/// Coarse classification of an error for transport mapping
///
/// The transport layer maps kinds to status codes; the core only
/// guarantees the kind of each variant is stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing entry or record
    NotFound,
    /// Typed business-rule violation; never retried by the core
    BusinessRule,
    /// Retry budget exhausted; safe to retry the whole operation
    Conflict,
    /// Storage, serialization, or configuration defect
    Internal,
}

impl Error {
    /// Classify this error into the transport-facing taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::EntryNotFound(_) => ErrorKind::NotFound,
            Error::InsufficientFunds { .. }
            | Error::InvalidAmount(_)
            | Error::SelfTransfer(_) => ErrorKind::BusinessRule,
            Error::Conflict { .. } => ErrorKind::Conflict,
            Error::Storage(_)
            | Error::Serialization(_)
            | Error::Config(_)
            | Error::Io(_)
            | Error::Other(_) => ErrorKind::Internal,
        }
    }
}
