//! FarePay Fare Settlement
//!
//! Turns tap-in/tap-out events and scanned receipt codes into
//! exactly-once money movements through the balance ledger.
//!
//! # Architecture
//!
//! 1. **Entry**: a tap-in opens a trip; no money moves
//! 2. **Exit**: the fare table and discount engine price the trip, the
//!    ledger settles it with the trip id as idempotency key
//! 3. **Exception**: a settlement short on funds parks the trip with the
//!    discounted fare outstanding, repayable later
//! 4. **Receipt codes**: a scanned code drives a payer→owner transfer
//!    and is consumed at most once
//!
//! # State machines
//!
//! ```text
//! Trip:  OPEN ──settle ok──▶ SETTLED
//!          │
//!          └──insufficient──▶ EXCEPTION ──exact repay──▶ REPAID
//!
//! Code:  LIVE ──confirm──▶ CONSUMED
//!          └──ttl / reissue──▶ EXPIRED
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

pub mod config;
pub mod discount;
pub mod engine;
pub mod error;
pub mod fare_table;
pub mod receipt;
pub mod reconciler;
pub mod trip;
pub mod types;

// Re-exports
pub use config::Config;
pub use discount::DiscountEngine;
pub use engine::FareEngine;
pub use error::{Error, ErrorKind, Result};
pub use fare_table::SiteFareTable;
pub use receipt::ReceiptCodeExchange;
pub use reconciler::StaleTripReconciler;
pub use trip::TripSettlement;
pub use types::*;
