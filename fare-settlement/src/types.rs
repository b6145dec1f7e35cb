//! Core types for fare settlement

use balance_ledger::UserId;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use uuid::Uuid;

/// Station identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SiteId(String);

impl SiteId {
    /// Create new site ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// City code scoping a fare network
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CityCode(String);

impl CityCode {
    /// Create new city code
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CityCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Transit mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum TransitMode {
    /// Subway network
    Subway = 1,
    /// Bus network
    Bus = 2,
}

impl fmt::Display for TransitMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransitMode::Subway => write!(f, "subway"),
            TransitMode::Bus => write!(f, "bus"),
        }
    }
}

/// Fare rule for one directed route
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteFareRule {
    /// City scoping the rule
    pub city: CityCode,

    /// Transit mode
    pub mode: TransitMode,

    /// Entry site
    pub from_site: SiteId,

    /// Exit site
    pub to_site: SiteId,

    /// Base fare for the route
    pub fare: Decimal,
}

/// Trip lifecycle state
///
/// `Open` and `Exception` are the only non-terminal states; no
/// transitions exist besides Open→Settled, Open→Exception and
/// Exception→Repaid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum TripStatus {
    /// Tap-in recorded, no money moved
    Open = 1,
    /// Fare settled (terminal)
    Settled = 2,
    /// Settlement failed on funds; fare outstanding
    Exception = 3,
    /// Outstanding fare repaid (terminal)
    Repaid = 4,
}

impl TripStatus {
    /// Check if the trip is in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, TripStatus::Settled | TripStatus::Repaid)
    }
}

/// One tap-in/tap-out journey
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TripRecord {
    /// Unique trip ID (UUIDv7 for time-ordering)
    pub trip_id: Uuid,

    /// Rider
    pub user_id: UserId,

    /// City of the trip
    pub city: CityCode,

    /// Transit mode
    pub mode: TransitMode,

    /// Entry site
    pub entry_site: SiteId,

    /// Entry timestamp
    pub entry_time: DateTime<Utc>,

    /// Exit site (set on exit)
    pub exit_site: Option<SiteId>,

    /// Exit timestamp (set on exit)
    pub exit_time: Option<DateTime<Utc>>,

    /// Base fare before discounts (set on exit)
    pub base_fare: Option<Decimal>,

    /// Fare after the best discount (set on exit)
    ///
    /// For an `Exception` trip this is the outstanding amount.
    pub discounted_fare: Option<Decimal>,

    /// Discount strategy applied, if any
    pub applied_strategy: Option<Uuid>,

    /// Lifecycle state
    pub status: TripStatus,

    /// Ledger entry that settled or repaid the trip
    pub settlement_entry_id: Option<Uuid>,
}

impl TripRecord {
    /// Open a new trip at tap-in
    pub fn open(
        user_id: UserId,
        city: CityCode,
        mode: TransitMode,
        entry_site: SiteId,
        entry_time: DateTime<Utc>,
    ) -> Self {
        Self {
            trip_id: Uuid::now_v7(),
            user_id,
            city,
            mode,
            entry_site,
            entry_time,
            exit_site: None,
            exit_time: None,
            base_fare: None,
            discounted_fare: None,
            applied_strategy: None,
            status: TripStatus::Open,
            settlement_entry_id: None,
        }
    }

    /// Amount still owed on an exception trip
    pub fn outstanding(&self) -> Option<Decimal> {
        match self.status {
            TripStatus::Exception => self.discounted_fare,
            _ => None,
        }
    }
}

/// Settlement channel a discount can target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiscountChannel {
    /// Transit fare at tap-out
    Transit,
    /// Receipt-code payment
    Payment,
}

/// Discount strategy kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum StrategyKind {
    /// Transit-fare discounts
    Travel = 1,
    /// Payment discounts
    Payment = 2,
    /// New-user promotions
    NewUser = 3,
    /// Holiday promotions
    Holiday = 4,
}

impl StrategyKind {
    /// Whether this kind applies on the given channel
    pub fn applies_to(&self, channel: DiscountChannel) -> bool {
        match self {
            StrategyKind::Travel => channel == DiscountChannel::Transit,
            StrategyKind::Payment => channel == DiscountChannel::Payment,
            StrategyKind::NewUser | StrategyKind::Holiday => true,
        }
    }
}

/// Strategy lifecycle state, owned by the admin collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum StrategyStatus {
    /// Eligible for selection
    Active = 1,
    /// Disabled by the admin
    Inactive = 2,
    /// Past its validity window
    Expired = 3,
}

/// Discount applied inside one ladder bracket
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum BracketRule {
    /// Fractional reduction, e.g. 0.20 for 20% off
    Percentage(Decimal),
    /// Flat reduction
    FixedAmount(Decimal),
}

/// One bracket of a ladder discount
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LadderBracket {
    /// Inclusive lower bound on the base amount
    pub lower: Decimal,

    /// Exclusive upper bound; open-ended when absent
    pub upper: Option<Decimal>,

    /// Rule applied inside this bracket
    pub rule: BracketRule,
}

impl LadderBracket {
    /// Whether a base amount falls in this bracket
    pub fn contains(&self, amount: Decimal) -> bool {
        amount >= self.lower && self.upper.map_or(true, |upper| amount < upper)
    }
}

/// Discount arithmetic, dispatched as a tagged union
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DiscountRule {
    /// Fractional reduction: `amount * (1 - p)`
    Percentage(Decimal),
    /// Flat reduction: `max(0, amount - f)`
    FixedAmount(Decimal),
    /// Bracketed rules selected by the base amount
    Ladder(Vec<LadderBracket>),
}

/// A discount strategy, read-only to the core
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscountStrategy {
    /// Strategy ID; ascending order breaks selection ties
    pub strategy_id: Uuid,

    /// Strategy kind
    pub kind: StrategyKind,

    /// Lifecycle state
    pub status: StrategyStatus,

    /// Discount arithmetic
    pub rule: DiscountRule,

    /// Validity window start
    pub valid_from: DateTime<Utc>,

    /// Validity window end
    pub valid_until: DateTime<Utc>,

    /// Per-user usage cap; unlimited when absent
    pub per_user_cap: Option<u32>,
}

impl DiscountStrategy {
    /// Whether the strategy is selectable at `now`
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.status == StrategyStatus::Active && now >= self.valid_from && now < self.valid_until
    }

    /// Amount after applying this strategy, floored at zero
    pub fn discounted(&self, base: Decimal) -> Decimal {
        let reduced = match &self.rule {
            DiscountRule::Percentage(p) => base * (Decimal::ONE - *p),
            DiscountRule::FixedAmount(f) => base - *f,
            DiscountRule::Ladder(brackets) => match brackets.iter().find(|b| b.contains(base)) {
                Some(bracket) => match bracket.rule {
                    BracketRule::Percentage(p) => base * (Decimal::ONE - p),
                    BracketRule::FixedAmount(f) => base - f,
                },
                None => base,
            },
        };
        reduced.max(Decimal::ZERO)
    }
}

/// Result of discount selection
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedDiscount {
    /// Amount to settle
    pub amount: Decimal,

    /// Winning strategy; absent when no candidate applied
    pub strategy_id: Option<Uuid>,
}

/// Receipt code lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum CodeStatus {
    /// Scannable
    Live = 1,
    /// Redeemed; terminal
    Consumed = 2,
    /// Timed out or superseded; terminal
    Expired = 3,
}

/// A scannable token a payee shows to receive a payment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiptCode {
    /// Code ID; doubles as the transfer's idempotency key
    pub code_id: Uuid,

    /// User who receives the payment
    pub owner: UserId,

    /// Bound amount; the payer chooses when absent
    pub fixed_amount: Option<Decimal>,

    /// Lifecycle state
    pub status: CodeStatus,

    /// Issue timestamp
    pub issued_at: DateTime<Utc>,

    /// Expiry timestamp
    pub expires_at: DateTime<Utc>,
}

impl ReceiptCode {
    /// Whether the code's TTL has elapsed at `now`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Record of one consumed receipt code, immutable once written
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiptTransaction {
    /// Transaction ID
    pub transaction_id: Uuid,

    /// Paying user
    pub payer: UserId,

    /// Receiving user (the code owner)
    pub receiver: UserId,

    /// Amount transferred
    pub amount: Decimal,

    /// Code that drove the transfer
    pub code_id: Uuid,

    /// Settlement timestamp
    pub settled_at: DateTime<Utc>,
}

/// Operation a principal may be allowed to perform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Capability {
    /// Enter and exit stations
    Ride,
    /// Issue and confirm receipt codes
    Pay,
    /// Repay exception trips
    Repay,
    /// Top up balances from a bank card
    TopUp,
    /// Read balances and entries
    QueryBalance,
    /// Load fare rules and discount strategies
    Configure,
    /// Force-close stale trips
    Reconcile,
}

/// Verified caller identity injected by the upstream gateway
///
/// The core trusts the identity and only checks capabilities; no
/// credential validation happens here.
#[derive(Debug, Clone)]
pub struct Principal {
    /// Display name for logs
    pub name: String,

    /// Capabilities granted upstream
    pub capabilities: HashSet<Capability>,
}

impl Principal {
    /// A rider: ride, pay, repay, top up, query
    pub fn rider(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            capabilities: [
                Capability::Ride,
                Capability::Pay,
                Capability::Repay,
                Capability::TopUp,
                Capability::QueryBalance,
            ]
            .into_iter()
            .collect(),
        }
    }

    /// The platform itself: everything, including reconciliation
    pub fn system() -> Self {
        Self {
            name: "system".to_string(),
            capabilities: [
                Capability::Ride,
                Capability::Pay,
                Capability::Repay,
                Capability::TopUp,
                Capability::QueryBalance,
                Capability::Configure,
                Capability::Reconcile,
            ]
            .into_iter()
            .collect(),
        }
    }

    /// An admin collaborator: configuration and queries only
    pub fn admin(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            capabilities: [Capability::Configure, Capability::QueryBalance]
                .into_iter()
                .collect(),
        }
    }

    /// Whether the principal holds a capability
    pub fn allows(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}
