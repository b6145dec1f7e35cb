//! Main settlement engine
//!
//! Wires the fare table, discount engine, trip state machine, and
//! receipt exchange over one balance ledger, and checks caller
//! capabilities at the edge of every operation. The transport layer in
//! front of this engine maps error kinds to status codes; nothing here
//! knows about wire formats.

use crate::{
    config::Config,
    discount::DiscountEngine,
    fare_table::SiteFareTable,
    receipt::ReceiptCodeExchange,
    trip::TripSettlement,
    types::{
        Capability, CityCode, DiscountStrategy, Principal, ReceiptCode, ReceiptTransaction,
        SiteFareRule, SiteId, TransitMode, TripRecord,
    },
    Error, Result,
};
use balance_ledger::{
    BalanceLedger, Counterparty, EntryCategory, EntryDirection, LedgerEntry, ReferenceId,
    SettleOutcome, UserBalance, UserId,
};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

/// Settlement engine facade
pub struct FareEngine {
    /// Money movement
    ledger: Arc<BalanceLedger>,

    /// Base fares
    fares: Arc<SiteFareTable>,

    /// Discount selection
    discounts: Arc<DiscountEngine>,

    /// Trip state machine
    trips: TripSettlement,

    /// Receipt-code exchange
    receipts: ReceiptCodeExchange,

    /// Configuration
    config: Config,
}

impl FareEngine {
    /// Create new engine
    pub fn new(config: Config) -> Result<Self> {
        let ledger = Arc::new(BalanceLedger::open(config.ledger.clone())?);
        let fares = Arc::new(SiteFareTable::new(config.flat_fares.clone()));
        let discounts = Arc::new(DiscountEngine::new());

        let trips = TripSettlement::new(
            Arc::clone(&ledger),
            Arc::clone(&fares),
            Arc::clone(&discounts),
        );
        let receipts = ReceiptCodeExchange::new(Arc::clone(&ledger), config.receipt.clone());

        Ok(Self {
            ledger,
            fares,
            discounts,
            trips,
            receipts,
            config,
        })
    }

    // Trips

    /// Record a tap-in
    pub fn enter_station(
        &self,
        principal: &Principal,
        user_id: &UserId,
        city: CityCode,
        mode: TransitMode,
        site: SiteId,
        entry_time: DateTime<Utc>,
    ) -> Result<TripRecord> {
        self.require(principal, Capability::Ride)?;
        self.trips
            .enter_station(user_id, city, mode, site, entry_time)
    }

    /// Record a tap-out and settle the fare
    pub fn exit_station(
        &self,
        principal: &Principal,
        user_id: &UserId,
        site: &SiteId,
        exit_time: DateTime<Utc>,
    ) -> Result<TripRecord> {
        self.require(principal, Capability::Ride)?;
        self.trips.exit_station(user_id, site, exit_time)
    }

    /// Repay the outstanding fare of an exception trip
    pub fn repay_trip(
        &self,
        principal: &Principal,
        user_id: &UserId,
        trip_id: Uuid,
        amount: Decimal,
    ) -> Result<TripRecord> {
        self.require(principal, Capability::Repay)?;
        self.trips.repay_trip(user_id, trip_id, amount)
    }

    /// Get a trip by id
    pub fn get_trip(&self, principal: &Principal, trip_id: Uuid) -> Result<Option<TripRecord>> {
        self.require(principal, Capability::QueryBalance)?;
        Ok(self.trips.get_trip(trip_id))
    }

    // Receipt codes

    /// Issue a receipt code
    pub fn issue_code(
        &self,
        principal: &Principal,
        owner: &UserId,
        fixed_amount: Option<Decimal>,
        ttl: Option<Duration>,
        now: DateTime<Utc>,
    ) -> Result<ReceiptCode> {
        self.require(principal, Capability::Pay)?;
        self.receipts.issue_code(owner, fixed_amount, ttl, now)
    }

    /// Confirm a payment against a receipt code
    pub fn confirm_payment(
        &self,
        principal: &Principal,
        payer: &UserId,
        code_id: Uuid,
        stated_amount: Decimal,
        now: DateTime<Utc>,
    ) -> Result<ReceiptTransaction> {
        self.require(principal, Capability::Pay)?;
        self.receipts
            .confirm_payment(payer, code_id, stated_amount, now)
    }

    // Balance

    /// Top up a balance from a bank card
    ///
    /// The card transaction reference is the idempotency key, so a
    /// retried top-up credits at most once. Card validation happens
    /// upstream.
    pub fn top_up(
        &self,
        principal: &Principal,
        user_id: &UserId,
        amount: Decimal,
        card_reference: &str,
    ) -> Result<SettleOutcome> {
        self.require(principal, Capability::TopUp)?;
        let outcome = self.ledger.settle(
            &ReferenceId::new(card_reference),
            user_id,
            amount,
            EntryDirection::Credit,
            Counterparty::bank_card(card_reference),
            EntryCategory::TopUp,
        )?;
        Ok(outcome)
    }

    /// Current balance for a user
    pub fn balance_of(&self, principal: &Principal, user_id: &UserId) -> Result<UserBalance> {
        self.require(principal, Capability::QueryBalance)?;
        Ok(self.ledger.balance_of(user_id)?)
    }

    /// Ledger entries for a user, oldest first
    pub fn entries_for_user(
        &self,
        principal: &Principal,
        user_id: &UserId,
    ) -> Result<Vec<LedgerEntry>> {
        self.require(principal, Capability::QueryBalance)?;
        Ok(self.ledger.entries_for_user(user_id)?)
    }

    // Reference data

    /// Replace the fare rule set
    pub fn load_fare_rules(
        &self,
        principal: &Principal,
        rules: Vec<SiteFareRule>,
    ) -> Result<()> {
        self.require(principal, Capability::Configure)?;
        self.fares.load_rules(rules);
        Ok(())
    }

    /// Replace the discount strategy set
    pub fn load_strategies(
        &self,
        principal: &Principal,
        strategies: Vec<DiscountStrategy>,
    ) -> Result<()> {
        self.require(principal, Capability::Configure)?;
        self.discounts.load_strategies(strategies);
        Ok(())
    }

    // Reconciliation

    /// Force-close trips left OPEN beyond the configured age
    ///
    /// Each stale trip is exited through the ordinary settlement path
    /// at its last known site. Returns the number of trips closed; a
    /// trip whose exit fails is logged and left for the next sweep.
    pub fn reconcile_stale_trips(
        &self,
        principal: &Principal,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        self.require(principal, Capability::Reconcile)?;

        let cutoff = now - Duration::seconds(self.config.reconciler.max_open_trip_secs as i64);
        let stale = self.trips.stale_open_trips(cutoff);

        let mut closed = 0;
        for trip in stale {
            let site = trip.entry_site.clone();
            match self.trips.exit_station(&trip.user_id, &site, now) {
                Ok(record) => {
                    closed += 1;
                    tracing::info!(
                        trip = %trip.trip_id,
                        user = %trip.user_id,
                        status = ?record.status,
                        "Stale trip force-closed"
                    );
                }
                Err(err) => {
                    tracing::warn!(
                        trip = %trip.trip_id,
                        user = %trip.user_id,
                        error = %err,
                        "Stale trip could not be closed"
                    );
                }
            }
        }

        Ok(closed)
    }

    // Accessors

    /// The underlying ledger
    pub fn ledger(&self) -> &Arc<BalanceLedger> {
        &self.ledger
    }

    /// The receipt exchange
    pub fn receipts(&self) -> &ReceiptCodeExchange {
        &self.receipts
    }

    /// The trip state machine
    pub fn trips(&self) -> &TripSettlement {
        &self.trips
    }

    /// Engine configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    fn require(&self, principal: &Principal, capability: Capability) -> Result<()> {
        if principal.allows(capability) {
            Ok(())
        } else {
            tracing::warn!(
                principal = %principal.name,
                capability = ?capability,
                "Operation denied"
            );
            Err(Error::PermissionDenied { capability })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_engine() -> (FareEngine, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.ledger.data_dir = temp_dir.path().to_path_buf();
        config.flat_fares.subway = Some(Decimal::new(300, 2)); // 3.00 flat
        (FareEngine::new(config).unwrap(), temp_dir)
    }

    #[test]
    fn test_capability_denied() {
        let (engine, _temp) = test_engine();
        let admin = Principal::admin("ops");

        // Admins configure, they do not ride
        let result = engine.enter_station(
            &admin,
            &UserId::new("u1"),
            CityCode::new("city-a"),
            TransitMode::Subway,
            SiteId::new("S1"),
            Utc::now(),
        );
        assert!(matches!(result, Err(Error::PermissionDenied { .. })));

        let rider = Principal::rider("u1");
        let result = engine.load_fare_rules(&rider, vec![]);
        assert!(matches!(result, Err(Error::PermissionDenied { .. })));
    }

    #[test]
    fn test_top_up_is_idempotent() {
        let (engine, _temp) = test_engine();
        let rider = Principal::rider("u1");
        let user = UserId::new("u1");

        let first = engine
            .top_up(&rider, &user, Decimal::new(1000, 2), "card-tx-1")
            .unwrap();
        assert!(first.is_applied());

        // A gateway retry with the same card reference credits once
        let second = engine
            .top_up(&rider, &user, Decimal::new(1000, 2), "card-tx-1")
            .unwrap();
        assert_eq!(second, SettleOutcome::AlreadySettled);

        assert_eq!(
            engine.balance_of(&rider, &user).unwrap().balance,
            Decimal::new(1000, 2)
        );
    }

    #[test]
    fn test_ride_on_flat_fare() {
        let (engine, _temp) = test_engine();
        let rider = Principal::rider("u1");
        let user = UserId::new("u1");
        engine
            .top_up(&rider, &user, Decimal::new(1000, 2), "card-tx-1")
            .unwrap();

        engine
            .enter_station(
                &rider,
                &user,
                CityCode::new("city-a"),
                TransitMode::Subway,
                SiteId::new("S1"),
                Utc::now(),
            )
            .unwrap();
        let trip = engine
            .exit_station(&rider, &user, &SiteId::new("S2"), Utc::now())
            .unwrap();

        // No explicit rule: the subway flat fare applies
        assert_eq!(trip.discounted_fare, Some(Decimal::new(300, 2)));
        assert_eq!(
            engine.balance_of(&rider, &user).unwrap().balance,
            Decimal::new(700, 2)
        );
    }

    #[test]
    fn test_reconcile_closes_stale_trip() {
        let (engine, _temp) = test_engine();
        let system = Principal::system();
        let rider = Principal::rider("u1");
        let user = UserId::new("u1");
        engine
            .top_up(&rider, &user, Decimal::new(1000, 2), "card-tx-1")
            .unwrap();

        let now = Utc::now();
        engine
            .enter_station(
                &rider,
                &user,
                CityCode::new("city-a"),
                TransitMode::Subway,
                SiteId::new("S1"),
                now - Duration::hours(6),
            )
            .unwrap();

        let closed = engine.reconcile_stale_trips(&system, now).unwrap();
        assert_eq!(closed, 1);

        // The trip went through the ordinary exit path at the entry site
        assert!(engine.trips().open_trip_of(&user).is_none());
        let entries = engine.entries_for_user(&rider, &user).unwrap();
        assert_eq!(entries.len(), 2); // top-up + flat fare

        // A fresh trip is untouched by the sweep
        engine
            .enter_station(
                &rider,
                &user,
                CityCode::new("city-a"),
                TransitMode::Subway,
                SiteId::new("S1"),
                now,
            )
            .unwrap();
        let closed = engine.reconcile_stale_trips(&system, now).unwrap();
        assert_eq!(closed, 0);
    }

    #[test]
    fn test_reconcile_requires_capability() {
        let (engine, _temp) = test_engine();
        let rider = Principal::rider("u1");
        let result = engine.reconcile_stale_trips(&rider, Utc::now());
        assert!(matches!(result, Err(Error::PermissionDenied { .. })));
    }
}
