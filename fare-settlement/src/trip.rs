//! Trip settlement state machine
//!
//! Orchestrates entry, exit, fare computation, and settlement through
//! the balance ledger.
//!
//! # Transitions
//!
//! - OPEN → SETTLED (exit with sufficient funds)
//! - OPEN → EXCEPTION (exit short on funds; discounted fare outstanding)
//! - EXCEPTION → REPAID (exact repayment)
//!
//! A user holds at most one OPEN trip; the claim on the open-trip index
//! is atomic, so two concurrent tap-ins resolve to exactly one winner.
//! Racing exits are serialized on the trip record itself: the loser
//! observes the terminal record and backs off without touching money.

use crate::{
    discount::DiscountEngine,
    fare_table::SiteFareTable,
    types::{CityCode, DiscountChannel, SiteId, TransitMode, TripRecord, TripStatus},
    Error, Result,
};
use balance_ledger::{
    BalanceLedger, Counterparty, EntryCategory, EntryDirection, ReferenceId, SettleOutcome, UserId,
};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

/// Trip settlement orchestrator
pub struct TripSettlement {
    /// All trips by id
    trips: DashMap<Uuid, TripRecord>,

    /// Open-trip index: at most one entry per user
    open_trips: DashMap<UserId, Uuid>,

    /// Money movement
    ledger: Arc<BalanceLedger>,

    /// Base fares
    fares: Arc<SiteFareTable>,

    /// Discount selection
    discounts: Arc<DiscountEngine>,
}

impl TripSettlement {
    /// Create a new trip settlement orchestrator
    pub fn new(
        ledger: Arc<BalanceLedger>,
        fares: Arc<SiteFareTable>,
        discounts: Arc<DiscountEngine>,
    ) -> Self {
        Self {
            trips: DashMap::new(),
            open_trips: DashMap::new(),
            ledger,
            fares,
            discounts,
        }
    }

    /// Record a tap-in
    ///
    /// Fails with [`Error::AlreadyOnTrip`] if the user already has an
    /// OPEN trip. No money moves.
    pub fn enter_station(
        &self,
        user_id: &UserId,
        city: CityCode,
        mode: TransitMode,
        site: SiteId,
        entry_time: DateTime<Utc>,
    ) -> Result<TripRecord> {
        match self.open_trips.entry(user_id.clone()) {
            Entry::Occupied(mut occupied) => {
                let indexed_open = self
                    .trips
                    .get(occupied.get())
                    .map(|trip| trip.status == TripStatus::Open)
                    .unwrap_or(false);
                if indexed_open {
                    return Err(Error::AlreadyOnTrip(user_id.to_string()));
                }

                // Index entry left behind by a racing exit; reclaim it
                let trip = TripRecord::open(user_id.clone(), city, mode, site, entry_time);
                self.trips.insert(trip.trip_id, trip.clone());
                occupied.insert(trip.trip_id);

                tracing::info!(user = %user_id, trip = %trip.trip_id, "Trip opened");
                Ok(trip)
            }
            Entry::Vacant(vacant) => {
                let trip = TripRecord::open(user_id.clone(), city, mode, site, entry_time);
                self.trips.insert(trip.trip_id, trip.clone());
                vacant.insert(trip.trip_id);

                tracing::info!(user = %user_id, trip = %trip.trip_id, "Trip opened");
                Ok(trip)
            }
        }
    }

    /// Record a tap-out and settle the fare
    ///
    /// Requires an OPEN trip ([`Error::NoActiveTrip`] otherwise).
    /// Sufficient funds close the trip SETTLED; a shortfall parks it
    /// EXCEPTION with the discounted fare outstanding and no money
    /// moved. Fare-lookup failures leave the trip OPEN.
    pub fn exit_station(
        &self,
        user_id: &UserId,
        site: &SiteId,
        exit_time: DateTime<Utc>,
    ) -> Result<TripRecord> {
        let trip_id = match self.open_trips.get(user_id) {
            Some(id) => *id,
            None => return Err(Error::NoActiveTrip(user_id.to_string())),
        };

        let settled = {
            let mut trip = self
                .trips
                .get_mut(&trip_id)
                .ok_or(Error::TripNotFound(trip_id))?;

            // A racing exit already closed this trip; no-op on the
            // terminal record
            if trip.status != TripStatus::Open {
                return Ok(trip.clone());
            }

            let base_fare =
                self.fares
                    .lookup_fare(&trip.city, trip.mode, &trip.entry_site, site)?;
            let discount = self.discounts.apply_best_discount(
                user_id,
                base_fare,
                DiscountChannel::Transit,
                exit_time,
            );

            trip.exit_site = Some(site.clone());
            trip.exit_time = Some(exit_time);
            trip.base_fare = Some(base_fare);
            trip.discounted_fare = Some(discount.amount);
            trip.applied_strategy = discount.strategy_id;

            if discount.amount.is_zero() {
                // Fully discounted ride: nothing to collect
                trip.status = TripStatus::Settled;
                tracing::info!(user = %user_id, trip = %trip_id, "Trip settled at zero fare");
            } else {
                let reference = ReferenceId::from(trip_id);
                match self.ledger.settle(
                    &reference,
                    user_id,
                    discount.amount,
                    EntryDirection::Debit,
                    Counterparty::system(),
                    EntryCategory::Fare,
                ) {
                    Ok(outcome) => {
                        trip.status = TripStatus::Settled;
                        trip.settlement_entry_id = self.entry_of(&reference, outcome)?;
                        tracing::info!(
                            user = %user_id,
                            trip = %trip_id,
                            fare = %discount.amount,
                            "Trip settled"
                        );
                    }
                    Err(balance_ledger::Error::InsufficientFunds { .. }) => {
                        // Insufficient funds: park the trip with the
                        // discounted fare outstanding
                        trip.status = TripStatus::Exception;
                        tracing::warn!(
                            user = %user_id,
                            trip = %trip_id,
                            outstanding = %discount.amount,
                            "Trip settlement short on funds, parked as exception"
                        );
                    }
                    Err(err) => {
                        // Storage or conflict trouble: leave the trip
                        // OPEN so the exit can be retried
                        trip.status = TripStatus::Open;
                        trip.exit_site = None;
                        trip.exit_time = None;
                        trip.base_fare = None;
                        trip.discounted_fare = None;
                        trip.applied_strategy = None;
                        return Err(err.into());
                    }
                }
            }

            trip.clone()
        };

        // Trip left OPEN state; release the open-trip slot
        self.open_trips
            .remove_if(user_id, |_, id| *id == trip_id);

        Ok(settled)
    }

    /// Repay the outstanding fare of an exception trip
    ///
    /// The amount must equal the outstanding fare exactly
    /// ([`Error::AmountMismatch`] otherwise). Insufficient funds leave
    /// the trip EXCEPTION for a later retry.
    pub fn repay_trip(
        &self,
        user_id: &UserId,
        trip_id: Uuid,
        amount: Decimal,
    ) -> Result<TripRecord> {
        let mut trip = self
            .trips
            .get_mut(&trip_id)
            .ok_or(Error::TripNotFound(trip_id))?;

        // Do not leak other riders' trips
        if trip.user_id != *user_id {
            return Err(Error::TripNotFound(trip_id));
        }

        if trip.status != TripStatus::Exception {
            return Err(Error::TripNotRepayable {
                status: trip.status,
            });
        }

        let outstanding = trip.discounted_fare.unwrap_or(Decimal::ZERO);
        if amount != outstanding {
            return Err(Error::AmountMismatch {
                expected: outstanding,
                actual: amount,
            });
        }

        let reference = ReferenceId::from(trip_id);
        let outcome = self.ledger.settle(
            &reference,
            user_id,
            amount,
            EntryDirection::Debit,
            Counterparty::system(),
            EntryCategory::FareRepay,
        )?;

        trip.status = TripStatus::Repaid;
        trip.settlement_entry_id = self.entry_of(&reference, outcome)?;

        tracing::info!(user = %user_id, trip = %trip_id, amount = %amount, "Trip repaid");
        Ok(trip.clone())
    }

    /// Trips still OPEN past the cutoff, for the reconciler
    pub fn stale_open_trips(&self, cutoff: DateTime<Utc>) -> Vec<TripRecord> {
        self.trips
            .iter()
            .filter(|entry| entry.status == TripStatus::Open && entry.entry_time < cutoff)
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Get a trip by id
    pub fn get_trip(&self, trip_id: Uuid) -> Option<TripRecord> {
        self.trips.get(&trip_id).map(|trip| trip.value().clone())
    }

    /// The user's OPEN trip, if any
    pub fn open_trip_of(&self, user_id: &UserId) -> Option<TripRecord> {
        let trip_id = *self.open_trips.get(user_id)?;
        self.trips
            .get(&trip_id)
            .filter(|trip| trip.status == TripStatus::Open)
            .map(|trip| trip.value().clone())
    }

    /// Entry id recorded under a reference, whether this call or an
    /// earlier replayed one settled it
    fn entry_of(
        &self,
        reference: &ReferenceId,
        outcome: SettleOutcome,
    ) -> Result<Option<Uuid>> {
        match outcome {
            SettleOutcome::Applied { entry_id } => Ok(Some(entry_id)),
            SettleOutcome::AlreadySettled => Ok(self
                .ledger
                .reference_entries(reference)?
                .first()
                .map(|entry| entry.entry_id)),
        }
    }
}
