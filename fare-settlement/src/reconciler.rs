//! Stale-trip reconciler
//!
//! Background task that force-closes trips left OPEN beyond the
//! configured age, e.g. a rider who tapped in and never tapped out.
//! Each sweep exits stale trips through the ordinary settlement path
//! at their last known site; there is no special-cased money movement
//! here.

use crate::{engine::FareEngine, types::Principal, Result};
use chrono::Utc;
use std::sync::Arc;

/// Stale-trip reconciler
pub struct StaleTripReconciler {
    /// Engine to sweep
    engine: Arc<FareEngine>,

    /// System principal the sweeps run as
    principal: Principal,
}

impl StaleTripReconciler {
    /// Create new reconciler
    pub fn new(engine: Arc<FareEngine>) -> Self {
        Self {
            engine,
            principal: Principal::system(),
        }
    }

    /// Run one sweep; returns the number of trips closed
    pub fn run_once(&self) -> Result<usize> {
        self.engine
            .reconcile_stale_trips(&self.principal, Utc::now())
    }

    /// Start the sweep loop
    ///
    /// Runs until the task is dropped. A failed sweep is logged and the
    /// loop continues on the next tick.
    pub async fn start(self: Arc<Self>) -> Result<()> {
        let interval_secs = self.engine.config().reconciler.sweep_interval_secs;
        tracing::info!(interval_secs, "Starting stale-trip reconciler");

        let mut interval =
            tokio::time::interval(tokio::time::Duration::from_secs(interval_secs.max(1)));

        loop {
            interval.tick().await;

            match self.run_once() {
                Ok(0) => {}
                Ok(closed) => {
                    tracing::info!(closed, "Reconciler sweep closed stale trips");
                }
                Err(e) => {
                    tracing::error!("Reconciler sweep failed: {}", e);
                }
            }
        }
    }
}
