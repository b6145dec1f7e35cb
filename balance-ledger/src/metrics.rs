//! Metrics collection for observability
//!
//! Prometheus metrics for monitoring the ledger.
//!
//! # Metrics
//!
//! - `ledger_settlements_total` - Settlements applied
//! - `ledger_transfers_total` - Two-party transfers applied
//! - `ledger_replays_total` - Idempotent replays absorbed
//! - `ledger_insufficient_funds_total` - Debits rejected for funds
//! - `ledger_conflicts_total` - Version conflicts observed (incl. retried)
//! - `ledger_settle_duration_seconds` - Settle/transfer latencies

use prometheus::{Histogram, HistogramOpts, IntCounter, Opts, Registry};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Settlements applied
    pub settlements_total: IntCounter,

    /// Transfers applied
    pub transfers_total: IntCounter,

    /// Idempotent replays absorbed
    pub replays_total: IntCounter,

    /// Debits rejected for insufficient funds
    pub insufficient_funds_total: IntCounter,

    /// Version conflicts observed
    pub conflicts_total: IntCounter,

    /// Settle/transfer latency histogram
    pub settle_duration: Histogram,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector on a private registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let settlements_total = IntCounter::with_opts(Opts::new(
            "ledger_settlements_total",
            "Settlements applied",
        ))?;
        registry.register(Box::new(settlements_total.clone()))?;

        let transfers_total = IntCounter::with_opts(Opts::new(
            "ledger_transfers_total",
            "Two-party transfers applied",
        ))?;
        registry.register(Box::new(transfers_total.clone()))?;

        let replays_total = IntCounter::with_opts(Opts::new(
            "ledger_replays_total",
            "Idempotent replays absorbed",
        ))?;
        registry.register(Box::new(replays_total.clone()))?;

        let insufficient_funds_total = IntCounter::with_opts(Opts::new(
            "ledger_insufficient_funds_total",
            "Debits rejected for insufficient funds",
        ))?;
        registry.register(Box::new(insufficient_funds_total.clone()))?;

        let conflicts_total = IntCounter::with_opts(Opts::new(
            "ledger_conflicts_total",
            "Version conflicts observed",
        ))?;
        registry.register(Box::new(conflicts_total.clone()))?;

        let settle_duration = Histogram::with_opts(
            HistogramOpts::new(
                "ledger_settle_duration_seconds",
                "Settle/transfer latencies",
            )
            .buckets(vec![0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0]),
        )?;
        registry.register(Box::new(settle_duration.clone()))?;

        Ok(Self {
            settlements_total,
            transfers_total,
            replays_total,
            insufficient_funds_total,
            conflicts_total,
            settle_duration,
            registry,
        })
    }

    /// Record an applied settlement
    pub fn record_settlement(&self) {
        self.settlements_total.inc();
    }

    /// Record an applied transfer
    pub fn record_transfer(&self) {
        self.transfers_total.inc();
    }

    /// Record an absorbed replay
    pub fn record_replay(&self) {
        self.replays_total.inc();
    }

    /// Record a rejected debit
    pub fn record_insufficient_funds(&self) {
        self.insufficient_funds_total.inc();
    }

    /// Record a version conflict
    pub fn record_conflict(&self) {
        self.conflicts_total.inc();
    }

    /// Record operation duration
    pub fn record_duration(&self, duration_seconds: f64) {
        self.settle_duration.observe(duration_seconds);
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("Failed to create metrics")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();
        assert_eq!(metrics.settlements_total.get(), 0);
        assert_eq!(metrics.conflicts_total.get(), 0);
    }

    #[test]
    fn test_record_settlement() {
        let metrics = Metrics::new().unwrap();
        metrics.record_settlement();
        metrics.record_settlement();
        assert_eq!(metrics.settlements_total.get(), 2);
    }

    #[test]
    fn test_private_registries_coexist() {
        // Two collectors must not collide on metric names
        let a = Metrics::new().unwrap();
        let b = Metrics::new().unwrap();
        a.record_transfer();
        assert_eq!(a.transfers_total.get(), 1);
        assert_eq!(b.transfers_total.get(), 0);
    }
}
