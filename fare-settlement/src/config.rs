//! Configuration for fare settlement

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Settlement engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Balance ledger configuration
    pub ledger: balance_ledger::Config,

    /// Flat-fare fallbacks per mode
    pub flat_fares: FlatFareConfig,

    /// Receipt code configuration
    pub receipt: ReceiptConfig,

    /// Stale-trip reconciler configuration
    pub reconciler: ReconcilerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ledger: balance_ledger::Config::default(),
            flat_fares: FlatFareConfig::default(),
            receipt: ReceiptConfig::default(),
            reconciler: ReconcilerConfig::default(),
        }
    }
}

/// Flat fares charged when no route rule exists
///
/// A mode with no flat fare configured fails lookups outright rather
/// than guessing.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FlatFareConfig {
    /// Subway flat fare
    pub subway: Option<Decimal>,

    /// Bus flat fare
    pub bus: Option<Decimal>,
}

/// Receipt code configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiptConfig {
    /// Default code TTL (seconds)
    pub default_ttl_secs: u64,

    /// Maximum code TTL a caller may request (seconds)
    pub max_ttl_secs: u64,
}

impl Default for ReceiptConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: 300,     // 5 minutes
            max_ttl_secs: 86_400,      // 1 day
        }
    }
}

/// Stale-trip reconciler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcilerConfig {
    /// Enable the background sweeper
    pub enabled: bool,

    /// Sweep interval (seconds)
    pub sweep_interval_secs: u64,

    /// Age beyond which an open trip is force-closed (seconds)
    pub max_open_trip_secs: u64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sweep_interval_secs: 60,
            max_open_trip_secs: 14_400,  // 4 hours
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();
        config.ledger = balance_ledger::Config::from_env()?;

        if let Ok(secs) = std::env::var("SETTLEMENT_MAX_OPEN_TRIP_SECS") {
            config.reconciler.max_open_trip_secs = secs.parse().map_err(|e| {
                crate::Error::Config(format!("Bad SETTLEMENT_MAX_OPEN_TRIP_SECS: {}", e))
            })?;
        }

        Ok(config)
    }
}
