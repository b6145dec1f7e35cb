//! Configuration for the balance ledger

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Data directory for RocksDB
    pub data_dir: PathBuf,

    /// RocksDB configuration
    pub rocksdb: RocksDbConfig,

    /// Optimistic-concurrency configuration
    pub concurrency: ConcurrencyConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/ledger"),
            rocksdb: RocksDbConfig::default(),
            concurrency: ConcurrencyConfig::default(),
        }
    }
}

/// RocksDB configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RocksDbConfig {
    /// Write buffer size (MB)
    pub write_buffer_size_mb: usize,

    /// Max write buffers
    pub max_write_buffer_number: i32,

    /// Target file size (MB)
    pub target_file_size_mb: u64,

    /// Max background jobs (compaction + flush)
    pub max_background_jobs: i32,

    /// Enable statistics
    pub enable_statistics: bool,
}

impl Default for RocksDbConfig {
    fn default() -> Self {
        Self {
            write_buffer_size_mb: 128,      // 128 MB
            max_write_buffer_number: 4,
            target_file_size_mb: 128,       // 128 MB
            max_background_jobs: 4,
            enable_statistics: false,
        }
    }
}

/// Optimistic-concurrency configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    /// Maximum version-check attempts before surfacing Conflict
    pub max_attempts: u32,

    /// Number of balance lock stripes
    pub lock_stripes: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,     // bounded retry budget
            lock_stripes: 64,
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

        if let Ok(data_dir) = std::env::var("LEDGER_DATA_DIR") {
            config.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(attempts) = std::env::var("LEDGER_MAX_CAS_ATTEMPTS") {
            config.concurrency.max_attempts = attempts
                .parse()
                .map_err(|e| crate::Error::Config(format!("Bad LEDGER_MAX_CAS_ATTEMPTS: {}", e)))?;
        }

        Ok(config)
    }
}
