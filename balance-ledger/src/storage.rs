//! Storage layer using RocksDB
//!
//! # Column Families
//!
//! - `balances` - Authoritative balance rows (key: user_id)
//! - `entries` - Append-only ledger entries (key: entry_id)
//! - `indices` - Secondary index user_id|entry_id for per-user scans
//! - `refs` - Reference id → settled entry ids (the idempotency record)

use crate::{
    error::{Error, Result},
    types::{LedgerEntry, ReferenceId, UserBalance, UserId},
    Config,
};
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, DBCompactionStyle, Direction, IteratorMode, Options,
    WriteBatch, DB,
};
use std::sync::Arc;
use uuid::Uuid;

/// Column family names
const CF_BALANCES: &str = "balances";
const CF_ENTRIES: &str = "entries";
const CF_INDICES: &str = "indices";
const CF_REFS: &str = "refs";

/// Storage wrapper for RocksDB
pub struct Storage {
    db: Arc<DB>,
}

impl Storage {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        // Tuning from config
        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_target_file_size_base(config.rocksdb.target_file_size_mb * 1024 * 1024);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);

        // Universal compaction for write-heavy workload
        db_opts.set_compaction_style(DBCompactionStyle::Universal);

        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_BALANCES, Self::cf_options_balances()),
            ColumnFamilyDescriptor::new(CF_ENTRIES, Self::cf_options_entries()),
            ColumnFamilyDescriptor::new(CF_INDICES, Self::cf_options_indices()),
            ColumnFamilyDescriptor::new(CF_REFS, Self::cf_options_refs()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!("Opened RocksDB at {:?}", path);

        Ok(Self { db: Arc::new(db) })
    }

    // Column family options

    fn cf_options_balances() -> Options {
        let mut opts = Options::default();
        // Balances are hot, favor read speed
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_options_entries() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts.set_bottommost_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    fn cf_options_indices() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false); // 10 bits per key
        opts.set_block_based_table_factory(&block_opts);
        opts
    }

    fn cf_options_refs() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        opts.set_block_based_table_factory(&block_opts);
        opts
    }

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    // Balance operations

    /// Get balance row for a user, if one exists yet
    pub fn get_balance(&self, user_id: &UserId) -> Result<Option<UserBalance>> {
        let cf = self.cf_handle(CF_BALANCES)?;

        let value = self.db.get_cf(cf, user_id.as_str().as_bytes())?;
        match value {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    // Entry operations

    /// Get entry by ID
    pub fn get_entry(&self, entry_id: Uuid) -> Result<LedgerEntry> {
        let cf = self.cf_handle(CF_ENTRIES)?;

        let value = self
            .db
            .get_cf(cf, entry_id.as_bytes())?
            .ok_or_else(|| Error::EntryNotFound(entry_id.to_string()))?;

        let entry: LedgerEntry = bincode::deserialize(&value)?;
        Ok(entry)
    }

    /// Get entry ids already settled under a reference, if any
    pub fn get_reference(&self, reference: &ReferenceId) -> Result<Option<Vec<Uuid>>> {
        let cf = self.cf_handle(CF_REFS)?;

        let value = self.db.get_cf(cf, reference.as_str().as_bytes())?;
        match value {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Get all entries for a user (via index)
    pub fn entries_for_user(&self, user_id: &UserId) -> Result<Vec<LedgerEntry>> {
        let cf_indices = self.cf_handle(CF_INDICES)?;

        let prefix = Self::index_key_user_entry(user_id, None);
        let iter = self
            .db
            .iterator_cf(cf_indices, IteratorMode::From(&prefix, Direction::Forward));

        let mut entries = Vec::new();
        for item in iter {
            let (key, _) = item?;
            if !key.starts_with(&prefix) {
                break;
            }

            // Entry id is the trailing 16 bytes of the index key
            if key.len() >= prefix.len() + 16 {
                let entry_id_bytes: [u8; 16] =
                    key[key.len() - 16..].try_into().expect("sliced 16 bytes");
                let entry_id = Uuid::from_bytes(entry_id_bytes);
                entries.push(self.get_entry(entry_id)?);
            }
        }

        Ok(entries)
    }

    // Atomic settlement commit

    /// Commit a settlement: balance rows, entries, and the reference
    /// marker land in a single atomic WriteBatch.
    ///
    /// All entries must share one reference id. Either everything is
    /// written or nothing is.
    pub fn commit_settlement(
        &self,
        balances: &[UserBalance],
        entries: &[LedgerEntry],
    ) -> Result<()> {
        let reference = match entries.first() {
            Some(entry) => entry.reference_id.clone(),
            None => return Err(Error::Other("Empty settlement commit".to_string())),
        };

        let mut batch = WriteBatch::default();

        // 1. Balance rows
        let cf_balances = self.cf_handle(CF_BALANCES)?;
        for balance in balances {
            let value = bincode::serialize(balance)?;
            batch.put_cf(cf_balances, balance.user_id.as_str().as_bytes(), &value);
        }

        // 2. Entries + per-user index
        let cf_entries = self.cf_handle(CF_ENTRIES)?;
        let cf_indices = self.cf_handle(CF_INDICES)?;
        for entry in entries {
            let value = bincode::serialize(entry)?;
            batch.put_cf(cf_entries, entry.entry_id.as_bytes(), &value);

            let idx = Self::index_key_user_entry(&entry.user_id, Some(entry.entry_id));
            batch.put_cf(cf_indices, &idx, &[]);
        }

        // 3. Reference marker (idempotency record)
        let cf_refs = self.cf_handle(CF_REFS)?;
        let entry_ids: Vec<Uuid> = entries.iter().map(|e| e.entry_id).collect();
        let refs_value = bincode::serialize(&entry_ids)?;
        batch.put_cf(cf_refs, reference.as_str().as_bytes(), &refs_value);

        // Atomic commit
        self.db.write(batch)?;

        tracing::debug!(
            reference = %reference,
            entry_count = entries.len(),
            "Settlement committed"
        );

        Ok(())
    }

    // Index key helpers

    fn index_key_user_entry(user_id: &UserId, entry_id: Option<Uuid>) -> Vec<u8> {
        let mut key = user_id.as_str().as_bytes().to_vec();
        key.push(b'|'); // Separator
        if let Some(eid) = entry_id {
            key.extend_from_slice(eid.as_bytes());
        }
        key
    }

    // Statistics

    /// Get storage statistics
    pub fn stats(&self) -> Result<StorageStats> {
        let cf_entries = self.cf_handle(CF_ENTRIES)?;
        let cf_balances = self.cf_handle(CF_BALANCES)?;

        Ok(StorageStats {
            total_entries: self.approximate_count(cf_entries)?,
            total_balances: self.approximate_count(cf_balances)?,
        })
    }

    fn approximate_count(&self, cf: &ColumnFamily) -> Result<u64> {
        // RocksDB property for approximate count
        let prop = self
            .db
            .property_int_value_cf(cf, "rocksdb.estimate-num-keys")?
            .unwrap_or(0);

        Ok(prop)
    }
}

/// Storage statistics
#[derive(Debug, Clone)]
pub struct StorageStats {
    /// Approximate ledger entry count
    pub total_entries: u64,
    /// Approximate balance row count
    pub total_balances: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Counterparty, EntryCategory, EntryDirection};
    use chrono::Utc;
    use rust_decimal::Decimal;
    use tempfile::TempDir;

    fn test_storage() -> (Storage, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        (Storage::open(&config).unwrap(), temp_dir)
    }

    fn test_entry(user: &str, reference: &str) -> LedgerEntry {
        LedgerEntry {
            entry_id: Uuid::now_v7(),
            user_id: UserId::new(user),
            direction: EntryDirection::Credit,
            amount: Decimal::new(1000, 2), // 10.00
            counterparty: Counterparty::bank_card("card-tx-1"),
            category: EntryCategory::TopUp,
            reference_id: ReferenceId::new(reference),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_storage_open() {
        let (storage, _temp) = test_storage();
        assert!(storage.db.cf_handle(CF_BALANCES).is_some());
        assert!(storage.db.cf_handle(CF_ENTRIES).is_some());
        assert!(storage.db.cf_handle(CF_REFS).is_some());
    }

    #[test]
    fn test_missing_balance_is_none() {
        let (storage, _temp) = test_storage();
        let balance = storage.get_balance(&UserId::new("nobody")).unwrap();
        assert!(balance.is_none());
    }

    #[test]
    fn test_commit_and_read_back() {
        let (storage, _temp) = test_storage();

        let entry = test_entry("u1", "ref-1");
        let balance = UserBalance {
            user_id: UserId::new("u1"),
            balance: Decimal::new(1000, 2),
            version: 1,
            updated_at: Utc::now(),
        };

        storage
            .commit_settlement(std::slice::from_ref(&balance), std::slice::from_ref(&entry))
            .unwrap();

        let stored = storage.get_balance(&UserId::new("u1")).unwrap().unwrap();
        assert_eq!(stored.balance, Decimal::new(1000, 2));
        assert_eq!(stored.version, 1);

        let retrieved = storage.get_entry(entry.entry_id).unwrap();
        assert_eq!(retrieved.reference_id, ReferenceId::new("ref-1"));

        let refs = storage
            .get_reference(&ReferenceId::new("ref-1"))
            .unwrap()
            .unwrap();
        assert_eq!(refs, vec![entry.entry_id]);
    }

    #[test]
    fn test_entries_for_user_scan() {
        let (storage, _temp) = test_storage();

        for i in 0i64..3 {
            let entry = test_entry("u1", &format!("ref-{}", i));
            let balance = UserBalance {
                user_id: UserId::new("u1"),
                balance: Decimal::new(1000 * (i + 1), 2),
                version: (i + 1) as u64,
                updated_at: Utc::now(),
            };
            storage
                .commit_settlement(std::slice::from_ref(&balance), std::slice::from_ref(&entry))
                .unwrap();
        }

        // A different user whose entries must not leak into the scan
        let other = test_entry("u2", "ref-other");
        let other_balance = UserBalance {
            user_id: UserId::new("u2"),
            balance: Decimal::new(1000, 2),
            version: 1,
            updated_at: Utc::now(),
        };
        storage
            .commit_settlement(
                std::slice::from_ref(&other_balance),
                std::slice::from_ref(&other),
            )
            .unwrap();

        let entries = storage.entries_for_user(&UserId::new("u1")).unwrap();
        assert_eq!(entries.len(), 3);
        assert!(entries.iter().all(|e| e.user_id == UserId::new("u1")));
    }

    #[test]
    fn test_empty_commit_rejected() {
        let (storage, _temp) = test_storage();
        let result = storage.commit_settlement(&[], &[]);
        assert!(result.is_err());
    }
}
