//! # RocksDB Storage Adapter
//!
//! [`KeyValueStore`] over RocksDB. All DAG tables share the `dag` column
//! family; the key prefixes keep them apart.
//!
//! ## Configuration
//!
//! - Snappy compression
//! - Bloom filters (10 bits per key) for the existence checks of the resync
//!   binary search
//! - fsync on write by default

use std::path::{Path, PathBuf};

use kgi_01_dag_storage::{reverse_seek_bound, BatchOperation, KVStoreError, KeyValueStore};
use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamily, ColumnFamilyDescriptor, DBCompressionType, Direction,
    IteratorMode, Options, WriteBatch, WriteOptions, DB,
};

/// Column family holding every DAG table.
pub const CF_DAG: &str = "dag";

/// RocksDB configuration.
#[derive(Debug, Clone)]
pub struct RocksDbConfig {
    /// Path to the database directory
    pub path: PathBuf,
    /// Block cache size in bytes (default: 256MB)
    pub block_cache_size: usize,
    /// Write buffer size in bytes (default: 64MB)
    pub write_buffer_size: usize,
    pub max_write_buffer_number: i32,
    pub target_file_size_base: u64,
    /// fsync after each write
    pub sync_writes: bool,
}

impl Default for RocksDbConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/kgi"),
            block_cache_size: 256 * 1024 * 1024,
            write_buffer_size: 64 * 1024 * 1024,
            max_write_buffer_number: 3,
            target_file_size_base: 64 * 1024 * 1024,
            sync_writes: true,
        }
    }
}

impl RocksDbConfig {
    /// Create config for testing (smaller buffers, no sync)
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 8 * 1024 * 1024,
            write_buffer_size: 4 * 1024 * 1024,
            max_write_buffer_number: 2,
            target_file_size_base: 4 * 1024 * 1024,
            sync_writes: false,
        }
    }
}

/// RocksDB-backed key-value store.
pub struct RocksDbStore {
    db: DB,
    config: RocksDbConfig,
}

impl RocksDbStore {
    /// Open or create the database.
    pub fn open(config: RocksDbConfig) -> Result<Self, KVStoreError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        opts.set_write_buffer_size(config.write_buffer_size);
        opts.set_max_write_buffer_number(config.max_write_buffer_number);
        opts.set_target_file_size_base(config.target_file_size_base);
        opts.set_compression_type(DBCompressionType::Snappy);

        let mut block_opts = BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        block_opts.set_block_cache(&Cache::new_lru_cache(config.block_cache_size));

        let mut cf_opts = Options::default();
        cf_opts.set_compression_type(DBCompressionType::Snappy);
        cf_opts.set_block_based_table_factory(&block_opts);
        let descriptors = vec![ColumnFamilyDescriptor::new(CF_DAG, cf_opts)];

        let db = DB::open_cf_descriptors(&opts, &config.path, descriptors).map_err(|e| {
            KVStoreError::IOError {
                message: format!("Failed to open RocksDB at {}: {}", config.path.display(), e),
            }
        })?;

        Ok(Self { db, config })
    }

    /// Open with default tuning.
    pub fn open_default(path: impl AsRef<Path>) -> Result<Self, KVStoreError> {
        Self::open(RocksDbConfig {
            path: path.as_ref().to_path_buf(),
            ..Default::default()
        })
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    fn cf(&self) -> Result<&ColumnFamily, KVStoreError> {
        self.db
            .cf_handle(CF_DAG)
            .ok_or_else(|| KVStoreError::CorruptionError {
                message: format!("column family '{CF_DAG}' missing"),
            })
    }

    fn write_options(&self) -> WriteOptions {
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        write_opts
    }
}

impl KeyValueStore for RocksDbStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KVStoreError> {
        self.db
            .get_cf(self.cf()?, key)
            .map_err(|e| KVStoreError::IOError {
                message: format!("RocksDB get failed: {}", e),
            })
    }

    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), KVStoreError> {
        self.db
            .put_cf_opt(self.cf()?, key, value, &self.write_options())
            .map_err(|e| KVStoreError::IOError {
                message: format!("RocksDB put failed: {}", e),
            })
    }

    fn delete(&mut self, key: &[u8]) -> Result<(), KVStoreError> {
        self.db
            .delete_cf_opt(self.cf()?, key, &self.write_options())
            .map_err(|e| KVStoreError::IOError {
                message: format!("RocksDB delete failed: {}", e),
            })
    }

    fn atomic_batch_write(&mut self, operations: Vec<BatchOperation>) -> Result<(), KVStoreError> {
        let cf = self.cf()?;
        let mut batch = WriteBatch::default();
        for op in operations {
            match op {
                BatchOperation::Put { key, value } => batch.put_cf(cf, &key, &value),
                BatchOperation::Delete { key } => batch.delete_cf(cf, &key),
            }
        }
        self.db
            .write_opt(batch, &self.write_options())
            .map_err(|e| KVStoreError::IOError {
                message: format!("RocksDB batch write failed: {}", e),
            })
    }

    fn exists(&self, key: &[u8]) -> Result<bool, KVStoreError> {
        self.db
            .get_pinned_cf(self.cf()?, key)
            .map(|v| v.is_some())
            .map_err(|e| KVStoreError::IOError {
                message: format!("RocksDB exists check failed: {}", e),
            })
    }

    fn prefix_scan(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KVStoreError> {
        let mut results = Vec::new();
        let iter = self
            .db
            .iterator_cf(self.cf()?, IteratorMode::From(prefix, Direction::Forward));
        for item in iter {
            let (key, value) = item.map_err(|e| KVStoreError::IOError {
                message: format!("RocksDB scan failed: {}", e),
            })?;
            if !key.starts_with(prefix) {
                break;
            }
            results.push((key.to_vec(), value.to_vec()));
        }
        Ok(results)
    }

    fn last_with_prefix(
        &self,
        prefix: &[u8],
        before: Option<&[u8]>,
    ) -> Result<Option<(Vec<u8>, Vec<u8>)>, KVStoreError> {
        let bound = reverse_seek_bound(prefix, before);
        let mode = match &bound {
            Some(bound) => IteratorMode::From(bound.as_slice(), Direction::Reverse),
            None => IteratorMode::End,
        };
        for item in self.db.iterator_cf(self.cf()?, mode) {
            let (key, value) = item.map_err(|e| KVStoreError::IOError {
                message: format!("RocksDB reverse seek failed: {}", e),
            })?;
            // A reverse seek lands on the bound itself when it is stored.
            if bound.as_deref().is_some_and(|bound| &key[..] >= bound) {
                continue;
            }
            if !key.starts_with(prefix) {
                return Ok(None);
            }
            return Ok(Some((key.to_vec(), value.to_vec())));
        }
        Ok(None)
    }
}
