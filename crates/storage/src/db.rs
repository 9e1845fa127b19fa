//! RocksDB wrapper with one column family per node store.
//!
//! A single database holds both content-addressed stores the
//! synchronizer writes into: the `state` family for state- and
//! storage-trie nodes and the `code` family for contract bytecode.

use parking_lot::RwLock;
use rocksdb::{BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, MultiThreaded, Options, DB};
use stateline_types::H256;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use crate::store::NodeStore;
use crate::{Result, StorageError};

/// Column family names
pub mod cf {
    /// State column family - state-trie and storage-trie nodes keyed by hash
    pub const STATE: &str = "state";
    /// Code column family - contract bytecode keyed by hash (also holds
    /// the persisted sync-progress record under the all-zero key)
    pub const CODE: &str = "code";

    /// All column families
    pub const ALL: &[&str] = &[STATE, CODE];
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Path to the database directory
    pub path: String,
    /// Enable compression (LZ4)
    pub enable_compression: bool,
    /// Maximum number of open files
    pub max_open_files: i32,
    /// Write buffer size in bytes
    pub write_buffer_size: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: String::from("./data/stateline"),
            enable_compression: true,
            max_open_files: 512,
            write_buffer_size: 64 * 1024 * 1024, // 64 MB
        }
    }
}

/// RocksDB wrapper exposing one [`NodeStore`] per column family.
pub struct Database {
    inner: DBWithThreadMode<MultiThreaded>,
    config: DatabaseConfig,
    /// Lock for coordinating writes
    write_lock: RwLock<()>,
}

impl Database {
    /// Open or create a database at the configured path.
    pub fn open(config: DatabaseConfig) -> Result<Self> {
        info!("Opening node database at: {}", config.path);

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        opts.set_max_open_files(config.max_open_files);
        opts.set_write_buffer_size(config.write_buffer_size);

        if config.enable_compression {
            opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        }

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = cf::ALL
            .iter()
            .map(|name| {
                let mut cf_opts = Options::default();
                if config.enable_compression {
                    cf_opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
                }
                ColumnFamilyDescriptor::new(*name, cf_opts)
            })
            .collect();

        let path = Path::new(&config.path);
        let db = DB::open_cf_descriptors(&opts, path, cf_descriptors)
            .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(Self {
            inner: db,
            config,
            write_lock: RwLock::new(()),
        })
    }

    /// Open a database with default configuration at `path`.
    pub fn open_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = DatabaseConfig {
            path: path.as_ref().to_string_lossy().to_string(),
            ..Default::default()
        };
        Self::open(config)
    }

    /// Get a column family handle
    fn cf_handle(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.inner
            .cf_handle(name)
            .ok_or_else(|| StorageError::ColumnFamilyNotFound(name.to_string()))
    }

    /// Get a value from a column family
    pub fn get(&self, cf_name: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let cf = self.cf_handle(cf_name)?;
        self.inner
            .get_cf(&cf, key)
            .map_err(|e| StorageError::Database(e.to_string()))
    }

    /// Put a value into a column family
    pub fn put(&self, cf_name: &str, key: &[u8], value: &[u8]) -> Result<()> {
        let cf = self.cf_handle(cf_name)?;
        let _guard = self.write_lock.write();
        self.inner
            .put_cf(&cf, key, value)
            .map_err(|e| StorageError::Database(e.to_string()))
    }

    /// Check if a key exists in a column family
    pub fn exists(&self, cf_name: &str, key: &[u8]) -> Result<bool> {
        let cf = self.cf_handle(cf_name)?;
        if !self.inner.key_may_exist_cf(&cf, key) {
            return Ok(false);
        }
        self.get(cf_name, key).map(|v| v.is_some())
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        debug!("Closing node database at: {}", self.config.path);
        // RocksDB handles cleanup automatically
    }
}

/// A [`NodeStore`] bound to one column family of a shared [`Database`].
#[derive(Clone)]
pub struct ColumnStore {
    db: Arc<Database>,
    cf: &'static str,
}

impl ColumnStore {
    /// The state-node store view of `db`.
    pub fn state(db: Arc<Database>) -> Self {
        Self {
            db,
            cf: cf::STATE,
        }
    }

    /// The code store view of `db`.
    pub fn code(db: Arc<Database>) -> Self {
        Self { db, cf: cf::CODE }
    }
}

impl NodeStore for ColumnStore {
    fn get(&self, key: &H256) -> Result<Option<Vec<u8>>> {
        self.db.get(self.cf, key.as_bytes())
    }

    fn put(&self, key: &H256, value: &[u8]) -> Result<()> {
        self.db.put(self.cf, key.as_bytes(), value)
    }

    fn key_exists(&self, key: &H256) -> Result<bool> {
        self.db.exists(self.cf, key.as_bytes())
    }
}
