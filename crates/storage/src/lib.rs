//! # Stateline Storage
//!
//! Persistence and decoding layer for the Stateline state synchronizer:
//!
//! - **Node stores**: the byte-keyed [`NodeStore`] abstraction over the
//!   two content-addressed stores (state-trie nodes and contract code),
//!   a RocksDB-backed implementation with one column family per store,
//!   and an in-memory implementation for tests and light embedders
//! - **Trie-node parser**: decoding of raw RLP blobs into branch,
//!   extension, and leaf nodes with hash-or-embedded child references
//! - **Account decoder**: extraction of `code_hash` and `storage_root`
//!   from account leaf payloads

#![deny(missing_docs)]
#![deny(unsafe_code)]

pub mod account;
pub mod db;
pub mod store;
pub mod trie;

pub use account::Account;
pub use db::{ColumnStore, Database, DatabaseConfig};
pub use store::{MemoryNodeStore, NodeStore};
pub use trie::{NodeRef, TrieNode};

use thiserror::Error;

/// Storage error types
#[derive(Error, Debug)]
pub enum StorageError {
    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// Key not found
    #[error("key not found: {0}")]
    NotFound(String),

    /// Column family not found
    #[error("column family not found: {0}")]
    ColumnFamilyNotFound(String),

    /// Decoding error
    #[error("decoding error: {0}")]
    Decoding(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations
pub type Result<T> = std::result::Result<T, StorageError>;
