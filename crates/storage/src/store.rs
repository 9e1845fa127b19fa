//! Byte-keyed node store abstraction.
//!
//! The synchronizer persists every downloaded item into one of two
//! content-addressed stores: state-trie nodes (including storage-trie
//! nodes) and contract code. Both are consumed through the [`NodeStore`]
//! trait so the backing database can be swapped.

use parking_lot::RwLock;
use stateline_types::H256;
use std::collections::HashMap;

use crate::Result;

/// A content-addressed key-value store.
///
/// Single-key operations must be linearizable; no transactional
/// guarantees are required beyond that.
pub trait NodeStore: Send + Sync {
    /// Get the value stored under `key`.
    fn get(&self, key: &H256) -> Result<Option<Vec<u8>>>;

    /// Store `value` under `key`. Overwrites silently; values are
    /// content-addressed so an overwrite is always byte-identical.
    fn put(&self, key: &H256, value: &[u8]) -> Result<()>;

    /// Check whether `key` is present without materializing the value.
    fn key_exists(&self, key: &H256) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }
}

/// In-memory [`NodeStore`] backed by a hash map.
///
/// Used by tests and by embedders that keep synced state ephemeral.
#[derive(Debug, Default)]
pub struct MemoryNodeStore {
    entries: RwLock<HashMap<H256, Vec<u8>>>,
}

impl MemoryNodeStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Check if the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl NodeStore for MemoryNodeStore {
    fn get(&self, key: &H256) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn put(&self, key: &H256, value: &[u8]) -> Result<()> {
        self.entries.write().insert(*key, value.to_vec());
        Ok(())
    }

    fn key_exists(&self, key: &H256) -> Result<bool> {
        Ok(self.entries.read().contains_key(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_roundtrip() {
        let store = MemoryNodeStore::new();
        let key = H256::keccak256(b"node");

        assert!(!store.key_exists(&key).unwrap());
        store.put(&key, b"payload").unwrap();
        assert!(store.key_exists(&key).unwrap());
        assert_eq!(store.get(&key).unwrap().as_deref(), Some(&b"payload"[..]));
        assert_eq!(store.len(), 1);
    }
}
