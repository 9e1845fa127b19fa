//! Dependency tracking between parents and their unsaved descendants.
//!
//! The table maps a not-yet-persisted child hash to the set of parent
//! nodes blocked on it. Parents are shared references, so a parent
//! blocked on several children appears in several entries but carries a
//! single counter; when the counter reaches zero the parent is savable.

use parking_lot::Mutex;
use stateline_types::H256;
use std::collections::HashMap;
use std::sync::Arc;

use crate::items::DependentItem;

/// Maps a child hash to the parents waiting for it.
#[derive(Default)]
pub struct DependencyTable {
    inner: Mutex<HashMap<H256, Vec<Arc<DependentItem>>>>,
}

impl DependencyTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `dependent` (if any) needs `dep_hash` persisted
    /// first, and report whether an entry for `dep_hash` already existed
    /// before this call.
    ///
    /// The edge is recorded before the existence answer is produced, so
    /// a second parent discovering the same child always becomes a
    /// dependent - never lost. The dependent's counter is incremented
    /// under the same lock, keeping it consistent with a concurrent
    /// [`resolve`](Self::resolve).
    pub fn register(&self, dep_hash: H256, dependent: Option<&Arc<DependentItem>>) -> bool {
        let mut inner = self.inner.lock();
        let existed = inner.contains_key(&dep_hash);
        if let Some(dependent) = dependent {
            let entry = inner.entry(dep_hash).or_default();
            // Set semantics: one slot per parent hash
            if !entry.iter().any(|d| d.item.hash == dependent.item.hash) {
                dependent.increment();
                entry.push(Arc::clone(dependent));
            }
        }
        existed
    }

    /// Remove the entry keyed by `hash`, decrement every dependent's
    /// counter, and return the dependents that reached zero.
    pub fn resolve(&self, hash: &H256) -> Vec<Arc<DependentItem>> {
        let dependents = {
            let mut inner = self.inner.lock();
            inner.remove(hash).unwrap_or_default()
        };
        dependents
            .into_iter()
            .filter(|dependent| dependent.decrement() == 0)
            .collect()
    }

    /// Number of child hashes with waiting parents.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// True iff no dependencies are outstanding.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Drop every entry. Only used between rounds and on root changes.
    pub fn clear(&self) {
        self.inner.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::items::{NodeDataType, StateSyncItem};

    fn dependent(tag: &[u8]) -> Arc<DependentItem> {
        DependentItem::new(
            StateSyncItem::new(H256::keccak256(tag), NodeDataType::StateNode, 1),
            tag.to_vec(),
            false,
        )
    }

    #[test]
    fn register_reports_prior_existence() {
        let table = DependencyTable::new();
        let child = H256::keccak256(b"child");
        let parent_a = dependent(b"a");
        let parent_b = dependent(b"b");

        assert!(!table.register(child, Some(&parent_a)));
        assert!(table.register(child, Some(&parent_b)));
        assert_eq!(parent_a.counter(), 1);
        assert_eq!(parent_b.counter(), 1);
    }

    #[test]
    fn same_parent_registers_once() {
        let table = DependencyTable::new();
        let child = H256::keccak256(b"child");
        let parent = dependent(b"p");

        table.register(child, Some(&parent));
        table.register(child, Some(&parent));
        assert_eq!(parent.counter(), 1);

        let satisfied = table.resolve(&child);
        assert_eq!(satisfied.len(), 1);
        assert_eq!(satisfied[0].counter(), 0);
    }

    #[test]
    fn resolve_returns_only_satisfied_parents() {
        let table = DependencyTable::new();
        let child_a = H256::keccak256(b"child-a");
        let child_b = H256::keccak256(b"child-b");
        let parent = dependent(b"p");

        table.register(child_a, Some(&parent));
        table.register(child_b, Some(&parent));
        assert_eq!(parent.counter(), 2);

        assert!(table.resolve(&child_a).is_empty());
        let satisfied = table.resolve(&child_b);
        assert_eq!(satisfied.len(), 1);
        assert!(table.is_empty());
    }
}
