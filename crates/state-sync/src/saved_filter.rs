//! Bounded LRU set of hashes known to be persisted.
//!
//! Membership answers "was this hash definitely written already", which
//! lets the insertion path skip a store lookup. False negatives only
//! cost a store check; false positives are forbidden (they would drop
//! work), so entries are inserted strictly after a successful write.

use parking_lot::Mutex;
use stateline_types::H256;
use std::collections::{BTreeMap, HashMap};

/// A bounded set with strict least-recently-used eviction.
pub struct RecentlySavedFilter {
    capacity: usize,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    /// hash -> recency tick of the last touch
    entries: HashMap<H256, u64>,
    /// recency tick -> hash, ordered oldest first
    order: BTreeMap<u64, H256>,
    /// monotonic tick source
    tick: u64,
}

impl Inner {
    fn touch(&mut self, hash: H256) {
        self.tick += 1;
        if let Some(old_tick) = self.entries.insert(hash, self.tick) {
            self.order.remove(&old_tick);
        }
        self.order.insert(self.tick, hash);
    }
}

impl RecentlySavedFilter {
    /// Create a filter holding at most `capacity` hashes.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "filter capacity must be positive");
        Self {
            capacity,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Report membership, refreshing the hash's recency on a hit.
    pub fn get(&self, hash: &H256) -> bool {
        let mut inner = self.inner.lock();
        if inner.entries.contains_key(hash) {
            inner.touch(*hash);
            true
        } else {
            false
        }
    }

    /// Insert a hash, evicting the least-recently-used on overflow.
    pub fn set(&self, hash: H256) {
        let mut inner = self.inner.lock();
        inner.touch(hash);
        if inner.entries.len() > self.capacity {
            if let Some((&oldest_tick, &oldest_hash)) = inner.order.iter().next() {
                inner.order.remove(&oldest_tick);
                inner.entries.remove(&oldest_hash);
            }
        }
    }

    /// Number of hashes currently tracked.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// True iff no hashes are tracked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h(n: u8) -> H256 {
        H256::new([n; 32])
    }

    #[test]
    fn membership_and_eviction_by_recency() {
        let filter = RecentlySavedFilter::new(3);
        filter.set(h(1));
        filter.set(h(2));
        filter.set(h(3));

        // Touch 1 so 2 becomes the oldest
        assert!(filter.get(&h(1)));

        filter.set(h(4));
        assert!(!filter.get(&h(2)), "least-recently-used entry must go");
        assert!(filter.get(&h(1)));
        assert!(filter.get(&h(3)));
        assert!(filter.get(&h(4)));
        assert_eq!(filter.len(), 3);
    }

    #[test]
    fn no_false_positives() {
        let filter = RecentlySavedFilter::new(8);
        filter.set(h(1));
        assert!(!filter.get(&h(2)));
    }

    #[test]
    fn reinsert_refreshes_recency() {
        let filter = RecentlySavedFilter::new(2);
        filter.set(h(1));
        filter.set(h(2));
        filter.set(h(1));
        filter.set(h(3));
        assert!(!filter.get(&h(2)));
        assert!(filter.get(&h(1)));
        assert!(filter.get(&h(3)));
    }
}
