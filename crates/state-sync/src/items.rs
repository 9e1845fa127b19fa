//! Units of work for the state synchronizer.
//!
//! A [`StateSyncItem`] is one hash to fetch; a [`StateSyncBatch`] is a
//! bounded group of items requested from one peer; a [`DependentItem`]
//! is a parsed parent node held in memory until every descendant it
//! references has been persisted.

use stateline_types::H256;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

/// Which backing store holds an item and how its bytes are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeDataType {
    /// A node of the account state trie
    StateNode,
    /// A node of some account's storage trie
    StorageNode,
    /// Contract bytecode
    Code,
}

/// A unit of work: one content address to download.
///
/// Two items with equal `hash` and `kind` are interchangeable for
/// fetching; level, rightness, and the branch indices only affect
/// prioritization and progress reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateSyncItem {
    /// The content address being fetched
    pub hash: H256,
    /// Which store the bytes belong to
    pub kind: NodeDataType,
    /// Depth in its trie (root = 0; at most 64 in a hex trie)
    pub level: u8,
    /// How far right the subtree sits within its trie; used for
    /// priority ordering and progress reporting
    pub rightness: u64,
    /// Index of the grandparent branch slot this item descends from
    /// (-1 when not applicable)
    pub parent_branch_child_index: i8,
    /// Index of the parent branch slot holding this item (-1 when not
    /// applicable)
    pub branch_child_index: i8,
    /// True iff this item's hash is the current target root
    pub is_root: bool,
}

impl StateSyncItem {
    /// Create a plain item with no branch bookkeeping.
    pub fn new(hash: H256, kind: NodeDataType, level: u8) -> Self {
        Self {
            hash,
            kind,
            level,
            rightness: 0,
            parent_branch_child_index: -1,
            branch_child_index: -1,
            is_root: false,
        }
    }

    /// Create the root item for a sync round.
    pub fn root(hash: H256) -> Self {
        Self {
            is_root: true,
            ..Self::new(hash, NodeDataType::StateNode, 0)
        }
    }

    /// Create the child item for slot `child_index` of a branch.
    pub fn branch_child(parent: &StateSyncItem, hash: H256, child_index: u8) -> Self {
        Self {
            hash,
            kind: parent.kind,
            level: parent.level + 1,
            rightness: parent.rightness
                + rightness_step(parent.level) * u64::from(child_index),
            parent_branch_child_index: parent.branch_child_index,
            branch_child_index: child_index as i8,
            is_root: false,
        }
    }

    /// Create the single child item of an extension whose path fragment
    /// spans `path_nibbles` nibbles.
    pub fn extension_child(parent: &StateSyncItem, hash: H256, path_nibbles: usize) -> Self {
        Self {
            hash,
            kind: parent.kind,
            level: parent.level + path_nibbles as u8,
            rightness: parent.rightness + rightness_step(parent.level) * 16 - 1,
            parent_branch_child_index: -1,
            branch_child_index: -1,
            is_root: false,
        }
    }
}

/// Rightness contribution of one child step below `level`.
///
/// Levels past 7 all contribute with multiplier 1; by then the ordering
/// of the top of the trie dominates.
pub(crate) fn rightness_step(level: u8) -> u64 {
    16u64.pow(7u32.saturating_sub(u32::from(level)))
}

/// A parsed parent node waiting for its unsaved descendants.
///
/// One `DependentItem` is shared (via `Arc`) between every dependency-
/// table entry that references it; the counter tracks how many of its
/// descendants are still outstanding. Equality is by the parent's hash
/// alone.
#[derive(Debug)]
pub struct DependentItem {
    /// The parent item
    pub item: StateSyncItem,
    /// Raw bytes of the parent, kept in memory until savable
    pub value: Vec<u8>,
    /// True iff this parent is an account leaf; satisfying it also
    /// counts towards the saved-accounts statistic
    pub is_account: bool,
    counter: AtomicU32,
}

impl DependentItem {
    /// Create a dependent with no outstanding descendants yet.
    pub fn new(item: StateSyncItem, value: Vec<u8>, is_account: bool) -> Arc<Self> {
        Arc::new(Self {
            item,
            value,
            is_account,
            counter: AtomicU32::new(0),
        })
    }

    /// Record one more outstanding descendant.
    pub fn increment(&self) {
        self.counter.fetch_add(1, Ordering::SeqCst);
    }

    /// Record one descendant as persisted; returns the remaining count.
    pub fn decrement(&self) -> u32 {
        self.counter.fetch_sub(1, Ordering::SeqCst) - 1
    }

    /// Number of descendants not yet persisted.
    pub fn counter(&self) -> u32 {
        self.counter.load(Ordering::SeqCst)
    }
}

impl PartialEq for DependentItem {
    fn eq(&self, other: &Self) -> bool {
        self.item.hash == other.item.hash
    }
}

impl Eq for DependentItem {}

impl std::hash::Hash for DependentItem {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.item.hash.hash(state);
    }
}

static NEXT_BATCH_ID: AtomicU64 = AtomicU64::new(1);

/// A bounded group of items requested together from a single peer.
///
/// The dispatcher returns the same batch with `responses` attached:
/// `None` when no peer picked the batch up, or one optional payload per
/// requested item (possibly truncated by the peer).
#[derive(Debug)]
pub struct StateSyncBatch {
    /// Process-unique id used for in-flight tracking
    pub id: u64,
    /// The items requested in this batch; absent only on batches that
    /// were corrupted on their way back from the wire
    pub requested: Option<Vec<StateSyncItem>>,
    /// Response payloads aligned with `requested`
    pub responses: Option<Vec<Option<Vec<u8>>>>,
}

impl StateSyncBatch {
    /// Create a new batch around the given items.
    pub fn new(requested: Vec<StateSyncItem>) -> Self {
        Self {
            id: NEXT_BATCH_ID.fetch_add(1, Ordering::Relaxed),
            requested: Some(requested),
            responses: None,
        }
    }

    /// An empty batch (nothing to request this round).
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Number of requested items.
    pub fn len(&self) -> usize {
        self.requested.as_ref().map_or(0, Vec::len)
    }

    /// True iff the batch requests nothing.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
