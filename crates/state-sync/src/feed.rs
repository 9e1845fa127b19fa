//! The state-sync feed: request building and response handling.
//!
//! The feed is a state machine with four externally driven operations:
//! [`activate`](StateSyncFeed::activate),
//! [`prepare_request`](StateSyncFeed::prepare_request),
//! [`handle_response`](StateSyncFeed::handle_response), and
//! [`reset_state_root`](StateSyncFeed::reset_state_root). All mutation
//! happens inside these operations; the outer dispatch loop owns the
//! scheduling.
//!
//! Concurrency contract: `handle_response` may run concurrently for
//! distinct batches, and concurrently with `prepare_request`. Four
//! coarse locks guard the shared resources (state store writes, code
//! store writes, the dependency table, the code-same-as-node set), and
//! a handler-tail mutex keeps the per-batch bookkeeping consistent.

use parking_lot::{Mutex, RwLock};
use stateline_storage::{Account, NodeRef, NodeStore, TrieNode};
use stateline_types::{H256, EMPTY_CODE_HASH, EMPTY_ROOT};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::branches::{BranchProgress, NodeProgressState};
use crate::config::StateSyncConfig;
use crate::deps::DependencyTable;
use crate::items::{DependentItem, NodeDataType, StateSyncBatch, StateSyncItem};
use crate::mode::SyncMode;
use crate::pending::PendingSyncItems;
use crate::progress::DetailedProgress;
use crate::saved_filter::RecentlySavedFilter;
use crate::{Result, StateSyncError};

/// Lifecycle state of the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncFeedState {
    /// Not synchronizing; waiting for activation
    Dormant,
    /// Actively requesting and persisting state
    Active,
}

/// Why the current round ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundOutcome {
    /// The target root itself was persisted
    RootSaved,
    /// Too many consecutive stall hints; a fresh root is needed
    Stalled,
}

/// Outcome of one `handle_response` call, fed back to the peer
/// allocation layer for quality scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncResponseHandlingResult {
    /// The batch was handled cleanly
    Ok,
    /// Some data arrived, but below the useful-response threshold
    Emptish,
    /// The batch carried mostly invalid data
    LesserQuality,
    /// The batch was completely empty without being bad quality
    NoProgress,
    /// No peer picked the batch up
    NotAssigned,
    /// The batch itself was malformed
    InternalError,
}

/// Result of offering one node to the pending set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddNodeResult {
    /// The node was queued for download
    Added,
    /// The node is already in flight; the dependency edge was recorded
    AlreadyRequested,
    /// The node is already persisted locally
    AlreadySaved,
}

/// The Merkle-Patricia state-trie synchronizer core.
pub struct StateSyncFeed {
    config: StateSyncConfig,

    state_db: Arc<dyn NodeStore>,
    code_db: Arc<dyn NodeStore>,
    /// Guards writes and membership checks on the state store
    state_db_lock: Mutex<()>,
    /// Guards writes and membership checks on the code store
    code_db_lock: Mutex<()>,
    /// Serializes the bookkeeping tail of `handle_response`
    handle_lock: Mutex<()>,

    pending: PendingSyncItems,
    deps: DependencyTable,
    saved_filter: RecentlySavedFilter,
    /// Code hashes equal to their account's storage root; when that
    /// node arrives it is written into both stores
    codes_same_as_nodes: Mutex<HashSet<H256>>,
    branch_progress: Mutex<BranchProgress>,
    progress: DetailedProgress,

    /// Batches handed out and not yet handled, by batch id
    in_flight: Mutex<HashMap<u64, Vec<StateSyncItem>>>,

    root_hash: RwLock<H256>,
    block_number: AtomicU64,
    feed_state: RwLock<SyncFeedState>,
    sync_mode: RwLock<SyncMode>,
    root_saved: AtomicBool,
    /// Consecutive stall hints; at the configured threshold the round
    /// is abandoned
    hints: AtomicU32,
    round_started_at: Mutex<Instant>,
    last_round_outcome: Mutex<Option<RoundOutcome>>,
}

impl StateSyncFeed {
    /// Create a dormant feed over the two stores, resuming persisted
    /// progress counters when a record for this chain is present.
    pub fn new(
        config: StateSyncConfig,
        state_db: Arc<dyn NodeStore>,
        code_db: Arc<dyn NodeStore>,
    ) -> Self {
        let persisted = code_db.get(&H256::ZERO).unwrap_or_else(|e| {
            warn!("could not read persisted sync progress: {e}");
            None
        });
        let progress = DetailedProgress::new(config.chain_id, persisted.as_deref());

        Self {
            pending: PendingSyncItems::new(config.priority_review_period),
            saved_filter: RecentlySavedFilter::new(config.saved_filter_capacity),
            deps: DependencyTable::new(),
            codes_same_as_nodes: Mutex::new(HashSet::new()),
            branch_progress: Mutex::new(BranchProgress::new(0)),
            progress,
            in_flight: Mutex::new(HashMap::new()),
            root_hash: RwLock::new(EMPTY_ROOT),
            block_number: AtomicU64::new(0),
            feed_state: RwLock::new(SyncFeedState::Dormant),
            sync_mode: RwLock::new(SyncMode::NONE),
            root_saved: AtomicBool::new(false),
            hints: AtomicU32::new(0),
            round_started_at: Mutex::new(Instant::now()),
            last_round_outcome: Mutex::new(None),
            state_db,
            code_db,
            state_db_lock: Mutex::new(()),
            code_db_lock: Mutex::new(()),
            handle_lock: Mutex::new(()),
            config,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SyncFeedState {
        *self.feed_state.read()
    }

    /// The target root and block number of the current round.
    pub fn current_target(&self) -> (u64, H256) {
        (self.block_number.load(Ordering::Relaxed), *self.root_hash.read())
    }

    /// Update the sync mode the feed operates under.
    pub fn set_sync_mode(&self, mode: SyncMode) {
        *self.sync_mode.write() = mode;
    }

    /// Progress counters.
    pub fn progress(&self) -> &DetailedProgress {
        &self.progress
    }

    /// Number of items waiting to be requested.
    pub fn pending_count(&self) -> usize {
        self.pending.count()
    }

    /// Number of child hashes with parents waiting on them.
    pub fn dependency_count(&self) -> usize {
        self.deps.len()
    }

    /// Number of batches handed out and not yet handled.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Outcome of the last finished round, consumed by the controller.
    pub fn take_round_outcome(&self) -> Option<RoundOutcome> {
        self.last_round_outcome.lock().take()
    }

    /// Enter the active state and start a new round clock.
    pub fn activate(&self) {
        let (number, root) = self.current_target();
        info!("state sync activated for block {number}, root {root}");
        *self.round_started_at.lock() = Instant::now();
        self.hints.store(0, Ordering::Relaxed);
        *self.feed_state.write() = SyncFeedState::Active;
    }

    /// Point the feed at a (possibly new) target root.
    ///
    /// Forbidden while active. With the current root this re-enqueues
    /// the items of every in-flight batch and keeps all in-memory state;
    /// with a new root all per-round state is dropped. The in-flight set
    /// is cleared in both cases.
    pub fn reset_state_root(&self, block_number: u64, new_root: H256) -> Result<()> {
        if self.state() == SyncFeedState::Active {
            return Err(StateSyncError::FeedActive);
        }

        let current_root = *self.root_hash.read();
        if new_root == current_root {
            info!("resuming state sync with the same root {new_root}");
            let drained: Vec<_> = self.in_flight.lock().drain().collect();
            for (_, items) in drained {
                for item in items {
                    self.push_missing(item, "returned from flight");
                }
            }
        } else {
            info!("switching state sync target to block {block_number}, root {new_root}");
            self.deps.clear();
            self.codes_same_as_nodes.lock().clear();
            self.pending.clear();
            self.root_saved.store(false, Ordering::Relaxed);
            *self.branch_progress.lock() = BranchProgress::new(block_number);
            self.in_flight.lock().clear();
            *self.root_hash.write() = new_root;
            self.block_number.store(block_number, Ordering::Relaxed);
        }

        if new_root != EMPTY_ROOT && !self.pending_is_exactly_root(&new_root) {
            self.add_node_to_pending(StateSyncItem::root(new_root), None, "initial");
        }
        Ok(())
    }

    fn pending_is_exactly_root(&self, root: &H256) -> bool {
        self.pending.count() == 1
            && self
                .pending
                .peek_state()
                .is_some_and(|item| item.hash == *root)
    }

    /// Drain the next request batch.
    ///
    /// Returns an empty batch when the feed is dormant, when state nodes
    /// are not part of the current sync mode, when the round is
    /// complete, or when nothing is queued.
    pub fn prepare_request(&self) -> StateSyncBatch {
        if self.state() != SyncFeedState::Active {
            return StateSyncBatch::empty();
        }
        if !self.sync_mode.read().contains(SyncMode::STATE_NODES) {
            return StateSyncBatch::empty();
        }
        if self.root_saved.load(Ordering::Relaxed) {
            self.finish_round(RoundOutcome::RootSaved);
            return StateSyncBatch::empty();
        }
        if self.hints.load(Ordering::Relaxed) >= self.config.reset_hint_threshold {
            self.finish_round(RoundOutcome::Stalled);
            return StateSyncBatch::empty();
        }

        let root = *self.root_hash.read();
        if root == EMPTY_ROOT {
            self.finish_round(RoundOutcome::RootSaved);
            return StateSyncBatch::empty();
        }
        let root_present = {
            let _guard = self.state_db_lock.lock();
            self.state_db.key_exists(&root).unwrap_or(false)
        };
        if root_present {
            self.root_saved.store(true, Ordering::Relaxed);
            self.finish_round(RoundOutcome::RootSaved);
            return StateSyncBatch::empty();
        }

        let items = self.pending.take_batch(self.config.batch_size);
        if items.is_empty() {
            if self.round_started_at.lock().elapsed() > self.config.response_grace {
                let hints = self.hints.fetch_add(1, Ordering::Relaxed) + 1;
                debug!("nothing to request while the round is incomplete (hint {hints})");
            }
            return StateSyncBatch::empty();
        }

        self.progress
            .requested_nodes
            .fetch_add(items.len() as u64, Ordering::Relaxed);
        let batch = StateSyncBatch::new(items.clone());
        self.in_flight.lock().insert(batch.id, items);
        trace!("prepared batch {} with {} items", batch.id, batch.len());
        batch
    }

    /// Handle the responses for a previously prepared batch.
    ///
    /// Never fails: every abnormality is classified into a
    /// [`SyncResponseHandlingResult`] and recovered locally.
    pub fn handle_response(&self, mut batch: StateSyncBatch) -> SyncResponseHandlingResult {
        if self.in_flight.lock().remove(&batch.id).is_none() {
            // Already handled, or cancelled by a root reset.
            return SyncResponseHandlingResult::Ok;
        }

        self.review_priorities();

        let Some(requested) = batch.requested.take() else {
            let _tail = self.handle_lock.lock();
            self.progress
                .invalid_format_count
                .fetch_add(1, Ordering::Relaxed);
            self.persist_progress();
            warn!("batch {} arrived without its requested items", batch.id);
            return SyncResponseHandlingResult::InternalError;
        };

        let Some(responses) = batch.responses.take() else {
            for item in requested {
                self.push_missing(item, "not assigned");
            }
            let _tail = self.handle_lock.lock();
            self.progress
                .not_assigned_count
                .fetch_add(1, Ordering::Relaxed);
            self.persist_progress();
            return SyncResponseHandlingResult::NotAssigned;
        };

        let mut non_empty = 0usize;
        let mut invalid_nodes = 0usize;

        for (index, item) in requested.iter().enumerate() {
            match responses.get(index).and_then(Option::as_ref) {
                None => {
                    // Null payload or truncated response array.
                    self.push_missing(item.clone(), "missing");
                }
                Some(data) => {
                    non_empty += 1;
                    if H256::keccak256(data) != item.hash {
                        trace!("peer sent wrong data for {}", item.hash);
                        invalid_nodes += 1;
                        self.push_missing(item.clone(), "hash mismatch");
                        continue;
                    }
                    self.progress.handled_nodes.fetch_add(1, Ordering::Relaxed);
                    match item.kind {
                        NodeDataType::Code => self.save_node(item, data),
                        _ => self.handle_trie_node(item, data, &mut invalid_nodes),
                    }
                }
            }
        }

        let _tail = self.handle_lock.lock();
        self.progress.update_seconds_in_sync();
        self.persist_progress();

        let requested_len = requested.len().max(1);
        let is_emptish =
            (non_empty as f64 / requested_len as f64) < self.config.emptish_ratio;
        let is_bad_quality = non_empty > self.config.bad_quality_floor
            && (invalid_nodes as f64 / requested_len as f64) > self.config.bad_quality_ratio;
        let is_empty = non_empty == 0 && !is_bad_quality;

        if is_emptish {
            self.hints.fetch_add(1, Ordering::Relaxed);
        } else {
            self.hints.store(0, Ordering::Relaxed);
        }

        let result = if is_empty {
            SyncResponseHandlingResult::NoProgress
        } else if is_emptish {
            SyncResponseHandlingResult::Emptish
        } else if is_bad_quality {
            SyncResponseHandlingResult::LesserQuality
        } else {
            SyncResponseHandlingResult::Ok
        };

        let counter = match result {
            SyncResponseHandlingResult::Ok => &self.progress.ok_count,
            SyncResponseHandlingResult::LesserQuality => &self.progress.bad_quality_count,
            _ => &self.progress.emptish_count,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        debug!(
            "batch {}: {} requested, {} non-empty, {} invalid -> {:?}",
            batch.id,
            requested.len(),
            non_empty,
            invalid_nodes,
            result
        );
        result
    }

    /// Offer one node to the pending set, deduplicating against the
    /// recently-saved filter, the stores, and the in-flight dependency
    /// entries.
    ///
    /// When a `dependent` parent is given, its edge is recorded before
    /// the already-requested check, so a second parent discovering the
    /// same child is always registered.
    pub fn add_node_to_pending(
        &self,
        item: StateSyncItem,
        dependent: Option<&Arc<DependentItem>>,
        reason: &str,
    ) -> AddNodeResult {
        if self.saved_filter.get(&item.hash) {
            self.progress
                .checked_in_cache
                .fetch_add(1, Ordering::Relaxed);
            self.report_branch(&item, NodeProgressState::AlreadySaved);
            return AddNodeResult::AlreadySaved;
        }

        let exists = {
            let (db, db_lock) = match item.kind {
                NodeDataType::Code => (&self.code_db, &self.code_db_lock),
                _ => (&self.state_db, &self.state_db_lock),
            };
            let _guard = db_lock.lock();
            db.key_exists(&item.hash).unwrap_or_else(|e| {
                debug!("membership check for {} failed: {e}", item.hash);
                false
            })
        };
        self.progress.db_checks.fetch_add(1, Ordering::Relaxed);
        if exists {
            self.progress.state_was_there.fetch_add(1, Ordering::Relaxed);
            self.saved_filter.set(item.hash);
            self.report_branch(&item, NodeProgressState::AlreadySaved);
            return AddNodeResult::AlreadySaved;
        }
        self.progress
            .state_was_not_there
            .fetch_add(1, Ordering::Relaxed);

        if self.deps.register(item.hash, dependent) {
            trace!("{reason} {} is already requested", item.hash);
            return AddNodeResult::AlreadyRequested;
        }

        self.report_branch(&item, NodeProgressState::Requested);
        let saved = self.progress.saved_nodes.load(Ordering::Relaxed);
        trace!("queueing {reason} {}", item.hash);
        self.pending.push(item, saved);
        AddNodeResult::Added
    }

    fn handle_trie_node(&self, item: &StateSyncItem, data: &[u8], invalid_nodes: &mut usize) {
        match TrieNode::decode(data) {
            TrieNode::Unknown => {
                debug!("undecodable node data for {}", item.hash);
                *invalid_nodes += 1;
            }
            TrieNode::Branch { children, .. } => {
                let dependent = DependentItem::new(item.clone(), data.to_vec(), false);
                let mut seen = HashSet::new();
                for index in (0u8..16).rev() {
                    match &children[index as usize] {
                        Some(NodeRef::Hash(child_hash)) => {
                            // Two slots holding the same child enqueue once.
                            if !seen.insert(*child_hash) {
                                continue;
                            }
                            let child = StateSyncItem::branch_child(item, *child_hash, index);
                            self.add_node_to_pending(child, Some(&dependent), "branch child");
                        }
                        // An inlined child persists together with this node.
                        Some(NodeRef::Embedded(_)) => {}
                        None => {
                            let mut progress = self.branch_progress.lock();
                            progress.report_synced(
                                item.level + 1,
                                item.branch_child_index,
                                index as i8,
                                item.kind,
                                NodeProgressState::Empty,
                            );
                        }
                    }
                }
                if dependent.counter() == 0 {
                    self.save_node(&dependent.item, &dependent.value);
                }
            }
            TrieNode::Extension { path, child } => match child {
                NodeRef::Embedded(_) => self.save_node(item, data),
                NodeRef::Hash(child_hash) => {
                    let dependent = DependentItem::new(item.clone(), data.to_vec(), false);
                    let child_item =
                        StateSyncItem::extension_child(item, child_hash, path.len());
                    if self.add_node_to_pending(child_item, Some(&dependent), "extension child")
                        == AddNodeResult::AlreadySaved
                    {
                        self.save_node(item, data);
                    }
                }
            },
            TrieNode::Leaf { value, .. } => self.handle_leaf(item, data, &value, invalid_nodes),
        }
    }

    fn handle_leaf(
        &self,
        item: &StateSyncItem,
        data: &[u8],
        value: &[u8],
        invalid_nodes: &mut usize,
    ) {
        if item.kind == NodeDataType::StorageNode {
            // Storage leaves carry no child references.
            self.pending.set_max_storage_level(64);
            self.save_node(item, data);
            return;
        }

        // An account leaf proves the state trie bottom has been reached.
        self.pending.set_max_state_level(64);

        let account = match Account::decode(value) {
            Ok(account) => account,
            Err(e) => {
                debug!("undecodable account leaf {}: {e}", item.hash);
                *invalid_nodes += 1;
                return;
            }
        };

        let dependent = DependentItem::new(item.clone(), data.to_vec(), true);
        let (code_hash, storage_root) = account.dependencies();

        if code_hash != EMPTY_CODE_HASH {
            if code_hash == storage_root {
                // The code blob is byte-identical to the storage root
                // node; write it into both stores when it arrives.
                self.codes_same_as_nodes.lock().insert(code_hash);
            } else {
                let code_item = StateSyncItem::new(code_hash, NodeDataType::Code, 0);
                self.add_node_to_pending(code_item, Some(&dependent), "account code");
            }
        }

        if storage_root != EMPTY_ROOT {
            let storage_item = StateSyncItem::new(storage_root, NodeDataType::StorageNode, 0);
            self.add_node_to_pending(storage_item, Some(&dependent), "account storage");
        }

        if dependent.counter() == 0 {
            self.progress.saved_accounts.fetch_add(1, Ordering::Relaxed);
            self.save_node(item, data);
        }
    }

    /// Persist a completed node and cascade to any satisfied parents.
    fn save_node(&self, item: &StateSyncItem, data: &[u8]) {
        match item.kind {
            NodeDataType::StateNode => {
                let _guard = self.state_db_lock.lock();
                if let Err(e) = self.state_db.put(&item.hash, data) {
                    warn!("state store write for {} failed: {e}", item.hash);
                    return;
                }
                drop(_guard);
                self.progress.saved_state.fetch_add(1, Ordering::Relaxed);
            }
            NodeDataType::StorageNode => {
                {
                    let _guard = self.state_db_lock.lock();
                    if let Err(e) = self.state_db.put(&item.hash, data) {
                        warn!("state store write for {} failed: {e}", item.hash);
                        return;
                    }
                }
                self.progress.saved_storage.fetch_add(1, Ordering::Relaxed);

                // An account pre-committed to this node doubling as its
                // code blob.
                if self.codes_same_as_nodes.lock().remove(&item.hash) {
                    let _guard = self.code_db_lock.lock();
                    if let Err(e) = self.code_db.put(&item.hash, data) {
                        warn!("code store write for {} failed: {e}", item.hash);
                    }
                }
            }
            NodeDataType::Code => {
                let _guard = self.code_db_lock.lock();
                if let Err(e) = self.code_db.put(&item.hash, data) {
                    warn!("code store write for {} failed: {e}", item.hash);
                    return;
                }
                drop(_guard);
                self.progress.saved_code.fetch_add(1, Ordering::Relaxed);
            }
        }

        self.progress.saved_nodes.fetch_add(1, Ordering::Relaxed);
        self.progress
            .data_size
            .fetch_add(data.len() as u64, Ordering::Relaxed);
        self.saved_filter.set(item.hash);
        self.report_branch(item, NodeProgressState::Saved);

        if item.is_root && *self.root_hash.read() == item.hash {
            info!("target state root {} fully persisted", item.hash);
            self.root_saved.store(true, Ordering::Relaxed);
        }

        self.possibly_save_dependent_nodes(&item.hash);
    }

    /// Saving `hash` may complete parents; save every parent whose last
    /// outstanding descendant this was, cascading upwards.
    fn possibly_save_dependent_nodes(&self, hash: &H256) {
        for dependent in self.deps.resolve(hash) {
            if dependent.is_account {
                self.progress.saved_accounts.fetch_add(1, Ordering::Relaxed);
            }
            self.save_node(&dependent.item, &dependent.value);
        }
    }

    fn push_missing(&self, item: StateSyncItem, reason: &str) {
        trace!("requeueing {} ({reason})", item.hash);
        let saved = self.progress.saved_nodes.load(Ordering::Relaxed);
        self.pending.push(item, saved);
    }

    fn report_branch(&self, item: &StateSyncItem, state: NodeProgressState) {
        self.branch_progress.lock().report_synced(
            item.level,
            item.parent_branch_child_index,
            item.branch_child_index,
            item.kind,
            state,
        );
    }

    fn review_priorities(&self) {
        let stalling = self.hints.load(Ordering::Relaxed) > 0;
        let snapshot = self.progress.snapshot();
        if let Some(description) = self.pending.recalculate_priorities(&snapshot, stalling) {
            let line = self.branch_progress.lock().report_line();
            info!("{line}; {description}");
        }
    }

    fn persist_progress(&self) {
        let bytes = self.progress.serialize();
        let _guard = self.code_db_lock.lock();
        if let Err(e) = self.code_db.put(&H256::ZERO, &bytes) {
            // Never let a checkpoint failure take down the handler.
            warn!("could not persist sync progress: {e}");
        }
    }

    fn finish_round(&self, outcome: RoundOutcome) {
        self.verify_post_sync_cleanup(outcome);
        self.pending.clear();
        self.in_flight.lock().clear();
        *self.feed_state.write() = SyncFeedState::Dormant;
        *self.last_round_outcome.lock() = Some(outcome);
        let (number, root) = self.current_target();
        info!("state sync round for block {number} (root {root}) finished: {outcome:?}");
    }

    fn verify_post_sync_cleanup(&self, outcome: RoundOutcome) {
        if !self.deps.is_empty() {
            match outcome {
                RoundOutcome::RootSaved => warn!(
                    "dependency table still holds {} entries after the root was saved - \
                     this signals corruption; clearing",
                    self.deps.len()
                ),
                RoundOutcome::Stalled => debug!(
                    "dropping {} unresolved dependency entries of the stalled round",
                    self.deps.len()
                ),
            }
            self.deps.clear();
        }
    }
}
