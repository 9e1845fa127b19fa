//! # Stateline State Sync
//!
//! This crate reconstructs the full world-state below a target state
//! root - every trie node, every contract code blob, every storage trie -
//! into two local content-addressed stores, while tolerating peers that
//! are slow, malicious, or partially responsive.
//!
//! ## Overview
//!
//! Given a 32-byte state root known to exist on the network, the feed
//! walks the Merkle-Patricia DAG on demand: the root is requested first,
//! parsing its bytes discovers child hashes, children are queued,
//! batched, dispatched, verified, and persisted bottom-up so that a
//! parent is never written before all of its descendants.
//!
//! ## Key Components
//!
//! - **[`StateSyncFeed`]**: the core state machine. `prepare_request`
//!   drains the pending queue into bounded batches; `handle_response`
//!   verifies payloads, schedules children, and persists completed
//!   subtrees.
//!
//! - **[`PendingSyncItems`]**: prioritized multi-stream work queue of
//!   items still to fetch.
//!
//! - **[`DependencyTable`]**: holds parent nodes in memory until all of
//!   their descendants are persisted.
//!
//! - **[`StateSyncController`]**: owns the feed lifecycle - activation
//!   on sync-mode changes, root selection, stall detection, resumption.
//!
//! - **[`StateSyncDispatcher`]**: the outer loop pairing prepared
//!   batches with a peer pool and feeding responses back.
//!
//! ## Data Flow
//!
//! 1. The controller activates on a new target root; that root becomes
//!    the sole entry in the pending queue.
//! 2. The feed drains up to the batch limit per request and hands the
//!    batch to the dispatcher.
//! 3. Responses are verified item by item (Keccak256 of the payload must
//!    equal the requested hash), parsed as code or trie nodes, and any
//!    child references are walked back into the queue.
//! 4. Nodes whose descendants are all persisted are written; satisfied
//!    parents cascade.
//! 5. When the target root itself is saved, the round ends.
//!
//! ## Restart Behavior
//!
//! Progress counters are serialized into the code store under the
//! all-zero key after every handled batch, and reloaded on construction,
//! so statistics survive restarts.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod branches;
pub mod config;
pub mod controller;
pub mod deps;
pub mod dispatcher;
pub mod feed;
pub mod items;
pub mod mode;
pub mod pending;
pub mod progress;
pub mod saved_filter;

pub use branches::{BranchProgress, NodeProgressState};
pub use config::StateSyncConfig;
pub use controller::{BestHeaderSource, StateSyncController, SyncHead};
pub use deps::DependencyTable;
pub use dispatcher::{StateSyncDispatcher, SyncPeerPool};
pub use feed::{
    AddNodeResult, RoundOutcome, StateSyncFeed, SyncFeedState, SyncResponseHandlingResult,
};
pub use items::{DependentItem, NodeDataType, StateSyncBatch, StateSyncItem};
pub use mode::{SyncMode, SyncModeChanged, SyncModeSelector};
pub use pending::PendingSyncItems;
pub use progress::{DetailedProgress, ProgressSnapshot};
pub use saved_filter::RecentlySavedFilter;

use thiserror::Error;

/// Errors surfaced by the controller-facing operations.
///
/// The response handler itself never fails; it reports a
/// [`SyncResponseHandlingResult`] and recovers locally.
#[derive(Debug, Error)]
pub enum StateSyncError {
    /// `reset_state_root` was called while the feed was active.
    #[error("cannot reset the state root while the feed is active")]
    FeedActive,

    /// A store operation failed in a context where it cannot be
    /// swallowed locally.
    #[error(transparent)]
    Storage(#[from] stateline_storage::StorageError),
}

/// Result type for controller-facing operations.
pub type Result<T> = std::result::Result<T, StateSyncError>;
