//! Sync-mode bitmask and change notifications.
//!
//! The node's sync planner decides which payloads are being synchronized
//! at any moment (headers, bodies, receipts, state nodes). The state
//! feed only cares whether the state-nodes bit is set; it subscribes to
//! mode changes through a broadcast channel and unregisters by dropping
//! the receiver.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

/// Bitmask of payload kinds currently being synchronized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SyncMode(u32);

impl SyncMode {
    /// Nothing is being synchronized.
    pub const NONE: SyncMode = SyncMode(0);
    /// Block headers.
    pub const HEADERS: SyncMode = SyncMode(1);
    /// Block bodies.
    pub const BODIES: SyncMode = SyncMode(1 << 1);
    /// Transaction receipts.
    pub const RECEIPTS: SyncMode = SyncMode(1 << 2);
    /// State-trie nodes, storage-trie nodes, and contract code.
    pub const STATE_NODES: SyncMode = SyncMode(1 << 3);

    /// Check whether all bits of `other` are set in `self`.
    pub const fn contains(self, other: SyncMode) -> bool {
        self.0 & other.0 == other.0
    }

    /// Union of two modes.
    pub const fn union(self, other: SyncMode) -> SyncMode {
        SyncMode(self.0 | other.0)
    }

    /// Raw bits.
    pub const fn bits(self) -> u32 {
        self.0
    }
}

impl std::ops::BitOr for SyncMode {
    type Output = SyncMode;

    fn bitor(self, rhs: SyncMode) -> SyncMode {
        self.union(rhs)
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 0 {
            return write!(f, "none");
        }
        let mut parts = Vec::new();
        if self.contains(Self::HEADERS) {
            parts.push("headers");
        }
        if self.contains(Self::BODIES) {
            parts.push("bodies");
        }
        if self.contains(Self::RECEIPTS) {
            parts.push("receipts");
        }
        if self.contains(Self::STATE_NODES) {
            parts.push("state-nodes");
        }
        write!(f, "{}", parts.join("|"))
    }
}

/// Event emitted when the sync mode changes.
#[derive(Debug, Clone, Copy)]
pub struct SyncModeChanged {
    /// Mode before the change
    pub previous: SyncMode,
    /// Mode after the change
    pub current: SyncMode,
}

impl SyncModeChanged {
    /// Check whether `mode` was switched on by this change.
    pub fn enabled(&self, mode: SyncMode) -> bool {
        !self.previous.contains(mode) && self.current.contains(mode)
    }
}

/// Holder of the current sync mode, broadcasting changes to subscribers.
pub struct SyncModeSelector {
    current: parking_lot::RwLock<SyncMode>,
    tx: broadcast::Sender<SyncModeChanged>,
}

impl SyncModeSelector {
    /// Create a selector starting in [`SyncMode::NONE`].
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(64);
        Self {
            current: parking_lot::RwLock::new(SyncMode::NONE),
            tx,
        }
    }

    /// The mode as of the last update.
    pub fn current(&self) -> SyncMode {
        *self.current.read()
    }

    /// Switch to a new mode, notifying subscribers if it differs.
    pub fn update(&self, mode: SyncMode) {
        let previous = {
            let mut current = self.current.write();
            std::mem::replace(&mut *current, mode)
        };
        if previous != mode {
            let _ = self.tx.send(SyncModeChanged {
                previous,
                current: mode,
            });
        }
    }

    /// Subscribe to mode changes. Dropping the receiver unregisters.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncModeChanged> {
        self.tx.subscribe()
    }
}

impl Default for SyncModeSelector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contains_and_union() {
        let mode = SyncMode::HEADERS | SyncMode::STATE_NODES;
        assert!(mode.contains(SyncMode::STATE_NODES));
        assert!(mode.contains(SyncMode::HEADERS));
        assert!(!mode.contains(SyncMode::BODIES));
        assert_eq!(mode.to_string(), "headers|state-nodes");
    }

    #[test]
    fn enabled_detects_rising_edge() {
        let change = SyncModeChanged {
            previous: SyncMode::HEADERS,
            current: SyncMode::HEADERS | SyncMode::STATE_NODES,
        };
        assert!(change.enabled(SyncMode::STATE_NODES));
        assert!(!change.enabled(SyncMode::HEADERS));
    }
}
