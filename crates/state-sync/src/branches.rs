//! Top-of-trie completion map.
//!
//! Tracks per-slot status for the first two levels of the state trie
//! (16 root children, 256 grandchildren) to derive a percent-complete
//! figure for logging. Sync correctness never depends on this data.

use serde::Serialize;

use crate::items::NodeDataType;

/// Status of one top-of-trie slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NodeProgressState {
    /// Nothing known about this slot yet
    Unknown,
    /// The slot's node has been queued for download
    Requested,
    /// The slot is empty in the trie
    Empty,
    /// The slot's node was already present locally
    AlreadySaved,
    /// The slot's node was downloaded and persisted this round
    Saved,
}

impl NodeProgressState {
    fn is_complete(self) -> bool {
        matches!(
            self,
            NodeProgressState::Empty | NodeProgressState::AlreadySaved | NodeProgressState::Saved
        )
    }
}

/// Completion map over the top two levels of the state trie.
pub struct BranchProgress {
    block_number: u64,
    level0: [NodeProgressState; 16],
    level1: [[NodeProgressState; 16]; 16],
}

impl BranchProgress {
    /// Create a fresh map for a round targeting `block_number`.
    pub fn new(block_number: u64) -> Self {
        Self {
            block_number,
            level0: [NodeProgressState::Unknown; 16],
            level1: [[NodeProgressState::Unknown; 16]; 16],
        }
    }

    /// Update one cell.
    ///
    /// `level` is the depth of the reported item; only state-trie items
    /// at levels 1 and 2 with valid indices land in the map, everything
    /// else is ignored.
    pub fn report_synced(
        &mut self,
        level: u8,
        parent_index: i8,
        child_index: i8,
        kind: NodeDataType,
        state: NodeProgressState,
    ) {
        if kind != NodeDataType::StateNode {
            return;
        }
        match (level, parent_index, child_index) {
            (1, _, c) if (0..16).contains(&c) => {
                self.level0[c as usize] = state;
            }
            (2, p, c) if (0..16).contains(&p) && (0..16).contains(&c) => {
                self.level1[p as usize][c as usize] = state;
            }
            _ => {}
        }
    }

    /// Percent complete, weighting each root child by 1/16.
    ///
    /// A root child not yet complete gets partial credit from its own
    /// children, 1/256 each.
    pub fn percent_complete(&self) -> f64 {
        let mut complete = 0.0f64;
        for (i, slot) in self.level0.iter().enumerate() {
            if slot.is_complete() {
                complete += 1.0 / 16.0;
            } else {
                let children_done = self.level1[i]
                    .iter()
                    .filter(|child| child.is_complete())
                    .count();
                complete += children_done as f64 / 256.0;
            }
        }
        complete * 100.0
    }

    /// One-line report for the sync log.
    pub fn report_line(&self) -> String {
        format!(
            "state sync {:5.1}% of block {}",
            self.percent_complete(),
            self.block_number
        )
    }
}
