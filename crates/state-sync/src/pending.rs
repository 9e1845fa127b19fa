//! Prioritized multi-stream queue of items still to fetch.
//!
//! Items are grouped into four streams: shallow state nodes, deep state
//! nodes, storage nodes, and code blobs. Draining prefers the stream
//! most likely to widen the frontier (shallow state first) while
//! interleaving the trailing streams so none of them starves. When a
//! round is stalling, streams are re-ordered by rightness so the
//! trailing subtrees close out first.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::items::{NodeDataType, StateSyncItem};
use crate::progress::ProgressSnapshot;

/// Interleave period: one trailing-stream item per this many drained.
const INTERLEAVE_EVERY: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stream {
    ShallowState,
    DeepState,
    Storage,
    Codes,
}

impl Stream {
    fn label(self) -> &'static str {
        match self {
            Stream::ShallowState => "state/shallow",
            Stream::DeepState => "state/deep",
            Stream::Storage => "storage",
            Stream::Codes => "codes",
        }
    }
}

struct Inner {
    shallow_state: VecDeque<StateSyncItem>,
    deep_state: VecDeque<StateSyncItem>,
    storage: VecDeque<StateSyncItem>,
    codes: VecDeque<StateSyncItem>,
    max_state_level: u8,
    max_storage_level: u8,
    shallow_cutoff: u8,
    closing_out: bool,
    order: [Stream; 4],
    last_review: Option<Instant>,
    last_saved_seen: u64,
}

impl Inner {
    fn stream_mut(&mut self, stream: Stream) -> &mut VecDeque<StateSyncItem> {
        match stream {
            Stream::ShallowState => &mut self.shallow_state,
            Stream::DeepState => &mut self.deep_state,
            Stream::Storage => &mut self.storage,
            Stream::Codes => &mut self.codes,
        }
    }

    fn pop_leading(&mut self) -> Option<StateSyncItem> {
        let order = self.order;
        order
            .iter()
            .find_map(|stream| self.stream_mut(*stream).pop_front())
    }

    fn pop_trailing(&mut self, rotation: &mut usize) -> Option<StateSyncItem> {
        let order = self.order;
        let trailing = &order[1..];
        for offset in 0..trailing.len() {
            let stream = trailing[(*rotation + offset) % trailing.len()];
            if let Some(item) = self.stream_mut(stream).pop_front() {
                *rotation += offset + 1;
                return Some(item);
            }
        }
        None
    }

    fn count(&self) -> usize {
        self.shallow_state.len() + self.deep_state.len() + self.storage.len() + self.codes.len()
    }
}

/// The pending-items store.
pub struct PendingSyncItems {
    review_period: Duration,
    inner: Mutex<Inner>,
}

impl PendingSyncItems {
    /// Create an empty store whose priorities are reviewed at most once
    /// per `review_period`.
    pub fn new(review_period: Duration) -> Self {
        Self {
            review_period,
            inner: Mutex::new(Inner {
                shallow_state: VecDeque::new(),
                deep_state: VecDeque::new(),
                storage: VecDeque::new(),
                codes: VecDeque::new(),
                max_state_level: 0,
                max_storage_level: 0,
                shallow_cutoff: 1,
                closing_out: false,
                order: [
                    Stream::ShallowState,
                    Stream::Codes,
                    Stream::Storage,
                    Stream::DeepState,
                ],
                last_review: None,
                last_saved_seen: 0,
            }),
        }
    }

    /// Insert an item, choosing a stream from its kind, its level, and
    /// whether any nodes were saved since the last priority review
    /// (`last_saved` is the saved-nodes counter at push time).
    pub fn push(&self, item: StateSyncItem, last_saved: u64) {
        let mut inner = self.inner.lock();
        match item.kind {
            NodeDataType::Code => inner.codes.push_back(item),
            NodeDataType::StorageNode => {
                inner.max_storage_level = inner.max_storage_level.max(item.level);
                inner.storage.push_back(item);
            }
            NodeDataType::StateNode => {
                inner.max_state_level = inner.max_state_level.max(item.level);
                // A stalled round widens the shallow stream by one level
                // so breadth discovery resumes.
                let stalled = last_saved == inner.last_saved_seen;
                let cutoff = inner.shallow_cutoff + u8::from(stalled);
                if item.level <= cutoff {
                    inner.shallow_state.push_back(item);
                } else {
                    inner.deep_state.push_back(item);
                }
            }
        }
    }

    /// Pop up to `max` items obeying the stream priorities: the leading
    /// non-empty stream supplies the bulk, with every eighth slot drawn
    /// round-robin from the trailing streams.
    pub fn take_batch(&self, max: usize) -> Vec<StateSyncItem> {
        let mut inner = self.inner.lock();
        let mut out = Vec::with_capacity(max.min(inner.count()));
        let mut rotation = 0usize;
        while out.len() < max {
            let interleave = (out.len() + 1) % INTERLEAVE_EVERY == 0;
            let item = if interleave {
                inner.pop_trailing(&mut rotation).or_else(|| inner.pop_leading())
            } else {
                inner.pop_leading()
            };
            match item {
                Some(item) => out.push(item),
                None => break,
            }
        }
        out
    }

    /// Clone of the next state item that would be drained, if any.
    pub fn peek_state(&self) -> Option<StateSyncItem> {
        let inner = self.inner.lock();
        inner
            .shallow_state
            .front()
            .or_else(|| inner.deep_state.front())
            .cloned()
    }

    /// Total number of queued items across all streams.
    pub fn count(&self) -> usize {
        self.inner.lock().count()
    }

    /// Drop every queued item. Level watermarks survive; they describe
    /// the trie, not the queue.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.shallow_state.clear();
        inner.deep_state.clear();
        inner.storage.clear();
        inner.codes.clear();
    }

    /// Deepest state-trie level observed so far.
    pub fn max_state_level(&self) -> u8 {
        self.inner.lock().max_state_level
    }

    /// Deepest storage-trie level observed so far.
    pub fn max_storage_level(&self) -> u8 {
        self.inner.lock().max_storage_level
    }

    /// Raise the state-level watermark (used when a leaf proves the trie
    /// bottom has been reached).
    pub fn set_max_state_level(&self, level: u8) {
        let mut inner = self.inner.lock();
        inner.max_state_level = inner.max_state_level.max(level);
    }

    /// Raise the storage-level watermark.
    pub fn set_max_storage_level(&self, level: u8) {
        let mut inner = self.inner.lock();
        inner.max_storage_level = inner.max_storage_level.max(level);
    }

    /// Re-weight the streams from observed progress.
    ///
    /// Runs at most once per review period; suppressed calls return
    /// `None`. With `stalling` set, items inside each stream are
    /// re-ordered by descending rightness so trailing subtrees are
    /// requested first; otherwise streams stay FIFO.
    pub fn recalculate_priorities(
        &self,
        snapshot: &ProgressSnapshot,
        stalling: bool,
    ) -> Option<String> {
        let mut inner = self.inner.lock();
        if let Some(last) = inner.last_review {
            if last.elapsed() < self.review_period {
                return None;
            }
        }
        inner.last_review = Some(Instant::now());
        inner.last_saved_seen = snapshot.saved_nodes;
        inner.shallow_cutoff = (inner.max_state_level / 2).max(1);

        // Shallow state always leads; among the rest, a stream whose
        // saved count lags the state trie is moved forward because its
        // items are blocking account saves.
        let codes_lag = snapshot.saved_code * 8 <= snapshot.saved_state;
        let storage_lag = snapshot.saved_storage * 4 <= snapshot.saved_state;
        inner.order = match (codes_lag, storage_lag) {
            (true, _) => [
                Stream::ShallowState,
                Stream::Codes,
                Stream::Storage,
                Stream::DeepState,
            ],
            (false, true) => [
                Stream::ShallowState,
                Stream::Storage,
                Stream::Codes,
                Stream::DeepState,
            ],
            (false, false) => [
                Stream::ShallowState,
                Stream::DeepState,
                Stream::Storage,
                Stream::Codes,
            ],
        };

        inner.closing_out = stalling;
        if stalling {
            for stream in [
                Stream::ShallowState,
                Stream::DeepState,
                Stream::Storage,
                Stream::Codes,
            ] {
                inner
                    .stream_mut(stream)
                    .make_contiguous()
                    .sort_by(|a, b| b.rightness.cmp(&a.rightness));
            }
        }

        let order = inner.order;
        Some(format!(
            "priorities [{} > {} > {} > {}], shallow cutoff {}, max levels state {} storage {}{}",
            order[0].label(),
            order[1].label(),
            order[2].label(),
            order[3].label(),
            inner.shallow_cutoff,
            inner.max_state_level,
            inner.max_storage_level,
            if stalling { ", closing out" } else { "" },
        ))
    }
}
