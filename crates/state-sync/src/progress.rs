//! Sync statistics with restart-surviving persistence.
//!
//! Every handled batch updates these counters and re-serializes the
//! whole record into the code store under the all-zero key. On startup
//! the record is read back (chain-id checked) so figures like
//! saved-accounts keep accumulating across restarts.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;

/// Number of persisted counters in the serialized record.
const COUNTER_COUNT: usize = 18;

/// Serialized length: chain-id prefix plus the counters.
const RECORD_LEN: usize = 8 * (1 + COUNTER_COUNT);

/// Flat record of synchronizer statistics.
///
/// All counters are atomics so concurrent response handlers never lose
/// increments.
pub struct DetailedProgress {
    chain_id: u64,

    /// Items handed out in request batches
    pub requested_nodes: AtomicU64,
    /// Non-empty responses consumed
    pub handled_nodes: AtomicU64,
    /// Nodes of any kind persisted
    pub saved_nodes: AtomicU64,
    /// Account leaves fully satisfied
    pub saved_accounts: AtomicU64,
    /// State-trie nodes persisted
    pub saved_state: AtomicU64,
    /// Storage-trie nodes persisted
    pub saved_storage: AtomicU64,
    /// Code blobs persisted
    pub saved_code: AtomicU64,
    /// Store membership checks performed
    pub db_checks: AtomicU64,
    /// Insertions short-circuited by the recently-saved filter
    pub checked_in_cache: AtomicU64,
    /// Membership checks that found the node already present
    pub state_was_there: AtomicU64,
    /// Membership checks that found the node absent
    pub state_was_not_there: AtomicU64,
    /// Batches classified emptish
    pub emptish_count: AtomicU64,
    /// Batches classified as bad quality
    pub bad_quality_count: AtomicU64,
    /// Batches rejected as malformed
    pub invalid_format_count: AtomicU64,
    /// Batches no peer picked up
    pub not_assigned_count: AtomicU64,
    /// Batches handled cleanly
    pub ok_count: AtomicU64,
    /// Accumulated wall-clock seconds spent in active sync
    pub seconds_in_sync: AtomicU64,
    /// Payload bytes persisted
    pub data_size: AtomicU64,

    last_report: Mutex<Instant>,
}

impl DetailedProgress {
    /// Create a fresh record, resuming counters from `serialized` when
    /// it is a valid record for `chain_id`.
    pub fn new(chain_id: u64, serialized: Option<&[u8]>) -> Self {
        let mut counters = [0u64; COUNTER_COUNT];
        if let Some(bytes) = serialized {
            if let Some(loaded) = decode_record(chain_id, bytes) {
                counters = loaded;
            }
        }

        let mut iter = counters.iter().copied();
        let mut next = || AtomicU64::new(iter.next().unwrap_or(0));

        Self {
            chain_id,
            requested_nodes: next(),
            handled_nodes: next(),
            saved_nodes: next(),
            saved_accounts: next(),
            saved_state: next(),
            saved_storage: next(),
            saved_code: next(),
            db_checks: next(),
            checked_in_cache: next(),
            state_was_there: next(),
            state_was_not_there: next(),
            emptish_count: next(),
            bad_quality_count: next(),
            invalid_format_count: next(),
            not_assigned_count: next(),
            ok_count: next(),
            seconds_in_sync: next(),
            data_size: next(),
            last_report: Mutex::new(Instant::now()),
        }
    }

    /// Serialize into the stable record layout: chain id followed by the
    /// counters, all little-endian `u64`.
    pub fn serialize(&self) -> Vec<u8> {
        let snapshot = self.snapshot();
        let mut out = Vec::with_capacity(RECORD_LEN);
        out.extend_from_slice(&self.chain_id.to_le_bytes());
        for value in snapshot.counters() {
            out.extend_from_slice(&value.to_le_bytes());
        }
        out
    }

    /// Fold the wall time since the last report into `seconds_in_sync`.
    pub fn update_seconds_in_sync(&self) {
        let mut last = self.last_report.lock();
        let elapsed = last.elapsed().as_secs();
        if elapsed > 0 {
            self.seconds_in_sync.fetch_add(elapsed, Ordering::Relaxed);
            *last = Instant::now();
        }
    }

    /// Plain-value copy of every counter.
    pub fn snapshot(&self) -> ProgressSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        ProgressSnapshot {
            requested_nodes: load(&self.requested_nodes),
            handled_nodes: load(&self.handled_nodes),
            saved_nodes: load(&self.saved_nodes),
            saved_accounts: load(&self.saved_accounts),
            saved_state: load(&self.saved_state),
            saved_storage: load(&self.saved_storage),
            saved_code: load(&self.saved_code),
            db_checks: load(&self.db_checks),
            checked_in_cache: load(&self.checked_in_cache),
            state_was_there: load(&self.state_was_there),
            state_was_not_there: load(&self.state_was_not_there),
            emptish_count: load(&self.emptish_count),
            bad_quality_count: load(&self.bad_quality_count),
            invalid_format_count: load(&self.invalid_format_count),
            not_assigned_count: load(&self.not_assigned_count),
            ok_count: load(&self.ok_count),
            seconds_in_sync: load(&self.seconds_in_sync),
            data_size: load(&self.data_size),
        }
    }
}

/// Plain-value view of [`DetailedProgress`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProgressSnapshot {
    /// Items handed out in request batches
    pub requested_nodes: u64,
    /// Non-empty responses consumed
    pub handled_nodes: u64,
    /// Nodes of any kind persisted
    pub saved_nodes: u64,
    /// Account leaves fully satisfied
    pub saved_accounts: u64,
    /// State-trie nodes persisted
    pub saved_state: u64,
    /// Storage-trie nodes persisted
    pub saved_storage: u64,
    /// Code blobs persisted
    pub saved_code: u64,
    /// Store membership checks performed
    pub db_checks: u64,
    /// Insertions short-circuited by the recently-saved filter
    pub checked_in_cache: u64,
    /// Membership checks that found the node already present
    pub state_was_there: u64,
    /// Membership checks that found the node absent
    pub state_was_not_there: u64,
    /// Batches classified emptish
    pub emptish_count: u64,
    /// Batches classified as bad quality
    pub bad_quality_count: u64,
    /// Batches rejected as malformed
    pub invalid_format_count: u64,
    /// Batches no peer picked up
    pub not_assigned_count: u64,
    /// Batches handled cleanly
    pub ok_count: u64,
    /// Accumulated wall-clock seconds spent in active sync
    pub seconds_in_sync: u64,
    /// Payload bytes persisted
    pub data_size: u64,
}

impl ProgressSnapshot {
    fn counters(&self) -> [u64; COUNTER_COUNT] {
        [
            self.requested_nodes,
            self.handled_nodes,
            self.saved_nodes,
            self.saved_accounts,
            self.saved_state,
            self.saved_storage,
            self.saved_code,
            self.db_checks,
            self.checked_in_cache,
            self.state_was_there,
            self.state_was_not_there,
            self.emptish_count,
            self.bad_quality_count,
            self.invalid_format_count,
            self.not_assigned_count,
            self.ok_count,
            self.seconds_in_sync,
            self.data_size,
        ]
    }
}

fn decode_record(chain_id: u64, bytes: &[u8]) -> Option<[u64; COUNTER_COUNT]> {
    if bytes.len() != RECORD_LEN {
        return None;
    }
    let mut words = bytes.chunks_exact(8).map(|chunk| {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(chunk);
        u64::from_le_bytes(buf)
    });
    if words.next()? != chain_id {
        return None;
    }
    let mut counters = [0u64; COUNTER_COUNT];
    for slot in counters.iter_mut() {
        *slot = words.next()?;
    }
    Some(counters)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialize_roundtrip() {
        let progress = DetailedProgress::new(7, None);
        progress.saved_nodes.store(42, Ordering::Relaxed);
        progress.saved_accounts.store(9, Ordering::Relaxed);
        progress.data_size.store(1 << 33, Ordering::Relaxed);

        let bytes = progress.serialize();
        assert_eq!(bytes.len(), RECORD_LEN);

        let restored = DetailedProgress::new(7, Some(&bytes));
        assert_eq!(restored.snapshot(), progress.snapshot());
        assert_eq!(restored.serialize(), bytes);
    }

    #[test]
    fn foreign_chain_id_is_discarded() {
        let progress = DetailedProgress::new(7, None);
        progress.saved_nodes.store(42, Ordering::Relaxed);
        let bytes = progress.serialize();

        let restored = DetailedProgress::new(8, Some(&bytes));
        assert_eq!(restored.snapshot(), ProgressSnapshot::default());
    }

    #[test]
    fn short_record_is_discarded() {
        let restored = DetailedProgress::new(1, Some(&[1, 2, 3]));
        assert_eq!(restored.snapshot(), ProgressSnapshot::default());
    }
}
