//! Configuration for the state synchronizer.

use std::time::Duration;

/// Tunables for the state-sync feed.
///
/// The defaults are the values the feed was tuned with against mainnet
/// peers; embedders normally only override `chain_id`.
#[derive(Debug, Clone)]
pub struct StateSyncConfig {
    /// Chain id used as the prefix of the persisted progress record so a
    /// database cannot resume counters from a different network.
    pub chain_id: u64,

    /// Maximum number of items drained into one request batch.
    pub batch_size: usize,

    /// Capacity of the recently-saved filter (hashes known to be
    /// persisted, kept to short-circuit store membership checks).
    pub saved_filter_capacity: usize,

    /// A batch whose non-empty response ratio falls below this threshold
    /// is classified as emptish and bumps the stall hint.
    pub emptish_ratio: f64,

    /// Minimum number of non-empty responses before a batch can be
    /// classified as bad quality.
    pub bad_quality_floor: usize,

    /// Invalid-to-requested ratio above which a batch is classified as
    /// bad quality.
    pub bad_quality_ratio: f64,

    /// Number of consecutive stall hints after which the round is
    /// abandoned and a fresh root is selected.
    pub reset_hint_threshold: u32,

    /// Minimum wall time between stream-priority recalculations.
    pub priority_review_period: Duration,

    /// Grace period after round start before an empty drain counts as a
    /// stall hint.
    pub response_grace: Duration,
}

impl Default for StateSyncConfig {
    fn default() -> Self {
        Self {
            chain_id: 1,
            batch_size: 384,
            saved_filter_capacity: 1_048_576,
            emptish_ratio: (384.0 / 1024.0) * 0.75,
            bad_quality_floor: 64,
            bad_quality_ratio: 0.5,
            reset_hint_threshold: 32,
            priority_review_period: Duration::from_secs(60),
            response_grace: Duration::from_secs(5),
        }
    }
}
