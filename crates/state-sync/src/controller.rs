//! Feed lifecycle control.
//!
//! The controller wires the feed to the rest of the node: it subscribes
//! to sync-mode changes, reads the best suggested header when state
//! nodes enter the mode, activates the feed, and drives the transitions
//! after a round ends (re-arming on the same root when it was saved,
//! picking a fresh root after a stall).

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::feed::{RoundOutcome, StateSyncFeed, SyncFeedState};
use crate::mode::{SyncMode, SyncModeChanged};
use stateline_types::H256;

/// The head the block tree currently suggests synchronizing towards.
#[derive(Debug, Clone, Copy)]
pub struct SyncHead {
    /// Block number of the header
    pub number: u64,
    /// State root committed to by the header
    pub state_root: H256,
}

/// Source of the best suggested header, implemented by the block tree.
pub trait BestHeaderSource: Send + Sync {
    /// The best header known to the node, if any.
    fn best_suggested_header(&self) -> Option<SyncHead>;
}

/// Drives [`StateSyncFeed`] activation and round transitions.
pub struct StateSyncController<H: BestHeaderSource> {
    feed: Arc<StateSyncFeed>,
    headers: H,
}

impl<H: BestHeaderSource> StateSyncController<H> {
    /// Create a controller over `feed`, reading roots from `headers`.
    pub fn new(feed: Arc<StateSyncFeed>, headers: H) -> Self {
        Self { feed, headers }
    }

    /// React to a sync-mode change.
    ///
    /// When state nodes enter the mode and a best header at block 1 or
    /// later is known, the feed is pointed at that header's state root
    /// and activated.
    pub fn on_mode_changed(&self, change: SyncModeChanged) {
        self.feed.set_sync_mode(change.current);

        if !change.enabled(SyncMode::STATE_NODES) {
            return;
        }
        if self.feed.state() == SyncFeedState::Active {
            return;
        }

        match self.headers.best_suggested_header() {
            Some(head) if head.number >= 1 => self.start_round(head),
            _ => debug!("state nodes enabled but no suggested header is available yet"),
        }
    }

    /// Drive post-round transitions; call whenever the feed goes
    /// dormant.
    pub fn tick(&self) {
        let Some(outcome) = self.feed.take_round_outcome() else {
            return;
        };
        match outcome {
            RoundOutcome::RootSaved => {
                // Re-arm on the same root; the next activation decides
                // whether anything is left to do.
                let (number, root) = self.feed.current_target();
                if let Err(e) = self.feed.reset_state_root(number, root) {
                    warn!("could not re-arm the feed after a completed round: {e}");
                }
            }
            RoundOutcome::Stalled => match self.headers.best_suggested_header() {
                Some(head) => {
                    info!(
                        "state sync stalled; retrying from block {} root {}",
                        head.number, head.state_root
                    );
                    self.start_round(head);
                }
                None => debug!("state sync stalled and no fresh header is available"),
            },
        }
    }

    /// Event loop: apply mode changes until the selector goes away.
    ///
    /// Dropping the receiver (by aborting this task) unregisters the
    /// controller from the selector.
    pub async fn run(&self, mut events: broadcast::Receiver<SyncModeChanged>) {
        loop {
            match events.recv().await {
                Ok(change) => {
                    self.on_mode_changed(change);
                    self.tick();
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!("controller lagged behind {missed} sync-mode changes");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    fn start_round(&self, head: SyncHead) {
        match self.feed.reset_state_root(head.number, head.state_root) {
            Ok(()) => self.feed.activate(),
            Err(e) => warn!("could not reset the state root: {e}"),
        }
    }
}
