//! Outer dispatch loop pairing prepared batches with peers.
//!
//! The dispatcher repeatedly drains the feed, hands non-empty batches to
//! the peer pool, and spawns a task per batch to feed the responses back
//! into the handler. Peer selection and transport live behind the
//! [`SyncPeerPool`] trait; responses may come back out of order and are
//! handled concurrently.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, trace};

use crate::feed::StateSyncFeed;
use crate::items::StateSyncBatch;

/// Allocation layer: sends a batch to some peer and returns it with
/// `responses` attached (`None` when no peer was available).
#[async_trait]
pub trait SyncPeerPool: Send + Sync {
    /// Dispatch a batch and eventually return it with responses.
    async fn dispatch(&self, batch: StateSyncBatch) -> StateSyncBatch;
}

/// The prepare/dispatch/handle loop around a [`StateSyncFeed`].
pub struct StateSyncDispatcher<P: SyncPeerPool + 'static> {
    feed: Arc<StateSyncFeed>,
    pool: Arc<P>,
    idle_wait: Duration,
}

impl<P: SyncPeerPool + 'static> StateSyncDispatcher<P> {
    /// Create a dispatcher over `feed` and `pool`.
    pub fn new(feed: Arc<StateSyncFeed>, pool: Arc<P>) -> Self {
        Self {
            feed,
            pool,
            idle_wait: Duration::from_millis(25),
        }
    }

    /// Run until `shutdown` flips to true.
    ///
    /// Each non-empty batch is dispatched from its own task, so
    /// responses are handled concurrently while the loop keeps
    /// preparing.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }

            let batch = self.feed.prepare_request();
            if batch.is_empty() {
                tokio::select! {
                    _ = shutdown.changed() => {}
                    _ = tokio::time::sleep(self.idle_wait) => {}
                }
                continue;
            }

            trace!("dispatching batch {} ({} items)", batch.id, batch.len());
            let feed = Arc::clone(&self.feed);
            let pool = Arc::clone(&self.pool);
            tokio::spawn(async move {
                let id = batch.id;
                let returned = pool.dispatch(batch).await;
                let result = feed.handle_response(returned);
                debug!("batch {id} handled: {result:?}");
            });
        }
        debug!("state sync dispatcher stopped");
    }
}
