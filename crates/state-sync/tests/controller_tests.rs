//! Tests for the sync-round controller and the dispatch loop.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rlp::RlpStream;
use stateline_state_sync::{
    BestHeaderSource, StateSyncBatch, StateSyncConfig, StateSyncController, StateSyncDispatcher,
    StateSyncFeed, SyncFeedState, SyncHead, SyncMode, SyncModeChanged, SyncModeSelector,
    SyncPeerPool,
};
use stateline_storage::trie::encode_hex_prefix;
use stateline_storage::{MemoryNodeStore, NodeStore};
use stateline_types::{H256, EMPTY_CODE_HASH, EMPTY_ROOT};

fn eoa_leaf(path_nibble: u8) -> Vec<u8> {
    let mut account = RlpStream::new_list(4);
    account.append(&1u64);
    account.append(&vec![0x64u8]);
    account.append(&EMPTY_ROOT);
    account.append(&EMPTY_CODE_HASH);

    let mut s = RlpStream::new_list(2);
    s.append(&encode_hex_prefix(&[path_nibble; 64], true));
    s.append(&account.out().to_vec());
    s.out().to_vec()
}

struct FixedHeaders {
    head: Mutex<Option<SyncHead>>,
}

impl BestHeaderSource for FixedHeaders {
    fn best_suggested_header(&self) -> Option<SyncHead> {
        *self.head.lock()
    }
}

fn feed() -> Arc<StateSyncFeed> {
    Arc::new(StateSyncFeed::new(
        StateSyncConfig::default(),
        Arc::new(MemoryNodeStore::new()) as Arc<dyn NodeStore>,
        Arc::new(MemoryNodeStore::new()) as Arc<dyn NodeStore>,
    ))
}

#[test]
fn mode_change_activates_the_feed() {
    let feed = feed();
    let root = H256::keccak256(b"target");
    let headers = FixedHeaders {
        head: Mutex::new(Some(SyncHead {
            number: 42,
            state_root: root,
        })),
    };
    let controller = StateSyncController::new(Arc::clone(&feed), headers);

    controller.on_mode_changed(SyncModeChanged {
        previous: SyncMode::HEADERS,
        current: SyncMode::HEADERS | SyncMode::STATE_NODES,
    });

    assert_eq!(feed.state(), SyncFeedState::Active);
    let (number, current) = feed.current_target();
    assert_eq!(number, 42);
    assert_eq!(current, root);
}

#[test]
fn mode_change_without_header_stays_dormant() {
    let feed = feed();
    let headers = FixedHeaders {
        head: Mutex::new(None),
    };
    let controller = StateSyncController::new(Arc::clone(&feed), headers);

    controller.on_mode_changed(SyncModeChanged {
        previous: SyncMode::NONE,
        current: SyncMode::STATE_NODES,
    });

    assert_eq!(feed.state(), SyncFeedState::Dormant);
}

#[test]
fn unrelated_mode_change_only_updates_the_mode() {
    let feed = feed();
    let headers = FixedHeaders {
        head: Mutex::new(Some(SyncHead {
            number: 7,
            state_root: H256::keccak256(b"x"),
        })),
    };
    let controller = StateSyncController::new(Arc::clone(&feed), headers);

    controller.on_mode_changed(SyncModeChanged {
        previous: SyncMode::NONE,
        current: SyncMode::HEADERS,
    });
    assert_eq!(feed.state(), SyncFeedState::Dormant);
}

/// A peer pool that answers every request from a fixed node set.
struct Oracle {
    nodes: HashMap<H256, Vec<u8>>,
}

#[async_trait]
impl SyncPeerPool for Oracle {
    async fn dispatch(&self, mut batch: StateSyncBatch) -> StateSyncBatch {
        let responses = batch
            .requested
            .as_ref()
            .unwrap()
            .iter()
            .map(|item| self.nodes.get(&item.hash).cloned())
            .collect();
        batch.responses = Some(responses);
        batch
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dispatcher_syncs_a_leaf_end_to_end() {
    let state = Arc::new(MemoryNodeStore::new());
    let code = Arc::new(MemoryNodeStore::new());
    let feed = Arc::new(StateSyncFeed::new(
        StateSyncConfig::default(),
        Arc::clone(&state) as Arc<dyn NodeStore>,
        Arc::clone(&code) as Arc<dyn NodeStore>,
    ));

    let selector = SyncModeSelector::new();
    let leaf = eoa_leaf(0xa);
    let root = H256::keccak256(&leaf);
    let headers = FixedHeaders {
        head: Mutex::new(Some(SyncHead {
            number: 1,
            state_root: root,
        })),
    };
    let controller = StateSyncController::new(Arc::clone(&feed), headers);
    let events = selector.subscribe();

    let pool = Arc::new(Oracle {
        nodes: [(root, leaf)].into_iter().collect(),
    });
    let dispatcher = StateSyncDispatcher::new(Arc::clone(&feed), pool);

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let controller = Arc::new(controller);
    let controller_task = {
        let controller = Arc::clone(&controller);
        tokio::spawn(async move { controller.run(events).await })
    };
    let dispatcher_task = tokio::spawn(async move { dispatcher.run(shutdown_rx).await });

    selector.update(SyncMode::STATE_NODES);

    // Wait for the round to complete.
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(5);
    loop {
        if feed.state() == SyncFeedState::Dormant && state.key_exists(&root).unwrap() {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "sync did not finish in time"
        );
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }

    assert_eq!(feed.progress().snapshot().saved_accounts, 1);

    shutdown_tx.send(true).unwrap();
    dispatcher_task.await.unwrap();
    controller_task.abort();
}
