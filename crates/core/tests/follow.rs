use std::{sync::Arc, time::Duration};

use chrono::Utc;
use ethdex_core::{
    config::{LeaseConfig, RetryConfig, RootConfig},
    follow::{IndexerService, Iteration},
    lease::LeaseManager,
    store::tables,
    Family, IndexError, NodeError, TraceMode, TransformChain,
};
use ethdex_redb3::RowStore;
use ethdex_testing::{count_rows, memory_store, stored_blocks, FakeNode};
use tokio_util::sync::CancellationToken;

const CHAIN: u64 = 1;

fn config() -> RootConfig {
    let mut config = RootConfig::default();

    config.upstream.chain_id = Some(CHAIN);
    config.indexer.max_range_blocks = 8;
    config.indexer.concurrency = 3;
    config.indexer.trace_mode = TraceMode::Geth;
    config.indexer.reorg_depth = 6;
    config.indexer.gap_check_every = 1;
    config.indexer.gap_lookback = 50;
    config.indexer.poll_interval_secs = 1;

    config
}

fn service(node: &FakeNode, store: &RowStore, config: &RootConfig) -> IndexerService<FakeNode, RowStore> {
    let transforms = TransformChain::from_config(&config.transforms).unwrap();
    IndexerService::new(node.clone(), store.clone(), config, transforms)
}

async fn follow_to_head(service: &IndexerService<FakeNode, RowStore>) -> usize {
    let cancel = CancellationToken::new();
    let chain_id = service.connect().await.unwrap();

    for i in 1..=20 {
        if service.iterate(chain_id, i, &cancel).await.unwrap().caught_up() {
            return i as usize;
        }
    }

    panic!("never caught up");
}

#[tokio::test]
async fn iterations_catch_up_in_chunks() {
    let node = FakeNode::linear(CHAIN, 20);
    let store = memory_store();
    let service = service(&node, &store, &config());

    let iterations = follow_to_head(&service).await;
    assert_eq!(iterations, 3);

    let snapshot = service.status().snapshot();
    assert_eq!(snapshot.chain_id, Some(CHAIN));
    assert_eq!(snapshot.node_head, Some(19));
    assert_eq!(snapshot.raw_checkpoint, Some(19));
    assert_eq!(snapshot.derived_checkpoint, Some(19));
    assert!(service.status().synced());

    assert_eq!(stored_blocks(&store, CHAIN).len(), 20);
    assert_eq!(count_rows(&store, tables::TRANSACTIONS, CHAIN), 40);
    assert_eq!(count_rows(&store, tables::INTERNAL_TXS, CHAIN), 20);

    // every marker was turned into a balance row
    assert_eq!(count_rows(&store, tables::PENDING_BALANCES, CHAIN), 0);
    assert_eq!(count_rows(&store, tables::BALANCES, CHAIN), 4);
}

#[tokio::test]
async fn follows_new_blocks() {
    let node = FakeNode::linear(CHAIN, 5);
    let store = memory_store();
    let service = service(&node, &store, &config());

    follow_to_head(&service).await;

    node.extend_to(12, 0);

    let outcome = service
        .iterate(CHAIN, 10, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        outcome,
        Iteration::Progressed {
            head: 12,
            raw: Some(12),
            derived: Some(12),
        }
    );
}

#[tokio::test]
async fn start_block_skips_history() {
    let node = FakeNode::linear(CHAIN, 20);
    let store = memory_store();

    let mut config = config();
    config.indexer.start_block = 15;

    let service = service(&node, &store, &config);
    follow_to_head(&service).await;

    let numbers: Vec<_> = stored_blocks(&store, CHAIN).iter().map(|(n, _)| *n).collect();
    assert_eq!(numbers, (15..=19).collect::<Vec<_>>());
}

#[tokio::test]
async fn wrong_chain_is_refused() {
    let node = FakeNode::linear(5, 10);
    let store = memory_store();
    let service = service(&node, &store, &config());

    let err = service.connect().await.unwrap_err();
    assert!(matches!(
        err,
        IndexError::ChainMismatch {
            expected: 1,
            found: 5
        }
    ));

    let err = service.run(CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, IndexError::ChainMismatch { .. }));
    assert_eq!(count_rows(&store, tables::BLOCKS, 5), 0);
}

#[tokio::test]
async fn stands_by_while_lease_is_held_elsewhere() {
    let node = FakeNode::linear(CHAIN, 10);
    let store = memory_store();

    LeaseManager::new(store.clone(), "indexer", "other", 600)
        .try_acquire(Utc::now())
        .unwrap();

    let mut config = config();
    config.lease = Some(LeaseConfig {
        name: "indexer".into(),
        holder: "me".into(),
        ttl_secs: 600,
    });

    let service = service(&node, &store, &config);

    let outcome = service
        .iterate(CHAIN, 1, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        outcome,
        Iteration::Standby {
            holder: "other".into()
        }
    );
    assert!(!service.status().snapshot().holds_lease);
    assert_eq!(count_rows(&store, tables::BLOCKS, CHAIN), 0);
}

#[tokio::test]
async fn repairs_reorg_while_following() {
    let node = FakeNode::linear(CHAIN, 10);
    let store = memory_store();
    let service = service(&node, &store, &config());

    follow_to_head(&service).await;

    node.reorg_from(7, 12, 1);

    follow_to_head(&service).await;

    let stored = stored_blocks(&store, CHAIN);
    assert_eq!(stored.len(), 13);

    for (number, hash) in stored {
        assert_eq!(Some(hash), node.hash_at(number));
    }

    let snapshot = service.status().snapshot();
    assert_eq!(snapshot.reorgs, 1);
    assert_eq!(snapshot.raw_checkpoint, Some(12));
    assert_eq!(snapshot.derived_checkpoint, Some(12));
    assert_eq!(count_rows(&store, tables::TRANSACTIONS, CHAIN), 26);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn run_stops_on_cancel_and_releases_lease() {
    let node = FakeNode::linear(CHAIN, 30);
    let store = memory_store();

    let mut config = config();
    config.lease = Some(LeaseConfig {
        name: "indexer".into(),
        holder: "me".into(),
        ttl_secs: 600,
    });

    let service = Arc::new(service(&node, &store, &config));
    let cancel = CancellationToken::new();

    let task = {
        let service = service.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { service.run(cancel).await })
    };

    let status = service.status();

    tokio::time::timeout(Duration::from_secs(30), async {
        while !status.synced() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    cancel.cancel();
    task.await.unwrap().unwrap();

    let checkpoint = ethdex_core::CheckpointTracker::new(store.clone())
        .get(CHAIN, Family::Raw)
        .unwrap();
    assert_eq!(checkpoint, Some(29));

    let lease = LeaseManager::new(store, "indexer", "me", 600);
    assert!(lease.current().unwrap().is_none());
}

#[tokio::test]
async fn run_gives_up_when_stalled() {
    let node = FakeNode::linear(CHAIN, 0);
    let store = memory_store();

    let mut config = config();
    config.indexer.stall_timeout_secs = 0;

    let err = service(&node, &store, &config)
        .run(CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, IndexError::Stalled(_)));
}

#[tokio::test]
async fn run_gives_up_after_retries() {
    let node = FakeNode::linear(CHAIN, 10);
    node.fail_at(3, NodeError::Transient("connection reset".into()));

    let store = memory_store();

    let mut config = config();
    config.retries = Some(RetryConfig {
        max_retries: 2,
        backoff_unit_sec: 0,
        backoff_factor: 2,
        max_backoff_sec: 0,
    });

    let service = service(&node, &store, &config);
    let err = service.run(CancellationToken::new()).await.unwrap_err();

    assert!(err.is_transient());
    assert_eq!(service.status().snapshot().consecutive_failures, 3);
}

#[tokio::test]
async fn run_stops_on_fatal_error() {
    let node = FakeNode::linear(CHAIN, 10);
    node.fail_at(3, NodeError::NotFound(3));

    let store = memory_store();
    let service = service(&node, &store, &config());

    let err = service.run(CancellationToken::new()).await.unwrap_err();

    assert!(matches!(err, IndexError::MissingBlock { number: 3, head: 9 }));
    assert!(service.status().snapshot().last_error.is_some());
}
