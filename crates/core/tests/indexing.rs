use std::sync::Arc;

use ethdex_core::{
    config::TransformsConfig, indexer::RangeIndexer, store::tables,
    transform::TRANSFER_SINGLE_TOPIC, word_from_u64, Family, IndexError, Log, MetadataCache,
    MutationStore, NodeError, TraceMode, TransformChain,
};
use ethdex_testing::{
    blocks::{address, address_word},
    count_rows, memory_store, placeholders, stored_blocks, FakeNode, FaultyStore, TestFault,
};
use tokio_util::sync::CancellationToken;

const CHAIN: u64 = 1;

fn all_rows<S: MutationStore>(store: &S, table: &'static str) -> Vec<(Vec<u8>, Vec<u8>)> {
    store
        .iter_rows(
            table,
            ethdex_core::keys::prefix_range(&ethdex_core::keys::chain_prefix(CHAIN)),
        )
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap()
}

#[tokio::test]
async fn indexes_range_and_advances_checkpoint() {
    let node = FakeNode::linear(CHAIN, 10);
    let store = memory_store();
    let indexer = RangeIndexer::new(node.clone(), store.clone());

    let outcome = indexer
        .index_range(CHAIN, 0, 9, 4, TraceMode::None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.last_indexed, Some(9));
    assert_eq!(outcome.blocks, 10);
    assert!(!outcome.stopped_early());

    let stored = stored_blocks(&store, CHAIN);
    assert_eq!(stored.len(), 10);

    for (number, hash) in stored {
        assert_eq!(Some(hash), node.hash_at(number));
    }

    assert!(placeholders(&store, CHAIN).is_empty());

    let checkpoint = indexer.checkpoints().get(CHAIN, Family::Raw).unwrap();
    assert_eq!(checkpoint, Some(9));
}

#[tokio::test]
async fn reindexing_is_idempotent() {
    let node = FakeNode::linear(CHAIN, 12);
    let store = memory_store();
    let indexer = RangeIndexer::new(node, store.clone());
    let cancel = CancellationToken::new();

    indexer
        .index_range(CHAIN, 0, 11, 3, TraceMode::Geth, &cancel)
        .await
        .unwrap();

    let first = all_rows(&store, tables::BLOCKS);

    indexer
        .index_range(CHAIN, 0, 11, 5, TraceMode::Geth, &cancel)
        .await
        .unwrap();

    let second = all_rows(&store, tables::BLOCKS);

    assert_eq!(first, second);
    assert_eq!(
        indexer.checkpoints().get(CHAIN, Family::Raw).unwrap(),
        Some(11)
    );
}

#[tokio::test]
async fn checkpoint_never_moves_backwards() {
    let node = FakeNode::linear(CHAIN, 10);
    let store = memory_store();
    let indexer = RangeIndexer::new(node, store);
    let cancel = CancellationToken::new();

    indexer
        .index_range(CHAIN, 0, 9, 4, TraceMode::None, &cancel)
        .await
        .unwrap();

    indexer
        .index_range(CHAIN, 2, 4, 4, TraceMode::None, &cancel)
        .await
        .unwrap();

    assert_eq!(
        indexer.checkpoints().get(CHAIN, Family::Raw).unwrap(),
        Some(9)
    );
}

#[tokio::test]
async fn reindex_replaces_rows_of_an_abandoned_branch() {
    let node = FakeNode::linear(CHAIN, 10);
    let store = memory_store();
    let indexer = RangeIndexer::new(node.clone(), store.clone());
    let cancel = CancellationToken::new();

    indexer
        .index_range(CHAIN, 0, 9, 4, TraceMode::Geth, &cancel)
        .await
        .unwrap();

    // checkpoint rewound but the old rows never deleted
    indexer
        .checkpoints()
        .rewind(CHAIN, Family::Raw, Some(6))
        .unwrap();

    node.reorg_from(7, 9, 1);

    indexer
        .index_range(CHAIN, 7, 9, 2, TraceMode::Geth, &cancel)
        .await
        .unwrap();

    let stored = stored_blocks(&store, CHAIN);
    assert_eq!(stored.len(), 10);

    for (number, hash) in stored {
        assert_eq!(Some(hash), node.hash_at(number));
    }

    assert!(placeholders(&store, CHAIN).is_empty());

    indexer
        .index_derived_range(
            CHAIN,
            0,
            9,
            default_transforms(),
            2,
            Arc::new(MetadataCache::default()),
            &cancel,
        )
        .await
        .unwrap();

    assert_eq!(
        indexer.checkpoints().get(CHAIN, Family::Derived).unwrap(),
        Some(9)
    );
}

#[tokio::test]
async fn failing_block_leaves_checkpoint_untouched() {
    let node = FakeNode::linear(CHAIN, 61);
    let store = memory_store();
    let indexer = RangeIndexer::new(node.clone(), store.clone());
    let cancel = CancellationToken::new();

    indexer
        .index_range(CHAIN, 0, 49, 4, TraceMode::None, &cancel)
        .await
        .unwrap();

    node.fail_at(55, NodeError::InvalidResponse("garbled block".into()));

    let err = indexer
        .index_range(CHAIN, 50, 60, 4, TraceMode::None, &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, IndexError::Node(NodeError::InvalidResponse(_))));
    assert_eq!(
        indexer.checkpoints().get(CHAIN, Family::Raw).unwrap(),
        Some(49)
    );

    // the failed block is still scheduled
    assert!(placeholders(&store, CHAIN).contains(&55));

    node.heal(55);

    indexer
        .index_range(CHAIN, 50, 60, 4, TraceMode::None, &cancel)
        .await
        .unwrap();

    assert_eq!(
        indexer.checkpoints().get(CHAIN, Family::Raw).unwrap(),
        Some(60)
    );
    assert!(placeholders(&store, CHAIN).is_empty());
    assert_eq!(stored_blocks(&store, CHAIN).len(), 61);
}

#[tokio::test]
async fn failed_commit_leaves_checkpoint_untouched() {
    let node = FakeNode::linear(CHAIN, 10);
    let store = FaultyStore::new(memory_store(), TestFault::CommitError(7));
    let indexer = RangeIndexer::new(node, store.clone());

    let err = indexer
        .index_range(CHAIN, 0, 9, 2, TraceMode::None, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, IndexError::Store(_)));
    assert!(err.is_transient());
    assert_eq!(indexer.checkpoints().get(CHAIN, Family::Raw).unwrap(), None);
}

#[tokio::test]
async fn range_stops_early_beyond_head() {
    let node = FakeNode::linear(CHAIN, 10);
    let store = memory_store();
    let indexer = RangeIndexer::new(node, store.clone());

    let outcome = indexer
        .index_range(CHAIN, 5, 15, 4, TraceMode::None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.last_indexed, Some(9));
    assert!(outcome.stopped_early());
    assert_eq!(
        indexer.checkpoints().get(CHAIN, Family::Raw).unwrap(),
        Some(9)
    );

    assert_eq!(stored_blocks(&store, CHAIN).len(), 5);
    assert!(placeholders(&store, CHAIN).is_empty());
}

#[tokio::test]
async fn range_entirely_beyond_head_keeps_checkpoint() {
    let node = FakeNode::linear(CHAIN, 10);
    let store = memory_store();
    let indexer = RangeIndexer::new(node, store.clone());

    let outcome = indexer
        .index_range(CHAIN, 12, 15, 4, TraceMode::None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.last_indexed, None);
    assert_eq!(indexer.checkpoints().get(CHAIN, Family::Raw).unwrap(), None);
    assert_eq!(count_rows(&store, tables::BLOCKS, CHAIN), 0);
}

#[tokio::test]
async fn missing_block_below_head_is_fatal() {
    let node = FakeNode::linear(CHAIN, 10);
    node.fail_at(3, NodeError::NotFound(3));

    let indexer = RangeIndexer::new(node, memory_store());

    let err = indexer
        .index_range(CHAIN, 0, 9, 4, TraceMode::None, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, IndexError::MissingBlock { number: 3, head: 9 }));
    assert!(!err.is_transient());
    assert_eq!(indexer.checkpoints().get(CHAIN, Family::Raw).unwrap(), None);
}

#[tokio::test]
async fn rejects_bad_arguments() {
    let indexer = RangeIndexer::new(FakeNode::linear(CHAIN, 10), memory_store());
    let cancel = CancellationToken::new();

    let err = indexer
        .index_range(CHAIN, 5, 4, 4, TraceMode::None, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, IndexError::InvalidRange(5, 4)));

    let err = indexer
        .index_range(CHAIN, 0, 4, 0, TraceMode::None, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, IndexError::InvalidConcurrency));
}

#[tokio::test]
async fn cancelled_range_does_not_advance() {
    let indexer = RangeIndexer::new(FakeNode::linear(CHAIN, 10), memory_store());

    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = indexer
        .index_range(CHAIN, 0, 9, 4, TraceMode::None, &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, IndexError::Cancelled));
    assert_eq!(indexer.checkpoints().get(CHAIN, Family::Raw).unwrap(), None);
}

fn default_transforms() -> Arc<TransformChain> {
    Arc::new(TransformChain::from_config(&TransformsConfig::default()).unwrap())
}

#[tokio::test]
async fn derived_pass_fills_tables() {
    let node = FakeNode::linear(CHAIN, 5);
    let store = memory_store();
    let indexer = RangeIndexer::new(node, store.clone());
    let cancel = CancellationToken::new();
    let cache = Arc::new(MetadataCache::new(1_000));

    indexer
        .index_range(CHAIN, 0, 4, 2, TraceMode::Geth, &cancel)
        .await
        .unwrap();

    indexer
        .index_derived_range(CHAIN, 0, 4, default_transforms(), 2, cache, &cancel)
        .await
        .unwrap();

    assert_eq!(
        indexer.checkpoints().get(CHAIN, Family::Derived).unwrap(),
        Some(4)
    );

    assert_eq!(count_rows(&store, tables::TRANSACTIONS, CHAIN), 10);
    assert_eq!(count_rows(&store, tables::ERC20_TRANSFERS, CHAIN), 5);
    assert_eq!(count_rows(&store, tables::ERC721_TRANSFERS, CHAIN), 0);
    assert_eq!(count_rows(&store, tables::INTERNAL_TXS, CHAIN), 5);
    assert_eq!(count_rows(&store, tables::WITHDRAWALS, CHAIN), 5);

    // holders 1 and 2 in native coin, 1 and 3 in the token
    assert_eq!(count_rows(&store, tables::PENDING_BALANCES, CHAIN), 4);
}

#[tokio::test]
async fn rederiving_converges() {
    let node = FakeNode::linear(CHAIN, 5);
    let store = memory_store();
    let indexer = RangeIndexer::new(node, store.clone());
    let cancel = CancellationToken::new();
    let transforms = default_transforms();

    indexer
        .index_range(CHAIN, 0, 4, 2, TraceMode::Geth, &cancel)
        .await
        .unwrap();

    indexer
        .index_derived_range(
            CHAIN,
            0,
            4,
            transforms.clone(),
            4,
            Arc::new(MetadataCache::default()),
            &cancel,
        )
        .await
        .unwrap();

    let first = all_rows(&store, tables::TRANSACTIONS);

    indexer
        .index_derived_range(
            CHAIN,
            0,
            4,
            transforms,
            1,
            Arc::new(MetadataCache::default()),
            &cancel,
        )
        .await
        .unwrap();

    assert_eq!(first, all_rows(&store, tables::TRANSACTIONS));
}

#[tokio::test]
async fn derived_pass_requires_raw_rows() {
    let node = FakeNode::linear(CHAIN, 10);
    let store = memory_store();
    let indexer = RangeIndexer::new(node, store);
    let cancel = CancellationToken::new();

    indexer
        .index_range(CHAIN, 0, 4, 2, TraceMode::None, &cancel)
        .await
        .unwrap();

    let err = indexer
        .index_derived_range(
            CHAIN,
            0,
            5,
            default_transforms(),
            2,
            Arc::new(MetadataCache::default()),
            &cancel,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, IndexError::MissingRawRow(5)));
    assert_eq!(
        indexer.checkpoints().get(CHAIN, Family::Derived).unwrap(),
        None
    );
}

#[tokio::test]
async fn derived_pass_survives_truncated_multi_token_log() {
    let node = FakeNode::linear(CHAIN, 5);

    let mut data = word_from_u64(5).to_vec();
    data.extend(word_from_u64(40));

    let truncated = Log {
        address: address(0x30),
        topics: vec![
            TRANSFER_SINGLE_TOPIC,
            address_word(&address(9)),
            address_word(&address(1)),
            address_word(&address(2)),
        ],
        data: vec![0xab; 10],
        index: 1,
    };

    let valid = Log {
        data,
        index: 2,
        ..truncated.clone()
    };

    node.push_log(2, 1, truncated);
    node.push_log(3, 1, valid);

    let store = memory_store();
    let indexer = RangeIndexer::new(node, store.clone());
    let cancel = CancellationToken::new();

    indexer
        .index_range(CHAIN, 0, 4, 2, TraceMode::None, &cancel)
        .await
        .unwrap();

    indexer
        .index_derived_range(
            CHAIN,
            0,
            4,
            default_transforms(),
            2,
            Arc::new(MetadataCache::default()),
            &cancel,
        )
        .await
        .unwrap();

    assert_eq!(
        indexer.checkpoints().get(CHAIN, Family::Derived).unwrap(),
        Some(4)
    );

    assert_eq!(count_rows(&store, tables::ERC1155_TRANSFERS, CHAIN), 1);
}
