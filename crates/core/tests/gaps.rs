use ethdex_core::{
    gaps::{GapDetector, MissingRange},
    keys,
    store::tables,
    BlockHash, BlockRef, MutationBatch, MutationStore,
};
use ethdex_redb3::RowStore;
use ethdex_testing::{blocks::block_hash, memory_store};

const CHAIN: u64 = 1;

fn seed(store: &RowStore, numbers: impl IntoIterator<Item = u64>) {
    let source = BlockRef {
        chain_id: CHAIN,
        number: 0,
        hash: BlockHash::default(),
    };

    let mut batch = MutationBatch::new(tables::BLOCKS, source);

    for number in numbers {
        let key = keys::raw_block_key(CHAIN, number, &block_hash(number, 0));
        batch.put(key, vec![0xb1, 0x0c]);
    }

    store.commit_batch(&batch).unwrap();
}

fn put(store: &RowStore, key: Vec<u8>, value: Vec<u8>) {
    let source = BlockRef {
        chain_id: CHAIN,
        number: 0,
        hash: BlockHash::default(),
    };

    let mut batch = MutationBatch::new(tables::BLOCKS, source);
    batch.put(key, value);
    store.commit_batch(&batch).unwrap();
}

#[test]
fn finds_exactly_the_missing_numbers() {
    let store = memory_store();
    seed(&store, (0..=100).filter(|n| *n != 17 && *n != 42));

    let report = GapDetector::new(store)
        .find_gaps(CHAIN, tables::BLOCKS, 100)
        .unwrap();

    assert_eq!(report.window, Some((1, 100)));
    assert_eq!(report.missing, vec![17, 42]);
    assert!(report.duplicates.is_empty());
    assert!(report.placeholders.is_empty());
    assert!(!report.is_clean());
}

#[test]
fn reports_placeholders_and_duplicates() {
    let store = memory_store();
    seed(&store, 0..=20);

    // a scheduled block that was never filled
    store
        .delete_range(tables::BLOCKS, keys::number_range(CHAIN, 8, 8))
        .unwrap();
    put(
        &store,
        keys::placeholder_key(CHAIN, 8),
        vec![keys::PLACEHOLDER_SENTINEL],
    );

    // a second branch left behind at 12
    put(
        &store,
        keys::raw_block_key(CHAIN, 12, &block_hash(12, 7)),
        vec![0xb1, 0x0c],
    );

    let report = GapDetector::new(store)
        .find_gaps(CHAIN, tables::BLOCKS, 21)
        .unwrap();

    assert_eq!(report.window, Some((0, 20)));
    assert!(report.missing.is_empty());
    assert_eq!(report.placeholders, vec![8]);
    assert_eq!(report.duplicates, vec![12]);
    assert_eq!(report.unindexed(), vec![8]);
}

#[test]
fn placeholder_next_to_real_row_is_not_a_gap() {
    let store = memory_store();
    seed(&store, 0..=5);

    put(
        &store,
        keys::placeholder_key(CHAIN, 3),
        vec![keys::PLACEHOLDER_SENTINEL],
    );

    let report = GapDetector::new(store)
        .find_gaps(CHAIN, tables::BLOCKS, 10)
        .unwrap();

    assert!(report.is_clean());
}

#[test]
fn empty_store_has_no_gaps() {
    let report = GapDetector::new(memory_store())
        .find_gaps(CHAIN, tables::BLOCKS, 100)
        .unwrap();

    assert_eq!(report.window, None);
    assert!(report.is_clean());
}

#[test]
fn scan_window_covers_numbers_past_the_tip() {
    let store = memory_store();
    seed(&store, 0..=9);

    let report = GapDetector::new(store)
        .scan_window(CHAIN, tables::BLOCKS, 5, 14)
        .unwrap();

    assert_eq!(report.missing, (10..=14).collect::<Vec<_>>());
    assert_eq!(
        report.missing_ranges(),
        vec![MissingRange { start: 10, end: 14 }]
    );
}

#[test]
fn other_chains_do_not_fill_gaps() {
    let store = memory_store();
    seed(&store, [0, 1, 3]);

    put(
        &store,
        keys::raw_block_key(CHAIN + 1, 2, &block_hash(2, 0)),
        vec![0xb1, 0x0c],
    );

    let report = GapDetector::new(store)
        .find_gaps(CHAIN, tables::BLOCKS, 10)
        .unwrap();

    assert_eq!(report.missing, vec![2]);
}
