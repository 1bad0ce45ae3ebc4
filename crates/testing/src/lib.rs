//! Test doubles for the ethdex engine: a scriptable in-process node, block
//! fixtures and stores that fail on demand.

use ethdex_core::{
    keys,
    store::{self, tables},
    BlockHash, BlockNumber, ChainId, MutationStore, StoredBlockRow, TableName,
};
use ethdex_redb3::RowStore;

pub mod blocks;
pub mod faults;
pub mod node;

pub use faults::{FaultyStore, TestFault};
pub use node::FakeNode;

pub fn memory_store() -> RowStore {
    RowStore::in_memory().unwrap()
}

/// Rows `table` holds for `chain_id`, placeholders included.
pub fn count_rows<S: MutationStore>(store: &S, table: TableName, chain_id: ChainId) -> usize {
    store
        .iter_rows(table, keys::prefix_range(&keys::chain_prefix(chain_id)))
        .unwrap()
        .count()
}

/// `(number, hash)` of every real raw row, in key order.
pub fn stored_blocks<S: MutationStore>(store: &S, chain_id: ChainId) -> Vec<(BlockNumber, BlockHash)> {
    store
        .iter_rows(
            tables::BLOCKS,
            keys::prefix_range(&keys::chain_prefix(chain_id)),
        )
        .unwrap()
        .filter_map(|row| {
            let (_, value) = row.unwrap();

            match store::decode_block_row(&value).unwrap() {
                StoredBlockRow::Block(block) => Some((block.number, block.hash)),
                StoredBlockRow::Placeholder => None,
            }
        })
        .collect()
}

/// Numbers holding only a placeholder row.
pub fn placeholders<S: MutationStore>(store: &S, chain_id: ChainId) -> Vec<BlockNumber> {
    store
        .iter_rows(
            tables::BLOCKS,
            keys::prefix_range(&keys::chain_prefix(chain_id)),
        )
        .unwrap()
        .filter_map(|row| {
            let (key, value) = row.unwrap();

            match value.as_slice() {
                [keys::PLACEHOLDER_SENTINEL] => keys::split_row_key(&key).map(|(_, n, _)| n),
                _ => None,
            }
        })
        .collect()
}
