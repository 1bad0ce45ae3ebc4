use std::ops::Range;

use thiserror::Error;

use crate::{keys, Block, BlockNumber, BlockRef, ChainId, StoredBlockRow};

pub type TableName = &'static str;
pub type RowKey = Vec<u8>;
pub type RowValue = Vec<u8>;

pub mod tables {
    use super::TableName;

    pub const BLOCKS: TableName = "blocks";
    pub const TRANSACTIONS: TableName = "transactions";
    pub const INTERNAL_TXS: TableName = "internal_txs";
    pub const ERC20_TRANSFERS: TableName = "erc20_transfers";
    pub const ERC721_TRANSFERS: TableName = "erc721_transfers";
    pub const ERC1155_TRANSFERS: TableName = "erc1155_transfers";
    pub const UNCLES: TableName = "uncles";
    pub const WITHDRAWALS: TableName = "withdrawals";
    pub const ENS_REGISTRATIONS: TableName = "ens_registrations";
    pub const CONTRACTS: TableName = "contracts";
    pub const PENDING_BALANCES: TableName = "pending_balances";
    pub const BALANCES: TableName = "balances";
    pub const LEASES: TableName = "leases";

    /// Tables keyed by `(chain, number, ..)`, rolled back on reorg.
    pub const BLOCK_SCOPED: &[TableName] = &[
        TRANSACTIONS,
        INTERNAL_TXS,
        ERC20_TRANSFERS,
        ERC721_TRANSFERS,
        ERC1155_TRANSFERS,
        UNCLES,
        WITHDRAWALS,
        ENS_REGISTRATIONS,
        CONTRACTS,
    ];

    pub const ALL: &[TableName] = &[
        BLOCKS,
        TRANSACTIONS,
        INTERNAL_TXS,
        ERC20_TRANSFERS,
        ERC721_TRANSFERS,
        ERC1155_TRANSFERS,
        UNCLES,
        WITHDRAWALS,
        ENS_REGISTRATIONS,
        CONTRACTS,
        PENDING_BALANCES,
        BALANCES,
        LEASES,
    ];
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("internal store error: {0}")]
    InternalStoreError(String),

    #[error("table {0} not found")]
    TableNotFound(TableName),

    #[error("row decoding error: {0}")]
    DecodingError(String),
}

impl From<bincode::Error> for StoreError {
    fn from(value: bincode::Error) -> Self {
        StoreError::DecodingError(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    Put(RowKey, RowValue),
    Delete(RowKey),
    DeleteRange(Range<RowKey>),
}

/// Ordered mutations for one table, tagged with the block they derive from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationBatch {
    pub table: TableName,
    pub source: BlockRef,
    pub mutations: Vec<Mutation>,
}

impl MutationBatch {
    pub fn new(table: TableName, source: BlockRef) -> Self {
        Self {
            table,
            source,
            mutations: vec![],
        }
    }

    /// Batch that first clears every row the source block holds in `table`,
    /// so applying it twice leaves the same rows as applying it once.
    pub fn replacing(table: TableName, source: BlockRef) -> Self {
        let clear = keys::number_range(source.chain_id, source.number, source.number);

        Self {
            table,
            source,
            mutations: vec![Mutation::DeleteRange(clear)],
        }
    }

    pub fn put(&mut self, key: RowKey, value: RowValue) {
        self.mutations.push(Mutation::Put(key, value));
    }

    pub fn delete(&mut self, key: RowKey) {
        self.mutations.push(Mutation::Delete(key));
    }

    pub fn len(&self) -> usize {
        self.mutations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }

    pub fn puts(&self) -> impl Iterator<Item = (&RowKey, &RowValue)> {
        self.mutations.iter().filter_map(|m| match m {
            Mutation::Put(k, v) => Some((k, v)),
            _ => None,
        })
    }
}

/// A sorted key-value column store.
///
/// Each batch commits atomically. Implementations may commit a slice of
/// batches in one transaction but callers never rely on it.
pub trait MutationStore: Clone + Send + Sync + 'static {
    type RowIter: Iterator<Item = Result<(RowKey, RowValue), StoreError>>;

    fn read_row(&self, table: TableName, key: &[u8]) -> Result<Option<RowValue>, StoreError>;

    fn iter_rows(&self, table: TableName, range: Range<RowKey>) -> Result<Self::RowIter, StoreError>;

    fn last_row(
        &self,
        table: TableName,
        range: Range<RowKey>,
    ) -> Result<Option<(RowKey, RowValue)>, StoreError>;

    fn commit_batches(&self, batches: &[MutationBatch]) -> Result<(), StoreError>;

    fn delete_range(&self, table: TableName, range: Range<RowKey>) -> Result<u64, StoreError>;

    fn read_counter(&self, name: &str) -> Result<Option<u64>, StoreError>;

    fn write_counter(&self, name: &str, value: Option<u64>) -> Result<(), StoreError>;

    /// Raises the counter to `value` if it is unset or lower. Returns whether
    /// it changed.
    fn raise_counter(&self, name: &str, value: u64) -> Result<bool, StoreError> {
        match self.read_counter(name)? {
            Some(current) if current >= value => Ok(false),
            _ => {
                self.write_counter(name, Some(value))?;
                Ok(true)
            }
        }
    }

    fn commit_batch(&self, batch: &MutationBatch) -> Result<(), StoreError> {
        self.commit_batches(std::slice::from_ref(batch))
    }

    /// Up to `limit` rows starting with `prefix`, strictly after `start_after`
    /// when given.
    fn scan(
        &self,
        table: TableName,
        prefix: &[u8],
        start_after: Option<&[u8]>,
        limit: usize,
    ) -> Result<Vec<(RowKey, RowValue)>, StoreError> {
        let mut range = keys::prefix_range(prefix);

        if let Some(after) = start_after {
            let next = keys::key_after(after);
            if next > range.start {
                range.start = next;
            }
        }

        if range.start >= range.end {
            return Ok(vec![]);
        }

        self.iter_rows(table, range)?.take(limit).collect()
    }
}

pub fn encode_block_row(block: &Block) -> Result<RowValue, StoreError> {
    Ok(bincode::serialize(block)?)
}

pub fn decode_block_row(value: &[u8]) -> Result<StoredBlockRow, StoreError> {
    if value == [keys::PLACEHOLDER_SENTINEL] {
        return Ok(StoredBlockRow::Placeholder);
    }

    let block = bincode::deserialize(value)?;

    Ok(StoredBlockRow::Block(Box::new(block)))
}

/// Every stored raw row for one block number, placeholders included.
pub fn read_block_rows<S: MutationStore>(
    store: &S,
    chain_id: ChainId,
    number: BlockNumber,
) -> Result<Vec<StoredBlockRow>, StoreError> {
    let range = keys::number_range(chain_id, number, number);

    store
        .iter_rows(tables::BLOCKS, range)?
        .map(|row| row.and_then(|(_, v)| decode_block_row(&v)))
        .collect()
}

/// Highest block number holding a real (non-placeholder) raw row.
pub fn stored_tip<S: MutationStore>(
    store: &S,
    chain_id: ChainId,
) -> Result<Option<BlockNumber>, StoreError> {
    let mut range = keys::prefix_range(&keys::chain_prefix(chain_id));

    loop {
        let Some((key, value)) = store.last_row(tables::BLOCKS, range.clone())? else {
            return Ok(None);
        };

        if value != [keys::PLACEHOLDER_SENTINEL] {
            return Ok(keys::split_row_key(&key).map(|(_, number, _)| number));
        }

        range.end = key;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BlockHash;

    #[test]
    fn replacing_batch_clears_block_first() {
        let source = BlockRef {
            chain_id: 1,
            number: 8,
            hash: BlockHash::default(),
        };

        let mut batch = MutationBatch::replacing(tables::TRANSACTIONS, source);
        batch.put(keys::row_key(1, 8, b"a"), b"1".to_vec());

        assert_eq!(batch.len(), 2);
        assert!(matches!(batch.mutations[0], Mutation::DeleteRange(_)));
        assert_eq!(batch.puts().count(), 1);
    }

    #[test]
    fn sentinel_decodes_as_placeholder() {
        let row = decode_block_row(&[keys::PLACEHOLDER_SENTINEL]).unwrap();
        assert!(row.is_placeholder());
    }
}
