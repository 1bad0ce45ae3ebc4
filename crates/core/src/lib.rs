//! Core of the ethdex indexer.
//!
//! Holds the domain model for execution-layer blocks, the traits for the two
//! external collaborators (a [`NodeSource`] that serves canonical chain data
//! and a [`MutationStore`] that persists rows) and the engine pieces built on
//! top of them: range indexing, derived transforms, checkpoints, gap
//! detection, reorg repair and balance enrichment.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod cache;
pub mod checkpoint;
pub mod config;
pub mod enrich;
pub mod follow;
pub mod gaps;
pub mod indexer;
pub mod keys;
pub mod lease;
pub mod metrics;
pub mod model;
pub mod node;
pub mod reorg;
pub mod status;
pub mod store;
pub mod transform;

pub use cache::MetadataCache;
pub use checkpoint::{CheckpointTracker, Family};
pub use model::*;
pub use node::{fetch_block, BalanceSubject, NodeError, NodeSource, TraceMode};
pub use store::{Mutation, MutationBatch, MutationStore, RowKey, RowValue, StoreError, TableName};
pub use transform::{Transform, TransformChain, TransformError};

pub type ChainId = u64;
pub type BlockNumber = u64;
pub type Blob = Vec<u8>;
pub type Word = [u8; 32];

#[derive(Debug, Error)]
#[error("invalid hex value: {0}")]
pub struct HexError(String);

fn parse_fixed<const N: usize>(s: &str) -> Result<[u8; N], HexError> {
    let raw = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(raw).map_err(|_| HexError(s.to_string()))?;
    bytes.try_into().map_err(|_| HexError(s.to_string()))
}

#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockHash(pub [u8; 32]);

impl BlockHash {
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn from_slice(slice: &[u8]) -> Option<Self> {
        let bytes: [u8; 32] = slice.try_into().ok()?;
        Some(Self(bytes))
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl FromStr for BlockHash {
    type Err = HexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_fixed(s).map(Self)
    }
}

pub type TxHash = BlockHash;

#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Address(pub [u8; 20]);

impl Address {
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn from_slice(slice: &[u8]) -> Option<Self> {
        let bytes: [u8; 20] = slice.try_into().ok()?;
        Some(Self(bytes))
    }

    /// Takes the low 20 bytes of an ABI word, the way indexed address topics
    /// are encoded.
    pub fn from_word(word: &Word) -> Self {
        let mut out = [0u8; 20];
        out.copy_from_slice(&word[12..]);
        Self(out)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl FromStr for Address {
    type Err = HexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_fixed(s).map(Self)
    }
}

/// Identity of a block as committed by the indexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockRef {
    pub chain_id: ChainId,
    pub number: BlockNumber,
    pub hash: BlockHash,
}

impl fmt::Display for BlockRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}@{}", self.chain_id, self.number, self.hash)
    }
}

/// A fully fetched block.
///
/// Payloads are kept as opaque encoded blobs; transforms decode only the
/// parts they need. A block is never mutated after it is assembled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub chain_id: ChainId,
    pub number: BlockNumber,
    pub hash: BlockHash,
    pub parent_hash: BlockHash,
    pub timestamp: u64,
    pub header: Blob,
    pub transactions: Blob,
    pub receipts: Blob,
    pub traces: Blob,
    pub uncles: Blob,
    pub withdrawals: Blob,
}

impl Block {
    pub fn point(&self) -> BlockRef {
        BlockRef {
            chain_id: self.chain_id,
            number: self.number,
            hash: self.hash,
        }
    }

    pub fn decode_header(&self) -> Result<Header, bincode::Error> {
        bincode::deserialize(&self.header)
    }

    pub fn decode_transactions(&self) -> Result<Vec<Transaction>, bincode::Error> {
        decode_list(&self.transactions)
    }

    pub fn decode_receipts(&self) -> Result<Vec<Receipt>, bincode::Error> {
        decode_list(&self.receipts)
    }

    pub fn decode_traces(&self) -> Result<Vec<Trace>, bincode::Error> {
        decode_list(&self.traces)
    }

    pub fn decode_uncles(&self) -> Result<Vec<Header>, bincode::Error> {
        decode_list(&self.uncles)
    }

    pub fn decode_withdrawals(&self) -> Result<Vec<Withdrawal>, bincode::Error> {
        decode_list(&self.withdrawals)
    }
}

fn decode_list<T: serde::de::DeserializeOwned>(blob: &[u8]) -> Result<Vec<T>, bincode::Error> {
    if blob.is_empty() {
        return Ok(vec![]);
    }

    bincode::deserialize(blob)
}

/// Persisted content of a raw block row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredBlockRow {
    /// Scheduled for indexing, content not yet known.
    Placeholder,
    Block(Box<Block>),
}

impl StoredBlockRow {
    pub fn is_placeholder(&self) -> bool {
        matches!(self, Self::Placeholder)
    }

    pub fn as_block(&self) -> Option<&Block> {
        match self {
            Self::Block(x) => Some(x),
            Self::Placeholder => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error(transparent)]
    Node(#[from] NodeError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("transform {transform} failed on block {number}")]
    Transform {
        transform: &'static str,
        number: BlockNumber,
        #[source]
        source: TransformError,
    },

    #[error("invalid range [{0}, {1}]")]
    InvalidRange(BlockNumber, BlockNumber),

    #[error("concurrency must be at least 1")]
    InvalidConcurrency,

    #[error("block {number} not found at or below head {head}")]
    MissingBlock {
        number: BlockNumber,
        head: BlockNumber,
    },

    #[error("raw row for block {0} is missing")]
    MissingRawRow(BlockNumber),

    #[error("block {0} has more than one stored row")]
    DuplicateRow(BlockNumber),

    #[error("node returned block {found} when asked for {expected}")]
    UnexpectedBlock {
        expected: BlockNumber,
        found: BlockNumber,
    },

    #[error("node serves chain {found}, expected {expected}")]
    ChainMismatch { expected: ChainId, found: ChainId },

    #[error("stored genesis block differs from node")]
    GenesisMismatch,

    #[error("fork point lies below block {floor} (scanned depth {depth})")]
    DeepReorg { floor: BlockNumber, depth: u64 },

    #[error("lease {name} is held by {holder}")]
    LeaseHeld { name: String, holder: String },

    #[error("no successful iteration in {0:?}")]
    Stalled(std::time::Duration),

    #[error("operation cancelled")]
    Cancelled,
}

impl IndexError {
    /// Whether the control loop may retry the failed iteration.
    pub fn is_transient(&self) -> bool {
        match self {
            IndexError::Node(x) => x.is_transient(),
            IndexError::Store(_) => true,
            IndexError::LeaseHeld { .. } => true,
            _ => false,
        }
    }
}
