use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    Address, Block, BlockHash, BlockNumber, ChainId, Header, Receipt, Trace, Transaction,
    Withdrawal, Word,
};

#[derive(Debug, Error, Clone)]
pub enum NodeError {
    #[error("block {0} not found")]
    NotFound(BlockNumber),

    #[error("node request failed: {0}")]
    Transient(String),

    #[error("invalid node response: {0}")]
    InvalidResponse(String),
}

impl NodeError {
    pub fn is_transient(&self) -> bool {
        matches!(self, NodeError::Transient(_))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceMode {
    /// Skip traces altogether.
    #[default]
    None,
    /// `debug_traceBlockByNumber` with the call tracer.
    Geth,
    /// `trace_block`.
    Parity,
}

/// Body of a block as served by the node, before receipts and traces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockData {
    pub header: Header,
    pub transactions: Vec<Transaction>,
    pub uncles: Vec<Header>,
    pub withdrawals: Vec<Withdrawal>,
}

/// Something whose balance can be asked for: native coin when `token` is
/// empty, otherwise an ERC20 `balanceOf`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BalanceSubject {
    pub holder: Address,
    pub token: Option<Address>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub subject: BalanceSubject,
    pub amount: Word,
    pub block: BlockNumber,
}

/// Canonical chain data by block number.
#[trait_variant::make(Send)]
pub trait NodeSource: Clone + Send + Sync + 'static {
    async fn chain_id(&self) -> Result<ChainId, NodeError>;

    async fn chain_head(&self) -> Result<BlockNumber, NodeError>;

    async fn get_block(&self, number: BlockNumber) -> Result<BlockData, NodeError>;

    async fn get_block_receipts(&self, number: BlockNumber) -> Result<Vec<Receipt>, NodeError>;

    async fn get_block_traces(
        &self,
        number: BlockNumber,
        mode: TraceMode,
    ) -> Result<Vec<Trace>, NodeError>;

    async fn get_header(&self, number: BlockNumber) -> Result<BlockHash, NodeError>;

    /// Balances for `subjects`; subjects the node cannot answer for are left
    /// out of the result.
    async fn get_balances(
        &self,
        subjects: &[BalanceSubject],
        concurrency: usize,
        retries: usize,
    ) -> Result<Vec<Balance>, NodeError>;
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, NodeError> {
    bincode::serialize(value).map_err(|e| NodeError::InvalidResponse(e.to_string()))
}

/// Fetches block body, receipts and traces and packs them into a [`Block`].
pub async fn fetch_block<N: NodeSource>(
    node: &N,
    chain_id: ChainId,
    number: BlockNumber,
    mode: TraceMode,
) -> Result<Block, NodeError> {
    let data = node.get_block(number).await?;
    let receipts = node.get_block_receipts(number).await?;

    let traces = match mode {
        TraceMode::None => vec![],
        _ => node.get_block_traces(number, mode).await?,
    };

    let header = &data.header;

    Ok(Block {
        chain_id,
        number: header.number,
        hash: header.hash,
        parent_hash: header.parent_hash,
        timestamp: header.timestamp,
        header: encode(header)?,
        transactions: encode(&data.transactions)?,
        receipts: encode(&receipts)?,
        traces: encode(&traces)?,
        uncles: encode(&data.uncles)?,
        withdrawals: encode(&data.withdrawals)?,
    })
}
