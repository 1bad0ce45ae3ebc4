use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, RwLock, RwLockReadGuard, RwLockWriteGuard,
    },
};

use ethdex_core::{
    node::{Balance, BlockData},
    BalanceSubject, BlockHash, BlockNumber, ChainId, Log, NodeError, NodeSource, Receipt, Trace,
    TraceMode, Word,
};
use tracing::debug;

use crate::blocks::{fake_chain, FakeBlock};

struct Chain {
    chain_id: ChainId,
    blocks: Vec<FakeBlock>,
    failures: HashMap<BlockNumber, NodeError>,
    balances: HashMap<BalanceSubject, Word>,
    unanswered: HashSet<BalanceSubject>,
}

/// In-process node serving a scripted chain.
///
/// Clones share state, so a test can reorg or break the chain while an
/// engine holds its own copy.
#[derive(Clone)]
pub struct FakeNode {
    chain: Arc<RwLock<Chain>>,
    balance_calls: Arc<AtomicUsize>,
}

impl FakeNode {
    /// Blocks `0..count` of fork `0`.
    pub fn linear(chain_id: ChainId, count: u64) -> Self {
        let blocks = match count {
            0 => vec![],
            n => fake_chain(0, n - 1, 0, BlockHash::default()),
        };

        Self {
            chain: Arc::new(RwLock::new(Chain {
                chain_id,
                blocks,
                failures: HashMap::new(),
                balances: HashMap::new(),
                unanswered: HashSet::new(),
            })),
            balance_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Chain> {
        self.chain.read().unwrap()
    }

    fn write(&self) -> RwLockWriteGuard<'_, Chain> {
        self.chain.write().unwrap()
    }

    pub fn head(&self) -> Option<BlockNumber> {
        self.read().blocks.last().map(FakeBlock::number)
    }

    pub fn hash_at(&self, number: BlockNumber) -> Option<BlockHash> {
        self.read()
            .blocks
            .get(number as usize)
            .map(FakeBlock::hash)
    }

    /// Replaces blocks from `fork` upwards with a new branch (tagged with
    /// `salt`) ending at `new_head`.
    pub fn reorg_from(&self, fork: BlockNumber, new_head: BlockNumber, salt: u8) {
        let mut chain = self.write();
        chain.blocks.truncate(fork as usize);

        let parent = chain.blocks.last().map(FakeBlock::hash).unwrap_or_default();
        chain
            .blocks
            .extend(fake_chain(fork, new_head, salt, parent));

        debug!(fork, new_head, salt, "fake node reorged");
    }

    /// Grows the current branch up to `new_head`.
    pub fn extend_to(&self, new_head: BlockNumber, salt: u8) {
        let mut chain = self.write();
        let next = chain.blocks.len() as u64;

        if new_head < next {
            return;
        }

        let parent = chain.blocks.last().map(FakeBlock::hash).unwrap_or_default();
        chain
            .blocks
            .extend(fake_chain(next, new_head, salt, parent));
    }

    /// Appends `log` to the receipt of transaction `tx_index` in block
    /// `number`.
    pub fn push_log(&self, number: BlockNumber, tx_index: usize, log: Log) {
        let mut chain = self.write();

        if let Some(receipt) = chain
            .blocks
            .get_mut(number as usize)
            .and_then(|b| b.receipts.get_mut(tx_index))
        {
            receipt.logs.push(log);
        }
    }

    /// Makes every request touching `number` fail with `error`.
    pub fn fail_at(&self, number: BlockNumber, error: NodeError) {
        self.write().failures.insert(number, error);
    }

    pub fn heal(&self, number: BlockNumber) {
        self.write().failures.remove(&number);
    }

    pub fn set_balance(&self, subject: BalanceSubject, amount: Word) {
        self.write().balances.insert(subject, amount);
    }

    /// Leaves `subject` out of every balance answer.
    pub fn withhold_balance(&self, subject: BalanceSubject) {
        self.write().unanswered.insert(subject);
    }

    pub fn balance_calls(&self) -> usize {
        self.balance_calls.load(Ordering::SeqCst)
    }

    fn with_block<T>(
        &self,
        number: BlockNumber,
        f: impl FnOnce(&FakeBlock) -> T,
    ) -> Result<T, NodeError> {
        let chain = self.read();

        if let Some(err) = chain.failures.get(&number) {
            return Err(err.clone());
        }

        chain
            .blocks
            .get(number as usize)
            .map(f)
            .ok_or(NodeError::NotFound(number))
    }
}

impl NodeSource for FakeNode {
    async fn chain_id(&self) -> Result<ChainId, NodeError> {
        Ok(self.read().chain_id)
    }

    async fn chain_head(&self) -> Result<BlockNumber, NodeError> {
        self.head()
            .ok_or_else(|| NodeError::Transient("node has no blocks".into()))
    }

    async fn get_block(&self, number: BlockNumber) -> Result<BlockData, NodeError> {
        self.with_block(number, |b| b.data.clone())
    }

    async fn get_block_receipts(&self, number: BlockNumber) -> Result<Vec<Receipt>, NodeError> {
        self.with_block(number, |b| b.receipts.clone())
    }

    async fn get_block_traces(
        &self,
        number: BlockNumber,
        _mode: TraceMode,
    ) -> Result<Vec<Trace>, NodeError> {
        self.with_block(number, |b| b.traces.clone())
    }

    async fn get_header(&self, number: BlockNumber) -> Result<BlockHash, NodeError> {
        self.with_block(number, FakeBlock::hash)
    }

    async fn get_balances(
        &self,
        subjects: &[BalanceSubject],
        _concurrency: usize,
        _retries: usize,
    ) -> Result<Vec<Balance>, NodeError> {
        self.balance_calls.fetch_add(1, Ordering::SeqCst);

        let chain = self.read();
        let block = chain.blocks.last().map(FakeBlock::number).unwrap_or_default();

        let out = subjects
            .iter()
            .filter(|s| !chain.unanswered.contains(*s))
            .map(|s| Balance {
                subject: *s,
                amount: chain.balances.get(s).copied().unwrap_or_default(),
                block,
            })
            .collect();

        Ok(out)
    }
}
