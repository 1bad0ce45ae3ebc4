//! Bounded-concurrency range indexing.
//!
//! The raw pass fetches blocks from the node and commits one row per block.
//! The derived pass re-reads those rows from the store and runs the
//! transform chain over them. Both advance their checkpoint once, after every
//! block of the range is durable.

use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::{Duration, Instant},
};

use futures_util::{stream, StreamExt as _};
use rayon::prelude::*;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::{
    fetch_block, keys,
    metrics::Metrics,
    store::{self, tables},
    Block, BlockHash, BlockNumber, BlockRef, ChainId, CheckpointTracker, Family, IndexError,
    MetadataCache, MutationBatch, MutationStore, NodeError, NodeSource, StoreError, TraceMode,
    TransformChain,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeOutcome {
    pub start: BlockNumber,
    pub end: BlockNumber,
    /// Highest block of the range known to be fully indexed.
    pub last_indexed: Option<BlockNumber>,
    pub blocks: u64,
    pub elapsed: Duration,
}

impl RangeOutcome {
    pub fn stopped_early(&self) -> bool {
        self.last_indexed != Some(self.end)
    }
}

enum BlockOutcome {
    Committed,
    BeyondHead(BlockNumber),
}

struct Progress {
    family: Family,
    chain_id: ChainId,
    every: u64,
    started: Instant,
    count: AtomicU64,
}

impl Progress {
    fn new(family: Family, chain_id: ChainId, every: u64) -> Self {
        Self {
            family,
            chain_id,
            every,
            started: Instant::now(),
            count: AtomicU64::new(0),
        }
    }

    fn tick(&self) {
        let count = self.count.fetch_add(1, Ordering::Relaxed) + 1;

        if self.every == 0 || count % self.every != 0 {
            return;
        }

        let elapsed = self.started.elapsed();
        let rate = count as f64 / elapsed.as_secs_f64().max(f64::EPSILON);

        info!(
            chain_id = self.chain_id,
            family = %self.family,
            blocks = count,
            elapsed = ?elapsed,
            blocks_per_sec = rate,
            "indexing progress"
        );
    }

    fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

fn check_range(start: BlockNumber, end: BlockNumber, concurrency: usize) -> Result<(), IndexError> {
    if start > end {
        return Err(IndexError::InvalidRange(start, end));
    }

    if concurrency == 0 {
        return Err(IndexError::InvalidConcurrency);
    }

    Ok(())
}

/// Batch that stores `block` in place of every row held for its number,
/// placeholder and stale branches included.
pub fn raw_block_batch(block: &Block) -> Result<MutationBatch, StoreError> {
    let mut batch = MutationBatch::replacing(tables::BLOCKS, block.point());

    batch.put(
        keys::raw_block_key(block.chain_id, block.number, &block.hash),
        store::encode_block_row(block)?,
    );

    Ok(batch)
}

/// Loads the single real raw row stored for `number`.
pub fn load_raw_block<S: MutationStore>(
    store: &S,
    chain_id: ChainId,
    number: BlockNumber,
) -> Result<Block, IndexError> {
    let rows = store::read_block_rows(store, chain_id, number)?;

    let mut blocks = rows.into_iter().filter_map(|row| match row {
        crate::StoredBlockRow::Block(b) => Some(b),
        crate::StoredBlockRow::Placeholder => None,
    });

    let block = blocks.next().ok_or(IndexError::MissingRawRow(number))?;

    if blocks.next().is_some() {
        return Err(IndexError::DuplicateRow(number));
    }

    Ok(*block)
}

fn derive_block<S: MutationStore>(
    store: &S,
    chain_id: ChainId,
    number: BlockNumber,
    transforms: &TransformChain,
    cache: &MetadataCache,
) -> Result<(), IndexError> {
    let block = load_raw_block(store, chain_id, number)?;

    let batches = transforms
        .apply(&block, cache)
        .map_err(|(transform, source)| IndexError::Transform {
            transform,
            number,
            source,
        })?;

    store.commit_batches(&batches)?;

    Ok(())
}

#[derive(Clone)]
pub struct RangeIndexer<N, S> {
    node: N,
    store: S,
    checkpoints: CheckpointTracker<S>,
    metrics: Metrics,
    progress_every: u64,
}

impl<N: NodeSource, S: MutationStore> RangeIndexer<N, S> {
    pub fn new(node: N, store: S) -> Self {
        Self {
            node,
            checkpoints: CheckpointTracker::new(store.clone()),
            store,
            metrics: Metrics::new(),
            progress_every: 500,
        }
    }

    pub fn with_progress_every(mut self, every: u64) -> Self {
        self.progress_every = every;
        self
    }

    pub fn checkpoints(&self) -> &CheckpointTracker<S> {
        &self.checkpoints
    }

    fn schedule_placeholders(
        &self,
        chain_id: ChainId,
        start: BlockNumber,
        end: BlockNumber,
    ) -> Result<(), StoreError> {
        let source = BlockRef {
            chain_id,
            number: start,
            hash: BlockHash::default(),
        };

        let mut existing = HashSet::new();

        for row in self
            .store
            .iter_rows(tables::BLOCKS, keys::number_range(chain_id, start, end))?
        {
            let (key, _) = row?;

            if let Some((_, number, _)) = keys::split_row_key(&key) {
                existing.insert(number);
            }
        }

        let mut batch = MutationBatch::new(tables::BLOCKS, source);

        // already indexed (or already scheduled) numbers keep their rows
        for number in (start..=end).filter(|n| !existing.contains(n)) {
            batch.put(
                keys::placeholder_key(chain_id, number),
                vec![keys::PLACEHOLDER_SENTINEL],
            );
        }

        if !batch.is_empty() {
            self.store.commit_batch(&batch)?;
        }

        Ok(())
    }

    async fn index_block(
        &self,
        chain_id: ChainId,
        number: BlockNumber,
        head: BlockNumber,
        mode: TraceMode,
        cancel: &CancellationToken,
    ) -> Result<BlockOutcome, IndexError> {
        if cancel.is_cancelled() {
            return Err(IndexError::Cancelled);
        }

        let block = match fetch_block(&self.node, chain_id, number, mode).await {
            Ok(block) => block,
            Err(NodeError::NotFound(_)) if number > head => {
                debug!(chain_id, number, head, "block beyond head");

                let source = BlockRef {
                    chain_id,
                    number,
                    hash: BlockHash::default(),
                };

                let mut batch = MutationBatch::new(tables::BLOCKS, source);
                batch.delete(keys::placeholder_key(chain_id, number));
                self.store.commit_batch(&batch)?;

                return Ok(BlockOutcome::BeyondHead(number));
            }
            Err(NodeError::NotFound(_)) => return Err(IndexError::MissingBlock { number, head }),
            Err(err) => return Err(err.into()),
        };

        if block.number != number {
            return Err(IndexError::UnexpectedBlock {
                expected: number,
                found: block.number,
            });
        }

        if cancel.is_cancelled() {
            return Err(IndexError::Cancelled);
        }

        self.store.commit_batch(&raw_block_batch(&block)?)?;

        Ok(BlockOutcome::Committed)
    }

    /// Fetches and stores raw blocks `start..=end`, then advances the raw
    /// checkpoint.
    ///
    /// The first failing block cancels its in-flight peers and is returned;
    /// the checkpoint is left untouched in that case. A block the node does
    /// not know about above its head ends the range early.
    #[instrument(skip_all, fields(chain_id = chain_id, start = start, end = end))]
    pub async fn index_range(
        &self,
        chain_id: ChainId,
        start: BlockNumber,
        end: BlockNumber,
        concurrency: usize,
        mode: TraceMode,
        cancel: &CancellationToken,
    ) -> Result<RangeOutcome, IndexError> {
        check_range(start, end, concurrency)?;

        let head = self.node.chain_head().await?;

        if start <= head {
            self.schedule_placeholders(chain_id, start, end.min(head))?;
        }

        let workers = cancel.child_token();
        let progress = Progress::new(Family::Raw, chain_id, self.progress_every);
        let mut first_absent: Option<BlockNumber> = None;

        let mut pending = stream::iter(start..=end)
            .map(|number| self.index_block(chain_id, number, head, mode, &workers))
            .buffer_unordered(concurrency);

        while let Some(result) = pending.next().await {
            match result {
                Ok(BlockOutcome::Committed) => progress.tick(),
                Ok(BlockOutcome::BeyondHead(number)) => {
                    first_absent = Some(first_absent.map_or(number, |x| x.min(number)));
                }
                Err(err) => {
                    workers.cancel();
                    warn!(chain_id, start, end, %err, "raw range failed");
                    return Err(err);
                }
            }
        }

        drop(pending);

        let last_indexed = match first_absent {
            Some(absent) => absent.checked_sub(1).filter(|x| *x >= start),
            None => Some(end),
        };

        if let Some(last) = last_indexed {
            self.checkpoints.advance(chain_id, Family::Raw, last)?;
        }

        self.metrics
            .register_blocks(chain_id, Family::Raw, progress.count());

        let outcome = RangeOutcome {
            start,
            end,
            last_indexed,
            blocks: progress.count(),
            elapsed: progress.started.elapsed(),
        };

        info!(
            chain_id,
            start,
            end,
            ?last_indexed,
            blocks = outcome.blocks,
            elapsed = ?outcome.elapsed,
            "raw range indexed"
        );

        Ok(outcome)
    }

    /// Runs `transforms` over stored raw blocks `start..=end`, then advances
    /// the derived checkpoint.
    ///
    /// Each block's batches are committed together. A failed pass leaves the
    /// derived checkpoint where it was; re-running it converges because every
    /// block-scoped batch replaces that block's rows.
    #[instrument(skip_all, fields(chain_id = chain_id, start = start, end = end))]
    pub async fn index_derived_range(
        &self,
        chain_id: ChainId,
        start: BlockNumber,
        end: BlockNumber,
        transforms: Arc<TransformChain>,
        concurrency: usize,
        cache: Arc<MetadataCache>,
        cancel: &CancellationToken,
    ) -> Result<RangeOutcome, IndexError> {
        check_range(start, end, concurrency)?;

        let store = self.store.clone();
        let workers = cancel.child_token();
        let progress = Arc::new(Progress::new(Family::Derived, chain_id, self.progress_every));

        let task_progress = progress.clone();
        let task_workers = workers.clone();

        let result = tokio::task::spawn_blocking(move || {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(concurrency)
                .build()
                .map_err(|e| StoreError::InternalStoreError(e.to_string()))?;

            let failure: Mutex<Option<IndexError>> = Mutex::new(None);

            let walked = pool.install(|| {
                (start..=end).into_par_iter().try_for_each(|number| {
                    if task_workers.is_cancelled() {
                        return Err(());
                    }

                    match derive_block(&store, chain_id, number, &transforms, &cache) {
                        Ok(()) => {
                            task_progress.tick();
                            Ok(())
                        }
                        Err(err) => {
                            task_workers.cancel();
                            let mut slot = failure.lock().unwrap_or_else(|e| e.into_inner());
                            slot.get_or_insert(err);
                            Err(())
                        }
                    }
                })
            });

            let failure = failure.into_inner().unwrap_or_else(|e| e.into_inner());

            match (walked, failure) {
                (Ok(()), _) => Ok(()),
                (Err(()), Some(err)) => Err(err),
                (Err(()), None) => Err(IndexError::Cancelled),
            }
        })
        .await
        .map_err(|e| StoreError::InternalStoreError(format!("derive task failed: {e}")))?;

        if let Err(err) = result {
            workers.cancel();
            warn!(chain_id, start, end, %err, "derived range failed");
            return Err(err);
        }

        self.checkpoints.advance(chain_id, Family::Derived, end)?;

        self.metrics
            .register_blocks(chain_id, Family::Derived, progress.count());

        let outcome = RangeOutcome {
            start,
            end,
            last_indexed: Some(end),
            blocks: progress.count(),
            elapsed: progress.started.elapsed(),
        };

        info!(
            chain_id,
            start,
            end,
            blocks = outcome.blocks,
            elapsed = ?outcome.elapsed,
            "derived range indexed"
        );

        Ok(outcome)
    }
}
