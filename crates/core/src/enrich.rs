//! Balance enrichment over the pending-marker index.
//!
//! `balance_markers` leaves one marker per touched `(holder, token)` pair. The
//! updater pages through those markers with a `(prefix, last key)` cursor,
//! asks the node for current balances and replaces each answered marker with
//! a `balances` row. Subjects the node could not answer keep their marker and
//! are picked up again on the next pass from an empty cursor.

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::{
    keys,
    metrics::Metrics,
    node::Balance,
    store::tables,
    BalanceSubject, BlockHash, BlockNumber, BlockRef, ChainId, IndexError, MutationBatch,
    MutationStore, NodeSource, RowKey, Word,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceRow {
    pub amount: Word,
    pub block: BlockNumber,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrichBatch {
    /// Last key scanned; pass it back to continue after it.
    pub next_cursor: Option<RowKey>,
    /// Pending keys scanned in this batch.
    pub count: usize,
    /// Balance rows written.
    pub written: usize,
    pub done: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnrichSummary {
    pub batches: usize,
    pub scanned: usize,
    pub written: usize,
    pub done: bool,
}

pub struct MetadataBatchUpdater<N, S> {
    node: N,
    store: S,
    sub_batch_size: usize,
    concurrency: usize,
    retries: usize,
    metrics: Metrics,
}

impl<N: NodeSource, S: MutationStore> MetadataBatchUpdater<N, S> {
    pub fn new(node: N, store: S) -> Self {
        Self {
            node,
            store,
            sub_batch_size: 100,
            concurrency: 8,
            retries: 3,
            metrics: Metrics::new(),
        }
    }

    pub fn with_tuning(mut self, sub_batch_size: usize, concurrency: usize, retries: usize) -> Self {
        self.sub_batch_size = sub_batch_size.max(1);
        self.concurrency = concurrency.max(1);
        self.retries = retries;
        self
    }

    fn write_balances(
        &self,
        chain_id: ChainId,
        balances: &[Balance],
    ) -> Result<usize, IndexError> {
        let source = BlockRef {
            chain_id,
            number: balances.iter().map(|b| b.block).max().unwrap_or_default(),
            hash: BlockHash::default(),
        };

        let mut rows = MutationBatch::new(tables::BALANCES, source);
        let mut markers = MutationBatch::new(tables::PENDING_BALANCES, source);

        for balance in balances {
            let subject = &balance.subject;
            let key = keys::balance_key(chain_id, &subject.holder, subject.token.as_ref());

            let row = BalanceRow {
                amount: balance.amount,
                block: balance.block,
            };

            rows.put(key.clone(), bincode::serialize(&row).map_err(crate::StoreError::from)?);
            markers.delete(key);
        }

        if !rows.is_empty() {
            self.store.commit_batches(&[rows, markers])?;
        }

        Ok(balances.len())
    }

    /// Processes up to `batch_size` pending keys under `prefix` that sort
    /// after `cursor`.
    #[instrument(skip_all, fields(chain_id = chain_id, batch_size = batch_size))]
    pub async fn run_batch(
        &self,
        chain_id: ChainId,
        prefix: &[u8],
        cursor: Option<&[u8]>,
        batch_size: usize,
    ) -> Result<EnrichBatch, IndexError> {
        let batch_size = batch_size.max(1);

        let rows = self
            .store
            .scan(tables::PENDING_BALANCES, prefix, cursor, batch_size)?;

        let count = rows.len();
        let next_cursor = rows.last().map(|(k, _)| k.clone());

        let subjects: Vec<BalanceSubject> = rows
            .iter()
            .filter_map(|(key, _)| keys::split_balance_key(key))
            .filter(|(chain, _, _)| *chain == chain_id)
            .map(|(_, holder, token)| BalanceSubject { holder, token })
            .collect();

        let mut written = 0;

        for chunk in subjects.chunks(self.sub_batch_size) {
            let balances = self
                .node
                .get_balances(chunk, self.concurrency, self.retries)
                .await?;

            if balances.len() < chunk.len() {
                debug!(
                    chain_id,
                    asked = chunk.len(),
                    answered = balances.len(),
                    "node left subjects unanswered"
                );
            }

            written += self.write_balances(chain_id, &balances)?;
        }

        self.metrics.register_balances(chain_id, written as u64);

        Ok(EnrichBatch {
            next_cursor,
            count,
            written,
            done: count < batch_size,
        })
    }

    /// Runs batches over the chain's markers until the index is exhausted,
    /// `max_batches` is reached or `cancel` fires.
    pub async fn run_all(
        &self,
        chain_id: ChainId,
        batch_size: usize,
        max_batches: Option<usize>,
        cancel: &CancellationToken,
    ) -> Result<EnrichSummary, IndexError> {
        let prefix = keys::chain_prefix(chain_id);
        let batch_size = batch_size.max(1);
        let mut cursor: Option<RowKey> = None;
        let mut summary = EnrichSummary::default();

        while max_batches.map_or(true, |max| summary.batches < max) {
            if cancel.is_cancelled() {
                return Err(IndexError::Cancelled);
            }

            let batch = self
                .run_batch(chain_id, &prefix, cursor.as_deref(), batch_size)
                .await?;

            summary.batches += 1;
            summary.scanned += batch.count;
            summary.written += batch.written;

            if batch.done {
                summary.done = true;
                break;
            }

            cursor = batch.next_cursor;
        }

        if summary.scanned > 0 {
            info!(
                chain_id,
                batches = summary.batches,
                scanned = summary.scanned,
                written = summary.written,
                done = summary.done,
                "balances enriched"
            );
        }

        Ok(summary)
    }
}
