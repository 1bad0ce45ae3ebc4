//! Reorg detection and repair.
//!
//! The resolver compares the node's canonical hashes against stored raw rows
//! over a window below the node head. The first mismatch is the fork point:
//! every checkpoint is rewound below it and only then are the rows from the
//! fork point upwards deleted, raw and derived alike. A crash between the two
//! steps leaves checkpoints below the surviving rows, which re-indexing
//! overwrites.

use tracing::{info, instrument, warn};

use crate::{
    config::DeepReorgPolicy,
    keys,
    metrics::Metrics,
    store::{self, tables},
    BlockHash, BlockNumber, ChainId, CheckpointTracker, Family, IndexError, MutationStore,
    NodeError, NodeSource, StoreError, StoredBlockRow, TableName,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReorgOutcome {
    Consistent { checked: u64 },
    RolledBack { fork: BlockNumber, removed: u64 },
}

enum Scan {
    Consistent { checked: u64 },
    Fork(BlockNumber),
    /// Mismatch at the window floor and at the stored row below it.
    ForkBelow(BlockNumber),
}

pub struct ReorgResolver<N, S> {
    node: N,
    store: S,
    checkpoints: CheckpointTracker<S>,
    tables: Vec<TableName>,
    policy: DeepReorgPolicy,
    max_depth: u64,
    metrics: Metrics,
}

impl<N: NodeSource, S: MutationStore> ReorgResolver<N, S> {
    pub fn new(node: N, store: S) -> Self {
        Self {
            node,
            checkpoints: CheckpointTracker::new(store.clone()),
            store,
            tables: tables::BLOCK_SCOPED.to_vec(),
            policy: DeepReorgPolicy::default(),
            max_depth: 4_096,
            metrics: Metrics::new(),
        }
    }

    pub fn with_policy(mut self, policy: DeepReorgPolicy, max_depth: u64) -> Self {
        self.policy = policy;
        self.max_depth = max_depth;
        self
    }

    /// Hashes of the real rows stored for `number`; placeholders are skipped.
    fn stored_hashes(
        &self,
        chain_id: ChainId,
        number: BlockNumber,
    ) -> Result<Vec<BlockHash>, StoreError> {
        let rows = store::read_block_rows(&self.store, chain_id, number)?;

        let hashes = rows
            .iter()
            .filter_map(StoredBlockRow::as_block)
            .map(|b| b.hash)
            .collect();

        Ok(hashes)
    }

    async fn canonical_hash(&self, number: BlockNumber) -> Result<BlockHash, IndexError> {
        match self.node.get_header(number).await {
            Ok(hash) => Ok(hash),
            // the node dropped below a head it reported moments ago
            Err(NodeError::NotFound(n)) => Err(NodeError::Transient(format!(
                "header {n} vanished while resolving reorgs"
            ))
            .into()),
            Err(err) => Err(err.into()),
        }
    }

    async fn scan(
        &self,
        chain_id: ChainId,
        top: BlockNumber,
        depth: u64,
    ) -> Result<Scan, IndexError> {
        let floor = top - depth.min(top);
        let mut checked = 0;

        for number in floor..=top {
            let stored = self.stored_hashes(chain_id, number)?;

            if stored.is_empty() {
                // rows below the first stored one predate the start block
                if checked == 0 {
                    continue;
                }

                break;
            }

            let canonical = self.canonical_hash(number).await?;

            if stored == [canonical] {
                checked += 1;
                continue;
            }

            warn!(
                chain_id,
                number,
                %canonical,
                stored = ?stored,
                "stored block diverges from node"
            );

            if number == 0 {
                return Err(IndexError::GenesisMismatch);
            }

            if checked == 0 && number == floor {
                let below = self.stored_hashes(chain_id, number - 1)?;

                // deep only if the block under the floor diverges too
                if !below.is_empty() && below != [self.canonical_hash(number - 1).await?] {
                    return Ok(Scan::ForkBelow(number));
                }
            }

            return Ok(Scan::Fork(number));
        }

        Ok(Scan::Consistent { checked })
    }

    /// Rewinds every checkpoint to `fork - 1`, then deletes all rows at or
    /// above `fork`.
    pub fn roll_back(&self, chain_id: ChainId, fork: BlockNumber) -> Result<u64, StoreError> {
        let target = fork.checked_sub(1);

        for family in Family::ALL {
            self.checkpoints.rewind(chain_id, family, target)?;
        }

        let mut removed = 0;

        for table in std::iter::once(tables::BLOCKS).chain(self.tables.iter().copied()) {
            let count = self
                .store
                .delete_range(table, keys::suffix_range(chain_id, fork))?;

            if count > 0 {
                self.metrics.register_deleted(table, count);
            }

            removed += count;
        }

        self.metrics.register_reorg(chain_id);
        info!(chain_id, fork, removed, "rolled back invalidated suffix");

        Ok(removed)
    }

    /// Checks the last `depth` blocks below the node head (or below the
    /// stored tip, when the store lags behind) and repairs the store if they
    /// diverge.
    #[instrument(skip_all, fields(chain_id = chain_id, depth = depth))]
    pub async fn resolve(&self, chain_id: ChainId, depth: u64) -> Result<ReorgOutcome, IndexError> {
        let head = self.node.chain_head().await?;

        let Some(tip) = store::stored_tip(&self.store, chain_id)? else {
            return Ok(ReorgOutcome::Consistent { checked: 0 });
        };

        let top = head.min(tip);
        let mut depth = depth;

        loop {
            let fork = match self.scan(chain_id, top, depth).await? {
                Scan::Consistent { checked } => return Ok(ReorgOutcome::Consistent { checked }),
                Scan::Fork(fork) => fork,
                Scan::ForkBelow(floor) => match self.policy {
                    DeepReorgPolicy::Widen if depth < self.max_depth => {
                        depth = depth.saturating_mul(2).clamp(1, self.max_depth);
                        warn!(chain_id, floor, depth, "fork below scan window, widening");
                        continue;
                    }
                    DeepReorgPolicy::Warn => {
                        warn!(chain_id, floor, "fork below scan window, rolling back to floor");
                        floor
                    }
                    _ => return Err(IndexError::DeepReorg { floor, depth }),
                },
            };

            let removed = self.roll_back(chain_id, fork)?;

            return Ok(ReorgOutcome::RolledBack { fork, removed });
        }
    }
}
