//! The long-running control loop.
//!
//! Every iteration runs the phases in a fixed order: lease check, reorg
//! repair, periodic gap audit, one chunk of raw blocks, one chunk of derived
//! blocks bounded by the raw checkpoint, then a few enrichment batches.
//! Phases never overlap, so the dedup cache cleared at the top of an
//! iteration cannot hide a marker the enrichment pass of that same iteration
//! has already consumed.

use std::{
    sync::Arc,
    time::{Duration, Instant, SystemTime},
};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::{
    config::{EnrichConfig, IndexerConfig, RetryConfig, RootConfig},
    enrich::MetadataBatchUpdater,
    gaps::GapDetector,
    indexer::RangeIndexer,
    lease::{LeaseManager, LeaseState},
    reorg::{ReorgOutcome, ReorgResolver},
    status::Status,
    store::tables,
    BlockNumber, ChainId, Family, IndexError, MetadataCache, MutationStore, NodeSource,
    TransformChain,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Iteration {
    /// Another process holds the lease; nothing was done.
    Standby { holder: String },
    Progressed {
        head: BlockNumber,
        raw: Option<BlockNumber>,
        derived: Option<BlockNumber>,
    },
}

impl Iteration {
    /// Whether both families reached the node head.
    pub fn caught_up(&self) -> bool {
        match self {
            Iteration::Standby { .. } => true,
            Iteration::Progressed { head, raw, derived } => {
                raw.map_or(true, |r| r >= *head) && derived == raw
            }
        }
    }
}

/// Next block after `checkpoint`, never below `floor`.
fn next_block(checkpoint: Option<BlockNumber>, floor: BlockNumber) -> BlockNumber {
    checkpoint.map_or(floor, |c| c.saturating_add(1)).max(floor)
}

fn chunk_end(start: BlockNumber, limit: BlockNumber, max_blocks: u64) -> BlockNumber {
    let span = max_blocks.max(1) - 1;
    start.saturating_add(span).min(limit)
}

async fn pause(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

pub struct IndexerService<N, S> {
    node: N,
    expected_chain: Option<ChainId>,
    config: IndexerConfig,
    enrich: EnrichConfig,
    retries: RetryConfig,
    indexer: RangeIndexer<N, S>,
    resolver: ReorgResolver<N, S>,
    gaps: GapDetector<S>,
    enricher: MetadataBatchUpdater<N, S>,
    lease: Option<LeaseManager<S>>,
    transforms: Arc<TransformChain>,
    cache: Arc<MetadataCache>,
    status: Status,
}

impl<N: NodeSource, S: MutationStore> IndexerService<N, S> {
    pub fn new(node: N, store: S, config: &RootConfig, transforms: TransformChain) -> Self {
        let indexer = RangeIndexer::new(node.clone(), store.clone())
            .with_progress_every(config.indexer.progress_every);

        let resolver = ReorgResolver::new(node.clone(), store.clone()).with_policy(
            config.indexer.deep_reorg_policy,
            config.indexer.max_reorg_depth,
        );

        let enricher = MetadataBatchUpdater::new(node.clone(), store.clone()).with_tuning(
            config.enrich.sub_batch_size,
            config.enrich.concurrency,
            config.enrich.retries,
        );

        let lease = config
            .lease
            .as_ref()
            .map(|l| LeaseManager::new(store.clone(), &l.name, &l.holder, l.ttl_secs));

        Self {
            node,
            expected_chain: config.upstream.chain_id,
            config: config.indexer.clone(),
            enrich: config.enrich.clone(),
            retries: config.retries.clone().unwrap_or_default(),
            indexer,
            resolver,
            gaps: GapDetector::new(store),
            enricher,
            lease,
            transforms: Arc::new(transforms),
            cache: Arc::new(MetadataCache::new(config.indexer.cache_capacity)),
            status: Status::default(),
        }
    }

    pub fn status(&self) -> Status {
        self.status.clone()
    }

    /// Asks the node which chain it serves and checks it against the
    /// configured one.
    pub async fn connect(&self) -> Result<ChainId, IndexError> {
        let found = self.node.chain_id().await?;

        if let Some(expected) = self.expected_chain {
            if expected != found {
                return Err(IndexError::ChainMismatch { expected, found });
            }
        }

        self.status.set_chain(found);
        info!(chain_id = found, "connected to node");

        Ok(found)
    }

    fn check_lease(&self) -> Result<Option<String>, IndexError> {
        let Some(lease) = &self.lease else {
            return Ok(None);
        };

        let state = lease.try_acquire(chrono::Utc::now())?;
        self.status.set_lease(state.is_held());

        match state {
            LeaseState::HeldBy(holder) => Ok(Some(holder)),
            _ => Ok(None),
        }
    }

    /// Runs one pass of every phase.
    #[instrument(skip_all, fields(chain_id = chain_id, iteration = iteration))]
    pub async fn iterate(
        &self,
        chain_id: ChainId,
        iteration: u64,
        cancel: &CancellationToken,
    ) -> Result<Iteration, IndexError> {
        if let Some(holder) = self.check_lease()? {
            debug!(%holder, "lease held elsewhere, standing by");
            return Ok(Iteration::Standby { holder });
        }

        self.cache.clear();

        if let ReorgOutcome::RolledBack { fork, removed } =
            self.resolver.resolve(chain_id, self.config.reorg_depth).await?
        {
            warn!(fork, removed, "reorg repaired");
            self.status.record_reorg();
        }

        let every = self.config.gap_check_every;

        if every > 0 && iteration % every == 0 {
            self.gaps
                .find_gaps(chain_id, tables::BLOCKS, self.config.gap_lookback)?;
        }

        let head = self.node.chain_head().await?;
        let checkpoints = self.indexer.checkpoints();
        let floor = self.config.start_block;

        let start = next_block(checkpoints.get(chain_id, Family::Raw)?, floor);

        if start <= head {
            let end = chunk_end(start, head, self.config.max_range_blocks);

            self.indexer
                .index_range(
                    chain_id,
                    start,
                    end,
                    self.config.concurrency,
                    self.config.trace_mode,
                    cancel,
                )
                .await?;
        }

        let raw = checkpoints.get(chain_id, Family::Raw)?;

        if let Some(raw) = raw {
            let start = next_block(checkpoints.get(chain_id, Family::Derived)?, floor);

            if start <= raw && !self.transforms.is_empty() {
                let end = chunk_end(start, raw, self.config.max_range_blocks);

                self.indexer
                    .index_derived_range(
                        chain_id,
                        start,
                        end,
                        self.transforms.clone(),
                        self.config.concurrency,
                        self.cache.clone(),
                        cancel,
                    )
                    .await?;
            }
        }

        if self.enrich.enabled {
            self.enricher
                .run_all(
                    chain_id,
                    self.enrich.batch_size,
                    Some(self.enrich.max_batches_per_iteration),
                    cancel,
                )
                .await?;
        }

        // with no transforms the derived family has nothing to trail
        let derived = if self.transforms.is_empty() {
            raw
        } else {
            checkpoints.get(chain_id, Family::Derived)?
        };

        self.status.set_progress(head, raw, derived);

        Ok(Iteration::Progressed { head, raw, derived })
    }

    /// Connects and runs a single iteration.
    pub async fn run_once(&self, cancel: &CancellationToken) -> Result<Iteration, IndexError> {
        let chain_id = self.connect().await?;
        let outcome = self.iterate(chain_id, 1, cancel).await?;
        self.status.record_success(SystemTime::now());

        Ok(outcome)
    }

    /// Loops until `cancel` fires or a fatal error occurs.
    ///
    /// Transient failures are retried with backoff. The loop gives up when
    /// `max_retries` consecutive iterations failed or nothing succeeded for
    /// `stall_timeout`.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), IndexError> {
        let chain_id = self.connect().await?;
        let stall_timeout = self.config.stall_timeout();

        let mut iteration = 0u64;
        let mut failures = 0usize;
        let mut last_success = Instant::now();

        while !cancel.is_cancelled() {
            iteration += 1;

            let delay = match self.iterate(chain_id, iteration, &cancel).await {
                Ok(outcome) => {
                    failures = 0;
                    last_success = Instant::now();
                    self.status.record_success(SystemTime::now());

                    if outcome.caught_up() {
                        self.config.poll_interval()
                    } else {
                        Duration::ZERO
                    }
                }
                Err(IndexError::Cancelled) if cancel.is_cancelled() => break,
                Err(err) if err.is_transient() => {
                    failures += 1;
                    self.status.record_failure(&err.to_string());

                    if last_success.elapsed() >= stall_timeout {
                        error!(%err, ?stall_timeout, "indexer stalled");
                        return Err(IndexError::Stalled(stall_timeout));
                    }

                    if failures > self.retries.max_retries {
                        error!(%err, failures, "retries exhausted");
                        return Err(err);
                    }

                    let backoff = self.retries.backoff(failures);
                    warn!(%err, failures, ?backoff, "iteration failed, retrying");
                    backoff
                }
                Err(err) => {
                    self.status.record_failure(&err.to_string());
                    error!(%err, "iteration failed");
                    return Err(err);
                }
            };

            if !delay.is_zero() && !pause(delay, &cancel).await {
                break;
            }
        }

        if let Some(lease) = &self.lease {
            lease.release()?;
        }

        info!(chain_id, "indexer stopped");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resumes_after_checkpoint() {
        assert_eq!(next_block(None, 0), 0);
        assert_eq!(next_block(None, 100), 100);
        assert_eq!(next_block(Some(9), 0), 10);
        assert_eq!(next_block(Some(9), 50), 50);
    }

    #[test]
    fn chunks_are_capped() {
        assert_eq!(chunk_end(10, 1_000, 100), 109);
        assert_eq!(chunk_end(10, 50, 100), 50);
        assert_eq!(chunk_end(10, 50, 0), 10);
    }

    #[test]
    fn standby_counts_as_caught_up() {
        let standby = Iteration::Standby {
            holder: "other".into(),
        };
        assert!(standby.caught_up());

        let behind = Iteration::Progressed {
            head: 10,
            raw: Some(8),
            derived: Some(8),
        };
        assert!(!behind.caught_up());
    }
}
