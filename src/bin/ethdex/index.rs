use std::sync::Arc;

use miette::{Context as _, IntoDiagnostic};
use tokio_util::sync::CancellationToken;

use ethdex::adapters::JsonRpcNode;
use ethdex::core::{
    config::{IndexerConfig, RootConfig},
    indexer::RangeIndexer,
    BlockNumber, ChainId, Family, MetadataCache, NodeSource as _, TransformChain,
};
use ethdex::prelude::*;
use ethdex_redb3::RowStore;

use crate::feedback::{Feedback, ProgressBar};

#[derive(Debug, clap::Args)]
pub struct Args {
    /// first block, defaults to the one after the raw checkpoint
    #[arg(long)]
    from: Option<BlockNumber>,

    /// last block, defaults to the node head
    #[arg(long)]
    to: Option<BlockNumber>,

    /// only run the transforms over blocks already stored
    #[arg(long, action)]
    skip_raw: bool,

    /// only fetch raw blocks
    #[arg(long, action)]
    skip_derived: bool,
}

/// What a range pass should touch.
#[derive(Debug, Clone, Copy)]
pub struct Passes {
    pub raw: bool,
    pub derived: bool,
}

fn chunks(start: BlockNumber, end: BlockNumber, size: u64) -> Vec<(BlockNumber, BlockNumber)> {
    let size = size.max(1);
    let mut out = vec![];
    let mut next = start;

    while next <= end {
        let last = next.saturating_add(size - 1).min(end);
        out.push((next, last));

        if last == end {
            break;
        }

        next = last + 1;
    }

    out
}

/// Indexes `start..=end` chunk by chunk, raw blocks first, then the
/// transforms up to wherever the raw pass got.
#[allow(clippy::too_many_arguments)]
pub async fn index_blocks(
    indexer: &RangeIndexer<JsonRpcNode, RowStore>,
    config: &IndexerConfig,
    transforms: Arc<TransformChain>,
    chain_id: ChainId,
    (start, end): (BlockNumber, BlockNumber),
    passes: Passes,
    progress: &ProgressBar,
    cancel: &CancellationToken,
) -> Result<(), Error> {
    let mut raw_end = Some(end);

    if passes.raw {
        progress.set_message("raw blocks");

        for (first, last) in chunks(start, end, config.max_range_blocks) {
            let outcome = indexer
                .index_range(
                    chain_id,
                    first,
                    last,
                    config.concurrency,
                    config.trace_mode,
                    cancel,
                )
                .await?;

            progress.inc(outcome.blocks);

            if outcome.stopped_early() {
                raw_end = outcome.last_indexed.or(first.checked_sub(1));
                break;
            }
        }
    }

    if !passes.derived || transforms.is_empty() {
        return Ok(());
    }

    let Some(stored) = indexer.checkpoints().get(chain_id, Family::Raw)? else {
        return Ok(());
    };

    let Some(derived_end) = raw_end.map(|x| x.min(stored)) else {
        return Ok(());
    };

    if derived_end < start {
        return Ok(());
    }

    progress.set_message("transforms");

    if !passes.raw {
        progress.set_length(derived_end - start + 1);
    }

    let cache = Arc::new(MetadataCache::new(config.cache_capacity));

    for (first, last) in chunks(start, derived_end, config.max_range_blocks) {
        // markers are deduplicated per chunk only
        cache.clear();

        let outcome = indexer
            .index_derived_range(
                chain_id,
                first,
                last,
                transforms.clone(),
                config.concurrency,
                cache.clone(),
                cancel,
            )
            .await?;

        if !passes.raw {
            progress.inc(outcome.blocks);
        }
    }

    Ok(())
}

#[tokio::main]
pub async fn run(config: RootConfig, args: &Args, feedback: &Feedback) -> miette::Result<()> {
    crate::common::setup_tracing(&config.logging)?;

    let store = crate::common::open_store(&config)?;
    let node = crate::common::build_node(&config)?;
    let transforms = Arc::new(crate::common::build_transforms(&config)?);

    let chain_id = crate::common::connect(&node, &config).await?;
    let lease = crate::common::claim_lease(&store, &config)?;
    let cancel = crate::common::hook_exit_token();

    let indexer = RangeIndexer::new(node.clone(), store)
        .with_progress_every(config.indexer.progress_every);

    let start = match args.from {
        Some(x) => x,
        None => indexer
            .checkpoints()
            .get(chain_id, Family::Raw)
            .map_err(Error::from)?
            .map_or(config.indexer.start_block, |x| x + 1)
            .max(config.indexer.start_block),
    };

    let end = match args.to {
        Some(x) => x,
        None => node
            .chain_head()
            .await
            .into_diagnostic()
            .context("querying node head")?,
    };

    if start > end {
        println!("nothing to index, {start} is past {end}");
        crate::common::release_lease(lease)?;
        return Ok(());
    }

    let progress = feedback.block_progress_bar(end - start + 1);

    let passes = Passes {
        raw: !args.skip_raw,
        derived: !args.skip_derived,
    };

    let result = index_blocks(
        &indexer,
        &config.indexer,
        transforms,
        chain_id,
        (start, end),
        passes,
        &progress,
        &cancel,
    )
    .await;

    progress.finish_and_clear();
    crate::common::release_lease(lease)?;

    result.context("indexing range")?;

    let checkpoints = indexer.checkpoints();

    println!(
        "indexed blocks {start}..={end}, raw checkpoint {:?}, derived checkpoint {:?}",
        checkpoints.get(chain_id, Family::Raw).map_err(Error::from)?,
        checkpoints.get(chain_id, Family::Derived).map_err(Error::from)?,
    );

    Ok(())
}
