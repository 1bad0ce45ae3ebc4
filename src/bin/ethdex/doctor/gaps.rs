use std::sync::Arc;

use itertools::Itertools as _;
use miette::Context as _;

use ethdex::core::{
    config::RootConfig, gaps::GapDetector, indexer::RangeIndexer, store::tables, BlockNumber,
    ChainId,
};
use ethdex::prelude::*;

use crate::feedback::Feedback;
use crate::index::{index_blocks, Passes};

#[derive(Debug, clap::Args)]
pub struct Args {
    /// how many numbers below the stored tip to scan, defaults to the
    /// configured gap lookback
    #[arg(long)]
    lookback: Option<u64>,

    /// re-index every missing or unfilled range found
    #[arg(long, action)]
    repair: bool,

    #[arg(long)]
    chain_id: Option<ChainId>,
}

fn list(numbers: &[BlockNumber]) -> String {
    numbers.iter().join(", ")
}

#[tokio::main]
pub async fn run(config: &RootConfig, args: &Args, feedback: &Feedback) -> miette::Result<()> {
    crate::common::setup_tracing(&config.logging)?;

    let store = crate::common::open_store(config)?;
    let node = crate::common::build_node(config)?;
    let chain_id = super::chain_id(&node, config, args.chain_id).await?;

    let lookback = args.lookback.unwrap_or(config.indexer.gap_lookback);

    let report = GapDetector::new(store.clone())
        .find_gaps(chain_id, tables::BLOCKS, lookback)
        .map_err(Error::from)
        .context("scanning for gaps")?;

    if report.is_clean() {
        println!("no gaps in the last {lookback} blocks of chain {chain_id}");
        return Ok(());
    }

    let ranges = report.missing_ranges();

    println!(
        "unindexed: {}",
        ranges
            .iter()
            .map(|r| format!("{}..={} ({} blocks)", r.start, r.end, r.block_count()))
            .join(", ")
    );

    if !report.placeholders.is_empty() {
        println!("placeholders: {}", list(&report.placeholders));
    }

    if !report.duplicates.is_empty() {
        println!("duplicates: {}", list(&report.duplicates));
    }

    if !args.repair || ranges.is_empty() {
        return Ok(());
    }

    let lease = crate::common::claim_lease(&store, config)?;
    let cancel = crate::common::hook_exit_token();
    let transforms = Arc::new(crate::common::build_transforms(config)?);

    let indexer = RangeIndexer::new(node, store);
    let total = ranges.iter().map(|r| r.block_count()).sum();
    let progress = feedback.block_progress_bar(total);

    let passes = Passes {
        raw: true,
        derived: true,
    };

    let mut result = Ok(());

    for range in ranges {
        result = index_blocks(
            &indexer,
            &config.indexer,
            transforms.clone(),
            chain_id,
            (range.start, range.end),
            passes,
            &progress,
            &cancel,
        )
        .await;

        if result.is_err() {
            break;
        }
    }

    progress.finish_and_clear();
    crate::common::release_lease(lease)?;

    result.context("repairing gaps")?;

    println!("gaps repaired");

    Ok(())
}
