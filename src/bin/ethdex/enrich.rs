use miette::Context as _;
use tracing::info;

use ethdex::core::{config::RootConfig, enrich::MetadataBatchUpdater};
use ethdex::prelude::*;

#[derive(Debug, clap::Args)]
pub struct Args {
    /// process a single batch and exit
    #[arg(long, action)]
    once: bool,

    /// overrides the configured batch size
    #[arg(long)]
    batch_size: Option<usize>,
}

#[tokio::main]
pub async fn run(config: RootConfig, args: &Args) -> miette::Result<()> {
    crate::common::setup_tracing(&config.logging)?;

    let store = crate::common::open_store(&config)?;
    let node = crate::common::build_node(&config)?;

    let chain_id = crate::common::connect(&node, &config).await?;
    let lease = crate::common::claim_lease(&store, &config)?;
    let cancel = crate::common::hook_exit_token();

    let updater = MetadataBatchUpdater::new(node, store).with_tuning(
        config.enrich.sub_batch_size,
        config.enrich.concurrency,
        config.enrich.retries,
    );

    let batch_size = args.batch_size.unwrap_or(config.enrich.batch_size);
    let max_batches = args.once.then_some(1);

    info!(chain_id, batch_size, ?max_batches, "resolving pending balances");

    let result = updater
        .run_all(chain_id, batch_size, max_batches, &cancel)
        .await
        .map_err(Error::from);

    crate::common::release_lease(lease)?;

    let summary = result.context("enriching balances")?;

    println!(
        "{} batches, {} markers scanned, {} balances written",
        summary.batches, summary.scanned, summary.written
    );

    if !summary.done {
        println!("pending markers remain, run again to continue");
    }

    Ok(())
}
