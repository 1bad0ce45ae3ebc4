use miette::Context as _;

use ethdex::core::{
    config::RootConfig,
    reorg::{ReorgOutcome, ReorgResolver},
};
use ethdex::prelude::*;

#[derive(Debug, clap::Args)]
pub struct Args {
    /// how many blocks below the tip to compare, defaults to the configured
    /// reorg depth
    #[arg(long)]
    depth: Option<u64>,
}

#[tokio::main]
pub async fn run(config: &RootConfig, args: &Args) -> miette::Result<()> {
    crate::common::setup_tracing(&config.logging)?;

    let store = crate::common::open_store(config)?;
    let node = crate::common::build_node(config)?;

    let chain_id = crate::common::connect(&node, config).await?;
    let lease = crate::common::claim_lease(&store, config)?;

    let resolver = ReorgResolver::new(node, store).with_policy(
        config.indexer.deep_reorg_policy,
        config.indexer.max_reorg_depth,
    );

    let depth = args.depth.unwrap_or(config.indexer.reorg_depth);

    let outcome = resolver
        .resolve(chain_id, depth)
        .await
        .map_err(Error::from);

    crate::common::release_lease(lease)?;

    match outcome.context("checking for reorgs")? {
        ReorgOutcome::Consistent { checked } => {
            println!("store matches the node, {checked} blocks checked")
        }
        ReorgOutcome::RolledBack { fork, removed } => {
            println!("fork at block {fork}, {removed} rows removed")
        }
    }

    Ok(())
}
