use miette::Context as _;

use ethdex::core::{config::RootConfig, reorg::ReorgResolver, BlockNumber, ChainId};
use ethdex::prelude::*;

#[derive(Debug, clap::Args)]
pub struct Args {
    /// last block to keep
    #[arg(long)]
    to: BlockNumber,

    #[arg(long)]
    chain_id: Option<ChainId>,
}

#[tokio::main]
pub async fn run(config: &RootConfig, args: &Args) -> miette::Result<()> {
    crate::common::setup_tracing(&config.logging)?;

    let store = crate::common::open_store(config)?;
    let node = crate::common::build_node(config)?;
    let chain_id = super::chain_id(&node, config, args.chain_id).await?;

    let lease = crate::common::claim_lease(&store, config)?;

    let removed = ReorgResolver::new(node, store)
        .roll_back(chain_id, args.to.saturating_add(1))
        .map_err(Error::from);

    crate::common::release_lease(lease)?;

    let removed = removed.context("rolling back")?;

    println!("rolled back chain {chain_id} to block {}, {removed} rows removed", args.to);

    Ok(())
}
