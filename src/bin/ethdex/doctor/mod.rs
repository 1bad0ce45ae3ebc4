use clap::{Parser, Subcommand};

use ethdex::adapters::JsonRpcNode;
use ethdex::core::{config::RootConfig, ChainId};
use ethdex::prelude::*;

use crate::feedback::Feedback;

mod checkpoints;
mod gaps;
mod reorg;
mod rollback;

#[derive(Debug, Subcommand)]
pub enum Command {
    /// scans the stored tip for missing, duplicated or unfilled blocks
    Gaps(gaps::Args),

    /// compares recent stored hashes against the node and repairs forks
    Reorg(reorg::Args),

    /// drops every row above a block and rewinds the checkpoints
    Rollback(rollback::Args),

    /// prints checkpoints and the lease holder
    Checkpoints(checkpoints::Args),
}

#[derive(Debug, Parser)]
pub struct Args {
    #[command(subcommand)]
    command: Command,
}

/// Chain to operate on: the explicit one, the configured one, or whatever
/// the node reports.
async fn chain_id(
    node: &JsonRpcNode,
    config: &RootConfig,
    explicit: Option<ChainId>,
) -> Result<ChainId, Error> {
    match explicit.or(config.upstream.chain_id) {
        Some(x) => Ok(x),
        None => crate::common::connect(node, config).await,
    }
}

pub fn run(config: RootConfig, args: &Args, feedback: &Feedback) -> miette::Result<()> {
    match &args.command {
        Command::Gaps(x) => gaps::run(&config, x, feedback)?,
        Command::Reorg(x) => reorg::run(&config, x)?,
        Command::Rollback(x) => rollback::run(&config, x)?,
        Command::Checkpoints(x) => checkpoints::run(&config, x)?,
    }

    Ok(())
}
