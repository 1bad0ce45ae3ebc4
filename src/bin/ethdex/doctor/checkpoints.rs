use ethdex::core::{
    config::RootConfig, lease::LeaseManager, CheckpointTracker, ChainId, Family,
};
use ethdex::prelude::*;

#[derive(Debug, clap::Args)]
pub struct Args {
    #[arg(long)]
    chain_id: Option<ChainId>,
}

#[tokio::main]
pub async fn run(config: &RootConfig, args: &Args) -> miette::Result<()> {
    let store = crate::common::open_store(config)?;
    let node = crate::common::build_node(config)?;
    let chain_id = super::chain_id(&node, config, args.chain_id).await?;

    let checkpoints = CheckpointTracker::new(store.clone());

    for family in Family::ALL {
        match checkpoints.get(chain_id, family).map_err(Error::from)? {
            Some(x) => println!("{family}: {x}"),
            None => println!("{family}: none"),
        }
    }

    if let Some(cfg) = &config.lease {
        let lease = LeaseManager::new(store, &cfg.name, &cfg.holder, cfg.ttl_secs);

        match lease.current().map_err(Error::from)? {
            Some(x) => println!(
                "lease {}: held by {} until {}",
                cfg.name,
                x.holder,
                x.expires_at()
            ),
            None => println!("lease {}: free", cfg.name),
        }
    }

    Ok(())
}
