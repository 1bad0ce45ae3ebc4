use chrono::Utc;
use miette::{Context as _, IntoDiagnostic};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use tracing_subscriber::{filter::Targets, prelude::*};

use ethdex::adapters::{self, JsonRpcNode};
use ethdex::core::{
    config::{LoggingConfig, RootConfig},
    lease::{LeaseManager, LeaseState},
    ChainId, NodeSource as _, TransformChain,
};
use ethdex::prelude::*;
use ethdex_redb3::RowStore;

pub fn setup_tracing(config: &LoggingConfig) -> miette::Result<()> {
    let level = config.max_level;

    let mut filter = Targets::new()
        .with_target("ethdex", level)
        .with_target("ethdex_core", level)
        .with_target("ethdex_redb3", level);

    if config.include_rpc {
        filter = filter
            .with_target("reqwest", level)
            .with_target("hyper", level);
    }

    if config.include_redb {
        filter = filter.with_target("redb", level);
    }

    tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(level)
        .finish()
        .with(filter)
        .init();

    Ok(())
}

pub fn open_store(config: &RootConfig) -> miette::Result<RowStore> {
    adapters::open_store(&config.storage).context("opening row store")
}

pub fn build_node(config: &RootConfig) -> miette::Result<JsonRpcNode> {
    JsonRpcNode::new(&config.upstream).context("building rpc client")
}

pub fn build_transforms(config: &RootConfig) -> miette::Result<TransformChain> {
    TransformChain::from_config(&config.transforms)
        .into_diagnostic()
        .context("building transforms")
}

/// Asks the node for its chain id and checks it against the configured one.
pub async fn connect(node: &JsonRpcNode, config: &RootConfig) -> Result<ChainId, Error> {
    let found = node.chain_id().await?;

    match config.upstream.chain_id {
        Some(expected) if expected != found => {
            Err(IndexError::ChainMismatch { expected, found }.into())
        }
        _ => Ok(found),
    }
}

/// Claims the configured lease for a one-shot command so it never writes
/// next to a running daemon.
pub fn claim_lease(
    store: &RowStore,
    config: &RootConfig,
) -> Result<Option<LeaseManager<RowStore>>, Error> {
    let Some(cfg) = &config.lease else {
        return Ok(None);
    };

    let lease = LeaseManager::new(store.clone(), &cfg.name, &cfg.holder, cfg.ttl_secs);

    match lease.try_acquire(Utc::now())? {
        LeaseState::HeldBy(holder) => Err(IndexError::LeaseHeld {
            name: cfg.name.clone(),
            holder,
        }
        .into()),
        _ => Ok(Some(lease)),
    }
}

pub fn release_lease(lease: Option<LeaseManager<RowStore>>) -> Result<(), Error> {
    if let Some(lease) = lease {
        lease.release()?;
    }

    Ok(())
}

pub fn hook_exit_token() -> CancellationToken {
    let cancel = CancellationToken::new();

    let cancel2 = cancel.clone();
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(%err, "can't listen for exit signal");
            return;
        }

        warn!("exit signal detected");
        debug!("notifying exit");
        cancel2.cancel();
    });

    cancel
}
