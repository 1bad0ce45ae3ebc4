use std::{path::Path, time::Duration};

use chrono::Utc;
use miette::{Context as _, IntoDiagnostic};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use ethdex::core::{
    config::{RootConfig, StatusConfig},
    follow::IndexerService,
    status::{Status, StatusSnapshot},
};
use ethdex::prelude::*;

#[derive(Debug, clap::Args)]
pub struct Args {}

fn write_status(path: &Path, snapshot: &StatusSnapshot) -> Result<(), Error> {
    let body = json!({
        "updated_at": Utc::now().to_rfc3339(),
        "status": snapshot,
    });

    let text = serde_json::to_vec_pretty(&body).map_err(|e| Error::message(e.to_string()))?;

    // readers never see a half-written file
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, text)?;
    std::fs::rename(&tmp, path)?;

    Ok(())
}

async fn heartbeat(status: Status, config: StatusConfig, exit: CancellationToken) {
    let mut interval = tokio::time::interval(Duration::from_secs(config.interval_secs.max(1)));

    loop {
        tokio::select! {
            _ = exit.cancelled() => break,
            _ = interval.tick() => (),
        }

        let snapshot = status.snapshot();

        info!(
            chain_id = ?snapshot.chain_id,
            head = ?snapshot.node_head,
            raw = ?snapshot.raw_checkpoint,
            derived = ?snapshot.derived_checkpoint,
            lag = ?snapshot.lag,
            lease = snapshot.holds_lease,
            failures = snapshot.consecutive_failures,
            reorgs = snapshot.reorgs,
            "status"
        );

        if let Some(path) = &config.path {
            if let Err(err) = write_status(path, &snapshot) {
                warn!(%err, path = %path.display(), "can't write status file");
            }
        }
    }
}

#[tokio::main]
pub async fn run(config: RootConfig, _args: &Args) -> miette::Result<()> {
    crate::common::setup_tracing(&config.logging)?;

    let store = crate::common::open_store(&config)?;
    let node = crate::common::build_node(&config)?;
    let transforms = crate::common::build_transforms(&config)?;

    info!(transforms = ?transforms.names(), "starting indexer");

    let service = IndexerService::new(node, store, &config, transforms);
    let exit = crate::common::hook_exit_token();

    let heartbeat = config
        .status
        .clone()
        .map(|cfg| tokio::spawn(heartbeat(service.status(), cfg, exit.clone())));

    let result = service.run(exit.clone()).await;

    exit.cancel();

    if let Some(handle) = heartbeat {
        handle.await.into_diagnostic()?;
    }

    result.map_err(Error::from).context("running indexer")?;

    Ok(())
}
