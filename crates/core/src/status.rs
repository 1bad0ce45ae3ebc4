use std::sync::Arc;
use std::time::SystemTime;

use arc_swap::ArcSwap;
use serde::Serialize;

use crate::{BlockNumber, ChainId};

#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusSnapshot {
    pub chain_id: Option<ChainId>,
    pub node_head: Option<BlockNumber>,
    pub raw_checkpoint: Option<BlockNumber>,
    pub derived_checkpoint: Option<BlockNumber>,
    pub lag: Option<u64>,
    pub holds_lease: bool,
    pub last_success: Option<SystemTime>,
    pub last_error: Option<String>,
    pub consecutive_failures: u64,
    pub reorgs: u64,
}

/// Lock-free view of the control loop, shared with the heartbeat reporter.
#[derive(Debug, Clone)]
pub struct Status {
    inner: Arc<ArcSwap<StatusSnapshot>>,
}

impl Default for Status {
    fn default() -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(StatusSnapshot::default())),
        }
    }
}

impl Status {
    pub fn snapshot(&self) -> StatusSnapshot {
        (**self.inner.load()).clone()
    }

    fn update(&self, f: impl Fn(&mut StatusSnapshot)) {
        self.inner.rcu(|state| {
            let mut next = (**state).clone();
            f(&mut next);
            Arc::new(next)
        });
    }

    pub fn set_chain(&self, chain_id: ChainId) {
        self.update(|s| s.chain_id = Some(chain_id));
    }

    pub fn set_lease(&self, holds: bool) {
        self.update(|s| s.holds_lease = holds);
    }

    pub fn set_progress(
        &self,
        node_head: BlockNumber,
        raw: Option<BlockNumber>,
        derived: Option<BlockNumber>,
    ) {
        self.update(|s| {
            s.node_head = Some(node_head);
            s.raw_checkpoint = raw;
            s.derived_checkpoint = derived;
            s.lag = Some(node_head.saturating_sub(raw.unwrap_or_default()));
        });
    }

    pub fn record_success(&self, at: SystemTime) {
        self.update(|s| {
            s.last_success = Some(at);
            s.consecutive_failures = 0;
        });
    }

    pub fn record_failure(&self, error: &str) {
        self.update(|s| {
            s.last_error = Some(error.to_string());
            s.consecutive_failures += 1;
        });
    }

    pub fn record_reorg(&self) {
        self.update(|s| s.reorgs += 1);
    }

    pub fn synced(&self) -> bool {
        matches!(self.inner.load().lag, Some(0))
    }
}
