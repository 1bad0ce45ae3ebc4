//! Best-effort single-writer lease.
//!
//! A lease row names its holder and the last time that holder checked in.
//! Another process may take it over once the heartbeat is older than the
//! TTL. Nothing here is linearizable: two processes racing on a stale lease
//! can both believe they won for one iteration.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{store::tables, BlockHash, BlockRef, MutationBatch, MutationStore, StoreError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub holder: String,
    pub heartbeat_at: DateTime<Utc>,
    pub ttl_secs: u64,
}

impl Lease {
    pub fn expires_at(&self) -> DateTime<Utc> {
        i64::try_from(self.ttl_secs)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .and_then(|ttl| self.heartbeat_at.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseState {
    Acquired,
    Renewed,
    HeldBy(String),
}

impl LeaseState {
    pub fn is_held(&self) -> bool {
        !matches!(self, LeaseState::HeldBy(_))
    }
}

#[derive(Clone)]
pub struct LeaseManager<S> {
    store: S,
    name: String,
    holder: String,
    ttl_secs: u64,
}

impl<S: MutationStore> LeaseManager<S> {
    pub fn new(store: S, name: impl Into<String>, holder: impl Into<String>, ttl_secs: u64) -> Self {
        Self {
            store,
            name: name.into(),
            holder: holder.into(),
            ttl_secs,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }

    pub fn current(&self) -> Result<Option<Lease>, StoreError> {
        let Some(raw) = self.store.read_row(tables::LEASES, self.name.as_bytes())? else {
            return Ok(None);
        };

        Ok(Some(bincode::deserialize(&raw)?))
    }

    fn batch(&self) -> MutationBatch {
        let source = BlockRef {
            chain_id: 0,
            number: 0,
            hash: BlockHash::default(),
        };

        MutationBatch::new(tables::LEASES, source)
    }

    fn write(&self, now: DateTime<Utc>) -> Result<(), StoreError> {
        let lease = Lease {
            holder: self.holder.clone(),
            heartbeat_at: now,
            ttl_secs: self.ttl_secs,
        };

        let mut batch = self.batch();
        batch.put(self.name.as_bytes().to_vec(), bincode::serialize(&lease)?);

        self.store.commit_batch(&batch)
    }

    /// Claims the lease, renews it when already ours, or reports the live
    /// holder.
    pub fn try_acquire(&self, now: DateTime<Utc>) -> Result<LeaseState, StoreError> {
        let state = match self.current()? {
            Some(lease) if lease.holder == self.holder => LeaseState::Renewed,
            Some(lease) if !lease.is_stale(now) => return Ok(LeaseState::HeldBy(lease.holder)),
            Some(lease) => {
                warn!(
                    lease = %self.name,
                    previous = %lease.holder,
                    heartbeat_at = %lease.heartbeat_at,
                    "taking over stale lease"
                );
                LeaseState::Acquired
            }
            None => LeaseState::Acquired,
        };

        self.write(now)?;

        if state == LeaseState::Acquired {
            info!(lease = %self.name, holder = %self.holder, "lease acquired");
        }

        Ok(state)
    }

    /// Drops the lease if we still hold it.
    pub fn release(&self) -> Result<bool, StoreError> {
        match self.current()? {
            Some(lease) if lease.holder == self.holder => {
                let mut batch = self.batch();
                batch.delete(self.name.as_bytes().to_vec());
                self.store.commit_batch(&batch)?;

                info!(lease = %self.name, holder = %self.holder, "lease released");
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
