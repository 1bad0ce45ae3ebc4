use std::fmt;

use tracing::{debug, info};

use crate::{BlockNumber, ChainId, MutationStore, StoreError};

/// A group of tables that share one "last indexed" marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    Raw,
    Derived,
}

impl Family {
    pub const ALL: [Family; 2] = [Family::Raw, Family::Derived];

    pub fn as_str(&self) -> &'static str {
        match self {
            Family::Raw => "raw",
            Family::Derived => "derived",
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn counter_name(chain_id: ChainId, family: Family) -> String {
    format!("checkpoint/{chain_id}/{family}")
}

/// Durable "last indexed block" markers.
///
/// `None` means nothing has been indexed for that family yet.
#[derive(Clone)]
pub struct CheckpointTracker<S> {
    store: S,
}

impl<S: MutationStore> CheckpointTracker<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn get(&self, chain_id: ChainId, family: Family) -> Result<Option<BlockNumber>, StoreError> {
        self.store.read_counter(&counter_name(chain_id, family))
    }

    /// Moves the checkpoint forward. A value at or below the current one is a
    /// no-op.
    pub fn advance(
        &self,
        chain_id: ChainId,
        family: Family,
        value: BlockNumber,
    ) -> Result<bool, StoreError> {
        let changed = self
            .store
            .raise_counter(&counter_name(chain_id, family), value)?;

        if changed {
            debug!(chain_id, %family, value, "checkpoint advanced");
        }

        Ok(changed)
    }

    /// Moves the checkpoint back to `value`. Never moves it forward.
    pub fn rewind(
        &self,
        chain_id: ChainId,
        family: Family,
        value: Option<BlockNumber>,
    ) -> Result<bool, StoreError> {
        let name = counter_name(chain_id, family);
        let current = self.store.read_counter(&name)?;

        let lower = match (current, value) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(current), Some(value)) => value < current,
        };

        if !lower {
            return Ok(false);
        }

        self.store.write_counter(&name, value)?;
        info!(chain_id, %family, ?current, ?value, "checkpoint rewound");

        Ok(true)
    }
}
