use std::ops::Range;

use ethdex_core::{
    BlockNumber, MutationBatch, MutationStore, RowKey, RowValue, StoreError, TableName,
};
use ethdex_redb3::{RowIter, RowStore};
use tracing::debug;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TestFault {
    #[default]
    None,
    /// Fails any commit carrying a batch sourced from this block.
    CommitError(BlockNumber),
    /// Fails every counter write.
    CounterError,
    /// Fails every range deletion.
    DeleteError,
}

#[derive(Clone)]
pub struct FaultyStore {
    inner: RowStore,
    fault: TestFault,
}

impl FaultyStore {
    pub fn new(inner: RowStore, fault: TestFault) -> Self {
        Self { inner, fault }
    }

    pub fn inner(&self) -> &RowStore {
        &self.inner
    }

    fn fault_err(&self, what: &str) -> StoreError {
        debug!(fault = ?self.fault, what, "injecting store fault");
        StoreError::InternalStoreError(format!("fault injection: {what}"))
    }
}

impl MutationStore for FaultyStore {
    type RowIter = RowIter;

    fn read_row(&self, table: TableName, key: &[u8]) -> Result<Option<RowValue>, StoreError> {
        self.inner.read_row(table, key)
    }

    fn iter_rows(&self, table: TableName, range: Range<RowKey>) -> Result<RowIter, StoreError> {
        self.inner.iter_rows(table, range)
    }

    fn last_row(
        &self,
        table: TableName,
        range: Range<RowKey>,
    ) -> Result<Option<(RowKey, RowValue)>, StoreError> {
        self.inner.last_row(table, range)
    }

    fn commit_batches(&self, batches: &[MutationBatch]) -> Result<(), StoreError> {
        if let TestFault::CommitError(number) = self.fault {
            if batches.iter().any(|b| b.source.number == number) {
                return Err(self.fault_err("commit"));
            }
        }

        self.inner.commit_batches(batches)
    }

    fn delete_range(&self, table: TableName, range: Range<RowKey>) -> Result<u64, StoreError> {
        if self.fault == TestFault::DeleteError {
            return Err(self.fault_err("delete range"));
        }

        self.inner.delete_range(table, range)
    }

    fn read_counter(&self, name: &str) -> Result<Option<u64>, StoreError> {
        self.inner.read_counter(name)
    }

    fn write_counter(&self, name: &str, value: Option<u64>) -> Result<(), StoreError> {
        if self.fault == TestFault::CounterError {
            return Err(self.fault_err("write counter"));
        }

        self.inner.write_counter(name, value)
    }

    fn raise_counter(&self, name: &str, value: u64) -> Result<bool, StoreError> {
        if self.fault == TestFault::CounterError {
            return Err(self.fault_err("raise counter"));
        }

        self.inner.raise_counter(name, value)
    }
}
