use std::{collections::HashMap, ops::Range, path::Path, sync::Arc};

use ethdex_core::{
    store::tables, Mutation, MutationBatch, MutationStore, RowKey, RowValue, StoreError,
    TableName,
};
use redb::{
    Database, Durability, ReadTransaction, ReadableDatabase, ReadableTable as _, TableDefinition,
    WriteTransaction,
};
use tracing::{debug, warn};


#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    DatabaseError(#[from] ::redb::DatabaseError),

    #[error(transparent)]
    TransactionError(#[from] ::redb::TransactionError),

    #[error(transparent)]
    CommitError(#[from] ::redb::CommitError),

    #[error(transparent)]
    TableError(#[from] ::redb::TableError),

    #[error(transparent)]
    StorageError(#[from] ::redb::StorageError),

    #[error(transparent)]
    SetDurabilityError(#[from] ::redb::SetDurabilityError),

    #[error(transparent)]
    StoreError(#[from] StoreError),
}

impl From<Error> for StoreError {
    fn from(error: Error) -> Self {
        match error {
            Error::StoreError(e) => e,
            e => StoreError::InternalStoreError(e.to_string()),
        }
    }
}

pub type RowTable = TableDefinition<'static, &'static [u8], &'static [u8]>;

pub const COUNTERS_TABLE: TableDefinition<'static, &'static str, u64> =
    TableDefinition::new("counters");

fn build_tables() -> HashMap<TableName, RowTable> {
    tables::ALL
        .iter()
        .map(|name| (*name, TableDefinition::new(*name)))
        .collect()
}

pub struct RowIter {
    _rx: ReadTransaction,
    range: ::redb::Range<'static, &'static [u8], &'static [u8]>,
}

impl Iterator for RowIter {
    type Item = Result<(RowKey, RowValue), StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        let next = self.range.next()?;

        let entry = next
            .map(|(k, v)| (k.value().to_vec(), v.value().to_vec()))
            .map_err(Error::from)
            .map_err(StoreError::from);

        Some(entry)
    }
}

impl DoubleEndedIterator for RowIter {
    fn next_back(&mut self) -> Option<Self::Item> {
        let next = self.range.next_back()?;

        let entry = next
            .map(|(k, v)| (k.value().to_vec(), v.value().to_vec()))
            .map_err(Error::from)
            .map_err(StoreError::from);

        Some(entry)
    }
}

const DEFAULT_CACHE_SIZE_MB: usize = 500;

#[derive(Clone)]
pub struct RowStore {
    db: Arc<Database>,
    tables: HashMap<TableName, RowTable>,
}

impl RowStore {
    pub fn open(path: impl AsRef<Path>, cache_size: Option<usize>) -> Result<Self, Error> {
        let db = ::redb::Database::builder()
            .set_repair_callback(|x| {
                warn!(progress = x.progress() * 100f64, "row db is repairing")
            })
            .set_cache_size(1024 * 1024 * cache_size.unwrap_or(DEFAULT_CACHE_SIZE_MB))
            .create(path)?;

        let store = Self {
            db: db.into(),
            tables: build_tables(),
        };

        store.initialize_schema()?;

        Ok(store)
    }

    pub fn in_memory() -> Result<Self, Error> {
        let db = ::redb::Database::builder()
            .create_with_backend(::redb::backends::InMemoryBackend::new())?;

        let store = Self {
            db: db.into(),
            tables: build_tables(),
        };

        store.initialize_schema()?;

        Ok(store)
    }

    pub(crate) fn db(&self) -> &Database {
        &self.db
    }

    pub fn initialize_schema(&self) -> Result<(), Error> {
        let mut wx = self.db().begin_write()?;
        wx.set_durability(Durability::Immediate)?;

        let _ = wx.open_table(COUNTERS_TABLE)?;

        for def in self.tables.values() {
            let _ = wx.open_table(*def)?;
        }

        wx.commit()?;

        Ok(())
    }

    fn table(&self, name: TableName) -> Result<RowTable, Error> {
        let def = self
            .tables
            .get(name)
            .ok_or(StoreError::TableNotFound(name))?;

        Ok(*def)
    }

    fn apply(&self, wx: &WriteTransaction, batch: &MutationBatch) -> Result<(), Error> {
        let def = self.table(batch.table)?;
        let mut table = wx.open_table(def)?;

        for mutation in batch.mutations.iter() {
            match mutation {
                Mutation::Put(key, value) => {
                    table.insert(key.as_slice(), value.as_slice())?;
                }
                Mutation::Delete(key) => {
                    table.remove(key.as_slice())?;
                }
                Mutation::DeleteRange(range) => {
                    if range.start < range.end {
                        table.retain_in(range.start.as_slice()..range.end.as_slice(), |_, _| {
                            false
                        })?;
                    }
                }
            }
        }

        Ok(())
    }

    fn remove_range(
        wx: &WriteTransaction,
        def: RowTable,
        range: &Range<RowKey>,
    ) -> Result<u64, Error> {
        let mut table = wx.open_table(def)?;
        let mut removed = 0;

        let extracted =
            table.extract_from_if(range.start.as_slice()..range.end.as_slice(), |_, _| true)?;

        for entry in extracted {
            entry?;
            removed += 1;
        }

        Ok(removed)
    }

    fn read_counter_internal(rx: &ReadTransaction, name: &str) -> Result<Option<u64>, Error> {
        let table = rx.open_table(COUNTERS_TABLE)?;
        let value = table.get(name)?.map(|x| x.value());

        Ok(value)
    }
}

impl MutationStore for RowStore {
    type RowIter = RowIter;

    fn read_row(&self, table: TableName, key: &[u8]) -> Result<Option<RowValue>, StoreError> {
        let def = self.table(table)?;
        let rx = self.db().begin_read().map_err(Error::from)?;
        let table = rx.open_table(def).map_err(Error::from)?;

        let value = table
            .get(key)
            .map_err(Error::from)?
            .map(|v| v.value().to_vec());

        Ok(value)
    }

    fn iter_rows(&self, table: TableName, range: Range<RowKey>) -> Result<RowIter, StoreError> {
        let def = self.table(table)?;
        let rx = self.db().begin_read().map_err(Error::from)?;
        let table = rx.open_table(def).map_err(Error::from)?;

        // an inverted range reads as empty
        let end = range.end.max(range.start.clone());

        let range = table
            .range(range.start.as_slice()..end.as_slice())
            .map_err(Error::from)?;

        Ok(RowIter { _rx: rx, range })
    }

    fn last_row(
        &self,
        table: TableName,
        range: Range<RowKey>,
    ) -> Result<Option<(RowKey, RowValue)>, StoreError> {
        if range.start >= range.end {
            return Ok(None);
        }

        self.iter_rows(table, range)?.next_back().transpose()
    }

    fn commit_batches(&self, batches: &[MutationBatch]) -> Result<(), StoreError> {
        let mut wx = self.db().begin_write().map_err(Error::from)?;

        wx.set_durability(Durability::Eventual)
            .map_err(Error::from)?;
        wx.set_quick_repair(true);

        for batch in batches {
            self.apply(&wx, batch)?;
        }

        wx.commit().map_err(Error::from)?;

        Ok(())
    }

    fn delete_range(&self, table: TableName, range: Range<RowKey>) -> Result<u64, StoreError> {
        if range.start >= range.end {
            return Ok(0);
        }

        let def = self.table(table)?;
        let mut wx = self.db().begin_write().map_err(Error::from)?;
        wx.set_durability(Durability::Immediate)
            .map_err(Error::from)?;

        let removed = Self::remove_range(&wx, def, &range)?;

        wx.commit().map_err(Error::from)?;

        debug!(table, removed, "range deleted");

        Ok(removed)
    }

    fn read_counter(&self, name: &str) -> Result<Option<u64>, StoreError> {
        let rx = self.db().begin_read().map_err(Error::from)?;
        let value = Self::read_counter_internal(&rx, name)?;

        Ok(value)
    }

    fn write_counter(&self, name: &str, value: Option<u64>) -> Result<(), StoreError> {
        let mut wx = self.db().begin_write().map_err(Error::from)?;
        wx.set_durability(Durability::Immediate)
            .map_err(Error::from)?;

        {
            let mut table = wx.open_table(COUNTERS_TABLE).map_err(Error::from)?;

            match value {
                Some(value) => table.insert(name, value).map_err(Error::from)?,
                None => table.remove(name).map_err(Error::from)?,
            };
        }

        wx.commit().map_err(Error::from)?;

        Ok(())
    }

    fn raise_counter(&self, name: &str, value: u64) -> Result<bool, StoreError> {
        let mut wx = self.db().begin_write().map_err(Error::from)?;
        wx.set_durability(Durability::Immediate)
            .map_err(Error::from)?;

        let changed = {
            let mut table = wx.open_table(COUNTERS_TABLE).map_err(Error::from)?;
            let current = table.get(name).map_err(Error::from)?.map(|x| x.value());

            match current {
                Some(current) if current >= value => false,
                _ => {
                    table.insert(name, value).map_err(Error::from)?;
                    true
                }
            }
        };

        wx.commit().map_err(Error::from)?;

        Ok(changed)
    }
}
