//! Store selection from configuration.
//!
//! Both backends are redb: a file under the storage root, or an in-memory
//! database that vanishes with the process.

use std::path::Path;

use ethdex_core::config::{StorageConfig, StoreConfig};
use ethdex_redb3::RowStore;
use tracing::{info, warn};

use crate::prelude::Error;

fn ensure_store_path(path: &Path) -> Result<(), Error> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    Ok(())
}

pub fn open_store(config: &StorageConfig) -> Result<RowStore, Error> {
    match &config.rows {
        StoreConfig::Redb(cfg) => {
            let path = config
                .rows_path()
                .ok_or_else(|| Error::config("redb store needs a path"))?;

            ensure_store_path(&path)?;
            info!(path = %path.display(), "opening row store");

            Ok(RowStore::open(&path, cfg.cache)?)
        }
        StoreConfig::InMemory => {
            warn!("using in-memory row store, data will be lost on exit");
            Ok(RowStore::in_memory()?)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use ethdex_core::{config::RedbStorageConfig, store::tables, MutationStore as _};

    use super::*;

    #[test]
    fn creates_missing_directories() {
        let root = tempfile::tempdir().unwrap();

        let config = StorageConfig {
            path: root.path().join("nested"),
            rows: StoreConfig::Redb(RedbStorageConfig {
                path: Some(PathBuf::from("deeper/rows.redb")),
                cache: Some(16),
            }),
        };

        let store = open_store(&config).unwrap();
        assert!(store.read_row(tables::BLOCKS, b"missing").unwrap().is_none());
        assert!(root.path().join("nested/deeper/rows.redb").is_file());
    }

    #[test]
    fn in_memory_needs_no_path() {
        let config = StorageConfig {
            path: PathBuf::from("/nonexistent"),
            rows: StoreConfig::InMemory,
        };

        assert!(open_store(&config).is_ok());
    }
}
