use std::{
    num::NonZeroUsize,
    sync::{Mutex, MutexGuard},
};

use lru::LruCache;

use crate::RowKey;

const DEFAULT_CAPACITY: usize = 100_000;

/// Bounded dedup cache shared by transforms during one run.
///
/// Owned by the control loop and cleared between runs, so a stale entry can
/// at worst suppress a marker that a later run writes again.
pub struct MetadataCache {
    inner: Mutex<LruCache<RowKey, ()>>,
}

impl MetadataCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);

        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<RowKey, ()>> {
        // a poisoned cache only loses dedup hints
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Records `key` and reports whether it had been seen already.
    pub fn check_and_insert(&self, key: &[u8]) -> bool {
        let mut inner = self.lock();

        if inner.get(key).is_some() {
            return true;
        }

        inner.put(key.to_vec(), ());
        false
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.lock().contains(key)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

impl Default for MetadataCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
