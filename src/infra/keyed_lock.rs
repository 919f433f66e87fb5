//! Per-key reader/writer locks
//!
//! The artifact cache and the fingerprint cache are shared between build
//! workers. Each cache key gets its own lock so unrelated keys never
//! contend; a single writer excludes readers of the same key only.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

/// A lazily-populated map of async `RwLock`s
#[derive(Debug)]
pub struct KeyedLocks<K> {
    locks: Mutex<HashMap<K, Arc<RwLock<()>>>>,
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn entry(&self, key: &K) -> Arc<RwLock<()>> {
        // A poisoned map only means another thread panicked while inserting;
        // the map itself is still consistent.
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        // Entries only the map still references belong to released keys.
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        Arc::clone(locks.entry(key.clone()).or_default())
    }

    /// Acquire exclusive access to `key`
    pub async fn write(&self, key: &K) -> OwnedRwLockWriteGuard<()> {
        self.entry(key).write_owned().await
    }

    /// Acquire shared access to `key`
    pub async fn read(&self, key: &K) -> OwnedRwLockReadGuard<()> {
        self.entry(key).read_owned().await
    }

    /// Number of keys still tracked
    pub fn len(&self) -> usize {
        self.locks
            .lock()
            .map_or_else(|poisoned| poisoned.into_inner().len(), |locks| locks.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K: Eq + Hash + Clone> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self::new()
    }
}
