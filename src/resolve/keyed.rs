//! Per-key async locks and a memo map built on them.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Exclusive hold on one keyed resource. Released on drop.
#[must_use = "the lock is released as soon as the guard is dropped"]
#[derive(Debug)]
pub struct ResourceGuard {
    _guard: OwnedMutexGuard<()>,
}

/// Lazily created lock per key. Entries live as long as the map.
#[derive(Debug)]
pub(crate) struct KeyedLocks<K> {
    locks: Mutex<HashMap<K, Arc<AsyncMutex<()>>>>,
}

impl<K> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    fn handle(&self, key: &K) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock();
        if let Some(lock) = locks.get(key) {
            return Arc::clone(lock);
        }
        let lock = Arc::new(AsyncMutex::new(()));
        locks.insert(key.clone(), Arc::clone(&lock));
        lock
    }

    pub(crate) async fn lock(&self, key: &K) -> ResourceGuard {
        let lock = self.handle(key);
        ResourceGuard {
            _guard: lock.lock_owned().await,
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.locks.lock().len()
    }
}

/// Memoized values with a lock per key for the slow path.
#[derive(Debug)]
pub(crate) struct Memo<K, V> {
    values: RwLock<HashMap<K, V>>,
    locks: KeyedLocks<K>,
}

impl<K, V> Default for Memo<K, V> {
    fn default() -> Self {
        Self {
            values: RwLock::new(HashMap::new()),
            locks: KeyedLocks::default(),
        }
    }
}

impl<K: Eq + Hash + Clone, V: Clone> Memo<K, V> {
    pub(crate) fn get(&self, key: &K) -> Option<V> {
        self.values.read().get(key).cloned()
    }

    pub(crate) fn insert(&self, key: K, value: V) {
        self.values.write().insert(key, value);
    }

    pub(crate) async fn lock(&self, key: &K) -> ResourceGuard {
        self.locks.lock(key).await
    }

    pub(crate) fn len(&self) -> usize {
        self.values.read().len()
    }

    /// Return the cached value or run `create` once under the key's lock.
    /// A failed `create` leaves the key uncached.
    pub(crate) async fn get_or_try_insert<F, Fut, E>(&self, key: K, create: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.get(&key) {
            return Ok(value);
        }

        let _guard = self.lock(&key).await;

        // Another caller may have filled it while we waited.
        if let Some(value) = self.get(&key) {
            return Ok(value);
        }

        let value = create().await?;
        self.insert(key, value.clone());
        Ok(value)
    }
}
