//! Load-once-per-key cache for shared provider resources.
//!
//! Concurrent callers asking for the same key collapse onto one execution of
//! the loader and all observe its result. Failed loads are handed to every
//! waiter and then evicted, so the next caller starts a fresh load instead of
//! inheriting a stale error.

use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::OnceCell;
use tracing::debug;

type Slot<V, E> = Arc<OnceCell<Result<V, E>>>;

/// Concurrency-safe memoizing map keyed by `K`.
#[derive(Debug)]
pub struct SharedResourceCache<K, V, E> {
    name: &'static str,
    entries: Mutex<HashMap<K, Slot<V, E>>>,
}

impl<K, V, E> SharedResourceCache<K, V, E>
where
    K: Clone + Display + Eq + Hash,
    V: Clone,
    E: Clone,
{
    /// Creates an empty cache; `name` labels log lines.
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the cached value for `key`, running `loader` if no caller has
    /// loaded it yet.
    ///
    /// While a load is in flight, further callers wait for it instead of
    /// starting their own. If the loading caller is dropped mid-load, the next
    /// waiter runs its own loader.
    ///
    /// # Errors
    ///
    /// Returns the loader's error. Every caller waiting on the same load
    /// receives a clone of it.
    pub async fn get_or_create<F, Fut>(&self, key: &K, loader: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let slot = self.slot_for(key);
        let result = slot
            .get_or_init(|| async {
                debug!(cache = self.name, key = %key, "loading shared resource");
                loader().await
            })
            .await
            .clone();

        if result.is_err() {
            self.evict_if_same(key, &slot);
        }
        result
    }

    /// Returns the value for `key` when a successful load has completed.
    #[must_use]
    pub fn get_if_present(&self, key: &K) -> Option<V> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(key)
            .and_then(|slot| slot.get())
            .and_then(|result| result.as_ref().ok())
            .cloned()
    }

    /// Registers a value obtained elsewhere, replacing any cached entry.
    pub fn put(&self, key: K, value: V) {
        let slot = Arc::new(OnceCell::new_with(Some(Ok(value))));
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key, slot);
    }

    /// Forgets `key`, returning `true` when an entry existed.
    pub fn invalidate(&self, key: &K) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key).is_some()
    }

    /// Returns keys with a successfully loaded value.
    #[must_use]
    pub fn loaded_keys(&self) -> Vec<K> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries
            .iter()
            .filter(|(_, slot)| matches!(slot.get(), Some(Ok(_))))
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Number of entries, including loads still in flight.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns `true` when the cache holds nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slot_for(&self, key: &K) -> Slot<V, E> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            entries
                .entry(key.clone())
                .or_insert_with(|| Arc::new(OnceCell::new())),
        )
    }

    fn evict_if_same(&self, key: &K, slot: &Slot<V, E>) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
        {
            entries.remove(key);
            debug!(cache = self.name, key = %key, "evicted failed load");
        }
    }
}

#[cfg(test)]
mod tests;
