//! Local cache of watched resources.
//!
//! The store is an eventually-consistent mirror of the source, written only
//! by the informer and read by everyone else. Snapshots are handed out as
//! `Arc<T>` and replaced wholesale on every event, never mutated in place.

use crate::error::{Error, Result};
use crate::key::ResourceKey;
use crate::model::Resource;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tracing::{debug, info};

/// Anything that can report whether its initial listing has completed.
pub trait HasSynced: Send + Sync {
    fn has_synced(&self) -> bool;
}

/// Keyed snapshot store.
#[derive(Debug)]
pub struct Store<T> {
    items: RwLock<HashMap<ResourceKey, Arc<T>>>,
    synced: AtomicBool,
}

impl<T: Resource> Store<T> {
    pub fn new() -> Self {
        Self {
            items: RwLock::new(HashMap::new()),
            synced: AtomicBool::new(false),
        }
    }

    /// Point lookup. `None` means the resource does not exist (any more).
    pub fn get(&self, key: &ResourceKey) -> Option<Arc<T>> {
        self.read().get(key).cloned()
    }

    pub fn contains(&self, key: &ResourceKey) -> bool {
        self.read().contains_key(key)
    }

    pub fn list(&self) -> Vec<Arc<T>> {
        self.read().values().cloned().collect()
    }

    pub fn keys(&self) -> Vec<ResourceKey> {
        self.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Insert or replace, returning the previous snapshot.
    pub(crate) fn upsert(&self, key: ResourceKey, obj: Arc<T>) -> Option<Arc<T>> {
        self.write().insert(key, obj)
    }

    pub(crate) fn remove(&self, key: &ResourceKey) -> Option<Arc<T>> {
        self.write().remove(key)
    }

    pub(crate) fn mark_synced(&self) {
        if !self.synced.swap(true, Ordering::AcqRel) {
            debug!(kind = T::KIND, items = self.len(), "store synced");
        }
    }

    /// A namespace-aware read view over this store.
    pub fn lister(self: &Arc<Self>) -> Lister<T> {
        Lister {
            store: Arc::clone(self),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<ResourceKey, Arc<T>>> {
        self.items.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<ResourceKey, Arc<T>>> {
        self.items.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<T: Resource> Default for Store<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Resource> HasSynced for Store<T> {
    fn has_synced(&self) -> bool {
        self.synced.load(Ordering::Acquire)
    }
}

/// Read-only lookup by namespace and name.
#[derive(Debug)]
pub struct Lister<T> {
    store: Arc<Store<T>>,
}

impl<T> Clone for Lister<T> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<T: Resource> Lister<T> {
    /// Fetch one object. A missing object is [`Error::NotFound`].
    pub fn get(&self, namespace: Option<&str>, name: &str) -> Result<Arc<T>> {
        let key = ResourceKey::new(namespace, name);
        self.store
            .get(&key)
            .ok_or_else(|| Error::NotFound(key.to_string()))
    }

    /// All objects in `namespace`.
    pub fn list_namespace(&self, namespace: &str) -> Vec<Arc<T>> {
        self.store
            .list()
            .into_iter()
            .filter(|obj| obj.meta().namespace.as_deref() == Some(namespace))
            .collect()
    }
}

/// Block until every cache reports synced, or fail after `timeout`.
pub async fn wait_for_cache_sync(timeout: Duration, caches: &[&dyn HasSynced]) -> Result<()> {
    let poll = Duration::from_millis(100);
    let wait = async {
        while !caches.iter().all(|c| c.has_synced()) {
            tokio::time::sleep(poll).await;
        }
    };
    tokio::time::timeout(timeout, wait)
        .await
        .map_err(|_| Error::SyncTimeout(timeout))?;
    info!(caches = caches.len(), "caches synced");
    Ok(())
}
