// Query cache sitting between the stores and the data service

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use log::debug;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::backend::{Backend, FetchError, Method, Resource};

const INVALIDATION_CHANNEL_CAPACITY: usize = 64;

#[derive(Clone, Debug)]
struct CacheEntry {
    value: Value,
    stale: bool,
}

/// Caches successful reads per [`Resource`] and broadcasts invalidations.
///
/// Entries are keyed by resource, so reads for different sessions never
/// collide. "Not found" answers are never cached: absence has to be observed
/// fresh every time because it is what drives creation flows.
#[derive(Clone)]
pub struct QueryCache {
    backend: Arc<dyn Backend>,
    entries: Arc<Mutex<HashMap<Resource, CacheEntry>>>,
    invalidations: broadcast::Sender<Resource>,
}

impl QueryCache {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        let (invalidations, _) = broadcast::channel(INVALIDATION_CHANNEL_CAPACITY);
        Self {
            backend,
            entries: Arc::new(Mutex::new(HashMap::new())),
            invalidations,
        }
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    /// Return the cached value if it is fresh, otherwise fetch it.
    pub async fn read(&self, resource: &Resource) -> Result<Value, FetchError> {
        if let Some(entry) = self.entry(resource)
            && !entry.stale
        {
            return Ok(entry.value);
        }
        self.refetch(resource).await
    }

    /// Always go to the data service, updating the cache with the answer.
    pub async fn refetch(&self, resource: &Resource) -> Result<Value, FetchError> {
        match self.backend.fetch(resource).await {
            Ok(value) => {
                self.store(resource, value.clone());
                Ok(value)
            }
            Err(FetchError::NotFound) => {
                self.evict(resource);
                Err(FetchError::NotFound)
            }
            // keep whatever we had, the caller decides how to surface it
            Err(e) => Err(e),
        }
    }

    pub async fn mutate(
        &self,
        method: Method,
        resource: &Resource,
        body: Value,
    ) -> Result<Value, FetchError> {
        self.backend.mutate(method, resource, body).await
    }

    /// Cached value regardless of staleness, without touching the network.
    pub fn peek(&self, resource: &Resource) -> Option<Value> {
        self.entry(resource).map(|entry| entry.value)
    }

    pub fn store(&self, resource: &Resource, value: Value) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(resource.clone(), CacheEntry { value, stale: false });
        }
    }

    /// Mark `resource` stale so the next read goes to the data service, and
    /// notify anyone watching for invalidations.
    pub fn invalidate(&self, resource: &Resource) {
        debug!("Invalidating {}", resource);
        if let Ok(mut entries) = self.entries.lock()
            && let Some(entry) = entries.get_mut(resource)
        {
            entry.stale = true;
        }
        // no receivers is fine, nobody is watching yet
        let _ = self.invalidations.send(resource.clone());
    }

    pub fn is_stale(&self, resource: &Resource) -> bool {
        self.entry(resource).map(|e| e.stale).unwrap_or(true)
    }

    pub fn subscribe_invalidations(&self) -> broadcast::Receiver<Resource> {
        self.invalidations.subscribe()
    }

    fn entry(&self, resource: &Resource) -> Option<CacheEntry> {
        self.entries
            .lock()
            .ok()
            .and_then(|entries| entries.get(resource).cloned())
    }

    fn evict(&self, resource: &Resource) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(resource);
        }
    }
}
