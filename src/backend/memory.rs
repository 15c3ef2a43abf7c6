// In-process data service, used by the demo mode and by tests

use std::{
    collections::{HashMap, VecDeque},
    sync::Mutex,
    time::Duration,
};

use async_trait::async_trait;
use serde_json::Value;

use super::{
    Backend, FetchError, Method, ProgressSink, Resource, UploadFile,
    emulation::{self, ResourceMap},
};

/// One request as seen by the [`MemoryBackend`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestRecord {
    /// `None` for reads
    pub method: Option<Method>,
    pub key: String,
}

#[derive(Default)]
struct MemoryState {
    resources: HashMap<String, Value>,
    requests: Vec<RequestRecord>,
    failures: HashMap<(Option<Method>, String), VecDeque<FetchError>>,
}

impl ResourceMap for HashMap<String, Value> {
    fn get(&self, key: &str) -> Result<Option<Value>, FetchError> {
        Ok(HashMap::get(self, key).cloned())
    }

    fn put(&mut self, key: &str, value: Value) -> Result<(), FetchError> {
        self.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<bool, FetchError> {
        Ok(HashMap::remove(self, key).is_some())
    }
}

/// Data service kept entirely in memory.
///
/// Every request is recorded so callers can assert on exactly what was sent,
/// and failures can be scripted per resource. An optional latency makes the
/// backend yield to the runtime before answering, which lets concurrent
/// callers interleave the way they would against a real network.
#[derive(Default)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
    latency: Option<Duration>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Seed or overwrite a resource.
    pub fn insert(&self, resource: &Resource, value: Value) {
        if let Ok(mut state) = self.state.lock() {
            state.resources.insert(resource.key(), value);
        }
    }

    pub fn get(&self, resource: &Resource) -> Option<Value> {
        self.state
            .lock()
            .ok()
            .and_then(|state| state.resources.get(&resource.key()).cloned())
    }

    /// Make the next request matching `method` and `resource` fail. `None`
    /// targets reads.
    pub fn fail_next(&self, method: Option<Method>, resource: &Resource, error: FetchError) {
        if let Ok(mut state) = self.state.lock() {
            state
                .failures
                .entry((method, resource.key()))
                .or_default()
                .push_back(error);
        }
    }

    pub fn requests(&self) -> Vec<RequestRecord> {
        self.state
            .lock()
            .map(|state| state.requests.clone())
            .unwrap_or_default()
    }

    /// Number of recorded requests for `method` on `resource`.
    pub fn count(&self, method: Option<Method>, resource: &Resource) -> usize {
        let key = resource.key();
        self.requests()
            .iter()
            .filter(|r| r.method == method && r.key == key)
            .count()
    }

    pub fn clear_requests(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.requests.clear();
        }
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn record(&self, method: Option<Method>, resource: &Resource) -> Result<(), FetchError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| FetchError::failed("memory backend poisoned"))?;
        state.requests.push(RequestRecord {
            method,
            key: resource.key(),
        });
        match state
            .failures
            .get_mut(&(method, resource.key()))
            .and_then(VecDeque::pop_front)
        {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn fetch(&self, resource: &Resource) -> Result<Value, FetchError> {
        self.record(None, resource)?;
        self.simulate_latency().await;
        let state = self
            .state
            .lock()
            .map_err(|_| FetchError::failed("memory backend poisoned"))?;
        emulation::fetch(&state.resources, resource)
    }

    async fn mutate(
        &self,
        method: Method,
        resource: &Resource,
        body: Value,
    ) -> Result<Value, FetchError> {
        self.record(Some(method), resource)?;
        self.simulate_latency().await;
        let mut state = self
            .state
            .lock()
            .map_err(|_| FetchError::failed("memory backend poisoned"))?;
        emulation::mutate(&mut state.resources, method, resource, body)
    }

    async fn upload(
        &self,
        files: Vec<UploadFile>,
        progress: ProgressSink,
    ) -> Result<Value, FetchError> {
        let total = files.len().max(1);
        for sent in 1..=files.len() {
            self.simulate_latency().await;
            progress(u8::try_from(sent * 100 / total).unwrap_or(100));
        }
        let body = serde_json::to_value(&files).map_err(|e| FetchError::failed(e.to_string()))?;
        self.mutate(Method::Post, &Resource::Upload, body).await
    }
}
