//! In-memory remote store
//!
//! Stands in for a networked blob store in tests and embedded setups. Counts
//! every call and can be told to redirect, fail, or stall Gets so that
//! concurrent misses overlap.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use tracing::trace;

use crate::error::StoreError;
use crate::remote::{RemoteStore, StoreBinder};
use crate::types::{Endpoint, Fetched, Location, Reference};

/// Blob store held entirely in memory
pub struct InMemoryStore {
    endpoint: Endpoint,
    blobs: RwLock<HashMap<Reference, Bytes>>,
    redirects: RwLock<HashMap<Reference, Vec<Location>>>,
    get_failure: RwLock<Option<StoreError>>,
    put_failure: RwLock<Option<StoreError>>,
    get_delay: RwLock<Option<Duration>>,
    gets: AtomicU64,
    puts: AtomicU64,
    deletes: AtomicU64,
}

impl InMemoryStore {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            blobs: RwLock::new(HashMap::new()),
            redirects: RwLock::new(HashMap::new()),
            get_failure: RwLock::new(None),
            put_failure: RwLock::new(None),
            get_delay: RwLock::new(None),
            gets: AtomicU64::new(0),
            puts: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
        }
    }

    /// Store a blob without counting it as a Put
    pub fn seed(&self, data: impl Into<Bytes>) -> Reference {
        let data = data.into();
        let reference = Reference::for_content(&data);
        self.blobs.write().insert(reference.clone(), data);
        reference
    }

    /// Store a blob under an arbitrary reference (for corrupt-data scenarios)
    pub fn seed_as(&self, reference: Reference, data: impl Into<Bytes>) {
        self.blobs.write().insert(reference, data.into());
    }

    /// Answer Gets for `reference` with a redirect instead of data
    pub fn redirect(&self, reference: Reference, locations: Vec<Location>) {
        self.redirects.write().insert(reference, locations);
    }

    /// Fail every Get with `error` until cleared with `None`
    pub fn fail_gets(&self, error: Option<StoreError>) {
        *self.get_failure.write() = error;
    }

    /// Fail every Put with `error` until cleared with `None`
    pub fn fail_puts(&self, error: Option<StoreError>) {
        *self.put_failure.write() = error;
    }

    /// Stall each Get for `delay` before answering
    pub fn delay_gets(&self, delay: Option<Duration>) {
        *self.get_delay.write() = delay;
    }

    pub fn contains(&self, reference: &Reference) -> bool {
        self.blobs.read().contains_key(reference)
    }

    pub fn get_count(&self) -> u64 {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn put_count(&self) -> u64 {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn delete_count(&self) -> u64 {
        self.deletes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteStore for InMemoryStore {
    fn endpoint(&self) -> Endpoint {
        self.endpoint.clone()
    }

    async fn get(&self, reference: &Reference) -> Result<Fetched, StoreError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        trace!("memory store: get {}", reference);

        let delay = *self.get_delay.read();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(err) = self.get_failure.read().clone() {
            return Err(err);
        }
        if let Some(locations) = self.redirects.read().get(reference) {
            return Ok(Fetched::Redirect(locations.clone()));
        }
        self.blobs
            .read()
            .get(reference)
            .cloned()
            .map(Fetched::Data)
            .ok_or_else(|| StoreError::NotFound(reference.clone()))
    }

    async fn put(&self, data: Bytes) -> Result<Reference, StoreError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.put_failure.read().clone() {
            return Err(err);
        }
        let reference = Reference::for_content(&data);
        trace!("memory store: put {} ({} bytes)", reference, data.len());
        self.blobs.write().insert(reference.clone(), data);
        Ok(reference)
    }

    async fn delete(&self, reference: &Reference) -> Result<(), StoreError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        match self.blobs.write().remove(reference) {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound(reference.clone())),
        }
    }
}

/// Binder over a fixed set of in-memory stores keyed by endpoint
#[derive(Default)]
pub struct InMemoryBinder {
    stores: RwLock<HashMap<Endpoint, Arc<InMemoryStore>>>,
}

impl InMemoryBinder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the store for `endpoint`, creating it on first use
    pub fn store(&self, endpoint: &Endpoint) -> Arc<InMemoryStore> {
        self.stores
            .write()
            .entry(endpoint.clone())
            .or_insert_with(|| Arc::new(InMemoryStore::new(endpoint.clone())))
            .clone()
    }
}

impl StoreBinder for InMemoryBinder {
    fn bind(&self, endpoint: &Endpoint) -> Result<Arc<dyn RemoteStore>, StoreError> {
        if !endpoint.is_assigned() {
            return Err(StoreError::NotConfigured);
        }
        let store: Arc<dyn RemoteStore> = self.store(endpoint);
        Ok(store)
    }
}
