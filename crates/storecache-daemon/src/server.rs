//! Store cache server - the surface an RPC layer exposes to clients
//!
//! Every call carries the client's authenticated session, which names the
//! store endpoint the client wants to reach. The server resolves that
//! endpoint, routes reads and writes through the shared [`StoreCache`], and
//! reports the remote endpoint (not its own) when asked.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use tracing::debug;

use storecache_core::{
    CacheConfig, Endpoint, Fetched, Location, Refdata, Reference, RemoteStore, StoreBinder, StoreError,
};

use crate::cache::StoreCache;

/// Authenticated client session, as resolved by the auth layer
#[derive(Debug, Clone)]
pub struct Session {
    pub user: String,
    /// Store endpoint requests are proxied to
    pub proxied_endpoint: Endpoint,
}

impl Session {
    pub fn new(user: impl Into<String>, proxied_endpoint: Endpoint) -> Self {
        Self {
            user: user.into(),
            proxied_endpoint,
        }
    }
}

/// Answer to a Get: inline data, or locations to try instead
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetResponse {
    pub data: Option<Bytes>,
    pub locations: Vec<Location>,
    pub refdata: Refdata,
}

/// Answer to a Put
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutResponse {
    pub refdata: Refdata,
}

/// Caching proxy in front of every store a client may address
pub struct StoreCacheServer {
    cache: Arc<StoreCache>,
    binder: Arc<dyn StoreBinder>,
}

impl StoreCacheServer {
    /// Build the server with a cache under `<cache_dir>/storecache`
    pub fn new(config: &CacheConfig, binder: Arc<dyn StoreBinder>) -> Result<Self, StoreError> {
        let cache = StoreCache::from_config(config)?;
        Ok(Self::with_cache(Arc::new(cache), binder))
    }

    pub fn with_cache(cache: Arc<StoreCache>, binder: Arc<dyn StoreBinder>) -> Self {
        Self { cache, binder }
    }

    pub fn cache(&self) -> &Arc<StoreCache> {
        &self.cache
    }

    /// Endpoint the session proxies to; an unassigned one is not yet usable
    fn endpoint_for(&self, session: &Session) -> Result<Endpoint, StoreError> {
        if !session.proxied_endpoint.is_assigned() {
            return Err(StoreError::NotConfigured);
        }
        Ok(session.proxied_endpoint.clone())
    }

    fn store_for(&self, session: &Session) -> Result<Arc<dyn RemoteStore>, StoreError> {
        let endpoint = self.endpoint_for(session)?;
        self.binder.bind(&endpoint)
    }

    pub async fn get(
        &self,
        session: &Session,
        reference: &Reference,
    ) -> Result<GetResponse, StoreError> {
        let op = Operation::new(format!("Get {:?}", reference.to_string()));

        let endpoint = self.endpoint_for(session).map_err(|e| op.failed(e))?;
        let fetched = self
            .cache
            .get(reference, &endpoint, self.binder.as_ref())
            .await
            .map_err(|e| op.failed(e))?;

        let (data, locations) = match fetched {
            Fetched::Data(data) => (Some(data), Vec::new()),
            Fetched::Redirect(locations) => (None, locations),
        };
        Ok(GetResponse {
            data,
            locations,
            refdata: Refdata::new(reference.clone()),
        })
    }

    pub async fn put(&self, session: &Session, data: Bytes) -> Result<PutResponse, StoreError> {
        let preview = &data[..data.len().min(15)];
        let op = Operation::new(format!("Put {}...", hex::encode(preview)));

        let store = self.store_for(session).map_err(|e| op.failed(e))?;
        let reference = self
            .cache
            .put(data, store.as_ref())
            .await
            .map_err(|e| op.failed(e))?;

        Ok(PutResponse {
            refdata: Refdata::new(reference),
        })
    }

    /// Delete at the remote first; the local copy goes only once that succeeded
    pub async fn delete(&self, session: &Session, reference: &Reference) -> Result<(), StoreError> {
        let op = Operation::new(format!("Delete {:?}", reference.to_string()));

        let store = self.store_for(session).map_err(|e| op.failed(e))?;
        store.delete(reference).await.map_err(|e| op.failed(e))?;
        self.cache.delete(reference);
        Ok(())
    }

    /// The remote store's endpoint, not the cache's
    pub fn endpoint(&self, session: &Session) -> Result<Endpoint, StoreError> {
        let op = Operation::new("Endpoint".to_string());
        self.endpoint_for(session).map_err(|e| op.failed(e))
    }
}

/// A logged server operation
struct Operation(String);

impl Operation {
    fn new(description: String) -> Self {
        debug!("storecache server: {}", description);
        Self(description)
    }

    fn failed(&self, err: StoreError) -> StoreError {
        debug!("storecache server: {} failed: {}", self, err);
        err
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
