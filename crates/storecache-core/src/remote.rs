//! Capability traits for the authoritative remote blob store

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::StoreError;
use crate::types::{Endpoint, Fetched, Reference};

/// A remote blob store bound to one endpoint.
///
/// Implemented by a network client in production and by
/// [`InMemoryStore`](crate::memory::InMemoryStore) in tests.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Endpoint this store talks to
    fn endpoint(&self) -> Endpoint;

    /// Fetch a blob, or a list of locations to fetch it from instead
    async fn get(&self, reference: &Reference) -> Result<Fetched, StoreError>;

    /// Store a blob, returning the reference the store assigned
    async fn put(&self, data: Bytes) -> Result<Reference, StoreError>;

    /// Delete a blob
    async fn delete(&self, reference: &Reference) -> Result<(), StoreError>;
}

/// Resolves an endpoint to a store capability (dialing, session reuse, ...)
pub trait StoreBinder: Send + Sync {
    fn bind(&self, endpoint: &Endpoint) -> Result<Arc<dyn RemoteStore>, StoreError>;
}
