//! Storecache Daemon - disk-backed LRU cache in front of remote blob stores
//!
//! This crate provides:
//! - A byte-bounded on-disk cache of immutable, content-addressed blobs
//! - Read-through fetching with single-flight deduplication of misses
//! - Write-through puts to the authoritative remote store
//! - The server facade an RPC layer calls with authenticated sessions
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 StoreCacheServer (per session)              │
//! │         session → endpoint → StoreBinder → RemoteStore      │
//! └─────────────────────────────┬───────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        StoreCache                           │
//! │  ReferenceIndex (RwLock) ── EvictionManager (LRU)           │
//! │  FetchCoordinator (Mutex + watch, never held across await)  │
//! │  BlobFileStore (tmp file + rename, hex-named files)         │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod blob_store;
pub mod cache;
pub mod eviction;
pub mod fetch;
pub mod index;
pub mod server;

pub use blob_store::{BlobFileStore, BlobStoreError, ScannedBlob};
pub use cache::{CacheStatsSnapshot, CacheUsage, StoreCache};
pub use eviction::{EvictionManager, EvictionReport};
pub use fetch::{FetchCoordinator, FetchKey, FetchOutcome};
pub use index::{CacheEntry, InsertError, InsertOutcome, ReferenceIndex};
pub use server::{GetResponse, PutResponse, Session, StoreCacheServer};
