//! Storecache Core - Shared types, errors, configuration and the remote store capability
//!
//! This crate contains the foundational types used by the cache daemon and by
//! whatever RPC layer hosts it. It has no dependency on the on-disk cache.

pub mod config;
pub mod error;
pub mod memory;
pub mod remote;
pub mod types;

pub use config::{CacheConfig, Config, CACHE_SUBDIR, DEFAULT_MAX_BYTES};
pub use error::*;
pub use memory::{InMemoryBinder, InMemoryStore};
pub use remote::{RemoteStore, StoreBinder};
pub use types::*;
