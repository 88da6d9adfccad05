//! Error types for the store cache

use thiserror::Error;

use crate::types::Reference;

/// Errors surfaced by the cache and by remote stores.
///
/// `Clone` so that one remote outcome can be handed to every caller waiting on
/// the same fetch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("reference not found: {0}")]
    NotFound(Reference),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("remote store unavailable: {0}")]
    RemoteUnavailable(String),

    #[error("remote store error: {0}")]
    Remote(String),

    #[error("blob too large to cache: {size} bytes (max {max})")]
    TooLargeToCache { size: u64, max: u64 },

    #[error("corrupt blob {reference}: {reason}")]
    Corrupt { reference: Reference, reason: String },

    #[error("store endpoint not yet configured")]
    NotConfigured,

    #[error("invalid reference: {0}")]
    InvalidReference(String),
}

impl StoreError {
    /// Errors produced by the remote side, which the cache passes through untouched
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            StoreError::NotFound(_) | StoreError::RemoteUnavailable(_) | StoreError::Remote(_)
        )
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e.to_string())
    }
}

/// Configuration errors
#[derive(Error, Debug, Clone)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("no configuration directory available")]
    NoConfigDir,
}
