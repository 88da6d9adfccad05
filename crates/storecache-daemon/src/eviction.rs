//! Eviction Manager - strict least-recently-used eviction
//!
//! Runs inside the index write lock: pops the globally oldest entry, unlinks
//! its file, and repeats until enough bytes are freed or the index is empty.

use std::sync::Arc;

use tracing::{debug, error};

use storecache_core::Reference;

use crate::blob_store::BlobFileStore;
use crate::index::{CacheEntry, IndexState};

/// What an eviction pass removed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvictionReport {
    /// Evicted references, oldest first
    pub evicted: Vec<Reference>,
    pub freed_bytes: u64,
}

impl EvictionReport {
    pub fn count(&self) -> usize {
        self.evicted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.evicted.is_empty()
    }
}

/// Removes least recently used entries and their files
pub struct EvictionManager {
    files: Arc<BlobFileStore>,
}

impl EvictionManager {
    pub fn new(files: Arc<BlobFileStore>) -> Self {
        Self { files }
    }

    /// Evict oldest entries until at least `target_free` bytes are freed or
    /// nothing is left.
    pub(crate) fn evict(&self, state: &mut IndexState, target_free: u64) -> EvictionReport {
        let mut report = EvictionReport::default();
        if target_free == 0 {
            return report;
        }

        while report.freed_bytes < target_free {
            let Some(entry) = state.pop_oldest() else {
                break;
            };
            self.unlink(&entry);
            report.freed_bytes += entry.size;
            report.evicted.push(entry.reference);
        }

        if !report.is_empty() {
            debug!(
                "Evicted {} entries ({} bytes) to free {} bytes",
                report.count(),
                report.freed_bytes,
                target_free
            );
        }
        report
    }

    /// Delete the file of an entry already dropped from the index.
    ///
    /// A failed unlink leaves an orphan file that the next startup scan
    /// reconciles; the entry stays out of the index either way.
    pub(crate) fn unlink(&self, entry: &CacheEntry) {
        if let Err(e) = self.files.delete(&entry.location) {
            error!(
                "Failed to remove cache file {:?} for {}: {}",
                entry.location, entry.reference, e
            );
        }
    }
}
