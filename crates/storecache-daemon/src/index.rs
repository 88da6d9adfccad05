//! Reference Index - which blobs are cached, and how recently they were used
//!
//! Entries live in a slot arena addressed by reference, with a separate
//! ordered map from `(recency, reference)` to slot that gives the eviction
//! order. Every hit and every insertion takes a fresh value from a
//! monotonically increasing counter, so the smallest key is the least
//! recently used entry and ties cannot occur except across a restart, where
//! reference byte order decides.
//!
//! All state sits behind one `RwLock`. Writers hold it for metadata changes
//! and for unlinking evicted files; the bytes of a new blob are written before
//! the lock is taken.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, trace};

use storecache_core::Reference;

use crate::blob_store::{BlobFileStore, BlobStoreError, ScannedBlob};
use crate::eviction::{EvictionManager, EvictionReport};

/// A blob that is present on disk and registered in the index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub reference: Reference,
    pub size: u64,
    pub location: PathBuf,
    /// Recency counter value at the last hit or insertion
    pub last_access: u64,
}

/// Why an insertion was refused
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertError {
    /// The blob alone exceeds the byte budget
    TooLarge { size: u64, max: u64 },
    /// The file to register is missing or has the wrong size
    FileMismatch(BlobStoreError),
}

/// What an accepted insertion did
#[derive(Debug, Default, PartialEq, Eq)]
pub struct InsertOutcome {
    /// The reference was already indexed; only its recency changed
    pub already_present: bool,
    pub evicted: EvictionReport,
}

/// Lock-protected index state
#[derive(Debug)]
pub(crate) struct IndexState {
    slots: Vec<Option<CacheEntry>>,
    free_slots: Vec<usize>,
    by_reference: HashMap<Reference, usize>,
    recency: BTreeMap<(u64, Reference), usize>,
    total_bytes: u64,
    max_bytes: u64,
    counter: u64,
}

impl IndexState {
    pub(crate) fn new(max_bytes: u64) -> Self {
        Self {
            slots: Vec::new(),
            free_slots: Vec::new(),
            by_reference: HashMap::new(),
            recency: BTreeMap::new(),
            total_bytes: 0,
            max_bytes,
            counter: 0,
        }
    }

    fn next_access(&mut self) -> u64 {
        self.counter += 1;
        self.counter
    }

    pub(crate) fn get(&self, reference: &Reference) -> Option<&CacheEntry> {
        let slot = *self.by_reference.get(reference)?;
        self.slots.get(slot)?.as_ref()
    }

    pub(crate) fn len(&self) -> usize {
        self.by_reference.len()
    }

    pub(crate) fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub(crate) fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Register a new entry as the most recently used. The caller has checked
    /// the reference is absent.
    pub(crate) fn push(&mut self, reference: Reference, size: u64, location: PathBuf) {
        let last_access = self.next_access();
        let entry = CacheEntry {
            reference: reference.clone(),
            size,
            location,
            last_access,
        };
        let slot = match self.free_slots.pop() {
            Some(slot) => {
                self.slots[slot] = Some(entry);
                slot
            }
            None => {
                self.slots.push(Some(entry));
                self.slots.len() - 1
            }
        };
        self.recency.insert((last_access, reference.clone()), slot);
        self.by_reference.insert(reference, slot);
        self.total_bytes += size;
    }

    /// Unregister an entry, returning it
    pub(crate) fn take(&mut self, reference: &Reference) -> Option<CacheEntry> {
        let slot = self.by_reference.remove(reference)?;
        let entry = self.slots.get_mut(slot)?.take()?;
        self.recency.remove(&(entry.last_access, entry.reference.clone()));
        self.free_slots.push(slot);
        self.total_bytes -= entry.size;
        Some(entry)
    }

    /// Unregister the least recently used entry
    pub(crate) fn pop_oldest(&mut self) -> Option<CacheEntry> {
        let (_, reference) = self.recency.keys().next()?.clone();
        self.take(&reference)
    }

    /// Mark an entry as just used
    pub(crate) fn touch(&mut self, reference: &Reference) -> bool {
        let Some(&slot) = self.by_reference.get(reference) else {
            return false;
        };
        let access = self.next_access();
        let Some(entry) = self.slots.get_mut(slot).and_then(Option::as_mut) else {
            return false;
        };
        self.recency.remove(&(entry.last_access, entry.reference.clone()));
        entry.last_access = access;
        self.recency.insert((access, reference.clone()), slot);
        true
    }

    /// Entries from least to most recently used
    pub(crate) fn by_recency(&self) -> Vec<CacheEntry> {
        self.recency
            .values()
            .filter_map(|&slot| self.slots.get(slot).and_then(Clone::clone))
            .collect()
    }
}

/// Concurrent index of cached references with a byte budget
pub struct ReferenceIndex {
    state: RwLock<IndexState>,
    files: Arc<BlobFileStore>,
    evictor: EvictionManager,
}

impl ReferenceIndex {
    /// Create an empty index
    pub fn new(files: Arc<BlobFileStore>, max_bytes: u64) -> Self {
        Self {
            state: RwLock::new(IndexState::new(max_bytes)),
            evictor: EvictionManager::new(files.clone()),
            files,
        }
    }

    /// Rebuild from blobs found on disk, oldest modification first. If the
    /// recovered bytes exceed the budget the oldest entries are evicted.
    pub fn restore(files: Arc<BlobFileStore>, max_bytes: u64, mut blobs: Vec<ScannedBlob>) -> Self {
        blobs.sort_by(|a, b| {
            a.modified
                .cmp(&b.modified)
                .then_with(|| a.reference.cmp(&b.reference))
        });

        let index = Self::new(files, max_bytes);
        let report = {
            let mut state = index.state.write();
            for blob in blobs {
                if state.get(&blob.reference).is_none() {
                    state.push(blob.reference, blob.size, blob.location);
                }
            }
            let excess = state.total_bytes().saturating_sub(max_bytes);
            index.evictor.evict(&mut state, excess)
        };

        let state = index.state.read();
        info!(
            "Reference index restored: {} entries, {} bytes (max {}), {} evicted to fit",
            state.len(),
            state.total_bytes(),
            max_bytes,
            report.count()
        );
        drop(state);
        index
    }

    /// Look up an entry without changing its recency
    pub fn lookup(&self, reference: &Reference) -> Option<CacheEntry> {
        self.state.read().get(reference).cloned()
    }

    pub fn contains(&self, reference: &Reference) -> bool {
        self.state.read().get(reference).is_some()
    }

    /// Run `f` on an entry while holding the read lock.
    ///
    /// Used to copy a blob out of its file: eviction needs the write lock to
    /// unlink, so the file cannot vanish while `f` runs.
    pub fn with_entry<T>(&self, reference: &Reference, f: impl FnOnce(&CacheEntry) -> T) -> Option<T> {
        let state = self.state.read();
        state.get(reference).map(f)
    }

    /// Register a blob already written at `location`.
    ///
    /// Evicts least recently used entries first if the budget requires it.
    /// The file is re-checked under the lock so a blob removed between its
    /// write and this commit is never registered.
    pub fn insert(
        &self,
        reference: Reference,
        size: u64,
        location: PathBuf,
    ) -> Result<InsertOutcome, InsertError> {
        let mut state = self.state.write();
        let max = state.max_bytes();

        if state.get(&reference).is_some() {
            state.touch(&reference);
            return Ok(InsertOutcome {
                already_present: true,
                ..Default::default()
            });
        }

        if size > max {
            return Err(InsertError::TooLarge { size, max });
        }

        match self.files.stat(&location) {
            Ok(actual) if actual == size => {}
            Ok(actual) => {
                return Err(InsertError::FileMismatch(BlobStoreError::SizeMismatch {
                    expected: size,
                    actual,
                }))
            }
            Err(e) => return Err(InsertError::FileMismatch(e)),
        }

        let needed = (state.total_bytes() + size).saturating_sub(max);
        let evicted = self.evictor.evict(&mut state, needed);

        if state.total_bytes() + size > max {
            return Err(InsertError::TooLarge { size, max });
        }

        state.push(reference.clone(), size, location);
        trace!(
            "index: inserted {} ({} bytes), total {} / {}",
            reference,
            size,
            state.total_bytes(),
            max
        );

        Ok(InsertOutcome {
            already_present: false,
            evicted,
        })
    }

    /// Remove an entry and its file, returning the bytes freed
    pub fn remove(&self, reference: &Reference) -> Option<u64> {
        let mut state = self.state.write();
        let entry = state.take(reference)?;
        self.evictor.unlink(&entry);
        debug!("index: removed {} ({} bytes)", reference, entry.size);
        Some(entry.size)
    }

    /// Bump recency without touching data
    pub fn touch(&self, reference: &Reference) -> bool {
        self.state.write().touch(reference)
    }

    /// Evict least recently used entries until at most `target_bytes` remain
    pub fn trim(&self, target_bytes: u64) -> EvictionReport {
        let mut state = self.state.write();
        let excess = state.total_bytes().saturating_sub(target_bytes);
        self.evictor.evict(&mut state, excess)
    }

    /// Remove every entry
    pub fn clear(&self) -> EvictionReport {
        self.trim(0)
    }

    pub fn len(&self) -> usize {
        self.state.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn total_bytes(&self) -> u64 {
        self.state.read().total_bytes()
    }

    pub fn max_bytes(&self) -> u64 {
        self.state.read().max_bytes()
    }

    /// Snapshot of entries from least to most recently used
    pub fn entries_by_recency(&self) -> Vec<CacheEntry> {
        self.state.read().by_recency()
    }

    pub fn root(&self) -> &Path {
        self.files.root()
    }
}
