//! Store cache - read-through, write-through blob cache
//!
//! Ties the pieces together:
//!
//! ```text
//!  get ──► ReferenceIndex ── hit ──► BlobFileStore::read ──► touch
//!              │
//!              └── miss ──► FetchCoordinator ──► StoreBinder::bind ──► RemoteStore::get
//!                                  │
//!                                  └── data ──► BlobFileStore::write ──► ReferenceIndex::insert
//!                                                                           (EvictionManager)
//!  put ──► RemoteStore::put ──► (best effort) same insert path
//!  delete ──► ReferenceIndex::remove
//! ```
//!
//! The remote store is authoritative, and it is only contacted on a miss. Local
//! failures never fail a request that the remote can satisfy: a bad hit is
//! dropped and re-fetched, and a failed insertion only means the blob is
//! served uncached.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, info, warn};

use storecache_core::{
    CacheConfig, Endpoint, Fetched, Reference, RemoteStore, StoreBinder, StoreError,
};

use crate::blob_store::BlobFileStore;
use crate::eviction::EvictionReport;
use crate::fetch::{FetchCoordinator, FetchKey};
use crate::index::{CacheEntry, InsertError, ReferenceIndex};

/// Counters for cache activity
#[derive(Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    insertions: AtomicU64,
    evictions: AtomicU64,
    evicted_bytes: AtomicU64,
    /// Blobs served without caching because they exceed the budget
    uncacheable: AtomicU64,
    /// Local disk failures that were absorbed
    disk_errors: AtomicU64,
}

impl CacheStats {
    fn record_eviction(&self, report: &EvictionReport) {
        self.evictions
            .fetch_add(report.count() as u64, Ordering::Relaxed);
        self.evicted_bytes
            .fetch_add(report.freed_bytes, Ordering::Relaxed);
    }
}

/// Snapshot of cache statistics (non-atomic, for reporting)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub remote_fetches: u64,
    pub coalesced_fetches: u64,
    pub insertions: u64,
    pub evictions: u64,
    pub evicted_bytes: u64,
    pub uncacheable: u64,
    pub disk_errors: u64,
}

impl CacheStatsSnapshot {
    /// Calculate hit rate as a percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

/// Current space usage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheUsage {
    pub current_bytes: u64,
    pub max_bytes: u64,
    pub entry_count: usize,
    pub usage_percent: u32,
}

/// State shared with fetch tasks, which outlive the request that started them
struct CacheState {
    files: Arc<BlobFileStore>,
    index: ReferenceIndex,
    verify_references: AtomicBool,
    stats: CacheStats,
}

impl CacheState {
    /// Serve a hit. A copy that cannot be read intact is dropped so the
    /// caller falls through to the remote.
    fn read_local(&self, reference: &Reference) -> Option<Bytes> {
        let read = self
            .index
            .with_entry(reference, |entry| self.files.read(&entry.location, entry.size))?;

        let checked = read.map_err(StoreError::from).and_then(|data| {
            self.check_content(reference, &data)?;
            Ok(data)
        });

        match checked {
            Ok(data) => {
                self.index.touch(reference);
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                debug!("get {}: local hit ({} bytes)", reference, data.len());
                Some(Bytes::from(data))
            }
            Err(e) => {
                warn!("get {}: dropping bad local copy: {}", reference, e);
                self.stats.disk_errors.fetch_add(1, Ordering::Relaxed);
                self.index.remove(reference);
                None
            }
        }
    }

    fn check_content(&self, reference: &Reference, data: &[u8]) -> Result<(), StoreError> {
        if self.verify_references.load(Ordering::Relaxed) && reference.verify(data) == Some(false)
        {
            return Err(StoreError::Corrupt {
                reference: reference.clone(),
                reason: "content does not match reference".to_string(),
            });
        }
        Ok(())
    }

    /// Best-effort insertion of a blob; returns whether it is now cached
    fn admit(&self, reference: &Reference, data: &[u8]) -> bool {
        let size = data.len() as u64;
        let max = self.index.max_bytes();
        if size > max {
            self.stats.uncacheable.fetch_add(1, Ordering::Relaxed);
            debug!("{}: {}", reference, StoreError::TooLargeToCache { size, max });
            return false;
        }
        if self.index.touch(reference) {
            return true;
        }

        let location = match self.files.write(reference, data) {
            Ok(location) => location,
            Err(e) => {
                self.stats.disk_errors.fetch_add(1, Ordering::Relaxed);
                warn!("{}: not cached, write failed: {}", reference, e);
                return false;
            }
        };

        match self.index.insert(reference.clone(), size, location.clone()) {
            Ok(outcome) => {
                if !outcome.already_present {
                    self.stats.insertions.fetch_add(1, Ordering::Relaxed);
                }
                self.stats.record_eviction(&outcome.evicted);
                true
            }
            Err(InsertError::TooLarge { size, max }) => {
                self.stats.uncacheable.fetch_add(1, Ordering::Relaxed);
                debug!("{}: {}", reference, StoreError::TooLargeToCache { size, max });
                if let Err(e) = self.files.delete(&location) {
                    warn!("{}: failed to remove uncached file: {}", reference, e);
                }
                false
            }
            Err(InsertError::FileMismatch(e)) => {
                self.stats.disk_errors.fetch_add(1, Ordering::Relaxed);
                warn!("{}: not cached, file changed before commit: {}", reference, e);
                false
            }
        }
    }

    /// Fetch a missed blob from `store` and cache inline data
    async fn fetch_remote(
        &self,
        reference: &Reference,
        store: &dyn RemoteStore,
    ) -> Result<Fetched, StoreError> {
        let fetched = store.get(reference).await?;
        match &fetched {
            Fetched::Data(data) => {
                self.check_content(reference, data)?;
                self.admit(reference, data);
            }
            Fetched::Redirect(locations) => {
                debug!(
                    "get {}: redirected to {} location(s), nothing cached",
                    reference,
                    locations.len()
                );
            }
        }
        Ok(fetched)
    }
}

/// Disk-backed, size-bounded cache in front of remote blob stores
pub struct StoreCache {
    state: Arc<CacheState>,
    fetches: FetchCoordinator,
}

impl StoreCache {
    /// Open a cache rooted at `root` holding at most `max_bytes` of blobs.
    ///
    /// Existing blob files are scanned back into the index; orphans are
    /// removed. An unreadable root directory is an error.
    pub fn new(root: impl Into<PathBuf>, max_bytes: u64) -> Result<Self, StoreError> {
        let files = Arc::new(BlobFileStore::open(root)?);
        let scanned = files.scan()?;
        let index = ReferenceIndex::restore(files.clone(), max_bytes, scanned);

        info!(
            "Store cache ready at {:?}: {} entries, {} / {} bytes",
            files.root(),
            index.len(),
            index.total_bytes(),
            max_bytes
        );

        Ok(Self {
            state: Arc::new(CacheState {
                files,
                index,
                verify_references: AtomicBool::new(false),
                stats: CacheStats::default(),
            }),
            fetches: FetchCoordinator::new(),
        })
    }

    /// Open a cache from configuration (`<cache_dir>/storecache`)
    pub fn from_config(config: &CacheConfig) -> Result<Self, StoreError> {
        Ok(Self::new(config.root_dir(), config.max_bytes)?
            .with_verification(config.verify_references))
    }

    /// Check data against content-hash references, both when it arrives from
    /// the remote and when it is served from disk
    pub fn with_verification(self, verify: bool) -> Self {
        self.state.verify_references.store(verify, Ordering::Relaxed);
        self
    }

    /// Read a blob, from local disk if cached, otherwise from the store at
    /// `endpoint`.
    ///
    /// `binder` is consulted only on a miss, so a hit is served even when the
    /// remote cannot be reached. Returns the data, or the remote's redirect
    /// list untouched. Concurrent misses for the same reference and endpoint
    /// share one remote call, which completes even if every caller gives up.
    /// Remote errors are returned as-is.
    pub async fn get(
        &self,
        reference: &Reference,
        endpoint: &Endpoint,
        binder: &dyn StoreBinder,
    ) -> Result<Fetched, StoreError> {
        if let Some(data) = self.state.read_local(reference) {
            return Ok(Fetched::Data(data));
        }
        self.state.stats.misses.fetch_add(1, Ordering::Relaxed);

        let key = FetchKey::new(reference.clone(), endpoint.clone());
        self.fetches
            .fetch(&key, || {
                let store = binder.bind(endpoint);
                let state = self.state.clone();
                let reference = reference.clone();
                async move {
                    let store = store?;
                    state.fetch_remote(&reference, store.as_ref()).await
                }
            })
            .await
    }

    /// Write a blob through to `store`, then mirror it locally.
    ///
    /// Only the remote write can fail the call.
    pub async fn put(&self, data: Bytes, store: &dyn RemoteStore) -> Result<Reference, StoreError> {
        let reference = store.put(data.clone()).await?;

        match self.state.check_content(&reference, &data) {
            Ok(()) => {
                self.state.admit(&reference, &data);
            }
            Err(e) => warn!("put {}: not mirroring locally: {}", reference, e),
        }
        Ok(reference)
    }

    /// Drop the local copy of a blob the remote has already deleted.
    ///
    /// Returns whether a local entry existed.
    pub fn delete(&self, reference: &Reference) -> bool {
        self.state.index.remove(reference).is_some()
    }

    /// Evict least recently used entries until at most `target_bytes` remain
    pub fn trim(&self, target_bytes: u64) -> EvictionReport {
        let report = self.state.index.trim(target_bytes);
        self.state.stats.record_eviction(&report);
        if !report.is_empty() {
            info!(
                "Trimmed {} entries ({} bytes), cache now {} bytes",
                report.count(),
                report.freed_bytes,
                self.state.index.total_bytes()
            );
        }
        report
    }

    /// Remove every local entry
    pub fn clear(&self) -> EvictionReport {
        self.trim(0)
    }

    pub fn contains(&self, reference: &Reference) -> bool {
        self.state.index.contains(reference)
    }

    /// Index entry for a reference, if cached
    pub fn entry(&self, reference: &Reference) -> Option<CacheEntry> {
        self.state.index.lookup(reference)
    }

    /// Entries from least to most recently used
    pub fn entries(&self) -> Vec<CacheEntry> {
        self.state.index.entries_by_recency()
    }

    pub fn len(&self) -> usize {
        self.state.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.index.is_empty()
    }

    pub fn total_bytes(&self) -> u64 {
        self.state.index.total_bytes()
    }

    pub fn max_bytes(&self) -> u64 {
        self.state.index.max_bytes()
    }

    pub fn root(&self) -> &Path {
        self.state.files.root()
    }

    pub fn usage(&self) -> CacheUsage {
        let current_bytes = self.total_bytes();
        let max_bytes = self.max_bytes();
        let usage_percent = if max_bytes == 0 {
            0
        } else {
            (current_bytes as f64 / max_bytes as f64 * 100.0) as u32
        };
        CacheUsage {
            current_bytes,
            max_bytes,
            entry_count: self.len(),
            usage_percent,
        }
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        let stats = &self.state.stats;
        CacheStatsSnapshot {
            hits: stats.hits.load(Ordering::Relaxed),
            misses: stats.misses.load(Ordering::Relaxed),
            remote_fetches: self.fetches.leader_count(),
            coalesced_fetches: self.fetches.follower_count(),
            insertions: stats.insertions.load(Ordering::Relaxed),
            evictions: stats.evictions.load(Ordering::Relaxed),
            evicted_bytes: stats.evicted_bytes.load(Ordering::Relaxed),
            uncacheable: stats.uncacheable.load(Ordering::Relaxed),
            disk_errors: stats.disk_errors.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::join_all;
    use std::fs;
    use std::time::Duration;
    use storecache_core::{InMemoryBinder, InMemoryStore, Location};
    use tempfile::TempDir;

    /// A cache plus the in-memory remote behind one endpoint
    struct Harness {
        cache: StoreCache,
        binder: InMemoryBinder,
        endpoint: Endpoint,
        store: Arc<InMemoryStore>,
    }

    impl Harness {
        fn open(root: &Path, max_bytes: u64) -> Self {
            let binder = InMemoryBinder::new();
            let endpoint = Endpoint::remote("store.example.com:443");
            let store = binder.store(&endpoint);
            Self {
                cache: StoreCache::new(root, max_bytes).unwrap(),
                binder,
                endpoint,
                store,
            }
        }

        async fn get(&self, reference: &Reference) -> Result<Fetched, StoreError> {
            self.cache.get(reference, &self.endpoint, &self.binder).await
        }

        async fn put(&self, data: Bytes) -> Result<Reference, StoreError> {
            self.cache.put(data, self.store.as_ref()).await
        }
    }

    /// Binder for a remote that cannot be dialed
    struct UnreachableBinder;

    impl StoreBinder for UnreachableBinder {
        fn bind(&self, _endpoint: &Endpoint) -> Result<Arc<dyn RemoteStore>, StoreError> {
            Err(StoreError::RemoteUnavailable("dial failed".into()))
        }
    }

    fn setup(max_bytes: u64) -> (TempDir, Harness) {
        let temp_dir = TempDir::new().unwrap();
        let harness = Harness::open(&temp_dir.path().join("storecache"), max_bytes);
        (temp_dir, harness)
    }

    fn blob(tag: u8, size: usize) -> Bytes {
        let mut data = vec![tag; size];
        data[0] = size as u8;
        Bytes::from(data)
    }

    #[tokio::test]
    async fn test_put_then_get_round_trip() {
        let (_dir, h) = setup(1024);
        let data = Bytes::from_static(b"the quick brown fox");

        let reference = h.put(data.clone()).await.unwrap();
        assert_eq!(h.store.put_count(), 1);
        assert!(h.cache.contains(&reference));

        let fetched = h.get(&reference).await.unwrap();
        assert_eq!(fetched, Fetched::Data(data));
        assert_eq!(h.store.get_count(), 0, "served from local disk");
        assert_eq!(h.cache.stats().hits, 1);
    }

    #[tokio::test]
    async fn test_miss_fetches_and_caches() {
        let (_dir, h) = setup(1024);
        let reference = h.store.seed(Bytes::from_static(b"remote only"));

        let first = h.get(&reference).await.unwrap();
        assert_eq!(first.data().unwrap().as_ref(), b"remote only");
        assert_eq!(h.store.get_count(), 1);
        assert!(h.cache.contains(&reference));

        h.get(&reference).await.unwrap();
        assert_eq!(h.store.get_count(), 1);

        let stats = h.cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.remote_fetches, 1);
        assert_eq!(stats.insertions, 1);
        assert_eq!(stats.hit_rate(), 50.0);
    }

    #[tokio::test]
    async fn test_hit_served_when_remote_cannot_be_bound() {
        let (_dir, h) = setup(1024);
        let data = Bytes::from_static(b"cached before the outage");
        let reference = h.put(data.clone()).await.unwrap();

        let fetched = h
            .cache
            .get(&reference, &h.endpoint, &UnreachableBinder)
            .await
            .unwrap();
        assert_eq!(fetched, Fetched::Data(data));

        let missing = Reference::from("never-cached");
        assert_eq!(
            h.cache.get(&missing, &h.endpoint, &UnreachableBinder).await,
            Err(StoreError::RemoteUnavailable("dial failed".into()))
        );
    }

    #[tokio::test]
    async fn test_budget_never_exceeded() {
        let (_dir, h) = setup(100);
        for i in 0..20u8 {
            let data = blob(i, 15 + (i as usize % 4) * 10);
            let reference = h.put(data).await.unwrap();
            assert!(h.cache.total_bytes() <= 100);
            let _ = h.get(&reference).await.unwrap();
            assert!(h.cache.total_bytes() <= 100);
        }
        let on_disk: u64 = h.cache.entries().iter().map(|e| e.size).sum();
        assert_eq!(on_disk, h.cache.total_bytes());
        assert!(h.cache.stats().evictions > 0);
    }

    #[tokio::test]
    async fn test_lru_evicts_least_recently_used() {
        let (_dir, h) = setup(30);
        let a = h.put(blob(1, 10)).await.unwrap();
        let b = h.put(blob(2, 10)).await.unwrap();
        let c = h.put(blob(3, 10)).await.unwrap();

        h.get(&a).await.unwrap();
        let d = h.put(blob(4, 10)).await.unwrap();

        assert!(h.cache.contains(&a));
        assert!(!h.cache.contains(&b));
        assert!(h.cache.contains(&c));
        assert!(h.cache.contains(&d));
        assert_eq!(h.cache.stats().evictions, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_misses_fetch_once() {
        let (_dir, h) = setup(1024);
        let reference = h.store.seed(Bytes::from_static(b"popular blob"));
        h.store.delay_gets(Some(Duration::from_millis(100)));

        let results = join_all((0..10).map(|_| h.get(&reference))).await;

        for result in results {
            assert_eq!(result.unwrap().data().unwrap().as_ref(), b"popular blob");
        }
        assert_eq!(h.store.get_count(), 1);
        assert_eq!(h.cache.stats().coalesced_fetches, 9);
        assert_eq!(h.cache.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_cancelled_caller_does_not_cost_a_second_fetch() {
        let temp_dir = TempDir::new().unwrap();
        let h = Arc::new(Harness::open(temp_dir.path(), 1024));
        let reference = h.store.seed(Bytes::from_static(b"slow blob"));
        h.store.delay_gets(Some(Duration::from_millis(300)));

        let first = {
            let h = h.clone();
            let reference = reference.clone();
            tokio::spawn(async move { h.get(&reference).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let second = {
            let h = h.clone();
            let reference = reference.clone();
            tokio::spawn(async move { h.get(&reference).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        first.abort();

        let fetched = tokio::time::timeout(Duration::from_secs(5), second)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(fetched.data().unwrap().as_ref(), b"slow blob");
        assert_eq!(h.store.get_count(), 1);
        assert!(h.cache.contains(&reference));
    }

    #[tokio::test]
    async fn test_redirect_passes_through_uncached() {
        let (_dir, h) = setup(1024);
        let reference = Reference::from("somewhere-else");
        let locations = vec![Location {
            endpoint: Endpoint::remote("mirror.example.com:443"),
            reference: reference.clone(),
        }];
        h.store.redirect(reference.clone(), locations.clone());

        let fetched = h.get(&reference).await.unwrap();
        assert_eq!(fetched, Fetched::Redirect(locations));
        assert!(!h.cache.contains(&reference));
        assert!(h.cache.is_empty());
    }

    #[tokio::test]
    async fn test_delete_forces_refetch() {
        let (_dir, h) = setup(1024);
        let reference = h.put(Bytes::from_static(b"short lived")).await.unwrap();

        h.store.delete(&reference).await.unwrap();
        assert!(h.cache.delete(&reference));
        assert!(!h.cache.delete(&reference));

        let result = h.get(&reference).await;
        assert_eq!(result, Err(StoreError::NotFound(reference.clone())));
        assert_eq!(h.store.get_count(), 1);
    }

    #[tokio::test]
    async fn test_oversized_put_is_not_cached() {
        let (_dir, h) = setup(16);
        let data = Bytes::from(vec![9u8; 17]);

        let reference = h.put(data.clone()).await.unwrap();
        assert!(h.store.contains(&reference));
        assert!(!h.cache.contains(&reference));
        assert_eq!(h.cache.stats().uncacheable, 1);

        let fetched = h.get(&reference).await.unwrap();
        assert_eq!(fetched, Fetched::Data(data));
        h.get(&reference).await.unwrap();
        assert_eq!(h.store.get_count(), 2);
        assert!(h.cache.is_empty());
    }

    #[tokio::test]
    async fn test_remote_errors_pass_through() {
        let (_dir, h) = setup(1024);
        let reference = Reference::from("anything");
        h.store
            .fail_gets(Some(StoreError::RemoteUnavailable("connection refused".into())));

        assert_eq!(
            h.get(&reference).await,
            Err(StoreError::RemoteUnavailable("connection refused".into()))
        );

        h.store
            .fail_puts(Some(StoreError::Remote("quota exceeded".into())));
        assert_eq!(
            h.put(Bytes::from_static(b"x")).await,
            Err(StoreError::Remote("quota exceeded".into()))
        );
        assert!(h.cache.is_empty());
    }

    #[tokio::test]
    async fn test_unreadable_hit_is_refetched() {
        let (_dir, h) = setup(1024);
        let data = Bytes::from_static(b"will be damaged");
        let reference = h.put(data.clone()).await.unwrap();

        let location = h.cache.entry(&reference).unwrap().location;
        fs::write(&location, b"short").unwrap();

        let fetched = h.get(&reference).await.unwrap();
        assert_eq!(fetched, Fetched::Data(data.clone()));
        assert_eq!(h.store.get_count(), 1);
        assert_eq!(h.cache.stats().disk_errors, 1);

        // The re-fetch repopulated the cache with intact bytes.
        assert_eq!(fs::read(&location).unwrap(), data.as_ref());
        h.get(&reference).await.unwrap();
        assert_eq!(h.store.get_count(), 1);
    }

    #[tokio::test]
    async fn test_verification_rejects_corrupt_remote_data() {
        let temp_dir = TempDir::new().unwrap();
        let mut h = Harness::open(temp_dir.path(), 1024);
        h.cache = h.cache.with_verification(true);
        let reference = Reference::for_content(b"genuine");
        h.store.seed_as(reference.clone(), Bytes::from_static(b"forged"));

        let result = h.get(&reference).await;
        assert!(matches!(result, Err(StoreError::Corrupt { .. })));
        assert!(!h.cache.contains(&reference));

        let opaque = Reference::from("not-a-content-hash");
        h.store.seed_as(opaque.clone(), Bytes::from_static(b"accepted"));
        assert!(h.get(&opaque).await.is_ok());
        assert!(h.cache.contains(&opaque));
    }

    #[tokio::test]
    async fn test_verification_drops_tampered_local_copy() {
        let temp_dir = TempDir::new().unwrap();
        let mut h = Harness::open(temp_dir.path(), 1024);
        h.cache = h.cache.with_verification(true);
        let data = Bytes::from_static(b"checked on every hit");
        let reference = h.put(data.clone()).await.unwrap();

        let location = h.cache.entry(&reference).unwrap().location;
        fs::write(&location, vec![b'x'; data.len()]).unwrap();

        let fetched = h.get(&reference).await.unwrap();
        assert_eq!(fetched, Fetched::Data(data.clone()));
        assert_eq!(h.store.get_count(), 1);
        assert_eq!(h.cache.stats().disk_errors, 1);
        assert_eq!(fs::read(&location).unwrap(), data.as_ref());
    }

    #[tokio::test]
    async fn test_cache_survives_restart() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("storecache");

        let reference = {
            let h = Harness::open(&root, 1024);
            h.put(Bytes::from_static(b"persistent")).await.unwrap()
        };

        let h = Harness::open(&root, 1024);
        assert!(h.cache.contains(&reference));
        let fetched = h.get(&reference).await.unwrap();
        assert_eq!(fetched.data().unwrap().as_ref(), b"persistent");
        assert_eq!(h.store.get_count(), 0);
    }

    #[tokio::test]
    async fn test_restart_with_smaller_budget_evicts() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("storecache");
        {
            let h = Harness::open(&root, 1024);
            for i in 0..4u8 {
                h.put(blob(i, 100)).await.unwrap();
            }
            assert_eq!(h.cache.total_bytes(), 400);
        }

        let cache = StoreCache::new(&root, 250).unwrap();
        assert_eq!(cache.len(), 2);
        assert!(cache.total_bytes() <= 250);
    }

    #[tokio::test]
    async fn test_trim_and_usage() {
        let (_dir, h) = setup(1000);
        for i in 0..5u8 {
            h.put(blob(i, 100)).await.unwrap();
        }
        let usage = h.cache.usage();
        assert_eq!(usage.current_bytes, 500);
        assert_eq!(usage.entry_count, 5);
        assert_eq!(usage.usage_percent, 50);

        let report = h.cache.trim(250);
        assert_eq!(report.count(), 3);
        assert_eq!(h.cache.total_bytes(), 200);

        h.cache.clear();
        assert!(h.cache.is_empty());
    }

    #[test]
    fn test_unreadable_root_is_fatal() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("occupied");
        fs::write(&file, b"").unwrap();
        assert!(matches!(
            StoreCache::new(file.join("storecache"), 10),
            Err(StoreError::Io(_))
        ));
    }

    #[test]
    fn test_from_config_uses_storecache_subdir() {
        let temp_dir = TempDir::new().unwrap();
        let config = CacheConfig::with_dir(temp_dir.path(), 64);
        let cache = StoreCache::from_config(&config).unwrap();
        assert_eq!(cache.root(), temp_dir.path().join("storecache"));
        assert_eq!(cache.max_bytes(), 64);
    }
}
