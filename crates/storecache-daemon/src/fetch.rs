//! Fetch Coordinator - single-flight remote fetches
//!
//! Concurrent misses for the same (reference, endpoint) share one remote Get.
//! The first caller becomes the leader: its fetch runs on a detached task that
//! publishes the outcome, error included, on a `watch` channel. The leader and
//! everyone arriving while the fetch is outstanding wait on that channel.
//!
//! ```text
//!   caller A ──► join(key) ── leader ──► spawn(remote.get()) ──► send(outcome)
//!   caller A ─────────────────────────────────────────── wait ──┘
//!   caller B ──► join(key) ── follower ───────────────── wait ──┘
//! ```
//!
//! Cancelling any caller, the leader included, only stops that caller from
//! waiting; the fetch runs to completion for the others. The in-flight map
//! has its own lock, never held across an `.await`. If the fetch task dies
//! without answering (it panicked) the entry is cleared and followers race to
//! become the next leader.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, trace};

use storecache_core::{Endpoint, Fetched, Reference, StoreError};

/// Result shared between the leader and its followers
pub type FetchOutcome = Result<Fetched, StoreError>;

type OutcomeReceiver = watch::Receiver<Option<FetchOutcome>>;
type InFlightMap = Arc<Mutex<HashMap<FetchKey, InFlight>>>;

/// Coordination key: a miss is resolved against one specific backend
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FetchKey {
    pub reference: Reference,
    pub endpoint: Endpoint,
}

impl FetchKey {
    pub fn new(reference: Reference, endpoint: Endpoint) -> Self {
        Self {
            reference,
            endpoint,
        }
    }
}

struct InFlight {
    /// Distinguishes successive fetches of the same key
    id: u64,
    outcome: OutcomeReceiver,
}

enum Role {
    Leader {
        id: u64,
        sender: watch::Sender<Option<FetchOutcome>>,
        receiver: OutcomeReceiver,
    },
    Follower(OutcomeReceiver),
}

/// Deduplicates concurrent fetches per key
#[derive(Default)]
pub struct FetchCoordinator {
    inflight: InFlightMap,
    next_id: AtomicU64,
    leaders: AtomicU64,
    followers: AtomicU64,
}

impl FetchCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve `key`, starting the fetch built by `start` unless one is
    /// already in flight, in which case wait for that fetch's outcome.
    ///
    /// `start` runs only on the leader path. The future it returns is driven
    /// on its own task, so it must own everything it touches.
    pub async fn fetch<F, Fut>(&self, key: &FetchKey, start: F) -> FetchOutcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = FetchOutcome> + Send + 'static,
    {
        loop {
            match self.join(key) {
                Role::Leader {
                    id,
                    sender,
                    receiver,
                } => {
                    self.leaders.fetch_add(1, Ordering::Relaxed);
                    trace!("fetch: leading fetch of {} from {}", key.reference, key.endpoint);
                    self.spawn_fetch(key.clone(), id, sender, start());

                    return Self::wait(receiver).await.unwrap_or_else(|| {
                        Err(StoreError::Remote(format!(
                            "fetch of {} ended without a result",
                            key.reference
                        )))
                    });
                }
                Role::Follower(receiver) => {
                    self.followers.fetch_add(1, Ordering::Relaxed);
                    trace!("fetch: waiting on in-flight fetch of {}", key.reference);
                    if let Some(outcome) = Self::wait(receiver).await {
                        return outcome;
                    }
                    debug!(
                        "fetch: fetch of {} went away without an answer, retrying",
                        key.reference
                    );
                }
            }
        }
    }

    fn join(&self, key: &FetchKey) -> Role {
        let mut inflight = self.inflight.lock();
        if let Some(existing) = inflight.get(key) {
            return Role::Follower(existing.outcome.clone());
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = watch::channel(None);
        inflight.insert(
            key.clone(),
            InFlight {
                id,
                outcome: receiver.clone(),
            },
        );
        Role::Leader {
            id,
            sender,
            receiver,
        }
    }

    /// Drive a leader's fetch to completion independently of its caller
    fn spawn_fetch<Fut>(
        &self,
        key: FetchKey,
        id: u64,
        sender: watch::Sender<Option<FetchOutcome>>,
        fetch: Fut,
    ) where
        Fut: Future<Output = FetchOutcome> + Send + 'static,
    {
        let inflight = self.inflight.clone();
        tokio::spawn(async move {
            let _clear = ClearOnDrop { inflight, key, id };
            let outcome = fetch.await;
            sender.send_replace(Some(outcome));
        });
    }

    /// Wait for the fetch's outcome; `None` if it was dropped without one
    async fn wait(mut outcome: OutcomeReceiver) -> Option<FetchOutcome> {
        if let Ok(value) = outcome.wait_for(Option::is_some).await {
            return (*value).clone();
        }
        let value = (*outcome.borrow()).clone();
        value
    }

    /// Number of fetches currently outstanding
    pub fn in_flight(&self) -> usize {
        self.inflight.lock().len()
    }

    /// Remote fetches actually performed
    pub fn leader_count(&self) -> u64 {
        self.leaders.load(Ordering::Relaxed)
    }

    /// Callers that shared another caller's fetch
    pub fn follower_count(&self) -> u64 {
        self.followers.load(Ordering::Relaxed)
    }
}

/// Removes a fetch's in-flight entry however its task finishes
struct ClearOnDrop {
    inflight: InFlightMap,
    key: FetchKey,
    id: u64,
}

impl Drop for ClearOnDrop {
    fn drop(&mut self) {
        let mut inflight = self.inflight.lock();
        if inflight.get(&self.key).is_some_and(|f| f.id == self.id) {
            inflight.remove(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn key(name: &str, addr: &str) -> FetchKey {
        FetchKey::new(Reference::from(name), Endpoint::remote(addr))
    }

    /// A fetch that counts its invocation, stalls, then answers with `outcome`
    fn counted(
        calls: &Arc<AtomicUsize>,
        delay: Duration,
        outcome: FetchOutcome,
    ) -> impl FnOnce() -> std::pin::Pin<Box<dyn Future<Output = FetchOutcome> + Send>> {
        let calls = calls.clone();
        move || {
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(delay).await;
                outcome
            })
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_fetches_share_one_call() {
        let coordinator = Arc::new(FetchCoordinator::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let coordinator = coordinator.clone();
                let start = counted(
                    &calls,
                    Duration::from_millis(100),
                    Ok(Fetched::Data(Bytes::from_static(b"shared"))),
                );
                tokio::spawn(async move { coordinator.fetch(&key("r", "a:1"), start).await })
            })
            .collect();

        for task in tasks {
            let outcome = task.await.unwrap();
            assert_eq!(outcome, Ok(Fetched::Data(Bytes::from_static(b"shared"))));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.leader_count(), 1);
        assert_eq!(coordinator.follower_count(), 15);
        assert_eq!(coordinator.in_flight(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_errors_are_shared() {
        let coordinator = Arc::new(FetchCoordinator::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let coordinator = coordinator.clone();
                let start = counted(
                    &calls,
                    Duration::from_millis(100),
                    Err(StoreError::RemoteUnavailable("offline".into())),
                );
                tokio::spawn(async move { coordinator.fetch(&key("r", "a:1"), start).await })
            })
            .collect();

        for task in tasks {
            assert_eq!(
                task.await.unwrap(),
                Err(StoreError::RemoteUnavailable("offline".into()))
            );
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_distinct_keys_do_not_coalesce() {
        let coordinator = FetchCoordinator::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let redirect = || Ok(Fetched::Redirect(Vec::new()));
        let delay = Duration::from_millis(20);

        let (ka, kb, kc) = (key("r", "a:1"), key("r", "b:1"), key("s", "a:1"));
        let (a, b, c) = tokio::join!(
            coordinator.fetch(&ka, counted(&calls, delay, redirect())),
            coordinator.fetch(&kb, counted(&calls, delay, redirect())),
            coordinator.fetch(&kc, counted(&calls, delay, redirect()))
        );
        assert!(a.is_ok() && b.is_ok() && c.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_sequential_fetches_each_call_remote() {
        let coordinator = FetchCoordinator::new();
        let calls = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            coordinator
                .fetch(
                    &key("r", "a:1"),
                    counted(&calls, Duration::ZERO, Ok(Fetched::Data(Bytes::new()))),
                )
                .await
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(coordinator.in_flight(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_cancelled_leader_keeps_fetching_for_followers() {
        let coordinator = Arc::new(FetchCoordinator::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let k = key("r", "a:1");

        let leader = {
            let coordinator = coordinator.clone();
            let k = k.clone();
            let start = counted(
                &calls,
                Duration::from_millis(200),
                Ok(Fetched::Data(Bytes::from_static(b"first"))),
            );
            tokio::spawn(async move { coordinator.fetch(&k, start).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(coordinator.in_flight(), 1);

        let follower = {
            let coordinator = coordinator.clone();
            let k = k.clone();
            let start = counted(
                &calls,
                Duration::ZERO,
                Ok(Fetched::Data(Bytes::from_static(b"second"))),
            );
            tokio::spawn(async move { coordinator.fetch(&k, start).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        leader.abort();

        let outcome = tokio::time::timeout(Duration::from_secs(5), follower)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome, Ok(Fetched::Data(Bytes::from_static(b"first"))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.in_flight(), 0);
    }

    fn explode() -> FetchOutcome {
        panic!("remote client bug")
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_panicked_fetch_hands_over() {
        let coordinator = Arc::new(FetchCoordinator::new());
        let k = key("r", "a:1");

        let leader = {
            let coordinator = coordinator.clone();
            let k = k.clone();
            tokio::spawn(async move {
                coordinator
                    .fetch(&k, || async {
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        explode()
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let follower = coordinator
            .fetch(&k, || async { Ok(Fetched::Data(Bytes::from_static(b"retried"))) })
            .await;
        assert_eq!(follower, Ok(Fetched::Data(Bytes::from_static(b"retried"))));
        assert!(leader.await.unwrap().is_err());
        assert_eq!(coordinator.in_flight(), 0);
    }
}
