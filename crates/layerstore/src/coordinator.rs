//! Fetch deduplication.
//!
//! The [`RequestCoordinator`] keeps one flight per fingerprint:
//!
//! ```text
//!   Idle ──first caller──▶ Pending { waiters } ──fetch done──▶ Settled ──▶ (discarded)
//!                             ▲        │
//!                             └─join───┘
//! ```
//!
//! The first caller for a fingerprint spawns the fetch on its own task and
//! every caller, first included, waits on a `oneshot` receiver.  Dropping a
//! waiting future therefore never cancels the backend call; the coordinator
//! just finds the receiver gone when it settles.  Each waiter is notified
//! exactly once, with a success or with the shared error.  Nothing is
//! remembered after settling, so a failed fetch is retried by the next call.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::{Result, StoreError};
use crate::query::Fingerprint;

/// Where a fingerprint is in its fetch lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchState {
    /// No fetch in flight.
    Idle,
    /// A fetch is running; `waiters` callers are waiting for it.
    Pending { waiters: usize },
    /// The fetch finished and its result is being handed to the waiters.
    ///
    /// Lasts only until every waiter is notified; the entry is then
    /// discarded and the fingerprint reads as [`FetchState::Idle`].  A call
    /// arriving in this window starts a new fetch.
    Settled,
}

type Waiter<T> = oneshot::Sender<Result<T>>;

struct Flight<T> {
    state: FetchState,
    waiters: Vec<Waiter<T>>,
}

impl<T: Clone> Flight<T> {
    fn pending(first: Waiter<T>) -> Self {
        Self {
            state: FetchState::Pending { waiters: 1 },
            waiters: vec![first],
        }
    }

    fn join(&mut self, waiter: Waiter<T>) {
        self.waiters.push(waiter);
        self.state = FetchState::Pending {
            waiters: self.waiters.len(),
        };
    }

    fn is_settled(&self) -> bool {
        self.state == FetchState::Settled
    }

    /// Mark the flight settled and take its waiters.
    fn settle(&mut self) -> Vec<Waiter<T>> {
        self.state = FetchState::Settled;
        std::mem::take(&mut self.waiters)
    }
}

/// Hand the result to every waiter still listening.  Returns how many were
/// notified.
fn notify<T: Clone>(waiters: Vec<Waiter<T>>, result: &Result<T>) -> usize {
    waiters
        .into_iter()
        .filter_map(|waiter| waiter.send(result.clone()).ok())
        .count()
}

/// Deduplicates concurrent fetches producing `T`.
///
/// Cheaply cloneable; clones share the in-flight map.
pub struct RequestCoordinator<T> {
    flights: Arc<Mutex<HashMap<Fingerprint, Flight<T>>>>,
}

impl<T> Clone for RequestCoordinator<T> {
    fn clone(&self) -> Self {
        Self {
            flights: Arc::clone(&self.flights),
        }
    }
}

impl<T> Default for RequestCoordinator<T> {
    fn default() -> Self {
        Self {
            flights: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<T> RequestCoordinator<T>
where
    T: Clone + Send + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Fingerprint, Flight<T>>> {
        self.flights.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `fetch` for `fingerprint`, or join the fetch already in flight.
    ///
    /// With `dedupe` off the call always starts its own fetch and never
    /// touches the in-flight map.  `fetch` is only invoked when this call
    /// starts a fetch.
    pub async fn run<F, Fut>(&self, fingerprint: Fingerprint, dedupe: bool, fetch: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();

        if !dedupe {
            let task = fetch();
            tokio::spawn(async move {
                let _ = tx.send(task.await);
            });
            return Self::wait(rx).await;
        }

        let leader = {
            let mut flights = self.lock();
            match flights.get_mut(&fingerprint) {
                Some(flight) if !flight.is_settled() => {
                    flight.join(tx);
                    debug!(%fingerprint, state = ?flight.state, "joined in-flight fetch");
                    false
                }
                _ => {
                    flights.insert(fingerprint.clone(), Flight::pending(tx));
                    true
                }
            }
        };

        if leader {
            debug!(%fingerprint, "starting fetch");
            let task = fetch();
            let guard = SettleGuard {
                coordinator: self.clone(),
                fingerprint: Some(fingerprint),
            };
            tokio::spawn(async move {
                let result = task.await;
                guard.settle(result);
            });
        }

        Self::wait(rx).await
    }

    async fn wait(rx: oneshot::Receiver<Result<T>>) -> Result<T> {
        rx.await.unwrap_or_else(|_| {
            Err(StoreError::Internal(
                "fetch task ended without a result".to_string(),
            ))
        })
    }

    fn settle(&self, fingerprint: &Fingerprint, result: Result<T>) {
        let Some(listeners) = self.begin_settle(fingerprint) else {
            return;
        };
        let waiters = listeners.len();
        let notified = notify(listeners, &result);
        self.finish_settle(fingerprint);
        match &result {
            Ok(_) => debug!(%fingerprint, waiters, notified, "fetch settled"),
            Err(e) => warn!(%fingerprint, waiters, notified, error = %e, "fetch failed"),
        }
    }

    fn begin_settle(&self, fingerprint: &Fingerprint) -> Option<Vec<Waiter<T>>> {
        self.lock().get_mut(fingerprint).map(Flight::settle)
    }

    /// Discard the entry unless a new fetch has replaced it meanwhile.
    fn finish_settle(&self, fingerprint: &Fingerprint) {
        let mut flights = self.lock();
        if flights.get(fingerprint).is_some_and(Flight::is_settled) {
            flights.remove(fingerprint);
        }
    }

    /// Current state of a fingerprint.
    ///
    /// [`FetchState::Settled`] is only seen while waiters are being
    /// notified; afterwards the fingerprint is `Idle` again.
    pub fn state(&self, fingerprint: &Fingerprint) -> FetchState {
        self.lock()
            .get(fingerprint)
            .map_or(FetchState::Idle, |flight| flight.state)
    }

    /// Number of fetches in flight.
    pub fn in_flight(&self) -> usize {
        self.lock().values().filter(|flight| !flight.is_settled()).count()
    }
}

/// Settles a flight when its fetch task finishes, or with an error if the
/// task is torn down first (panic, runtime shutdown).
struct SettleGuard<T: Clone + Send + 'static> {
    coordinator: RequestCoordinator<T>,
    fingerprint: Option<Fingerprint>,
}

impl<T: Clone + Send + 'static> SettleGuard<T> {
    fn settle(mut self, result: Result<T>) {
        if let Some(fingerprint) = self.fingerprint.take() {
            self.coordinator.settle(&fingerprint, result);
        }
    }
}

impl<T: Clone + Send + 'static> Drop for SettleGuard<T> {
    fn drop(&mut self) {
        if let Some(fingerprint) = self.fingerprint.take() {
            self.coordinator.settle(
                &fingerprint,
                Err(StoreError::Internal(
                    "fetch task was aborted before settling".to_string(),
                )),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn fp(key: &str) -> Fingerprint {
        Fingerprint::item("Todo", key)
    }

    fn counted(
        calls: &Arc<AtomicUsize>,
        value: u32,
    ) -> impl FnOnce() -> futures::future::BoxFuture<'static, Result<u32>> + use<> {
        let calls = Arc::clone(calls);
        move || {
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(value)
            })
        }
    }

    #[tokio::test]
    async fn concurrent_identical_fetches_run_once() {
        let coordinator = RequestCoordinator::<u32>::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let (a, b, c) = tokio::join!(
            coordinator.run(fp("1"), true, counted(&calls, 7)),
            coordinator.run(fp("1"), true, counted(&calls, 8)),
            coordinator.run(fp("1"), true, counted(&calls, 9)),
        );
        assert_eq!((a.unwrap(), b.unwrap(), c.unwrap()), (7, 7, 7));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.state(&fp("1")), FetchState::Idle);
    }

    #[tokio::test]
    async fn different_fingerprints_do_not_share() {
        let coordinator = RequestCoordinator::<u32>::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let (a, b) = tokio::join!(
            coordinator.run(fp("1"), true, counted(&calls, 1)),
            coordinator.run(fp("2"), true, counted(&calls, 2)),
        );
        assert_eq!((a.unwrap(), b.unwrap()), (1, 2));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn dedupe_off_always_fetches() {
        let coordinator = RequestCoordinator::<u32>::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let (a, b) = tokio::join!(
            coordinator.run(fp("1"), false, counted(&calls, 1)),
            coordinator.run(fp("1"), false, counted(&calls, 2)),
        );
        assert_eq!((a.unwrap(), b.unwrap()), (1, 2));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(coordinator.in_flight(), 0);
    }

    #[tokio::test]
    async fn errors_are_shared_and_not_cached() {
        let coordinator = RequestCoordinator::<u32>::new();
        let failing = || {
            Box::pin(async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Err::<u32, _>(StoreError::not_found("Todo", "1"))
            }) as futures::future::BoxFuture<'static, Result<u32>>
        };
        let (a, b) = tokio::join!(
            coordinator.run(fp("1"), true, failing),
            coordinator.run(fp("1"), true, failing),
        );
        assert!(a.unwrap_err().is_not_found());
        assert!(b.unwrap_err().is_not_found());

        let calls = Arc::new(AtomicUsize::new(0));
        let retry = coordinator.run(fp("1"), true, counted(&calls, 3)).await;
        assert_eq!(retry.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancelled_leader_does_not_cancel_the_fetch() {
        let coordinator = RequestCoordinator::<u32>::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let leader = {
            let coordinator = coordinator.clone();
            let fetch = counted(&calls, 5);
            tokio::spawn(async move { coordinator.run(fp("1"), true, fetch).await })
        };
        // Let the leader register its flight, then join and cancel it.
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(coordinator.state(&fp("1")), FetchState::Pending { waiters: 1 });

        let follower = coordinator.run(fp("1"), true, counted(&calls, 6));
        leader.abort();

        assert_eq!(follower.await.unwrap(), 5);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn settled_flight_is_visible_until_discarded() {
        let coordinator = RequestCoordinator::<u32>::new();
        let (tx, rx) = oneshot::channel();
        coordinator.lock().insert(fp("1"), Flight::pending(tx));

        let listeners = coordinator.begin_settle(&fp("1")).unwrap();
        assert_eq!(coordinator.state(&fp("1")), FetchState::Settled);
        assert_eq!(coordinator.in_flight(), 0);

        // A call in the settle window starts its own fetch.
        let calls = Arc::new(AtomicUsize::new(0));
        let fresh = coordinator.run(fp("1"), true, counted(&calls, 2)).await;
        assert_eq!(fresh.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert_eq!(notify(listeners, &Ok(1)), 1);
        assert_eq!(rx.await.unwrap().unwrap(), 1);
        coordinator.finish_settle(&fp("1"));
        assert_eq!(coordinator.state(&fp("1")), FetchState::Idle);
    }

    #[tokio::test]
    async fn panicking_fetch_settles_waiters_with_an_error() {
        let coordinator = RequestCoordinator::<u32>::new();
        async fn explode() -> Result<u32> {
            tokio::time::sleep(Duration::from_millis(5)).await;
            panic!("backend exploded")
        }
        let err = coordinator.run(fp("1"), true, explode).await.unwrap_err();
        assert!(matches!(err, StoreError::Internal(_)));
        assert_eq!(coordinator.in_flight(), 0);
    }
}
