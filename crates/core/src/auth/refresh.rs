// Single-flight refresh coordination
//
// At most one refresh runs at a time. Callers arriving while it is in flight
// are parked on a oneshot and receive exactly the outcome of that refresh.

use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;

/// Terminal outcome of a failed refresh
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RefreshFailed {
    /// The refresh credential is past its expiry
    #[error("refresh token expired")]
    Expired,

    /// The refresh credential was malformed, revoked or replayed
    #[error("refresh rejected: {0}")]
    Rejected(String),

    /// The refresh call could not reach the authority
    #[error("refresh transport failure: {0}")]
    Transport(String),

    /// The refresh in flight was dropped before it produced an outcome
    #[error("refresh abandoned before completion")]
    Abandoned,
}

type Waiter<T> = oneshot::Sender<Result<T, RefreshFailed>>;

struct CoordinatorState<T> {
    refreshing: bool,
    waiters: Vec<Waiter<T>>,
}

enum Role<T> {
    Leader,
    Waiter(oneshot::Receiver<Result<T, RefreshFailed>>),
}

/// Coordinates refreshes so concurrent callers share one in-flight call
pub struct RefreshCoordinator<T> {
    state: Mutex<CoordinatorState<T>>,
}

impl<T: Clone> RefreshCoordinator<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CoordinatorState {
                refreshing: false,
                waiters: Vec::new(),
            }),
        }
    }

    /// Whether a refresh is currently in flight
    pub fn is_refreshing(&self) -> bool {
        self.lock().refreshing
    }

    /// Number of callers parked on the in-flight refresh
    pub fn waiting(&self) -> usize {
        self.lock().waiters.len()
    }

    /// Run `refresh` unless one is already in flight, in which case wait for
    /// that one and return its outcome. `refresh` is only invoked by the
    /// caller that finds the coordinator idle.
    pub async fn run<F, Fut>(&self, refresh: F) -> Result<T, RefreshFailed>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, RefreshFailed>>,
    {
        let role = {
            let mut state = self.lock();
            if state.refreshing {
                let (tx, rx) = oneshot::channel();
                state.waiters.push(tx);
                Role::Waiter(rx)
            } else {
                state.refreshing = true;
                Role::Leader
            }
        };

        match role {
            Role::Waiter(rx) => {
                tracing::debug!("Refresh in flight, waiting for its outcome");
                rx.await.unwrap_or(Err(RefreshFailed::Abandoned))
            }
            Role::Leader => {
                let mut release = ReleaseGuard {
                    coordinator: self,
                    outcome: None,
                };
                let outcome = refresh().await;
                release.outcome = Some(outcome.clone());
                drop(release);
                outcome
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, CoordinatorState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Clone> Default for RefreshCoordinator<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for RefreshCoordinator<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("RefreshCoordinator")
            .field("refreshing", &state.refreshing)
            .field("waiters", &state.waiters.len())
            .finish()
    }
}

/// Clears `refreshing` and releases every waiter on all exit paths of the
/// leader, including cancellation and panics.
struct ReleaseGuard<'a, T: Clone> {
    coordinator: &'a RefreshCoordinator<T>,
    outcome: Option<Result<T, RefreshFailed>>,
}

impl<T: Clone> Drop for ReleaseGuard<'_, T> {
    fn drop(&mut self) {
        let waiters = {
            let mut state = self.coordinator.lock();
            state.refreshing = false;
            std::mem::take(&mut state.waiters)
        };

        let outcome = self.outcome.take().unwrap_or(Err(RefreshFailed::Abandoned));
        if !waiters.is_empty() {
            tracing::debug!(waiters = waiters.len(), ok = outcome.is_ok(), "Releasing refresh waiters");
        }
        for waiter in waiters {
            // A waiter whose caller went away is simply skipped
            let _ = waiter.send(outcome.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn coordinator_should_panic() -> bool {
        true
    }

    async fn wait_for_waiters(coordinator: &RefreshCoordinator<u32>, n: usize) {
        while coordinator.waiting() < n {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    #[tokio::test]
    async fn test_single_caller_refreshes() {
        let coordinator = RefreshCoordinator::new();
        let result = coordinator.run(|| async { Ok::<u32, RefreshFailed>(7) }).await;

        assert_eq!(result, Ok(7));
        assert!(!coordinator.is_refreshing());
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_refresh() {
        let coordinator = Arc::new(RefreshCoordinator::<u32>::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let (release_tx, release_rx) = oneshot::channel::<()>();

        let leader = {
            let coordinator = coordinator.clone();
            let calls = calls.clone();
            tokio::spawn(async move {
                coordinator
                    .run(|| async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        let _ = release_rx.await;
                        Ok(42)
                    })
                    .await
            })
        };

        while !coordinator.is_refreshing() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        let mut followers = Vec::new();
        for _ in 0..8 {
            let coordinator = coordinator.clone();
            let calls = calls.clone();
            followers.push(tokio::spawn(async move {
                coordinator
                    .run(|| async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(0)
                    })
                    .await
            }));
        }

        wait_for_waiters(&coordinator, 8).await;
        release_tx.send(()).unwrap();

        assert_eq!(leader.await.unwrap(), Ok(42));
        for follower in followers {
            assert_eq!(follower.await.unwrap(), Ok(42));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!coordinator.is_refreshing());
        assert_eq!(coordinator.waiting(), 0);
    }

    #[tokio::test]
    async fn test_failure_reaches_every_waiter() {
        let coordinator = Arc::new(RefreshCoordinator::<u32>::new());
        let (release_tx, release_rx) = oneshot::channel::<()>();

        let leader = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                coordinator
                    .run(|| async move {
                        let _ = release_rx.await;
                        Err(RefreshFailed::Rejected("revoked".to_string()))
                    })
                    .await
            })
        };

        while !coordinator.is_refreshing() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        let followers: Vec<_> = (0..4)
            .map(|_| {
                let coordinator = coordinator.clone();
                tokio::spawn(async move { coordinator.run(|| async { Ok(1) }).await })
            })
            .collect();

        wait_for_waiters(&coordinator, 4).await;
        release_tx.send(()).unwrap();

        let expected = Err(RefreshFailed::Rejected("revoked".to_string()));
        assert_eq!(leader.await.unwrap(), expected);
        for follower in followers {
            assert_eq!(follower.await.unwrap(), expected);
        }
    }

    #[tokio::test]
    async fn test_refresh_proceeds_after_failure() {
        let coordinator = RefreshCoordinator::<u32>::new();

        let first = coordinator
            .run(|| async { Err(RefreshFailed::Expired) })
            .await;
        assert_eq!(first, Err(RefreshFailed::Expired));
        assert!(!coordinator.is_refreshing());

        let second = coordinator.run(|| async { Ok(2) }).await;
        assert_eq!(second, Ok(2));
    }

    #[tokio::test]
    async fn test_dropped_leader_releases_waiters() {
        let coordinator = Arc::new(RefreshCoordinator::<u32>::new());

        let leader = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                coordinator
                    .run(|| async {
                        std::future::pending::<()>().await;
                        Ok(1)
                    })
                    .await
            })
        };

        while !coordinator.is_refreshing() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        let follower = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.run(|| async { Ok(9) }).await })
        };
        wait_for_waiters(&coordinator, 1).await;

        leader.abort();
        let _ = leader.await;

        assert_eq!(follower.await.unwrap(), Err(RefreshFailed::Abandoned));
        assert!(!coordinator.is_refreshing());

        // The coordinator is usable again
        assert_eq!(coordinator.run(|| async { Ok(3) }).await, Ok(3));
    }

    #[tokio::test]
    async fn test_panicking_refresh_clears_flag() {
        let coordinator = Arc::new(RefreshCoordinator::<u32>::new());

        let handle = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                coordinator
                    .run(|| async {
                        if coordinator_should_panic() {
                            panic!("refresh blew up");
                        }
                        Ok(0)
                    })
                    .await
            })
        };

        assert!(handle.await.unwrap_err().is_panic());
        assert!(!coordinator.is_refreshing());
    }
}
