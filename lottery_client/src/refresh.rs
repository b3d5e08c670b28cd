//! Single-flight coordination of access token refreshes.
//!
//! When many in-flight requests hit `401 Unauthorized` at once, only the
//! first caller (the leader) talks to the refresh endpoint. Everyone else
//! parks on a oneshot channel and receives the leader's outcome.

use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;

/// Why a refresh did not produce a new access token
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RefreshError {
    /// The server refused the refresh credential
    #[error("Refresh rejected by server (status {0})")]
    Rejected(u16),

    /// No refresh credential is held
    #[error("No refresh credential available")]
    NoCredential,

    /// Transport or decoding failure during the refresh call
    #[error("Refresh failed: {0}")]
    Failed(String),

    /// The leader was dropped before finishing
    #[error("Refresh abandoned")]
    Abandoned,
}

type Outcome = Result<String, RefreshError>;

#[derive(Default)]
struct State {
    in_progress: bool,
    waiters: Vec<oneshot::Sender<Outcome>>,
}

/// Collapses concurrent refresh attempts into one call
///
/// Owned by one HTTP client instance; never shared between clients.
#[derive(Default)]
pub struct RefreshCoordinator {
    state: Mutex<State>,
}

/// Role of a caller that asked for a refresh
pub enum Ticket<'a> {
    /// Must perform the refresh and report through the guard
    Leader(LeaderGuard<'a>),
    /// Waits for the leader's outcome
    Waiter(oneshot::Receiver<Outcome>),
}

/// Held by the leader while the refresh call is in flight
///
/// Dropping it without [`LeaderGuard::finish`] releases the in-progress flag
/// and rejects every waiter with [`RefreshError::Abandoned`].
pub struct LeaderGuard<'a> {
    coordinator: &'a RefreshCoordinator,
    finished: bool,
}

impl LeaderGuard<'_> {
    /// Hand the outcome to every waiter and release the in-progress flag
    pub fn finish(mut self, outcome: Outcome) {
        self.finished = true;
        self.coordinator.complete(outcome);
    }
}

impl Drop for LeaderGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.coordinator.complete(Err(RefreshError::Abandoned));
        }
    }
}

impl RefreshCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // State stays consistent across a panic: flag and waiters are updated together
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Become the leader if no refresh is in flight, otherwise queue up
    pub fn join(&self) -> Ticket<'_> {
        let mut state = self.lock();
        if state.in_progress {
            let (tx, rx) = oneshot::channel();
            state.waiters.push(tx);
            Ticket::Waiter(rx)
        } else {
            state.in_progress = true;
            Ticket::Leader(LeaderGuard {
                coordinator: self,
                finished: false,
            })
        }
    }

    fn complete(&self, outcome: Outcome) {
        let waiters = {
            let mut state = self.lock();
            state.in_progress = false;
            std::mem::take(&mut state.waiters)
        };

        log::debug!("Refresh settled for {} waiter(s)", waiters.len());
        for waiter in waiters {
            // A waiter whose caller went away has nothing to receive
            let _ = waiter.send(outcome.clone());
        }
    }

    /// Run `refresh` once for every caller currently asking
    ///
    /// The leader awaits `refresh`; waiters get a copy of its outcome.
    pub async fn run<F, Fut>(&self, refresh: F) -> Outcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Outcome>,
    {
        match self.join() {
            Ticket::Leader(guard) => {
                let outcome = refresh().await;
                guard.finish(outcome.clone());
                outcome
            }
            Ticket::Waiter(rx) => rx.await.unwrap_or(Err(RefreshError::Abandoned)),
        }
    }

    /// Whether a refresh is in flight
    pub fn is_refreshing(&self) -> bool {
        self.lock().in_progress
    }

    /// Number of callers parked behind the current leader
    pub fn waiting(&self) -> usize {
        self.lock().waiters.len()
    }
}
