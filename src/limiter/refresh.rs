//! Background re-polling of the limit source.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::{update, with_rollback};
use crate::budget::MemoryBudget;
use crate::provider::{Provider, no_limit_as_max};

/// Longest uninterrupted sleep; bounds how late a cancellation is noticed.
const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// Stops refresh threads started with it.
///
/// Clones share state: cancelling any clone cancels all of them.
#[derive(Clone, Default)]
pub struct CancellationToken {
    inner: Arc<TokenInner>,
}

#[derive(Default)]
struct TokenInner {
    cancelled: AtomicBool,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signals every refresh thread using this token to stop.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Waits for every refresh thread started with this token to exit.
    ///
    /// Call after [`cancel`](Self::cancel); otherwise this blocks forever.
    pub fn wait(&self) {
        let workers = std::mem::take(
            &mut *self
                .inner
                .workers
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        for worker in workers {
            if worker.join().is_err() {
                warn!("memory limit refresh thread panicked");
            }
        }
    }

    fn register(&self, worker: JoinHandle<()>) {
        self.inner
            .workers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(worker);
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Starts a refresh thread and registers it with `token`.
pub(super) fn spawn(
    provider: Arc<dyn Provider>,
    budget: Arc<dyn MemoryBudget>,
    interval: Duration,
    token: CancellationToken,
) {
    let worker_token = token.clone();
    let spawned = thread::Builder::new()
        .name("memlimit-refresh".to_string())
        .spawn(move || run(provider, budget, interval, worker_token));

    match spawned {
        Ok(worker) => token.register(worker),
        Err(e) => error!(error = %e, "failed to start memory limit refresh"),
    }
}

fn run(
    provider: Arc<dyn Provider>,
    budget: Arc<dyn MemoryBudget>,
    interval: Duration,
    token: CancellationToken,
) {
    let provider = no_limit_as_max(provider);
    info!(interval_ms = interval.as_millis() as u64, "memory limit refresh started");

    while sleep_until_tick(interval, &token) {
        let snapshot = budget.memory_limit();
        let result = with_rollback(budget.as_ref(), snapshot, || {
            update(budget.as_ref(), snapshot, &provider)
        });
        if let Err(e) = result {
            error!(error = %e, "failed to refresh memory limit");
        }
    }

    debug!("memory limit refresh stopped");
}

/// Sleeps for `interval`, returning `false` as soon as `token` is cancelled.
fn sleep_until_tick(interval: Duration, token: &CancellationToken) -> bool {
    let mut remaining = interval;
    while remaining > Duration::ZERO {
        if token.is_cancelled() {
            return false;
        }
        let step = remaining.min(SLEEP_SLICE);
        thread::sleep(step);
        remaining = remaining.saturating_sub(step);
    }
    !token.is_cancelled()
}
