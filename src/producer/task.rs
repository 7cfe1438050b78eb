//! Polling task bookkeeping shared by the built-in producers.

use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::warn;

struct PollingTask {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Holds at most one polling task and the signal used to stop it.
///
/// The task body receives a `watch::Receiver<bool>` that flips to `true`
/// when a stop is requested; the body is expected to push its final spill and
/// return.
#[derive(Default)]
pub(crate) struct PollingSlot {
    task: Mutex<Option<PollingTask>>,
    alive: Arc<AtomicBool>,
}

impl PollingSlot {
    /// Whether the task body is still executing.
    pub(crate) fn is_running(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Spawn `body` unless a task is already alive.
    ///
    /// A previous task that finished on its own is discarded.
    pub(crate) fn start<F, Fut>(&self, body: F) -> bool
    where
        F: FnOnce(watch::Receiver<bool>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut guard = self.task.lock();
        if guard.is_some() && self.is_running() {
            return false;
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let alive = Arc::clone(&self.alive);
        alive.store(true, Ordering::Release);
        let fut = body(stop_rx);
        let handle = tokio::spawn(async move {
            fut.await;
            alive.store(false, Ordering::Release);
        });

        *guard = Some(PollingTask { stop_tx, handle });
        true
    }

    /// Signal the task and wait for it to finish.
    ///
    /// Returns `true` if the task was still alive when asked to stop.
    pub(crate) async fn stop(&self) -> bool {
        let was_alive = self.is_running();
        let Some(task) = self.task.lock().take() else {
            return false;
        };

        // The receiver is gone if the body already returned
        let _ = task.stop_tx.send(true);
        if let Err(e) = task.handle.await {
            warn!(error = %e, "polling task ended abnormally");
            self.alive.store(false, Ordering::Release);
        }
        was_alive
    }
}
