//! Registry of spawned units of work so shutdown can wait for them.

// std Mutex: the lock is never held across an await point.
use std::{
    future::Future,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use tokio::task::{AbortHandle, JoinHandle};
use tracing::{error, info, warn};

#[derive(Clone, Default)]
pub struct BackgroundTasks {
    handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl BackgroundTasks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns `future` and tracks its handle.
    ///
    /// The handle is registered before this returns, so even a task that
    /// finishes immediately is seen by `shutdown`.
    pub fn spawn<F>(&self, future: F) -> AbortHandle
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(future);
        let abort = handle.abort_handle();
        let mut guard = self.lock();
        guard.retain(|h| !h.is_finished());
        guard.push(handle);
        abort
    }

    /// Like `spawn`, but an `Err` returned by the task is logged under `label`.
    pub fn spawn_logged<F>(&self, label: &'static str, future: F)
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.spawn(async move {
            if let Err(err) = future.await {
                error!(task = label, error = %format!("{err:#}"), "background task failed");
            }
        });
    }

    pub fn pending_count(&self) -> usize {
        let mut guard = self.lock();
        guard.retain(|h| !h.is_finished());
        guard.len()
    }

    /// Waits up to `grace` for every tracked task, then aborts the stragglers.
    pub async fn shutdown(&self, grace: Duration) {
        let handles = std::mem::take(&mut *self.lock());
        let count = handles.len();
        if count == 0 {
            return;
        }

        info!(count, "waiting for background tasks");
        let deadline = tokio::time::Instant::now() + grace;
        let mut aborted = 0usize;
        for mut handle in handles {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) if err.is_panic() => warn!(error = %err, "background task panicked"),
                // cancelled through its AbortHandle
                Ok(Err(_)) => {}
                Err(_) => {
                    handle.abort();
                    aborted += 1;
                }
            }
        }
        if aborted > 0 {
            warn!(aborted, "aborted background tasks still running after grace period");
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.handles
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
#[path = "tests/background_tests.rs"]
mod tests;
