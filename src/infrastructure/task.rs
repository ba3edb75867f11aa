//! Cancellable background tasks with an explicit stop.

use std::future::Future;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// A spawned recurring task paired with its shutdown signal.
///
/// Dropping a `BackgroundTask` without calling [`BackgroundTask::stop`] still
/// signals shutdown (the sender is dropped), but only `stop` waits for the task
/// to finish.
pub struct BackgroundTask {
    name: &'static str,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl BackgroundTask {
    /// Spawns `body`, handing it a receiver that flips to `true` on shutdown.
    pub fn spawn<F, Fut>(name: &'static str, body: F) -> Self
    where
        F: FnOnce(watch::Receiver<bool>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (shutdown, rx) = watch::channel(false);
        let handle = tokio::spawn(body(rx));
        tracing::debug!(task = name, "Background task started");
        Self {
            name,
            shutdown,
            handle,
        }
    }

    /// Signals shutdown and waits for the task to exit.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.handle.await {
            tracing::warn!(task = self.name, error = %e, "Background task ended abnormally");
        } else {
            tracing::debug!(task = self.name, "Background task stopped");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Resolves once `rx` observes `true` or its sender is dropped.
pub async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}
