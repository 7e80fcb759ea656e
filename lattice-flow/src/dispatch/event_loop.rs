//! Event Loop
//!
//! Drives "dispatch later" on a tokio runtime: a background task waits until
//! something is deferred, then ticks the runtime. Handlers and compute
//! functions are synchronous and expected to be fast, so the tick runs
//! inline on the task.

use std::sync::Arc;

use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::runtime::Runtime;

/// Handle to a running event loop.
pub struct EventLoop {
    stop: Arc<Notify>,
    task: JoinHandle<()>,
}

/// Spawn the event loop for `runtime` on the current tokio runtime.
///
/// # Panics
///
/// Panics when called outside a tokio runtime.
pub fn spawn_event_loop(runtime: Runtime) -> EventLoop {
    let stop = Arc::new(Notify::new());
    let stopped = Arc::clone(&stop);

    let task = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = stopped.notified() => break,
                _ = runtime.deferred_ready() => {
                    if let Err(err) = runtime.tick() {
                        tracing::error!(error = %err, "event loop tick failed");
                    }
                }
            }
        }
        tracing::debug!("event loop stopped");
    });

    EventLoop { stop, task }
}

impl EventLoop {
    /// Stop after the tick in progress, if any, and wait for the task.
    pub async fn shutdown(self) {
        self.stop.notify_one();
        if let Err(err) = self.task.await {
            tracing::error!(error = %err, "event loop task failed");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
