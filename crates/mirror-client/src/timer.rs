//! Cancellable delayed tasks.

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Handle to a delayed task. Dropping or cancelling it guarantees the task never runs
/// (or, if it already started, is aborted at its next suspension point).
#[derive(Debug)]
pub struct ScheduledTask {
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    /// Run `task` now, tied to the lifetime of the returned handle.
    pub fn spawn<F>(task: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            handle: tokio::spawn(task),
        }
    }

    /// Run `task` after `delay`.
    pub fn after<F>(delay: Duration, task: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task.await;
        });
        Self { handle }
    }

    pub fn cancel(self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Slot holding at most one pending task; scheduling replaces (and cancels) the old one.
#[derive(Debug, Default)]
pub struct TaskSlot {
    task: std::sync::Mutex<Option<ScheduledTask>>,
}

impl TaskSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule<F>(&self, delay: Duration, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let next = ScheduledTask::after(delay, task);
        let previous = self
            .task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(next);
        drop(previous);
    }

    pub fn cancel(&self) {
        self.task.lock().unwrap_or_else(|e| e.into_inner()).take();
    }
}
