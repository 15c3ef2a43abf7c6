// Timer primitives: schedule-after-delay, cancel, and scoped teardown

use std::{
    future::Future,
    sync::{Arc, Mutex},
    time::Duration,
};

use log::debug;
use tokio::task::{AbortHandle, JoinHandle};

/// Handle to a single scheduled task. Cancelling a task that already ran is a no-op.
#[derive(Clone, Debug)]
pub struct TimerHandle {
    abort: AbortHandle,
}

impl TimerHandle {
    pub fn cancel(&self) {
        self.abort.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.abort.is_finished()
    }
}

/// Owns every timer and background task spawned on behalf of a component.
///
/// Dropping the scope (or calling [`TaskScope::shutdown`]) aborts all tasks it
/// still owns, which is how toasts, upload resets and report polling are torn
/// down deterministically when their owner goes away.
#[derive(Clone, Default)]
pub struct TaskScope {
    inner: Arc<ScopeInner>,
}

#[derive(Default)]
struct ScopeInner {
    tasks: Mutex<Vec<AbortHandle>>,
}

impl TaskScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` once `delay` has elapsed.
    pub fn schedule<F>(&self, delay: Duration, task: F) -> TimerHandle
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.spawn(async move {
            tokio::time::sleep(delay).await;
            task.await;
        })
    }

    /// Spawn a background task owned by this scope.
    pub fn spawn<F>(&self, task: F) -> TimerHandle
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle: JoinHandle<()> = tokio::spawn(task);
        let abort = handle.abort_handle();
        if let Ok(mut tasks) = self.inner.tasks.lock() {
            // forget tasks that already completed so the list stays short
            tasks.retain(|t| !t.is_finished());
            tasks.push(abort.clone());
        }
        TimerHandle { abort }
    }

    /// Number of tasks that have not finished yet.
    pub fn pending(&self) -> usize {
        self.inner
            .tasks
            .lock()
            .map(|tasks| tasks.iter().filter(|t| !t.is_finished()).count())
            .unwrap_or(0)
    }

    pub fn shutdown(&self) {
        self.inner.shutdown();
    }
}

impl ScopeInner {
    fn shutdown(&self) {
        if let Ok(mut tasks) = self.tasks.lock() {
            debug!("Cancelling {} scoped tasks", tasks.len());
            for task in tasks.drain(..) {
                task.abort();
            }
        }
    }
}

impl Drop for ScopeInner {
    fn drop(&mut self) {
        self.shutdown();
    }
}
