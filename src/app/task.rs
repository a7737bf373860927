// SPDX-License-Identifier: GPL-3.0-only

//! The single cancellable background task the orchestrator runs at a time

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Default)]
struct CancelInner {
    flag: AtomicBool,
    notify: Notify,
}

/// Cooperative cancellation flag shared between a task and its owner
///
/// Synchronous loops poll [`is_cancelled`](Self::is_cancelled); async code
/// can await [`cancelled`](Self::cancelled).
#[derive(Clone, Default)]
pub struct CancelSignal {
    inner: Arc<CancelInner>,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.flag.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.flag.load(Ordering::SeqCst)
    }

    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

impl std::fmt::Debug for CancelSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelSignal")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// What the running background task is doing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Preview,
    StillCapture,
    Recording,
}

struct RunningTask {
    kind: TaskKind,
    cancel: CancelSignal,
    handle: JoinHandle<()>,
}

/// Holds at most one background task
///
/// Starting a new task requires the previous one to have been cancelled and
/// joined, so two tasks never drive the pipeline at once.
#[derive(Default)]
pub struct TaskSlot {
    current: Option<RunningTask>,
    generation: u64,
}

impl TaskSlot {
    pub fn new() -> Self {
        Self::default()
    }


    /// Spawn `task`, handing it the cancel signal it must honour
    pub fn start<F, Fut>(&mut self, kind: TaskKind, task: F) -> u64
    where
        F: FnOnce(CancelSignal) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if let Some(previous) = self.current.take() {
            warn!(previous = ?previous.kind, "Starting a task without joining the previous one");
            previous.cancel.cancel();
            previous.handle.abort();
        }

        let cancel = CancelSignal::new();
        let handle = tokio::spawn(task(cancel.clone()));
        self.generation += 1;
        debug!(?kind, generation = self.generation, "Task started");
        self.current = Some(RunningTask {
            kind,
            cancel,
            handle,
        });
        self.generation
    }

    /// Signal the running task to stop and wait until it has
    pub async fn cancel_and_join(&mut self) -> Option<TaskKind> {
        let running = self.current.take()?;
        running.cancel.cancel();
        if let Err(e) = running.handle.await {
            if e.is_panic() {
                warn!(kind = ?running.kind, "Background task panicked");
            }
        }
        debug!(kind = ?running.kind, "Task joined");
        Some(running.kind)
    }
}

impl Drop for TaskSlot {
    fn drop(&mut self) {
        // The task finishes its own cleanup once it sees the signal
        if let Some(running) = self.current.take() {
            running.cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    #[tokio::test]
    async fn test_cancelled_resolves_after_cancel() {
        let signal = CancelSignal::new();
        let waiter = {
            let signal = signal.clone();
            tokio::spawn(async move { signal.cancelled().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        signal.cancel();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        // Already cancelled: returns immediately
        signal.cancelled().await;
    }

    #[tokio::test]
    async fn test_cancel_and_join_waits_for_task() {
        let finished = Arc::new(AtomicU32::new(0));
        let mut slot = TaskSlot::new();
        let counter = finished.clone();
        let generation = slot.start(TaskKind::Preview, move |cancel| async move {
            cancel.cancelled().await;
            tokio::time::sleep(Duration::from_millis(20)).await;
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(generation, 1);

        assert_eq!(slot.cancel_and_join().await, Some(TaskKind::Preview));
        assert_eq!(finished.load(Ordering::SeqCst), 1);
        assert_eq!(slot.cancel_and_join().await, None);
    }

    #[tokio::test]
    async fn test_generation_increments() {
        let mut slot = TaskSlot::new();
        slot.start(TaskKind::Preview, |_| async {});
        slot.cancel_and_join().await;
        let generation = slot.start(TaskKind::Recording, |_| async {});
        assert_eq!(generation, 2);
        assert_eq!(slot.cancel_and_join().await, Some(TaskKind::Recording));
    }
}
