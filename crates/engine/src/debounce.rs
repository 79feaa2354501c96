//! Per-key cancellable delayed writes.
//!
//! Scheduling a key replaces its pending task instead of stacking a second
//! timer. Cancelling only stops a task that is still waiting; one that has
//! started its write runs to completion. Use [`Debouncer::cancel_and_wait`]
//! before deleting a key so no in-flight write lands afterwards.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::trace;

struct PendingTask {
    cancel: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

#[derive(Default)]
pub struct Debouncer {
    pending: HashMap<String, PendingTask>,
}

impl Debouncer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `write` after `delay` unless `key` is rescheduled or cancelled first.
    ///
    /// Dropping the debouncer does not cancel anything: waiting tasks finish
    /// their delay and write.
    pub fn schedule<F>(&mut self, key: impl Into<String>, delay: Duration, write: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let key = key.into();
        self.cancel(&key);
        self.pending.retain(|_, task| !task.handle.is_finished());

        let (cancel, mut cancelled) = oneshot::channel::<()>();
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            let sleep = tokio::time::sleep(delay);
            tokio::pin!(sleep);
            tokio::select! {
                _ = &mut sleep => {}
                res = &mut cancelled => {
                    if res.is_ok() {
                        trace!(key = %task_key, "debounced write cancelled");
                        return;
                    }
                    sleep.await;
                }
            }
            write.await;
        });
        self.pending.insert(key, PendingTask { cancel, handle });
    }

    /// Returns true if a waiting task was stopped.
    pub fn cancel(&mut self, key: &str) -> bool {
        match self.pending.remove(key) {
            Some(task) => {
                let waiting = !task.handle.is_finished();
                let _ = task.cancel.send(());
                waiting
            }
            None => false,
        }
    }

    /// Cancel `key` and wait until its task is gone. A write that already
    /// started has landed by the time this returns.
    pub async fn cancel_and_wait(&mut self, key: &str) {
        if let Some(PendingTask { cancel, handle }) = self.pending.remove(key) {
            let _ = cancel.send(());
            if let Err(e) = handle.await {
                trace!(key, error = %e, "debounced task ended abnormally");
            }
        }
    }

    pub fn cancel_all(&mut self) {
        for (_, task) in self.pending.drain() {
            let _ = task.cancel.send(());
        }
    }

    pub fn is_pending(&self, key: &str) -> bool {
        self.pending
            .get(key)
            .is_some_and(|task| !task.handle.is_finished())
    }

    pub fn pending_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, task)| !task.handle.is_finished())
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Wait for every scheduled task to finish without cancelling any.
    pub async fn settle(&mut self) {
        for (_, task) in self.pending.drain() {
            let PendingTask { cancel, handle } = task;
            // Keep the sender alive so the task sees a plain timeout.
            let _ = handle.await;
            drop(cancel);
        }
    }
}
