//! Bounded single-worker task queue
//!
//! Tasks run one at a time in submission order on a dedicated tokio task.
//! Producers are throttled by a per-submit queue depth, and every task
//! carries a [`CancellationToken`] that lets callers withdraw it before it
//! starts.
//!
//! # Example
//!
//! ```ignore
//! use deskline_connection::executor::AsyncExecutor;
//!
//! let executor = AsyncExecutor::new("ticketing");
//! let token = executor.submit(async { refresh_ticket_counts().await }, 8).await;
//! // Changed our mind before the worker got to it
//! token.cancel();
//! ```

use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use deskline_core::Result;
use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[cfg(test)]
mod tests;

/// A unit of work accepted by the executor
pub type Task = BoxFuture<'static, Result<()>>;

struct QueuedTask {
    id: u64,
    task: Task,
    token: CancellationToken,
}

struct ExecutorInner {
    name: String,
    queue: Mutex<VecDeque<QueuedTask>>,
    running: AtomicBool,
    next_id: AtomicU64,
    /// Wakes the worker when a task is queued or the executor stops
    work_ready: Notify,
    /// Wakes submitters when the queue shrinks or the executor stops
    space_freed: Notify,
}

/// Single-consumer FIFO executor with bounded submission
pub struct AsyncExecutor {
    inner: Arc<ExecutorInner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for AsyncExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncExecutor")
            .field("name", &self.inner.name)
            .field("running", &self.is_running())
            .field("queue_size", &self.queue_size())
            .finish()
    }
}

impl AsyncExecutor {
    /// Create the executor and spawn its worker.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(name: impl Into<String>) -> Self {
        let inner = Arc::new(ExecutorInner {
            name: name.into(),
            queue: Mutex::new(VecDeque::new()),
            running: AtomicBool::new(true),
            next_id: AtomicU64::new(1),
            work_ready: Notify::new(),
            space_freed: Notify::new(),
        });

        let worker = tokio::spawn(run_worker(inner.clone()));
        tracing::debug!(executor = %inner.name, "async executor started");

        Self {
            inner,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Queue `task` and return its cancellation token.
    ///
    /// With `max_queue_depth == 0` the task is queued immediately. Otherwise
    /// this waits until fewer than `max_queue_depth` tasks are pending. If
    /// the executor is stopped, or stops while waiting, the task is dropped
    /// without running.
    pub async fn submit<F>(&self, task: F, max_queue_depth: usize) -> CancellationToken
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let token = CancellationToken::new();
        let mut task = Some(task.boxed());

        loop {
            let notified = self.inner.space_freed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut queue = self.inner.queue.lock();
                if !self.inner.running.load(Ordering::Acquire) {
                    tracing::debug!(executor = %self.inner.name, "executor stopped, dropping submitted task");
                    return token;
                }

                if max_queue_depth == 0 || queue.len() < max_queue_depth {
                    if let Some(task) = task.take() {
                        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
                        queue.push_back(QueuedTask {
                            id,
                            task,
                            token: token.clone(),
                        });
                        tracing::trace!(executor = %self.inner.name, task_id = id, pending = queue.len(), "task queued");
                    }
                    drop(queue);
                    self.inner.work_ready.notify_one();
                    return token;
                }
            }

            tracing::trace!(executor = %self.inner.name, max_queue_depth, "queue full, waiting");
            notified.await;
        }
    }

    /// Stop accepting work. Tasks already queued still run; the task in
    /// flight is not interrupted. Idempotent.
    pub fn stop(&self) {
        {
            let _queue = self.inner.queue.lock();
            if !self.inner.running.swap(false, Ordering::AcqRel) {
                return;
            }
        }
        tracing::debug!(executor = %self.inner.name, "async executor stopping");
        self.inner.work_ready.notify_one();
        self.inner.work_ready.notify_waiters();
        self.inner.space_freed.notify_waiters();
    }

    /// Wait for the worker to exit. Only meaningful after [`AsyncExecutor::stop`].
    pub async fn join(&self) {
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                tracing::error!(executor = %self.inner.name, error = %e, "executor worker failed");
            }
        }
    }

    /// Number of tasks waiting to run
    pub fn queue_size(&self) -> usize {
        self.inner.queue.lock().len()
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }
}

impl Drop for AsyncExecutor {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_worker(inner: Arc<ExecutorInner>) {
    loop {
        let next = loop {
            let notified = inner.work_ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut queue = inner.queue.lock();
                if let Some(next) = queue.pop_front() {
                    break Some(next);
                }
                if !inner.running.load(Ordering::Acquire) {
                    break None;
                }
            }

            notified.await;
        };

        let Some(QueuedTask { id, task, token }) = next else {
            break;
        };
        inner.space_freed.notify_waiters();

        if token.is_cancelled() {
            tracing::debug!(executor = %inner.name, task_id = id, "skipping cancelled task");
            continue;
        }

        match AssertUnwindSafe(task).catch_unwind().await {
            Ok(Ok(())) => {
                tracing::trace!(executor = %inner.name, task_id = id, "task completed");
            }
            Ok(Err(e)) => {
                tracing::warn!(executor = %inner.name, task_id = id, error = %e, "async task failed");
            }
            Err(panic) => {
                tracing::error!(
                    executor = %inner.name,
                    task_id = id,
                    panic = panic_message(panic.as_ref()),
                    "async task panicked"
                );
            }
        }
    }

    tracing::debug!(executor = %inner.name, "async executor worker exited");
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}
