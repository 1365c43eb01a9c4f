//! Strictly ordered task execution for a queue and its consumers.
//!
//! Every piece of delivery work for a queue (dispatch passes, chunk
//! continuations, browse passes) runs on that queue's executor, one task at a
//! time, so two deliveries to the same consumer never race on a write.

use std::{
    fmt,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use tokio::sync::{mpsc, oneshot};
use tracing::{error, warn};

pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Runs submitted tasks one after another, in submission order.
pub trait Executor: Send + Sync + fmt::Debug {
    fn execute(&self, task: Task);
}

/// Wait until every task submitted to `executor` before this call has run.
///
/// Returns `false` if `timeout` elapsed first.
pub async fn drain(executor: &dyn Executor, timeout: Duration) -> bool {
    let (done, finished) = oneshot::channel();
    executor.execute(Box::new(move || {
        let _ = done.send(());
    }));

    matches!(tokio::time::timeout(timeout, finished).await, Ok(Ok(())))
}

/// A single-task serial executor on the current tokio runtime.
pub struct SerialExecutor {
    name: String,
    sender: mpsc::UnboundedSender<Task>,
    pending: Arc<AtomicUsize>,
}

impl SerialExecutor {
    /// Spawn the worker task.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a tokio runtime.
    #[must_use]
    pub fn spawn(name: impl Into<String>) -> Arc<Self> {
        let name = name.into();
        let (sender, mut receiver) = mpsc::unbounded_channel::<Task>();
        let pending = Arc::new(AtomicUsize::new(0));

        let worker_pending = pending.clone();
        let worker_name = name.clone();
        tokio::spawn(async move {
            while let Some(task) = receiver.recv().await {
                if catch_unwind(AssertUnwindSafe(task)).is_err() {
                    error!(executor = %worker_name, "Executor task panicked");
                }
                worker_pending.fetch_sub(1, Ordering::AcqRel);
            }
        });

        Arc::new(Self {
            name,
            sender,
            pending,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of submitted tasks that have not finished yet.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Wait until no task is queued or running, including tasks submitted by
    /// other tasks while waiting.
    ///
    /// Returns `false` if `timeout` elapsed first.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, async {
            while self.pending() > 0 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .is_ok()
    }
}

impl Executor for SerialExecutor {
    fn execute(&self, task: Task) {
        self.pending.fetch_add(1, Ordering::AcqRel);
        if self.sender.send(task).is_err() {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            warn!(executor = %self.name, "Executor has shut down, dropping task");
        }
    }
}

impl fmt::Debug for SerialExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialExecutor")
            .field("name", &self.name)
            .field("pending", &self.pending())
            .finish_non_exhaustive()
    }
}
