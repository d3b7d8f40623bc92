//! Interchangeable task-execution backends.
//!
//! Both variants count every accepted task before it is dispatched and keep
//! an active count around its execution, so saturation can be observed the
//! same way whichever model is configured:
//!
//! - [`BoundedPool`]: fixed worker threads draining a fixed-capacity FIFO
//!   queue. A full queue either suspends the submitter or rejects the task.
//! - [`PerTaskExecutor`]: one tokio task per submission, optionally capped
//!   by a concurrency ceiling that suspends the submitter until a slot frees.
//!
//! [`Executor`] selects one of the two at construction time.

mod bounded;
mod per_task;

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::Serialize;
use tokio::sync::Notify;

use crate::config::ExecutorConfig;
use crate::error::Result;

pub use crate::config::FullQueuePolicy;
pub use bounded::BoundedPool;
pub use per_task::PerTaskExecutor;

/// A unit of work accepted by an executor.
pub type Job = BoxFuture<'static, Result<()>>;

/// Point-in-time view of an executor's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutorStats {
    /// Tasks executing right now.
    pub active_threads: usize,
    /// Tasks accepted but not yet started.
    pub queue_depth: usize,
    /// Tasks accepted since construction.
    pub total_submitted: u64,
    /// Tasks that returned an error or panicked.
    pub failed: u64,
}

/// Counters shared between an executor and the tasks it runs.
#[derive(Debug, Default)]
pub(crate) struct TaskCounters {
    total: AtomicU64,
    active: AtomicUsize,
    pending: AtomicUsize,
    failed: AtomicU64,
    idle: Notify,
}

impl TaskCounters {
    /// Record a task accepted for execution.
    fn accept(&self) {
        self.pending.fetch_add(1, Ordering::SeqCst);
        self.total.fetch_add(1, Ordering::SeqCst);
    }

    fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    fn total(&self) -> u64 {
        self.total.load(Ordering::SeqCst)
    }

    fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Resolve once every accepted task has finished.
    async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.pending.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Keeps a task counted as active until dropped, including on panic.
struct ActiveGuard<'a> {
    counters: &'a TaskCounters,
}

impl<'a> ActiveGuard<'a> {
    fn enter(counters: &'a TaskCounters) -> Self {
        counters.active.fetch_add(1, Ordering::SeqCst);
        Self { counters }
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.counters.active.fetch_sub(1, Ordering::SeqCst);
        if self.counters.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.counters.idle.notify_waiters();
        }
    }
}

/// Run one accepted job, keeping the counters balanced whatever it does.
async fn run_tracked(counters: &TaskCounters, job: Job, executor: &str) {
    let _active = ActiveGuard::enter(counters);
    match AssertUnwindSafe(job).catch_unwind().await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            counters.failed.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(executor, error = %e, "task failed");
        }
        Err(_) => {
            counters.failed.fetch_add(1, Ordering::Relaxed);
            tracing::error!(executor, "task panicked");
        }
    }
}

/// An executor variant chosen once, at construction.
#[derive(Debug)]
pub enum Executor {
    /// Fixed worker threads with a bounded queue.
    Bounded(BoundedPool),
    /// One lightweight task per submission.
    PerTask(PerTaskExecutor),
}

impl Executor {
    /// Build the variant `config` describes.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidConfig`](crate::Error::InvalidConfig) if the sizes
    /// are unusable, [`Error::Io`](crate::Error::Io) if a worker thread cannot
    /// be spawned, or [`Error::NoRuntime`](crate::Error::NoRuntime) for a
    /// per-task executor built outside a tokio runtime.
    pub fn from_config(config: &ExecutorConfig) -> Result<Self> {
        config.validate()?;
        match config {
            ExecutorConfig::Bounded {
                workers,
                queue_capacity,
                policy,
                name_prefix,
            } => BoundedPool::new(*workers, *queue_capacity, *policy, name_prefix)
                .map(Executor::Bounded),
            ExecutorConfig::PerTask {
                concurrency_limit,
                name_prefix,
            } => PerTaskExecutor::new(*concurrency_limit, name_prefix).map(Executor::PerTask),
        }
    }

    /// Hand `task` to the executor.
    ///
    /// Resolves once the task is accepted, not when it finishes. Errors and
    /// panics inside the task are counted and logged, never returned here.
    ///
    /// # Errors
    ///
    /// [`Error::Overloaded`](crate::Error::Overloaded) from a rejecting bounded
    /// pool with a full queue, or
    /// [`Error::ExecutorShutdown`](crate::Error::ExecutorShutdown) after
    /// [`Executor::shutdown`].
    pub async fn submit<F>(&self, task: F) -> Result<()>
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        match self {
            Executor::Bounded(pool) => pool.submit(task).await,
            Executor::PerTask(exec) => exec.submit(task).await,
        }
    }

    #[must_use]
    pub fn active_count(&self) -> usize {
        self.counters().active()
    }

    #[must_use]
    pub fn total_count(&self) -> u64 {
        self.counters().total()
    }

    /// Tasks accepted or waiting for admission that have not started.
    #[must_use]
    pub fn queue_depth(&self) -> usize {
        match self {
            Executor::Bounded(pool) => pool.queue_depth(),
            Executor::PerTask(exec) => exec.waiting(),
        }
    }

    #[must_use]
    pub fn stats(&self) -> ExecutorStats {
        ExecutorStats {
            active_threads: self.active_count(),
            queue_depth: self.queue_depth(),
            total_submitted: self.total_count(),
            failed: self.counters().failed(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Executor::Bounded(pool) => pool.name(),
            Executor::PerTask(exec) => exec.name(),
        }
    }

    /// Wait until every accepted task has finished.
    pub async fn wait_idle(&self) {
        self.counters().wait_idle().await;
    }

    /// Stop accepting work. Already accepted tasks still run.
    pub async fn shutdown(&self) {
        match self {
            Executor::Bounded(pool) => pool.shutdown().await,
            Executor::PerTask(exec) => exec.shutdown(),
        }
    }

    fn counters(&self) -> &TaskCounters {
        match self {
            Executor::Bounded(pool) => pool.counters(),
            Executor::PerTask(exec) => exec.counters(),
        }
    }
}
