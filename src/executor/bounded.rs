use std::future::Future;
use std::sync::Arc;
use std::thread::JoinHandle;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::{Job, TaskCounters, run_tracked};
use crate::config::FullQueuePolicy;
use crate::error::{Error, Result};

/// Fixed worker threads draining a fixed-capacity FIFO queue.
///
/// Each worker is an OS thread named `{prefix}{n}` driving its own
/// single-threaded tokio runtime, so a CPU-bound job occupies exactly one
/// worker and never the submitter's runtime. Jobs start in submission order.
pub struct BoundedPool {
    name: String,
    capacity: usize,
    policy: FullQueuePolicy,
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    counters: Arc<TaskCounters>,
}

impl BoundedPool {
    /// Spawn `workers` threads sharing a queue of `capacity` jobs.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidConfig`] for zero workers or capacity, [`Error::Io`]
    /// if a thread cannot be spawned.
    pub fn new(
        workers: usize,
        capacity: usize,
        policy: FullQueuePolicy,
        name_prefix: &str,
    ) -> Result<Self> {
        if workers == 0 || capacity == 0 {
            return Err(Error::InvalidConfig(
                "bounded pool needs workers and queue capacity".into(),
            ));
        }

        let (sender, receiver) = mpsc::channel::<Job>(capacity);
        let receiver = Arc::new(Mutex::new(receiver));
        let counters = Arc::new(TaskCounters::default());
        let name = name_prefix.trim_end_matches('-').to_string();

        let mut handles = Vec::with_capacity(workers);
        for index in 1..=workers {
            let receiver = receiver.clone();
            let counters = counters.clone();
            let pool = name.clone();
            let handle = std::thread::Builder::new()
                .name(format!("{name_prefix}{index}"))
                .spawn(move || worker_loop(&pool, &receiver, &counters))?;
            handles.push(handle);
        }

        tracing::debug!(pool = %name, workers, capacity, ?policy, "bounded pool started");
        Ok(Self {
            name,
            capacity,
            policy,
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(handles),
            counters,
        })
    }

    /// Queue `task`, applying the full-queue policy.
    ///
    /// # Errors
    ///
    /// [`Error::Overloaded`] when the queue is full under
    /// [`FullQueuePolicy::Reject`], [`Error::ExecutorShutdown`] once the pool
    /// is shut down.
    pub async fn submit<F>(&self, task: F) -> Result<()>
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let sender = self.sender.lock().clone().ok_or(Error::ExecutorShutdown)?;

        let permit = match self.policy {
            FullQueuePolicy::Block => sender
                .reserve()
                .await
                .map_err(|_| Error::ExecutorShutdown)?,
            FullQueuePolicy::Reject => match sender.try_reserve() {
                Ok(permit) => permit,
                Err(TrySendError::Full(())) => {
                    tracing::debug!(pool = %self.name, capacity = self.capacity, "queue full, rejecting");
                    return Err(Error::Overloaded {
                        capacity: self.capacity,
                    });
                }
                Err(TrySendError::Closed(())) => return Err(Error::ExecutorShutdown),
            },
        };

        self.counters.accept();
        permit.send(task.boxed());
        Ok(())
    }

    /// Jobs waiting in the queue.
    #[must_use]
    pub fn queue_depth(&self) -> usize {
        self.sender
            .lock()
            .as_ref()
            .map_or(0, |s| s.max_capacity() - s.capacity())
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn policy(&self) -> FullQueuePolicy {
        self.policy
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of worker threads still attached to the pool.
    #[must_use]
    pub fn workers(&self) -> usize {
        self.workers.lock().len()
    }

    pub(crate) fn counters(&self) -> &TaskCounters {
        &self.counters
    }

    /// Close the queue, let workers drain it, then join them.
    pub async fn shutdown(&self) {
        drop(self.sender.lock().take());
        let handles: Vec<_> = self.workers.lock().drain(..).collect();
        if handles.is_empty() {
            return;
        }
        let pool = self.name.clone();
        let joined = tokio::task::spawn_blocking(move || {
            for handle in handles {
                if handle.join().is_err() {
                    tracing::error!(pool = %pool, "worker thread panicked");
                }
            }
        })
        .await;
        if joined.is_err() {
            tracing::warn!(pool = %self.name, "failed to join worker threads");
        }
        tracing::debug!(pool = %self.name, "bounded pool stopped");
    }
}

impl Drop for BoundedPool {
    fn drop(&mut self) {
        // Workers exit on their own once the queue is closed and drained.
        drop(self.sender.lock().take());
    }
}

impl std::fmt::Debug for BoundedPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedPool")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("policy", &self.policy)
            .field("queue_depth", &self.queue_depth())
            .finish_non_exhaustive()
    }
}

fn worker_loop(pool: &str, receiver: &Mutex<mpsc::Receiver<Job>>, counters: &TaskCounters) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!(pool, error = %e, "worker runtime failed to start");
            return;
        }
    };

    loop {
        // Only one idle worker waits on the channel; the rest wait on the lock.
        let job = receiver.lock().blocking_recv();
        match job {
            Some(job) => runtime.block_on(run_tracked(counters, job, pool)),
            None => break,
        }
    }
}
