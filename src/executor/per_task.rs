use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use futures::FutureExt;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;

use super::{TaskCounters, run_tracked};
use crate::error::{Error, Result};

/// One tokio task per submission.
///
/// Without a ceiling every submission is admitted at once. With one, a
/// submitter that finds every slot taken suspends until a running task
/// finishes; there is no queue, so no head-of-line blocking.
pub struct PerTaskExecutor {
    name: String,
    runtime: Handle,
    limit: Option<Arc<Semaphore>>,
    ceiling: Option<usize>,
    waiting: AtomicUsize,
    closed: AtomicBool,
    counters: Arc<TaskCounters>,
}

impl PerTaskExecutor {
    /// Executor spawning onto the current tokio runtime.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidConfig`] for a zero ceiling, [`Error::NoRuntime`]
    /// outside a runtime.
    pub fn new(concurrency_limit: Option<usize>, name_prefix: &str) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|_| Error::NoRuntime)?;
        Self::with_handle(runtime, concurrency_limit, name_prefix)
    }

    /// Executor spawning onto `runtime`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidConfig`] for a zero ceiling.
    pub fn with_handle(
        runtime: Handle,
        concurrency_limit: Option<usize>,
        name_prefix: &str,
    ) -> Result<Self> {
        if concurrency_limit == Some(0) {
            return Err(Error::InvalidConfig(
                "concurrency limit must be positive when set".into(),
            ));
        }
        Ok(Self {
            name: name_prefix.trim_end_matches('-').to_string(),
            runtime,
            limit: concurrency_limit.map(|n| Arc::new(Semaphore::new(n))),
            ceiling: concurrency_limit,
            waiting: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            counters: Arc::new(TaskCounters::default()),
        })
    }

    /// Spawn `task`, first waiting for a free slot if a ceiling is set.
    ///
    /// # Errors
    ///
    /// [`Error::ExecutorShutdown`] once shut down.
    pub async fn submit<F>(&self, task: F) -> Result<()>
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::ExecutorShutdown);
        }

        let permit = match &self.limit {
            Some(semaphore) => {
                let acquired = {
                    let _waiting = WaitingGuard::enter(&self.waiting);
                    semaphore.clone().acquire_owned().await
                };
                Some(acquired.map_err(|_| Error::ExecutorShutdown)?)
            }
            None => None,
        };

        self.counters.accept();
        let counters = self.counters.clone();
        let name = self.name.clone();
        let job = task.boxed();
        self.runtime.spawn(async move {
            let _permit = permit;
            run_tracked(&counters, job, &name).await;
        });
        Ok(())
    }

    /// Submitters currently suspended on the concurrency ceiling.
    #[must_use]
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn concurrency_limit(&self) -> Option<usize> {
        self.ceiling
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn counters(&self) -> &TaskCounters {
        &self.counters
    }

    /// Refuse new submissions and wake suspended submitters with an error.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        if let Some(semaphore) = &self.limit {
            semaphore.close();
        }
    }
}

/// Counts a suspended submitter, including one whose future is dropped.
struct WaitingGuard<'a>(&'a AtomicUsize);

impl<'a> WaitingGuard<'a> {
    fn enter(waiting: &'a AtomicUsize) -> Self {
        waiting.fetch_add(1, Ordering::SeqCst);
        Self(waiting)
    }
}

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for PerTaskExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PerTaskExecutor")
            .field("name", &self.name)
            .field("concurrency_limit", &self.ceiling)
            .field("waiting", &self.waiting())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_requires_runtime() {
        assert!(matches!(
            PerTaskExecutor::new(None, "x-"),
            Err(Error::NoRuntime)
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_ceiling_limits_concurrency() {
        let exec = Arc::new(PerTaskExecutor::new(Some(3), "capped-").unwrap());
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for _ in 0..30 {
            let running = running.clone();
            let peak = peak.clone();
            exec.submit(async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            })
            .await
            .unwrap();
        }
        exec.counters().wait_idle().await;

        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(exec.counters().total(), 30);
        assert_eq!(exec.counters().active(), 0);
        assert_eq!(exec.waiting(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_submitter_suspends_at_ceiling() {
        let exec = Arc::new(PerTaskExecutor::new(Some(1), "one-").unwrap());
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        exec.submit(async move {
            let _ = release_rx.await;
            Ok(())
        })
        .await
        .unwrap();

        let suspended = {
            let exec = exec.clone();
            tokio::spawn(async move { exec.submit(async { Ok(()) }).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!suspended.is_finished());
        assert_eq!(exec.waiting(), 1);

        release_tx.send(()).unwrap();
        suspended.await.unwrap().unwrap();
        exec.counters().wait_idle().await;
        assert_eq!(exec.counters().total(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_abandoned_submit_is_not_counted() {
        let exec = PerTaskExecutor::new(Some(1), "abandon-").unwrap();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        exec.submit(async move {
            let _ = release_rx.await;
            Ok(())
        })
        .await
        .unwrap();

        let result =
            tokio::time::timeout(Duration::from_millis(20), exec.submit(async { Ok(()) })).await;
        assert!(result.is_err());
        assert_eq!(exec.waiting(), 0);

        let _ = release_tx.send(());
        exec.counters().wait_idle().await;
        assert_eq!(exec.counters().total(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_shutdown_wakes_waiters() {
        let exec = Arc::new(PerTaskExecutor::new(Some(1), "wake-").unwrap());
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        exec.submit(async move {
            let _ = release_rx.await;
            Ok(())
        })
        .await
        .unwrap();

        let suspended = {
            let exec = exec.clone();
            tokio::spawn(async move { exec.submit(async { Ok(()) }).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        exec.shutdown();

        assert_eq!(suspended.await.unwrap(), Err(Error::ExecutorShutdown));
        let _ = release_tx.send(());
        exec.counters().wait_idle().await;
        assert_eq!(exec.counters().total(), 1);
    }
}
