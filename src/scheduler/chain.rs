use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

type StageFn = Box<dyn FnOnce() -> BoxFuture<'static, Result<()>> + Send>;

struct Stage {
    delay: Duration,
    task: StageFn,
}

/// An ordered sequence of delayed stages run by a single coordinator task.
///
/// Each stage waits for its delay after the previous stage finished, then
/// runs. Stages never overlap. A failing stage is logged and the chain moves
/// on to the next one.
///
/// ```rust,ignore
/// let handle = TaskChain::new()
///     .then(Duration::ZERO, || async { announce_round().await })
///     .then(Duration::from_secs(2), || async { close_round().await })
///     .start()?;
/// let stages_run = handle.join().await;
/// ```
#[derive(Default)]
pub struct TaskChain {
    stages: Vec<Stage>,
}

impl TaskChain {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stage that runs `delay` after the previous one completes.
    #[must_use]
    pub fn then<F, Fut>(mut self, delay: Duration, task: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.stages.push(Stage {
            delay,
            task: Box::new(move || task().boxed()),
        });
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Spawn the coordinator. Consuming `self` means a chain runs at most once.
    ///
    /// # Errors
    ///
    /// [`Error::NoRuntime`] outside a tokio runtime.
    pub fn start(self) -> Result<ChainHandle> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| Error::NoRuntime)?;
        let token = CancellationToken::new();
        let completed = Arc::new(AtomicUsize::new(0));

        let task = runtime.spawn(coordinate(self.stages, token.clone(), completed.clone()));
        Ok(ChainHandle {
            token,
            completed,
            task,
        })
    }
}

async fn coordinate(
    stages: Vec<Stage>,
    token: CancellationToken,
    completed: Arc<AtomicUsize>,
) -> usize {
    let total = stages.len();
    for (index, stage) in stages.into_iter().enumerate() {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(stage.delay) => {}
        }
        if token.is_cancelled() {
            break;
        }

        match AssertUnwindSafe(async move { (stage.task)().await })
            .catch_unwind()
            .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(stage = index, error = %e, "chain stage failed"),
            Err(_) => tracing::error!(stage = index, "chain stage panicked"),
        }
        completed.fetch_add(1, Ordering::Relaxed);
    }

    let ran = completed.load(Ordering::Relaxed);
    tracing::debug!(ran, total, "task chain finished");
    ran
}

/// Handle to a running [`TaskChain`].
pub struct ChainHandle {
    token: CancellationToken,
    completed: Arc<AtomicUsize>,
    task: JoinHandle<usize>,
}

impl ChainHandle {
    /// Prevent stages that have not started yet from running.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Stages that have run so far.
    #[must_use]
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the coordinator and return how many stages ran.
    pub async fn join(self) -> usize {
        match self.task.await {
            Ok(ran) => ran,
            Err(_) => self.completed.load(Ordering::Relaxed),
        }
    }
}
