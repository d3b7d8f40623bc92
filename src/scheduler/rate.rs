use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

type TickFn = Arc<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Interval between ticks at `rate_hz`.
///
/// Rates above one billion per second share the shortest period tokio can
/// time, one nanosecond.
///
/// # Errors
///
/// Returns [`Error::InvalidRate`] when `rate_hz` is zero.
pub fn period_for(rate_hz: u32) -> Result<Duration> {
    if rate_hz == 0 {
        return Err(Error::InvalidRate(rate_hz));
    }
    Ok(Duration::from_nanos((1_000_000_000 / u64::from(rate_hz)).max(1)))
}

/// Fires a callback at a fixed rate on its own tokio task.
///
/// The first tick fires immediately when scheduled. A tick's callback runs to
/// completion before the next tick is considered, so ticks of one scheduler
/// never overlap and fire in strict temporal order. If a callback overruns its
/// period the missed ticks are fired back to back to hold the average rate.
///
/// Errors and panics raised by the callback are logged and the schedule
/// carries on.
pub struct RateScheduler {
    name: Arc<str>,
    tick: TickFn,
    current: Mutex<Option<ScheduleHandle>>,
}

impl RateScheduler {
    /// Create an idle scheduler around `callback`.
    pub fn new<F, Fut>(name: impl Into<String>, callback: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let name: String = name.into();
        Self {
            name: name.into(),
            tick: Arc::new(move || callback().boxed()),
            current: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Start ticking at `rate_hz`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidRate`] if `rate_hz` is zero
    /// - [`Error::AlreadyScheduled`] if a schedule is still running
    /// - [`Error::NoRuntime`] outside a tokio runtime
    pub fn schedule(&self, rate_hz: u32) -> Result<ScheduleHandle> {
        let period = period_for(rate_hz)?;
        let mut current = self.current.lock();
        if current.as_ref().is_some_and(|h| !h.is_cancelled()) {
            return Err(Error::AlreadyScheduled);
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| Error::NoRuntime)?;

        let (rate_tx, rate_rx) = watch::channel(rate_hz);
        let shared = Arc::new(Shared {
            token: CancellationToken::new(),
            rate_tx,
            ticks: AtomicU64::new(0),
            task: Mutex::new(None),
        });

        let task = runtime.spawn(run(
            self.name.clone(),
            self.tick.clone(),
            shared.clone(),
            rate_rx,
            period,
        ));
        *shared.task.lock() = Some(task);

        tracing::debug!(scheduler = %self.name, rate_hz, ?period, "schedule started");
        let handle = ScheduleHandle { shared };
        *current = Some(handle.clone());
        Ok(handle)
    }

    /// Cancel the running schedule, if any.
    pub fn cancel(&self) {
        if let Some(handle) = self.current.lock().take() {
            handle.cancel();
        }
    }

    /// Change the rate of the running schedule.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidRate`] if `rate_hz` is zero. Does nothing when idle.
    pub fn set_rate(&self, rate_hz: u32) -> Result<()> {
        match self.current.lock().as_ref() {
            Some(handle) => handle.set_rate(rate_hz),
            None => period_for(rate_hz).map(|_| ()),
        }
    }

    /// Whether a schedule is running.
    #[must_use]
    pub fn is_scheduled(&self) -> bool {
        self.current
            .lock()
            .as_ref()
            .is_some_and(|h| !h.is_cancelled())
    }

    /// Handle of the running schedule.
    #[must_use]
    pub fn handle(&self) -> Option<ScheduleHandle> {
        self.current.lock().clone()
    }
}

impl Drop for RateScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for RateScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateScheduler")
            .field("name", &self.name)
            .field("scheduled", &self.is_scheduled())
            .finish()
    }
}

struct Shared {
    token: CancellationToken,
    rate_tx: watch::Sender<u32>,
    ticks: AtomicU64,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// Cancellable handle to a running schedule.
#[derive(Clone)]
pub struct ScheduleHandle {
    shared: Arc<Shared>,
}

impl ScheduleHandle {
    /// Stop future ticks. A tick already running completes.
    pub fn cancel(&self) {
        self.shared.token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.shared.token.is_cancelled()
    }

    /// Change the rate. The next tick is re-anchored one new period from now.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidRate`] if `rate_hz` is zero.
    pub fn set_rate(&self, rate_hz: u32) -> Result<()> {
        period_for(rate_hz)?;
        self.shared.rate_tx.send_replace(rate_hz);
        Ok(())
    }

    /// Current rate in ticks per second.
    #[must_use]
    pub fn rate(&self) -> u32 {
        *self.shared.rate_tx.borrow()
    }

    /// Ticks fired so far.
    #[must_use]
    pub fn ticks(&self) -> u64 {
        self.shared.ticks.load(Ordering::Relaxed)
    }

    /// Cancel and wait for an in-flight tick to finish.
    pub async fn cancel_and_wait(&self) {
        self.cancel();
        let task = self.shared.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

impl std::fmt::Debug for ScheduleHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduleHandle")
            .field("rate", &self.rate())
            .field("ticks", &self.ticks())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

fn interval_starting(start: Instant, period: Duration) -> Interval {
    let mut interval = tokio::time::interval_at(start, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Burst);
    interval
}

async fn run(
    name: Arc<str>,
    tick: TickFn,
    shared: Arc<Shared>,
    mut rate_rx: watch::Receiver<u32>,
    period: Duration,
) {
    let mut interval = interval_starting(Instant::now(), period);

    loop {
        tokio::select! {
            biased;
            _ = shared.token.cancelled() => break,
            changed = rate_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let rate = *rate_rx.borrow_and_update();
                if let Ok(period) = period_for(rate) {
                    interval = interval_starting(Instant::now() + period, period);
                    tracing::debug!(scheduler = %name, rate_hz = rate, "rate changed");
                }
            }
            _ = interval.tick() => {
                shared.ticks.fetch_add(1, Ordering::Relaxed);
                let outcome = AssertUnwindSafe(async { tick().await }).catch_unwind().await;
                match outcome {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => tracing::warn!(scheduler = %name, error = %e, "tick failed"),
                    Err(_) => tracing::error!(scheduler = %name, "tick panicked"),
                }
            }
        }
    }

    tracing::debug!(scheduler = %name, ticks = shared.ticks.load(Ordering::Relaxed), "schedule stopped");
}
