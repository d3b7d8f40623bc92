//! Periodic outbound broadcaster.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;

use crate::broker::Publisher;
use crate::error::{Error, Result};
use crate::message::OutboundResponse;
use crate::scheduler::RateScheduler;
use crate::workload::{LoadProfile, WorkSimulator};

/// Lifecycle of a [`ResponseService`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Stopped,
    Running,
}

/// Broadcasts an [`OutboundResponse`] to a destination at the profile's rate.
///
/// Each tick simulates the profile's workload, then publishes a payload
/// carrying the next id and the current time. CPU-bound ticks spin on the
/// blocking pool, so a slow broadcaster never stalls the runtime's timers. Starting a running service
/// fails with [`Error::AlreadyRunning`]. A rate change made while running
/// takes effect at the next start.
pub struct ResponseService {
    scheduler: RateScheduler,
    profile: LoadProfile,
    counter: Arc<AtomicU64>,
    destination: Arc<str>,
    lifecycle: Mutex<()>,
}

impl ResponseService {
    #[must_use]
    pub fn new(
        publisher: Arc<dyn Publisher>,
        profile: LoadProfile,
        destination: impl Into<String>,
    ) -> Self {
        let destination: Arc<str> = destination.into().into();
        let counter = Arc::new(AtomicU64::new(0));

        let scheduler = {
            let profile = profile.clone();
            let counter = counter.clone();
            let destination = destination.clone();
            RateScheduler::new("response-service", move || {
                broadcast(
                    publisher.clone(),
                    profile.snapshot(),
                    counter.clone(),
                    destination.clone(),
                )
            })
        };

        Self {
            scheduler,
            profile,
            counter,
            destination,
            lifecycle: Mutex::new(()),
        }
    }

    /// Reset the counter and start broadcasting at the profile's rate.
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyRunning`] if already running
    /// - [`Error::NoRuntime`] outside a tokio runtime
    ///
    /// A failed start leaves the counter untouched.
    pub fn start(&self) -> Result<()> {
        let _guard = self.lifecycle.lock();
        if self.scheduler.is_scheduled() {
            return Err(Error::AlreadyRunning);
        }
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(Error::NoRuntime);
        }

        let rate = self.profile.snapshot().outbound_rate;
        let previous = self.counter.swap(0, Ordering::SeqCst);
        match self.scheduler.schedule(rate) {
            Ok(_) => {
                tracing::info!(destination = %self.destination, rate, "broadcast started");
                Ok(())
            }
            Err(e) => {
                self.counter.store(previous, Ordering::SeqCst);
                Err(match e {
                    Error::AlreadyScheduled => Error::AlreadyRunning,
                    other => other,
                })
            }
        }
    }

    /// Stop broadcasting. Does nothing when already stopped.
    ///
    /// A tick in progress finishes.
    pub fn stop(&self) {
        let _guard = self.lifecycle.lock();
        if self.scheduler.is_scheduled() {
            self.scheduler.cancel();
            tracing::info!(sent = self.sent_count(), "broadcast stopped");
        }
    }

    /// Stop and wait for a tick in progress to finish.
    pub async fn stop_and_wait(&self) {
        let handle = self.scheduler.handle();
        self.stop();
        if let Some(handle) = handle {
            handle.cancel_and_wait().await;
        }
    }

    /// Set the rate used by the next [`ResponseService::start`].
    ///
    /// # Errors
    ///
    /// [`Error::InvalidRate`] if `tps` is zero.
    pub fn set_rate(&self, tps: u32) -> Result<()> {
        self.profile.set_outbound_rate(tps)
    }

    #[must_use]
    pub fn state(&self) -> ServiceState {
        if self.scheduler.is_scheduled() {
            ServiceState::Running
        } else {
            ServiceState::Stopped
        }
    }

    /// Rate of the running schedule, if running.
    #[must_use]
    pub fn running_rate(&self) -> Option<u32> {
        self.scheduler
            .handle()
            .filter(|h| !h.is_cancelled())
            .map(|h| h.rate())
    }

    /// Responses produced since the last start.
    #[must_use]
    pub fn sent_count(&self) -> u64 {
        self.counter.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn destination(&self) -> &str {
        &self.destination
    }
}

impl std::fmt::Debug for ResponseService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseService")
            .field("state", &self.state())
            .field("destination", &self.destination)
            .field("sent", &self.sent_count())
            .finish_non_exhaustive()
    }
}

async fn broadcast(
    publisher: Arc<dyn Publisher>,
    profile: crate::workload::ProfileSnapshot,
    counter: Arc<AtomicU64>,
    destination: Arc<str>,
) -> Result<()> {
    WorkSimulator::new()
        .simulate_detached(profile.kind, profile.duration)
        .await;
    let id = counter.fetch_add(1, Ordering::SeqCst) + 1;
    let payload = serde_json::to_vec(&OutboundResponse::now(id))?;
    publisher.publish(&destination, Bytes::from(payload)).await?;
    Ok(())
}
