use std::hint::black_box;
use std::time::{Duration, Instant};

use super::profile::{ProfileSnapshot, WorkKind};

/// Applies synthetic business-logic cost on behalf of message handlers.
///
/// CPU-bound work occupies the calling thread for the whole duration, so on
/// a per-task executor it also occupies a runtime worker. IO-bound work
/// yields to the runtime. Cancellation is by dropping the returned future;
/// a CPU spin already underway is not interrupted.
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkSimulator;

impl WorkSimulator {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Simulate work of `kind` for `duration` and return the time spent.
    ///
    /// For [`WorkKind::CpuBound`] and [`WorkKind::IoBound`] the returned
    /// elapsed time is never shorter than `duration`.
    pub async fn simulate(&self, kind: WorkKind, duration: Duration) -> Duration {
        let started = Instant::now();
        match kind {
            WorkKind::None => {}
            WorkKind::CpuBound => spin_for(duration),
            WorkKind::IoBound => {
                if !duration.is_zero() {
                    tokio::time::sleep(duration).await;
                }
            }
        }
        let elapsed = started.elapsed();
        tracing::trace!(%kind, ?duration, ?elapsed, "simulated work");
        elapsed
    }

    /// Simulate whatever a profile snapshot currently asks for.
    pub async fn simulate_profile(&self, profile: &ProfileSnapshot) -> Duration {
        self.simulate(profile.kind, profile.duration).await
    }

    /// Like [`WorkSimulator::simulate`], except that CPU-bound work spins on
    /// the runtime's blocking pool. The calling worker stays free to drive
    /// timers and I/O while the caller awaits the spin.
    pub async fn simulate_detached(&self, kind: WorkKind, duration: Duration) -> Duration {
        if kind != WorkKind::CpuBound || duration.is_zero() {
            return self.simulate(kind, duration).await;
        }
        let started = Instant::now();
        if let Err(e) = tokio::task::spawn_blocking(move || spin_for(duration)).await {
            tracing::warn!(error = %e, "cpu spin did not complete");
        }
        let elapsed = started.elapsed();
        tracing::trace!(%kind, ?duration, ?elapsed, "simulated detached work");
        elapsed
    }
}

/// Busy-spin until `duration` has passed on the monotonic clock.
fn spin_for(duration: Duration) {
    let started = Instant::now();
    let mut acc = 0.0f64;
    let mut i = 0u64;
    while started.elapsed() < duration {
        // Batches keep clock reads off the hot path.
        for _ in 0..64 {
            i = i.wrapping_add(1);
            acc += black_box(i as f64).sqrt();
        }
    }
    black_box(acc);
}
