use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Kind of synthetic business-logic cost applied per message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkKind {
    /// No simulated work.
    #[default]
    None,
    /// Busy-spin a core for the duration.
    CpuBound,
    /// Sleep for the duration without using CPU.
    IoBound,
}

impl std::fmt::Display for WorkKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkKind::None => write!(f, "NONE"),
            WorkKind::CpuBound => write!(f, "CPU_BOUND"),
            WorkKind::IoBound => write!(f, "IO_BOUND"),
        }
    }
}

/// One immutable configuration of the synthetic workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProfileSnapshot {
    /// Kind of work each handler simulates.
    pub kind: WorkKind,
    /// How long each handler simulates work for.
    pub duration: Duration,
    /// Rate the next broadcaster start will use.
    pub outbound_rate: u32,
}

impl Default for ProfileSnapshot {
    fn default() -> Self {
        Self {
            kind: WorkKind::None,
            duration: Duration::ZERO,
            outbound_rate: 10,
        }
    }
}

/// Process-wide workload configuration shared by every handler.
///
/// Each update publishes a whole new [`ProfileSnapshot`], so a reader always
/// sees kind, duration and rate from the same update. Reads are lock-free.
#[derive(Debug, Clone, Default)]
pub struct LoadProfile {
    current: Arc<ArcSwap<ProfileSnapshot>>,
}

impl LoadProfile {
    /// Profile with no work and the given broadcast rate.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidRate`] if `outbound_rate` is zero.
    pub fn new(outbound_rate: u32) -> Result<Self> {
        if outbound_rate == 0 {
            return Err(Error::InvalidRate(outbound_rate));
        }
        let snapshot = ProfileSnapshot {
            outbound_rate,
            ..ProfileSnapshot::default()
        };
        Ok(Self {
            current: Arc::new(ArcSwap::from_pointee(snapshot)),
        })
    }

    /// Current configuration.
    #[must_use]
    pub fn snapshot(&self) -> ProfileSnapshot {
        **self.current.load()
    }

    /// Replace the work kind and duration, keeping the broadcast rate.
    pub fn configure(&self, kind: WorkKind, duration: Duration) {
        self.current.rcu(|old| ProfileSnapshot {
            kind,
            duration,
            ..**old
        });
        tracing::info!(%kind, ?duration, "load profile configured");
    }

    /// Replace the broadcast rate, keeping the workload.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidRate`] if `rate` is zero; the profile is unchanged.
    pub fn set_outbound_rate(&self, rate: u32) -> Result<()> {
        if rate == 0 {
            return Err(Error::InvalidRate(rate));
        }
        self.current.rcu(|old| ProfileSnapshot {
            outbound_rate: rate,
            ..**old
        });
        Ok(())
    }

    /// Replace every field in one publication.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidRate`] if the rate is zero; the profile is unchanged.
    pub fn replace(&self, snapshot: ProfileSnapshot) -> Result<()> {
        if snapshot.outbound_rate == 0 {
            return Err(Error::InvalidRate(snapshot.outbound_rate));
        }
        self.current.store(Arc::new(snapshot));
        tracing::info!(
            kind = %snapshot.kind,
            duration = ?snapshot.duration,
            outbound_rate = snapshot.outbound_rate,
            "load profile replaced"
        );
        Ok(())
    }
}
