use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use hdrhistogram::Histogram;
use parking_lot::Mutex;

use super::snapshot::{MetricsSnapshot, StagePercentiles};
use super::{CorrelationId, Counter, Stage};
use crate::config::MetricsConfig;
use crate::error::{Error, Result};
use crate::executor::ExecutorStats;

/// Pending timers and completed samples for one stage.
struct StageRecorder {
    pending: Mutex<HashMap<CorrelationId, Instant>>,
    histogram: Mutex<Histogram<u64>>,
    dropped: AtomicU64,
}

impl StageRecorder {
    fn new(significant_figures: u8) -> Result<Self> {
        let histogram = Histogram::new(significant_figures)
            .map_err(|e| Error::InvalidConfig(format!("histogram: {e:?}")))?;
        Ok(Self {
            pending: Mutex::new(HashMap::new()),
            histogram: Mutex::new(histogram),
            dropped: AtomicU64::new(0),
        })
    }
}

/// Thread-safe recorder of per-stage timers and exact message counters.
///
/// Timers are keyed by [`CorrelationId`]. Only a start followed by a stop for
/// the same id produces a sample, so percentiles cover completed samples
/// only. Samples go into an HDR histogram in microseconds, which makes the
/// reported percentiles independent of arrival order.
///
/// A timer that is never stopped is swept once it is older than the
/// configured TTL and its stage holds `max_pending` timers.
pub struct MetricsAggregator {
    stages: [StageRecorder; 3],
    inbound_total: AtomicU64,
    outbound_total: AtomicU64,
    config: MetricsConfig,
}

impl MetricsAggregator {
    /// # Errors
    ///
    /// [`Error::InvalidConfig`] if the histogram precision is out of range.
    pub fn new(config: MetricsConfig) -> Result<Self> {
        let sf = config.significant_figures;
        Ok(Self {
            stages: [
                StageRecorder::new(sf)?,
                StageRecorder::new(sf)?,
                StageRecorder::new(sf)?,
            ],
            inbound_total: AtomicU64::new(0),
            outbound_total: AtomicU64::new(0),
            config,
        })
    }

    fn stage(&self, stage: Stage) -> &StageRecorder {
        &self.stages[stage.index()]
    }

    fn counter(&self, counter: Counter) -> &AtomicU64 {
        match counter {
            Counter::Inbound => &self.inbound_total,
            Counter::Outbound => &self.outbound_total,
        }
    }

    /// Start the `stage` timer for `id`.
    ///
    /// Returns `false` if a timer for `id` is already pending, in which case
    /// the first start is kept, or if the stage is full of live timers.
    pub fn record_start(&self, stage: Stage, id: &CorrelationId) -> bool {
        self.record_start_at(stage, id, Instant::now())
    }

    pub(crate) fn record_start_at(&self, stage: Stage, id: &CorrelationId, at: Instant) -> bool {
        let recorder = self.stage(stage);
        let mut pending = recorder.pending.lock();

        if pending.len() >= self.config.max_pending {
            let ttl = self.config.pending_ttl();
            let before = pending.len();
            pending.retain(|_, started| at.saturating_duration_since(*started) < ttl);
            let swept = before - pending.len();
            if swept > 0 {
                recorder.dropped.fetch_add(swept as u64, Ordering::Relaxed);
                tracing::debug!(%stage, swept, "swept abandoned timers");
            }
            if pending.len() >= self.config.max_pending {
                recorder.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(%stage, max = self.config.max_pending, "pending timer table full");
                return false;
            }
        }

        match pending.entry(id.clone()) {
            Entry::Occupied(_) => {
                tracing::debug!(%stage, %id, "duplicate timer start ignored");
                false
            }
            Entry::Vacant(slot) => {
                slot.insert(at);
                true
            }
        }
    }

    /// Stop the `stage` timer for `id` and record the sample.
    ///
    /// Returns the measured duration, or `None` if no timer was pending.
    pub fn record_stop(&self, stage: Stage, id: &CorrelationId) -> Option<Duration> {
        self.record_stop_at(stage, id, Instant::now())
    }

    pub(crate) fn record_stop_at(
        &self,
        stage: Stage,
        id: &CorrelationId,
        at: Instant,
    ) -> Option<Duration> {
        let recorder = self.stage(stage);
        let started = recorder.pending.lock().remove(id)?;
        let elapsed = at.saturating_duration_since(started);
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        recorder.histogram.lock().saturating_record(micros);
        Some(elapsed)
    }

    /// Add one to an exact message counter.
    pub fn increment(&self, counter: Counter) {
        self.counter(counter).fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn total(&self, counter: Counter) -> u64 {
        self.counter(counter).load(Ordering::Relaxed)
    }

    /// Timers started but not yet stopped for `stage`.
    #[must_use]
    pub fn pending(&self, stage: Stage) -> usize {
        self.stage(stage).pending.lock().len()
    }

    /// Completed samples recorded for `stage`.
    #[must_use]
    pub fn samples(&self, stage: Stage) -> u64 {
        self.stage(stage).histogram.lock().len()
    }

    /// Timers discarded for `stage` because they were abandoned or the
    /// pending table was full.
    #[must_use]
    pub fn dropped(&self, stage: Stage) -> u64 {
        self.stage(stage).dropped.load(Ordering::Relaxed)
    }

    /// p95 and p99 of `stage` in milliseconds; zero with no samples.
    #[must_use]
    pub fn percentiles(&self, stage: Stage) -> StagePercentiles {
        let histogram = self.stage(stage).histogram.lock();
        if histogram.is_empty() {
            return StagePercentiles::default();
        }
        StagePercentiles {
            p95: micros_to_ms(histogram.value_at_quantile(0.95)),
            p99: micros_to_ms(histogram.value_at_quantile(0.99)),
            samples: histogram.len(),
        }
    }

    /// Immutable view of every stage and counter plus executor saturation.
    #[must_use]
    pub fn snapshot(&self, inbound: ExecutorStats, outbound: ExecutorStats) -> MetricsSnapshot {
        let inbound_stage = self.percentiles(Stage::Inbound);
        let outbound_stage = self.percentiles(Stage::Outbound);
        let business = self.percentiles(Stage::BusinessLogic);
        MetricsSnapshot {
            inbound_p95: inbound_stage.p95,
            inbound_p99: inbound_stage.p99,
            outbound_p95: outbound_stage.p95,
            outbound_p99: outbound_stage.p99,
            business_logic_p95: business.p95,
            business_logic_p99: business.p99,
            inbound_active_threads: inbound.active_threads,
            inbound_queue_size: inbound.queue_depth,
            outbound_active_threads: outbound.active_threads,
            outbound_queue_size: outbound.queue_depth,
            total_inbound_messages: self.total(Counter::Inbound),
            total_outbound_messages: self.total(Counter::Outbound),
        }
    }

    /// Clear samples, pending timers and counters.
    pub fn reset(&self) {
        for recorder in &self.stages {
            recorder.pending.lock().clear();
            recorder.histogram.lock().reset();
            recorder.dropped.store(0, Ordering::Relaxed);
        }
        self.inbound_total.store(0, Ordering::Relaxed);
        self.outbound_total.store(0, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for MetricsAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsAggregator")
            .field("inbound_total", &self.total(Counter::Inbound))
            .field("outbound_total", &self.total(Counter::Outbound))
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn micros_to_ms(micros: u64) -> f64 {
    micros as f64 / 1000.0
}
