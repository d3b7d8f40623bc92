//! Configuration for executors, metrics, framing limits and the harness.

use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};

/// Destination clients send synthetic requests to.
pub const DEFAULT_REQUEST_DESTINATION: &str = "/app/test/load/request";

/// Destination the response service broadcasts to.
pub const DEFAULT_BROADCAST_DESTINATION: &str = "/topic/test/load/response";

/// Framing limits for STOMP connections.
///
/// These limits bound the memory a single peer can make the codec buffer.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Maximum size of a single encoded frame in bytes.
    ///
    /// Default: 64 KB (64 * 1024)
    pub max_frame_size: usize,

    /// Maximum number of headers in a frame.
    ///
    /// Default: 64
    pub max_header_count: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_frame_size: 64 * 1024,
            max_header_count: 64,
        }
    }
}

impl Limits {
    /// Create new limits with custom values.
    #[must_use]
    pub const fn new(max_frame_size: usize, max_header_count: usize) -> Self {
        Self {
            max_frame_size,
            max_header_count,
        }
    }

    /// Validate that frame size is within limits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FrameTooLarge`] if `size` exceeds the configured maximum.
    pub const fn check_frame_size(&self, size: usize) -> Result<()> {
        if size > self.max_frame_size {
            Err(Error::FrameTooLarge {
                size,
                max: self.max_frame_size,
            })
        } else {
            Ok(())
        }
    }
}

/// What a bounded pool does when its queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FullQueuePolicy {
    /// Suspend the submitting caller until a queue slot frees.
    #[default]
    Block,
    /// Fail the submission with [`Error::Overloaded`].
    Reject,
}

/// Selects and sizes an executor variant.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutorConfig {
    /// Fixed worker threads draining a fixed-capacity FIFO queue.
    Bounded {
        /// Number of worker threads.
        workers: usize,
        /// Capacity of the task queue.
        queue_capacity: usize,
        /// Behaviour on a full queue.
        #[serde(default)]
        policy: FullQueuePolicy,
        /// Worker thread name prefix; threads are named `{prefix}{n}`.
        #[serde(default = "default_prefix")]
        name_prefix: String,
    },
    /// One tokio task per submission, optionally capped.
    PerTask {
        /// Maximum simultaneously running tasks; `None` is unlimited.
        #[serde(default)]
        concurrency_limit: Option<usize>,
        /// Prefix used in log events for this executor.
        #[serde(default = "default_prefix")]
        name_prefix: String,
    },
}

fn default_prefix() -> String {
    "worker-".to_string()
}

impl ExecutorConfig {
    /// Bounded pool with the blocking policy.
    #[must_use]
    pub fn bounded(workers: usize, queue_capacity: usize) -> Self {
        ExecutorConfig::Bounded {
            workers,
            queue_capacity,
            policy: FullQueuePolicy::Block,
            name_prefix: default_prefix(),
        }
    }

    /// One task per submission with an optional concurrency ceiling.
    #[must_use]
    pub fn per_task(concurrency_limit: Option<usize>) -> Self {
        ExecutorConfig::PerTask {
            concurrency_limit,
            name_prefix: default_prefix(),
        }
    }

    /// Set the full-queue policy. Has no effect on per-task executors.
    #[must_use]
    pub fn with_policy(mut self, new_policy: FullQueuePolicy) -> Self {
        if let ExecutorConfig::Bounded { policy, .. } = &mut self {
            *policy = new_policy;
        }
        self
    }

    /// Set the thread or task name prefix.
    #[must_use]
    pub fn with_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        match &mut self {
            ExecutorConfig::Bounded { name_prefix, .. }
            | ExecutorConfig::PerTask { name_prefix, .. } => *name_prefix = prefix.into(),
        }
        self
    }

    /// Name prefix for threads or log events.
    #[must_use]
    pub fn name_prefix(&self) -> &str {
        match self {
            ExecutorConfig::Bounded { name_prefix, .. }
            | ExecutorConfig::PerTask { name_prefix, .. } => name_prefix,
        }
    }

    /// Check sizes are usable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for zero workers, zero queue capacity
    /// or a zero concurrency limit.
    pub fn validate(&self) -> Result<()> {
        match self {
            ExecutorConfig::Bounded { workers: 0, .. } => {
                Err(Error::InvalidConfig("bounded pool needs at least one worker".into()))
            }
            ExecutorConfig::Bounded {
                queue_capacity: 0, ..
            } => Err(Error::InvalidConfig(
                "bounded pool needs a positive queue capacity".into(),
            )),
            ExecutorConfig::PerTask {
                concurrency_limit: Some(0),
                ..
            } => Err(Error::InvalidConfig(
                "concurrency limit must be positive when set".into(),
            )),
            _ => Ok(()),
        }
    }
}

/// Settings for the metrics aggregator.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Pending timers kept per stage before stale ones are swept.
    ///
    /// Default: 100_000
    pub max_pending: usize,

    /// Age after which an unstopped timer is considered abandoned.
    ///
    /// Default: 60 seconds
    pub pending_ttl_ms: u64,

    /// Histogram precision in significant decimal digits (1..=5).
    ///
    /// Default: 3
    pub significant_figures: u8,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            max_pending: 100_000,
            pending_ttl_ms: 60_000,
            significant_figures: 3,
        }
    }
}

impl MetricsConfig {
    /// Age after which an unstopped timer is swept.
    #[must_use]
    pub const fn pending_ttl(&self) -> Duration {
        Duration::from_millis(self.pending_ttl_ms)
    }
}

/// Top-level harness configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Executor for client-to-server messages.
    pub inbound: ExecutorConfig,

    /// Executor for server-to-client messages.
    pub outbound: ExecutorConfig,

    /// Broadcast rate used until the first configuration request.
    ///
    /// Default: 10
    pub outbound_tps: u32,

    /// Destination clients send requests to.
    pub request_destination: String,

    /// Destination the response service broadcasts to.
    pub broadcast_destination: String,

    /// Metrics aggregator settings.
    pub metrics: MetricsConfig,

    /// STOMP framing limits.
    pub limits: Limits,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            inbound: ExecutorConfig::bounded(8, 2048).with_name_prefix("inbound-"),
            outbound: ExecutorConfig::bounded(16, 2048).with_name_prefix("outbound-"),
            outbound_tps: 10,
            request_destination: DEFAULT_REQUEST_DESTINATION.to_string(),
            broadcast_destination: DEFAULT_BROADCAST_DESTINATION.to_string(),
            metrics: MetricsConfig::default(),
            limits: Limits::default(),
        }
    }
}

impl HarnessConfig {
    /// Create a configuration with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the inbound executor.
    #[must_use]
    pub fn with_inbound(mut self, inbound: ExecutorConfig) -> Self {
        self.inbound = inbound;
        self
    }

    /// Set the outbound executor.
    #[must_use]
    pub fn with_outbound(mut self, outbound: ExecutorConfig) -> Self {
        self.outbound = outbound;
        self
    }

    /// Set the initial broadcast rate.
    #[must_use]
    pub const fn with_outbound_tps(mut self, tps: u32) -> Self {
        self.outbound_tps = tps;
        self
    }

    /// Set framing limits.
    #[must_use]
    pub const fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Defaults overlaid with `RSLOAD_*` environment variables.
    ///
    /// - `RSLOAD_INBOUND_PER_TASK=true` switches inbound to one task per message
    /// - `RSLOAD_INBOUND_CONCURRENCY_LIMIT` caps it (default 64, `0` = unlimited)
    /// - `RSLOAD_INBOUND_WORKERS` / `RSLOAD_OUTBOUND_WORKERS` size the pools
    /// - `RSLOAD_OUTBOUND_TPS` sets the initial broadcast rate
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if a variable does not parse or the
    /// result fails [`HarnessConfig::validate`].
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(workers) = parse_var::<usize>(&lookup, "RSLOAD_INBOUND_WORKERS")? {
            if let ExecutorConfig::Bounded { workers: w, .. } = &mut config.inbound {
                *w = workers;
            }
        }
        if let Some(workers) = parse_var::<usize>(&lookup, "RSLOAD_OUTBOUND_WORKERS")? {
            if let ExecutorConfig::Bounded { workers: w, .. } = &mut config.outbound {
                *w = workers;
            }
        }
        if parse_var::<bool>(&lookup, "RSLOAD_INBOUND_PER_TASK")?.unwrap_or(false) {
            let limit = parse_var::<usize>(&lookup, "RSLOAD_INBOUND_CONCURRENCY_LIMIT")?
                .unwrap_or(64);
            config.inbound = ExecutorConfig::per_task((limit > 0).then_some(limit))
                .with_name_prefix("inbound-");
        }
        if let Some(tps) = parse_var::<u32>(&lookup, "RSLOAD_OUTBOUND_TPS")? {
            config.outbound_tps = tps;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check every section is usable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        self.inbound.validate()?;
        self.outbound.validate()?;
        if self.outbound_tps == 0 {
            return Err(Error::InvalidConfig("outbound_tps must be positive".into()));
        }
        if !(1..=5).contains(&self.metrics.significant_figures) {
            return Err(Error::InvalidConfig(
                "significant_figures must be between 1 and 5".into(),
            ));
        }
        Ok(())
    }
}

/// Settings for the load-test client.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Connections opened up front.
    ///
    /// Default: 10
    pub connections: usize,

    /// Time allowed for each connection to be established.
    ///
    /// Default: 1 second
    pub connect_timeout_ms: u64,

    /// Time [`close_all`](crate::client::LoadTestClient::close_all) waits
    /// for in-flight sends before forcing connections closed.
    ///
    /// Default: 5 seconds
    pub close_grace_ms: u64,

    /// STOMP framing limits for network transports.
    pub limits: Limits,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connections: 10,
            connect_timeout_ms: 1_000,
            close_grace_ms: 5_000,
            limits: Limits::default(),
        }
    }
}

impl ClientConfig {
    /// Defaults with `connections` connections.
    #[must_use]
    pub fn new(connections: usize) -> Self {
        Self {
            connections,
            ..Self::default()
        }
    }

    /// Set the connect timeout.
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the close grace period.
    #[must_use]
    pub const fn with_close_grace(mut self, grace: Duration) -> Self {
        self.close_grace_ms = grace.as_millis() as u64;
        self
    }

    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    #[must_use]
    pub const fn close_grace(&self) -> Duration {
        Duration::from_millis(self.close_grace_ms)
    }

    /// # Errors
    ///
    /// [`Error::InvalidConfig`] for zero connections.
    pub fn validate(&self) -> Result<()> {
        if self.connections == 0 {
            return Err(Error::InvalidConfig(
                "client needs at least one connection".into(),
            ));
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| Error::InvalidConfig(format!("{key}: cannot parse {raw:?}"))),
    }
}
