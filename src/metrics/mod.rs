//! Per-stage latency timers and message counters.
//!
//! Interceptors call [`MetricsAggregator::record_start`] and
//! [`MetricsAggregator::record_stop`] with the [`CorrelationId`] they
//! attached to a message. [`MetricsAggregator::snapshot`] turns the live
//! state into a [`MetricsSnapshot`] for the metrics endpoint.

mod aggregator;
mod correlation;
mod snapshot;

use std::fmt;

pub use aggregator::MetricsAggregator;
pub use correlation::CorrelationId;
pub use snapshot::{MetricsSnapshot, StagePercentiles, TSV_HEADER};

/// Pipeline stage a timer measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// From a client message entering the inbound channel until handled.
    Inbound,
    /// Business-logic execution on the inbound executor.
    BusinessLogic,
    /// From a delivery entering the outbound channel until handed to the session.
    Outbound,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Inbound, Stage::BusinessLogic, Stage::Outbound];

    const fn index(self) -> usize {
        match self {
            Stage::Inbound => 0,
            Stage::BusinessLogic => 1,
            Stage::Outbound => 2,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Stage::Inbound => "inbound",
            Stage::BusinessLogic => "business_logic",
            Stage::Outbound => "outbound",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Exact message counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Counter {
    /// Client messages that entered the inbound channel.
    Inbound,
    /// Deliveries that entered the outbound channel.
    Outbound,
}
