//! Periodic and chained scheduling.
//!
//! [`RateScheduler`] drives a callback at a fixed rate and backs both the
//! outbound broadcaster and every simulated client connection. [`TaskChain`]
//! runs an ordered list of delayed stages from one coordinator task.

mod chain;
mod rate;

pub use chain::{ChainHandle, TaskChain};
pub use rate::{RateScheduler, ScheduleHandle, period_for};
