//! Synthetic workload applied by message handlers.
//!
//! [`LoadProfile`] holds the process-wide setting; [`WorkSimulator`] turns a
//! setting into elapsed time.

mod profile;
mod simulator;

pub use profile::{LoadProfile, ProfileSnapshot, WorkKind};
pub use simulator::WorkSimulator;
