//! Health monitoring engine core
//!
//! Probe execution, ping-output parsing, threshold classification,
//! transition detection and the scheduling layer that drives all of it.

pub mod classifier;
pub mod parser;
pub mod prober;
pub mod scheduler;
pub mod transition;
pub mod types;
pub mod validation;

pub use parser::PingDialect;
pub use prober::{PacketBudget, ProbeError, Prober, SystemProber};
pub use scheduler::{CycleOutcome, ProbeScheduler};
pub use types::{CheckMethod, HealthState, PingMetrics, ProbeResult, StatusTransition};
