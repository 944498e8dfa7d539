//! Asynchronous delivery pipeline.
//!
//! Producers submit raw records into an unbounded queue; a fixed pool of
//! worker tasks dequeues, normalizes and delivers them. `drain` waits for
//! everything submitted so far, `shutdown` stops intake and joins workers.

mod error;
mod queue;
mod stats;

use std::fmt;

pub use error::PipelineError;
pub use queue::DeliveryPipeline;
pub use stats::PipelineStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Accepting records; no workers yet.
    Idle,
    Running,
    /// Intake closed, queued records still being processed.
    Draining,
    Stopped,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Idle => "idle",
            PipelineState::Running => "running",
            PipelineState::Draining => "draining",
            PipelineState::Stopped => "stopped",
        };
        write!(f, "{name}")
    }
}
