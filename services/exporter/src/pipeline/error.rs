use thiserror::Error;

use super::PipelineState;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("pipeline is {0} and no longer accepts records")]
    Closed(PipelineState),
    #[error("pipeline is {0}; expected {1}")]
    InvalidState(PipelineState, PipelineState),
    #[error("worker count must be greater than zero")]
    NoWorkers,
    #[error("pipeline state lock poisoned")]
    Poisoned,
}
