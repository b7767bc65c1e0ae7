//! Error types for the coordinator and the optimizer.

use thiserror::Error;

use crate::graph::{NodeKey, PoseKey};
use crate::time::Timestamp;

/// Errors crossing the coordinator boundary.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// The symbol allocator's node index is inconsistent. Unrecoverable.
    #[error("allocation conflict at {time}: {key} violates node tolerance ({detail})")]
    AllocationConflict {
        key: PoseKey,
        time: Timestamp,
        detail: String,
    },

    /// `reset()` was requested while producers were mid-submission.
    #[error("reset requested while {in_flight} submission(s) are in flight")]
    ResetWhileActive { in_flight: usize },

    /// The coordinator thread has already stopped.
    #[error("coordinator thread has stopped")]
    CoordinatorStopped,
}

impl CoordinatorError {
    /// True for invariant violations the system cannot continue after.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CoordinatorError::AllocationConflict { .. })
    }
}

/// Optimizer failures. The coordinator keeps the previous solution on any of these.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum OptimizerError {
    #[error("graph has no factors")]
    EmptyGraph,

    #[error("linear system is singular")]
    Singular,

    #[error("optimization diverged (error = {error})")]
    Diverged { error: f64 },

    #[error("factor references {0} which has no initial estimate")]
    UnknownNode(NodeKey),

    /// The backend panicked; caught by the coordinator.
    #[error("optimizer panicked: {0}")]
    Panicked(String),
}
