//! Coordinator cycle phases, per-cycle reports and running statistics.

use crate::error::OptimizerError;

/// Coordinator state machine: Idle -> CommitPending -> Optimize -> Publish -> Idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CyclePhase {
    Idle = 0,
    CommitPending = 1,
    Optimize = 2,
    Publish = 3,
}

impl CyclePhase {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => CyclePhase::CommitPending,
            2 => CyclePhase::Optimize,
            3 => CyclePhase::Publish,
            _ => CyclePhase::Idle,
        }
    }
}

/// What the Optimize phase did.
#[derive(Debug, Clone, PartialEq)]
pub enum OptimizeOutcome {
    /// Nothing changed since the last successful optimization.
    Skipped,
    Optimized,
    /// Previous solution retained; retried next cycle.
    Failed(OptimizerError),
}

/// Summary of one coordinator cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub cycle: u64,

    /// Factors moved into the committed graph this cycle.
    pub committed: usize,

    /// Factors held back by the commit window.
    pub held: usize,

    /// Size of the graph handed to the optimizer.
    pub graph_size: usize,

    pub outcome: OptimizeOutcome,

    /// Consumers that accepted the update.
    pub published: usize,

    /// Names of consumers that failed this cycle.
    pub failed_consumers: Vec<String>,
}

impl CycleReport {
    /// True if a new snapshot became visible to readers.
    pub fn published_snapshot(&self) -> bool {
        self.outcome == OptimizeOutcome::Optimized
    }
}

/// Running totals, logged when the coordinator thread exits.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoordinatorStats {
    pub cycles: u64,
    pub commits: u64,
    pub factors_committed: u64,
    pub optimizations: u64,
    pub optimizer_failures: u64,
    pub consumer_failures: u64,
}
