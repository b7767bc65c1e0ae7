//! Coordinator orchestration, thread management and producer-facing handle.
//!
//! The [`Coordinator`] owns the committed graph and the optimizer. Producers
//! reach it through a cloneable [`CoordinatorHandle`] backed by
//! [`SharedState`].

pub mod commit_window;
pub mod config;
mod coordinator;
pub mod cycle;
mod handle;
pub mod shared_state;

pub use commit_window::{CommitPolicy, CommitWindow};
pub use config::{CommitPolicyConfig, CoordinatorConfig, InitialPoseConfig, PriorNoiseConfig};
pub use coordinator::{Coordinator, CoordinatorThread};
pub use cycle::{CoordinatorStats, CyclePhase, CycleReport, OptimizeOutcome};
pub use handle::{CoordinatorHandle, INITIAL_PRIOR_SOURCE};
pub use shared_state::SharedState;
