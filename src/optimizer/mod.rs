//! Optimization backend.
//!
//! The coordinator only sees the [`Optimizer`] trait: committed graph plus
//! initial values in, new solution or an [`OptimizerError`] out. The default
//! backend is a dense Levenberg-Marquardt solver over SE3 poses and 3D
//! landmarks.

pub mod pose_graph;

use serde::{Deserialize, Serialize};

use crate::error::OptimizerError;
use crate::graph::{FactorGraph, Solution};

pub use pose_graph::LevenbergMarquardt;

/// Graph-to-solution backend driven by the coordinator thread.
pub trait Optimizer: Send {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Optimize `graph` starting from `initial`.
    ///
    /// `initial` holds an estimate for every variable the graph references.
    fn optimize(&mut self, graph: &FactorGraph, initial: &Solution)
    -> Result<Solution, OptimizerError>;
}

/// Configuration for the Levenberg-Marquardt backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Maximum number of LM iterations.
    pub max_iterations: usize,

    /// Convergence threshold on parameter change.
    pub param_tolerance: f64,

    /// Convergence threshold on gradient norm.
    pub gradient_tolerance: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            max_iterations: 20,
            param_tolerance: 1e-6,
            gradient_tolerance: 1e-6,
        }
    }
}
