//! Graph entities: keys, factors, the committed graph, solutions and the
//! timestamp to node allocator.

pub mod factor;
pub mod factor_graph;
pub mod initialization;
pub mod solution;
pub mod symbol_allocator;
pub mod types;

pub use factor::{Factor, FactorKind};
pub use factor_graph::FactorGraph;
pub use initialization::initial_estimate;
pub use solution::{Snapshot, Solution};
pub use symbol_allocator::{NodeAllocation, SymbolAllocator};
pub use types::{LandmarkKey, NodeKey, PoseKey};
