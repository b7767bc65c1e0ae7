pub mod error;
pub mod geometry;
pub mod graph;
pub mod optimizer;
pub mod producers;
pub mod replay;
pub mod system;
pub mod time;
