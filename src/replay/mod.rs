//! Deterministic file replay.
//!
//! Feeds recorded measurements through the coordinator in timestamp order,
//! waiting on producer readiness between records so the concurrent pipeline
//! is never outrun by the data source.

mod driver;
mod odometry_log;

pub use driver::{FrameTiming, ReplayDriver, ReplayOptions, ReplayReport};
pub use odometry_log::{OdometryRecord, load_odometry_csv};
