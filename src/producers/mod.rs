//! Producer capabilities and built-in producers.
//!
//! Collaborators plug into the coordinator through three small traits:
//! - [`PoseProducer`]: asked for a relative constraint whenever a new pose
//!   node is created
//! - [`OutputConsumer`]: receives each published snapshot
//! - [`Readiness`]: reports whether a producer still has work in flight
//!
//! Measurement producers that do heavy work run on their own thread via
//! [`MeasurementWorker`] and submit factors through a
//! [`crate::system::CoordinatorHandle`].

pub mod log_consumer;
pub mod no_motion;
pub mod odometry;
pub mod readiness;
pub mod registry;
pub mod worker;

use std::time::Duration;

use crate::graph::{Factor, PoseKey, Snapshot};
use crate::time::Timestamp;

pub use log_consumer::PoseLogConsumer;
pub use no_motion::NoMotionProducer;
pub use odometry::{OdometryNoise, OdometryProducer};
pub use readiness::{InFlight, InFlightGuard};
pub use registry::{ConsumerId, ConsumerRegistry, ProducerRegistry};
pub use worker::{MeasurementProcessor, MeasurementWorker};

/// A pose node together with the timestamp it was created for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoseNode {
    pub key: PoseKey,
    pub time: Timestamp,
}

impl PoseNode {
    pub fn new(key: PoseKey, time: Timestamp) -> Self {
        Self { key, time }
    }
}

/// Contributes relative-pose constraints between consecutive pose nodes.
pub trait PoseProducer: Send + Sync {
    fn name(&self) -> &str;

    /// Constraint from `from` to the newly created node `to`.
    ///
    /// Returning `None` means the producer cannot say anything about this
    /// interval; the node is still created.
    fn relative_pose(&self, from: PoseNode, to: PoseNode) -> Option<Factor>;
}

/// Receives every published snapshot.
pub trait OutputConsumer: Send {
    fn name(&self) -> &str;

    /// Called once per publish, in registration order. An error skips this
    /// consumer for the cycle only.
    fn on_solution_updated(&mut self, snapshot: &Snapshot) -> anyhow::Result<()>;
}

/// Backpressure signal for replay drivers and reset.
pub trait Readiness: Send + Sync {
    fn name(&self) -> &str;

    /// True when no submission is in flight.
    fn ready(&self) -> bool;

    /// Block until ready or until `timeout` elapses; returns `ready()`.
    fn wait_ready(&self, timeout: Duration) -> bool;
}
