//! Producer-facing entry points.

use std::sync::Arc;

use tracing::debug;

use crate::error::CoordinatorError;
use crate::geometry::SE3;
use crate::graph::{Factor, LandmarkKey, NodeAllocation, PoseKey, Snapshot};
use crate::producers::{PoseNode, PoseProducer, Readiness};
use crate::time::Timestamp;

use super::cycle::CyclePhase;
use super::shared_state::SharedState;

/// Source name of the initial pose prior.
pub const INITIAL_PRIOR_SOURCE: &str = "initial_pose";

/// Cloneable handle given to producers.
///
/// Every method is safe to call from any number of threads at once and
/// blocks only for a short critical section.
#[derive(Clone)]
pub struct CoordinatorHandle {
    shared: Arc<SharedState>,
}

impl CoordinatorHandle {
    pub(crate) fn new(shared: Arc<SharedState>) -> Self {
        Self { shared }
    }

    /// Current time according to the coordinator's clock.
    pub fn now(&self) -> Timestamp {
        self.shared.clock.now()
    }

    /// Pose node for `stamp`, reusing one within tolerance.
    ///
    /// Creating a node queues the initial prior (first node only) and asks
    /// every pose producer for a constraint from the node's time predecessor,
    /// and to its time successor when the node lands between two others.
    pub fn get_or_create_node(&self, stamp: Timestamp) -> Result<PoseKey, CoordinatorError> {
        let _gate = self.shared.enter();
        let _submission = self.shared.submissions().begin();
        let allocation = self.shared.allocator.get_or_create(stamp)?;
        if allocation.created {
            self.on_node_created(&allocation);
        }
        Ok(allocation.key)
    }

    /// Create a node for `stamp` even if another lies within tolerance.
    pub fn force_create_node(&self, stamp: Timestamp) -> PoseKey {
        let _gate = self.shared.enter();
        let _submission = self.shared.submissions().begin();
        let allocation = self.shared.allocator.force_create(stamp);
        if allocation.created {
            self.on_node_created(&allocation);
        }
        allocation.key
    }

    /// Newest pose node by timestamp, optimized or not.
    pub fn latest_node(&self) -> Option<(PoseKey, Timestamp)> {
        self.shared.allocator.latest()
    }

    /// Timestamp a pose node was created for.
    pub fn node_time(&self, key: PoseKey) -> Option<Timestamp> {
        self.shared.allocator.time_of(key)
    }

    pub fn allocate_landmark(&self) -> LandmarkKey {
        let _gate = self.shared.enter();
        self.shared.allocator.allocate_landmark()
    }

    /// Queue a factor for the next commit.
    pub fn submit_factor(&self, factor: Factor) {
        let _gate = self.shared.enter();
        let _submission = self.shared.submissions().begin();
        self.shared.push_pending(Arc::new(factor));
    }

    /// Most recent published snapshot.
    pub fn read_solution(&self) -> Arc<Snapshot> {
        self.shared.snapshot()
    }

    /// Newest optimized pose and the time of its node.
    pub fn latest_pose(&self) -> Option<(PoseKey, Timestamp, SE3)> {
        let snapshot = self.shared.snapshot();
        snapshot
            .latest_pose()
            .map(|(key, time, pose)| (key, time, pose.clone()))
    }

    pub fn register_pose_producer(&self, producer: Arc<dyn PoseProducer>) {
        self.shared.producers.register_pose_producer(producer);
    }

    pub fn register_readiness(&self, source: Arc<dyn Readiness>) {
        self.shared.producers.register_readiness(source);
    }

    /// Wait until every registered readiness source is idle.
    pub fn wait_all_ready(&self, timeout: std::time::Duration) -> bool {
        self.shared.producers.wait_all_ready(timeout)
    }

    /// Names of readiness sources with work in flight.
    pub fn busy_producers(&self) -> Vec<String> {
        self.shared.producers.busy()
    }

    pub fn pending_len(&self) -> usize {
        self.shared.pending_len()
    }

    pub fn num_nodes(&self) -> usize {
        self.shared.allocator.len()
    }

    pub fn phase(&self) -> CyclePhase {
        self.shared.phase()
    }

    fn on_node_created(&self, allocation: &NodeAllocation) {
        debug!("Created node {} at {}", allocation.key, allocation.time);

        if allocation.key.index() == 0 {
            if let Some((pose, noise)) = self.shared.initial_prior() {
                self.shared.push_pending(Arc::new(Factor::prior(
                    INITIAL_PRIOR_SOURCE,
                    allocation.key,
                    pose.clone(),
                    *noise,
                )));
            }
        }

        let node = PoseNode::new(allocation.key, allocation.time);
        let incoming = allocation
            .predecessor
            .map(|(key, time)| (PoseNode::new(key, time), node));
        // Out-of-order insert: also link forward so chains stay linear
        let outgoing = allocation
            .successor
            .map(|(key, time)| (node, PoseNode::new(key, time)));

        let producers = self.shared.producers.pose_producers();
        for (from, to) in incoming.into_iter().chain(outgoing) {
            for producer in &producers {
                match producer.relative_pose(from, to) {
                    Some(factor) => self.shared.push_pending(Arc::new(factor)),
                    None => debug!(
                        "{}: no relative pose for {} -> {}",
                        producer.name(),
                        from.key,
                        to.key
                    ),
                }
            }
        }
    }
}
