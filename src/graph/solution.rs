//! Solution values and published snapshots.

use std::collections::BTreeMap;
use std::sync::Arc;

use nalgebra::Vector3;

use crate::geometry::SE3;
use crate::time::Timestamp;

use super::factor_graph::FactorGraph;
use super::types::{LandmarkKey, PoseKey};

/// Estimated values for graph variables.
#[derive(Debug, Clone, Default)]
pub struct Solution {
    poses: BTreeMap<PoseKey, SE3>,
    landmarks: BTreeMap<LandmarkKey, Vector3<f64>>,
}

impl Solution {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pose(&self, key: PoseKey) -> Option<&SE3> {
        self.poses.get(&key)
    }

    pub fn landmark(&self, key: LandmarkKey) -> Option<&Vector3<f64>> {
        self.landmarks.get(&key)
    }

    pub fn insert_pose(&mut self, key: PoseKey, pose: SE3) {
        self.poses.insert(key, pose);
    }

    pub fn insert_landmark(&mut self, key: LandmarkKey, position: Vector3<f64>) {
        self.landmarks.insert(key, position);
    }

    pub fn poses(&self) -> impl Iterator<Item = (PoseKey, &SE3)> {
        self.poses.iter().map(|(k, v)| (*k, v))
    }

    pub fn landmarks(&self) -> impl Iterator<Item = (LandmarkKey, &Vector3<f64>)> {
        self.landmarks.iter().map(|(k, v)| (*k, v))
    }

    pub fn num_poses(&self) -> usize {
        self.poses.len()
    }

    pub fn num_landmarks(&self) -> usize {
        self.landmarks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.poses.is_empty() && self.landmarks.is_empty()
    }
}

/// One consistent (solution, graph) pair as published by a coordinator cycle.
///
/// Snapshots are immutable and shared behind `Arc`; a new cycle replaces the
/// whole snapshot, so readers never see a solution from one cycle paired with
/// a graph from another.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    /// Optimized values.
    pub solution: Solution,

    /// The committed graph the solution was computed from. Shared with the
    /// coordinator until its next commit.
    pub graph: Arc<FactorGraph>,

    /// Clock time when the snapshot was produced.
    pub as_of: Timestamp,

    /// Cycle number that produced it (0 = initial empty snapshot).
    pub cycle: u64,
}

impl Snapshot {
    /// Newest pose (by node timestamp) that has an estimate.
    pub fn latest_pose(&self) -> Option<(PoseKey, Timestamp, &SE3)> {
        self.graph
            .poses_by_time()
            .into_iter()
            .rev()
            .find_map(|(key, time)| self.solution.pose(key).map(|pose| (key, time, pose)))
    }

    /// Estimated trajectory ordered by node timestamp.
    pub fn trajectory(&self) -> Vec<(Timestamp, SE3)> {
        self.graph
            .poses_by_time()
            .into_iter()
            .filter_map(|(key, time)| self.solution.pose(key).map(|pose| (time, pose.clone())))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::NoiseModel;
    use crate::graph::Factor;
    use std::sync::Arc;

    #[test]
    fn test_latest_pose_uses_timestamp_order() {
        let mut graph = FactorGraph::new();
        let time_of = |k: PoseKey| match k.0 {
            0 => Some(Timestamp::from_millis(300)),
            _ => Some(Timestamp::from_millis(100)),
        };
        graph.add(
            Arc::new(Factor::between(
                "odom",
                PoseKey::new(1),
                PoseKey::new(0),
                SE3::identity(),
                NoiseModel::default(),
            )),
            time_of,
        );

        let mut solution = Solution::new();
        solution.insert_pose(PoseKey::new(0), SE3::from_translation(Vector3::x()));
        solution.insert_pose(PoseKey::new(1), SE3::identity());

        let snapshot = Snapshot {
            solution,
            graph: Arc::new(graph),
            as_of: Timestamp::from_millis(400),
            cycle: 1,
        };

        let (key, time, _) = snapshot.latest_pose().unwrap();
        assert_eq!(key, PoseKey::new(0));
        assert_eq!(time, Timestamp::from_millis(300));
        assert_eq!(snapshot.trajectory().len(), 2);
    }

    #[test]
    fn test_empty_snapshot() {
        let snapshot = Snapshot::default();
        assert!(snapshot.latest_pose().is_none());
        assert!(snapshot.solution.is_empty());
    }
}
