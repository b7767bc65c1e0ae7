//! FactorGraph - committed, optimizable factors.
//!
//! Append-only during normal operation: factors enter in commit order and are
//! only removed by a full reset. Factors are held behind `Arc` so published
//! snapshots share them with the live graph instead of deep-copying.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::time::Timestamp;

use super::factor::Factor;
use super::types::{LandmarkKey, PoseKey};

/// Committed graph: factors plus the variables they reference.
#[derive(Debug, Clone, Default)]
pub struct FactorGraph {
    /// Factors in commit order.
    factors: Vec<Arc<Factor>>,

    /// Pose nodes with the timestamp they were allocated for.
    pose_times: BTreeMap<PoseKey, Timestamp>,

    /// Landmark nodes.
    landmarks: BTreeSet<LandmarkKey>,
}

impl FactorGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a factor.
    ///
    /// `time_of` resolves the timestamp of pose nodes the graph has not seen
    /// yet; nodes it cannot resolve are recorded at [`Timestamp::ZERO`].
    pub fn add(&mut self, factor: Arc<Factor>, time_of: impl Fn(PoseKey) -> Option<Timestamp>) {
        for key in factor.pose_keys() {
            self.pose_times
                .entry(key)
                .or_insert_with(|| time_of(key).unwrap_or(Timestamp::ZERO));
        }
        if let Some(landmark) = factor.landmark_key() {
            self.landmarks.insert(landmark);
        }
        self.factors.push(factor);
    }

    /// Number of factors.
    pub fn len(&self) -> usize {
        self.factors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factors.is_empty()
    }

    pub fn factors(&self) -> &[Arc<Factor>] {
        &self.factors
    }

    pub fn num_poses(&self) -> usize {
        self.pose_times.len()
    }

    pub fn num_landmarks(&self) -> usize {
        self.landmarks.len()
    }

    pub fn contains_pose(&self, key: PoseKey) -> bool {
        self.pose_times.contains_key(&key)
    }

    pub fn pose_time(&self, key: PoseKey) -> Option<Timestamp> {
        self.pose_times.get(&key).copied()
    }

    /// Pose nodes ordered by key.
    pub fn pose_keys(&self) -> impl Iterator<Item = PoseKey> + '_ {
        self.pose_times.keys().copied()
    }

    /// Pose nodes ordered by timestamp.
    pub fn poses_by_time(&self) -> Vec<(PoseKey, Timestamp)> {
        let mut poses: Vec<(PoseKey, Timestamp)> =
            self.pose_times.iter().map(|(k, t)| (*k, *t)).collect();
        poses.sort_by_key(|(k, t)| (*t, *k));
        poses
    }

    pub fn landmark_keys(&self) -> impl Iterator<Item = LandmarkKey> + '_ {
        self.landmarks.iter().copied()
    }

    /// Number of factors contributed by `source`.
    pub fn count_from(&self, source: &str) -> usize {
        self.factors.iter().filter(|f| f.source() == source).count()
    }

    pub fn clear(&mut self) {
        self.factors.clear();
        self.pose_times.clear();
        self.landmarks.clear();
    }
}
