//! Odometry pose producer.
//!
//! Buffers timestamped odometry poses (odom -> body) and answers relative
//! pose requests by interpolating the buffer at both node times.

use std::collections::BTreeMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::geometry::{NoiseModel, SE3};
use crate::graph::Factor;
use crate::time::Timestamp;

use super::{PoseNode, PoseProducer};

/// Per-axis uncertainty of an odometry increment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OdometryNoise {
    pub roll_sigma: f64,
    pub pitch_sigma: f64,
    pub yaw_sigma: f64,
    pub translation_sigma: f64,
}

impl Default for OdometryNoise {
    fn default() -> Self {
        Self {
            roll_sigma: 0.05,
            pitch_sigma: 0.05,
            yaw_sigma: 0.05,
            translation_sigma: 0.05,
        }
    }
}

impl OdometryNoise {
    pub fn to_noise_model(&self) -> NoiseModel {
        NoiseModel::from_axes(
            self.roll_sigma,
            self.pitch_sigma,
            self.yaw_sigma,
            self.translation_sigma,
        )
    }
}

/// Relative-pose producer backed by an odometry buffer.
pub struct OdometryProducer {
    name: String,
    noise: NoiseModel,
    buffer: RwLock<BTreeMap<Timestamp, SE3>>,
}

impl OdometryProducer {
    pub fn new(name: impl Into<String>, noise: OdometryNoise) -> Self {
        Self {
            name: name.into(),
            noise: noise.to_noise_model(),
            buffer: RwLock::new(BTreeMap::new()),
        }
    }

    /// Add an odometry sample.
    pub fn push(&self, stamp: Timestamp, pose: SE3) {
        self.buffer.write().insert(stamp, pose);
    }

    pub fn len(&self) -> usize {
        self.buffer.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.read().is_empty()
    }

    /// Drop samples older than `stamp`, keeping one so later lookups can
    /// still interpolate from it.
    pub fn prune_before(&self, stamp: Timestamp) {
        let mut buffer = self.buffer.write();
        let keep_from = buffer.range(..=stamp).next_back().map(|(t, _)| *t);
        if let Some(keep_from) = keep_from {
            *buffer = buffer.split_off(&keep_from);
        }
    }

    /// Odometry pose at `stamp`, interpolated between the bracketing
    /// samples. `None` outside the buffered range.
    pub fn pose_at(&self, stamp: Timestamp) -> Option<SE3> {
        let buffer = self.buffer.read();
        let (t0, p0) = buffer.range(..=stamp).next_back()?;
        if *t0 == stamp {
            return Some(p0.clone());
        }
        let (t1, p1) = buffer.range(stamp..).next()?;

        let span = (t1.as_nanos() - t0.as_nanos()) as f64;
        let alpha = (stamp.as_nanos() - t0.as_nanos()) as f64 / span;
        Some(SE3 {
            rotation: p0
                .rotation
                .try_slerp(&p1.rotation, alpha, 1e-12)
                .unwrap_or(p0.rotation),
            translation: p0.translation.lerp(&p1.translation, alpha),
        })
    }
}

impl PoseProducer for OdometryProducer {
    fn name(&self) -> &str {
        &self.name
    }

    fn relative_pose(&self, from: PoseNode, to: PoseNode) -> Option<Factor> {
        let pose_from = self.pose_at(from.time)?;
        let pose_to = self.pose_at(to.time)?;
        Some(Factor::between(
            self.name.as_str(),
            from.key,
            to.key,
            pose_from.between(&pose_to),
            self.noise,
        ))
    }
}
