//! Factors: immutable constraints contributed by producers.

use std::sync::Arc;

use nalgebra::Vector3;

use crate::geometry::noise::sanitize_sigma;
use crate::geometry::{NoiseModel, SE3};

use super::types::{LandmarkKey, NodeKey, PoseKey};

/// The constraint a factor expresses.
#[derive(Debug, Clone)]
pub enum FactorKind {
    /// Absolute pose prior (anchors the graph).
    Prior {
        key: PoseKey,
        pose: SE3,
        noise: NoiseModel,
    },
    /// Relative pose from `from` to `to`, expressed in `from`'s frame.
    Between {
        from: PoseKey,
        to: PoseKey,
        measurement: SE3,
        noise: NoiseModel,
    },
    /// Landmark position observed from a pose, in the pose's frame.
    LandmarkObservation {
        pose: PoseKey,
        landmark: LandmarkKey,
        point: Vector3<f64>,
        sigma: f64,
    },
}

/// A constraint between graph nodes plus its uncertainty.
///
/// Every factor names the producer that contributed it. Fields are private:
/// once built, a factor is never mutated.
#[derive(Debug, Clone)]
pub struct Factor {
    source: Arc<str>,
    kind: FactorKind,
}

impl Factor {
    pub fn new(source: impl Into<Arc<str>>, kind: FactorKind) -> Self {
        Self {
            source: source.into(),
            kind,
        }
    }

    pub fn prior(source: impl Into<Arc<str>>, key: PoseKey, pose: SE3, noise: NoiseModel) -> Self {
        Self::new(source, FactorKind::Prior { key, pose, noise })
    }

    pub fn between(
        source: impl Into<Arc<str>>,
        from: PoseKey,
        to: PoseKey,
        measurement: SE3,
        noise: NoiseModel,
    ) -> Self {
        Self::new(
            source,
            FactorKind::Between {
                from,
                to,
                measurement,
                noise,
            },
        )
    }

    pub fn landmark_observation(
        source: impl Into<Arc<str>>,
        pose: PoseKey,
        landmark: LandmarkKey,
        point: Vector3<f64>,
        sigma: f64,
    ) -> Self {
        Self::new(
            source,
            FactorKind::LandmarkObservation {
                pose,
                landmark,
                point,
                sigma: sanitize_sigma(sigma),
            },
        )
    }

    /// Name of the contributing producer.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn kind(&self) -> &FactorKind {
        &self.kind
    }

    /// Pose nodes referenced by this factor.
    pub fn pose_keys(&self) -> Vec<PoseKey> {
        match &self.kind {
            FactorKind::Prior { key, .. } => vec![*key],
            FactorKind::Between { from, to, .. } => vec![*from, *to],
            FactorKind::LandmarkObservation { pose, .. } => vec![*pose],
        }
    }

    /// Landmark node referenced by this factor, if any.
    pub fn landmark_key(&self) -> Option<LandmarkKey> {
        match &self.kind {
            FactorKind::LandmarkObservation { landmark, .. } => Some(*landmark),
            _ => None,
        }
    }

    /// All referenced nodes.
    pub fn keys(&self) -> Vec<NodeKey> {
        let mut keys: Vec<NodeKey> = self.pose_keys().into_iter().map(NodeKey::from).collect();
        if let Some(landmark) = self.landmark_key() {
            keys.push(landmark.into());
        }
        keys
    }

    /// Residual dimension.
    pub fn dimension(&self) -> usize {
        match &self.kind {
            FactorKind::Prior { .. } | FactorKind::Between { .. } => 6,
            FactorKind::LandmarkObservation { .. } => 3,
        }
    }
}
