//! Zero-motion pose producer.

use crate::geometry::{NoiseModel, SE3};
use crate::graph::Factor;

use super::{PoseNode, PoseProducer};

/// Links consecutive pose nodes with an identity constraint.
///
/// Useful for a stationary sensor, or as a weak fallback that keeps the graph
/// connected when no odometry source is available.
#[derive(Debug, Clone)]
pub struct NoMotionProducer {
    name: String,
    noise: NoiseModel,
}

impl NoMotionProducer {
    pub fn new(name: impl Into<String>, noise: NoiseModel) -> Self {
        Self {
            name: name.into(),
            noise,
        }
    }
}

impl Default for NoMotionProducer {
    fn default() -> Self {
        Self::new("no_motion", NoiseModel::isotropic(1.0, 1.0))
    }
}

impl PoseProducer for NoMotionProducer {
    fn name(&self) -> &str {
        &self.name
    }

    fn relative_pose(&self, from: PoseNode, to: PoseNode) -> Option<Factor> {
        Some(Factor::between(
            self.name.as_str(),
            from.key,
            to.key,
            SE3::identity(),
            self.noise,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{FactorKind, PoseKey};
    use crate::time::Timestamp;

    #[test]
    fn test_identity_between() {
        let producer = NoMotionProducer::default();
        let factor = producer
            .relative_pose(
                PoseNode::new(PoseKey::new(0), Timestamp::from_millis(0)),
                PoseNode::new(PoseKey::new(1), Timestamp::from_millis(100)),
            )
            .unwrap();

        assert_eq!(factor.source(), "no_motion");
        match factor.kind() {
            FactorKind::Between {
                from,
                to,
                measurement,
                ..
            } => {
                assert_eq!((*from, *to), (PoseKey::new(0), PoseKey::new(1)));
                assert_eq!(*measurement, SE3::identity());
            }
            other => panic!("unexpected kind {:?}", other),
        }
    }
}
