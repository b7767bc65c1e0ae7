//! Registries for producers and consumers.
//!
//! Pose producers and readiness sources are shared (`Arc`) because they are
//! called from whichever producer thread creates a node. Output consumers
//! are owned by the coordinator and addressed by [`ConsumerId`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use super::{OutputConsumer, PoseProducer, Readiness};

/// Shared registry of pose producers and readiness sources.
#[derive(Default)]
pub struct ProducerRegistry {
    pose_producers: RwLock<Vec<Arc<dyn PoseProducer>>>,
    readiness: RwLock<Vec<Arc<dyn Readiness>>>,
}

impl ProducerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_pose_producer(&self, producer: Arc<dyn PoseProducer>) {
        self.pose_producers.write().push(producer);
    }

    /// Registered pose producers, in registration order.
    ///
    /// Returns a copy of the list so callers never hold the lock while a
    /// producer runs.
    pub fn pose_producers(&self) -> Vec<Arc<dyn PoseProducer>> {
        self.pose_producers.read().clone()
    }

    pub fn register_readiness(&self, source: Arc<dyn Readiness>) {
        self.readiness.write().push(source);
    }

    pub fn readiness_sources(&self) -> Vec<Arc<dyn Readiness>> {
        self.readiness.read().clone()
    }

    /// Names of sources that currently have work in flight.
    pub fn busy(&self) -> Vec<String> {
        self.readiness
            .read()
            .iter()
            .filter(|source| !source.ready())
            .map(|source| source.name().to_string())
            .collect()
    }

    /// Wait until every source is ready. Returns false on timeout.
    pub fn wait_all_ready(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        for source in self.readiness_sources() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if !source.wait_ready(remaining) {
                return false;
            }
        }
        true
    }
}

/// Handle to a registered output consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConsumerId(usize);

impl ConsumerId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Output consumers in registration order.
#[derive(Default)]
pub struct ConsumerRegistry {
    consumers: Vec<Box<dyn OutputConsumer>>,
}

impl ConsumerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, consumer: Box<dyn OutputConsumer>) -> ConsumerId {
        self.consumers.push(consumer);
        ConsumerId(self.consumers.len() - 1)
    }

    pub fn get(&self, id: ConsumerId) -> Option<&dyn OutputConsumer> {
        self.consumers.get(id.0).map(|c| c.as_ref())
    }

    pub fn len(&self) -> usize {
        self.consumers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.consumers.is_empty()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Box<dyn OutputConsumer>> {
        self.consumers.iter_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Snapshot;
    use crate::producers::{InFlight, NoMotionProducer};

    struct Named(&'static str);

    impl OutputConsumer for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn on_solution_updated(&mut self, _snapshot: &Snapshot) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_consumer_ids_follow_registration_order() {
        let mut registry = ConsumerRegistry::new();
        let a = registry.register(Box::new(Named("tsdf")));
        let b = registry.register(Box::new(Named("trajectory")));

        assert_eq!(a.index(), 0);
        assert_eq!(b.index(), 1);
        assert_eq!(registry.get(b).map(|c| c.name()), Some("trajectory"));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_busy_sources() {
        let registry = ProducerRegistry::new();
        let icp = InFlight::new("icp");
        let planes = InFlight::new("planes");
        registry.register_readiness(icp.clone());
        registry.register_readiness(planes.clone());
        registry.register_pose_producer(Arc::new(NoMotionProducer::default()));

        let _guard = icp.begin();
        assert_eq!(registry.busy(), vec!["icp".to_string()]);
        assert!(!registry.wait_all_ready(Duration::from_millis(10)));
        assert_eq!(registry.pose_producers().len(), 1);
    }
}
