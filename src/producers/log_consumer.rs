//! Output consumer that logs the newest optimized pose.

use tracing::info;

use crate::graph::Snapshot;

use super::OutputConsumer;

/// Logs the latest pose of each published snapshot, the way a live system
/// would publish its map -> odom correction.
#[derive(Debug, Default)]
pub struct PoseLogConsumer {
    updates: u64,
}

impl PoseLogConsumer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn updates(&self) -> u64 {
        self.updates
    }
}

impl OutputConsumer for PoseLogConsumer {
    fn name(&self) -> &str {
        "pose_log"
    }

    fn on_solution_updated(&mut self, snapshot: &Snapshot) -> anyhow::Result<()> {
        self.updates += 1;
        if let Some((key, time, pose)) = snapshot.latest_pose() {
            let t = &pose.translation;
            info!(
                "[cycle {}] {} @ {}: [{:.3}, {:.3}, {:.3}] ({} poses, {} factors)",
                snapshot.cycle,
                key,
                time,
                t.x,
                t.y,
                t.z,
                snapshot.solution.num_poses(),
                snapshot.graph.len()
            );
        }
        Ok(())
    }
}
