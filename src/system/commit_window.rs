//! Commit-window scheduler.
//!
//! Decides, once per coordinator cycle, which drained factors enter the
//! committed graph now and which are held for a later cycle.

use std::sync::Arc;
use std::time::Duration;

use crate::graph::{Factor, PoseKey};
use crate::time::Timestamp;

use super::config::CommitPolicyConfig;

/// Runtime form of [`CommitPolicyConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitPolicy {
    EveryCycle,
    Suppressed,
    Windowed {
        window: Duration,
        max_hold_cycles: u32,
    },
}

impl From<CommitPolicyConfig> for CommitPolicy {
    fn from(config: CommitPolicyConfig) -> Self {
        match config {
            CommitPolicyConfig::EveryCycle => CommitPolicy::EveryCycle,
            CommitPolicyConfig::Suppressed => CommitPolicy::Suppressed,
            CommitPolicyConfig::Windowed {
                window_ms,
                max_hold_cycles,
            } => CommitPolicy::Windowed {
                window: Duration::from_millis(window_ms),
                max_hold_cycles,
            },
        }
    }
}

impl CommitPolicy {
    /// Whether each submission should wake the coordinator.
    pub fn wakes_on_submit(&self) -> bool {
        matches!(self, CommitPolicy::Suppressed)
    }
}

#[derive(Debug)]
struct HeldFactor {
    factor: Arc<Factor>,
    cycles_held: u32,
}

/// Factors drained from the pending buffer but not yet committed.
#[derive(Debug)]
pub struct CommitWindow {
    policy: CommitPolicy,
    held: Vec<HeldFactor>,
}

impl CommitWindow {
    pub fn new(policy: CommitPolicy) -> Self {
        Self {
            policy,
            held: Vec::new(),
        }
    }

    pub fn policy(&self) -> CommitPolicy {
        self.policy
    }

    /// Number of factors currently held back.
    pub fn held(&self) -> usize {
        self.held.len()
    }

    /// Merge `incoming` (in submission order) and return the factors to
    /// commit this cycle, preserving order.
    ///
    /// `time_of` resolves pose node timestamps; unknown nodes never hold a
    /// factor back.
    pub fn select(
        &mut self,
        incoming: Vec<Arc<Factor>>,
        now: Timestamp,
        time_of: impl Fn(PoseKey) -> Option<Timestamp>,
    ) -> Vec<Arc<Factor>> {
        self.held
            .extend(incoming.into_iter().map(|factor| HeldFactor {
                factor,
                cycles_held: 0,
            }));

        let (window, max_hold_cycles) = match self.policy {
            CommitPolicy::EveryCycle | CommitPolicy::Suppressed => return self.flush(),
            CommitPolicy::Windowed {
                window,
                max_hold_cycles,
            } => (window, max_hold_cycles),
        };

        let cutoff = now.saturating_sub(window);
        let mut ready = Vec::new();
        let mut waiting = Vec::new();
        for mut entry in self.held.drain(..) {
            let settled = entry
                .factor
                .pose_keys()
                .into_iter()
                .all(|key| time_of(key).is_none_or(|t| t <= cutoff));
            if settled || entry.cycles_held >= max_hold_cycles {
                ready.push(entry.factor);
            } else {
                entry.cycles_held += 1;
                waiting.push(entry);
            }
        }
        self.held = waiting;
        ready
    }

    /// Release everything held regardless of policy.
    pub fn flush(&mut self) -> Vec<Arc<Factor>> {
        self.held.drain(..).map(|entry| entry.factor).collect()
    }

    pub fn clear(&mut self) {
        self.held.clear();
    }
}
