//! Symbol allocator: maps timestamps to pose nodes.
//!
//! A request for time `t` reuses the nearest existing node when it lies
//! strictly within the tolerance, otherwise a new node with the next key is
//! created. Lookup and insert happen under one lock, so concurrent callers
//! always agree on node identity. Nodes are indexed by timestamp value, so
//! out-of-order requests resolve the same way as in-order ones.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::CoordinatorError;
use crate::time::Timestamp;

use super::types::{LandmarkKey, PoseKey};

/// Outcome of a node request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeAllocation {
    pub key: PoseKey,

    /// Timestamp the node was created for (may differ from the request).
    pub time: Timestamp,

    /// True if this call created the node.
    pub created: bool,

    /// For new nodes: the nearest node strictly earlier in time.
    pub predecessor: Option<(PoseKey, Timestamp)>,

    /// For new nodes: the nearest node strictly later in time. Only set when
    /// the node was inserted out of order.
    pub successor: Option<(PoseKey, Timestamp)>,
}

#[derive(Debug, Default)]
struct AllocatorState {
    by_time: BTreeMap<Timestamp, PoseKey>,
    /// Node timestamps indexed by key.
    times: Vec<Timestamp>,
    /// Nodes created through `force_create`; exempt from the tolerance check.
    forced: BTreeSet<PoseKey>,
    next_landmark: u64,
}

impl AllocatorState {
    /// Nearest node to `t`; ties go to the earlier node.
    fn nearest(&self, t: Timestamp) -> Option<(Timestamp, PoseKey)> {
        let before = self.by_time.range(..=t).next_back();
        let after = self.by_time.range(t..).next();
        match (before, after) {
            (Some((tb, kb)), Some((ta, ka))) => {
                if t.abs_diff(*ta) < t.abs_diff(*tb) {
                    Some((*ta, *ka))
                } else {
                    Some((*tb, *kb))
                }
            }
            (Some((tb, kb)), None) => Some((*tb, *kb)),
            (None, Some((ta, ka))) => Some((*ta, *ka)),
            (None, None) => None,
        }
    }

    fn predecessor(&self, t: Timestamp) -> Option<(PoseKey, Timestamp)> {
        self.by_time.range(..t).next_back().map(|(time, key)| (*key, *time))
    }

    fn successor(&self, t: Timestamp) -> Option<(PoseKey, Timestamp)> {
        self.by_time
            .range((Bound::Excluded(t), Bound::Unbounded))
            .next()
            .map(|(time, key)| (*key, *time))
    }

    fn insert(&mut self, t: Timestamp) -> NodeAllocation {
        let key = PoseKey::new(self.times.len() as u64);
        let predecessor = self.predecessor(t);
        let successor = self.successor(t);
        self.by_time.insert(t, key);
        self.times.push(t);
        NodeAllocation {
            key,
            time: t,
            created: true,
            predecessor,
            successor,
        }
    }

    fn existing(key: PoseKey, time: Timestamp) -> NodeAllocation {
        NodeAllocation {
            key,
            time,
            created: false,
            predecessor: None,
            successor: None,
        }
    }

    /// Check the indices agree and the new node keeps its distance to
    /// non-forced neighbours.
    fn check(&self, alloc: &NodeAllocation, tolerance: Duration) -> Result<(), CoordinatorError> {
        let conflict = |detail: String| CoordinatorError::AllocationConflict {
            key: alloc.key,
            time: alloc.time,
            detail,
        };

        if self.by_time.len() != self.times.len() {
            return Err(conflict(format!(
                "index sizes differ ({} by time, {} by key)",
                self.by_time.len(),
                self.times.len()
            )));
        }
        if self.times.get(alloc.key.0 as usize) != Some(&alloc.time) {
            return Err(conflict("key index does not match timestamp".to_string()));
        }

        let neighbours = self
            .by_time
            .range(..alloc.time)
            .next_back()
            .into_iter()
            .chain(
                self.by_time
                    .range((Bound::Excluded(alloc.time), Bound::Unbounded))
                    .next(),
            );
        for (time, key) in neighbours {
            if !self.forced.contains(key) && alloc.time.abs_diff(*time) < tolerance {
                return Err(conflict(format!("{} at {} is within tolerance", key, time)));
            }
        }
        Ok(())
    }
}

/// Thread-safe timestamp to pose node mapping.
#[derive(Debug)]
pub struct SymbolAllocator {
    tolerance: Duration,
    state: Mutex<AllocatorState>,
}

impl SymbolAllocator {
    pub fn new(tolerance: Duration) -> Self {
        Self {
            tolerance,
            state: Mutex::new(AllocatorState::default()),
        }
    }

    pub fn tolerance(&self) -> Duration {
        self.tolerance
    }

    /// Return the node for `t`, creating one if no node lies within tolerance.
    pub fn get_or_create(&self, t: Timestamp) -> Result<NodeAllocation, CoordinatorError> {
        let mut state = self.state.lock();

        if let Some((time, key)) = state.nearest(t) {
            if time == t || t.abs_diff(time) < self.tolerance {
                return Ok(AllocatorState::existing(key, time));
            }
        }

        let alloc = state.insert(t);
        state.check(&alloc, self.tolerance)?;
        Ok(alloc)
    }

    /// Create a node for `t` even if another node lies within tolerance.
    ///
    /// An exact timestamp match still returns the existing node.
    pub fn force_create(&self, t: Timestamp) -> NodeAllocation {
        let mut state = self.state.lock();
        if let Some(key) = state.by_time.get(&t).copied() {
            return AllocatorState::existing(key, t);
        }
        let alloc = state.insert(t);
        state.forced.insert(alloc.key);
        alloc
    }

    /// Timestamp a node was created for.
    pub fn time_of(&self, key: PoseKey) -> Option<Timestamp> {
        self.state.lock().times.get(key.0 as usize).copied()
    }

    /// Node with the newest timestamp.
    pub fn latest(&self) -> Option<(PoseKey, Timestamp)> {
        self.state
            .lock()
            .by_time
            .iter()
            .next_back()
            .map(|(time, key)| (*key, *time))
    }

    /// Nearest node strictly earlier than `t`.
    pub fn predecessor(&self, t: Timestamp) -> Option<(PoseKey, Timestamp)> {
        self.state.lock().predecessor(t)
    }

    /// Allocate a fresh landmark key.
    pub fn allocate_landmark(&self) -> LandmarkKey {
        let mut state = self.state.lock();
        let key = LandmarkKey::new(state.next_landmark);
        state.next_landmark += 1;
        key
    }

    /// Number of pose nodes.
    pub fn len(&self) -> usize {
        self.state.lock().times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget every node; keys restart from zero.
    pub fn reset(&self) {
        *self.state.lock() = AllocatorState::default();
    }
}
