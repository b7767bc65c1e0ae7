//! State shared between producer threads and the coordinator thread.
//!
//! Producers only ever append to the pending buffer and read the published
//! snapshot. Everything else (committed graph, optimizer, consumers) lives on
//! the coordinator and is never reachable from here.

use std::mem;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::geometry::{NoiseModel, SE3};
use crate::graph::{Factor, Snapshot, SymbolAllocator};
use crate::producers::{InFlight, ProducerRegistry};
use crate::time::Clock;

use super::commit_window::CommitPolicy;
use super::config::CoordinatorConfig;
use super::cycle::CyclePhase;

/// Shared state accessible by producer threads and the coordinator thread.
pub struct SharedState {
    /// Time source for commit windows and snapshot stamps.
    pub clock: Arc<dyn Clock>,

    /// Timestamp to pose node mapping.
    pub allocator: SymbolAllocator,

    /// Pose producers and readiness sources.
    pub producers: ProducerRegistry,

    /// Factors submitted since the last drain. Multi-writer, single drainer.
    pending: Mutex<Vec<Arc<Factor>>>,

    /// Latest published snapshot, replaced whole on every publish.
    snapshot: RwLock<Arc<Snapshot>>,

    /// Submissions currently inside a handle entry point.
    submissions: Arc<InFlight>,

    /// Shared by handle entry points, exclusive for reset.
    gate: RwLock<()>,

    /// Current [`CyclePhase`] of the coordinator.
    phase: AtomicU8,

    /// Set by submissions (suppressed policy) and shutdown to cut the idle
    /// wait short.
    wake_requested: Mutex<bool>,
    wake: Condvar,
    wake_on_submit: bool,

    /// Request the coordinator thread to exit.
    shutdown_requested: AtomicBool,

    /// Prior placed on the first pose node.
    initial_prior: Option<(SE3, NoiseModel)>,
}

impl SharedState {
    pub fn new(config: &CoordinatorConfig, clock: Arc<dyn Clock>) -> Arc<Self> {
        let policy = CommitPolicy::from(config.commit_policy);
        Arc::new(Self {
            clock,
            allocator: SymbolAllocator::new(config.node_tolerance()),
            producers: ProducerRegistry::new(),
            pending: Mutex::new(Vec::new()),
            snapshot: RwLock::new(Arc::new(Snapshot::default())),
            submissions: InFlight::new("coordinator_submissions"),
            gate: RwLock::new(()),
            phase: AtomicU8::new(CyclePhase::Idle as u8),
            wake_requested: Mutex::new(false),
            wake: Condvar::new(),
            wake_on_submit: policy.wakes_on_submit(),
            shutdown_requested: AtomicBool::new(false),
            initial_prior: config
                .initial_pose
                .map(|pose| (pose.to_se3(), config.prior_noise.to_noise_model())),
        })
    }

    /// Append a factor to the pending buffer.
    pub fn push_pending(&self, factor: Arc<Factor>) {
        self.pending.lock().push(factor);
        if self.wake_on_submit {
            self.request_wake();
        }
    }

    /// Take every pending factor, in submission order.
    pub fn drain_pending(&self) -> Vec<Arc<Factor>> {
        mem::take(&mut *self.pending.lock())
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshot.read().clone()
    }

    pub fn publish(&self, snapshot: Arc<Snapshot>) {
        *self.snapshot.write() = snapshot;
    }

    pub fn submissions(&self) -> &Arc<InFlight> {
        &self.submissions
    }

    /// Enter a handle critical section. Blocks while a reset holds the gate.
    ///
    /// Recursive so a producer may call back into the handle from inside
    /// `relative_pose`.
    pub(crate) fn enter(&self) -> RwLockReadGuard<'_, ()> {
        self.gate.read_recursive()
    }

    /// Exclude handle entry points, or `None` if one is running.
    pub(crate) fn try_exclusive(&self) -> Option<RwLockWriteGuard<'_, ()>> {
        self.gate.try_write()
    }

    pub fn initial_prior(&self) -> Option<&(SE3, NoiseModel)> {
        self.initial_prior.as_ref()
    }

    pub fn phase(&self) -> CyclePhase {
        CyclePhase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    pub fn set_phase(&self, phase: CyclePhase) {
        self.phase.store(phase as u8, Ordering::SeqCst);
    }

    /// Wake the coordinator thread if it is waiting for its next cycle.
    pub fn request_wake(&self) {
        *self.wake_requested.lock() = true;
        self.wake.notify_one();
    }

    /// Wait up to `timeout` for a wake request. Returns true if woken.
    pub fn wait_for_work(&self, timeout: Duration) -> bool {
        let mut requested = self.wake_requested.lock();
        if !*requested && !self.is_shutdown_requested() {
            self.wake.wait_for(&mut requested, timeout);
        }
        mem::replace(&mut *requested, false)
    }

    pub fn request_shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::SeqCst);
        self.request_wake();
    }

    pub fn clear_shutdown(&self) {
        self.shutdown_requested.store(false, Ordering::SeqCst);
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::SeqCst)
    }

    /// Drop pending factors, allocator nodes and the published snapshot.
    pub(crate) fn clear(&self) {
        let mut pending = self.pending.lock();
        pending.clear();
        self.allocator.reset();
        *self.snapshot.write() = Arc::new(Snapshot::default());
    }
}
