//! Coordinator - owns the committed graph and runs the commit/optimize/publish
//! cycle.
//!
//! The coordinator is the single writer of the committed graph. Producers
//! reach it only through a [`CoordinatorHandle`]. Cycles can be driven
//! manually with [`Coordinator::run_cycle`] or on a dedicated thread with
//! [`Coordinator::spawn`].

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};
use tracing::{debug, error, info, warn};

use crate::error::{CoordinatorError, OptimizerError};
use crate::geometry::SE3;
use crate::graph::{FactorGraph, PoseKey, Snapshot, initial_estimate};
use crate::optimizer::Optimizer;
use crate::producers::{ConsumerId, ConsumerRegistry, OutputConsumer};
use crate::time::{Clock, Timestamp};

use super::commit_window::{CommitPolicy, CommitWindow};
use super::config::CoordinatorConfig;
use super::cycle::{CoordinatorStats, CyclePhase, CycleReport, OptimizeOutcome};
use super::handle::CoordinatorHandle;
use super::shared_state::SharedState;

/// Per-cycle log line, promoted to info in debug mode.
macro_rules! cycle_log {
    ($debug:expr, $($arg:tt)+) => {
        if $debug {
            info!($($arg)+);
        } else {
            debug!($($arg)+);
        }
    };
}

/// Time-indexed pose graph coordinator.
pub struct Coordinator {
    shared: Arc<SharedState>,
    config: CoordinatorConfig,
    optimizer: Box<dyn Optimizer>,
    window: CommitWindow,

    /// Committed graph. Only this struct mutates it; published snapshots
    /// share it until the next commit.
    graph: Arc<FactorGraph>,

    consumers: ConsumerRegistry,
    stats: CoordinatorStats,
    cycle: u64,

    /// Graph changed (or the last optimization failed) since the last publish.
    dirty: bool,
}

impl Coordinator {
    pub fn new(
        config: CoordinatorConfig,
        clock: Arc<dyn Clock>,
        optimizer: Box<dyn Optimizer>,
    ) -> Self {
        let shared = SharedState::new(&config, clock);
        let window = CommitWindow::new(CommitPolicy::from(config.commit_policy));
        Self {
            shared,
            config,
            optimizer,
            window,
            graph: Arc::new(FactorGraph::new()),
            consumers: ConsumerRegistry::new(),
            stats: CoordinatorStats::default(),
            cycle: 0,
            dirty: false,
        }
    }

    /// Handle for producers.
    pub fn handle(&self) -> CoordinatorHandle {
        CoordinatorHandle::new(Arc::clone(&self.shared))
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn register_output_consumer(&mut self, consumer: Box<dyn OutputConsumer>) -> ConsumerId {
        info!("Registered output consumer '{}'", consumer.name());
        self.consumers.register(consumer)
    }

    pub fn stats(&self) -> &CoordinatorStats {
        &self.stats
    }

    /// Committed graph as of the last commit.
    pub fn graph(&self) -> &FactorGraph {
        &self.graph
    }

    /// Factors held back by the commit window.
    pub fn held(&self) -> usize {
        self.window.held()
    }

    /// Newest optimized pose and the time of its node.
    pub fn latest_pose(&self) -> Option<(PoseKey, Timestamp, SE3)> {
        self.handle().latest_pose()
    }

    /// Run one Idle -> CommitPending -> Optimize -> Publish -> Idle cycle.
    pub fn run_cycle(&mut self) -> CycleReport {
        self.cycle_with(false)
    }

    /// Run a cycle that commits everything pending and held, regardless of
    /// the commit policy.
    pub fn flush(&mut self) -> CycleReport {
        self.cycle_with(true)
    }

    fn cycle_with(&mut self, force_commit: bool) -> CycleReport {
        self.cycle += 1;
        self.stats.cycles += 1;
        let now = self.shared.clock.now();

        // CommitPending
        self.shared.set_phase(CyclePhase::CommitPending);
        let incoming = self.shared.drain_pending();
        let allocator = &self.shared.allocator;
        let mut ready = self.window.select(incoming, now, |key| allocator.time_of(key));
        if force_commit {
            ready.extend(self.window.flush());
        }
        let committed = ready.len();
        if committed > 0 {
            let graph = Arc::make_mut(&mut self.graph);
            for factor in ready {
                graph.add(factor, |key| allocator.time_of(key));
            }
            self.dirty = true;
            self.stats.commits += 1;
            self.stats.factors_committed += committed as u64;
        }

        // Optimize
        self.shared.set_phase(CyclePhase::Optimize);
        let graph_size = self.graph.len();
        let outcome = if self.dirty && !self.graph.is_empty() {
            self.optimize(now)
        } else {
            OptimizeOutcome::Skipped
        };

        // Publish
        let mut published = 0;
        let mut failed_consumers = Vec::new();
        if outcome == OptimizeOutcome::Optimized {
            self.shared.set_phase(CyclePhase::Publish);
            let snapshot = self.shared.snapshot();
            for consumer in self.consumers.iter_mut() {
                let result =
                    panic::catch_unwind(AssertUnwindSafe(|| consumer.on_solution_updated(&snapshot)))
                        .unwrap_or_else(|payload| {
                            Err(anyhow::anyhow!("panicked: {}", panic_message(payload.as_ref())))
                        });
                match result {
                    Ok(()) => published += 1,
                    Err(e) => {
                        warn!(
                            "Output consumer '{}' failed on cycle {}: {:#}",
                            consumer.name(),
                            self.cycle,
                            e
                        );
                        self.stats.consumer_failures += 1;
                        failed_consumers.push(consumer.name().to_string());
                    }
                }
            }
        }
        self.shared.set_phase(CyclePhase::Idle);

        let report = CycleReport {
            cycle: self.cycle,
            committed,
            held: self.window.held(),
            graph_size,
            outcome,
            published,
            failed_consumers,
        };
        cycle_log!(
            self.config.debug,
            "[Coordinator] cycle {}: committed {}, held {}, graph {}, {:?}",
            report.cycle,
            report.committed,
            report.held,
            report.graph_size,
            report.outcome
        );
        report
    }

    /// Optimize the committed graph and publish the result as one snapshot.
    fn optimize(&mut self, now: Timestamp) -> OptimizeOutcome {
        let previous = self.shared.snapshot();
        let initial = initial_estimate(&self.graph, &previous.solution);

        let optimizer = &mut self.optimizer;
        let graph = &self.graph;
        let result = panic::catch_unwind(AssertUnwindSafe(|| optimizer.optimize(graph, &initial)))
            .unwrap_or_else(|payload| {
                Err(OptimizerError::Panicked(panic_message(payload.as_ref())))
            });

        match result {
            Ok(solution) => {
                self.stats.optimizations += 1;
                self.dirty = false;
                self.shared.publish(Arc::new(Snapshot {
                    solution,
                    graph: Arc::clone(&self.graph),
                    as_of: now,
                    cycle: self.cycle,
                }));
                OptimizeOutcome::Optimized
            }
            Err(e) => {
                self.stats.optimizer_failures += 1;
                warn!(
                    "[Coordinator] {} failed on cycle {}: {}. Keeping cycle {} solution.",
                    self.optimizer.name(),
                    self.cycle,
                    e,
                    previous.cycle
                );
                OptimizeOutcome::Failed(e)
            }
        }
    }

    /// Return to the initial empty state.
    ///
    /// Fails if a submission is mid-critical-section or any registered
    /// readiness source still has work in flight. Handle entry points are
    /// held off from the check until the state is cleared. Registered
    /// producers and consumers stay registered.
    pub fn reset(&mut self) -> Result<(), CoordinatorError> {
        let Some(_exclusive) = self.shared.try_exclusive() else {
            return Err(CoordinatorError::ResetWhileActive {
                in_flight: self.shared.submissions().count().max(1),
            });
        };
        let busy = self.shared.producers.busy().len();
        if busy > 0 {
            return Err(CoordinatorError::ResetWhileActive { in_flight: busy });
        }

        self.shared.clear();
        self.window.clear();
        self.graph = Arc::new(FactorGraph::new());
        self.cycle = 0;
        self.dirty = false;
        self.stats = CoordinatorStats::default();
        info!("[Coordinator] reset");
        Ok(())
    }

    /// Run cycles on a dedicated thread until stopped.
    pub fn spawn(self) -> Result<CoordinatorThread> {
        let shared = Arc::clone(&self.shared);
        shared.clear_shutdown();
        let handle = thread::Builder::new()
            .name("coordinator".to_string())
            .spawn(move || {
                let mut coordinator = self;
                coordinator.run();
                coordinator
            })
            .context("Failed to spawn coordinator thread")?;

        Ok(CoordinatorThread {
            shared,
            handle: Some(handle),
        })
    }

    /// Coordinator thread loop.
    fn run(&mut self) {
        info!(
            "Coordinator thread started ({:?}, period {:?})",
            self.window.policy(),
            self.config.cycle_period()
        );
        let period = self.config.cycle_period();

        while !self.shared.is_shutdown_requested() {
            self.run_cycle();
            self.shared.wait_for_work(period);
        }

        info!("Coordinator thread exiting. Stats: {:?}", self.stats);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// A coordinator running on its own thread.
///
/// Dropping it stops and joins the thread.
pub struct CoordinatorThread {
    shared: Arc<SharedState>,
    handle: Option<JoinHandle<Coordinator>>,
}

impl CoordinatorThread {
    pub fn handle(&self) -> CoordinatorHandle {
        CoordinatorHandle::new(Arc::clone(&self.shared))
    }

    /// Stop the thread and take the coordinator back.
    pub fn stop(mut self) -> Result<Coordinator, CoordinatorError> {
        self.shutdown().ok_or(CoordinatorError::CoordinatorStopped)
    }

    fn shutdown(&mut self) -> Option<Coordinator> {
        self.shared.request_shutdown();
        let handle = self.handle.take()?;
        match handle.join() {
            Ok(coordinator) => Some(coordinator),
            Err(_) => {
                error!("Coordinator thread panicked");
                None
            }
        }
    }
}

impl Drop for CoordinatorThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OptimizerError;
    use crate::geometry::NoiseModel;
    use crate::graph::{Factor, Solution};
    use crate::optimizer::LevenbergMarquardt;
    use crate::producers::{InFlight, NoMotionProducer, PoseNode, PoseProducer, Readiness};
    use crate::system::CommitPolicyConfig;
    use crate::system::INITIAL_PRIOR_SOURCE;
    use crate::time::ManualClock;
    use nalgebra::Vector3;
    use parking_lot::Mutex;
    use std::collections::HashSet;
    use std::sync::Barrier;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    fn ms(v: u64) -> Timestamp {
        Timestamp::from_millis(v)
    }

    fn config() -> CoordinatorConfig {
        CoordinatorConfig {
            node_tolerance_ms: 10,
            ..Default::default()
        }
    }

    fn coordinator_with(
        config: CoordinatorConfig,
        optimizer: Box<dyn Optimizer>,
    ) -> (Coordinator, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(ms(0)));
        let coordinator = Coordinator::new(config, clock.clone(), optimizer);
        (coordinator, clock)
    }

    fn coordinator() -> (Coordinator, Arc<ManualClock>) {
        coordinator_with(config(), Box::new(LevenbergMarquardt::default()))
    }

    fn step(from: PoseKey, to: PoseKey) -> Factor {
        Factor::between(
            "odom",
            from,
            to,
            SE3::from_translation(Vector3::new(1.0, 0.0, 0.0)),
            NoiseModel::default(),
        )
    }

    /// Records graph sizes and can be told to fail.
    struct ScriptedOptimizer {
        inner: LevenbergMarquardt,
        fail_next: Arc<AtomicBool>,
        graph_sizes: Arc<Mutex<Vec<usize>>>,
    }

    impl Optimizer for ScriptedOptimizer {
        fn name(&self) -> &str {
            "scripted"
        }

        fn optimize(
            &mut self,
            graph: &FactorGraph,
            initial: &Solution,
        ) -> Result<Solution, OptimizerError> {
            self.graph_sizes.lock().push(graph.len());
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(OptimizerError::Diverged { error: f64::NAN });
            }
            self.inner.optimize(graph, initial)
        }
    }

    struct CountingConsumer {
        name: &'static str,
        fail: bool,
        seen: Arc<AtomicUsize>,
    }

    impl OutputConsumer for CountingConsumer {
        fn name(&self) -> &str {
            self.name
        }

        fn on_solution_updated(&mut self, _snapshot: &Snapshot) -> anyhow::Result<()> {
            self.seen.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("{} refused the update", self.name);
            }
            Ok(())
        }
    }

    #[test]
    fn test_first_node_gets_initial_prior() {
        let (mut coordinator, _) = coordinator();
        let handle = coordinator.handle();

        let x0 = handle.get_or_create_node(ms(100)).unwrap();
        let report = coordinator.run_cycle();

        assert_eq!(report.committed, 1);
        assert!(report.published_snapshot());
        assert_eq!(coordinator.graph().count_from(INITIAL_PRIOR_SOURCE), 1);
        let (key, time, _) = coordinator.latest_pose().unwrap();
        assert_eq!((key, time), (x0, ms(100)));
    }

    #[test]
    fn test_scenario_concurrent_allocation_creates_one_node_per_timestamp() {
        let (mut coordinator, _) = coordinator();
        let handle = coordinator.handle();
        let barrier = Barrier::new(3);

        let keys: Vec<PoseKey> = thread::scope(|s| {
            let joins: Vec<_> = (0..3u64)
                .map(|i| {
                    let handle = handle.clone();
                    let barrier = &barrier;
                    s.spawn(move || {
                        barrier.wait();
                        let key = handle.get_or_create_node(ms(100 * (i + 1))).unwrap();
                        handle.submit_factor(Factor::prior(
                            "gps",
                            key,
                            SE3::from_translation(Vector3::new(i as f64, 0.0, 0.0)),
                            NoiseModel::default(),
                        ));
                        key
                    })
                })
                .collect();
            joins.into_iter().map(|j| j.join().unwrap()).collect()
        });

        let distinct: HashSet<PoseKey> = keys.iter().copied().collect();
        assert_eq!(distinct.len(), 3);
        assert_eq!(handle.num_nodes(), 3);

        let report = coordinator.run_cycle();
        assert_eq!(coordinator.graph().count_from("gps"), 3);
        assert!(report.published_snapshot());
    }

    #[test]
    fn test_scenario_graph_grows_across_commits() {
        let sizes = Arc::new(Mutex::new(Vec::new()));
        let optimizer = ScriptedOptimizer {
            inner: LevenbergMarquardt::default(),
            fail_next: Arc::new(AtomicBool::new(false)),
            graph_sizes: sizes.clone(),
        };
        let config = CoordinatorConfig {
            initial_pose: None,
            ..config()
        };
        let (mut coordinator, _) = coordinator_with(config, Box::new(optimizer));
        let handle = coordinator.handle();

        let x0 = handle.get_or_create_node(ms(0)).unwrap();
        let x1 = handle.get_or_create_node(ms(100)).unwrap();
        let x2 = handle.get_or_create_node(ms(200)).unwrap();
        handle.submit_factor(step(x0, x1));
        handle.submit_factor(step(x1, x2));
        coordinator.run_cycle();

        // References x1 from the first commit
        let x3 = handle.get_or_create_node(ms(300)).unwrap();
        handle.submit_factor(step(x1, x3));
        coordinator.run_cycle();

        assert_eq!(*sizes.lock(), vec![2, 3]);
        let snapshot = handle.read_solution();
        assert_eq!(snapshot.graph.len(), 3);
        assert!(snapshot.solution.pose(x3).is_some());
    }

    #[test]
    fn test_scenario_optimizer_failure_keeps_previous_snapshot() {
        let fail_next = Arc::new(AtomicBool::new(false));
        let optimizer = ScriptedOptimizer {
            inner: LevenbergMarquardt::default(),
            fail_next: fail_next.clone(),
            graph_sizes: Arc::new(Mutex::new(Vec::new())),
        };
        let (mut coordinator, _) = coordinator_with(config(), Box::new(optimizer));
        let handle = coordinator.handle();

        let x0 = handle.get_or_create_node(ms(0)).unwrap();
        let x1 = handle.get_or_create_node(ms(100)).unwrap();
        handle.submit_factor(step(x0, x1));
        coordinator.run_cycle();
        let before = handle.read_solution();

        let x2 = handle.get_or_create_node(ms(200)).unwrap();
        handle.submit_factor(step(x1, x2));
        fail_next.store(true, Ordering::SeqCst);
        let failed = coordinator.run_cycle();

        assert!(matches!(failed.outcome, OptimizeOutcome::Failed(_)));
        assert!(Arc::ptr_eq(&before, &handle.read_solution()));
        assert_eq!(coordinator.stats().optimizer_failures, 1);

        // Retried with no new factors
        let retried = coordinator.run_cycle();
        assert_eq!(retried.outcome, OptimizeOutcome::Optimized);
        let after = handle.read_solution();
        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(after.graph.len(), 3);
        assert!(after.solution.pose(x2).is_some());
    }

    #[test]
    fn test_scenario_failing_consumer_does_not_block_others() {
        let (mut coordinator, _) = coordinator();
        let failing_seen = Arc::new(AtomicUsize::new(0));
        let healthy_seen = Arc::new(AtomicUsize::new(0));
        coordinator.register_output_consumer(Box::new(CountingConsumer {
            name: "broken",
            fail: true,
            seen: failing_seen.clone(),
        }));
        coordinator.register_output_consumer(Box::new(CountingConsumer {
            name: "healthy",
            fail: false,
            seen: healthy_seen.clone(),
        }));

        coordinator.handle().get_or_create_node(ms(0)).unwrap();
        let report = coordinator.run_cycle();

        assert_eq!(report.published, 1);
        assert_eq!(report.failed_consumers, vec!["broken".to_string()]);
        assert_eq!(healthy_seen.load(Ordering::SeqCst), 1);

        // Broken consumer is still called next time
        coordinator.handle().get_or_create_node(ms(100)).unwrap();
        coordinator.run_cycle();
        assert_eq!(failing_seen.load(Ordering::SeqCst), 2);
        assert_eq!(healthy_seen.load(Ordering::SeqCst), 2);
        assert_eq!(coordinator.stats().consumer_failures, 2);
    }

    #[test]
    fn test_pose_producers_link_new_nodes() {
        let (mut coordinator, _) = coordinator();
        let handle = coordinator.handle();
        handle.register_pose_producer(Arc::new(NoMotionProducer::default()));

        handle.get_or_create_node(ms(0)).unwrap();
        handle.get_or_create_node(ms(100)).unwrap();
        handle.get_or_create_node(ms(105)).unwrap();
        coordinator.run_cycle();

        assert_eq!(coordinator.graph().count_from("no_motion"), 1);
        assert_eq!(coordinator.graph().num_poses(), 2);
    }

    #[test]
    fn test_idle_cycle_skips_optimization() {
        let (mut coordinator, _) = coordinator();
        coordinator.handle().get_or_create_node(ms(0)).unwrap();
        coordinator.run_cycle();

        let report = coordinator.run_cycle();
        assert_eq!(report.committed, 0);
        assert_eq!(report.outcome, OptimizeOutcome::Skipped);
    }

    #[test]
    fn test_windowed_policy_holds_until_flush() {
        let config = CoordinatorConfig {
            commit_policy: CommitPolicyConfig::Windowed {
                window_ms: 500,
                max_hold_cycles: 100,
            },
            ..config()
        };
        let (mut coordinator, clock) =
            coordinator_with(config, Box::new(LevenbergMarquardt::default()));
        let handle = coordinator.handle();
        clock.set(ms(1000));

        handle.get_or_create_node(ms(900)).unwrap();
        let report = coordinator.run_cycle();
        assert_eq!(report.committed, 0);
        assert_eq!(report.held, 1);
        assert_eq!(handle.read_solution().cycle, 0);

        clock.set(ms(1500));
        assert_eq!(coordinator.run_cycle().committed, 1);

        let late = handle.get_or_create_node(ms(1450)).unwrap();
        handle.submit_factor(Factor::prior("gps", late, SE3::identity(), NoiseModel::default()));
        assert_eq!(coordinator.run_cycle().committed, 0);
        let flushed = coordinator.flush();
        assert_eq!(flushed.committed, 1);
        assert_eq!(flushed.held, 0);
    }

    #[test]
    fn test_suppressed_policy_commits_on_submission() {
        let config = CoordinatorConfig {
            commit_policy: CommitPolicyConfig::Suppressed,
            cycle_period_ms: 60_000,
            ..config()
        };
        let (coordinator, _) = coordinator_with(config, Box::new(LevenbergMarquardt::default()));
        let running = coordinator.spawn().unwrap();
        let handle = running.handle();

        let x0 = handle.get_or_create_node(ms(0)).unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while handle.read_solution().solution.pose(x0).is_none() {
            assert!(std::time::Instant::now() < deadline, "submission was not committed");
            thread::sleep(Duration::from_millis(1));
        }

        let coordinator = running.stop().unwrap();
        assert_eq!(coordinator.graph().len(), 1);
    }

    #[test]
    fn test_reset_restarts_from_empty() {
        let (mut coordinator, _) = coordinator();
        let handle = coordinator.handle();
        handle.get_or_create_node(ms(100)).unwrap();
        let second = handle.get_or_create_node(ms(200)).unwrap();
        assert_eq!(second, PoseKey::new(1));
        coordinator.run_cycle();

        coordinator.reset().unwrap();

        assert!(coordinator.graph().is_empty());
        assert_eq!(handle.pending_len(), 0);
        assert_eq!(handle.read_solution().cycle, 0);
        assert!(handle.read_solution().solution.is_empty());
        assert_eq!(handle.get_or_create_node(ms(200)).unwrap(), PoseKey::new(0));
    }

    #[test]
    fn test_reset_while_active_is_reported() {
        let (mut coordinator, _) = coordinator();
        let worker = InFlight::new("icp");
        coordinator.handle().register_readiness(worker.clone());

        let guard = worker.begin();
        let result = coordinator.reset();
        assert!(matches!(
            result,
            Err(CoordinatorError::ResetWhileActive { in_flight: 1 })
        ));

        drop(guard);
        assert!(coordinator.reset().is_ok());
    }

    /// Blocks inside `relative_pose` until released.
    struct GatedProducer {
        entered: crossbeam_channel::Sender<()>,
        release: crossbeam_channel::Receiver<()>,
    }

    impl PoseProducer for GatedProducer {
        fn name(&self) -> &str {
            "gated"
        }

        fn relative_pose(&self, from: PoseNode, to: PoseNode) -> Option<Factor> {
            let _ = self.entered.send(());
            let _ = self.release.recv();
            Some(step(from.key, to.key))
        }
    }

    #[test]
    fn test_reset_refused_while_node_creation_in_progress() {
        let (mut coordinator, _) = coordinator();
        let handle = coordinator.handle();
        let (entered_tx, entered_rx) = crossbeam_channel::bounded(1);
        let (release_tx, release_rx) = crossbeam_channel::bounded(1);
        handle.get_or_create_node(ms(0)).unwrap();
        handle.register_pose_producer(Arc::new(GatedProducer {
            entered: entered_tx,
            release: release_rx,
        }));

        let creating = {
            let handle = handle.clone();
            thread::spawn(move || handle.get_or_create_node(ms(100)).unwrap())
        };
        entered_rx.recv().unwrap();

        assert!(matches!(
            coordinator.reset(),
            Err(CoordinatorError::ResetWhileActive { .. })
        ));

        release_tx.send(()).unwrap();
        creating.join().unwrap();
        assert_eq!(handle.num_nodes(), 2);

        coordinator.reset().unwrap();
        assert_eq!(handle.num_nodes(), 0);
        assert_eq!(handle.pending_len(), 0);
    }

    /// Starts a node request from another thread the first time reset asks
    /// whether it is ready.
    struct RacingReadiness {
        handle: CoordinatorHandle,
        started: AtomicBool,
        request: Mutex<Option<thread::JoinHandle<PoseKey>>>,
    }

    impl Readiness for RacingReadiness {
        fn name(&self) -> &str {
            "racing"
        }

        fn ready(&self) -> bool {
            if !self.started.swap(true, Ordering::SeqCst) {
                let handle = self.handle.clone();
                *self.request.lock() =
                    Some(thread::spawn(move || handle.get_or_create_node(ms(200)).unwrap()));
            }
            true
        }

        fn wait_ready(&self, _timeout: Duration) -> bool {
            self.ready()
        }
    }

    #[test]
    fn test_submission_racing_reset_lands_in_cleared_state() {
        let (mut coordinator, _) = coordinator();
        let handle = coordinator.handle();
        handle.register_pose_producer(Arc::new(NoMotionProducer::default()));
        handle.get_or_create_node(ms(100)).unwrap();
        coordinator.run_cycle();

        let racing = Arc::new(RacingReadiness {
            handle: handle.clone(),
            started: AtomicBool::new(false),
            request: Mutex::new(None),
        });
        handle.register_readiness(racing.clone());

        coordinator.reset().unwrap();
        let request = racing.request.lock().take().unwrap();
        let key = request.join().unwrap();

        // Created after the clear: fresh key, no edge to the pre-reset node
        assert_eq!(key, PoseKey::new(0));
        assert_eq!(handle.num_nodes(), 1);
        coordinator.run_cycle();
        assert_eq!(coordinator.graph().count_from("no_motion"), 0);
        for factor in coordinator.graph().factors() {
            for key in factor.pose_keys() {
                assert_eq!(handle.node_time(key), Some(ms(200)));
            }
        }
    }

    #[test]
    fn test_out_of_order_node_links_both_neighbours() {
        let (mut coordinator, _) = coordinator();
        let handle = coordinator.handle();
        handle.register_pose_producer(Arc::new(NoMotionProducer::default()));

        let x0 = handle.get_or_create_node(ms(0)).unwrap();
        let x1 = handle.get_or_create_node(ms(200)).unwrap();
        let x2 = handle.get_or_create_node(ms(100)).unwrap();
        coordinator.run_cycle();

        let edges: Vec<Vec<PoseKey>> = coordinator
            .graph()
            .factors()
            .iter()
            .filter(|f| f.source() == "no_motion")
            .map(|f| f.pose_keys())
            .collect();
        assert_eq!(edges, vec![vec![x0, x1], vec![x0, x2], vec![x2, x1]]);
    }

    struct PanickingConsumer;

    impl OutputConsumer for PanickingConsumer {
        fn name(&self) -> &str {
            "panicking"
        }

        fn on_solution_updated(&mut self, _snapshot: &Snapshot) -> anyhow::Result<()> {
            panic!("consumer bug");
        }
    }

    #[test]
    fn test_panicking_consumer_counts_as_failure() {
        let (mut coordinator, _) = coordinator();
        let healthy_seen = Arc::new(AtomicUsize::new(0));
        coordinator.register_output_consumer(Box::new(PanickingConsumer));
        coordinator.register_output_consumer(Box::new(CountingConsumer {
            name: "healthy",
            fail: false,
            seen: healthy_seen.clone(),
        }));

        coordinator.handle().get_or_create_node(ms(0)).unwrap();
        let report = coordinator.run_cycle();

        assert_eq!(report.failed_consumers, vec!["panicking".to_string()]);
        assert_eq!(report.published, 1);
        assert_eq!(healthy_seen.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.handle().phase(), CyclePhase::Idle);
    }

    struct PanickingOptimizer;

    impl Optimizer for PanickingOptimizer {
        fn name(&self) -> &str {
            "panicking"
        }

        fn optimize(
            &mut self,
            _graph: &FactorGraph,
            _initial: &Solution,
        ) -> Result<Solution, OptimizerError> {
            panic!("solver bug");
        }
    }

    #[test]
    fn test_panicking_optimizer_keeps_thread_alive() {
        let config = CoordinatorConfig {
            cycle_period_ms: 1,
            ..config()
        };
        let (coordinator, _) = coordinator_with(config, Box::new(PanickingOptimizer));
        let handle = coordinator.handle();
        let running = coordinator.spawn().unwrap();

        handle.get_or_create_node(ms(0)).unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while handle.pending_len() > 0 {
            assert!(std::time::Instant::now() < deadline, "pending never drained");
            thread::sleep(Duration::from_millis(1));
        }

        let mut coordinator = running.stop().unwrap();
        assert!(coordinator.stats().optimizer_failures > 0);
        let report = coordinator.run_cycle();
        assert_eq!(
            report.outcome,
            OptimizeOutcome::Failed(OptimizerError::Panicked("solver bug".to_string()))
        );
    }

    #[test]
    fn test_snapshot_shares_graph_until_next_commit() {
        let (mut coordinator, _) = coordinator();
        let handle = coordinator.handle();
        handle.get_or_create_node(ms(0)).unwrap();
        coordinator.run_cycle();

        let first = handle.read_solution();
        assert!(std::ptr::eq(coordinator.graph(), &*first.graph));

        let x1 = handle.get_or_create_node(ms(100)).unwrap();
        handle.submit_factor(Factor::prior("gps", x1, SE3::identity(), NoiseModel::default()));
        coordinator.run_cycle();

        assert_eq!(first.graph.len(), 1);
        assert_eq!(coordinator.graph().len(), 2);
        assert_eq!(handle.read_solution().graph.len(), 2);
    }

    #[test]
    fn test_concurrent_submissions_commit_exactly_once() {
        let config = CoordinatorConfig {
            cycle_period_ms: 1,
            initial_pose: None,
            ..config()
        };
        let (coordinator, _) = coordinator_with(config, Box::new(CountingOptimizer));
        let handle = coordinator.handle();
        let x0 = handle.get_or_create_node(ms(0)).unwrap();
        let running = coordinator.spawn().unwrap();

        let threads = 4;
        let per_thread = 50;
        thread::scope(|s| {
            for t in 0..threads {
                let handle = running.handle();
                s.spawn(move || {
                    for i in 0..per_thread {
                        handle.submit_factor(Factor::prior(
                            format!("producer-{}-{}", t, i),
                            x0,
                            SE3::identity(),
                            NoiseModel::default(),
                        ));
                    }
                });
            }
        });

        let mut coordinator = running.stop().unwrap();
        coordinator.flush();

        let graph = coordinator.graph();
        assert_eq!(graph.len(), threads * per_thread);
        let sources: HashSet<&str> = graph.factors().iter().map(|f| f.source()).collect();
        assert_eq!(sources.len(), threads * per_thread);
    }

    #[test]
    fn test_readers_never_see_mixed_snapshots() {
        let config = CoordinatorConfig {
            cycle_period_ms: 1,
            initial_pose: None,
            ..config()
        };
        let (coordinator, _) = coordinator_with(config, Box::new(CountingOptimizer));
        let handle = coordinator.handle();
        let x0 = handle.get_or_create_node(ms(0)).unwrap();
        let running = coordinator.spawn().unwrap();
        let done = AtomicBool::new(false);

        thread::scope(|s| {
            let reader = {
                let handle = running.handle();
                let done = &done;
                s.spawn(move || {
                    let mut checked = 0;
                    while !done.load(Ordering::SeqCst) {
                        let snapshot = handle.read_solution();
                        // CountingOptimizer encodes the graph size in x0
                        if let Some(pose) = snapshot.solution.pose(x0) {
                            assert_eq!(pose.translation.x as usize, snapshot.graph.len());
                            checked += 1;
                        }
                    }
                    checked
                })
            };

            let writer = running.handle();
            for _ in 0..200 {
                writer.submit_factor(Factor::prior(
                    "writer",
                    x0,
                    SE3::identity(),
                    NoiseModel::default(),
                ));
                thread::sleep(Duration::from_micros(200));
            }
            thread::sleep(Duration::from_millis(20));
            done.store(true, Ordering::SeqCst);
            assert!(reader.join().unwrap() > 0);
        });

        running.stop().unwrap();
    }

    /// Sets every pose to x = number of factors in the graph.
    struct CountingOptimizer;

    impl Optimizer for CountingOptimizer {
        fn name(&self) -> &str {
            "counting"
        }

        fn optimize(
            &mut self,
            graph: &FactorGraph,
            _initial: &Solution,
        ) -> Result<Solution, OptimizerError> {
            let mut solution = Solution::new();
            for key in graph.pose_keys() {
                solution.insert_pose(
                    key,
                    SE3::from_translation(Vector3::new(graph.len() as f64, 0.0, 0.0)),
                );
            }
            Ok(solution)
        }
    }
}
