//! Replay driver - feeds recorded data through a running coordinator.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};
use tracing::{info, warn};

use crate::error::CoordinatorError;
use crate::graph::Snapshot;
use crate::system::{Coordinator, CoordinatorHandle, CoordinatorStats};
use crate::time::{ManualClock, Timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayOptions {
    /// Create one pose node per record, after the record is fed.
    pub add_node_per_record: bool,

    /// How long to wait on busy producers before logging and waiting again.
    pub ready_timeout: Duration,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self {
            add_node_per_record: true,
            ready_timeout: Duration::from_secs(1),
        }
    }
}

/// Wall time spent on one record, relative to the start of the replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameTiming {
    pub stamp: Timestamp,
    pub started: Duration,
    pub finished: Duration,
}

#[derive(Debug, Clone)]
pub struct ReplayReport {
    /// Solution after the final commit.
    pub snapshot: Arc<Snapshot>,
    pub frames: Vec<FrameTiming>,
    pub stats: CoordinatorStats,
}

/// Feeds timestamped records through a coordinator running on its own
/// thread, one record at a time.
pub struct ReplayDriver {
    coordinator: Option<Coordinator>,
    handle: CoordinatorHandle,
    clock: Option<Arc<ManualClock>>,
    options: ReplayOptions,
}

impl ReplayDriver {
    pub fn new(coordinator: Coordinator, options: ReplayOptions) -> Self {
        let handle = coordinator.handle();
        Self {
            coordinator: Some(coordinator),
            handle,
            clock: None,
            options,
        }
    }

    /// Advance `clock` to each record's timestamp before it is fed.
    pub fn with_clock(mut self, clock: Arc<ManualClock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn handle(&self) -> &CoordinatorHandle {
        &self.handle
    }

    pub fn coordinator(&self) -> Option<&Coordinator> {
        self.coordinator.as_ref()
    }

    pub fn coordinator_mut(&mut self) -> Option<&mut Coordinator> {
        self.coordinator.as_mut()
    }

    pub fn into_coordinator(self) -> Option<Coordinator> {
        self.coordinator
    }

    /// Reset the coordinator between runs.
    pub fn reset(&mut self) -> Result<(), CoordinatorError> {
        match self.coordinator.as_mut() {
            Some(coordinator) => coordinator.reset(),
            None => Err(CoordinatorError::CoordinatorStopped),
        }
    }

    /// Replay `records` in timestamp order.
    ///
    /// `feed` hands one record to the producers. Before each record the
    /// driver waits until every registered readiness source is idle; after
    /// the last one it waits again, runs a final commit and returns the
    /// resulting snapshot.
    pub fn run<M, I, F>(&mut self, records: I, mut feed: F) -> Result<ReplayReport>
    where
        I: IntoIterator<Item = (Timestamp, M)>,
        F: FnMut(Timestamp, M, &CoordinatorHandle) -> Result<()>,
    {
        let coordinator = self
            .coordinator
            .take()
            .ok_or_else(|| anyhow!("Replay driver has no coordinator"))?;

        let mut records: Vec<(Timestamp, M)> = records.into_iter().collect();
        records.sort_by_key(|(stamp, _)| *stamp);
        info!("Replaying {} records", records.len());

        let running = coordinator.spawn()?;
        let started = Instant::now();
        let mut frames = Vec::with_capacity(records.len());
        let fed = self.feed_all(records, &mut feed, started, &mut frames);
        self.wait_until_ready();

        let mut coordinator = running.stop()?;
        let last = coordinator.flush();
        info!(
            "Replay finished: {} records in {:.2?}, final graph {} factors",
            frames.len(),
            started.elapsed(),
            last.graph_size
        );

        let report = ReplayReport {
            snapshot: coordinator.handle().read_solution(),
            frames,
            stats: coordinator.stats().clone(),
        };
        self.coordinator = Some(coordinator);
        fed.map(|()| report)
    }

    fn feed_all<M, F>(
        &self,
        records: Vec<(Timestamp, M)>,
        feed: &mut F,
        started: Instant,
        frames: &mut Vec<FrameTiming>,
    ) -> Result<()>
    where
        F: FnMut(Timestamp, M, &CoordinatorHandle) -> Result<()>,
    {
        for (stamp, record) in records {
            self.wait_until_ready();
            if let Some(clock) = &self.clock {
                clock.set(stamp);
            }

            let frame_start = started.elapsed();
            feed(stamp, record, &self.handle)?;
            if self.options.add_node_per_record {
                self.handle.get_or_create_node(stamp)?;
            }
            frames.push(FrameTiming {
                stamp,
                started: frame_start,
                finished: started.elapsed(),
            });
        }
        Ok(())
    }

    fn wait_until_ready(&self) {
        while !self.handle.wait_all_ready(self.options.ready_timeout) {
            warn!(
                "Still waiting on producers after {:?}: {:?}",
                self.options.ready_timeout,
                self.handle.busy_producers()
            );
        }
    }
}
