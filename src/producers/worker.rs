//! Measurement worker thread.
//!
//! Runs a [`MeasurementProcessor`] on its own thread, fed through a bounded
//! channel. Every queued measurement counts as in-flight work until the
//! processor is done with it, so replay drivers can wait on the worker
//! through its [`InFlight`] tracker.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use tracing::{info, warn};

use crate::system::CoordinatorHandle;
use crate::time::Timestamp;

use super::readiness::{InFlight, InFlightGuard};

/// Timeout for receiving measurements. Allows periodic shutdown checks.
const RECV_TIMEOUT: Duration = Duration::from_millis(100);

/// Turns raw measurements into nodes and factors.
pub trait MeasurementProcessor: Send + 'static {
    type Measurement: Send + 'static;

    fn name(&self) -> &str;

    /// Handle one measurement taken at `stamp`.
    fn process(
        &mut self,
        stamp: Timestamp,
        measurement: Self::Measurement,
        handle: &CoordinatorHandle,
    ) -> Result<()>;
}

type Job<M> = (Timestamp, M, InFlightGuard);

/// A processor running on a dedicated thread.
pub struct MeasurementWorker<M: Send + 'static> {
    name: String,
    sender: Option<Sender<Job<M>>>,
    in_flight: Arc<InFlight>,
    failures: Arc<AtomicU64>,
    shutdown: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl<M: Send + 'static> MeasurementWorker<M> {
    /// Spawn `processor` with a queue of `capacity` measurements.
    pub fn spawn<P>(processor: P, handle: CoordinatorHandle, capacity: usize) -> Result<Self>
    where
        P: MeasurementProcessor<Measurement = M>,
    {
        let name = processor.name().to_string();
        let (sender, receiver) = bounded::<Job<M>>(capacity.max(1));
        let in_flight = InFlight::new(name.clone());
        let failures = Arc::new(AtomicU64::new(0));
        let shutdown = Arc::new(AtomicBool::new(false));

        let thread = {
            let failures = Arc::clone(&failures);
            let shutdown = Arc::clone(&shutdown);
            thread::Builder::new()
                .name(name.clone())
                .spawn(move || run(processor, receiver, handle, failures, shutdown))
                .with_context(|| format!("Failed to spawn worker thread '{}'", name))?
        };

        Ok(Self {
            name,
            sender: Some(sender),
            in_flight,
            failures,
            shutdown,
            thread: Some(thread),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue a measurement. Blocks while the queue is full.
    pub fn submit(&self, stamp: Timestamp, measurement: M) -> Result<()> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| anyhow!("Worker '{}' is shut down", self.name))?;
        let guard = self.in_flight.begin();
        sender
            .send((stamp, measurement, guard))
            .map_err(|_| anyhow!("Worker '{}' stopped receiving", self.name))
    }

    /// True when every submitted measurement has been processed.
    pub fn ready(&self) -> bool {
        self.in_flight.is_idle()
    }

    /// In-flight tracker, to register with the coordinator as a readiness
    /// source.
    pub fn in_flight(&self) -> Arc<InFlight> {
        Arc::clone(&self.in_flight)
    }

    /// Measurements the processor rejected.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::SeqCst)
    }

    /// Stop the thread once its queue is drained.
    pub fn shutdown(&mut self) {
        // Closing the channel lets the thread finish queued work first
        self.sender.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Worker thread '{}' panicked", self.name);
            }
        }
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

impl<M: Send + 'static> Drop for MeasurementWorker<M> {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.sender.take();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Worker thread loop.
fn run<P: MeasurementProcessor>(
    mut processor: P,
    receiver: Receiver<Job<P::Measurement>>,
    handle: CoordinatorHandle,
    failures: Arc<AtomicU64>,
    shutdown: Arc<AtomicBool>,
) {
    info!("Worker thread '{}' started", processor.name());
    let mut processed = 0u64;

    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        match receiver.recv_timeout(RECV_TIMEOUT) {
            Ok((stamp, measurement, _guard)) => {
                if let Err(e) = processor.process(stamp, measurement, &handle) {
                    warn!("{}: measurement at {} rejected: {:#}", processor.name(), stamp, e);
                    failures.fetch_add(1, Ordering::SeqCst);
                }
                processed += 1;
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    info!(
        "Worker thread '{}' exiting. Processed: {}, rejected: {}",
        processor.name(),
        processed,
        failures.load(Ordering::SeqCst)
    );
}
