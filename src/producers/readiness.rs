//! In-flight work tracking.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::Readiness;

/// Counts units of work in flight and wakes waiters when it drops to zero.
#[derive(Debug)]
pub struct InFlight {
    name: String,
    count: Mutex<usize>,
    idle: Condvar,
}

impl InFlight {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            count: Mutex::new(0),
            idle: Condvar::new(),
        })
    }

    /// Mark one unit of work as started; it ends when the guard drops.
    ///
    /// The guard owns a reference to the tracker, so it can be handed to
    /// another thread along with the work.
    pub fn begin(self: &Arc<Self>) -> InFlightGuard {
        *self.count.lock() += 1;
        InFlightGuard {
            tracker: Arc::clone(self),
        }
    }

    pub fn count(&self) -> usize {
        *self.count.lock()
    }

    pub fn is_idle(&self) -> bool {
        self.count() == 0
    }

    /// Wait until nothing is in flight. Returns false on timeout.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut count = self.count.lock();
        while *count > 0 {
            if self.idle.wait_until(&mut count, deadline).timed_out() {
                return *count == 0;
            }
        }
        true
    }

    fn finish(&self) {
        let mut count = self.count.lock();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.idle.notify_all();
        }
    }
}

impl Readiness for InFlight {
    fn name(&self) -> &str {
        &self.name
    }

    fn ready(&self) -> bool {
        self.is_idle()
    }

    fn wait_ready(&self, timeout: Duration) -> bool {
        self.wait_idle(timeout)
    }
}

/// Ends one unit of in-flight work on drop.
#[derive(Debug)]
pub struct InFlightGuard {
    tracker: Arc<InFlight>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.tracker.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_counts() {
        let tracker = InFlight::new("icp");
        assert!(tracker.ready());

        let a = tracker.begin();
        let b = tracker.begin();
        assert_eq!(tracker.count(), 2);
        assert!(!tracker.ready());

        drop(a);
        assert_eq!(tracker.count(), 1);
        drop(b);
        assert!(tracker.is_idle());
    }

    #[test]
    fn test_wait_idle_times_out() {
        let tracker = InFlight::new("slow");
        let _guard = tracker.begin();
        assert!(!tracker.wait_idle(Duration::from_millis(20)));
    }

    #[test]
    fn test_wait_idle_wakes_when_work_finishes() {
        let tracker = InFlight::new("worker");
        let guard = tracker.begin();

        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            drop(guard);
        });

        assert!(tracker.wait_ready(Duration::from_secs(5)));
        handle.join().unwrap();
    }
}
