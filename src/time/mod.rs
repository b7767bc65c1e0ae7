//! Time handling: nanosecond timestamps and pluggable clocks.
//!
//! The coordinator never reads wall time directly. Every "now" goes through a
//! [`Clock`], so the same pipeline can run live, against an external time feed,
//! or under a deterministic replay clock.

mod clock;
mod timestamp;

pub use clock::{Clock, ManualClock, SystemClock};
pub use timestamp::Timestamp;
