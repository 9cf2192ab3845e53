//! Live stack sampling
//!
//! This module turns periodic snapshots of every live thread's stack into a
//! [`Forest`](crate::calltree::Forest):
//! - [`session`]: the synchronous per-tick merge logic
//! - [`sampler`]: the background thread that drives a session at a fixed rate
//! - [`replay`]: a [`StackSource`] that replays recorded stack dumps
//! - `live` (Linux): a [`StackSource`] that signals every thread of the
//!   running process and walks its stack

#[cfg(target_os = "linux")]
pub mod live;
pub mod replay;
pub mod sampler;
pub mod session;

use std::time::Instant;

use crate::domain::{CaptureError, MethodId, Tid, Timestamp};

#[cfg(target_os = "linux")]
pub use live::{LiveCaptureConfig, ProcessStackSource};
pub use replay::ReplaySource;
pub use sampler::{Sampler, SamplerConfig, SamplingResult};
pub use session::{SamplerStats, SamplingSession};

/// Stack of one thread at capture time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadStack {
    pub name: String,
    /// OS thread id, when the source knows it.
    pub tid: Option<Tid>,
    /// Innermost frame first.
    pub frames: Vec<MethodId>,
}

impl ThreadStack {
    pub fn new(name: impl Into<String>, frames: Vec<MethodId>) -> Self {
        Self {
            name: name.into(),
            tid: None,
            frames,
        }
    }

    #[must_use]
    pub fn with_tid(mut self, tid: Tid) -> Self {
        self.tid = Some(tid);
        self
    }
}

/// A consistent set of thread stacks taken in one capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub time: Timestamp,
    pub threads: Vec<ThreadStack>,
}

/// Platform primitive that captures all live threads' stacks at once.
///
/// `capture` must return a consistent view of all threads; the sampler does no
/// per-thread locking of its own.
pub trait StackSource {
    /// Current time on the clock `capture` stamps snapshots with.
    fn now(&self) -> Timestamp;

    fn capture(&mut self) -> Result<Snapshot, CaptureError>;
}

/// Nanoseconds elapsed since the clock was created.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    pub fn now(&self) -> Timestamp {
        let elapsed = self.origin.elapsed().as_nanos();
        Timestamp(u64::try_from(elapsed).unwrap_or(u64::MAX))
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotonic_clock_never_goes_back() {
        let clock = MonotonicClock::new();
        let first = clock.now();
        let second = clock.now();
        assert!(second >= first);
    }
}
