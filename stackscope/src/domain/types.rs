//! Domain types providing compile-time safety and self-documentation
//!
//! These newtype wrappers prevent common bugs like passing a thread id where a
//! timestamp is expected, and make function signatures more expressive.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Thread ID
///
/// Kernel thread id as recorded by the profiler that produced a trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Tid(pub u32);

impl fmt::Display for Tid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TID:{}", self.0)
    }
}

/// Timestamp in nanoseconds
///
/// A point in time on whatever clock the capturing side uses (monotonic
/// clock of the sampler, `perf_clock` of a Simpleperf recording).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// Midpoint between two sample times.
    ///
    /// A sample only observes "the stack right now", so a call or return seen
    /// for the first time happened somewhere between the previous sample and
    /// this one. The midpoint is the estimate used for both.
    #[must_use]
    pub fn midpoint(previous: Timestamp, current: Timestamp) -> Timestamp {
        let (lo, hi) = if previous <= current {
            (previous.0, current.0)
        } else {
            (current.0, previous.0)
        };
        Timestamp(lo + (hi - lo) / 2)
    }

    /// Convert to microseconds (f64)
    ///
    /// Chart consumers take microseconds; nanosecond values overflow their
    /// integer axes for long captures.
    #[allow(clippy::cast_precision_loss)]
    pub fn as_micros(self) -> f64 {
        self.0 as f64 / 1_000.0
    }

    /// Nanoseconds elapsed since `earlier`, saturating at zero.
    pub fn saturating_since(self, earlier: Timestamp) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ns", self.0)
    }
}

/// Method identity of a stack frame.
///
/// Two frames are the same method iff both the name and the declaring
/// namespace (class for JVM frames, binary path for native frames) match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MethodId {
    pub name: String,
    pub namespace: String,
}

impl MethodId {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }

    /// Split a fully qualified JVM name (`pkg.Class.method`) at the last dot.
    ///
    /// Names without a dot get an empty namespace.
    pub fn from_qualified(qualified: &str) -> Self {
        match qualified.rsplit_once('.') {
            Some((namespace, name)) if !name.is_empty() => Self::new(name, namespace),
            _ => Self::new(qualified, ""),
        }
    }
}

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}.{}", self.namespace, self.name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_midpoint_is_order_independent() {
        assert_eq!(Timestamp::midpoint(Timestamp(10), Timestamp(20)), Timestamp(15));
        assert_eq!(Timestamp::midpoint(Timestamp(20), Timestamp(10)), Timestamp(15));
        assert_eq!(Timestamp::midpoint(Timestamp(7), Timestamp(7)), Timestamp(7));
    }

    #[test]
    fn test_midpoint_does_not_overflow() {
        let mid = Timestamp::midpoint(Timestamp(u64::MAX - 2), Timestamp(u64::MAX));
        assert_eq!(mid, Timestamp(u64::MAX - 1));
    }

    #[test]
    fn test_method_from_qualified() {
        let m = MethodId::from_qualified("com.example.app.Worker.run");
        assert_eq!(m.namespace, "com.example.app.Worker");
        assert_eq!(m.name, "run");

        let bare = MethodId::from_qualified("main");
        assert_eq!(bare.name, "main");
        assert_eq!(bare.namespace, "");
    }

    #[test]
    fn test_method_display() {
        assert_eq!(MethodId::new("run", "Worker").to_string(), "Worker.run");
        assert_eq!(MethodId::new("main", "").to_string(), "main");
        assert_eq!(Tid(42).to_string(), "TID:42");
    }
}
