//! Offline trace parsing
//!
//! Recorded traces carry every sample up front. Parsers decode the container,
//! resolve callchains to [`MethodId`](crate::domain::MethodId)s and rebuild the
//! per-thread forest through [`sample_log::SampleLog`].

pub mod sample_log;
pub mod simpleperf;

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use crate::calltree::Forest;
use crate::domain::{Tid, Timestamp, TraceParseError};

pub use sample_log::{LoggedSample, SampleLog};

/// Known trace containers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceFormat {
    Simpleperf,
}

impl TraceFormat {
    /// Identify the container from its leading bytes.
    pub fn detect(data: &[u8]) -> Option<Self> {
        if simpleperf::has_magic(data) {
            Some(Self::Simpleperf)
        } else {
            None
        }
    }
}

impl fmt::Display for TraceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Simpleperf => write!(f, "simpleperf"),
        }
    }
}

/// Record and sample counters of a parsed trace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TraceStats {
    /// Records decoded, of any kind.
    pub records: u64,
    /// Sample records decoded.
    pub samples: u64,
    /// Samples that could not contribute to a tree (empty callchain).
    pub dropped_samples: u64,
    /// Samples the recording tool reported as lost.
    pub lost_samples: u64,
    /// Samples the recording tool reported as recorded.
    pub reported_samples: u64,
    pub lost_records: u64,
    pub file_records: u64,
    pub thread_records: u64,
    pub meta_records: u64,
    /// Records whose type this parser does not know.
    pub unknown_records: u64,
}

impl TraceStats {
    /// Samples merged into the forest.
    pub fn used_samples(&self) -> u64 {
        self.samples - self.dropped_samples
    }
}

/// Result of parsing a recorded trace.
#[derive(Debug, Clone)]
pub struct ParsedTrace {
    pub format: TraceFormat,
    pub forest: Forest,
    pub stats: TraceStats,
    /// Time of the first merged sample.
    pub start_time: Option<Timestamp>,
    /// Time of the last merged sample.
    pub end_time: Option<Timestamp>,
    /// Thread names as recorded, by tid.
    pub threads: BTreeMap<Tid, String>,
    pub app_package: Option<String>,
    pub event_types: Vec<String>,
    /// Forest key of the profiled process's main thread.
    pub main_thread: Option<String>,
}

/// Parse an in-memory trace.
///
/// With `format` unset the container is detected from its leading bytes. A
/// given format skips detection, so a damaged header is reported by that
/// format's parser instead of as an unknown format.
///
/// # Errors
/// Returns an error if the format is unknown or the trace is malformed
pub fn parse_bytes(
    data: &[u8],
    format: Option<TraceFormat>,
    process_hint: Option<u32>,
) -> Result<ParsedTrace, TraceParseError> {
    match format.or_else(|| TraceFormat::detect(data)) {
        Some(TraceFormat::Simpleperf) => simpleperf::parse(data, process_hint),
        None => Err(TraceParseError::UnknownFormat),
    }
}

/// Read and parse a trace file.
///
/// # Errors
/// Returns an error if the file cannot be read or parsing fails
pub fn parse_file(
    path: impl AsRef<Path>,
    format: Option<TraceFormat>,
    process_hint: Option<u32>,
) -> Result<ParsedTrace, TraceParseError> {
    let data = std::fs::read(path)?;
    parse_bytes(&data, format, process_hint)
}
