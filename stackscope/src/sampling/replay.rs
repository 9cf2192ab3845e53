//! Replay of recorded stack dumps
//!
//! A dump file holds one snapshot per line (JSON lines). Frames are listed
//! innermost first, the way thread dumps print them:
//!
//! ```text
//! {"time_ns": 1000, "threads": [{"name": "main", "frames": [{"method": "sleep", "namespace": "java.lang.Thread"}]}]}
//! {"interrupted": "SIGPROF lost"}
//! ```
//!
//! Lines without `time_ns` are stamped when they are captured: the last
//! replayed time plus the wall time elapsed since it was replayed, or the
//! source's own clock if nothing has been replayed yet. An
//! `interrupted` line replays as an interrupted capture. Blank lines and lines
//! starting with `#` are ignored.

use serde::Deserialize;
use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::domain::{CaptureError, MethodId, ReplayError, Timestamp};

use super::{MonotonicClock, Snapshot, StackSource, ThreadStack};

#[derive(Debug, Deserialize)]
struct DumpLine {
    #[serde(default)]
    time_ns: Option<u64>,
    #[serde(default)]
    threads: Vec<DumpThread>,
    #[serde(default)]
    interrupted: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DumpThread {
    name: String,
    #[serde(default)]
    frames: Vec<DumpFrame>,
}

#[derive(Debug, Deserialize)]
struct DumpFrame {
    method: String,
    #[serde(default)]
    namespace: String,
}

#[derive(Debug)]
enum RecordedCapture {
    Stacks {
        time: Option<Timestamp>,
        threads: Vec<ThreadStack>,
    },
    Interrupted(String),
}

/// [`StackSource`] backed by a recorded dump file.
#[derive(Debug)]
pub struct ReplaySource {
    captures: VecDeque<RecordedCapture>,
    clock: MonotonicClock,
    /// Last replayed time and the clock reading when it was replayed.
    anchor: Option<(Timestamp, Timestamp)>,
}

impl ReplaySource {
    /// Load a dump file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or a line is not a valid dump
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ReplayError> {
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file))
    }

    /// Load dumps from any buffered reader.
    ///
    /// # Errors
    /// Returns an error if reading fails or a line is not a valid dump
    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self, ReplayError> {
        let mut captures = VecDeque::new();

        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let dump: DumpLine = serde_json::from_str(trimmed)
                .map_err(|source| ReplayError::InvalidLine { line: idx + 1, source })?;

            if let Some(reason) = dump.interrupted {
                captures.push_back(RecordedCapture::Interrupted(reason));
                continue;
            }

            let threads = dump
                .threads
                .into_iter()
                .map(|thread| {
                    let frames = thread
                        .frames
                        .into_iter()
                        .map(|frame| MethodId::new(frame.method, frame.namespace))
                        .collect();
                    ThreadStack::new(thread.name, frames)
                })
                .collect();

            captures.push_back(RecordedCapture::Stacks {
                time: dump.time_ns.map(Timestamp),
                threads,
            });
        }

        Ok(Self {
            captures,
            clock: MonotonicClock::new(),
            anchor: None,
        })
    }

    /// Captures left to replay.
    pub fn len(&self) -> usize {
        self.captures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.captures.is_empty()
    }
}

impl ReplaySource {
    /// Time for a capture recorded without one, continuing from the last
    /// replayed time.
    fn stamp(&self) -> Timestamp {
        match self.anchor {
            Some((time, replayed_at)) => {
                Timestamp(time.0.saturating_add(self.clock.now().saturating_since(replayed_at)))
            }
            None => self.clock.now(),
        }
    }
}

impl StackSource for ReplaySource {
    /// Time of the first recorded capture, or the wall clock if it has none.
    fn now(&self) -> Timestamp {
        self.captures
            .iter()
            .find_map(|capture| match capture {
                RecordedCapture::Stacks { time, .. } => Some(*time),
                RecordedCapture::Interrupted(_) => None,
            })
            .flatten()
            .unwrap_or_else(|| self.clock.now())
    }

    fn capture(&mut self) -> Result<Snapshot, CaptureError> {
        match self.captures.pop_front() {
            Some(RecordedCapture::Stacks { time, threads }) => {
                let time = time.unwrap_or_else(|| self.stamp());
                self.anchor = Some((time, self.clock.now()));
                Ok(Snapshot { time, threads })
            }
            Some(RecordedCapture::Interrupted(reason)) => Err(CaptureError::Interrupted(reason)),
            None => Err(CaptureError::Exhausted),
        }
    }
}
