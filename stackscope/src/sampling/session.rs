//! Per-tick merge of live snapshots into a forest
//!
//! A [`SamplingSession`] owns the forest while sampling is active. Each
//! recorded snapshot shifts the "current sample time" into "previous" and
//! merges every non-empty thread stack at the midpoint of the two. The current
//! sample time never moves backwards: a snapshot stamped earlier than the one
//! before it is merged at the current time. Nothing
//! here is shared between threads: the [`Sampler`](super::Sampler) moves the
//! session onto its background thread and back.

use log::{debug, warn};
use std::collections::BTreeMap;

use crate::calltree::{Forest, ThreadTreeBuilder};
use crate::domain::Timestamp;

use super::Snapshot;

/// Counters describing one sampling session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SamplerStats {
    /// Ticks whose snapshot was merged.
    pub ticks: u64,
    /// Ticks abandoned because the capture was interrupted.
    pub ticks_abandoned: u64,
    /// Thread stacks merged into a tree.
    pub thread_samples: u64,
    /// Thread stacks skipped because they had no frames.
    pub empty_stacks: u64,
}

/// Sampling state between `start` and `stop`.
#[derive(Debug)]
pub struct SamplingSession {
    threads: BTreeMap<String, ThreadTreeBuilder>,
    previous: Timestamp,
    current: Timestamp,
    stats: SamplerStats,
}

impl SamplingSession {
    /// Empty session whose current sample time is `start`.
    pub fn new(start: Timestamp) -> Self {
        Self {
            threads: BTreeMap::new(),
            previous: start,
            current: start,
            stats: SamplerStats::default(),
        }
    }

    /// Merge one snapshot.
    pub fn record(&mut self, snapshot: &Snapshot) {
        if snapshot.time < self.current {
            warn!(
                "Snapshot at {} is older than the current sample time {}, merging at {}",
                snapshot.time, self.current, self.current
            );
        }
        self.previous = self.current;
        self.current = self.current.max(snapshot.time);
        let at = Timestamp::midpoint(self.previous, self.current);

        for thread in &snapshot.threads {
            // Signal-handling and other platform threads often report no frames
            if thread.frames.is_empty() {
                self.stats.empty_stacks += 1;
                continue;
            }

            let builder = self
                .threads
                .entry(thread.name.clone())
                .or_insert_with(|| {
                    debug!("First observation of thread \"{}\" at {at}", thread.name);
                    ThreadTreeBuilder::new(thread.name.clone(), thread.tid, at)
                });
            builder.merge(thread.frames.iter().rev(), at);
            self.stats.thread_samples += 1;
        }

        self.stats.ticks += 1;
    }

    /// Count a tick whose capture failed; sample times stay where they were.
    pub fn abandon_tick(&mut self) {
        self.stats.ticks_abandoned += 1;
    }

    pub fn stats(&self) -> SamplerStats {
        self.stats
    }

    /// Number of threads observed so far.
    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }

    /// Close every open node at the midpoint of the last two sample times.
    pub fn finish(self) -> (Forest, SamplerStats) {
        let at = Timestamp::midpoint(self.previous, self.current);
        let mut forest = Forest::new();
        for builder in self.threads.into_values() {
            forest.insert(builder.finish(at));
        }
        (forest, self.stats)
    }
}
