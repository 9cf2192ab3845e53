//! Forest reconstruction from a finite sample log
//!
//! Offline traces hand over every sample at once. Samples are grouped per
//! thread and replayed in timestamp order through the same
//! [`ThreadTreeBuilder`] the live sampler uses; "previous" and "current" are
//! adjacent samples of the same thread.

use log::debug;
use std::collections::{BTreeMap, HashMap};

use crate::calltree::{Forest, ThreadTreeBuilder};
use crate::domain::{MethodId, Tid, Timestamp};

/// One resolved sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggedSample {
    pub tid: Tid,
    pub time: Timestamp,
    /// Innermost frame first.
    pub frames: Vec<MethodId>,
}

/// Forest plus the key each thread ended up under.
#[derive(Debug, Clone, Default)]
pub struct BuiltForest {
    pub forest: Forest,
    pub thread_keys: BTreeMap<Tid, String>,
}

/// Ordered log of samples waiting to become a forest.
#[derive(Debug, Default)]
pub struct SampleLog {
    samples: Vec<LoggedSample>,
    names: HashMap<Tid, String>,
}

impl SampleLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, sample: LoggedSample) {
        self.samples.push(sample);
    }

    pub fn set_thread_name(&mut self, tid: Tid, name: impl Into<String>) {
        self.names.insert(tid, name.into());
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Build one tree per thread.
    ///
    /// Samples with an empty stack are skipped without touching the thread's
    /// sample times. Threads are keyed by name; a name already taken by
    /// another thread gets its tid appended.
    pub fn build(self) -> BuiltForest {
        let mut per_thread: BTreeMap<Tid, Vec<LoggedSample>> = BTreeMap::new();
        for sample in self.samples {
            per_thread.entry(sample.tid).or_default().push(sample);
        }

        let mut built = BuiltForest::default();
        for (tid, mut samples) in per_thread {
            samples.retain(|s| !s.frames.is_empty());
            samples.sort_by_key(|s| s.time);
            let Some(first) = samples.first() else {
                continue;
            };

            let name = self
                .names
                .get(&tid)
                .filter(|name| !name.is_empty())
                .cloned()
                .unwrap_or_else(|| format!("Thread {}", tid.0));
            let key = if built.forest.contains(&name) {
                format!("{name} ({})", tid.0)
            } else {
                name
            };

            let mut previous = first.time;
            let mut current = first.time;
            let mut builder = ThreadTreeBuilder::new(key.clone(), Some(tid), first.time);
            for sample in &samples {
                previous = current;
                current = sample.time;
                builder.merge(sample.frames.iter().rev(), Timestamp::midpoint(previous, current));
            }

            let tree = builder.finish(Timestamp::midpoint(previous, current));
            debug!("{}: {} samples, {} nodes", key, samples.len(), tree.len());
            built.forest.insert(tree);
            built.thread_keys.insert(tid, key);
        }

        built
    }
}
