use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::io::Write;

use crate::calltree::Forest;
use crate::domain::{ExportError, Timestamp};

/// Chrome Trace Event format
/// Spec: https://docs.google.com/document/d/1CvAClvFfyA5R-PhYUmn5OOQtYMH4h6I0nSsKchNAySU/preview
#[derive(Debug, Clone, Serialize)]
struct ChromeTraceEvent {
    /// Event name (method name, or "thread_name" for metadata)
    name: String,
    /// Category for filtering/coloring (declaring namespace)
    cat: String,
    /// Phase: "X" = complete, "M" = metadata
    ph: &'static str,
    /// Timestamp in microseconds
    ts: f64,
    /// Duration in microseconds (complete events only)
    #[serde(skip_serializing_if = "Option::is_none")]
    dur: Option<f64>,
    pid: u32,
    tid: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    args: Option<BTreeMap<&'static str, JsonValue>>,
}

/// Chrome Trace Format container
#[derive(Debug, Serialize)]
struct ChromeTrace<'a> {
    #[serde(rename = "traceEvents")]
    trace_events: &'a [ChromeTraceEvent],
    #[serde(rename = "displayTimeUnit")]
    display_time_unit: &'static str,
}

/// Chrome trace exporter for timeline visualization
///
/// Each closed frame becomes a complete event placed relative to the earliest
/// thread root of the first forest added. Threads without a recorded tid get
/// sequential ids starting at 1.
pub struct ChromeTraceExporter {
    events: Vec<ChromeTraceEvent>,
    pid: u32,
    origin: Option<Timestamp>,
    next_synthetic_tid: u32,
}

impl ChromeTraceExporter {
    /// Create an exporter reporting every event under process `pid`
    pub fn new(pid: u32) -> Self {
        Self {
            events: Vec::new(),
            pid,
            origin: None,
            next_synthetic_tid: 1,
        }
    }

    /// Add every thread of `forest`
    pub fn add_forest(&mut self, forest: &Forest) {
        if self.origin.is_none() {
            self.origin = forest.start_time();
        }
        let origin = self.origin.unwrap_or_default();

        for (name, tree) in forest.iter() {
            let tid = tree.tid().map_or_else(
                || {
                    let tid = self.next_synthetic_tid;
                    self.next_synthetic_tid += 1;
                    tid
                },
                |tid| tid.0,
            );

            let mut args = BTreeMap::new();
            args.insert("name", serde_json::json!(name));
            self.events.push(ChromeTraceEvent {
                name: "thread_name".to_string(),
                cat: String::new(),
                ph: "M", // Metadata
                ts: 0.0,
                dur: None,
                pid: self.pid,
                tid,
                args: Some(args),
            });

            // Pre-order keeps parents ahead of children that start at the same time
            for (_, node) in tree.walk() {
                let (Some(frame), Some(end)) = (&node.frame, node.end) else {
                    continue;
                };

                let mut args = BTreeMap::new();
                args.insert("depth", serde_json::json!(node.depth));

                self.events.push(ChromeTraceEvent {
                    name: frame.name.clone(),
                    cat: frame.namespace.clone(),
                    ph: "X", // Complete
                    ts: Timestamp(node.start.saturating_since(origin)).as_micros(),
                    dur: Some(Timestamp(end.saturating_since(node.start)).as_micros()),
                    pid: self.pid,
                    tid,
                    args: Some(args),
                });
            }
        }
    }

    /// Export the trace to any writer (file, stdout, buffer, etc.)
    ///
    /// # Errors
    /// Returns an error if serialization or writing fails
    pub fn export<W: Write>(&self, mut writer: W) -> Result<(), ExportError> {
        let trace = ChromeTrace {
            trace_events: &self.events,
            display_time_unit: "ms",
        };

        serde_json::to_writer_pretty(&mut writer, &trace)?;
        writer.flush()?;
        Ok(())
    }

    /// Get the number of events collected
    pub fn event_count(&self) -> usize {
        self.events.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{MethodId, Tid};
    use crate::trace::{LoggedSample, SampleLog};

    fn forest() -> Forest {
        let mut log = SampleLog::new();
        log.set_thread_name(Tid(42), "main");
        for (time, frames) in [(1_000u64, vec!["b", "a"]), (3_000, vec!["a"])] {
            log.push(LoggedSample {
                tid: Tid(42),
                time: Timestamp(time),
                frames: frames.into_iter().map(|f| MethodId::new(f, "Main")).collect(),
            });
        }
        log.build().forest
    }

    #[test]
    fn test_complete_events_in_microseconds() {
        let mut exporter = ChromeTraceExporter::new(7);
        exporter.add_forest(&forest());
        // metadata + a + b
        assert_eq!(exporter.event_count(), 3);

        let mut buffer = Vec::new();
        exporter.export(&mut buffer).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&buffer).unwrap();

        let events = json["traceEvents"].as_array().unwrap();
        assert_eq!(events[0]["ph"], "M");
        assert_eq!(events[0]["args"]["name"], "main");
        assert_eq!(events[0]["tid"], 42);

        let b = events.iter().find(|e| e["name"] == "b").unwrap();
        assert_eq!(b["ph"], "X");
        assert_eq!(b["cat"], "Main");
        assert_eq!(b["pid"], 7);
        assert_eq!(b["ts"], 0.0);
        // opened at 1000ns, closed at the midpoint of 1000 and 3000
        assert_eq!(b["dur"], 1.0);
        assert_eq!(b["args"]["depth"], 2);
    }

    #[test]
    fn test_threads_without_tid_get_synthetic_ids() {
        let mut session = crate::sampling::SamplingSession::new(Timestamp(0));
        session.record(&crate::sampling::Snapshot {
            time: Timestamp(10),
            threads: vec![
                crate::sampling::ThreadStack::new("a", vec![MethodId::new("f", "")]),
                crate::sampling::ThreadStack::new("b", vec![MethodId::new("g", "")]),
            ],
        });
        let (forest, _) = session.finish();

        let mut exporter = ChromeTraceExporter::new(1);
        exporter.add_forest(&forest);
        let mut buffer = Vec::new();
        exporter.export(&mut buffer).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&buffer).unwrap();

        let tids: Vec<u64> = json["traceEvents"]
            .as_array()
            .unwrap()
            .iter()
            .filter(|e| e["ph"] == "M")
            .map(|e| e["tid"].as_u64().unwrap())
            .collect();
        assert_eq!(tids, vec![1, 2]);
    }
}
