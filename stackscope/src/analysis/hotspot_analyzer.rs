//! Hotspot analysis for call-tree forests.
//!
//! This module aggregates call-tree nodes by method identity to identify
//! performance hotspots - methods that spend the most time on the stack
//! without a sampled callee below them.
//!
//! # Metrics
//!
//! - **Self time**: node duration minus the durations of its children
//! - **Total time**: node duration, counted once per outermost activation so
//!   recursive calls are not double counted
//! - **Calls**: number of nodes (observed activations)
//!
//! # Display
//!
//! ```text
//! HOTSPOTS
//! ────────────────────────────────────────────────────────────
//!   com.example.Worker.compute      42.3%  ████████░░  self 12.400ms  total 18.100ms  calls 3
//!   /system/lib64/libc.so.nanosleep 18.7%  ██░░░░░░░░  self  5.480ms  total  5.480ms  calls 9
//! ```
//!
//! [`percentage_bar`] renders the bar column.

// Percentage calculations intentionally convert u64 to f64
#![allow(clippy::cast_precision_loss)]

use std::collections::{BTreeMap, HashMap};

use crate::calltree::{CallTree, Forest, NodeId};
use crate::domain::MethodId;

// =============================================================================
// METHOD HOTSPOT (OUTPUT TYPE)
// =============================================================================

/// A method hotspot with aggregated statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodHotspot {
    pub method: MethodId,

    /// Sum of self time in nanoseconds.
    pub self_time_ns: u64,

    /// Sum of total time in nanoseconds (outermost activations only).
    pub total_time_ns: u64,

    /// Observed activations.
    pub calls: u64,

    /// Share of all self time in the forest (0.0 - 100.0).
    pub percentage: f64,

    /// Per-thread breakdown: thread name → self time.
    pub threads: BTreeMap<String, u64>,
}

// =============================================================================
// AGGREGATION
// =============================================================================

#[derive(Debug, Default)]
struct MethodStats {
    self_time_ns: u64,
    total_time_ns: u64,
    calls: u64,
    threads: BTreeMap<String, u64>,
}

/// Aggregate one thread's tree into `stats`.
///
/// The walk keeps its own stack so tree depth is bounded by memory rather
/// than by the thread's call stack. `active` counts how often each method is
/// on the current path, which decides whether an activation is outermost.
fn aggregate_tree(tree: &CallTree, thread: &str, stats: &mut HashMap<MethodId, MethodStats>) {
    let mut active: HashMap<&MethodId, usize> = HashMap::new();
    let mut pending: Vec<(NodeId, bool)> = vec![(NodeId::ROOT, false)];

    while let Some((id, exiting)) = pending.pop() {
        let Some(node) = tree.node(id) else {
            continue;
        };

        if exiting {
            if let Some(depth) = node.frame.as_ref().and_then(|f| active.get_mut(f)) {
                *depth -= 1;
            }
            continue;
        }

        if let Some(frame) = &node.frame {
            let duration = node.duration().unwrap_or(0);
            let children_time: u64 = tree
                .children(id)
                .map(|(_, child)| child.duration().unwrap_or(0))
                .sum();

            let depth = active.entry(frame).or_insert(0);
            let outermost = *depth == 0;
            *depth += 1;

            let self_time = duration.saturating_sub(children_time);
            let entry = stats.entry(frame.clone()).or_default();
            entry.calls += 1;
            entry.self_time_ns += self_time;
            if outermost {
                entry.total_time_ns += duration;
            }
            *entry.threads.entry(thread.to_string()).or_insert(0) += self_time;
        }

        pending.push((id, true));
        // Reversed so children are visited in insertion order
        pending.extend(node.children.iter().rev().map(|&child| (child, false)));
    }
}

/// Analyze a forest to identify method hotspots.
///
/// Sorted by self time (descending), ties broken by method for a stable
/// listing. `top == 0` returns every method.
#[must_use]
pub fn analyze_hotspots(forest: &Forest, top: usize) -> Vec<MethodHotspot> {
    let mut stats: HashMap<MethodId, MethodStats> = HashMap::new();

    for (thread, tree) in forest.iter() {
        aggregate_tree(tree, thread, &mut stats);
    }

    let total_self: u64 = stats.values().map(|s| s.self_time_ns).sum();

    let mut hotspots: Vec<MethodHotspot> = stats
        .into_iter()
        .map(|(method, s)| {
            let percentage = if total_self > 0 {
                (s.self_time_ns as f64 / total_self as f64) * 100.0
            } else {
                0.0
            };
            MethodHotspot {
                method,
                self_time_ns: s.self_time_ns,
                total_time_ns: s.total_time_ns,
                calls: s.calls,
                percentage,
                threads: s.threads,
            }
        })
        .collect();

    hotspots.sort_by(|a, b| {
        b.self_time_ns
            .cmp(&a.self_time_ns)
            .then_with(|| a.method.cmp(&b.method))
    });
    if top > 0 {
        hotspots.truncate(top);
    }
    hotspots
}

/// Render `percentage` as a fixed-width bar of `width` cells.
#[must_use]
pub fn percentage_bar(percentage: f64, width: usize) -> String {
    let filled = ((percentage.clamp(0.0, 100.0) / 100.0) * width as f64).round();
    // Clamped to 0..=width above
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let filled = filled as usize;
    format!("{}{}", "█".repeat(filled), "░".repeat(width - filled))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Timestamp;
    use crate::sampling::{SamplingSession, Snapshot, ThreadStack};

    /// `outer_to_inner` stacks per thread, one tick every 10ns.
    fn forest(ticks: &[(&str, &[&str])]) -> Forest {
        let mut session = SamplingSession::new(Timestamp(0));
        for (i, (thread, stack)) in ticks.iter().enumerate() {
            let frames = stack.iter().rev().map(|n| MethodId::new(*n, "M")).collect();
            session.record(&Snapshot {
                time: Timestamp((i as u64 + 1) * 10),
                threads: vec![ThreadStack::new(*thread, frames)],
            });
        }
        session.finish().0
    }

    #[test]
    fn test_self_time_excludes_children() {
        // a: 5..45, b: 15..35
        let forest = forest(&[
            ("main", &["a"]),
            ("main", &["a", "b"]),
            ("main", &["a", "b"]),
            ("main", &["a"]),
            ("main", &["a"]),
        ]);
        let hotspots = analyze_hotspots(&forest, 0);

        assert_eq!(hotspots.len(), 2);
        let a = hotspots.iter().find(|h| h.method.name == "a").unwrap();
        let b = hotspots.iter().find(|h| h.method.name == "b").unwrap();
        assert_eq!(a.total_time_ns, 40);
        assert_eq!(a.self_time_ns, 20);
        assert_eq!(b.self_time_ns, 20);
        assert!((a.percentage - 50.0).abs() < 0.01);
        assert_eq!(a.threads["main"], 20);
    }

    #[test]
    fn test_recursion_counts_total_once() {
        let forest = forest(&[
            ("main", &["f"]),
            ("main", &["f", "f"]),
            ("main", &["f", "f"]),
            ("main", &["f"]),
        ]);
        let hotspots = analyze_hotspots(&forest, 0);

        assert_eq!(hotspots.len(), 1);
        let f = &hotspots[0];
        assert_eq!(f.calls, 2);
        // outer f: 5..35, inner f: 15..35
        assert_eq!(f.total_time_ns, 30);
        assert_eq!(f.self_time_ns, 30);
    }

    #[test]
    fn test_sorted_and_truncated() {
        let forest = forest(&[
            ("main", &["slow"]),
            ("main", &["slow"]),
            ("main", &["slow"]),
            ("main", &["fast"]),
            ("main", &["fast"]),
            ("main", &["idle"]),
        ]);
        let hotspots = analyze_hotspots(&forest, 2);

        assert_eq!(hotspots.len(), 2);
        assert_eq!(hotspots[0].method.name, "slow");
        assert_eq!(hotspots[1].method.name, "fast");
    }

    #[test]
    fn test_deep_tree_does_not_overflow() {
        const DEPTH: usize = 20_000;
        let frames: Vec<MethodId> = (0..DEPTH)
            .rev()
            .map(|i| MethodId::new(format!("frame{}", i % 7), "Deep"))
            .collect();

        let mut session = SamplingSession::new(Timestamp(0));
        session.record(&Snapshot {
            time: Timestamp(10),
            threads: vec![ThreadStack::new("main", frames)],
        });
        session.record(&Snapshot {
            time: Timestamp(20),
            threads: vec![ThreadStack::new("main", Vec::new())],
        });
        let (forest, _) = session.finish();
        assert_eq!(forest.node_count(), DEPTH + 1);

        let hotspots = analyze_hotspots(&forest, 0);
        assert_eq!(hotspots.len(), 7);
        let calls: u64 = hotspots.iter().map(|h| h.calls).sum();
        assert_eq!(calls, DEPTH as u64);
        // Every frame spans 5..15; only the innermost one has self time
        let total: u64 = hotspots.iter().map(|h| h.self_time_ns).sum();
        assert_eq!(total, 10);
        assert!(hotspots.iter().all(|h| h.total_time_ns == 10));
    }

    #[test]
    fn test_percentage_bar() {
        assert_eq!(percentage_bar(50.0, 10), "█████░░░░░");
        assert_eq!(percentage_bar(0.0, 4), "░░░░");
        assert_eq!(percentage_bar(140.0, 4), "████");
    }

    #[test]
    fn test_empty_forest() {
        assert!(analyze_hotspots(&Forest::new(), 10).is_empty());
    }
}
