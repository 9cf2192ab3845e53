//! # stackscope - Call-Tree Sampling Profiler
//!
//! stackscope turns stack samples into per-thread call trees with estimated
//! start and end times for every method activation. Samples come either from a
//! live sampler that captures every thread's stack at a fixed rate, or from a
//! recorded Simpleperf trace parsed offline.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────┐          ┌──────────────────────┐
//! │   StackSource        │          │  Recorded trace      │
//! │ (live / replayed)    │          │  (simpleperf proto)  │
//! └──────────┬───────────┘          └──────────┬───────────┘
//!            │ snapshots every tick            │ samples + symbols
//!            ▼                                 ▼
//! ┌──────────────────────┐          ┌──────────────────────┐
//! │  Sampler thread      │          │  trace::simpleperf   │
//! │  (SamplingSession)   │          │  → SampleLog         │
//! └──────────┬───────────┘          └──────────┬───────────┘
//!            │                                 │
//!            └───────────────┬─────────────────┘
//!                            ▼
//!              ┌──────────────────────────┐
//!              │  calltree::ThreadTree-   │
//!              │  Builder (stack differ)  │
//!              └────────────┬─────────────┘
//!                           ▼
//!              ┌──────────────────────────┐
//!              │   Forest (per thread)    │
//!              └──────┬──────────┬────────┘
//!                     ▼          ▼
//!               ┌──────────┐ ┌──────────────┐
//!               │ Analysis │ │   Export     │
//!               │(Hotspots)│ │ (trace.json) │
//!               └──────────┘ └──────────────┘
//! ```
//!
//! ## Module Structure
//!
//! - [`calltree`]: arena call trees, the forest and the stack differ
//! - [`sampling`]: the [`sampling::Sampler`] background loop, its session, the
//!   replay source for recorded stack dumps and (on Linux) a live source over
//!   this process's threads
//! - [`trace`]: offline parsing of recorded traces
//! - [`analysis`]: hotspot aggregation over a finished forest
//! - [`export`]: Chrome Trace Event Format JSON for Perfetto or `chrome://tracing`
//! - [`cli`]: command-line argument parsing
//! - [`domain`]: core types ([`domain::MethodId`], [`domain::Timestamp`]) and errors
//!
//! ## Timing Model
//!
//! A frame first seen at tick `t` is assumed to have started halfway between
//! the previous tick and `t`. A frame missing at tick `t` is assumed to have
//! ended halfway between the tick where it was last seen and `t`. Frames still
//! open when sampling stops are closed at the midpoint of the final interval.
//!
//! ## Typical Usage
//!
//! ```bash
//! # Summarize a recorded simpleperf trace
//! stackscope parse perf.trace --pid 1234
//!
//! # Convert it for Perfetto
//! stackscope parse perf.trace --export trace.json
//!
//! # Run the live sampler over recorded stack dumps
//! stackscope replay stacks.jsonl --interval-ms 5
//!
//! # Sample this process's own threads while it parses a trace
//! stackscope sample --workload perf.trace --repeat 50
//! ```

pub mod analysis;
pub mod calltree;
pub mod cli;
pub mod domain;
pub mod export;
pub mod sampling;
pub mod trace;
