//! Trace export functionality
//!
//! This module provides functionality for exporting call-tree forests to various formats.
//! Currently supports Chrome Trace Event Format for visualization in chrome://tracing,
//! Perfetto or Speedscope.

pub mod chrome_trace;

pub use chrome_trace::ChromeTraceExporter;
