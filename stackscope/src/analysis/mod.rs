//! Analysis logic for call-tree forests
//!
//! Pure aggregation over finished forests, shared by the live and offline
//! paths.

pub mod hotspot_analyzer;

pub use hotspot_analyzer::{analyze_hotspots, percentage_bar, MethodHotspot};
