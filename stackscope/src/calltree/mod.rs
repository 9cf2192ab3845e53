//! Per-thread call trees reconstructed from stack samples
//!
//! - [`tree`]: arena-backed [`CallTree`] per thread and the [`Forest`] of them
//! - [`builder`]: the stack differ shared by live sampling and offline traces

pub mod builder;
pub mod tree;

pub use builder::{MergeOutcome, ThreadTreeBuilder};
pub use tree::{CallTree, CallTreeNode, Forest, NodeId, Walk};
