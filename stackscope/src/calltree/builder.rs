//! Stack differ
//!
//! Merges consecutive stack observations of one thread into its call tree.
//! The builder remembers which nodes are still open (the path from the root
//! to the leaf of the last observed stack). A new stack is compared against
//! that path from the outermost frame inward; everything past the first
//! mismatch is closed, and every new frame past it is opened.
//!
//! ```text
//! open path:  A ─ B ─ C          new stack: A ─ D
//!                 ^ divergence
//! close C, B (innermost first)   open D under A
//! ```
//!
//! Stacks are passed outermost-first. Capture sources and trace formats that
//! record innermost-first must reverse at the call site.

use crate::domain::{MethodId, Tid, Timestamp};

use super::tree::{CallTree, NodeId};

/// Nodes touched by a single merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    pub opened: usize,
    pub closed: usize,
}

impl MergeOutcome {
    pub fn is_unchanged(self) -> bool {
        self.opened == 0 && self.closed == 0
    }
}

/// Incrementally builds the call tree of one thread.
#[derive(Debug, Clone)]
pub struct ThreadTreeBuilder {
    tree: CallTree,
    /// Open nodes below the root, outermost first.
    open: Vec<NodeId>,
}

impl ThreadTreeBuilder {
    /// Start a tree whose root opens at `start`.
    pub fn new(thread: impl Into<String>, tid: Option<Tid>, start: Timestamp) -> Self {
        Self {
            tree: CallTree::new(thread, tid, start),
            open: Vec::new(),
        }
    }

    /// Merge one observed stack (outermost-first) at the estimated time `at`.
    pub fn merge<'a, I>(&mut self, outermost_first: I, at: Timestamp) -> MergeOutcome
    where
        I: IntoIterator<Item = &'a MethodId>,
    {
        let stack: Vec<&MethodId> = outermost_first.into_iter().collect();

        let divergence = self
            .open
            .iter()
            .zip(&stack)
            .take_while(|&(&id, &frame)| self.tree.frame_of(id) == Some(frame))
            .count();

        let closed = self.open.len() - divergence;
        for id in self.open.drain(divergence..).rev() {
            self.tree.close(id, at);
        }

        let opened = stack.len() - divergence;
        for &frame in &stack[divergence..] {
            let parent = self.open.last().copied().unwrap_or(NodeId::ROOT);
            let id = self.tree.push_child(parent, frame.clone(), at);
            self.open.push(id);
        }

        MergeOutcome { opened, closed }
    }

    /// Depth of the currently open path, excluding the root.
    pub fn open_depth(&self) -> usize {
        self.open.len()
    }

    pub fn tree(&self) -> &CallTree {
        &self.tree
    }

    /// Close every open node, then the root, at `at`.
    pub fn finish(mut self, at: Timestamp) -> CallTree {
        for id in self.open.drain(..).rev() {
            self.tree.close(id, at);
        }
        self.tree.close(NodeId::ROOT, at);
        self.tree
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stack(names: &[&str]) -> Vec<MethodId> {
        names.iter().map(|n| MethodId::new(*n, "Test")).collect()
    }

    fn names_at_depth(tree: &CallTree, depth: u32) -> Vec<String> {
        tree.walk()
            .filter(|(_, node)| node.depth == depth)
            .filter_map(|(_, node)| node.frame.as_ref().map(|m| m.name.clone()))
            .collect()
    }

    #[test]
    fn test_first_merge_opens_whole_stack() {
        let mut builder = ThreadTreeBuilder::new("main", None, Timestamp(0));
        let outcome = builder.merge(&stack(&["a", "b", "c"]), Timestamp(10));

        assert_eq!(outcome, MergeOutcome { opened: 3, closed: 0 });
        assert_eq!(builder.open_depth(), 3);
        assert_eq!(builder.tree().len(), 4);
    }

    #[test]
    fn test_identical_stack_is_unchanged() {
        let mut builder = ThreadTreeBuilder::new("main", None, Timestamp(0));
        builder.merge(&stack(&["a", "b"]), Timestamp(10));
        let outcome = builder.merge(&stack(&["a", "b"]), Timestamp(20));

        assert!(outcome.is_unchanged());
        assert_eq!(builder.tree().len(), 3);
        assert!(builder.tree().nodes().iter().all(|n| n.is_open()));
    }

    #[test]
    fn test_divergence_closes_suffix_and_opens_new_frames() {
        let mut builder = ThreadTreeBuilder::new("main", None, Timestamp(0));
        builder.merge(&stack(&["a", "b", "c"]), Timestamp(10));
        let outcome = builder.merge(&stack(&["a", "d"]), Timestamp(20));

        assert_eq!(outcome, MergeOutcome { opened: 1, closed: 2 });
        let tree = builder.tree();
        let b = tree.nodes().iter().find(|n| n.frame.as_ref().is_some_and(|m| m.name == "b"));
        let c = tree.nodes().iter().find(|n| n.frame.as_ref().is_some_and(|m| m.name == "c"));
        assert_eq!(b.unwrap().end, Some(Timestamp(20)));
        assert_eq!(c.unwrap().end, Some(Timestamp(20)));
        assert_eq!(names_at_depth(tree, 2), vec!["b", "d"]);
    }

    #[test]
    fn test_same_name_different_namespace_diverges() {
        let mut builder = ThreadTreeBuilder::new("main", None, Timestamp(0));
        builder.merge(&[MethodId::new("run", "Foo")], Timestamp(1));
        let outcome = builder.merge(&[MethodId::new("run", "Bar")], Timestamp(2));
        assert_eq!(outcome, MergeOutcome { opened: 1, closed: 1 });
    }

    #[test]
    fn test_reentering_a_method_creates_a_new_node() {
        let mut builder = ThreadTreeBuilder::new("main", None, Timestamp(0));
        builder.merge(&stack(&["a", "b"]), Timestamp(1));
        builder.merge(&stack(&["a"]), Timestamp(2));
        builder.merge(&stack(&["a", "b"]), Timestamp(3));

        assert_eq!(names_at_depth(builder.tree(), 2), vec!["b", "b"]);
    }

    #[test]
    fn test_finish_closes_everything() {
        let mut builder = ThreadTreeBuilder::new("main", None, Timestamp(0));
        builder.merge(&stack(&["a", "b"]), Timestamp(5));
        let tree = builder.finish(Timestamp(9));

        assert!(tree.is_closed());
        assert_eq!(tree.root().end, Some(Timestamp(9)));
        for (_, node) in tree.walk() {
            assert!(node.end.unwrap() >= node.start);
        }
    }
}
