//! Call-tree arena and the per-thread forest
//!
//! Every thread gets its own arena of [`CallTreeNode`]s. Children are stored
//! as indices into that arena, so the tree never needs shared ownership or
//! parent back-pointers that outlive the arena.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::domain::{MethodId, Tid, Timestamp};

/// Index of a node inside its thread's [`CallTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(pub usize);

impl NodeId {
    /// The synthetic thread node every tree starts with.
    pub const ROOT: NodeId = NodeId(0);
}

/// One observed activation of a method on one thread.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallTreeNode {
    /// Method identity; `None` for the thread root.
    pub frame: Option<MethodId>,
    pub start: Timestamp,
    /// Unset while the activation is still open.
    pub end: Option<Timestamp>,
    /// Distance from the thread root (root = 0).
    pub depth: u32,
    pub parent: Option<NodeId>,
    /// In call order.
    pub children: Vec<NodeId>,
}

impl CallTreeNode {
    pub fn is_open(&self) -> bool {
        self.end.is_none()
    }

    pub fn is_root(&self) -> bool {
        self.frame.is_none()
    }

    /// Duration in nanoseconds, `None` while open.
    pub fn duration(&self) -> Option<u64> {
        self.end.map(|end| end.saturating_since(self.start))
    }
}

/// The call tree of a single thread.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallTree {
    thread: String,
    tid: Option<Tid>,
    nodes: Vec<CallTreeNode>,
}

impl CallTree {
    /// Create a tree holding only the thread root, opened at `start`.
    pub(crate) fn new(thread: impl Into<String>, tid: Option<Tid>, start: Timestamp) -> Self {
        Self {
            thread: thread.into(),
            tid,
            nodes: vec![CallTreeNode {
                frame: None,
                start,
                end: None,
                depth: 0,
                parent: None,
                children: Vec::new(),
            }],
        }
    }

    pub fn thread_name(&self) -> &str {
        &self.thread
    }

    pub fn tid(&self) -> Option<Tid> {
        self.tid
    }

    pub fn root(&self) -> &CallTreeNode {
        &self.nodes[NodeId::ROOT.0]
    }

    pub fn node(&self, id: NodeId) -> Option<&CallTreeNode> {
        self.nodes.get(id.0)
    }

    /// All nodes, root first, in creation order.
    pub fn nodes(&self) -> &[CallTreeNode] {
        &self.nodes
    }

    /// Number of nodes including the root.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always false: a tree holds at least its root.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Children of `id`, in call order.
    pub fn children(&self, id: NodeId) -> impl Iterator<Item = (NodeId, &CallTreeNode)> + '_ {
        self.nodes
            .get(id.0)
            .map(|node| node.children.as_slice())
            .unwrap_or_default()
            .iter()
            .map(|&child| (child, &self.nodes[child.0]))
    }

    /// Whether every node, root included, has an end time.
    pub fn is_closed(&self) -> bool {
        self.nodes.iter().all(|node| !node.is_open())
    }

    /// Pre-order traversal: parents before children, siblings in call order.
    pub fn walk(&self) -> Walk<'_> {
        Walk {
            tree: self,
            pending: vec![NodeId::ROOT],
        }
    }

    pub(crate) fn frame_of(&self, id: NodeId) -> Option<&MethodId> {
        self.nodes[id.0].frame.as_ref()
    }

    pub(crate) fn push_child(&mut self, parent: NodeId, frame: MethodId, start: Timestamp) -> NodeId {
        let id = NodeId(self.nodes.len());
        let depth = self.nodes[parent.0].depth + 1;
        self.nodes.push(CallTreeNode {
            frame: Some(frame),
            start,
            end: None,
            depth,
            parent: Some(parent),
            children: Vec::new(),
        });
        self.nodes[parent.0].children.push(id);
        id
    }

    /// Close `id` at `at`, never before its own start.
    pub(crate) fn close(&mut self, id: NodeId, at: Timestamp) {
        let node = &mut self.nodes[id.0];
        if node.end.is_none() {
            node.end = Some(at.max(node.start));
        }
    }
}

/// Iterator returned by [`CallTree::walk`].
pub struct Walk<'a> {
    tree: &'a CallTree,
    pending: Vec<NodeId>,
}

impl<'a> Iterator for Walk<'a> {
    type Item = (NodeId, &'a CallTreeNode);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.pending.pop()?;
        let tree = self.tree;
        let node = &tree.nodes[id.0];
        self.pending.extend(node.children.iter().rev());
        Some((id, node))
    }
}

/// Per-thread call trees of one sampling session or one trace file.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Forest {
    trees: BTreeMap<String, CallTree>,
}

impl Forest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, thread: &str) -> Option<&CallTree> {
        self.trees.get(thread)
    }

    pub fn contains(&self, thread: &str) -> bool {
        self.trees.contains_key(thread)
    }

    /// Trees ordered by thread name.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &CallTree)> {
        self.trees.iter().map(|(name, tree)| (name.as_str(), tree))
    }

    pub fn trees(&self) -> impl Iterator<Item = &CallTree> {
        self.trees.values()
    }

    pub fn thread_names(&self) -> impl Iterator<Item = &str> {
        self.trees.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.trees.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trees.is_empty()
    }

    /// Total node count across all threads, roots included.
    pub fn node_count(&self) -> usize {
        self.trees.values().map(CallTree::len).sum()
    }

    /// Earliest root start, if any thread was observed.
    pub fn start_time(&self) -> Option<Timestamp> {
        self.trees.values().map(|tree| tree.root().start).min()
    }

    /// Latest root end among closed roots.
    pub fn end_time(&self) -> Option<Timestamp> {
        self.trees.values().filter_map(|tree| tree.root().end).max()
    }

    /// Insert under the tree's own thread name.
    pub(crate) fn insert(&mut self, tree: CallTree) {
        self.trees.insert(tree.thread.clone(), tree);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn method(name: &str) -> MethodId {
        MethodId::new(name, "Test")
    }

    #[test]
    fn test_push_child_sets_depth_and_parent() {
        let mut tree = CallTree::new("main", None, Timestamp(0));
        let a = tree.push_child(NodeId::ROOT, method("a"), Timestamp(5));
        let b = tree.push_child(a, method("b"), Timestamp(6));

        assert_eq!(tree.root().depth, 0);
        assert_eq!(tree.node(a).unwrap().depth, 1);
        assert_eq!(tree.node(b).unwrap().depth, 2);
        assert_eq!(tree.node(b).unwrap().parent, Some(a));
        assert_eq!(tree.root().children, vec![a]);
    }

    #[test]
    fn test_close_never_precedes_start() {
        let mut tree = CallTree::new("main", None, Timestamp(10));
        let a = tree.push_child(NodeId::ROOT, method("a"), Timestamp(10));
        tree.close(a, Timestamp(3));
        assert_eq!(tree.node(a).unwrap().end, Some(Timestamp(10)));

        // A second close keeps the first end time
        tree.close(a, Timestamp(50));
        assert_eq!(tree.node(a).unwrap().end, Some(Timestamp(10)));
    }

    #[test]
    fn test_walk_is_preorder_in_call_order() {
        let mut tree = CallTree::new("main", None, Timestamp(0));
        let a = tree.push_child(NodeId::ROOT, method("a"), Timestamp(1));
        tree.push_child(a, method("b"), Timestamp(2));
        tree.push_child(NodeId::ROOT, method("c"), Timestamp(3));

        let order: Vec<String> = tree
            .walk()
            .map(|(_, node)| {
                node.frame
                    .as_ref()
                    .map_or_else(|| "<root>".to_string(), |m| m.name.clone())
            })
            .collect();
        assert_eq!(order, vec!["<root>", "a", "b", "c"]);
    }

    #[test]
    fn test_forest_time_range() {
        let mut forest = Forest::new();
        assert!(forest.start_time().is_none());

        let mut early = CallTree::new("a", None, Timestamp(5));
        early.close(NodeId::ROOT, Timestamp(20));
        let mut late = CallTree::new("b", None, Timestamp(8));
        late.close(NodeId::ROOT, Timestamp(40));
        forest.insert(early);
        forest.insert(late);

        assert_eq!(forest.len(), 2);
        assert_eq!(forest.start_time(), Some(Timestamp(5)));
        assert_eq!(forest.end_time(), Some(Timestamp(40)));
        assert_eq!(forest.thread_names().collect::<Vec<_>>(), vec!["a", "b"]);
    }
}
