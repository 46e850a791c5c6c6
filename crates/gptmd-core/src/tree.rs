//! Node arena over the conversation mapping and its traversal order.

use std::collections::HashSet;

use indexmap::IndexMap;
use tracing::{debug, warn};

use crate::conversation::Node;

/// Identifier-indexed view over the nodes of one conversation.
#[derive(Debug, Clone, Copy)]
pub struct NodeArena<'a> {
    nodes: &'a IndexMap<String, Node>,
}

impl<'a> NodeArena<'a> {
    pub fn new(nodes: &'a IndexMap<String, Node>) -> Self {
        Self { nodes }
    }

    pub fn get(&self, id: &str) -> Option<&'a Node> {
        self.nodes.get(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Picks the traversal root.
    ///
    /// The first node (in document order) without a parent. When no node
    /// qualifies, falls back to the first node of the mapping; that fallback
    /// depends on the backend's key order and is reported as a warning.
    pub fn root(&self) -> Option<&'a str> {
        let mut parentless = self
            .nodes
            .iter()
            .filter(|(_, node)| !node.has_parent())
            .map(|(id, _)| id.as_str());

        if let Some(root) = parentless.next() {
            let extra = parentless.count();
            if extra > 0 {
                warn!(root, extra, "multiple parentless nodes; using the first one as root");
            }
            return Some(root);
        }

        let fallback = self.nodes.keys().next().map(String::as_str)?;
        warn!(
            root = fallback,
            "no parentless node found; falling back to the first mapping entry (order-dependent)"
        );
        Some(fallback)
    }

    /// Depth-first pre-order walk from [`NodeArena::root`].
    pub fn preorder(&self) -> Preorder<'a> {
        Preorder::new(*self, self.root())
    }

    /// Depth-first pre-order walk from an explicit start node.
    pub fn preorder_from(&self, start: &str) -> Preorder<'a> {
        Preorder::new(*self, self.nodes.get_key_value(start).map(|(k, _)| k.as_str()))
    }
}

/// Pre-order iterator driven by an explicit work stack.
///
/// Children are visited in list order. Unknown child ids are skipped, and a
/// node already visited (a cycle or a shared child) is never yielded twice.
pub struct Preorder<'a> {
    arena: NodeArena<'a>,
    stack: Vec<&'a str>,
    visited: HashSet<&'a str>,
}

impl<'a> Preorder<'a> {
    fn new(arena: NodeArena<'a>, start: Option<&'a str>) -> Self {
        Self {
            arena,
            stack: start.into_iter().collect(),
            visited: HashSet::new(),
        }
    }
}

impl<'a> Iterator for Preorder<'a> {
    type Item = (&'a str, &'a Node);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(id) = self.stack.pop() {
            let Some((key, node)) = self.arena.nodes.get_key_value(id) else {
                debug!(node = id, "skipping unknown node id");
                continue;
            };
            let key = key.as_str();
            if !self.visited.insert(key) {
                warn!(node = key, "node reached twice; skipping repeated visit");
                continue;
            }
            self.stack
                .extend(node.children.iter().rev().map(String::as_str));
            return Some((key, node));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(parent: Option<&str>, children: &[&str]) -> Node {
        Node {
            parent: parent.map(ToString::to_string),
            children: children.iter().map(ToString::to_string).collect(),
            ..Default::default()
        }
    }

    fn mapping(entries: Vec<(&str, Node)>) -> IndexMap<String, Node> {
        entries
            .into_iter()
            .map(|(id, n)| (id.to_string(), n))
            .collect()
    }

    fn order(nodes: &IndexMap<String, Node>) -> Vec<&str> {
        NodeArena::new(nodes).preorder().map(|(id, _)| id).collect()
    }

    #[test]
    fn test_single_parentless_node_is_root() {
        let nodes = mapping(vec![
            ("b", node(Some("a"), &[])),
            ("a", node(None, &["b"])),
        ]);
        assert_eq!(NodeArena::new(&nodes).root(), Some("a"));
    }

    #[test]
    fn test_empty_parent_counts_as_root() {
        let nodes = mapping(vec![("b", node(Some("a"), &[])), ("a", node(Some(""), &[]))]);
        assert_eq!(NodeArena::new(&nodes).root(), Some("a"));
    }

    #[test]
    fn test_root_fallback_is_first_entry() {
        let nodes = mapping(vec![
            ("x", node(Some("y"), &["y"])),
            ("y", node(Some("x"), &["x"])),
        ]);
        let arena = NodeArena::new(&nodes);
        assert_eq!(arena.root(), Some("x"));
        // Deterministic for the same input.
        assert_eq!(arena.root(), arena.root());
        // The cycle is walked once per node.
        assert_eq!(order(&nodes), vec!["x", "y"]);
    }

    #[test]
    fn test_multiple_parentless_nodes_pick_first() {
        let nodes = mapping(vec![("r1", node(None, &[])), ("r2", node(None, &[]))]);
        assert_eq!(NodeArena::new(&nodes).root(), Some("r1"));
    }

    #[test]
    fn test_empty_mapping_has_no_root() {
        let nodes = IndexMap::new();
        let arena = NodeArena::new(&nodes);
        assert!(arena.is_empty());
        assert_eq!(arena.root(), None);
        assert_eq!(arena.preorder().count(), 0);
    }

    #[test]
    fn test_preorder_visits_children_in_list_order() {
        let nodes = mapping(vec![
            ("root", node(None, &["a", "d"])),
            ("a", node(Some("root"), &["b", "c"])),
            ("b", node(Some("a"), &[])),
            ("c", node(Some("a"), &[])),
            ("d", node(Some("root"), &["e"])),
            ("e", node(Some("d"), &[])),
        ]);
        assert_eq!(order(&nodes), vec!["root", "a", "b", "c", "d", "e"]);
    }

    #[test]
    fn test_missing_children_are_skipped() {
        let nodes = mapping(vec![
            ("root", node(None, &["ghost", "a"])),
            ("a", node(Some("root"), &["ghost2"])),
        ]);
        assert_eq!(order(&nodes), vec!["root", "a"]);
    }

    #[test]
    fn test_orphans_are_never_visited() {
        let nodes = mapping(vec![
            ("root", node(None, &["a"])),
            ("a", node(Some("root"), &[])),
            ("orphan", node(Some("gone"), &[])),
        ]);
        assert_eq!(order(&nodes), vec!["root", "a"]);
    }

    #[test]
    fn test_shared_child_visited_once() {
        let nodes = mapping(vec![
            ("root", node(None, &["a", "b"])),
            ("a", node(Some("root"), &["c"])),
            ("b", node(Some("root"), &["c"])),
            ("c", node(Some("a"), &[])),
        ]);
        assert_eq!(order(&nodes), vec!["root", "a", "c", "b"]);
    }

    #[test]
    fn test_preorder_from_explicit_start() {
        let nodes = mapping(vec![
            ("root", node(None, &["a"])),
            ("a", node(Some("root"), &["b"])),
            ("b", node(Some("a"), &[])),
        ]);
        let arena = NodeArena::new(&nodes);
        let ids: Vec<_> = arena.preorder_from("a").map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(arena.preorder_from("nope").count(), 0);
        assert_eq!(arena.len(), 3);
        assert!(arena.get("b").is_some());
    }
}
