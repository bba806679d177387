//! Conversion between the persisted node list and the node/edge graph.
//!
//! Persisted nodes carry their parent reference inline. The graph form holds
//! nodes with those references stripped plus an explicit edge list, which is
//! what the editor mutates and the validator and router traverse.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{ParentEdge, TreeNode};

/// A directed edge from a parent node to a child, optionally labelled with
/// one of the parent's branch names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TreeEdge {
    pub source: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl TreeEdge {
    /// Create an edge.
    pub fn new(source: impl Into<String>, target: impl Into<String>, label: Option<&str>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            label: label.map(str::to_string),
        }
    }
}

/// Graph form of a tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TreeGraph {
    pub(crate) nodes: Vec<TreeNode>,
    pub(crate) edges: Vec<TreeEdge>,
    /// Parent references that pointed at nodes not present in the tree,
    /// keyed by the child's node key.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub(crate) dangling: BTreeMap<String, ParentEdge>,
}

impl TreeGraph {
    /// Build a graph from nodes and edges. Edges touching unknown nodes are
    /// dropped; node parent references are cleared.
    pub fn from_parts(nodes: Vec<TreeNode>, edges: Vec<TreeEdge>) -> Self {
        let nodes: Vec<TreeNode> = nodes.into_iter().map(strip_parent).collect();
        let keys: HashSet<&str> = nodes.iter().map(|n| n.node_key.as_str()).collect();
        let edges: Vec<TreeEdge> = edges
            .into_iter()
            .filter(|e| {
                let known = keys.contains(e.source.as_str()) && keys.contains(e.target.as_str());
                if !known {
                    debug!(source = %e.source, target = %e.target, "Dropping edge to unknown node");
                }
                known
            })
            .collect();

        Self {
            nodes,
            edges,
            dangling: BTreeMap::new(),
        }
    }

    /// All nodes in insertion order.
    pub fn nodes(&self) -> &[TreeNode] {
        &self.nodes
    }

    /// All edges in insertion order.
    pub fn edges(&self) -> &[TreeEdge] {
        &self.edges
    }

    /// Dangling parent references recorded during conversion.
    pub fn dangling(&self) -> &BTreeMap<String, ParentEdge> {
        &self.dangling
    }

    /// Look up a node by key.
    pub fn node(&self, key: &str) -> Option<&TreeNode> {
        self.nodes.iter().find(|n| n.node_key == key)
    }

    pub(crate) fn node_mut(&mut self, key: &str) -> Option<&mut TreeNode> {
        self.nodes.iter_mut().find(|n| n.node_key == key)
    }

    /// Whether a node with this key exists.
    pub fn contains(&self, key: &str) -> bool {
        self.node(key).is_some()
    }

    /// Edges leaving `key`, in insertion order.
    pub fn outgoing<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a TreeEdge> + 'a {
        self.edges.iter().filter(move |e| e.source == key)
    }

    /// Edges entering `key`, in insertion order.
    pub fn incoming<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a TreeEdge> + 'a {
        self.edges.iter().filter(move |e| e.target == key)
    }

    /// The edge from `source` to `target`, if any.
    pub fn edge(&self, source: &str, target: &str) -> Option<&TreeEdge> {
        self.edges
            .iter()
            .find(|e| e.source == source && e.target == target)
    }

    /// Root candidates: nodes with no incoming edge and no dangling parent
    /// reference, in node order.
    pub fn roots(&self) -> Vec<&TreeNode> {
        let targets: HashSet<&str> = self.edges.iter().map(|e| e.target.as_str()).collect();
        self.nodes
            .iter()
            .filter(|n| {
                !self.dangling.contains_key(&n.node_key) && !targets.contains(n.node_key.as_str())
            })
            .collect()
    }

    /// Keys of nodes entered by more than one edge, in node order.
    ///
    /// The persisted form holds a single parent per node, so these graphs
    /// cannot be saved without losing edges.
    pub fn shared_targets(&self) -> Vec<&str> {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for edge in &self.edges {
            *counts.entry(edge.target.as_str()).or_default() += 1;
        }
        self.nodes
            .iter()
            .map(|n| n.node_key.as_str())
            .filter(|key| counts.get(key).is_some_and(|&c| c > 1))
            .collect()
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

fn strip_parent(mut node: TreeNode) -> TreeNode {
    node.parent_edge = None;
    node.is_root = false;
    node
}

/// Convert a persisted node list into graph form.
///
/// Every node with a parent reference yields one edge. References to parents
/// that are not in the list are kept aside in [`TreeGraph::dangling`] rather
/// than turned into edges; the validator reports those nodes as orphaned.
pub fn to_graph(nodes: &[TreeNode]) -> TreeGraph {
    let keys: HashSet<&str> = nodes.iter().map(|n| n.node_key.as_str()).collect();
    let mut edges = Vec::new();
    let mut dangling = BTreeMap::new();

    for node in nodes {
        let Some(parent) = &node.parent_edge else {
            continue;
        };
        if keys.contains(parent.parent_node_key.as_str()) {
            edges.push(TreeEdge {
                source: parent.parent_node_key.clone(),
                target: node.node_key.clone(),
                label: parent.branch_label.clone(),
            });
        } else {
            debug!(
                node_key = %node.node_key,
                parent = %parent.parent_node_key,
                "Dangling parent reference"
            );
            dangling.insert(node.node_key.clone(), parent.clone());
        }
    }

    TreeGraph {
        nodes: nodes.iter().cloned().map(strip_parent).collect(),
        edges,
        dangling,
    }
}

/// Convert a graph back into a persisted node list.
///
/// Each node takes its parent from its first incoming edge, or from its
/// dangling reference. Every other node is marked as a root; several roots
/// are allowed here and left for the validator to report.
pub fn to_persisted(graph: &TreeGraph) -> Vec<TreeNode> {
    graph
        .nodes
        .iter()
        .map(|node| {
            let mut out = node.clone();
            let parent = graph
                .incoming(&node.node_key)
                .next()
                .map(|e| ParentEdge {
                    parent_node_key: e.source.clone(),
                    branch_label: e.label.clone(),
                })
                .or_else(|| graph.dangling.get(&node.node_key).cloned());
            out.is_root = parent.is_none();
            out.parent_edge = parent;
            out
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{BranchDef, ConditionKind};
    use pretty_assertions::assert_eq;

    fn persisted() -> Vec<TreeNode> {
        vec![
            TreeNode::condition("root", "is_existing_customer", ConditionKind::Binary)
                .with_branch("Yes", BranchDef::binary(true))
                .with_branch("No", BranchDef::binary(false))
                .as_root(),
            TreeNode::strategy("existing", "strategy-a").with_parent("root", Some("Yes")),
            TreeNode::assessment("new", "assess-new").with_parent("root", Some("No")),
        ]
    }

    #[test]
    fn test_to_graph_builds_edges() {
        let graph = to_graph(&persisted());
        assert_eq!(graph.len(), 3);
        assert_eq!(
            graph.edges(),
            &[
                TreeEdge::new("root", "existing", Some("Yes")),
                TreeEdge::new("root", "new", Some("No")),
            ]
        );
        assert!(graph.nodes().iter().all(|n| n.parent_edge.is_none() && !n.is_root));
        assert_eq!(graph.roots().len(), 1);
        assert_eq!(graph.roots()[0].node_key, "root");
    }

    #[test]
    fn test_round_trip_reproduces_persisted_form() {
        let nodes = persisted();
        assert_eq!(to_persisted(&to_graph(&nodes)), nodes);
    }

    #[test]
    fn test_dangling_parent_is_not_a_root() {
        let mut nodes = persisted();
        nodes.push(TreeNode::strategy("lost", "strategy-b").with_parent("gone", Some("x")));

        let graph = to_graph(&nodes);
        assert_eq!(graph.edges().len(), 2);
        assert!(graph.dangling().contains_key("lost"));
        assert_eq!(graph.roots().len(), 1);

        let back = to_persisted(&graph);
        assert_eq!(back, nodes);
    }

    #[test]
    fn test_to_persisted_allows_multiple_roots() {
        let graph = TreeGraph::from_parts(
            vec![
                TreeNode::strategy("a", "s1"),
                TreeNode::strategy("b", "s2"),
            ],
            vec![],
        );
        let nodes = to_persisted(&graph);
        assert!(nodes.iter().all(|n| n.is_root));
    }

    #[test]
    fn test_shared_targets_lists_nodes_with_two_parents() {
        let mut graph = to_graph(&persisted());
        assert!(graph.shared_targets().is_empty());

        graph.edges.push(TreeEdge::new("existing", "new", None));
        assert_eq!(graph.shared_targets(), vec!["new"]);
        assert_eq!(graph.roots().len(), 1);
    }

    #[test]
    fn test_from_parts_drops_edges_to_unknown_nodes() {
        let graph = TreeGraph::from_parts(
            vec![TreeNode::annotation("a", "note"), TreeNode::strategy("b", "s")],
            vec![
                TreeEdge::new("a", "b", None),
                TreeEdge::new("a", "missing", None),
            ],
        );
        assert_eq!(graph.edges(), &[TreeEdge::new("a", "b", None)]);
        assert!(graph.edge("a", "b").is_some());
        assert_eq!(graph.outgoing("a").count(), 1);
        assert_eq!(graph.incoming("b").count(), 1);
    }
}
