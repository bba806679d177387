//! Tree editing as a reducer over explicit intents.
//!
//! The editor owns the single mutable [`TreeGraph`]. Callers describe each
//! edit as an [`EditIntent`]; the editor either applies it completely or
//! refuses it without touching the graph. Refusals are values, not errors.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::{
    parse_branches, to_persisted, Branch, ConditionKind, TerminalRef, TreeEdge,
    TreeGraph, TreeNode,
};
use crate::catalog::AttributeCatalog;

/// One edit requested by a caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EditIntent {
    /// Insert a new, unconnected node.
    AddNode { node: TreeNode },
    /// Change fields of an existing node.
    UpdateNode { key: String, patch: NodePatch },
    /// Delete a node and every edge touching it.
    RemoveNode { key: String },
    /// Create an edge, labelled with the source's first free branch.
    Connect { source: String, target: String },
    /// Set or clear the label of an existing edge.
    Relabel {
        source: String,
        target: String,
        #[serde(default)]
        label: Option<String>,
    },
    /// Delete an edge.
    Disconnect { source: String, target: String },
}

/// Why an intent was not applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum EditRefusal {
    #[error("every branch of '{node_key}' already labels an edge")]
    BranchesExhausted { node_key: String },

    #[error("'{node_key}' has no branches and already has an outgoing edge")]
    PassThroughOccupied { node_key: String },

    #[error("'{node_key}' has no branch named '{label}'")]
    UnknownLabel { node_key: String, label: String },

    #[error("node '{node_key}' does not exist")]
    UnknownNode { node_key: String },

    #[error("node '{node_key}' already exists")]
    DuplicateNodeKey { node_key: String },

    #[error("no edge from '{source_key}' to '{target_key}'")]
    NoSuchEdge {
        source_key: String,
        target_key: String,
    },

    #[error("an edge from '{source_key}' to '{target_key}' already exists")]
    DuplicateEdge {
        source_key: String,
        target_key: String,
    },
}

/// Result of applying one intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "refusal", rename_all = "snake_case")]
pub enum EditOutcome {
    Applied,
    Refused(EditRefusal),
}

impl EditOutcome {
    /// Whether the intent was applied.
    pub fn is_applied(&self) -> bool {
        matches!(self, EditOutcome::Applied)
    }
}

/// Partial update of a node.
///
/// Empty strings clear `attribute` and `null_branch`. `branches` replaces the
/// node's whole branch list and requires `condition_type`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "PatchRecord", into = "PatchRecord")]
pub struct NodePatch {
    pub label: Option<String>,
    pub attribute: Option<String>,
    pub condition_kind: Option<ConditionKind>,
    pub branches: Option<Vec<Branch>>,
    pub null_branch: Option<String>,
    pub terminal_ref: Option<TerminalRef>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PatchRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    attribute: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    condition_type: Option<ConditionKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    branches: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    null_branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    strategy_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    assessment_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    scorecard_id: Option<String>,
}

impl TryFrom<PatchRecord> for NodePatch {
    type Error = String;

    fn try_from(record: PatchRecord) -> Result<Self, Self::Error> {
        let branches = match record.branches {
            Some(json) => {
                let kind = record
                    .condition_type
                    .ok_or_else(|| "branches require condition_type".to_string())?;
                Some(parse_branches(kind, json).map_err(|e| e.to_string())?)
            }
            None => None,
        };

        let terminal_ref = record
            .strategy_id
            .map(TerminalRef::Strategy)
            .or(record.assessment_id.map(TerminalRef::Assessment))
            .or(record.scorecard_id.map(TerminalRef::Scorecard));

        Ok(NodePatch {
            label: record.label,
            attribute: record.attribute,
            condition_kind: record.condition_type,
            branches,
            null_branch: record.null_branch,
            terminal_ref,
        })
    }
}

impl From<NodePatch> for PatchRecord {
    fn from(patch: NodePatch) -> Self {
        let mut record = PatchRecord {
            label: patch.label,
            attribute: patch.attribute,
            condition_type: patch.condition_kind,
            branches: patch.branches.as_deref().map(super::branches_to_json),
            null_branch: patch.null_branch,
            ..Default::default()
        };
        match patch.terminal_ref {
            Some(TerminalRef::Strategy(id)) => record.strategy_id = Some(id),
            Some(TerminalRef::Assessment(id)) => record.assessment_id = Some(id),
            Some(TerminalRef::Scorecard(id)) => record.scorecard_id = Some(id),
            None => {}
        }
        record
    }
}

impl NodePatch {
    fn apply(self, node: &mut TreeNode) {
        if let Some(label) = self.label {
            node.label = label;
        }
        if let Some(attribute) = self.attribute {
            node.attribute = Some(attribute).filter(|a| !a.is_empty());
        }
        if let Some(kind) = self.condition_kind {
            node.condition_kind = Some(kind);
        }
        if let Some(branches) = self.branches {
            node.branches = branches;
        }
        if let Some(null_branch) = self.null_branch {
            node.null_branch = Some(null_branch).filter(|b| !b.is_empty());
        }
        if let Some(terminal_ref) = self.terminal_ref {
            node.terminal_ref = Some(terminal_ref);
        }
    }
}

/// Single-writer editor over one tree graph.
pub struct TreeEditor {
    graph: TreeGraph,
    catalog: Arc<AttributeCatalog>,
}

impl TreeEditor {
    /// Create an editor over `graph`.
    pub fn new(graph: TreeGraph, catalog: Arc<AttributeCatalog>) -> Self {
        Self { graph, catalog }
    }

    /// Current graph.
    pub fn graph(&self) -> &TreeGraph {
        &self.graph
    }

    /// Consume the editor, returning the graph.
    pub fn into_graph(self) -> TreeGraph {
        self.graph
    }

    /// Current graph in persisted form.
    pub fn persisted(&self) -> Vec<TreeNode> {
        to_persisted(&self.graph)
    }

    /// Apply a sequence of intents, one outcome per intent.
    pub fn apply_all(&mut self, intents: impl IntoIterator<Item = EditIntent>) -> Vec<EditOutcome> {
        intents.into_iter().map(|i| self.apply(i)).collect()
    }

    /// Apply one intent.
    pub fn apply(&mut self, intent: EditIntent) -> EditOutcome {
        let result = match intent {
            EditIntent::AddNode { node } => self.add_node(node),
            EditIntent::UpdateNode { key, patch } => self.update_node(&key, patch),
            EditIntent::RemoveNode { key } => self.remove_node(&key),
            EditIntent::Connect { source, target } => self.connect(&source, &target),
            EditIntent::Relabel {
                source,
                target,
                label,
            } => self.relabel(&source, &target, label),
            EditIntent::Disconnect { source, target } => self.disconnect(&source, &target),
        };

        match result {
            Ok(()) => EditOutcome::Applied,
            Err(refusal) => {
                debug!(refusal = %refusal, "Edit refused");
                EditOutcome::Refused(refusal)
            }
        }
    }

    fn require_node(&self, key: &str) -> Result<&TreeNode, EditRefusal> {
        self.graph.node(key).ok_or_else(|| EditRefusal::UnknownNode {
            node_key: key.to_string(),
        })
    }

    fn add_node(&mut self, mut node: TreeNode) -> Result<(), EditRefusal> {
        if self.graph.contains(&node.node_key) {
            return Err(EditRefusal::DuplicateNodeKey {
                node_key: node.node_key,
            });
        }

        node.parent_edge = None;
        node.is_root = false;

        if node.node_type.is_branching() && node.branches.is_empty() {
            let kind = node.condition_kind.or_else(|| {
                node.attribute
                    .as_deref()
                    .and_then(|a| self.catalog.get(a))
                    .map(|def| def.kind.condition_kind())
            });
            if let Some(kind) = kind {
                node.condition_kind = Some(kind);
                node.branches = self
                    .catalog
                    .default_branches(kind, node.attribute.as_deref());
            }
        }

        debug!(node_key = %node.node_key, node_type = %node.node_type, "Node added");
        self.graph.nodes.push(node);
        Ok(())
    }

    fn update_node(&mut self, key: &str, patch: NodePatch) -> Result<(), EditRefusal> {
        let node = self
            .graph
            .node_mut(key)
            .ok_or_else(|| EditRefusal::UnknownNode {
                node_key: key.to_string(),
            })?;
        patch.apply(node);

        let names: HashSet<String> = node.branch_names().map(str::to_string).collect();
        for edge in self.graph.edges.iter_mut().filter(|e| e.source == key) {
            if edge.label.as_ref().is_some_and(|l| !names.contains(l)) {
                debug!(source = %edge.source, target = %edge.target, "Clearing stale edge label");
                edge.label = None;
            }
        }
        Ok(())
    }

    fn remove_node(&mut self, key: &str) -> Result<(), EditRefusal> {
        self.require_node(key)?;
        self.graph.nodes.retain(|n| n.node_key != key);
        self.graph.edges.retain(|e| e.source != key && e.target != key);
        self.graph.dangling.remove(key);
        Ok(())
    }

    fn connect(&mut self, source: &str, target: &str) -> Result<(), EditRefusal> {
        let source_node = self.require_node(source)?;
        self.require_node(target)?;

        if self.graph.edge(source, target).is_some() {
            return Err(EditRefusal::DuplicateEdge {
                source_key: source.to_string(),
                target_key: target.to_string(),
            });
        }

        let label = if source_node.branches.is_empty() {
            if self.graph.outgoing(source).next().is_some() {
                return Err(EditRefusal::PassThroughOccupied {
                    node_key: source.to_string(),
                });
            }
            None
        } else {
            let used: HashSet<&str> = self
                .graph
                .outgoing(source)
                .filter_map(|e| e.label.as_deref())
                .collect();
            let available = source_node
                .branch_names()
                .find(|name| !used.contains(name))
                .ok_or_else(|| EditRefusal::BranchesExhausted {
                    node_key: source.to_string(),
                })?;
            Some(available.to_string())
        };

        self.graph.dangling.remove(target);
        self.graph.edges.push(TreeEdge {
            source: source.to_string(),
            target: target.to_string(),
            label,
        });
        Ok(())
    }

    fn relabel(
        &mut self,
        source: &str,
        target: &str,
        label: Option<String>,
    ) -> Result<(), EditRefusal> {
        let source_node = self.require_node(source)?;
        if let Some(label) = &label {
            if !source_node.has_branch(label) {
                return Err(EditRefusal::UnknownLabel {
                    node_key: source.to_string(),
                    label: label.clone(),
                });
            }
        }

        let index = self
            .graph
            .edges
            .iter()
            .position(|e| e.source == source && e.target == target)
            .ok_or_else(|| EditRefusal::NoSuchEdge {
                source_key: source.to_string(),
                target_key: target.to_string(),
            })?;

        if label.is_some() {
            for (i, edge) in self.graph.edges.iter_mut().enumerate() {
                if i != index && edge.source == source && edge.label == label {
                    edge.label = None;
                }
            }
        }
        self.graph.edges[index].label = label;
        Ok(())
    }

    fn disconnect(&mut self, source: &str, target: &str) -> Result<(), EditRefusal> {
        let before = self.graph.edges.len();
        self.graph
            .edges
            .retain(|e| !(e.source == source && e.target == target));
        if self.graph.edges.len() == before {
            return Err(EditRefusal::NoSuchEdge {
                source_key: source.to_string(),
                target_key: target.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "editor_tests.rs"]
mod editor_tests;
