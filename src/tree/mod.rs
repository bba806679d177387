//! Decision-tree domain model.
//!
//! This module provides:
//! - [`TreeNode`] and [`DecisionTree`]: the typed node model and tree lifecycle
//! - [`branch`]: branch definitions keyed by condition kind
//! - [`graph`]: conversion between the persisted node list and a node/edge graph
//! - [`editor`]: the branch-edge assignment reducer used for editing
//! - [`validate`]: structural validation before activation
//! - [`route`]: routing an application from the root to a terminal node

pub mod branch;
pub mod editor;
pub mod graph;
pub mod record;
pub mod route;
pub mod validate;

pub use branch::*;
pub use editor::*;
pub use graph::*;
pub use record::*;
pub use route::*;
pub use validate::*;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Type of a tree node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    /// Routes on an application attribute.
    Condition,
    /// Terminal carrying a strategy assignment.
    Strategy,
    /// Terminal carrying an assessment assignment.
    Assessment,
    /// Routes on a scorecard score band.
    #[serde(alias = "scorecardGate")]
    ScorecardGate,
    /// Pass-through note with at most one outgoing edge.
    Annotation,
}

impl NodeType {
    /// Get the node type name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Condition => "condition",
            NodeType::Strategy => "strategy",
            NodeType::Assessment => "assessment",
            NodeType::ScorecardGate => "scorecard_gate",
            NodeType::Annotation => "annotation",
        }
    }

    /// Whether nodes of this type route on branches.
    pub fn is_branching(&self) -> bool {
        matches!(self, NodeType::Condition | NodeType::ScorecardGate)
    }

    /// Whether nodes of this type may end a route.
    pub fn is_terminal(&self) -> bool {
        matches!(self, NodeType::Strategy | NodeType::Assessment)
    }
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for NodeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "condition" => Ok(NodeType::Condition),
            "strategy" => Ok(NodeType::Strategy),
            "assessment" => Ok(NodeType::Assessment),
            "scorecard_gate" | "scorecardgate" => Ok(NodeType::ScorecardGate),
            "annotation" => Ok(NodeType::Annotation),
            _ => Err(format!("Unknown node type: {}", s)),
        }
    }
}

/// Domain reference held by terminal and scorecard-gate nodes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum TerminalRef {
    Strategy(String),
    Assessment(String),
    Scorecard(String),
}

impl TerminalRef {
    /// The node type this reference belongs on.
    pub fn node_type(&self) -> NodeType {
        match self {
            TerminalRef::Strategy(_) => NodeType::Strategy,
            TerminalRef::Assessment(_) => NodeType::Assessment,
            TerminalRef::Scorecard(_) => NodeType::ScorecardGate,
        }
    }

    /// The referenced id.
    pub fn id(&self) -> &str {
        match self {
            TerminalRef::Strategy(id) | TerminalRef::Assessment(id) | TerminalRef::Scorecard(id) => {
                id
            }
        }
    }
}

/// Reference from a persisted node to its parent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParentEdge {
    pub parent_node_key: String,
    /// Branch of the parent this node hangs off. `None` below pass-through
    /// parents and for edges whose label was cleared.
    pub branch_label: Option<String>,
}

/// One decision point or terminal action.
///
/// Serialized through [`NodeRecord`], the flat persisted row shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "NodeRecord", into = "NodeRecord")]
pub struct TreeNode {
    /// Identity, unique within the tree and stable across edits.
    pub node_key: String,
    pub node_type: NodeType,
    /// Display name.
    pub label: String,
    /// Partitioning used by condition and scorecard-gate nodes.
    pub condition_kind: Option<ConditionKind>,
    /// Application field tested by condition nodes.
    pub attribute: Option<String>,
    /// Ordered, uniquely named branches.
    pub branches: Vec<Branch>,
    /// Branch taken when the attribute value is missing.
    pub null_branch: Option<String>,
    pub terminal_ref: Option<TerminalRef>,
    /// Persisted form only; always `false` in graph form.
    pub is_root: bool,
    /// Persisted form only; always `None` in graph form.
    pub parent_edge: Option<ParentEdge>,
}

impl TreeNode {
    fn bare(node_key: impl Into<String>, node_type: NodeType) -> Self {
        let node_key = node_key.into();
        Self {
            label: node_key.clone(),
            node_key,
            node_type,
            condition_kind: None,
            attribute: None,
            branches: Vec::new(),
            null_branch: None,
            terminal_ref: None,
            is_root: false,
            parent_edge: None,
        }
    }

    /// Condition node testing `attribute`.
    pub fn condition(
        node_key: impl Into<String>,
        attribute: impl Into<String>,
        kind: ConditionKind,
    ) -> Self {
        let mut node = Self::bare(node_key, NodeType::Condition);
        node.attribute = Some(attribute.into());
        node.condition_kind = Some(kind);
        node
    }

    /// Scorecard gate routing on the score held in `attribute`.
    pub fn scorecard_gate(
        node_key: impl Into<String>,
        attribute: impl Into<String>,
        scorecard_id: impl Into<String>,
    ) -> Self {
        let mut node = Self::bare(node_key, NodeType::ScorecardGate);
        node.attribute = Some(attribute.into());
        node.condition_kind = Some(ConditionKind::NumericRange);
        node.terminal_ref = Some(TerminalRef::Scorecard(scorecard_id.into()));
        node
    }

    /// Strategy terminal.
    pub fn strategy(node_key: impl Into<String>, strategy_id: impl Into<String>) -> Self {
        let mut node = Self::bare(node_key, NodeType::Strategy);
        node.terminal_ref = Some(TerminalRef::Strategy(strategy_id.into()));
        node
    }

    /// Assessment terminal.
    pub fn assessment(node_key: impl Into<String>, assessment_id: impl Into<String>) -> Self {
        let mut node = Self::bare(node_key, NodeType::Assessment);
        node.terminal_ref = Some(TerminalRef::Assessment(assessment_id.into()));
        node
    }

    /// Pass-through annotation.
    pub fn annotation(node_key: impl Into<String>, label: impl Into<String>) -> Self {
        let mut node = Self::bare(node_key, NodeType::Annotation);
        node.label = label.into();
        node
    }

    /// Set the display label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Append a branch.
    pub fn with_branch(mut self, name: impl Into<String>, def: BranchDef) -> Self {
        self.branches.push(Branch::new(name, def));
        self
    }

    /// Set the missing-value branch.
    pub fn with_null_branch(mut self, name: impl Into<String>) -> Self {
        self.null_branch = Some(name.into());
        self
    }

    /// Attach to a parent in persisted form.
    pub fn with_parent(mut self, parent_node_key: impl Into<String>, label: Option<&str>) -> Self {
        self.parent_edge = Some(ParentEdge {
            parent_node_key: parent_node_key.into(),
            branch_label: label.map(str::to_string),
        });
        self.is_root = false;
        self
    }

    /// Mark as the root in persisted form.
    pub fn as_root(mut self) -> Self {
        self.is_root = true;
        self.parent_edge = None;
        self
    }

    /// Look up a branch by name.
    pub fn branch(&self, name: &str) -> Option<&Branch> {
        self.branches.iter().find(|b| b.name == name)
    }

    /// Whether a branch with this name exists.
    pub fn has_branch(&self, name: &str) -> bool {
        self.branch(name).is_some()
    }

    /// Branch names in insertion order.
    pub fn branch_names(&self) -> impl Iterator<Item = &str> {
        self.branches.iter().map(|b| b.name.as_str())
    }

    /// Whether `terminal_ref` is present and matches the node type.
    pub fn has_valid_terminal_ref(&self) -> bool {
        match &self.terminal_ref {
            Some(r) => r.node_type() == self.node_type && !r.id().trim().is_empty(),
            None => false,
        }
    }
}

/// Lifecycle status of a decision tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TreeStatus {
    /// Editable.
    #[default]
    Draft,
    /// In use for decisioning; changed only through a new version.
    Active,
    /// Retired.
    Archived,
}

impl std::fmt::Display for TreeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TreeStatus::Draft => write!(f, "draft"),
            TreeStatus::Active => write!(f, "active"),
            TreeStatus::Archived => write!(f, "archived"),
        }
    }
}

impl std::str::FromStr for TreeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "draft" => Ok(TreeStatus::Draft),
            "active" => Ok(TreeStatus::Active),
            "archived" => Ok(TreeStatus::Archived),
            _ => Err(format!("Unknown tree status: {}", s)),
        }
    }
}

/// A versioned decision tree owning its nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTree {
    /// Unique tree identifier.
    pub id: String,
    /// Loan product this tree routes applications for.
    pub product_id: String,
    /// Human-readable name.
    pub name: String,
    pub status: TreeStatus,
    /// Version number, starting at 1.
    pub version: i64,
    /// Nodes in persisted form.
    pub nodes: Vec<TreeNode>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DecisionTree {
    /// Create an empty draft tree.
    pub fn new(product_id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            product_id: product_id.into(),
            name: name.into(),
            status: TreeStatus::Draft,
            version: 1,
            nodes: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Replace the node set.
    pub fn with_nodes(mut self, nodes: Vec<TreeNode>) -> Self {
        self.nodes = nodes;
        self
    }

    /// Whether nodes may be replaced.
    pub fn is_editable(&self) -> bool {
        self.status == TreeStatus::Draft
    }

    /// Draft copy of this tree with the next version number.
    pub fn next_version(&self) -> Self {
        let mut next = DecisionTree::new(self.product_id.clone(), self.name.clone());
        next.version = self.version + 1;
        next.nodes = self.nodes.clone();
        next
    }

    /// Graph form of the node set.
    pub fn graph(&self) -> TreeGraph {
        to_graph(&self.nodes)
    }
}
