//! Structural validation of a decision tree before activation.
//!
//! The validator never repairs a tree. It reports errors, which block
//! activation, and warnings, which are surfaced but non-blocking.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{to_graph, BranchDef, ConditionKind, NodeType, TreeEdge, TreeGraph, TreeNode};
use crate::catalog::{AttributeCatalog, AttributeKind};
use crate::config::ValidationConfig;

/// Issue severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSeverity {
    Error,
    Warning,
}

/// Stable issue codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueCode {
    NoRoot,
    MultipleRoots,
    CycleDetected,
    MultipleParents,
    OrphanedNode,
    UnmappedBranch,
    IncompleteTerminal,
    DuplicateNodeKey,
    BranchKindMismatch,
    UnknownBranchLabel,
    DuplicateBranchLabel,
    AmbiguousPassThrough,
    MissingAttribute,
    UnassignedEdge,
    InvalidNullBranch,
    UnknownAttribute,
    UnknownCategory,
    MaxDepthExceeded,
    MaxNodesExceeded,
    DuplicateRuleId,
    ThresholdShape,
    DuplicateAssessmentId,
    MissingDualPath,
}

impl IssueCode {
    /// Get the code as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueCode::NoRoot => "NO_ROOT",
            IssueCode::MultipleRoots => "MULTIPLE_ROOTS",
            IssueCode::CycleDetected => "CYCLE_DETECTED",
            IssueCode::MultipleParents => "MULTIPLE_PARENTS",
            IssueCode::OrphanedNode => "ORPHANED_NODE",
            IssueCode::UnmappedBranch => "UNMAPPED_BRANCH",
            IssueCode::IncompleteTerminal => "INCOMPLETE_TERMINAL",
            IssueCode::DuplicateNodeKey => "DUPLICATE_NODE_KEY",
            IssueCode::BranchKindMismatch => "BRANCH_KIND_MISMATCH",
            IssueCode::UnknownBranchLabel => "UNKNOWN_BRANCH_LABEL",
            IssueCode::DuplicateBranchLabel => "DUPLICATE_BRANCH_LABEL",
            IssueCode::AmbiguousPassThrough => "AMBIGUOUS_PASS_THROUGH",
            IssueCode::MissingAttribute => "MISSING_ATTRIBUTE",
            IssueCode::UnassignedEdge => "UNASSIGNED_EDGE",
            IssueCode::InvalidNullBranch => "INVALID_NULL_BRANCH",
            IssueCode::UnknownAttribute => "UNKNOWN_ATTRIBUTE",
            IssueCode::UnknownCategory => "UNKNOWN_CATEGORY",
            IssueCode::MaxDepthExceeded => "MAX_DEPTH_EXCEEDED",
            IssueCode::MaxNodesExceeded => "MAX_NODES_EXCEEDED",
            IssueCode::DuplicateRuleId => "DUPLICATE_RULE_ID",
            IssueCode::ThresholdShape => "THRESHOLD_SHAPE",
            IssueCode::DuplicateAssessmentId => "DUPLICATE_ASSESSMENT_ID",
            IssueCode::MissingDualPath => "MISSING_DUAL_PATH",
        }
    }
}

impl std::fmt::Display for IssueCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One validation finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub code: IssueCode,
    pub severity: IssueSeverity,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
}

impl ValidationIssue {
    /// Create an error.
    pub fn error(code: IssueCode, message: impl Into<String>) -> Self {
        Self {
            code,
            severity: IssueSeverity::Error,
            message: message.into(),
            node_key: None,
            branch: None,
        }
    }

    /// Create a warning.
    pub fn warning(code: IssueCode, message: impl Into<String>) -> Self {
        Self {
            severity: IssueSeverity::Warning,
            ..Self::error(code, message)
        }
    }

    /// Attach the node key.
    pub fn at(mut self, node_key: impl Into<String>) -> Self {
        self.node_key = Some(node_key.into());
        self
    }

    /// Attach the branch name.
    pub fn on_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }
}

/// Outcome of validating a tree or rule list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    /// True iff `errors` is empty.
    pub valid: bool,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
    /// Informational counters; never affect `valid`.
    pub stats: BTreeMap<String, i64>,
}

impl ValidationResult {
    /// Split issues by severity.
    pub fn from_issues(issues: Vec<ValidationIssue>, stats: BTreeMap<String, i64>) -> Self {
        let (errors, warnings): (Vec<_>, Vec<_>) = issues
            .into_iter()
            .partition(|i| i.severity == IssueSeverity::Error);
        Self {
            valid: errors.is_empty(),
            errors,
            warnings,
            stats,
        }
    }

    /// All issues with the given code.
    pub fn issues_with_code(&self, code: IssueCode) -> Vec<&ValidationIssue> {
        self.errors
            .iter()
            .chain(self.warnings.iter())
            .filter(|i| i.code == code)
            .collect()
    }

    /// Whether any issue has the given code.
    pub fn has_code(&self, code: IssueCode) -> bool {
        !self.issues_with_code(code).is_empty()
    }
}

/// Tree validator.
#[derive(Debug, Clone)]
pub struct TreeValidator {
    max_depth: usize,
    max_nodes: usize,
    catalog: Option<Arc<AttributeCatalog>>,
}

impl Default for TreeValidator {
    fn default() -> Self {
        Self::new(&ValidationConfig::default())
    }
}

/// DFS bookkeeping.
#[derive(Default)]
struct Walk<'a> {
    visited: HashSet<&'a str>,
    rec_stack: HashSet<&'a str>,
    closing_edges: Vec<&'a TreeEdge>,
    max_depth: usize,
}

impl TreeValidator {
    /// Create a validator with the configured limits.
    pub fn new(config: &ValidationConfig) -> Self {
        Self {
            max_depth: config.max_depth,
            max_nodes: config.max_nodes,
            catalog: None,
        }
    }

    /// Check attributes and categories against a catalog.
    pub fn with_catalog(mut self, catalog: Arc<AttributeCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Validate a persisted node list.
    ///
    /// When several nodes lack a parent, the one flagged `is_root` is taken
    /// as the designated root.
    pub fn validate_nodes(&self, nodes: &[TreeNode]) -> ValidationResult {
        let flagged = nodes
            .iter()
            .find(|n| n.is_root && n.parent_edge.is_none())
            .map(|n| n.node_key.as_str());
        self.validate_from(&to_graph(nodes), flagged)
    }

    /// Validate a tree in graph form. The first root candidate in node order
    /// is the designated root.
    pub fn validate(&self, graph: &TreeGraph) -> ValidationResult {
        self.validate_from(graph, None)
    }

    fn validate_from(&self, graph: &TreeGraph, flagged_root: Option<&str>) -> ValidationResult {
        let mut issues = Vec::new();

        let mut children: HashMap<&str, Vec<&TreeEdge>> = HashMap::new();
        for edge in graph.edges() {
            children.entry(edge.source.as_str()).or_default().push(edge);
        }

        let mut seen = HashSet::new();
        for node in graph.nodes() {
            if !seen.insert(node.node_key.as_str()) {
                issues.push(
                    ValidationIssue::error(
                        IssueCode::DuplicateNodeKey,
                        format!("Node key '{}' is used more than once", node.node_key),
                    )
                    .at(&node.node_key),
                );
            }
        }

        // Roots
        let mut roots = graph.roots();
        let flagged_index =
            flagged_root.and_then(|key| roots.iter().position(|n| n.node_key == key));
        if let Some(index) = flagged_index {
            let root = roots.remove(index);
            roots.insert(0, root);
        }
        if graph.is_empty() {
            issues.push(ValidationIssue::error(IssueCode::NoRoot, "Tree has no nodes"));
        } else if roots.is_empty() {
            issues.push(ValidationIssue::error(
                IssueCode::NoRoot,
                "Every node has a parent; the tree has no root",
            ));
        }
        for extra in roots.iter().skip(1) {
            issues.push(
                ValidationIssue::error(
                    IssueCode::MultipleRoots,
                    format!(
                        "Node '{}' has no parent; '{}' is already the root",
                        extra.node_key, roots[0].node_key
                    ),
                )
                .at(&extra.node_key),
            );
        }

        // Cycles and reachability
        let mut walk = Walk::default();
        if let Some(root) = roots.first() {
            dfs(&root.node_key, &children, &mut walk);
        }
        let reached: HashSet<&str> = walk.visited.clone();
        let depth = walk.max_depth;
        for node in graph.nodes() {
            if !walk.visited.contains(node.node_key.as_str()) {
                dfs(&node.node_key, &children, &mut walk);
            }
        }
        let closing: HashSet<(&str, &str)> = walk
            .closing_edges
            .iter()
            .map(|e| (e.source.as_str(), e.target.as_str()))
            .collect();
        for edge in &walk.closing_edges {
            issues.push(
                ValidationIssue::error(
                    IssueCode::CycleDetected,
                    format!(
                        "Edge '{}' -> '{}' closes a cycle",
                        edge.source, edge.target
                    ),
                )
                .at(&edge.source),
            );
        }

        let mut parents: HashMap<&str, &str> = HashMap::new();
        for edge in graph.edges() {
            if closing.contains(&(edge.source.as_str(), edge.target.as_str())) {
                continue;
            }
            let target = edge.target.as_str();
            match parents.get(target) {
                Some(&first) => issues.push(
                    ValidationIssue::error(
                        IssueCode::MultipleParents,
                        format!(
                            "Node '{}' is entered from '{}' and '{}'; a node has one parent",
                            target, first, edge.source
                        ),
                    )
                    .at(target),
                ),
                None => {
                    parents.insert(target, edge.source.as_str());
                }
            }
        }

        let extra_roots: HashSet<&str> = roots
            .iter()
            .skip(1)
            .map(|n| n.node_key.as_str())
            .collect();
        for node in graph.nodes() {
            let key = node.node_key.as_str();
            if reached.contains(key) || extra_roots.contains(key) {
                continue;
            }
            let message = match graph.dangling().get(key) {
                Some(parent) => format!(
                    "Node '{}' references parent '{}' which does not exist",
                    key, parent.parent_node_key
                ),
                None => format!("Node '{}' is not reachable from the root", key),
            };
            issues.push(ValidationIssue::warning(IssueCode::OrphanedNode, message).at(key));
        }

        // Edges
        for node in graph.nodes() {
            if let Some(edges) = children.get(node.node_key.as_str()) {
                self.check_edges(node, edges, &mut issues);
            }
        }

        // Reached nodes
        for node in graph.nodes() {
            if !reached.contains(node.node_key.as_str()) {
                continue;
            }
            let outgoing = children
                .get(node.node_key.as_str())
                .map(Vec::as_slice)
                .unwrap_or_default();
            if node.node_type.is_branching() {
                self.check_branches(node, outgoing, &mut issues);
            }
            if outgoing.is_empty()
                && !(node.node_type.is_terminal() && node.has_valid_terminal_ref())
            {
                let message = if node.node_type.is_terminal() {
                    format!("Terminal node '{}' has no {} assigned", node.node_key, node.node_type)
                } else {
                    format!(
                        "Leaf node '{}' is a {} node, not a strategy or assessment",
                        node.node_key, node.node_type
                    )
                };
                issues.push(
                    ValidationIssue::error(IssueCode::IncompleteTerminal, message)
                        .at(&node.node_key),
                );
            }
        }

        // Limits
        if depth > self.max_depth {
            issues.push(ValidationIssue::warning(
                IssueCode::MaxDepthExceeded,
                format!("Tree depth {} exceeds the limit of {}", depth, self.max_depth),
            ));
        }
        if graph.len() > self.max_nodes {
            issues.push(ValidationIssue::warning(
                IssueCode::MaxNodesExceeded,
                format!(
                    "Tree has {} nodes, more than the limit of {}",
                    graph.len(),
                    self.max_nodes
                ),
            ));
        }

        let stats = stats(graph, &children, depth);
        let result = ValidationResult::from_issues(issues, stats);
        info!(
            valid = result.valid,
            errors = result.errors.len(),
            warnings = result.warnings.len(),
            node_count = graph.len(),
            "Tree validated"
        );
        result
    }

    fn check_edges(&self, node: &TreeNode, edges: &[&TreeEdge], issues: &mut Vec<ValidationIssue>) {
        if node.branches.is_empty() {
            if edges.len() > 1 {
                issues.push(
                    ValidationIssue::error(
                        IssueCode::AmbiguousPassThrough,
                        format!(
                            "Node '{}' has no branches but {} outgoing edges",
                            node.node_key,
                            edges.len()
                        ),
                    )
                    .at(&node.node_key),
                );
            }
            for edge in edges {
                if let Some(label) = &edge.label {
                    issues.push(
                        ValidationIssue::error(
                            IssueCode::UnknownBranchLabel,
                            format!(
                                "Edge to '{}' is labelled '{}' but '{}' has no branches",
                                edge.target, label, node.node_key
                            ),
                        )
                        .at(&node.node_key)
                        .on_branch(label),
                    );
                }
            }
            return;
        }

        let mut used = HashSet::new();
        for edge in edges {
            let Some(label) = &edge.label else {
                issues.push(
                    ValidationIssue::warning(
                        IssueCode::UnassignedEdge,
                        format!(
                            "Edge '{}' -> '{}' has no branch label",
                            node.node_key, edge.target
                        ),
                    )
                    .at(&node.node_key),
                );
                continue;
            };
            if !node.has_branch(label) {
                issues.push(
                    ValidationIssue::error(
                        IssueCode::UnknownBranchLabel,
                        format!(
                            "Edge to '{}' uses label '{}' which is not a branch of '{}'",
                            edge.target, label, node.node_key
                        ),
                    )
                    .at(&node.node_key)
                    .on_branch(label),
                );
            } else if !used.insert(label.as_str()) {
                issues.push(
                    ValidationIssue::error(
                        IssueCode::DuplicateBranchLabel,
                        format!(
                            "Branch '{}' of '{}' labels more than one edge",
                            label, node.node_key
                        ),
                    )
                    .at(&node.node_key)
                    .on_branch(label),
                );
            }
        }
    }

    fn check_branches(
        &self,
        node: &TreeNode,
        outgoing: &[&TreeEdge],
        issues: &mut Vec<ValidationIssue>,
    ) {
        let key = node.node_key.as_str();

        if node.attribute.is_none() && node.condition_kind != Some(ConditionKind::Compound) {
            issues.push(
                ValidationIssue::error(
                    IssueCode::MissingAttribute,
                    format!("Node '{}' does not name an attribute to test", key),
                )
                .at(key),
            );
        }

        for branch in &node.branches {
            if node.condition_kind != Some(branch.def.kind()) {
                let expected = node
                    .condition_kind
                    .map(|k| k.to_string())
                    .unwrap_or_else(|| "none".to_string());
                issues.push(
                    ValidationIssue::error(
                        IssueCode::BranchKindMismatch,
                        format!(
                            "Branch '{}' is {} but node '{}' is {}",
                            branch.name,
                            branch.def.kind(),
                            key,
                            expected
                        ),
                    )
                    .at(key)
                    .on_branch(&branch.name),
                );
            }
        }

        let mapped: HashSet<&str> = outgoing.iter().filter_map(|e| e.label.as_deref()).collect();
        let null_target = node
            .null_branch
            .as_deref()
            .filter(|nb| mapped.contains(nb));
        for branch in &node.branches {
            if mapped.contains(branch.name.as_str()) {
                continue;
            }
            let covered_by_null = branch.def.is_missing_value_only()
                && null_target.is_some_and(|nb| nb != branch.name);
            if covered_by_null {
                continue;
            }
            issues.push(
                ValidationIssue::warning(
                    IssueCode::UnmappedBranch,
                    format!("Branch '{}' of '{}' has no outgoing edge", branch.name, key),
                )
                .at(key)
                .on_branch(&branch.name),
            );
        }

        if let Some(nb) = &node.null_branch {
            if !node.has_branch(nb) {
                issues.push(
                    ValidationIssue::warning(
                        IssueCode::InvalidNullBranch,
                        format!("Null branch '{}' is not a branch of '{}'", nb, key),
                    )
                    .at(key)
                    .on_branch(nb),
                );
            }
        }

        if let (Some(catalog), Some(attribute)) = (&self.catalog, &node.attribute) {
            match catalog.get(attribute) {
                None => issues.push(
                    ValidationIssue::warning(
                        IssueCode::UnknownAttribute,
                        format!(
                            "Attribute '{}' is not in catalog {}",
                            attribute,
                            catalog.version()
                        ),
                    )
                    .at(key),
                ),
                Some(def) if def.kind == AttributeKind::Categorical => {
                    for branch in &node.branches {
                        let BranchDef::Categorical(cat) = &branch.def else {
                            continue;
                        };
                        for value in &cat.values {
                            if !def.categories.contains(value) {
                                issues.push(
                                    ValidationIssue::warning(
                                        IssueCode::UnknownCategory,
                                        format!(
                                            "Category '{}' is not a known value of '{}'",
                                            value, attribute
                                        ),
                                    )
                                    .at(key)
                                    .on_branch(&branch.name),
                                );
                            }
                        }
                    }
                }
                Some(_) => {}
            }
        }
    }
}

fn dfs<'a>(
    start: &'a str,
    children: &HashMap<&'a str, Vec<&'a TreeEdge>>,
    walk: &mut Walk<'a>,
) {
    // (node, depth, index of the next outgoing edge to follow)
    let mut stack: Vec<(&'a str, usize, usize)> = vec![(start, 0, 0)];
    walk.visited.insert(start);
    walk.rec_stack.insert(start);

    while let Some(frame) = stack.last_mut() {
        let (key, depth, index) = *frame;
        walk.max_depth = walk.max_depth.max(depth);

        let Some(&edge) = children.get(key).and_then(|edges| edges.get(index)) else {
            walk.rec_stack.remove(key);
            stack.pop();
            continue;
        };
        frame.2 += 1;

        let target = edge.target.as_str();
        if walk.rec_stack.contains(target) {
            debug!(source = %edge.source, target = %target, "Cycle edge found");
            walk.closing_edges.push(edge);
        } else if walk.visited.insert(target) {
            walk.rec_stack.insert(target);
            stack.push((target, depth + 1, 0));
        }
    }
}

fn stats(
    graph: &TreeGraph,
    children: &HashMap<&str, Vec<&TreeEdge>>,
    max_depth: usize,
) -> BTreeMap<String, i64> {
    let mut stats = BTreeMap::new();
    stats.insert("node_count".to_string(), graph.len() as i64);
    stats.insert("edge_count".to_string(), graph.edges().len() as i64);
    stats.insert(
        "branch_count".to_string(),
        graph.nodes().iter().map(|n| n.branches.len() as i64).sum(),
    );
    stats.insert(
        "leaf_count".to_string(),
        graph
            .nodes()
            .iter()
            .filter(|n| !children.contains_key(n.node_key.as_str()))
            .count() as i64,
    );
    stats.insert("max_depth".to_string(), max_depth as i64);

    for node_type in [
        NodeType::Condition,
        NodeType::Strategy,
        NodeType::Assessment,
        NodeType::ScorecardGate,
        NodeType::Annotation,
    ] {
        let count = graph
            .nodes()
            .iter()
            .filter(|n| n.node_type == node_type)
            .count();
        stats.insert(format!("{}_count", node_type), count as i64);
    }
    stats
}

#[cfg(test)]
#[path = "validate_tests.rs"]
mod validate_tests;
