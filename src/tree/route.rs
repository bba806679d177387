//! Routing an application from the root to a terminal node.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{ConditionKind, NodeType, TerminalRef, TreeGraph, TreeNode};
use crate::rules::ApplicationSnapshot;

/// One hop of a route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteStep {
    pub node_key: String,
    /// Branch taken out of this node; `None` for pass-through nodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
}

/// A completed route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteResult {
    /// Nodes passed before the terminal, in order.
    pub steps: Vec<RouteStep>,
    pub terminal_node: String,
    pub terminal: TerminalRef,
}

/// Why an application could not be routed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouteError {
    #[error("tree has no root node")]
    NoRoot,

    #[error("tree has {count} root candidates")]
    AmbiguousRoot { count: usize },

    #[error("dead end at node '{node_key}': {reason}")]
    DeadEnd { node_key: String, reason: String },

    #[error("cycle detected at node '{node_key}'")]
    Cycle { node_key: String },

    #[error("node '{node_key}' is a leaf but not a strategy or assessment")]
    NotTerminal { node_key: String },
}

fn dead_end(node: &TreeNode, reason: impl Into<String>) -> RouteError {
    RouteError::DeadEnd {
        node_key: node.node_key.clone(),
        reason: reason.into(),
    }
}

/// Route an application through the tree.
///
/// At each condition or scorecard-gate node the first branch, in insertion
/// order, that matches the application is taken. A missing attribute value
/// takes the node's null branch. Compound nodes evaluate their own fields and
/// fall back to the null branch when no branch matches.
pub fn route(graph: &TreeGraph, app: &ApplicationSnapshot) -> Result<RouteResult, RouteError> {
    let roots = graph.roots();
    let mut node = match roots.as_slice() {
        [] => return Err(RouteError::NoRoot),
        [root] => *root,
        many => return Err(RouteError::AmbiguousRoot { count: many.len() }),
    };

    let mut steps = Vec::new();
    let mut visited = HashSet::new();

    loop {
        if !visited.insert(node.node_key.as_str()) {
            return Err(RouteError::Cycle {
                node_key: node.node_key.clone(),
            });
        }

        let (branch, next_key) = match node.node_type {
            NodeType::Strategy | NodeType::Assessment => {
                let terminal = node
                    .terminal_ref
                    .clone()
                    .filter(|_| node.has_valid_terminal_ref())
                    .ok_or_else(|| dead_end(node, "terminal has no assignment"))?;
                debug!(
                    terminal_node = %node.node_key,
                    hops = steps.len(),
                    "Application routed"
                );
                return Ok(RouteResult {
                    steps,
                    terminal_node: node.node_key.clone(),
                    terminal,
                });
            }
            NodeType::Annotation => {
                let edge = graph.outgoing(&node.node_key).next().ok_or_else(|| {
                    RouteError::NotTerminal {
                        node_key: node.node_key.clone(),
                    }
                })?;
                (None, edge.target.as_str())
            }
            NodeType::Condition | NodeType::ScorecardGate => {
                let chosen = select_branch(node, app)?;
                let edge = graph
                    .outgoing(&node.node_key)
                    .find(|e| e.label.as_deref() == Some(chosen))
                    .ok_or_else(|| {
                        dead_end(node, format!("branch '{}' has no outgoing edge", chosen))
                    })?;
                (Some(chosen.to_string()), edge.target.as_str())
            }
        };

        steps.push(RouteStep {
            node_key: node.node_key.clone(),
            branch,
        });
        node = graph
            .node(next_key)
            .ok_or_else(|| dead_end(node, format!("target '{}' does not exist", next_key)))?;
    }
}

fn select_branch<'a>(node: &'a TreeNode, app: &ApplicationSnapshot) -> Result<&'a str, RouteError> {
    let compound = node.condition_kind == Some(ConditionKind::Compound);
    let value = if compound {
        None
    } else {
        node.attribute.as_deref().and_then(|a| app.get(a))
    };

    if compound || value.is_some() {
        if let Some(branch) = node.branches.iter().find(|b| b.def.matches(value, app)) {
            return Ok(&branch.name);
        }
        if !compound {
            return Err(dead_end(node, "no branch matches the attribute value"));
        }
    }

    node.null_branch
        .as_deref()
        .ok_or_else(|| dead_end(node, "value is missing and there is no null branch"))
}
