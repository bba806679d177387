//! Flat persisted node record, one row per [`TreeNode`].
//!
//! Parent links are stored as `parent_node_key` + `branch_label`, branches
//! as JSON interpreted through `condition_type`. The `operator`,
//! `compound_conditions` and `compound_logic` columns are denormalized copies
//! for external readers; `compound_*` is also read back as a fallback for
//! compound branches saved without their own conditions.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{
    branches_to_json, parse_branches, BranchDef, BranchParseError, ConditionKind, CompoundBranch,
    LogicOp, NodeType, ParentEdge, RangeSpec, SubCondition, TerminalRef, TreeNode,
};

/// Persisted node record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub node_key: String,
    pub node_type: NodeType,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub condition_type: Option<ConditionKind>,
    #[serde(default)]
    pub attribute: Option<String>,
    #[serde(default)]
    pub operator: Option<String>,
    #[serde(default)]
    pub branches: Option<Value>,
    #[serde(default)]
    pub null_branch: Option<String>,
    #[serde(default)]
    pub parent_node_key: Option<String>,
    #[serde(default)]
    pub branch_label: Option<String>,
    #[serde(default)]
    pub is_root: bool,
    #[serde(default)]
    pub scorecard_id: Option<String>,
    #[serde(default)]
    pub strategy_id: Option<String>,
    #[serde(default)]
    pub assessment_id: Option<String>,
    #[serde(default)]
    pub compound_conditions: Option<Value>,
    #[serde(default)]
    pub compound_logic: Option<LogicOp>,
}

/// Errors converting a record into a node.
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("node '{node_key}' has branches but no condition_type")]
    MissingConditionType { node_key: String },

    #[error("node '{node_key}': {source}")]
    Branches {
        node_key: String,
        source: BranchParseError,
    },

    #[error("node '{node_key}': invalid compound_conditions: {source}")]
    Compound {
        node_key: String,
        source: serde_json::Error,
    },
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

fn has_branch_payload(value: &Option<Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Array(items)) => !items.is_empty(),
        Some(Value::Object(map)) => !map.is_empty(),
        Some(_) => true,
    }
}

impl TryFrom<NodeRecord> for TreeNode {
    type Error = RecordError;

    fn try_from(record: NodeRecord) -> Result<Self, Self::Error> {
        let node_key = record.node_key;

        let mut branches = Vec::new();
        if has_branch_payload(&record.branches) {
            let kind = record
                .condition_type
                .ok_or_else(|| RecordError::MissingConditionType {
                    node_key: node_key.clone(),
                })?;
            let json = record.branches.unwrap_or(Value::Null);
            let json = if kind == ConditionKind::Compound {
                fill_compound_defaults(json, &record.compound_conditions, record.compound_logic)
                    .map_err(|source| RecordError::Compound {
                        node_key: node_key.clone(),
                        source,
                    })?
            } else {
                json
            };
            branches =
                parse_branches(kind, json).map_err(|source| RecordError::Branches {
                    node_key: node_key.clone(),
                    source,
                })?;
        }

        let terminal_ref = match record.node_type {
            NodeType::Strategy => non_empty(record.strategy_id).map(TerminalRef::Strategy),
            NodeType::Assessment => non_empty(record.assessment_id).map(TerminalRef::Assessment),
            NodeType::ScorecardGate => non_empty(record.scorecard_id).map(TerminalRef::Scorecard),
            NodeType::Condition | NodeType::Annotation => None,
        };

        let parent_edge = non_empty(record.parent_node_key).map(|parent_node_key| ParentEdge {
            parent_node_key,
            branch_label: non_empty(record.branch_label),
        });

        Ok(TreeNode {
            label: if record.label.is_empty() {
                node_key.clone()
            } else {
                record.label
            },
            node_key,
            node_type: record.node_type,
            condition_kind: record.condition_type,
            attribute: non_empty(record.attribute),
            branches,
            null_branch: non_empty(record.null_branch),
            terminal_ref,
            is_root: record.is_root && parent_edge.is_none(),
            parent_edge,
        })
    }
}

/// Supply node-level compound conditions to compound branches saved without
/// their own `conditions`.
fn fill_compound_defaults(
    json: Value,
    conditions: &Option<Value>,
    logic: Option<LogicOp>,
) -> Result<Value, serde_json::Error> {
    let Some(conditions) = conditions.as_ref().filter(|c| !c.is_null()) else {
        return Ok(json);
    };
    let _: Vec<SubCondition> = serde_json::from_value(conditions.clone())?;
    let logic = serde_json::to_value(logic.unwrap_or_default())?;

    let fill = |entry: &mut Value| {
        if let Value::Object(map) = entry {
            map.entry("conditions").or_insert_with(|| conditions.clone());
            map.entry("logic").or_insert_with(|| logic.clone());
        }
    };

    Ok(match json {
        Value::Array(mut items) => {
            items.iter_mut().for_each(fill);
            Value::Array(items)
        }
        Value::Object(mut map) => {
            map.values_mut().for_each(fill);
            Value::Object(map)
        }
        other => other,
    })
}

impl From<TreeNode> for NodeRecord {
    fn from(node: TreeNode) -> Self {
        let operator = node.branches.iter().find_map(|b| match &b.def {
            BranchDef::NumericRange(RangeSpec::Compare { operator, .. }) => {
                Some(operator.as_str().to_string())
            }
            _ => None,
        });

        let compound: Option<&CompoundBranch> = node.branches.iter().find_map(|b| match &b.def {
            BranchDef::Compound(c) => Some(c),
            _ => None,
        });
        let compound_conditions = compound.and_then(|c| serde_json::to_value(&c.conditions).ok());
        let compound_logic = compound.map(|c| c.logic);

        let (scorecard_id, strategy_id, assessment_id) = match node.terminal_ref {
            Some(TerminalRef::Scorecard(id)) => (Some(id), None, None),
            Some(TerminalRef::Strategy(id)) => (None, Some(id), None),
            Some(TerminalRef::Assessment(id)) => (None, None, Some(id)),
            None => (None, None, None),
        };

        let (parent_node_key, branch_label) = match node.parent_edge {
            Some(edge) => (Some(edge.parent_node_key), edge.branch_label),
            None => (None, None),
        };

        NodeRecord {
            node_key: node.node_key,
            node_type: node.node_type,
            label: node.label,
            condition_type: node.condition_kind,
            attribute: node.attribute,
            operator,
            branches: if node.branches.is_empty() {
                None
            } else {
                Some(branches_to_json(&node.branches))
            },
            null_branch: node.null_branch,
            parent_node_key,
            branch_label,
            is_root: node.is_root,
            scorecard_id,
            strategy_id,
            assessment_id,
            compound_conditions,
            compound_logic,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::CompareOp;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_node_deserializes_from_record_json() {
        let node: TreeNode = serde_json::from_value(json!({
            "node_key": "bureau_file_status",
            "node_type": "condition",
            "label": "Bureau file",
            "condition_type": "categorical",
            "attribute": "bureau_file_status",
            "branches": [
                {"name": "thin", "values": ["thin"]},
                {"name": "thick", "values": ["thick"]}
            ],
            "parent_node_key": "is_existing_customer",
            "branch_label": "No",
            "is_root": false
        }))
        .unwrap();

        assert_eq!(node.node_type, NodeType::Condition);
        assert_eq!(node.condition_kind, Some(ConditionKind::Categorical));
        assert_eq!(node.branch_names().collect::<Vec<_>>(), vec!["thin", "thick"]);
        assert_eq!(
            node.parent_edge,
            Some(ParentEdge {
                parent_node_key: "is_existing_customer".into(),
                branch_label: Some("No".into()),
            })
        );
    }

    #[test]
    fn test_terminal_ref_follows_node_type() {
        let node: TreeNode = serde_json::from_value(json!({
            "node_key": "a1",
            "node_type": "assessment",
            "assessment_id": "assess-thin",
            "strategy_id": "ignored"
        }))
        .unwrap();
        assert_eq!(
            node.terminal_ref,
            Some(TerminalRef::Assessment("assess-thin".into()))
        );
        assert_eq!(node.label, "a1");
    }

    #[test]
    fn test_branches_without_condition_type_are_rejected() {
        let result: Result<TreeNode, _> = serde_json::from_value(json!({
            "node_key": "c",
            "node_type": "condition",
            "branches": [{"name": "Yes", "value": true}]
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_compound_columns_fill_branches() {
        let node: TreeNode = serde_json::from_value(json!({
            "node_key": "prime",
            "node_type": "condition",
            "condition_type": "compound",
            "branches": [{"name": "match"}],
            "compound_conditions": [
                {"field": "credit_score", "operator": "gte", "threshold": 720}
            ],
            "compound_logic": "AND"
        }))
        .unwrap();

        match &node.branches[0].def {
            BranchDef::Compound(c) => {
                assert_eq!(c.conditions.len(), 1);
                assert_eq!(c.logic, LogicOp::And);
            }
            other => panic!("expected compound branch, got {:?}", other),
        }
    }

    #[test]
    fn test_record_round_trip() {
        let node = TreeNode::condition("score", "credit_score", ConditionKind::NumericRange)
            .with_branch("high", BranchDef::compare(CompareOp::Gte, 700.0))
            .with_branch("low", BranchDef::bounds(None, Some(700.0)))
            .with_null_branch("low")
            .with_parent("root", Some("No"));

        let record = NodeRecord::from(node.clone());
        assert_eq!(record.operator.as_deref(), Some(">="));
        assert_eq!(record.parent_node_key.as_deref(), Some("root"));

        let back = TreeNode::try_from(record).unwrap();
        assert_eq!(back, node);
    }

    #[test]
    fn test_parent_reference_clears_root_flag() {
        let node: TreeNode = serde_json::from_value(json!({
            "node_key": "x",
            "node_type": "annotation",
            "is_root": true,
            "parent_node_key": "y"
        }))
        .unwrap();
        assert!(!node.is_root);
    }
}
