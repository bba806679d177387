//! Branch definitions: named partitions of a condition node's attribute domain.
//!
//! The persisted JSON for a branch carries no kind tag. It is interpreted
//! through the owning node's [`ConditionKind`], so a binary node's branch is
//! always parsed as [`BinaryBranch`], a categorical node's as
//! [`CategoricalBranch`], and so on.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::rules::{
    apply_operator, as_bool, as_category, as_number, ApplicationSnapshot, Operator, Threshold,
};

/// How a condition node partitions its attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionKind {
    Binary,
    Categorical,
    #[serde(alias = "numericRange")]
    NumericRange,
    Compound,
}

impl ConditionKind {
    /// Get the kind name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionKind::Binary => "binary",
            ConditionKind::Categorical => "categorical",
            ConditionKind::NumericRange => "numeric_range",
            ConditionKind::Compound => "compound",
        }
    }
}

impl std::fmt::Display for ConditionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ConditionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "binary" => Ok(ConditionKind::Binary),
            "categorical" => Ok(ConditionKind::Categorical),
            "numeric_range" | "numericrange" => Ok(ConditionKind::NumericRange),
            "compound" => Ok(ConditionKind::Compound),
            _ => Err(format!("Unknown condition kind: {}", s)),
        }
    }
}

/// Comparison used by a numeric-range branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    #[serde(rename = ">=")]
    Gte,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Lte,
    #[serde(rename = "==")]
    Eq,
}

impl CompareOp {
    /// Symbolic form, as stored in the `operator` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            CompareOp::Gte => ">=",
            CompareOp::Gt => ">",
            CompareOp::Lt => "<",
            CompareOp::Lte => "<=",
            CompareOp::Eq => "==",
        }
    }

    fn holds(&self, value: f64, threshold: f64) -> bool {
        match self {
            CompareOp::Gte => value >= threshold,
            CompareOp::Gt => value > threshold,
            CompareOp::Lt => value < threshold,
            CompareOp::Lte => value <= threshold,
            CompareOp::Eq => value == threshold,
        }
    }
}

/// Logical combinator for compound branches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogicOp {
    #[default]
    #[serde(alias = "and")]
    And,
    #[serde(alias = "or")]
    Or,
}

impl LogicOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogicOp::And => "AND",
            LogicOp::Or => "OR",
        }
    }
}

impl std::str::FromStr for LogicOp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "AND" => Ok(LogicOp::And),
            "OR" => Ok(LogicOp::Or),
            _ => Err(format!("Unknown logic operator: {}", s)),
        }
    }
}

/// Binary branch: matches a boolean attribute value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryBranch {
    pub value: bool,
}

/// Categorical branch: matches when the value is one of `values`.
///
/// An empty set never matches a present value; such a branch only makes
/// sense as the node's missing-value branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoricalBranch {
    #[serde(default)]
    pub values: BTreeSet<String>,
}

/// Numeric-range branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RangeSpec {
    /// Single comparison against a threshold.
    Compare { operator: CompareOp, threshold: f64 },
    /// Half-open interval `min <= v < max`.
    Bounds(NumericBounds),
}

/// Interval bounds; either end may be open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NumericBounds {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

/// One sub-condition of a compound branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubCondition {
    pub field: String,
    pub operator: Operator,
    pub threshold: Threshold,
}

/// Compound branch: several field tests combined with AND/OR.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompoundBranch {
    pub conditions: Vec<SubCondition>,
    #[serde(default)]
    pub logic: LogicOp,
}

/// Matching rule of one branch, one case per [`ConditionKind`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum BranchDef {
    Binary(BinaryBranch),
    Categorical(CategoricalBranch),
    NumericRange(RangeSpec),
    Compound(CompoundBranch),
}

impl BranchDef {
    /// Binary branch matching `value`.
    pub fn binary(value: bool) -> Self {
        BranchDef::Binary(BinaryBranch { value })
    }

    /// Categorical branch matching any of `values`.
    pub fn categorical<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        BranchDef::Categorical(CategoricalBranch {
            values: values.into_iter().map(Into::into).collect(),
        })
    }

    /// Numeric branch with a single comparison.
    pub fn compare(operator: CompareOp, threshold: f64) -> Self {
        BranchDef::NumericRange(RangeSpec::Compare {
            operator,
            threshold,
        })
    }

    /// Numeric branch over `min <= v < max`.
    pub fn bounds(min: Option<f64>, max: Option<f64>) -> Self {
        BranchDef::NumericRange(RangeSpec::Bounds(NumericBounds { min, max }))
    }

    /// The condition kind this definition belongs to.
    pub fn kind(&self) -> ConditionKind {
        match self {
            BranchDef::Binary(_) => ConditionKind::Binary,
            BranchDef::Categorical(_) => ConditionKind::Categorical,
            BranchDef::NumericRange(_) => ConditionKind::NumericRange,
            BranchDef::Compound(_) => ConditionKind::Compound,
        }
    }

    /// Parse a branch payload as the given kind.
    ///
    /// Binary payloads may be a bare boolean and categorical payloads a bare
    /// array of strings.
    pub fn from_json(kind: ConditionKind, value: Value) -> Result<Self, serde_json::Error> {
        match kind {
            ConditionKind::Binary => match value {
                Value::Bool(b) => Ok(BranchDef::binary(b)),
                other => serde_json::from_value(other).map(BranchDef::Binary),
            },
            ConditionKind::Categorical => match value {
                Value::Array(_) => {
                    let values: BTreeSet<String> = serde_json::from_value(value)?;
                    Ok(BranchDef::Categorical(CategoricalBranch { values }))
                }
                other => serde_json::from_value(other).map(BranchDef::Categorical),
            },
            ConditionKind::NumericRange => {
                serde_json::from_value(value).map(BranchDef::NumericRange)
            }
            ConditionKind::Compound => serde_json::from_value(value).map(BranchDef::Compound),
        }
    }

    /// Whether the value matches this branch.
    ///
    /// `value` is the node attribute's resolved value. Compound branches read
    /// their own fields from `app` instead.
    pub fn matches(&self, value: Option<&Value>, app: &ApplicationSnapshot) -> bool {
        match self {
            BranchDef::Binary(b) => value.and_then(as_bool) == Some(b.value),
            BranchDef::Categorical(c) => value
                .and_then(as_category)
                .is_some_and(|v| c.values.contains(&v)),
            BranchDef::NumericRange(range) => {
                let Some(v) = value.and_then(as_number) else {
                    return false;
                };
                match range {
                    RangeSpec::Compare {
                        operator,
                        threshold,
                    } => operator.holds(v, *threshold),
                    RangeSpec::Bounds(bounds) => {
                        bounds.min.map_or(true, |m| v >= m) && bounds.max.map_or(true, |m| v < m)
                    }
                }
            }
            BranchDef::Compound(compound) => {
                let mut results = compound.conditions.iter().map(|c| {
                    app.get(&c.field)
                        .and_then(|v| apply_operator(c.operator, v, &c.threshold))
                        .unwrap_or(false)
                });
                match compound.logic {
                    LogicOp::And => !compound.conditions.is_empty() && results.all(|r| r),
                    LogicOp::Or => results.any(|r| r),
                }
            }
        }
    }

    /// A branch that can only be reached through the missing-value fallback.
    pub fn is_missing_value_only(&self) -> bool {
        matches!(self, BranchDef::Categorical(c) if c.values.is_empty())
    }
}

/// A named branch of a condition node.
#[derive(Debug, Clone, PartialEq)]
pub struct Branch {
    pub name: String,
    pub def: BranchDef,
}

impl Branch {
    /// Create a named branch.
    pub fn new(name: impl Into<String>, def: BranchDef) -> Self {
        Self {
            name: name.into(),
            def,
        }
    }

    /// Persisted form: the definition's fields plus `name`.
    pub fn to_json(&self) -> Value {
        let mut object = match serde_json::to_value(&self.def) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        object.insert("name".to_string(), Value::String(self.name.clone()));
        Value::Object(object)
    }
}

/// Errors raised while reading persisted branch JSON.
#[derive(Debug, thiserror::Error)]
pub enum BranchParseError {
    #[error("branches must be an array or object, got {found}")]
    Shape { found: String },

    #[error("branch entry at index {index} has no name")]
    MissingName { index: usize },

    #[error("duplicate branch name '{name}'")]
    Duplicate { name: String },

    #[error("branch '{name}' is not a valid {kind} branch: {source}")]
    Invalid {
        name: String,
        kind: ConditionKind,
        source: serde_json::Error,
    },
}

/// Parse the persisted `branches` column for a node of the given kind.
///
/// The canonical form is an array of `{name, ...}` objects, which preserves
/// insertion order. A `{name: payload}` object is also accepted and keeps its
/// key order as written.
pub fn parse_branches(kind: ConditionKind, json: Value) -> Result<Vec<Branch>, BranchParseError> {
    let entries: Vec<(String, Value)> = match json {
        Value::Null => Vec::new(),
        Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(index, item)| match item {
                Value::Object(mut map) => match map.remove("name") {
                    Some(Value::String(name)) => Ok((name, Value::Object(map))),
                    _ => Err(BranchParseError::MissingName { index }),
                },
                _ => Err(BranchParseError::MissingName { index }),
            })
            .collect::<Result<_, _>>()?,
        Value::Object(map) => map.into_iter().collect(),
        other => {
            return Err(BranchParseError::Shape {
                found: json_type_name(&other).to_string(),
            })
        }
    };

    let mut branches: Vec<Branch> = Vec::with_capacity(entries.len());
    for (name, payload) in entries {
        if branches.iter().any(|b| b.name == name) {
            return Err(BranchParseError::Duplicate { name });
        }
        let def = BranchDef::from_json(kind, payload).map_err(|source| {
            BranchParseError::Invalid {
                name: name.clone(),
                kind,
                source,
            }
        })?;
        branches.push(Branch { name, def });
    }
    Ok(branches)
}

/// Serialize branches into the canonical persisted array.
pub fn branches_to_json(branches: &[Branch]) -> Value {
    Value::Array(branches.iter().map(Branch::to_json).collect())
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
