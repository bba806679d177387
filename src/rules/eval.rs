use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{ApplicationSnapshot, Operator, RuleEntry, Threshold};

/// Result of evaluating one rule against one application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", content = "reason", rename_all = "snake_case")]
pub enum RuleVerdict {
    /// The operator held.
    Pass,
    /// The rule contributed nothing (fail-open).
    Skip(SkipReason),
    /// The operator did not hold, or a missing value failed closed.
    Fail,
}

/// Why a rule was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Disabled,
    MissingField,
    Uncoercible,
}

impl RuleEntry {
    /// Evaluate this rule against an application snapshot.
    ///
    /// Never fails: a missing field or a value that cannot be compared is
    /// skipped unless `fail_on_null` is set, in which case the rule fails.
    pub fn evaluate(&self, app: &ApplicationSnapshot) -> RuleVerdict {
        if !self.enabled {
            return RuleVerdict::Skip(SkipReason::Disabled);
        }

        let Some(value) = app.get(&self.field) else {
            return if self.fail_on_null {
                RuleVerdict::Fail
            } else {
                RuleVerdict::Skip(SkipReason::MissingField)
            };
        };

        match apply_operator(self.operator, value, &self.threshold) {
            Some(true) => RuleVerdict::Pass,
            Some(false) => RuleVerdict::Fail,
            None if self.fail_on_null => RuleVerdict::Fail,
            None => RuleVerdict::Skip(SkipReason::Uncoercible),
        }
    }
}

/// Apply an operator to a resolved value.
///
/// Returns `None` when the value or threshold cannot be coerced into a
/// comparable shape.
pub fn apply_operator(operator: Operator, value: &Value, threshold: &Threshold) -> Option<bool> {
    match (operator, threshold) {
        (Operator::Gte, Threshold::Scalar(t)) => compare_numbers(value, t, |a, b| a >= b),
        (Operator::Lte, Threshold::Scalar(t)) => compare_numbers(value, t, |a, b| a <= b),
        (Operator::Gt, Threshold::Scalar(t)) => compare_numbers(value, t, |a, b| a > b),
        (Operator::Lt, Threshold::Scalar(t)) => compare_numbers(value, t, |a, b| a < b),
        (Operator::Eq, Threshold::Scalar(t)) => values_equal(value, t),
        (Operator::Neq, Threshold::Scalar(t)) => values_equal(value, t).map(|eq| !eq),
        (Operator::In, Threshold::List(items)) => is_member(value, items),
        (Operator::NotIn, Threshold::List(items)) => is_member(value, items).map(|m| !m),
        (Operator::Between, Threshold::Range { min, max }) => {
            as_number(value).map(|v| *min <= v && v <= *max)
        }
        _ => None,
    }
}

fn compare_numbers(value: &Value, threshold: &Value, cmp: fn(f64, f64) -> bool) -> Option<bool> {
    Some(cmp(as_number(value)?, as_number(threshold)?))
}

/// Coerce a JSON number or numeric string to `f64`.
pub(crate) fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        _ => None,
    }
}

/// Coerce a JSON boolean or `"true"`/`"false"` string to `bool`.
pub(crate) fn as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Render a scalar as the string used for categorical matching.
pub(crate) fn as_category(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Scalar equality with numeric and boolean coercion.
pub(crate) fn values_equal(value: &Value, threshold: &Value) -> Option<bool> {
    if value.is_array() || value.is_object() || threshold.is_array() || threshold.is_object() {
        return None;
    }

    if value.is_boolean() || threshold.is_boolean() {
        return Some(as_bool(value)? == as_bool(threshold)?);
    }

    if let (Some(a), Some(b)) = (as_number(value), as_number(threshold)) {
        return Some(a == b);
    }

    match (value, threshold) {
        (Value::String(a), Value::String(b)) => Some(a == b),
        _ => None,
    }
}

fn is_member(value: &Value, items: &[Value]) -> Option<bool> {
    if value.is_array() || value.is_object() {
        return None;
    }
    Some(
        items
            .iter()
            .any(|item| values_equal(value, item) == Some(true)),
    )
}
