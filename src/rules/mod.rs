//! Rule model for assessment and strategy rule lists.
//!
//! A [`RuleEntry`] is one testable condition (field, operator, threshold)
//! evaluated against an [`ApplicationSnapshot`]. A rule *passes* when the
//! operator holds for the applicant's value; a failing rule contributes its
//! [`Outcome`] and reason code to the owning strategy's decision.

mod eval;
mod snapshot;

pub use eval::*;
pub use snapshot::*;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Comparison operator applied by a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    /// Value is greater than or equal to the threshold.
    Gte,
    /// Value is less than or equal to the threshold.
    Lte,
    /// Value is strictly greater than the threshold.
    Gt,
    /// Value is strictly less than the threshold.
    Lt,
    /// Value equals the threshold.
    Eq,
    /// Value differs from the threshold.
    Neq,
    /// Value is a member of the threshold list.
    In,
    /// Value is not a member of the threshold list.
    NotIn,
    /// Value lies within `{min, max}` inclusive.
    Between,
}

impl Operator {
    /// Get the operator name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Gte => "gte",
            Operator::Lte => "lte",
            Operator::Gt => "gt",
            Operator::Lt => "lt",
            Operator::Eq => "eq",
            Operator::Neq => "neq",
            Operator::In => "in",
            Operator::NotIn => "not_in",
            Operator::Between => "between",
        }
    }

    /// Whether `threshold` has the shape this operator needs.
    pub fn accepts(&self, threshold: &Threshold) -> bool {
        match self {
            Operator::Between => matches!(threshold, Threshold::Range { .. }),
            Operator::In | Operator::NotIn => matches!(threshold, Threshold::List(_)),
            _ => matches!(threshold, Threshold::Scalar(_)),
        }
    }
}

impl std::fmt::Display for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Operator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "gte" | ">=" => Ok(Operator::Gte),
            "lte" | "<=" => Ok(Operator::Lte),
            "gt" | ">" => Ok(Operator::Gt),
            "lt" | "<" => Ok(Operator::Lt),
            "eq" | "==" => Ok(Operator::Eq),
            "neq" | "!=" => Ok(Operator::Neq),
            "in" => Ok(Operator::In),
            "not_in" => Ok(Operator::NotIn),
            "between" => Ok(Operator::Between),
            _ => Err(format!("Unknown operator: {}", s)),
        }
    }
}

/// Right-hand side of a rule comparison.
///
/// The shape depends on the operator: a `{min, max}` range for `between`,
/// a list for `in`/`not_in`, and a scalar for everything else.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Threshold {
    /// Inclusive numeric range.
    Range { min: f64, max: f64 },
    /// Membership list.
    List(Vec<Value>),
    /// Single number, string or boolean.
    Scalar(Value),
}

impl From<f64> for Threshold {
    fn from(value: f64) -> Self {
        Threshold::Scalar(Value::from(value))
    }
}

impl From<i64> for Threshold {
    fn from(value: i64) -> Self {
        Threshold::Scalar(Value::from(value))
    }
}

impl From<i32> for Threshold {
    fn from(value: i32) -> Self {
        Threshold::Scalar(Value::from(value))
    }
}

impl From<bool> for Threshold {
    fn from(value: bool) -> Self {
        Threshold::Scalar(Value::Bool(value))
    }
}

impl From<&str> for Threshold {
    fn from(value: &str) -> Self {
        Threshold::Scalar(Value::String(value.to_string()))
    }
}

/// How a failing rule is treated by the orchestrator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Knock-out: a declining failure ends evaluation immediately.
    #[default]
    Hard,
    /// Overlay: failures accumulate and escalate to manual review.
    Refer,
}

/// Effect carried by a failing rule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    #[default]
    Decline,
    Refer,
    Pass,
    Disable,
}

impl Outcome {
    /// Whether a failure with this outcome can change a verdict.
    pub fn is_adverse(&self) -> bool {
        matches!(self, Outcome::Decline | Outcome::Refer)
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Decline => write!(f, "decline"),
            Outcome::Refer => write!(f, "refer"),
            Outcome::Pass => write!(f, "pass"),
            Outcome::Disable => write!(f, "disable"),
        }
    }
}

/// One testable condition in an assessment or strategy rule list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleEntry {
    /// Identifier, unique within the owning rule list.
    #[serde(alias = "ruleId")]
    pub rule_id: String,
    /// Application field tested by this rule.
    pub field: String,
    /// Comparison operator.
    pub operator: Operator,
    /// Comparison threshold.
    pub threshold: Threshold,
    /// Knock-out or overlay treatment.
    #[serde(default)]
    pub severity: Severity,
    /// Effect when the rule fails.
    #[serde(default)]
    pub outcome: Outcome,
    /// Disabled rules are skipped.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Fail (rather than skip) when the field is missing or uncoercible.
    #[serde(default, alias = "failOnNull")]
    pub fail_on_null: bool,
    /// Score contribution in scoring modes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    /// Reason code reported when the rule fails.
    #[serde(default, alias = "reasonCode")]
    pub reason_code: String,
}

fn default_true() -> bool {
    true
}

impl RuleEntry {
    /// Create an enabled hard/decline rule.
    pub fn new(
        rule_id: impl Into<String>,
        field: impl Into<String>,
        operator: Operator,
        threshold: impl Into<Threshold>,
    ) -> Self {
        let rule_id = rule_id.into();
        Self {
            reason_code: rule_id.to_uppercase(),
            rule_id,
            field: field.into(),
            operator,
            threshold: threshold.into(),
            severity: Severity::Hard,
            outcome: Outcome::Decline,
            enabled: true,
            fail_on_null: false,
            weight: None,
        }
    }

    /// Set the severity.
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// Set the failure outcome.
    pub fn with_outcome(mut self, outcome: Outcome) -> Self {
        self.outcome = outcome;
        self
    }

    /// Set the scoring weight.
    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = Some(weight);
        self
    }

    /// Set the reason code.
    pub fn with_reason(mut self, reason_code: impl Into<String>) -> Self {
        self.reason_code = reason_code.into();
        self
    }

    /// Fail closed when the field is missing.
    pub fn fail_on_null(mut self) -> Self {
        self.fail_on_null = true;
        self
    }

    /// Disable the rule.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Shorthand for a refer-severity, refer-outcome overlay rule.
    pub fn overlay(self) -> Self {
        self.with_severity(Severity::Refer)
            .with_outcome(Outcome::Refer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_operator_round_trip_names() {
        for op in [
            Operator::Gte,
            Operator::Lte,
            Operator::Gt,
            Operator::Lt,
            Operator::Eq,
            Operator::Neq,
            Operator::In,
            Operator::NotIn,
            Operator::Between,
        ] {
            assert_eq!(op.as_str().parse::<Operator>().unwrap(), op);
        }
        assert_eq!(">=".parse::<Operator>().unwrap(), Operator::Gte);
        assert!("approx".parse::<Operator>().is_err());
    }

    #[test]
    fn test_operator_accepts_threshold_shape() {
        assert!(Operator::Between.accepts(&Threshold::Range { min: 0.0, max: 1.0 }));
        assert!(!Operator::Between.accepts(&Threshold::from(1.0)));
        assert!(Operator::In.accepts(&Threshold::List(vec![json!("a")])));
        assert!(!Operator::Gte.accepts(&Threshold::List(vec![])));
        assert!(Operator::Eq.accepts(&Threshold::from(true)));
    }

    #[test]
    fn test_threshold_deserialize_shapes() {
        let range: Threshold = serde_json::from_value(json!({"min": 0, "max": 0.4})).unwrap();
        assert_eq!(range, Threshold::Range { min: 0.0, max: 0.4 });

        let list: Threshold = serde_json::from_value(json!(["thin", "thick"])).unwrap();
        assert!(matches!(list, Threshold::List(ref v) if v.len() == 2));

        let scalar: Threshold = serde_json::from_value(json!(600)).unwrap();
        assert_eq!(scalar, Threshold::Scalar(json!(600)));
    }

    #[test]
    fn test_rule_entry_deserialize_defaults_and_aliases() {
        let rule: RuleEntry = serde_json::from_value(json!({
            "ruleId": "min_score",
            "field": "credit_score",
            "operator": "gte",
            "threshold": 600,
            "reasonCode": "LOW_SCORE"
        }))
        .unwrap();

        assert_eq!(rule.rule_id, "min_score");
        assert_eq!(rule.severity, Severity::Hard);
        assert_eq!(rule.outcome, Outcome::Decline);
        assert!(rule.enabled);
        assert!(!rule.fail_on_null);
        assert_eq!(rule.weight, None);
        assert_eq!(rule.reason_code, "LOW_SCORE");
    }

    #[test]
    fn test_rule_entry_builder() {
        let rule = RuleEntry::new("dti", "dti_ratio", Operator::Lte, 0.45)
            .overlay()
            .with_weight(10.0)
            .with_reason("HIGH_DTI")
            .fail_on_null();

        assert_eq!(rule.severity, Severity::Refer);
        assert_eq!(rule.outcome, Outcome::Refer);
        assert_eq!(rule.weight, Some(10.0));
        assert_eq!(rule.reason_code, "HIGH_DTI");
        assert!(rule.fail_on_null);
    }

    #[test]
    fn test_outcome_is_adverse() {
        assert!(Outcome::Decline.is_adverse());
        assert!(Outcome::Refer.is_adverse());
        assert!(!Outcome::Pass.is_adverse());
        assert!(!Outcome::Disable.is_adverse());
    }
}
