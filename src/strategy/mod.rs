//! Strategies, assessments and their evaluation.
//!
//! A [`Strategy`] is attached to a strategy terminal of a decision tree and
//! combines its knock-out and overlay rule lists according to an
//! [`EvaluationMode`]. It owns the [`Assessment`]s referenced by assessment
//! terminals.

mod evaluator;

pub use evaluator::*;

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::rules::{apply_operator, ApplicationSnapshot, Operator, RuleEntry, Threshold};
use crate::tree::{IssueCode, ValidationIssue, ValidationResult};

/// How a strategy combines its rules into one decision.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationMode {
    /// Knock-out rules in list order, then overlays.
    #[default]
    Sequential,
    /// A selector picks one of two knock-out lists.
    #[serde(alias = "dualPath")]
    DualPath,
    /// Weighted score bucketed into bands.
    Scoring,
    /// Sequential knock-outs, then scoring.
    Hybrid,
}

impl EvaluationMode {
    /// Get the mode name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            EvaluationMode::Sequential => "sequential",
            EvaluationMode::DualPath => "dual_path",
            EvaluationMode::Scoring => "scoring",
            EvaluationMode::Hybrid => "hybrid",
        }
    }
}

impl std::fmt::Display for EvaluationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for EvaluationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sequential" => Ok(EvaluationMode::Sequential),
            "dual_path" | "dualpath" => Ok(EvaluationMode::DualPath),
            "scoring" => Ok(EvaluationMode::Scoring),
            "hybrid" => Ok(EvaluationMode::Hybrid),
            _ => Err(format!("Unknown evaluation mode: {}", s)),
        }
    }
}

/// Final credit decision, ordered from least to most severe.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    #[default]
    Approve,
    Refer,
    Decline,
}

impl Decision {
    /// The more severe of two decisions.
    pub fn escalate(self, other: Decision) -> Decision {
        self.max(other)
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Decision::Approve => write!(f, "approve"),
            Decision::Refer => write!(f, "refer"),
            Decision::Decline => write!(f, "decline"),
        }
    }
}

impl std::str::FromStr for Decision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "approve" => Ok(Decision::Approve),
            "refer" => Ok(Decision::Refer),
            "decline" => Ok(Decision::Decline),
            _ => Err(format!("Unknown decision: {}", s)),
        }
    }
}

/// A score band: scores at or above `min_score` (and below the next band)
/// receive `outcome`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreBand {
    pub name: String,
    #[serde(alias = "minScore")]
    pub min_score: f64,
    #[serde(default)]
    pub outcome: Decision,
}

impl ScoreBand {
    /// Create a band.
    pub fn new(name: impl Into<String>, min_score: f64, outcome: Decision) -> Self {
        Self {
            name: name.into(),
            min_score,
            outcome,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BandsRepr {
    List(Vec<ScoreBand>),
    Map(BTreeMap<String, f64>),
}

fn deserialize_bands<'de, D>(deserializer: D) -> Result<Vec<ScoreBand>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<BandsRepr>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(BandsRepr::List(bands)) => bands,
        Some(BandsRepr::Map(map)) => map
            .into_iter()
            .map(|(name, min_score)| {
                let outcome = name.parse().unwrap_or(Decision::Approve);
                ScoreBand {
                    name,
                    min_score,
                    outcome,
                }
            })
            .collect(),
    })
}

/// Condition choosing the dual-path rule list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathSelector {
    pub field: String,
    pub operator: Operator,
    pub threshold: Threshold,
}

impl PathSelector {
    /// Whether the selector holds. A missing or uncoercible value does not.
    pub fn holds(&self, app: &ApplicationSnapshot) -> bool {
        app.get(&self.field)
            .and_then(|v| apply_operator(self.operator, v, &self.threshold))
            .unwrap_or(false)
    }
}

/// Dual-path configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DualPathConfig {
    pub selector: PathSelector,
    #[serde(default, alias = "whenTrue")]
    pub when_true: Vec<RuleEntry>,
    #[serde(default, alias = "whenFalse")]
    pub when_false: Vec<RuleEntry>,
}

/// A named rule list evaluated at an assessment terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assessment {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub rules: Vec<RuleEntry>,
    #[serde(
        default,
        alias = "scoreCutoffs",
        deserialize_with = "deserialize_bands"
    )]
    pub score_cutoffs: Vec<ScoreBand>,
    #[serde(default, alias = "baseScore")]
    pub base_score: f64,
}

impl Assessment {
    /// Create an empty assessment.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            rules: Vec::new(),
            score_cutoffs: Vec::new(),
            base_score: 0.0,
        }
    }

    /// Append a rule.
    pub fn with_rule(mut self, rule: RuleEntry) -> Self {
        self.rules.push(rule);
        self
    }

    /// Append a score band.
    pub fn with_band(mut self, band: ScoreBand) -> Self {
        self.score_cutoffs.push(band);
        self
    }
}

/// A credit strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Strategy {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, alias = "evaluationMode")]
    pub evaluation_mode: EvaluationMode,
    #[serde(default, alias = "knockOutRules")]
    pub knock_out_rules: Vec<RuleEntry>,
    #[serde(default, alias = "overlayRules")]
    pub overlay_rules: Vec<RuleEntry>,
    #[serde(
        default,
        alias = "scoreCutoffs",
        deserialize_with = "deserialize_bands"
    )]
    pub score_cutoffs: Vec<ScoreBand>,
    #[serde(default, alias = "baseScore")]
    pub base_score: f64,
    #[serde(default, alias = "dualPath", skip_serializing_if = "Option::is_none")]
    pub dual_path: Option<DualPathConfig>,
    /// Decision tree this strategy is bound to, one-to-one.
    #[serde(default, alias = "decisionTreeId", skip_serializing_if = "Option::is_none")]
    pub decision_tree_id: Option<String>,
    #[serde(default)]
    pub assessments: Vec<Assessment>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Strategy {
    /// Create an empty strategy.
    pub fn new(id: impl Into<String>, name: impl Into<String>, mode: EvaluationMode) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            evaluation_mode: mode,
            knock_out_rules: Vec::new(),
            overlay_rules: Vec::new(),
            score_cutoffs: Vec::new(),
            base_score: 0.0,
            dual_path: None,
            decision_tree_id: None,
            assessments: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Append a knock-out rule.
    pub fn with_knock_out(mut self, rule: RuleEntry) -> Self {
        self.knock_out_rules.push(rule);
        self
    }

    /// Append an overlay rule.
    pub fn with_overlay(mut self, rule: RuleEntry) -> Self {
        self.overlay_rules.push(rule);
        self
    }

    /// Append a score band.
    pub fn with_band(mut self, band: ScoreBand) -> Self {
        self.score_cutoffs.push(band);
        self
    }

    /// Set the base score.
    pub fn with_base_score(mut self, base_score: f64) -> Self {
        self.base_score = base_score;
        self
    }

    /// Set the dual-path configuration.
    pub fn with_dual_path(mut self, config: DualPathConfig) -> Self {
        self.dual_path = Some(config);
        self
    }

    /// Bind to a decision tree.
    pub fn with_tree(mut self, tree_id: impl Into<String>) -> Self {
        self.decision_tree_id = Some(tree_id.into());
        self
    }

    /// Add an owned assessment.
    pub fn with_assessment(mut self, assessment: Assessment) -> Self {
        self.assessments.push(assessment);
        self
    }

    /// Look up an owned assessment.
    pub fn assessment(&self, id: &str) -> Option<&Assessment> {
        self.assessments.iter().find(|a| a.id == id)
    }

    /// Sanity-check the strategy's rule lists before saving.
    pub fn validate(&self) -> ValidationResult {
        let mut issues = Vec::new();
        issues.extend(validate_rule_list("knock_out_rules", &self.knock_out_rules));
        issues.extend(validate_rule_list("overlay_rules", &self.overlay_rules));

        match (&self.dual_path, self.evaluation_mode) {
            (Some(config), _) => {
                issues.extend(validate_rule_list("dual_path.when_true", &config.when_true));
                issues.extend(validate_rule_list("dual_path.when_false", &config.when_false));
            }
            (None, EvaluationMode::DualPath) => issues.push(ValidationIssue::warning(
                IssueCode::MissingDualPath,
                "dual_path mode without a dual_path config falls back to knock_out_rules",
            )),
            (None, _) => {}
        }

        let mut ids = HashSet::new();
        for assessment in &self.assessments {
            if !ids.insert(assessment.id.as_str()) {
                issues.push(ValidationIssue::error(
                    IssueCode::DuplicateAssessmentId,
                    format!("Assessment id '{}' is used more than once", assessment.id),
                ));
            }
            let list = format!("assessments.{}", assessment.id);
            issues.extend(validate_rule_list(&list, &assessment.rules));
        }

        let mut stats = BTreeMap::new();
        let rule_count = self.knock_out_rules.len()
            + self.overlay_rules.len()
            + self
                .assessments
                .iter()
                .map(|a| a.rules.len())
                .sum::<usize>();
        stats.insert("rule_count".to_string(), rule_count as i64);
        stats.insert(
            "assessment_count".to_string(),
            self.assessments.len() as i64,
        );
        ValidationResult::from_issues(issues, stats)
    }
}

/// Check one rule list: ids must be unique and thresholds must fit their
/// operator.
pub fn validate_rule_list(list: &str, rules: &[RuleEntry]) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    let mut ids = HashSet::new();

    for rule in rules {
        if !ids.insert(rule.rule_id.as_str()) {
            issues.push(ValidationIssue::error(
                IssueCode::DuplicateRuleId,
                format!("Rule id '{}' is used more than once in {}", rule.rule_id, list),
            ));
        }

        let shape_ok = match &rule.threshold {
            Threshold::Range { min, max } => rule.operator.accepts(&rule.threshold) && min <= max,
            other => rule.operator.accepts(other),
        };
        if !shape_ok {
            issues.push(ValidationIssue::error(
                IssueCode::ThresholdShape,
                format!(
                    "Rule '{}' in {} has a threshold that does not fit operator {}",
                    rule.rule_id, list, rule.operator
                ),
            ));
        }
    }
    issues
}
