use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{Assessment, Decision, EvaluationMode, ScoreBand, Strategy};
use crate::rules::{ApplicationSnapshot, Outcome, RuleEntry, RuleVerdict, Severity, SkipReason};

/// Reason code reported when a score falls below every band.
pub const SCORE_BELOW_CUTOFF: &str = "SCORE_BELOW_CUTOFF";

/// A rule that failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleHit {
    pub rule_id: String,
    pub reason_code: String,
    pub severity: Severity,
    pub outcome: Outcome,
}

/// A rule that contributed nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedRule {
    pub rule_id: String,
    pub reason: SkipReason,
}

/// Which dual-path list was evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DualPathBranch {
    WhenTrue,
    WhenFalse,
}

/// Result of evaluating a strategy or assessment against one application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub decision: Decision,
    /// The knock-out rule's reason on a short-circuit decline, otherwise the
    /// first adverse reason.
    pub primary_reason: Option<String>,
    /// Reason codes of adverse hits, in evaluation order.
    pub reason_codes: Vec<String>,
    pub hits: Vec<RuleHit>,
    pub skipped: Vec<SkippedRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub band: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<DualPathBranch>,
    /// Whether a knock-out rule ended evaluation early.
    pub short_circuited: bool,
}

/// Running totals over one or more rule lists.
#[derive(Default)]
struct Tally {
    hits: Vec<RuleHit>,
    skipped: Vec<SkippedRule>,
    reason_codes: Vec<String>,
    refer: bool,
    score: f64,
}

impl Tally {
    /// Evaluate `rules` in order. Returns the reason code of the first hard
    /// decline, at which point evaluation stops.
    fn run(&mut self, rules: &[RuleEntry], app: &ApplicationSnapshot) -> Option<String> {
        for rule in rules {
            let verdict = rule.evaluate(app);
            let weight = rule.weight.unwrap_or(0.0);
            match verdict {
                RuleVerdict::Skip(reason) => {
                    self.skipped.push(SkippedRule {
                        rule_id: rule.rule_id.clone(),
                        reason,
                    });
                }
                RuleVerdict::Pass => self.score += weight,
                RuleVerdict::Fail => {
                    self.score -= weight;
                    self.hits.push(RuleHit {
                        rule_id: rule.rule_id.clone(),
                        reason_code: rule.reason_code.clone(),
                        severity: rule.severity,
                        outcome: rule.outcome,
                    });
                    if !rule.outcome.is_adverse() {
                        continue;
                    }
                    self.reason_codes.push(rule.reason_code.clone());
                    if rule.severity == Severity::Hard && rule.outcome == Outcome::Decline {
                        debug!(rule_id = %rule.rule_id, "Knock-out rule failed");
                        return Some(rule.reason_code.clone());
                    }
                    self.refer = true;
                }
            }
        }
        None
    }

    fn rules_only(&self) -> Decision {
        if self.refer {
            Decision::Refer
        } else {
            Decision::Approve
        }
    }

    fn finish(self, decision: Decision, knock_out: Option<String>) -> EvaluationResult {
        let primary_reason = if decision == Decision::Approve {
            None
        } else {
            knock_out
                .clone()
                .or_else(|| self.reason_codes.first().cloned())
        };
        EvaluationResult {
            decision,
            primary_reason,
            reason_codes: self.reason_codes,
            hits: self.hits,
            skipped: self.skipped,
            score: None,
            band: None,
            path: None,
            short_circuited: knock_out.is_some(),
        }
    }

    /// Bucket the score into `bands`, escalated by `floor`.
    fn finish_scored(
        mut self,
        bands: &[ScoreBand],
        base_score: f64,
        floor: Decision,
    ) -> EvaluationResult {
        let score = base_score + self.score;
        if bands.is_empty() {
            let decision = self.rules_only().escalate(floor);
            let mut result = self.finish(decision, None);
            result.score = Some(score);
            return result;
        }

        let band = select_band(bands, score);
        let decision = match band {
            Some(band) => band.outcome.escalate(floor),
            None => {
                self.reason_codes.push(SCORE_BELOW_CUTOFF.to_string());
                Decision::Decline
            }
        };
        let band_reason = band
            .filter(|b| b.outcome != Decision::Approve)
            .map(|b| format!("SCORE_BAND_{}", b.name.to_uppercase()));

        let mut result = self.finish(decision, None);
        if decision == Decision::Decline && band.is_none() {
            result.primary_reason = Some(SCORE_BELOW_CUTOFF.to_string());
        } else if result.primary_reason.is_none() && decision != Decision::Approve {
            result.primary_reason = band_reason;
        }
        result.score = Some(score);
        result.band = band.map(|b| b.name.clone());
        result
    }
}

/// The band with the highest `min_score` not above `score`.
pub fn select_band(bands: &[ScoreBand], score: f64) -> Option<&ScoreBand> {
    bands
        .iter()
        .filter(|b| b.min_score <= score)
        .max_by(|a, b| a.min_score.total_cmp(&b.min_score))
}

impl Strategy {
    /// Evaluate this strategy against an application.
    pub fn evaluate(&self, app: &ApplicationSnapshot) -> EvaluationResult {
        let result = match self.evaluation_mode {
            EvaluationMode::Sequential => self.sequential(&self.knock_out_rules, app),
            EvaluationMode::DualPath => self.dual_path(app),
            EvaluationMode::Scoring => self.scoring(app),
            EvaluationMode::Hybrid => self.hybrid(app),
        };
        info!(
            strategy_id = %self.id,
            mode = %self.evaluation_mode,
            decision = %result.decision,
            hits = result.hits.len(),
            score = ?result.score,
            "Strategy evaluated"
        );
        result
    }

    fn sequential(&self, knock_out: &[RuleEntry], app: &ApplicationSnapshot) -> EvaluationResult {
        let mut tally = Tally::default();
        if let Some(reason) = tally.run(knock_out, app) {
            return tally.finish(Decision::Decline, Some(reason));
        }
        if let Some(reason) = tally.run(&self.overlay_rules, app) {
            return tally.finish(Decision::Decline, Some(reason));
        }
        let decision = tally.rules_only();
        tally.finish(decision, None)
    }

    fn dual_path(&self, app: &ApplicationSnapshot) -> EvaluationResult {
        let Some(config) = &self.dual_path else {
            warn!(
                strategy_id = %self.id,
                "dual_path strategy has no dual_path config, using knock_out_rules"
            );
            return self.sequential(&self.knock_out_rules, app);
        };

        let (rules, path) = if config.selector.holds(app) {
            (&config.when_true, DualPathBranch::WhenTrue)
        } else {
            (&config.when_false, DualPathBranch::WhenFalse)
        };
        let mut result = self.sequential(rules, app);
        result.path = Some(path);
        result
    }

    fn scoring(&self, app: &ApplicationSnapshot) -> EvaluationResult {
        let mut tally = Tally::default();
        for rules in [&self.knock_out_rules, &self.overlay_rules] {
            if let Some(reason) = tally.run(rules, app) {
                return tally.finish(Decision::Decline, Some(reason));
            }
        }
        if !self.score_cutoffs.is_empty() {
            tally.refer = false;
        }
        tally.finish_scored(&self.score_cutoffs, self.base_score, Decision::Approve)
    }

    fn hybrid(&self, app: &ApplicationSnapshot) -> EvaluationResult {
        let mut tally = Tally::default();
        if let Some(reason) = tally.run(&self.knock_out_rules, app) {
            return tally.finish(Decision::Decline, Some(reason));
        }
        let floor = tally.rules_only();
        if let Some(reason) = tally.run(&self.overlay_rules, app) {
            return tally.finish(Decision::Decline, Some(reason));
        }
        if !self.score_cutoffs.is_empty() {
            tally.refer = false;
        }
        tally.finish_scored(&self.score_cutoffs, self.base_score, floor)
    }
}

impl Assessment {
    /// Evaluate this assessment's rules as a knock-out list, then bucket the
    /// score when bands are configured.
    pub fn evaluate(&self, app: &ApplicationSnapshot) -> EvaluationResult {
        let mut tally = Tally::default();
        let result = match tally.run(&self.rules, app) {
            Some(reason) => tally.finish(Decision::Decline, Some(reason)),
            None if self.score_cutoffs.is_empty() => {
                let decision = tally.rules_only();
                tally.finish(decision, None)
            }
            None => {
                let floor = tally.rules_only();
                tally.finish_scored(&self.score_cutoffs, self.base_score, floor)
            }
        };
        info!(
            assessment_id = %self.id,
            decision = %result.decision,
            band = ?result.band,
            "Assessment evaluated"
        );
        result
    }
}

#[cfg(test)]
#[path = "evaluator_tests.rs"]
mod evaluator_tests;
