use super::*;
use crate::rules::{Operator, Threshold};
use crate::strategy::{DualPathConfig, PathSelector};
use pretty_assertions::assert_eq;

fn applicant() -> ApplicationSnapshot {
    ApplicationSnapshot::default()
        .with("credit_score", 580)
        .with("age", 17)
        .with("dti_ratio", 0.52)
        .with("monthly_income", 3200)
        .with("is_existing_customer", false)
}

fn min_score() -> RuleEntry {
    RuleEntry::new("min_score", "credit_score", Operator::Gte, 600).with_reason("LOW_SCORE")
}

fn min_age() -> RuleEntry {
    RuleEntry::new("min_age", "age", Operator::Gte, 18).with_reason("UNDER_AGE")
}

fn max_dti() -> RuleEntry {
    RuleEntry::new("max_dti", "dti_ratio", Operator::Lte, 0.45)
        .overlay()
        .with_reason("HIGH_DTI")
}

#[test]
fn test_verdict_order_invariant_reason_order_dependent() {
    let forward = Strategy::new("s", "S", EvaluationMode::Sequential)
        .with_knock_out(min_score())
        .with_knock_out(min_age());
    let reversed = Strategy::new("s", "S", EvaluationMode::Sequential)
        .with_knock_out(min_age())
        .with_knock_out(min_score());

    let a = forward.evaluate(&applicant());
    let b = reversed.evaluate(&applicant());

    assert_eq!(a.decision, Decision::Decline);
    assert_eq!(b.decision, Decision::Decline);
    assert_eq!(a.primary_reason.as_deref(), Some("LOW_SCORE"));
    assert_eq!(b.primary_reason.as_deref(), Some("UNDER_AGE"));
    assert!(a.short_circuited && b.short_circuited);
    assert_eq!(a.hits.len(), 1);
}

#[test]
fn test_refer_failures_accumulate_without_short_circuit() {
    let strategy = Strategy::new("s", "S", EvaluationMode::Sequential)
        .with_knock_out(
            RuleEntry::new("income", "monthly_income", Operator::Gte, 4000)
                .with_outcome(Outcome::Refer)
                .with_reason("LOW_INCOME"),
        )
        .with_overlay(max_dti());

    let result = strategy.evaluate(&applicant());
    assert_eq!(result.decision, Decision::Refer);
    assert_eq!(result.reason_codes, vec!["LOW_INCOME", "HIGH_DTI"]);
    assert_eq!(result.primary_reason.as_deref(), Some("LOW_INCOME"));
    assert!(!result.short_circuited);
}

#[test]
fn test_hard_decline_after_refer_still_declines() {
    let strategy = Strategy::new("s", "S", EvaluationMode::Sequential)
        .with_knock_out(max_dti())
        .with_knock_out(min_score());

    let result = strategy.evaluate(&applicant());
    assert_eq!(result.decision, Decision::Decline);
    assert_eq!(result.primary_reason.as_deref(), Some("LOW_SCORE"));
    assert_eq!(result.reason_codes, vec!["HIGH_DTI", "LOW_SCORE"]);
}

#[test]
fn test_non_adverse_outcomes_are_informational() {
    let strategy = Strategy::new("s", "S", EvaluationMode::Sequential).with_knock_out(
        RuleEntry::new("vip", "credit_score", Operator::Gte, 800).with_outcome(Outcome::Pass),
    );

    let result = strategy.evaluate(&applicant());
    assert_eq!(result.decision, Decision::Approve);
    assert_eq!(result.hits.len(), 1);
    assert!(result.reason_codes.is_empty());
    assert_eq!(result.primary_reason, None);
}

#[test]
fn test_skipped_rules_are_reported() {
    let strategy = Strategy::new("s", "S", EvaluationMode::Sequential)
        .with_knock_out(RuleEntry::new("bk", "has_bankruptcy", Operator::Eq, false))
        .with_knock_out(min_score().disabled());

    let result = strategy.evaluate(&applicant());
    assert_eq!(result.decision, Decision::Approve);
    assert_eq!(
        result.skipped,
        vec![
            SkippedRule {
                rule_id: "bk".into(),
                reason: SkipReason::MissingField
            },
            SkippedRule {
                rule_id: "min_score".into(),
                reason: SkipReason::Disabled
            },
        ]
    );
}

#[test]
fn test_dual_path_selects_rule_list() {
    let strategy = Strategy::new("s", "S", EvaluationMode::DualPath).with_dual_path(DualPathConfig {
        selector: PathSelector {
            field: "is_existing_customer".into(),
            operator: Operator::Eq,
            threshold: Threshold::from(true),
        },
        when_true: vec![RuleEntry::new("existing_score", "credit_score", Operator::Gte, 550)],
        when_false: vec![min_score()],
    });

    let new_customer = strategy.evaluate(&applicant());
    assert_eq!(new_customer.path, Some(DualPathBranch::WhenFalse));
    assert_eq!(new_customer.decision, Decision::Decline);

    let existing = strategy.evaluate(&applicant().with("is_existing_customer", true));
    assert_eq!(existing.path, Some(DualPathBranch::WhenTrue));
    assert_eq!(existing.decision, Decision::Approve);

    let missing = strategy.evaluate(&ApplicationSnapshot::default().with("credit_score", 700));
    assert_eq!(missing.path, Some(DualPathBranch::WhenFalse));
}

#[test]
fn test_dual_path_without_config_falls_back() {
    let strategy = Strategy::new("s", "S", EvaluationMode::DualPath).with_knock_out(min_score());
    let result = strategy.evaluate(&applicant());
    assert_eq!(result.decision, Decision::Decline);
    assert_eq!(result.path, None);
}

fn scoring_strategy(mode: EvaluationMode) -> Strategy {
    Strategy::new("s", "S", mode)
        .with_base_score(50.0)
        .with_overlay(
            RuleEntry::new("income", "monthly_income", Operator::Gte, 3000)
                .overlay()
                .with_weight(20.0),
        )
        .with_overlay(max_dti().with_weight(15.0))
        .with_band(ScoreBand::new("approve", 60.0, Decision::Approve))
        .with_band(ScoreBand::new("review", 40.0, Decision::Refer))
}

#[test]
fn test_scoring_bands() {
    // 50 + 20 - 15 = 55 -> review
    let result = scoring_strategy(EvaluationMode::Scoring).evaluate(&applicant());
    assert_eq!(result.score, Some(55.0));
    assert_eq!(result.band.as_deref(), Some("review"));
    assert_eq!(result.decision, Decision::Refer);
    assert_eq!(result.primary_reason.as_deref(), Some("HIGH_DTI"));

    // 50 + 20 + 15 = 85 -> approve
    let good = applicant().with("dti_ratio", 0.3);
    let result = scoring_strategy(EvaluationMode::Scoring).evaluate(&good);
    assert_eq!(result.score, Some(85.0));
    assert_eq!(result.decision, Decision::Approve);
    assert_eq!(result.primary_reason, None);
}

#[test]
fn test_scoring_below_cutoff_declines() {
    // 50 - 20 - 15 = 15
    let poor = applicant().with("monthly_income", 1000);
    let result = scoring_strategy(EvaluationMode::Scoring).evaluate(&poor);
    assert_eq!(result.decision, Decision::Decline);
    assert_eq!(result.band, None);
    assert_eq!(result.primary_reason.as_deref(), Some(SCORE_BELOW_CUTOFF));
    assert!(result.reason_codes.contains(&SCORE_BELOW_CUTOFF.to_string()));
}

#[test]
fn test_scoring_hard_failure_short_circuits() {
    let strategy = scoring_strategy(EvaluationMode::Scoring).with_knock_out(min_age());
    let result = strategy.evaluate(&applicant());
    assert_eq!(result.decision, Decision::Decline);
    assert!(result.short_circuited);
    assert_eq!(result.score, None);
}

#[test]
fn test_scoring_without_bands_uses_rules() {
    let mut strategy = scoring_strategy(EvaluationMode::Scoring);
    strategy.score_cutoffs.clear();
    let result = strategy.evaluate(&applicant());
    assert_eq!(result.decision, Decision::Refer);
    assert_eq!(result.score, Some(55.0));
}

#[test]
fn test_hybrid_escalates_band_with_knock_out_refer() {
    let strategy = scoring_strategy(EvaluationMode::Hybrid).with_knock_out(
        RuleEntry::new("age_check", "age", Operator::Gte, 18)
            .with_outcome(Outcome::Refer)
            .with_reason("AGE_REVIEW"),
    );
    let good = applicant().with("dti_ratio", 0.3);
    let result = strategy.evaluate(&good);

    assert_eq!(result.band.as_deref(), Some("approve"));
    assert_eq!(result.decision, Decision::Refer);
    assert_eq!(result.primary_reason.as_deref(), Some("AGE_REVIEW"));
}

#[test]
fn test_hybrid_knock_out_declines_before_scoring() {
    let strategy = scoring_strategy(EvaluationMode::Hybrid).with_knock_out(min_score());
    let result = strategy.evaluate(&applicant());
    assert_eq!(result.decision, Decision::Decline);
    assert_eq!(result.primary_reason.as_deref(), Some("LOW_SCORE"));
    assert_eq!(result.band, None);
}

#[test]
fn test_assessment_with_bands() {
    let assessment = Assessment::new("thin", "Thin file")
        .with_rule(min_age().with_weight(0.0).disabled())
        .with_rule(
            RuleEntry::new("income", "monthly_income", Operator::Gte, 3000)
                .overlay()
                .with_weight(30.0),
        )
        .with_band(ScoreBand::new("gold", 25.0, Decision::Approve))
        .with_band(ScoreBand::new("silver", 0.0, Decision::Refer));

    let result = assessment.evaluate(&applicant());
    assert_eq!(result.decision, Decision::Approve);
    assert_eq!(result.band.as_deref(), Some("gold"));

    let result = assessment.evaluate(&applicant().with("monthly_income", 2000));
    assert_eq!(result.decision, Decision::Decline);
    assert_eq!(result.primary_reason.as_deref(), Some(SCORE_BELOW_CUTOFF));
}

#[test]
fn test_assessment_rules_only() {
    let assessment = Assessment::new("std", "Standard").with_rule(min_score());
    let result = assessment.evaluate(&applicant());
    assert_eq!(result.decision, Decision::Decline);
    assert_eq!(result.band, None);
    assert_eq!(result.score, None);
}

#[test]
fn test_select_band() {
    let bands = vec![
        ScoreBand::new("low", 0.0, Decision::Refer),
        ScoreBand::new("high", 70.0, Decision::Approve),
    ];
    assert_eq!(select_band(&bands, 70.0).unwrap().name, "high");
    assert_eq!(select_band(&bands, 69.9).unwrap().name, "low");
    assert!(select_band(&bands, -1.0).is_none());
}
