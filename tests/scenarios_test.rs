//! End-to-end scenarios over the public API: tree validation, editing,
//! rule evaluation and decisions.

use std::sync::Arc;

use serde_json::json;

use mcp_decision_tree::catalog::AttributeCatalog;
use mcp_decision_tree::engine::DecisionEngine;
use mcp_decision_tree::rules::{ApplicationSnapshot, Operator, RuleEntry, RuleVerdict, SkipReason};
use mcp_decision_tree::strategy::{Assessment, Decision, EvaluationMode, Strategy};
use mcp_decision_tree::tree::{
    to_graph, BranchDef, ConditionKind, EditIntent, EditOutcome, EditRefusal, IssueCode,
    TreeEditor, TreeNode, TreeValidator,
};

/// Existing customers go to strategy A; new customers split on bureau file.
fn simple_binary_tree() -> Vec<TreeNode> {
    vec![
        TreeNode::condition("is_existing_customer", "is_existing_customer", ConditionKind::Binary)
            .with_branch("Yes", BranchDef::binary(true))
            .with_branch("No", BranchDef::binary(false))
            .as_root(),
        TreeNode::strategy("strategyA", "strategy-a").with_parent("is_existing_customer", Some("Yes")),
        TreeNode::condition("bureau_file_status", "bureau_file_status", ConditionKind::Categorical)
            .with_branch("thin", BranchDef::categorical(["thin"]))
            .with_branch("standard", BranchDef::categorical(["standard"]))
            .with_branch("thick", BranchDef::categorical(["thick"]))
            .with_parent("is_existing_customer", Some("No")),
        TreeNode::assessment("assessment1", "assess-thin")
            .with_parent("bureau_file_status", Some("thin")),
        TreeNode::assessment("assessment2", "assess-standard")
            .with_parent("bureau_file_status", Some("standard")),
        TreeNode::assessment("assessment3", "assess-thick")
            .with_parent("bureau_file_status", Some("thick")),
    ]
}

fn catalog() -> Arc<AttributeCatalog> {
    Arc::new(AttributeCatalog::builtin())
}

fn validator() -> TreeValidator {
    TreeValidator::default().with_catalog(catalog())
}

mod tree_scenarios {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_simple_binary_tree_is_clean() {
        let result = validator().validate_nodes(&simple_binary_tree());

        assert!(result.valid);
        assert!(result.errors.is_empty());
        assert!(result.warnings.is_empty());
        assert_eq!(result.stats["node_count"], 6);
        assert_eq!(result.stats["edge_count"], 5);
    }

    #[test]
    fn test_deleting_thick_edge_leaves_unmapped_branch() {
        let mut editor = TreeEditor::new(to_graph(&simple_binary_tree()), catalog());
        let outcome = editor.apply(EditIntent::RemoveNode {
            key: "assessment3".into(),
        });
        assert_eq!(outcome, EditOutcome::Applied);
        assert!(editor.graph().edge("bureau_file_status", "assessment3").is_none());

        let result = validator().validate(editor.graph());
        assert!(result.valid);
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(result.warnings[0].code, IssueCode::UnmappedBranch);
        assert_eq!(result.warnings[0].node_key.as_deref(), Some("bureau_file_status"));
        assert_eq!(result.warnings[0].branch.as_deref(), Some("thick"));
    }

    #[test]
    fn test_edge_back_to_parent_is_a_cycle() {
        let mut editor = TreeEditor::new(to_graph(&simple_binary_tree()), catalog());
        let outcome = editor.apply(EditIntent::Connect {
            source: "assessment2".into(),
            target: "bureau_file_status".into(),
        });
        assert!(outcome.is_applied());

        let result = validator().validate(editor.graph());
        assert!(!result.valid);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].code, IssueCode::CycleDetected);
    }

    #[test]
    fn test_exhausted_branches_refuse_new_edges() {
        let mut nodes = simple_binary_tree();
        nodes.push(TreeNode::assessment("assessment4", "assess-extra"));
        let mut editor = TreeEditor::new(to_graph(&nodes), catalog());

        let before = editor.graph().clone();
        let outcome = editor.apply(EditIntent::Connect {
            source: "bureau_file_status".into(),
            target: "assessment4".into(),
        });

        assert_eq!(
            outcome,
            EditOutcome::Refused(EditRefusal::BranchesExhausted {
                node_key: "bureau_file_status".into()
            })
        );
        assert_eq!(editor.graph(), &before);
    }

    #[test]
    fn test_relabel_swaps_instead_of_duplicating() {
        let mut editor = TreeEditor::new(to_graph(&simple_binary_tree()), catalog());
        let outcome = editor.apply(EditIntent::Relabel {
            source: "bureau_file_status".into(),
            target: "assessment1".into(),
            label: Some("thick".into()),
        });
        assert!(outcome.is_applied());

        let graph = editor.graph();
        let thin_target = graph.edge("bureau_file_status", "assessment1").unwrap();
        let old_thick = graph.edge("bureau_file_status", "assessment3").unwrap();
        assert_eq!(thin_target.label.as_deref(), Some("thick"));
        assert_eq!(old_thick.label, None);

        let mut labels: Vec<_> = graph
            .outgoing("bureau_file_status")
            .filter_map(|e| e.label.as_deref())
            .collect();
        labels.sort();
        assert_eq!(labels, vec!["standard", "thick"]);
    }

    #[test]
    fn test_validation_passes_imply_single_reachable_root() {
        let nodes = simple_binary_tree();
        let graph = to_graph(&nodes);
        let result = validator().validate(&graph);
        assert!(result.valid);
        assert_eq!(graph.roots().len(), 1);
        assert!(!result.has_code(IssueCode::OrphanedNode));
    }
}

mod rule_scenarios {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_between_operator() {
        let rule: RuleEntry = serde_json::from_value(json!({
            "ruleId": "dti_band",
            "field": "dti_ratio",
            "operator": "between",
            "threshold": { "min": 0, "max": 0.4 }
        }))
        .unwrap();

        let ok = ApplicationSnapshot::default().with("dti_ratio", 0.35);
        let high = ApplicationSnapshot::default().with("dti_ratio", 0.55);
        assert_eq!(rule.evaluate(&ok), RuleVerdict::Pass);
        assert_eq!(rule.evaluate(&high), RuleVerdict::Fail);
    }

    #[test]
    fn test_fail_open_and_fail_closed() {
        let app = ApplicationSnapshot::default().with("age", 30);
        let rule = RuleEntry::new("min_score", "credit_score", Operator::Gte, 600);

        assert_eq!(
            rule.evaluate(&app),
            RuleVerdict::Skip(SkipReason::MissingField)
        );
        assert_eq!(rule.clone().fail_on_null().evaluate(&app), RuleVerdict::Fail);
    }

    #[test]
    fn test_verdict_is_order_invariant_but_reason_is_not() {
        let low_score = RuleEntry::new("min_score", "credit_score", Operator::Gte, 600)
            .with_reason("LOW_SCORE");
        let bankrupt = RuleEntry::new("no_bankruptcy", "has_bankruptcy", Operator::Eq, false)
            .with_reason("BANKRUPTCY");
        let app = ApplicationSnapshot::default()
            .with("credit_score", 540)
            .with("has_bankruptcy", true);

        let forward = Strategy::new("s", "S", EvaluationMode::Sequential)
            .with_knock_out(low_score.clone())
            .with_knock_out(bankrupt.clone())
            .evaluate(&app);
        let reversed = Strategy::new("s", "S", EvaluationMode::Sequential)
            .with_knock_out(bankrupt)
            .with_knock_out(low_score)
            .evaluate(&app);

        assert_eq!(forward.decision, Decision::Decline);
        assert_eq!(reversed.decision, Decision::Decline);
        assert_eq!(forward.primary_reason.as_deref(), Some("LOW_SCORE"));
        assert_eq!(reversed.primary_reason.as_deref(), Some("BANKRUPTCY"));
    }
}

mod decision_scenarios {
    use super::*;
    use pretty_assertions::assert_eq;

    fn engine() -> DecisionEngine {
        DecisionEngine::new([
            Strategy::new("strategy-a", "Existing customers", EvaluationMode::Sequential)
                .with_knock_out(RuleEntry::new("min_score", "credit_score", Operator::Gte, 580)),
            Strategy::new("strategy-b", "New customers", EvaluationMode::Sequential)
                .with_assessment(Assessment::new("assess-thin", "Thin").with_rule(
                    RuleEntry::new("min_income", "monthly_income", Operator::Gte, 5000),
                ))
                .with_assessment(Assessment::new("assess-standard", "Standard").with_rule(
                    RuleEntry::new("min_score", "credit_score", Operator::Gte, 640),
                ))
                .with_assessment(Assessment::new("assess-thick", "Thick").with_rule(
                    RuleEntry::new("min_score", "credit_score", Operator::Gte, 600),
                )),
        ])
    }

    #[test]
    fn test_new_customer_with_standard_file() {
        let app = ApplicationSnapshot::default()
            .with("is_existing_customer", false)
            .with("bureau_file_status", "standard")
            .with("credit_score", 650);

        let decision = engine()
            .decide(&to_graph(&simple_binary_tree()), &app)
            .unwrap();
        assert_eq!(decision.terminal_node, "assessment2");
        assert_eq!(decision.strategy_id, "strategy-b");
        assert_eq!(decision.result.decision, Decision::Approve);

        let path: Vec<_> = decision.path.iter().map(|s| s.node_key.as_str()).collect();
        assert_eq!(path, vec!["is_existing_customer", "bureau_file_status"]);
    }

    #[test]
    fn test_existing_customer_declined() {
        let app = ApplicationSnapshot::default()
            .with("is_existing_customer", true)
            .with("credit_score", 500);

        let decision = engine()
            .decide(&to_graph(&simple_binary_tree()), &app)
            .unwrap();
        assert_eq!(decision.terminal_node, "strategyA");
        assert_eq!(decision.result.decision, Decision::Decline);
        assert_eq!(decision.result.primary_reason.as_deref(), Some("MIN_SCORE"));
    }
}
