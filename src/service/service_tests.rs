use super::*;
use crate::config::{CatalogConfig, DatabaseConfig, LoggingConfig};
use crate::rules::{Operator, RuleEntry};
use crate::strategy::{Assessment, Decision, EvaluationMode};
use crate::tree::{BranchDef, ConditionKind};
use pretty_assertions::assert_eq;
use std::path::PathBuf;

fn test_config() -> Config {
    Config {
        database: DatabaseConfig {
            path: PathBuf::from(":memory:"),
            max_connections: 1,
        },
        logging: LoggingConfig::default(),
        catalog: CatalogConfig::default(),
        validation: ValidationConfig::default(),
    }
}

async fn service() -> DecisionService {
    let storage = SqliteStorage::new_in_memory().await.unwrap();
    DecisionService::new(
        storage,
        Arc::new(AttributeCatalog::builtin()),
        &test_config(),
    )
}

fn nodes() -> Vec<TreeNode> {
    vec![
        TreeNode::condition("root", "is_existing_customer", ConditionKind::Binary)
            .with_branch("Yes", BranchDef::binary(true))
            .with_branch("No", BranchDef::binary(false))
            .as_root(),
        TreeNode::strategy("existing", "returning").with_parent("root", Some("Yes")),
        TreeNode::condition("bureau", "bureau_file_status", ConditionKind::Categorical)
            .with_branch("thin", BranchDef::categorical(["thin"]))
            .with_branch("full", BranchDef::categorical(["standard", "thick"]))
            .with_parent("root", Some("No")),
        TreeNode::assessment("thin_file", "assess-thin").with_parent("bureau", Some("thin")),
        TreeNode::assessment("full_file", "assess-full").with_parent("bureau", Some("full")),
    ]
}

async fn create(service: &DecisionService) -> DecisionTree {
    service
        .create_tree(TreeCreateParams {
            product_id: "personal-loan".into(),
            name: "Personal loan routing".into(),
            nodes: nodes(),
        })
        .await
        .unwrap()
}

fn selector(tree_id: &str) -> TreeSelector {
    TreeSelector {
        tree_id: Some(tree_id.to_string()),
        product_id: None,
    }
}

#[tokio::test]
async fn test_create_and_get_tree() {
    let service = service().await;
    let tree = create(&service).await;

    let loaded = service.get_tree(selector(&tree.id)).await.unwrap();
    assert_eq!(loaded.status, TreeStatus::Draft);
    assert_eq!(loaded.version, 1);
    assert_eq!(loaded.nodes, nodes());

    let listed = service.list_trees(TreeListParams::default()).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].node_count, 5);
}

#[tokio::test]
async fn test_create_rejects_blank_name() {
    let service = service().await;
    let err = service
        .create_tree(TreeCreateParams {
            product_id: "p".into(),
            name: "  ".into(),
            nodes: vec![],
        })
        .await
        .unwrap_err();
    assert!(err.to_string().contains("name"));
}

#[tokio::test]
async fn test_activation_lifecycle() {
    let service = service().await;
    let first = create(&service).await;

    let activated = service
        .activate_tree(TreeIdParams {
            tree_id: first.id.clone(),
        })
        .await
        .unwrap();
    assert_eq!(activated.status, TreeStatus::Active);
    assert!(activated.archived.is_empty());

    let err = service
        .save_tree(TreeSaveParams {
            tree_id: first.id.clone(),
            nodes: vec![],
        })
        .await
        .unwrap_err();
    assert!(err.to_string().contains("only draft trees can be saved"));

    let second = service
        .new_version(TreeIdParams {
            tree_id: first.id.clone(),
        })
        .await
        .unwrap();
    assert_eq!(second.version, 2);
    assert_eq!(second.status, TreeStatus::Draft);
    assert_eq!(second.nodes, first.nodes);

    let activated = service
        .activate_tree(TreeIdParams {
            tree_id: second.id.clone(),
        })
        .await
        .unwrap();
    assert_eq!(activated.archived, vec![first.id.clone()]);

    let current = service
        .get_tree(TreeSelector {
            tree_id: None,
            product_id: Some("personal-loan".into()),
        })
        .await
        .unwrap();
    assert_eq!(current.id, second.id);

    let old = service.get_tree(selector(&first.id)).await.unwrap();
    assert_eq!(old.status, TreeStatus::Archived);
}

#[tokio::test]
async fn test_invalid_tree_cannot_be_activated() {
    let service = service().await;
    let tree = service
        .create_tree(TreeCreateParams {
            product_id: "p".into(),
            name: "empty".into(),
            nodes: vec![],
        })
        .await
        .unwrap();

    let err = service
        .activate_tree(TreeIdParams {
            tree_id: tree.id.clone(),
        })
        .await
        .unwrap_err();
    assert!(err.to_string().contains("failed validation"));

    let stored = service.get_tree(selector(&tree.id)).await.unwrap();
    assert_eq!(stored.status, TreeStatus::Draft);
}

#[tokio::test]
async fn test_archive_requires_active_tree() {
    let service = service().await;
    let tree = create(&service).await;

    let err = service
        .archive_tree(TreeIdParams {
            tree_id: tree.id.clone(),
        })
        .await
        .unwrap_err();
    assert!(err.to_string().contains("only active trees can be archived"));

    service
        .activate_tree(TreeIdParams {
            tree_id: tree.id.clone(),
        })
        .await
        .unwrap();
    let archived = service
        .archive_tree(TreeIdParams {
            tree_id: tree.id.clone(),
        })
        .await
        .unwrap();
    assert_eq!(archived.status, TreeStatus::Archived);
}

#[tokio::test]
async fn test_save_reports_validation() {
    let service = service().await;
    let tree = create(&service).await;

    let mut edited = nodes();
    edited.retain(|n| n.node_key != "full_file");
    let result = service
        .save_tree(TreeSaveParams {
            tree_id: tree.id.clone(),
            nodes: edited,
        })
        .await
        .unwrap();

    assert_eq!(result.node_count, 4);
    assert!(result.validation.valid);
    assert_eq!(result.validation.warnings.len(), 1);

    let stored = service.get_tree(selector(&tree.id)).await.unwrap();
    assert_eq!(stored.nodes.len(), 4);
}

#[tokio::test]
async fn test_edit_preview_and_save() {
    let service = service().await;
    let tree = create(&service).await;

    let intents = vec![
        EditIntent::Disconnect {
            source: "bureau".into(),
            target: "full_file".into(),
        },
        EditIntent::Connect {
            source: "bureau".into(),
            target: "thin_file".into(),
        },
    ];

    let preview = service
        .edit_tree(TreeEditParams {
            tree_id: tree.id.clone(),
            intents: intents.clone(),
            save: false,
        })
        .await
        .unwrap();
    assert_eq!(preview.applied, 1);
    assert!(preview.outcomes[0].is_applied());
    assert!(!preview.outcomes[1].is_applied());
    assert!(!preview.saved);

    let stored = service.get_tree(selector(&tree.id)).await.unwrap();
    assert_eq!(stored.nodes, nodes());

    let saved = service
        .edit_tree(TreeEditParams {
            tree_id: tree.id.clone(),
            intents,
            save: true,
        })
        .await
        .unwrap();
    assert!(saved.saved);
    let stored = service.get_tree(selector(&tree.id)).await.unwrap();
    let full_file = stored
        .nodes
        .iter()
        .find(|n| n.node_key == "full_file")
        .unwrap();
    assert_eq!(full_file.parent_edge, None);
}

#[tokio::test]
async fn test_save_refuses_node_with_two_parents() {
    let service = service().await;
    let tree = create(&service).await;

    let intents = vec![EditIntent::Connect {
        source: "thin_file".into(),
        target: "full_file".into(),
    }];

    let preview = service
        .edit_tree(TreeEditParams {
            tree_id: tree.id.clone(),
            intents: intents.clone(),
            save: false,
        })
        .await
        .unwrap();
    assert_eq!(preview.applied, 1);

    let err = service
        .edit_tree(TreeEditParams {
            tree_id: tree.id.clone(),
            intents,
            save: true,
        })
        .await
        .unwrap_err();
    assert!(err.to_string().contains("'full_file' would have more than one parent"));

    let stored = service.get_tree(selector(&tree.id)).await.unwrap();
    assert_eq!(stored.nodes, nodes());
}

#[tokio::test]
async fn test_validate_inline_nodes() {
    let service = service().await;
    let result = service
        .validate_tree(TreeValidateParams {
            tree_id: None,
            nodes: Some(nodes()),
        })
        .await
        .unwrap();
    assert!(result.valid);
    assert_eq!(result.stats["node_count"], 5);

    let err = service
        .validate_tree(TreeValidateParams::default())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("tree_id"));
}

fn strategies() -> Vec<Strategy> {
    vec![
        Strategy::new("returning", "Returning customers", EvaluationMode::Sequential)
            .with_knock_out(
                RuleEntry::new("min_score", "credit_score", Operator::Gte, 550)
                    .with_reason("LOW_SCORE"),
            ),
        Strategy::new("new", "New customers", EvaluationMode::Sequential)
            .with_assessment(
                Assessment::new("assess-thin", "Thin file").with_rule(
                    RuleEntry::new("min_income", "monthly_income", Operator::Gte, 4000)
                        .with_reason("LOW_INCOME"),
                ),
            )
            .with_assessment(Assessment::new("assess-full", "Full file").with_rule(
                RuleEntry::new("min_score", "credit_score", Operator::Gte, 620),
            )),
    ]
}

#[tokio::test]
async fn test_decision_through_active_tree() {
    let service = service().await;
    for strategy in strategies() {
        service
            .save_strategy(StrategySaveParams { strategy })
            .await
            .unwrap();
    }
    let tree = create(&service).await;
    service
        .activate_tree(TreeIdParams { tree_id: tree.id })
        .await
        .unwrap();

    let params = |app: ApplicationSnapshot| ApplicationParams {
        tree: TreeSelector {
            tree_id: None,
            product_id: Some("personal-loan".into()),
        },
        application: app,
    };

    let thin = ApplicationSnapshot::default()
        .with("is_existing_customer", false)
        .with("bureau_file_status", "thin")
        .with("monthly_income", 3000);
    let decision = service.decide(params(thin)).await.unwrap();
    assert_eq!(decision.terminal_node, "thin_file");
    assert_eq!(decision.strategy_id, "new");
    assert_eq!(decision.result.decision, Decision::Decline);
    assert_eq!(decision.result.primary_reason.as_deref(), Some("LOW_INCOME"));

    let returning = ApplicationSnapshot::default()
        .with("is_existing_customer", true)
        .with("credit_score", 700);
    let decision = service.decide(params(returning.clone())).await.unwrap();
    assert_eq!(decision.result.decision, Decision::Approve);

    let routed = service.route(params(returning)).await.unwrap();
    assert_eq!(routed.terminal_node, "existing");

    let err = service
        .decide(params(ApplicationSnapshot::default()))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("no null branch"));
}

#[tokio::test]
async fn test_strategy_save_and_evaluate() {
    let service = service().await;
    let [returning, new]: [Strategy; 2] = strategies().try_into().unwrap();
    service
        .save_strategy(StrategySaveParams { strategy: returning })
        .await
        .unwrap();
    service
        .save_strategy(StrategySaveParams { strategy: new })
        .await
        .unwrap();

    let loaded = service
        .get_strategy(StrategyIdParams {
            strategy_id: "new".into(),
        })
        .await
        .unwrap();
    assert_eq!(loaded.assessments.len(), 2);
    assert_eq!(service.list_strategies().await.unwrap().len(), 2);

    let app = ApplicationSnapshot::default().with("credit_score", 600);
    let result = service
        .evaluate_strategy(StrategyEvaluateParams {
            strategy_id: "new".into(),
            assessment_id: Some("assess-full".into()),
            application: app.clone(),
        })
        .await
        .unwrap();
    assert_eq!(result.decision, Decision::Decline);

    let err = service
        .evaluate_strategy(StrategyEvaluateParams {
            strategy_id: "new".into(),
            assessment_id: Some("missing".into()),
            application: app,
        })
        .await
        .unwrap_err();
    assert!(err.to_string().contains("no assessment missing"));
}

#[tokio::test]
async fn test_invalid_strategy_is_refused() {
    let service = service().await;
    let strategy = Strategy::new("dup", "Duplicates", EvaluationMode::Sequential)
        .with_knock_out(RuleEntry::new("r1", "credit_score", Operator::Gte, 600))
        .with_knock_out(RuleEntry::new("r1", "age", Operator::Gte, 18));

    let err = service
        .save_strategy(StrategySaveParams { strategy })
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Validation failed"));

    let missing = service
        .get_strategy(StrategyIdParams {
            strategy_id: "dup".into(),
        })
        .await
        .unwrap_err();
    assert!(missing.to_string().contains("Strategy not found"));
}
