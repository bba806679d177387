//! Tree lifecycle and decision operations over storage.
//!
//! Each operation takes a params struct and returns a serializable result,
//! so the MCP handlers can call it directly.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::catalog::AttributeCatalog;
use crate::config::{Config, ValidationConfig};
use crate::engine::{DecisionEngine, TreeDecision};
use crate::error::{AppResult, StorageError, ToolError};
use crate::rules::ApplicationSnapshot;
use crate::storage::{SqliteStorage, Storage, TreeSummary};
use crate::strategy::{EvaluationResult, Strategy};
use crate::tree::{
    route, to_graph, DecisionTree, EditIntent, EditOutcome, RouteResult, TreeEditor, TreeNode,
    TreeStatus, TreeValidator, ValidationResult,
};

/// Input for creating a tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeCreateParams {
    pub product_id: String,
    pub name: String,
    /// Initial node records.
    #[serde(default)]
    pub nodes: Vec<TreeNode>,
}

/// Identifies one tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeIdParams {
    pub tree_id: String,
}

/// Selects a tree by id, or the active tree of a product.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TreeSelector {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tree_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_id: Option<String>,
}

/// Input for listing trees.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TreeListParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_id: Option<String>,
}

/// Input for replacing a tree's node set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeSaveParams {
    pub tree_id: String,
    pub nodes: Vec<TreeNode>,
}

/// Result of a save.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeSaveResult {
    pub tree_id: String,
    pub node_count: usize,
    pub validation: ValidationResult,
}

/// Input for applying edits to a tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeEditParams {
    pub tree_id: String,
    pub intents: Vec<EditIntent>,
    /// Persist the edited node set. Only drafts can be saved.
    #[serde(default)]
    pub save: bool,
}

/// Result of applying edits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeEditResult {
    pub tree_id: String,
    /// One outcome per intent, in order.
    pub outcomes: Vec<EditOutcome>,
    pub applied: usize,
    pub nodes: Vec<TreeNode>,
    pub saved: bool,
}

/// Input for validation: a stored tree or an unsaved node list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TreeValidateParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tree_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodes: Option<Vec<TreeNode>>,
}

/// Result of a status change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeStatusResult {
    pub tree_id: String,
    pub status: TreeStatus,
    /// Trees archived by an activation.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub archived: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationResult>,
}

/// Input for routing or deciding one application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationParams {
    #[serde(flatten)]
    pub tree: TreeSelector,
    pub application: ApplicationSnapshot,
}

/// Input for saving a strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategySaveParams {
    pub strategy: Strategy,
}

/// Result of saving a strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategySaveResult {
    pub strategy_id: String,
    pub validation: ValidationResult,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyIdParams {
    pub strategy_id: String,
}

/// Input for evaluating a strategy, or one of its assessments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyEvaluateParams {
    pub strategy_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assessment_id: Option<String>,
    pub application: ApplicationSnapshot,
}

/// Decision tree service
#[derive(Clone)]
pub struct DecisionService {
    storage: SqliteStorage,
    catalog: Arc<AttributeCatalog>,
    validation: ValidationConfig,
}

impl DecisionService {
    /// Create a new service
    pub fn new(storage: SqliteStorage, catalog: Arc<AttributeCatalog>, config: &Config) -> Self {
        Self {
            storage,
            catalog,
            validation: config.validation.clone(),
        }
    }

    pub fn catalog(&self) -> &AttributeCatalog {
        &self.catalog
    }

    fn validator(&self) -> TreeValidator {
        TreeValidator::new(&self.validation).with_catalog(Arc::clone(&self.catalog))
    }

    async fn load_tree(&self, tree_id: &str) -> AppResult<DecisionTree> {
        self.storage
            .get_tree(tree_id)
            .await?
            .ok_or_else(|| {
                StorageError::TreeNotFound {
                    tree_id: tree_id.to_string(),
                }
                .into()
            })
    }

    async fn select_tree(&self, selector: &TreeSelector) -> AppResult<DecisionTree> {
        match (&selector.tree_id, &selector.product_id) {
            (Some(id), _) => self.load_tree(id).await,
            (None, Some(product_id)) => self
                .storage
                .get_active_tree(product_id)
                .await?
                .ok_or_else(|| {
                    ToolError::Validation {
                        field: "product_id".to_string(),
                        reason: format!("Product {} has no active tree", product_id),
                    }
                    .into()
                }),
            (None, None) => Err(ToolError::Validation {
                field: "tree_id".to_string(),
                reason: "Either tree_id or product_id is required".to_string(),
            }
            .into()),
        }
    }

    fn require_status(tree: &DecisionTree, status: TreeStatus, reason: &str) -> AppResult<()> {
        if tree.status == status {
            return Ok(());
        }
        Err(ToolError::Lifecycle {
            tree_id: tree.id.clone(),
            status: tree.status.to_string(),
            reason: reason.to_string(),
        }
        .into())
    }

    /// Create a draft tree.
    pub async fn create_tree(&self, params: TreeCreateParams) -> AppResult<DecisionTree> {
        for (field, value) in [("product_id", &params.product_id), ("name", &params.name)] {
            if value.trim().is_empty() {
                return Err(ToolError::Validation {
                    field: field.to_string(),
                    reason: format!("{} cannot be empty", field),
                }
                .into());
            }
        }

        let tree = DecisionTree::new(params.product_id, params.name).with_nodes(params.nodes);
        self.storage.create_tree(&tree).await?;

        info!(
            tree_id = %tree.id,
            product_id = %tree.product_id,
            nodes = tree.nodes.len(),
            "Tree created"
        );
        Ok(tree)
    }

    pub async fn get_tree(&self, params: TreeSelector) -> AppResult<DecisionTree> {
        self.select_tree(&params).await
    }

    pub async fn list_trees(&self, params: TreeListParams) -> AppResult<Vec<TreeSummary>> {
        Ok(self.storage.list_trees(params.product_id.as_deref()).await?)
    }

    /// Replace a draft tree's nodes and report their validation.
    pub async fn save_tree(&self, params: TreeSaveParams) -> AppResult<TreeSaveResult> {
        let tree = self.load_tree(&params.tree_id).await?;
        Self::require_status(&tree, TreeStatus::Draft, "only draft trees can be saved")?;

        self.storage
            .replace_tree_nodes(&tree.id, &params.nodes)
            .await?;
        let validation = self.validator().validate_nodes(&params.nodes);

        info!(
            tree_id = %tree.id,
            nodes = params.nodes.len(),
            valid = validation.valid,
            "Tree saved"
        );
        Ok(TreeSaveResult {
            tree_id: tree.id,
            node_count: params.nodes.len(),
            validation,
        })
    }

    /// Apply edit intents to a stored tree, optionally saving the result.
    pub async fn edit_tree(&self, params: TreeEditParams) -> AppResult<TreeEditResult> {
        let tree = self.load_tree(&params.tree_id).await?;
        if params.save {
            Self::require_status(&tree, TreeStatus::Draft, "only draft trees can be saved")?;
        }

        let mut editor = TreeEditor::new(tree.graph(), Arc::clone(&self.catalog));
        let outcomes = editor.apply_all(params.intents);
        let applied = outcomes.iter().filter(|o| o.is_applied()).count();
        let nodes = editor.persisted();

        if params.save {
            if let Some(key) = editor.graph().shared_targets().first() {
                warn!(tree_id = %tree.id, node_key = %key, "Save refused: node has two parents");
                return Err(ToolError::Validation {
                    field: "intents".to_string(),
                    reason: format!(
                        "node '{}' would have more than one parent; disconnect one edge before saving",
                        key
                    ),
                }
                .into());
            }
            self.storage.replace_tree_nodes(&tree.id, &nodes).await?;
        }

        debug!(
            tree_id = %tree.id,
            intents = outcomes.len(),
            applied = applied,
            saved = params.save,
            "Edits applied"
        );
        Ok(TreeEditResult {
            tree_id: tree.id,
            outcomes,
            applied,
            nodes,
            saved: params.save,
        })
    }

    pub async fn validate_tree(&self, params: TreeValidateParams) -> AppResult<ValidationResult> {
        let (label, nodes) = match (params.tree_id, params.nodes) {
            (_, Some(nodes)) => ("inline".to_string(), nodes),
            (Some(id), None) => {
                let tree = self.load_tree(&id).await?;
                (tree.id, tree.nodes)
            }
            (None, None) => {
                return Err(ToolError::Validation {
                    field: "tree_id".to_string(),
                    reason: "Either tree_id or nodes is required".to_string(),
                }
                .into())
            }
        };

        let result = self.validator().validate_nodes(&nodes);
        info!(
            tree = %label,
            valid = result.valid,
            errors = result.errors.len(),
            warnings = result.warnings.len(),
            "Tree validated"
        );
        Ok(result)
    }

    /// Activate a valid draft, archiving the product's active tree.
    pub async fn activate_tree(&self, params: TreeIdParams) -> AppResult<TreeStatusResult> {
        let tree = self.load_tree(&params.tree_id).await?;
        Self::require_status(&tree, TreeStatus::Draft, "only draft trees can be activated")?;

        let validation = self.validator().validate_nodes(&tree.nodes);
        if !validation.valid {
            warn!(
                tree_id = %tree.id,
                errors = validation.errors.len(),
                "Activation refused"
            );
            return Err(ToolError::TreeInvalid {
                tree_id: tree.id,
                error_count: validation.errors.len(),
            }
            .into());
        }

        let archived = self.storage.activate_tree(&tree.id).await?;
        Ok(TreeStatusResult {
            tree_id: tree.id,
            status: TreeStatus::Active,
            archived,
            validation: Some(validation),
        })
    }

    pub async fn archive_tree(&self, params: TreeIdParams) -> AppResult<TreeStatusResult> {
        let tree = self.load_tree(&params.tree_id).await?;
        Self::require_status(&tree, TreeStatus::Active, "only active trees can be archived")?;

        self.storage
            .update_tree_status(&tree.id, TreeStatus::Archived)
            .await?;
        info!(tree_id = %tree.id, "Tree archived");

        Ok(TreeStatusResult {
            tree_id: tree.id,
            status: TreeStatus::Archived,
            archived: Vec::new(),
            validation: None,
        })
    }

    /// Copy a tree into a new draft with the next version number.
    pub async fn new_version(&self, params: TreeIdParams) -> AppResult<DecisionTree> {
        let tree = self.load_tree(&params.tree_id).await?;
        let next = tree.next_version();
        self.storage.create_tree(&next).await?;

        info!(
            tree_id = %next.id,
            from = %tree.id,
            version = next.version,
            "Tree version created"
        );
        Ok(next)
    }

    pub async fn route(&self, params: ApplicationParams) -> AppResult<RouteResult> {
        let tree = self.select_tree(&params.tree).await?;
        route(&to_graph(&tree.nodes), &params.application).map_err(|e| {
            ToolError::Decision {
                message: e.to_string(),
            }
            .into()
        })
    }

    /// Route an application and evaluate the terminal it reaches.
    pub async fn decide(&self, params: ApplicationParams) -> AppResult<TreeDecision> {
        let tree = self.select_tree(&params.tree).await?;
        let engine = DecisionEngine::new(self.storage.list_strategies().await?);

        let decision = engine
            .decide(&tree.graph(), &params.application)
            .map_err(|e| ToolError::Decision {
                message: e.to_string(),
            })?;

        info!(
            tree_id = %tree.id,
            terminal = %decision.terminal_node,
            decision = %decision.result.decision,
            "Decision made"
        );
        Ok(decision)
    }

    /// Save a strategy after checking its rule lists.
    pub async fn save_strategy(&self, params: StrategySaveParams) -> AppResult<StrategySaveResult> {
        let mut strategy = params.strategy;
        if strategy.id.trim().is_empty() {
            return Err(ToolError::Validation {
                field: "strategy.id".to_string(),
                reason: "Strategy id cannot be empty".to_string(),
            }
            .into());
        }

        let validation = strategy.validate();
        if !validation.valid {
            let reasons: Vec<_> = validation.errors.iter().map(|i| i.message.as_str()).collect();
            return Err(ToolError::Validation {
                field: "strategy".to_string(),
                reason: reasons.join("; "),
            }
            .into());
        }

        if let Some(existing) = self.storage.get_strategy(&strategy.id).await? {
            strategy.created_at = existing.created_at;
        }
        strategy.updated_at = chrono::Utc::now();
        self.storage.save_strategy(&strategy).await?;

        info!(
            strategy_id = %strategy.id,
            mode = %strategy.evaluation_mode,
            "Strategy saved"
        );
        Ok(StrategySaveResult {
            strategy_id: strategy.id,
            validation,
        })
    }

    async fn load_strategy(&self, strategy_id: &str) -> AppResult<Strategy> {
        self.storage
            .get_strategy(strategy_id)
            .await?
            .ok_or_else(|| {
                StorageError::StrategyNotFound {
                    strategy_id: strategy_id.to_string(),
                }
                .into()
            })
    }

    pub async fn get_strategy(&self, params: StrategyIdParams) -> AppResult<Strategy> {
        self.load_strategy(&params.strategy_id).await
    }

    pub async fn list_strategies(&self) -> AppResult<Vec<Strategy>> {
        Ok(self.storage.list_strategies().await?)
    }

    pub async fn evaluate_strategy(
        &self,
        params: StrategyEvaluateParams,
    ) -> AppResult<EvaluationResult> {
        let strategy = self.load_strategy(&params.strategy_id).await?;

        match params.assessment_id {
            Some(id) => {
                let assessment = strategy.assessment(&id).ok_or_else(|| ToolError::Validation {
                    field: "assessment_id".to_string(),
                    reason: format!("Strategy {} has no assessment {}", strategy.id, id),
                })?;
                Ok(assessment.evaluate(&params.application))
            }
            None => Ok(strategy.evaluate(&params.application)),
        }
    }
}

#[cfg(test)]
#[path = "service_tests.rs"]
mod service_tests;
