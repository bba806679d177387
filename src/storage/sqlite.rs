use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{Sqlite, Transaction};
use std::str::FromStr;
use tracing::{debug, info};

use super::{Storage, TreeSummary};
use crate::config::DatabaseConfig;
use crate::error::{StorageError, StorageResult};
use crate::strategy::Strategy;
use crate::tree::{
    ConditionKind, DecisionTree, LogicOp, NodeRecord, NodeType, TreeNode, TreeStatus,
};

/// Static migrator that embeds migrations at compile time
static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// SQLite-backed storage implementation
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Create a new SQLite storage instance
    pub async fn new(config: &DatabaseConfig) -> StorageResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = config.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::Connection {
                message: format!("Failed to create database directory: {}", e),
            })?;
        }

        let database_url = format!("sqlite://{}?mode=rwc", config.path.display());

        let options = SqliteConnectOptions::from_str(&database_url)
            .map_err(|e| StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            })?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to connect to database: {}", e),
            })?;

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    /// In-memory database, used by tests.
    ///
    /// Every pooled connection to `:memory:` opens its own database, so the
    /// pool is pinned to a single connection that never expires.
    pub async fn new_in_memory() -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            })?
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to open in-memory database: {}", e),
            })?;

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    /// Run database migrations using embedded sqlx migrations
    async fn run_migrations(&self) -> StorageResult<()> {
        info!("Running database migrations...");

        MIGRATOR.run(&self.pool).await.map_err(|e| StorageError::Migration {
            message: format!("Failed to run migrations: {}", e),
        })?;

        info!("Database migrations completed successfully");
        Ok(())
    }

    /// Get the underlying pool for advanced queries
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn load_nodes(&self, tree_id: &str) -> StorageResult<Vec<TreeNode>> {
        let rows: Vec<NodeRow> = sqlx::query_as(
            r#"
            SELECT node_key, node_type, label, condition_type, attribute, operator,
                   branches, null_branch, parent_node_key, branch_label, is_root,
                   scorecard_id, strategy_id, assessment_id, compound_conditions,
                   compound_logic
            FROM tree_nodes
            WHERE tree_id = ?
            ORDER BY position ASC
            "#,
        )
        .bind(tree_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let record = NodeRecord::try_from(row)?;
                TreeNode::try_from(record).map_err(|e| corrupt("tree_nodes", e))
            })
            .collect()
    }

    async fn load_tree(&self, row: TreeRow) -> StorageResult<DecisionTree> {
        let nodes = self.load_nodes(&row.id).await?;
        let mut tree = DecisionTree::try_from(row)?;
        tree.nodes = nodes;
        Ok(tree)
    }
}

fn corrupt(table: &str, message: impl std::fmt::Display) -> StorageError {
    StorageError::Corrupt {
        table: table.to_string(),
        message: message.to_string(),
    }
}

fn parse_timestamp(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn to_json_text(value: Option<&serde_json::Value>) -> StorageResult<Option<String>> {
    value
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| corrupt("tree_nodes", e))
}

async fn insert_nodes(
    tx: &mut Transaction<'_, Sqlite>,
    tree_id: &str,
    nodes: &[TreeNode],
) -> StorageResult<()> {
    for (position, node) in nodes.iter().enumerate() {
        let record = NodeRecord::from(node.clone());
        let branches = to_json_text(record.branches.as_ref())?;
        let compound_conditions = to_json_text(record.compound_conditions.as_ref())?;

        sqlx::query(
            r#"
            INSERT INTO tree_nodes (
                tree_id, position, node_key, node_type, label, condition_type,
                attribute, operator, branches, null_branch, parent_node_key,
                branch_label, is_root, scorecard_id, strategy_id, assessment_id,
                compound_conditions, compound_logic
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(tree_id)
        .bind(position as i64)
        .bind(&record.node_key)
        .bind(record.node_type.as_str())
        .bind(&record.label)
        .bind(record.condition_type.map(|c| c.as_str()))
        .bind(&record.attribute)
        .bind(&record.operator)
        .bind(&branches)
        .bind(&record.null_branch)
        .bind(&record.parent_node_key)
        .bind(&record.branch_label)
        .bind(record.is_root)
        .bind(&record.scorecard_id)
        .bind(&record.strategy_id)
        .bind(&record.assessment_id)
        .bind(&compound_conditions)
        .bind(record.compound_logic.map(|l| l.as_str()))
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn create_tree(&self, tree: &DecisionTree) -> StorageResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO decision_trees (id, product_id, name, status, version, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&tree.id)
        .bind(&tree.product_id)
        .bind(&tree.name)
        .bind(tree.status.to_string())
        .bind(tree.version)
        .bind(tree.created_at.to_rfc3339())
        .bind(tree.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        insert_nodes(&mut tx, &tree.id, &tree.nodes).await?;
        tx.commit().await?;

        debug!(tree_id = %tree.id, nodes = tree.nodes.len(), "Tree created");
        Ok(())
    }

    async fn get_tree(&self, id: &str) -> StorageResult<Option<DecisionTree>> {
        let row: Option<TreeRow> = sqlx::query_as(
            r#"
            SELECT id, product_id, name, status, version, created_at, updated_at
            FROM decision_trees
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(self.load_tree(row).await?)),
            None => Ok(None),
        }
    }

    async fn list_trees(&self, product_id: Option<&str>) -> StorageResult<Vec<TreeSummary>> {
        let rows: Vec<TreeSummaryRow> = sqlx::query_as(
            r#"
            SELECT t.id, t.product_id, t.name, t.status, t.version, t.created_at, t.updated_at,
                   (SELECT COUNT(*) FROM tree_nodes n WHERE n.tree_id = t.id) AS node_count
            FROM decision_trees t
            WHERE (? IS NULL OR t.product_id = ?)
            ORDER BY t.created_at DESC, t.version DESC
            "#,
        )
        .bind(product_id)
        .bind(product_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TreeSummary::try_from).collect()
    }

    async fn replace_tree_nodes(&self, tree_id: &str, nodes: &[TreeNode]) -> StorageResult<()> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query("UPDATE decision_trees SET updated_at = ? WHERE id = ?")
            .bind(Utc::now().to_rfc3339())
            .bind(tree_id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::TreeNotFound {
                tree_id: tree_id.to_string(),
            });
        }

        sqlx::query("DELETE FROM tree_nodes WHERE tree_id = ?")
            .bind(tree_id)
            .execute(&mut *tx)
            .await?;

        insert_nodes(&mut tx, tree_id, nodes).await?;
        tx.commit().await?;

        info!(tree_id = %tree_id, nodes = nodes.len(), "Tree nodes replaced");
        Ok(())
    }

    async fn update_tree_status(&self, tree_id: &str, status: TreeStatus) -> StorageResult<()> {
        let result = sqlx::query("UPDATE decision_trees SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.to_string())
            .bind(Utc::now().to_rfc3339())
            .bind(tree_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::TreeNotFound {
                tree_id: tree_id.to_string(),
            });
        }

        debug!(tree_id = %tree_id, status = %status, "Tree status updated");
        Ok(())
    }

    async fn activate_tree(&self, tree_id: &str) -> StorageResult<Vec<String>> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now().to_rfc3339();

        let product_id: Option<String> =
            sqlx::query_scalar("SELECT product_id FROM decision_trees WHERE id = ?")
                .bind(tree_id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some(product_id) = product_id else {
            return Err(StorageError::TreeNotFound {
                tree_id: tree_id.to_string(),
            });
        };

        let archived: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT id FROM decision_trees
            WHERE product_id = ? AND status = ? AND id != ?
            ORDER BY created_at ASC
            "#,
        )
        .bind(&product_id)
        .bind(TreeStatus::Active.to_string())
        .bind(tree_id)
        .fetch_all(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE decision_trees SET status = ?, updated_at = ?
            WHERE product_id = ? AND status = ? AND id != ?
            "#,
        )
        .bind(TreeStatus::Archived.to_string())
        .bind(&now)
        .bind(&product_id)
        .bind(TreeStatus::Active.to_string())
        .bind(tree_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE decision_trees SET status = ?, updated_at = ? WHERE id = ?")
            .bind(TreeStatus::Active.to_string())
            .bind(&now)
            .bind(tree_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        info!(
            tree_id = %tree_id,
            product_id = %product_id,
            archived = archived.len(),
            "Tree activated"
        );
        Ok(archived)
    }

    async fn get_active_tree(&self, product_id: &str) -> StorageResult<Option<DecisionTree>> {
        let row: Option<TreeRow> = sqlx::query_as(
            r#"
            SELECT id, product_id, name, status, version, created_at, updated_at
            FROM decision_trees
            WHERE product_id = ? AND status = ?
            ORDER BY updated_at DESC
            LIMIT 1
            "#,
        )
        .bind(product_id)
        .bind(TreeStatus::Active.to_string())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(self.load_tree(row).await?)),
            None => Ok(None),
        }
    }

    async fn delete_tree(&self, id: &str) -> StorageResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM tree_nodes WHERE tree_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM decision_trees WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::TreeNotFound {
                tree_id: id.to_string(),
            });
        }

        tx.commit().await?;
        Ok(())
    }

    async fn save_strategy(&self, strategy: &Strategy) -> StorageResult<()> {
        let payload = serde_json::to_string(strategy).map_err(|e| corrupt("strategies", e))?;

        sqlx::query(
            r#"
            INSERT INTO strategies (id, name, evaluation_mode, decision_tree_id, payload, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                evaluation_mode = excluded.evaluation_mode,
                decision_tree_id = excluded.decision_tree_id,
                payload = excluded.payload,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&strategy.id)
        .bind(&strategy.name)
        .bind(strategy.evaluation_mode.as_str())
        .bind(&strategy.decision_tree_id)
        .bind(&payload)
        .bind(strategy.created_at.to_rfc3339())
        .bind(strategy.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        debug!(strategy_id = %strategy.id, "Strategy saved");
        Ok(())
    }

    async fn get_strategy(&self, id: &str) -> StorageResult<Option<Strategy>> {
        let row: Option<StrategyRow> = sqlx::query_as(
            r#"
            SELECT id, payload, created_at, updated_at
            FROM strategies
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Strategy::try_from).transpose()
    }

    async fn list_strategies(&self) -> StorageResult<Vec<Strategy>> {
        let rows: Vec<StrategyRow> = sqlx::query_as(
            r#"
            SELECT id, payload, created_at, updated_at
            FROM strategies
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Strategy::try_from).collect()
    }

    async fn delete_strategy(&self, id: &str) -> StorageResult<()> {
        let result = sqlx::query("DELETE FROM strategies WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::StrategyNotFound {
                strategy_id: id.to_string(),
            });
        }
        Ok(())
    }
}

// Internal row types for SQLx mapping
#[derive(sqlx::FromRow)]
struct TreeRow {
    id: String,
    product_id: String,
    name: String,
    status: String,
    version: i64,
    created_at: String,
    updated_at: String,
}

impl TryFrom<TreeRow> for DecisionTree {
    type Error = StorageError;

    fn try_from(row: TreeRow) -> Result<Self, Self::Error> {
        Ok(Self {
            status: row
                .status
                .parse::<TreeStatus>()
                .map_err(|e| corrupt("decision_trees", e))?,
            id: row.id,
            product_id: row.product_id,
            name: row.name,
            version: row.version,
            nodes: Vec::new(),
            created_at: parse_timestamp(&row.created_at),
            updated_at: parse_timestamp(&row.updated_at),
        })
    }
}

#[derive(sqlx::FromRow)]
struct TreeSummaryRow {
    id: String,
    product_id: String,
    name: String,
    status: String,
    version: i64,
    node_count: i64,
    created_at: String,
    updated_at: String,
}

impl TryFrom<TreeSummaryRow> for TreeSummary {
    type Error = StorageError;

    fn try_from(row: TreeSummaryRow) -> Result<Self, Self::Error> {
        Ok(Self {
            status: row
                .status
                .parse::<TreeStatus>()
                .map_err(|e| corrupt("decision_trees", e))?,
            id: row.id,
            product_id: row.product_id,
            name: row.name,
            version: row.version,
            node_count: row.node_count,
            created_at: parse_timestamp(&row.created_at),
            updated_at: parse_timestamp(&row.updated_at),
        })
    }
}

#[derive(sqlx::FromRow)]
struct NodeRow {
    node_key: String,
    node_type: String,
    label: String,
    condition_type: Option<String>,
    attribute: Option<String>,
    operator: Option<String>,
    branches: Option<String>,
    null_branch: Option<String>,
    parent_node_key: Option<String>,
    branch_label: Option<String>,
    is_root: bool,
    scorecard_id: Option<String>,
    strategy_id: Option<String>,
    assessment_id: Option<String>,
    compound_conditions: Option<String>,
    compound_logic: Option<String>,
}

impl TryFrom<NodeRow> for NodeRecord {
    type Error = StorageError;

    fn try_from(row: NodeRow) -> Result<Self, Self::Error> {
        let json = |text: Option<String>| -> StorageResult<Option<serde_json::Value>> {
            text.map(|s| serde_json::from_str(&s))
                .transpose()
                .map_err(|e| corrupt("tree_nodes", format!("{}: {}", row.node_key, e)))
        };

        Ok(Self {
            node_type: row
                .node_type
                .parse::<NodeType>()
                .map_err(|e| corrupt("tree_nodes", e))?,
            condition_type: row
                .condition_type
                .as_deref()
                .map(ConditionKind::from_str)
                .transpose()
                .map_err(|e| corrupt("tree_nodes", e))?,
            compound_logic: row
                .compound_logic
                .as_deref()
                .map(LogicOp::from_str)
                .transpose()
                .map_err(|e| corrupt("tree_nodes", e))?,
            branches: json(row.branches)?,
            compound_conditions: json(row.compound_conditions)?,
            node_key: row.node_key,
            label: row.label,
            attribute: row.attribute,
            operator: row.operator,
            null_branch: row.null_branch,
            parent_node_key: row.parent_node_key,
            branch_label: row.branch_label,
            is_root: row.is_root,
            scorecard_id: row.scorecard_id,
            strategy_id: row.strategy_id,
            assessment_id: row.assessment_id,
        })
    }
}

#[derive(sqlx::FromRow)]
struct StrategyRow {
    id: String,
    payload: String,
    created_at: String,
    updated_at: String,
}

impl TryFrom<StrategyRow> for Strategy {
    type Error = StorageError;

    fn try_from(row: StrategyRow) -> Result<Self, Self::Error> {
        let mut strategy: Strategy = serde_json::from_str(&row.payload)
            .map_err(|e| corrupt("strategies", format!("{}: {}", row.id, e)))?;
        strategy.created_at = parse_timestamp(&row.created_at);
        strategy.updated_at = parse_timestamp(&row.updated_at);
        Ok(strategy)
    }
}
