//! Storage layer for decision trees and strategies.
//!
//! Trees are stored as a header row plus one row per node in the persisted
//! node record shape. A save replaces the whole node set of a tree inside one
//! transaction. Strategies, with their assessments and rule lists, are stored
//! as JSON payloads keyed by id.

mod sqlite;

pub use sqlite::SqliteStorage;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageResult;
use crate::strategy::Strategy;
use crate::tree::{DecisionTree, TreeNode, TreeStatus};

/// A tree header without its nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeSummary {
    pub id: String,
    pub product_id: String,
    pub name: String,
    pub status: TreeStatus,
    pub version: i64,
    pub node_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Storage trait for database operations
#[async_trait]
pub trait Storage: Send + Sync {
    // Tree operations

    /// Insert a tree header and its nodes.
    async fn create_tree(&self, tree: &DecisionTree) -> StorageResult<()>;
    async fn get_tree(&self, id: &str) -> StorageResult<Option<DecisionTree>>;
    /// List tree headers, newest first, optionally for one product.
    async fn list_trees(&self, product_id: Option<&str>) -> StorageResult<Vec<TreeSummary>>;
    /// Replace the full node set of a tree.
    async fn replace_tree_nodes(&self, tree_id: &str, nodes: &[TreeNode]) -> StorageResult<()>;
    async fn update_tree_status(&self, tree_id: &str, status: TreeStatus) -> StorageResult<()>;
    /// Mark a tree active and archive the product's other active trees.
    /// Returns the ids of the trees that were archived.
    async fn activate_tree(&self, tree_id: &str) -> StorageResult<Vec<String>>;
    async fn get_active_tree(&self, product_id: &str) -> StorageResult<Option<DecisionTree>>;
    async fn delete_tree(&self, id: &str) -> StorageResult<()>;

    // Strategy operations

    /// Insert or replace a strategy.
    async fn save_strategy(&self, strategy: &Strategy) -> StorageResult<()>;
    async fn get_strategy(&self, id: &str) -> StorageResult<Option<Strategy>>;
    async fn list_strategies(&self) -> StorageResult<Vec<Strategy>>;
    async fn delete_strategy(&self, id: &str) -> StorageResult<()>;
}
