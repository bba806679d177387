//! # MCP Decision Tree Server
//!
//! A Model Context Protocol (MCP) server for loan-origination decision trees:
//! authoring and validating the tree that routes an application to a
//! strategy or assessment, and evaluating the rule lists found there.
//!
//! ## Features
//!
//! - **Tree model**: typed nodes and branch definitions, converted between
//!   graph form (nodes + labelled edges) and the persisted parent-pointer form
//! - **Editing**: an intent reducer that assigns branches to edges and refuses
//!   invalid edits without mutating the tree
//! - **Validation**: structural errors and warnings with stable codes
//! - **Rules**: operators, thresholds, null policy and knock-out/overlay
//!   semantics across sequential, dual-path, scoring and hybrid strategies
//! - **Decisions**: route an application through a tree and evaluate the
//!   terminal it reaches
//!
//! ## Architecture
//!
//! ```text
//! MCP Client → MCP Server (stdio) → DecisionService → tree / strategy / engine
//!                                         ↓
//!                                   SQLite (trees, strategies)
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use mcp_decision_tree::{AppState, Config, McpServer};
//! use mcp_decision_tree::catalog::AttributeCatalog;
//! use mcp_decision_tree::storage::SqliteStorage;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let storage = SqliteStorage::new(&config.database).await?;
//!     let state = Arc::new(AppState::new(config, storage, AttributeCatalog::builtin()));
//!     McpServer::new(state).run().await?;
//!     Ok(())
//! }
//! ```

/// Attribute catalog used to seed branches and check attributes.
pub mod catalog;
/// Configuration management for the MCP server.
pub mod config;
/// End-to-end decisions: route, then evaluate the terminal.
pub mod engine;
/// Error types and result aliases for the application.
pub mod error;
/// Rule entries, operators and application snapshots.
pub mod rules;
/// MCP server implementation and request handling.
pub mod server;
/// Tree lifecycle and decision operations over storage.
pub mod service;
/// SQLite storage layer for persistence.
pub mod storage;
/// Strategies, assessments and rule-list evaluation.
pub mod strategy;
/// Decision tree model, conversion, editing, validation and routing.
pub mod tree;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use server::{AppState, McpServer, SharedState};
