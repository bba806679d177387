//! Server module for MCP protocol handling.
//!
//! This module provides:
//! - MCP server implementation over stdio
//! - Tool call handlers and routing
//! - Shared application state management

mod handlers;
mod mcp;

pub use handlers::*;
pub use mcp::*;

use std::sync::Arc;

use crate::catalog::AttributeCatalog;
use crate::config::Config;
use crate::service::DecisionService;
use crate::storage::SqliteStorage;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub storage: SqliteStorage,
    /// Attribute catalog, loaded once at startup.
    pub catalog: Arc<AttributeCatalog>,
    pub service: DecisionService,
}

impl AppState {
    /// Create new application state
    pub fn new(config: Config, storage: SqliteStorage, catalog: AttributeCatalog) -> Self {
        let catalog = Arc::new(catalog);
        tracing::info!(
            catalog_version = %catalog.version(),
            attributes = catalog.len(),
            max_depth = config.validation.max_depth,
            max_nodes = config.validation.max_nodes,
            "AppState initializing"
        );

        let service = DecisionService::new(storage.clone(), Arc::clone(&catalog), &config);
        Self {
            config,
            storage,
            catalog,
            service,
        }
    }
}

pub type SharedState = Arc<AppState>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        CatalogConfig, DatabaseConfig, LogFormat, LoggingConfig, ValidationConfig,
    };
    use std::path::PathBuf;

    fn create_test_config() -> Config {
        Config {
            database: DatabaseConfig {
                path: PathBuf::from(":memory:"),
                max_connections: 1,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: LogFormat::Pretty,
            },
            catalog: CatalogConfig::default(),
            validation: ValidationConfig {
                max_depth: 8,
                max_nodes: 100,
            },
        }
    }

    #[tokio::test]
    async fn test_app_state_shares_catalog() {
        let storage = SqliteStorage::new_in_memory().await.unwrap();
        let state = AppState::new(create_test_config(), storage, AttributeCatalog::builtin());

        assert_eq!(state.catalog.version(), "builtin-1");
        assert_eq!(state.service.catalog().version(), "builtin-1");
        assert_eq!(state.config.validation.max_depth, 8);

        let cloned = state.clone();
        assert!(Arc::ptr_eq(&state.catalog, &cloned.catalog));
    }
}
