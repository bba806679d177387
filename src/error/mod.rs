use thiserror::Error;

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("MCP protocol error: {0}")]
    Mcp(#[from] McpError),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Storage layer errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database connection failed: {message}")]
    Connection { message: String },

    #[error("Query failed: {message}")]
    Query { message: String },

    #[error("Decision tree not found: {tree_id}")]
    TreeNotFound { tree_id: String },

    #[error("Strategy not found: {strategy_id}")]
    StrategyNotFound { strategy_id: String },

    #[error("Corrupt record in {table}: {message}")]
    Corrupt { table: String, message: String },

    #[error("Migration failed: {message}")]
    Migration { message: String },

    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

/// MCP protocol errors
#[derive(Debug, Error)]
pub enum McpError {
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Unknown tool: {tool_name}")]
    UnknownTool { tool_name: String },

    #[error("Invalid parameters for {tool_name}: {message}")]
    InvalidParameters { tool_name: String, message: String },

    #[error("Tool execution failed: {message}")]
    ExecutionFailed { message: String },

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Tool-specific errors with structured details
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Validation failed: {field} - {reason}")]
    Validation { field: String, reason: String },

    #[error("Tree {tree_id} is {status}: {reason}")]
    Lifecycle {
        tree_id: String,
        status: String,
        reason: String,
    },

    #[error("Tree {tree_id} failed validation with {error_count} error(s)")]
    TreeInvalid { tree_id: String, error_count: usize },

    #[error("Decision failed: {message}")]
    Decision { message: String },
}

impl From<ToolError> for AppError {
    fn from(err: ToolError) -> Self {
        AppError::Internal {
            message: err.to_string(),
        }
    }
}

impl From<AppError> for McpError {
    fn from(err: AppError) -> Self {
        McpError::ExecutionFailed {
            message: err.to_string(),
        }
    }
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type alias for MCP operations
pub type McpResult<T> = Result<T, McpError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_error_display() {
        let err = AppError::Config {
            message: "unreadable catalog".to_string(),
        };
        assert_eq!(err.to_string(), "Configuration error: unreadable catalog");

        let err = AppError::Internal {
            message: "unexpected".to_string(),
        };
        assert_eq!(err.to_string(), "Internal error: unexpected");
    }

    #[test]
    fn test_storage_error_display() {
        let err = StorageError::TreeNotFound {
            tree_id: "tree-1".to_string(),
        };
        assert_eq!(err.to_string(), "Decision tree not found: tree-1");

        let err = StorageError::StrategyNotFound {
            strategy_id: "strat-9".to_string(),
        };
        assert_eq!(err.to_string(), "Strategy not found: strat-9");

        let err = StorageError::Corrupt {
            table: "tree_nodes".to_string(),
            message: "bad branches".to_string(),
        };
        assert_eq!(err.to_string(), "Corrupt record in tree_nodes: bad branches");
    }

    #[test]
    fn test_tool_error_display() {
        let err = ToolError::Lifecycle {
            tree_id: "t1".to_string(),
            status: "active".to_string(),
            reason: "nodes cannot be replaced".to_string(),
        };
        assert_eq!(err.to_string(), "Tree t1 is active: nodes cannot be replaced");

        let err = ToolError::TreeInvalid {
            tree_id: "t1".to_string(),
            error_count: 2,
        };
        assert_eq!(err.to_string(), "Tree t1 failed validation with 2 error(s)");
    }

    #[test]
    fn test_tool_error_conversion_to_app_error() {
        let tool_err = ToolError::Validation {
            field: "nodes".to_string(),
            reason: "empty".to_string(),
        };
        let app_err: AppError = tool_err.into();
        assert!(matches!(app_err, AppError::Internal { .. }));
        assert!(app_err.to_string().contains("Validation failed"));
    }

    #[test]
    fn test_app_error_conversion_to_mcp_error() {
        let app_err = AppError::Config {
            message: "test error".to_string(),
        };
        let mcp_err: McpError = app_err.into();
        assert!(matches!(mcp_err, McpError::ExecutionFailed { .. }));
        assert!(mcp_err.to_string().contains("Configuration error"));
    }

    #[test]
    fn test_storage_error_conversion_to_app_error() {
        let storage_err = StorageError::TreeNotFound {
            tree_id: "test-123".to_string(),
        };
        let app_err: AppError = storage_err.into();
        assert!(matches!(app_err, AppError::Storage(_)));
    }
}
