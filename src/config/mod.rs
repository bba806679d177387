use std::env;
use std::path::PathBuf;

use crate::error::AppError;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub catalog: CatalogConfig,
    pub validation: ValidationConfig,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub max_connections: u32,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Attribute catalog source
#[derive(Debug, Clone, Default)]
pub struct CatalogConfig {
    /// JSON catalog file. The built-in catalog is used when unset.
    pub path: Option<PathBuf>,
}

/// Limits applied by the tree validator.
///
/// Exceeding a limit produces a warning, never an error.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationConfig {
    pub max_depth: usize,
    pub max_nodes: usize,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, AppError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let database = DatabaseConfig {
            path: PathBuf::from(
                env::var("DATABASE_PATH")
                    .unwrap_or_else(|_| "./data/decision_trees.db".to_string()),
            ),
            max_connections: parse_env("DATABASE_MAX_CONNECTIONS", 5),
        };

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "pretty".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        };

        let catalog = CatalogConfig {
            path: env::var("CATALOG_PATH")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
        };

        let defaults = ValidationConfig::default();
        let validation = ValidationConfig {
            max_depth: parse_env("VALIDATION_MAX_DEPTH", defaults.max_depth),
            max_nodes: parse_env("VALIDATION_MAX_NODES", defaults.max_nodes),
        };

        Ok(Config {
            database,
            logging,
            catalog,
            validation,
        })
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_depth: 32,
            max_nodes: 500,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}
