use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use mcp_decision_tree::{
    catalog::AttributeCatalog,
    config::{Config, LogFormat},
    server::{AppState, McpServer},
    storage::SqliteStorage,
    tree::{TreeNode, TreeValidator},
};

#[derive(Parser)]
#[command(name = "mcp-decision-tree", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the MCP server on stdio (default)
    Serve,
    /// Validate a JSON array of persisted node records and print the result
    Validate {
        /// Node records file
        file: PathBuf,
        /// Attribute catalog file, overriding CATALOG_PATH
        #[arg(long)]
        catalog: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config);

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Validate { file, catalog } => {
            let catalog_path = catalog.or_else(|| config.catalog.path.clone());
            let valid = validate_file(&config, &file, catalog_path.as_deref())?;
            if !valid {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}

fn load_catalog(path: Option<&Path>) -> anyhow::Result<AttributeCatalog> {
    match path {
        Some(path) => Ok(AttributeCatalog::from_file(path)?),
        None => Ok(AttributeCatalog::builtin()),
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        "MCP Decision Tree Server starting..."
    );

    let catalog = load_catalog(config.catalog.path.as_deref())?;

    let storage = match SqliteStorage::new(&config.database).await {
        Ok(s) => {
            info!(path = %config.database.path.display(), "Database initialized");
            s
        }
        Err(e) => {
            error!(error = %e, "Failed to initialize database");
            return Err(e.into());
        }
    };

    let state = Arc::new(AppState::new(config, storage, catalog));
    let server = McpServer::new(state);

    info!("Server ready, waiting for requests on stdin...");

    if let Err(e) = server.run().await {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("Server shutdown complete");
    Ok(())
}

fn validate_file(config: &Config, file: &Path, catalog: Option<&Path>) -> anyhow::Result<bool> {
    let catalog = load_catalog(catalog)?;
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let nodes: Vec<TreeNode> = serde_json::from_str(&text)
        .with_context(|| format!("Invalid node records in {}", file.display()))?;

    let result = TreeValidator::new(&config.validation)
        .with_catalog(Arc::new(catalog))
        .validate_nodes(&nodes);

    println!("{}", serde_json::to_string_pretty(&result)?);
    info!(
        file = %file.display(),
        valid = result.valid,
        errors = result.errors.len(),
        warnings = result.warnings.len(),
        "Validation finished"
    );
    Ok(result.valid)
}

/// Initialize tracing/logging
fn init_logging(config: &Config) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}
