use serde::Serialize;
use serde_json::Value;
use tracing::info;

use super::SharedState;
use crate::error::{McpError, McpResult};
use crate::service::{
    ApplicationParams, StrategyEvaluateParams, StrategyIdParams, StrategySaveParams,
    TreeCreateParams, TreeEditParams, TreeIdParams, TreeListParams, TreeSaveParams, TreeSelector,
    TreeValidateParams,
};

/// Route tool calls to appropriate handlers
pub async fn handle_tool_call(
    state: &SharedState,
    tool_name: &str,
    arguments: Option<Value>,
) -> McpResult<Value> {
    info!(tool = %tool_name, "Routing tool call");

    let service = &state.service;
    match tool_name {
        // Tree lifecycle
        "tree_create" => {
            execute_handler(tool_name, arguments, |p: TreeCreateParams| {
                service.create_tree(p)
            })
            .await
        }
        "tree_get" => {
            execute_handler(tool_name, arguments, |p: TreeSelector| service.get_tree(p)).await
        }
        "tree_list" => {
            let arguments = Some(arguments.unwrap_or_else(|| Value::Object(Default::default())));
            execute_handler(tool_name, arguments, |p: TreeListParams| {
                service.list_trees(p)
            })
            .await
        }
        "tree_save" => {
            execute_handler(tool_name, arguments, |p: TreeSaveParams| service.save_tree(p)).await
        }
        "tree_edit" => {
            execute_handler(tool_name, arguments, |p: TreeEditParams| service.edit_tree(p)).await
        }
        "tree_validate" => {
            execute_handler(tool_name, arguments, |p: TreeValidateParams| {
                service.validate_tree(p)
            })
            .await
        }
        "tree_activate" => {
            execute_handler(tool_name, arguments, |p: TreeIdParams| {
                service.activate_tree(p)
            })
            .await
        }
        "tree_archive" => {
            execute_handler(tool_name, arguments, |p: TreeIdParams| service.archive_tree(p)).await
        }
        "tree_new_version" => {
            execute_handler(tool_name, arguments, |p: TreeIdParams| service.new_version(p)).await
        }
        // Evaluation
        "tree_route" => {
            execute_handler(tool_name, arguments, |p: ApplicationParams| service.route(p)).await
        }
        "decision_run" => {
            execute_handler(tool_name, arguments, |p: ApplicationParams| service.decide(p)).await
        }
        // Strategies
        "strategy_save" => {
            execute_handler(tool_name, arguments, |p: StrategySaveParams| {
                service.save_strategy(p)
            })
            .await
        }
        "strategy_get" => {
            execute_handler(tool_name, arguments, |p: StrategyIdParams| {
                service.get_strategy(p)
            })
            .await
        }
        "strategy_evaluate" => {
            execute_handler(tool_name, arguments, |p: StrategyEvaluateParams| {
                service.evaluate_strategy(p)
            })
            .await
        }
        "catalog_get" => serde_json::to_value(state.catalog.as_ref()).map_err(McpError::Json),
        _ => Err(McpError::UnknownTool {
            tool_name: tool_name.to_string(),
        }),
    }
}

// ============================================================================
// Helper functions
// ============================================================================

/// Helper to parse arguments with consistent error handling
fn parse_arguments<T: serde::de::DeserializeOwned>(
    tool_name: &str,
    arguments: Option<Value>,
) -> McpResult<T> {
    match arguments {
        Some(args) => serde_json::from_value(args).map_err(|e| McpError::InvalidParameters {
            tool_name: tool_name.to_string(),
            message: e.to_string(),
        }),
        None => Err(McpError::InvalidParameters {
            tool_name: tool_name.to_string(),
            message: "Missing arguments".to_string(),
        }),
    }
}

/// Parse arguments, run a service operation, and serialize its result.
///
/// # Type Parameters
/// - `P`: Parameter type (must implement DeserializeOwned)
/// - `R`: Result type (must implement Serialize)
/// - `E`: Error type (must implement Display)
/// - `F`: Async operation that takes P and returns Result<R, E>
async fn execute_handler<P, R, E, F, Fut>(
    tool_name: &str,
    arguments: Option<Value>,
    operation: F,
) -> McpResult<Value>
where
    P: serde::de::DeserializeOwned,
    R: Serialize,
    E: std::fmt::Display,
    F: FnOnce(P) -> Fut,
    Fut: std::future::Future<Output = Result<R, E>>,
{
    let params: P = parse_arguments(tool_name, arguments)?;

    let result = operation(params)
        .await
        .map_err(|e| McpError::ExecutionFailed {
            message: e.to_string(),
        })?;

    serde_json::to_value(result).map_err(McpError::Json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize, PartialEq)]
    struct TestParams {
        tree_id: String,
        #[serde(default)]
        save: bool,
    }

    #[test]
    fn test_parse_arguments_success() {
        let args = Some(json!({ "tree_id": "t1", "save": true }));
        let result: TestParams = parse_arguments("tree_edit", args).unwrap();
        assert_eq!(
            result,
            TestParams {
                tree_id: "t1".to_string(),
                save: true
            }
        );
    }

    #[test]
    fn test_parse_arguments_missing_arguments() {
        let result: McpResult<TestParams> = parse_arguments("tree_edit", None);
        match result.unwrap_err() {
            McpError::InvalidParameters { tool_name, message } => {
                assert_eq!(tool_name, "tree_edit");
                assert_eq!(message, "Missing arguments");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_parse_arguments_wrong_type() {
        let result: McpResult<TestParams> =
            parse_arguments("tree_edit", Some(json!({ "tree_id": 7 })));
        assert!(matches!(
            result,
            Err(McpError::InvalidParameters { .. })
        ));
    }

    #[test]
    fn test_parse_service_params() {
        let params: ApplicationParams = parse_arguments(
            "decision_run",
            Some(json!({
                "product_id": "personal-loan",
                "application": { "credit_score": 700, "bureau": { "status": "thin" } }
            })),
        )
        .unwrap();
        assert_eq!(params.tree.product_id.as_deref(), Some("personal-loan"));
        assert_eq!(params.tree.tree_id, None);
        assert_eq!(params.application.get("bureau.status"), Some(&json!("thin")));

        let params: TreeEditParams = parse_arguments(
            "tree_edit",
            Some(json!({
                "tree_id": "t1",
                "intents": [
                    { "type": "connect", "source": "root", "target": "leaf" },
                    { "type": "remove_node", "key": "old" }
                ]
            })),
        )
        .unwrap();
        assert_eq!(params.intents.len(), 2);
        assert!(!params.save);
    }

    #[tokio::test]
    async fn test_execute_handler_maps_operation_errors() {
        let result = execute_handler(
            "tree_get",
            Some(json!({ "tree_id": "t1", "save": false })),
            |p: TestParams| async move {
                Err::<Value, String>(format!("tree {} not found", p.tree_id))
            },
        )
        .await;

        match result.unwrap_err() {
            McpError::ExecutionFailed { message } => assert_eq!(message, "tree t1 not found"),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
