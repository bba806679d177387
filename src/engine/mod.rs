//! End-to-end decisioning: route an application through a tree, then
//! evaluate the strategy or assessment at the terminal it reaches.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::rules::ApplicationSnapshot;
use crate::strategy::{Assessment, EvaluationResult, Strategy};
use crate::tree::{route, RouteError, RouteStep, TerminalRef, TreeGraph};

/// Errors resolving a decision.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("routing failed: {0}")]
    Route(#[from] RouteError),

    #[error("strategy '{strategy_id}' is not loaded")]
    UnknownStrategy { strategy_id: String },

    #[error("assessment '{assessment_id}' is not owned by any loaded strategy")]
    UnknownAssessment { assessment_id: String },

    #[error("terminal '{terminal_node}' references a scorecard, which cannot be evaluated")]
    UnsupportedTerminal { terminal_node: String },
}

/// Decision payload for one application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeDecision {
    /// Nodes and branches taken before the terminal.
    pub path: Vec<RouteStep>,
    pub terminal_node: String,
    pub terminal: TerminalRef,
    /// Strategy that produced the result; for assessments, the owner.
    pub strategy_id: String,
    #[serde(flatten)]
    pub result: EvaluationResult,
}

/// Resolves terminals against a set of loaded strategies.
#[derive(Debug, Clone, Default)]
pub struct DecisionEngine {
    strategies: HashMap<String, Strategy>,
}

impl DecisionEngine {
    /// Create an engine over `strategies`.
    pub fn new(strategies: impl IntoIterator<Item = Strategy>) -> Self {
        Self {
            strategies: strategies
                .into_iter()
                .map(|s| (s.id.clone(), s))
                .collect(),
        }
    }

    /// Add or replace a strategy.
    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategies.insert(strategy.id.clone(), strategy);
        self
    }

    /// Look up a loaded strategy.
    pub fn strategy(&self, id: &str) -> Option<&Strategy> {
        self.strategies.get(id)
    }

    /// Route `app` through `graph` and evaluate the terminal.
    pub fn decide(
        &self,
        graph: &TreeGraph,
        app: &ApplicationSnapshot,
    ) -> Result<TreeDecision, EngineError> {
        let routed = route(graph, app)?;

        let (strategy_id, result) = match &routed.terminal {
            TerminalRef::Strategy(id) => {
                let strategy =
                    self.strategies
                        .get(id)
                        .ok_or_else(|| EngineError::UnknownStrategy {
                            strategy_id: id.clone(),
                        })?;
                (strategy.id.clone(), strategy.evaluate(app))
            }
            TerminalRef::Assessment(id) => {
                let (owner, assessment) = self
                    .find_assessment(id)
                    .ok_or_else(|| EngineError::UnknownAssessment {
                        assessment_id: id.clone(),
                    })?;
                (owner.id.clone(), assessment.evaluate(app))
            }
            TerminalRef::Scorecard(_) => {
                return Err(EngineError::UnsupportedTerminal {
                    terminal_node: routed.terminal_node,
                })
            }
        };

        info!(
            terminal_node = %routed.terminal_node,
            strategy_id = %strategy_id,
            decision = %result.decision,
            "Decision made"
        );

        Ok(TreeDecision {
            path: routed.steps,
            terminal_node: routed.terminal_node,
            terminal: routed.terminal,
            strategy_id,
            result,
        })
    }

    /// Find an assessment and its owning strategy. Strategy ids are searched
    /// in sorted order so the result does not depend on map iteration.
    fn find_assessment(
        &self,
        assessment_id: &str,
    ) -> Option<(&Strategy, &Assessment)> {
        let mut ids: Vec<&String> = self.strategies.keys().collect();
        ids.sort();
        ids.into_iter().find_map(|id| {
            let strategy = &self.strategies[id];
            strategy.assessment(assessment_id).map(|a| (strategy, a))
        })
    }
}
