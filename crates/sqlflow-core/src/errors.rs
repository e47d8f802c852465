//! Error kinds shared across the planner and executor (spec §7).

use thiserror::Error;

/// Raised by the Planner: duplicate tables, missing variables, invalid
/// default syntax, circular dependencies, invalid JSON params.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PlanningError {
    #[error("duplicate table definitions found:\n{0}")]
    DuplicateTable(String),
    #[error("undefined variables referenced:\n{0}")]
    MissingVariables(String),
    #[error("invalid variable default syntax: {0}")]
    InvalidDefaultSyntax(String),
    #[error("{0}")]
    CircularDependency(String),
    #[error("invalid JSON in step parameters: {0}")]
    InvalidParams(String),
    #[error("{0}")]
    ConditionEvaluation(String),
    #[error("internal planning error: {0}")]
    Internal(String),
}

/// Raised when an undefined table reference looks like a typo of a
/// known table (§4.7 step 5).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ValidationError {
    pub message: String,
    pub suggestions: Vec<TypoSuggestion>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypoSuggestion {
    pub referenced: String,
    pub suggested: String,
    pub line_number: usize,
}

impl ValidationError {
    pub fn new(suggestions: Vec<TypoSuggestion>) -> Self {
        let message = suggestions
            .iter()
            .map(|s| {
                format!(
                    "line {}: Did you mean '{}' instead of '{}'?",
                    s.line_number, s.suggested, s.referenced
                )
            })
            .collect::<Vec<_>>()
            .join("\n");
        Self { message, suggestions }
    }
}

/// Raised by the Condition Evaluator (C4) when a boolean expression
/// cannot be parsed or evaluated. The Planner wraps these with line
/// context before surfacing them as `PlanningError::ConditionEvaluation`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("failed to evaluate condition `{expression}`: {reason}")]
pub struct EvaluationError {
    pub expression: String,
    pub reason: String,
}

/// Raised by the Watermark Manager, wrapping State Backend I/O failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("connector error ({component}): {message}")]
pub struct ConnectorError {
    pub component: String,
    pub message: String,
}

impl ConnectorError {
    pub fn new(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self { component: component.into(), message: message.into() }
    }
}

/// A single step's execution failed and is surfaced by the orchestrator.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("step {step_id} failed: {message}")]
pub struct ExecutionError {
    pub step_id: String,
    pub message: String,
}

/// Terminal pipeline-level failure: retries exhausted on a step, or a
/// deadlock was detected by the parallel strategy.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PipelineExecutionError {
    #[error("step {step_id} failed after {attempts} attempt(s): {message}")]
    StepFailed { step_id: String, attempts: u32, message: String },

    #[error("deadlock detected, {} step(s) blocked:\n{}", .remaining.len(), format_deadlock(.remaining))]
    Deadlock { remaining: Vec<DeadlockedStep> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadlockedStep {
    pub step_id: String,
    pub unmet_dependencies: Vec<String>,
}

fn format_deadlock(remaining: &[DeadlockedStep]) -> String {
    remaining
        .iter()
        .map(|s| format!("  - {}: unmet_deps={:?}", s.step_id, s.unmet_dependencies))
        .collect::<Vec<_>>()
        .join("\n")
}
