//! sqlflow-core: neutral data model shared by the planner and executor.
//!
//! - `directive`: the parser-produced AST nodes (§3 "Directive").
//! - `plan`: the JSON-serializable `PlanEntry` wire format (§3, §6.5).
//! - `task`: the runtime `TaskStatus` state machine (§4.11).
//! - `result`: `StepResult` / `ExecutionResult` (§3).
//! - `errors`: error kinds shared across crates (§7).
//! - `hashing`: canonical JSON + BLAKE3 helpers used for plan/step ids.

pub mod directive;
pub mod errors;
pub mod hashing;
pub mod plan;
pub mod result;
pub mod task;

pub use directive::{
    ConditionalBlock, ConditionalBranch, Directive, Export, Load, LoadMode, Pipeline, SQLBlock,
    Set, SourceDefinition, SyncMode, ValidationRule,
};
pub use errors::{
    ConnectorError, DeadlockedStep, EvaluationError, ExecutionError, PipelineExecutionError,
    PlanningError, TypoSuggestion, ValidationError,
};
pub use plan::{ExecutionPlan, ExportQuery, LoadQuery, PlanEntry};
pub use result::{ExecutionResult, StepResult};
pub use task::{TaskState, TaskStatus};
