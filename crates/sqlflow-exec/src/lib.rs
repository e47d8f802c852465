//! sqlflow-exec: the dependency-aware executor (spec §4.8-§4.13) that
//! turns a compiled `ExecutionPlan` (sqlflow-core) into an
//! `ExecutionResult`, dispatching each step through its handler,
//! committing per step, and optionally persisting a resumable snapshot.

pub mod context;
pub mod handlers;
pub mod observability;
pub mod orchestrator;
pub mod snapshot;

pub use context::ExecutionContext;
pub use observability::{AlertSeverity, Observability, PerformanceAlert, SimpleObservabilityManager};
pub use orchestrator::{recommended_strategy, Orchestrator, ParallelConfig, Strategy};
pub use snapshot::{ExecutionState, PipelineStateSnapshot, SnapshotError, StateManager};
