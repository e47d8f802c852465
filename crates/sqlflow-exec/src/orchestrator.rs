//! Orchestrator (C11) and Parallel Strategy (C12), spec §4.11-§4.12.
//! Grounded on the original `ParallelOrchestrationStrategy`
//! (thread-pool + `TaskStatus` state machine) and a plain sequential
//! strategy for the non-concurrent case.

use std::collections::{HashMap, HashSet};
use std::sync::mpsc;
use std::time::Duration;

use sqlflow_core::errors::{DeadlockedStep, PipelineExecutionError};
use sqlflow_core::plan::{ExecutionPlan, PlanEntry};
use sqlflow_core::result::{ExecutionResult, StepResult};
use sqlflow_core::task::{TaskState, TaskStatus};

use crate::context::ExecutionContext;
use crate::handlers;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Sequential,
    Parallel,
}

/// A plan with exactly one entry, or one whose entries form a single
/// chain with no independent branches, gains nothing from a thread
/// pool; everything else benefits from dependency-aware concurrency.
pub fn recommended_strategy(plan: &ExecutionPlan) -> Strategy {
    if plan.len() <= 1 {
        return Strategy::Sequential;
    }
    let produced: HashSet<&str> = plan.iter().map(PlanEntry::id).collect();
    let has_independent_pair = plan.iter().enumerate().any(|(i, a)| {
        plan.iter().skip(i + 1).any(|b| {
            !a.depends_on().iter().any(|d| d == b.id()) && !b.depends_on().iter().any(|d| d == a.id())
        })
    });
    let _ = produced;
    if has_independent_pair {
        Strategy::Parallel
    } else {
        Strategy::Sequential
    }
}

#[derive(Debug, Clone)]
pub struct ParallelConfig {
    pub max_workers: usize,
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        let cpus = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        Self { max_workers: (2 * cpus).min(32), max_retries: 3, retry_delay: Duration::from_secs(1) }
    }
}

pub struct Orchestrator {
    strategy: Strategy,
    parallel_config: ParallelConfig,
}

impl Orchestrator {
    pub fn new(strategy: Strategy) -> Self {
        Self { strategy, parallel_config: ParallelConfig::default() }
    }

    pub fn with_parallel_config(mut self, config: ParallelConfig) -> Self {
        self.parallel_config = config;
        self
    }

    pub fn execute(&self, plan: &ExecutionPlan, ctx: &ExecutionContext) -> Result<ExecutionResult, PipelineExecutionError> {
        match self.strategy {
            Strategy::Sequential => execute_sequential(plan, ctx),
            Strategy::Parallel => execute_parallel(plan, ctx, &self.parallel_config),
        }
    }
}

/// Runs every step in plan order, committing after each success. Aborts
/// on the first failure without retrying — retries are a parallel-
/// strategy concern (§4.12); a sequential run that failed a step gains
/// nothing from repeating it immediately.
fn execute_sequential(plan: &ExecutionPlan, ctx: &ExecutionContext) -> Result<ExecutionResult, PipelineExecutionError> {
    let mut results = Vec::with_capacity(plan.len());
    for entry in plan {
        let result = handlers::dispatch(entry, ctx, 1);
        if !result.success {
            return Err(PipelineExecutionError::StepFailed {
                step_id: entry.id().to_string(),
                attempts: 1,
                message: result.error_message.clone().unwrap_or_default(),
            });
        }
        ctx.sql_engine.commit().map_err(|e| PipelineExecutionError::StepFailed {
            step_id: entry.id().to_string(),
            attempts: 1,
            message: format!("commit failed: {e}"),
        })?;
        results.push(result);
    }
    Ok(ExecutionResult::from_results(results, ctx.variables.clone()))
}

fn execute_parallel(
    plan: &ExecutionPlan,
    ctx: &ExecutionContext,
    config: &ParallelConfig,
) -> Result<ExecutionResult, PipelineExecutionError> {
    if plan.is_empty() {
        return Ok(ExecutionResult::empty());
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.max_workers)
        .thread_name(|i| format!("sqlflow-worker-{i}"))
        .build()
        .map_err(|e| PipelineExecutionError::StepFailed {
            step_id: "orchestrator".to_string(),
            attempts: 0,
            message: format!("failed to start worker pool: {e}"),
        })?;

    let mut statuses: HashMap<String, TaskStatus> = plan
        .iter()
        .map(|e| {
            let deps: std::collections::BTreeSet<String> = e.depends_on().iter().cloned().collect();
            (e.id().to_string(), TaskStatus::new(e.id(), deps))
        })
        .collect();

    let entries_by_id: HashMap<&str, &PlanEntry> = plan.iter().map(|e| (e.id(), e)).collect();
    let mut results: HashMap<String, StepResult> = HashMap::new();
    let mut running: HashSet<String> = HashSet::new();
    let (tx, rx) = mpsc::channel::<(String, StepResult)>();

    let mut first_failure: Option<(String, u32, String)> = None;

    loop {
        // Once a step has exhausted its retries, stop submitting new work
        // (§4.12 "a fatal failure causes the scheduler to stop submitting
        // new work and raise after in-flight tasks drain") — only drain
        // what's already running below.
        if first_failure.is_none() {
            // Promote pending tasks whose dependencies have all succeeded.
            let success_ids: HashSet<&str> = results
                .iter()
                .filter(|(_, r)| r.success)
                .map(|(id, _)| id.as_str())
                .collect();
            for status in statuses.values_mut() {
                if status.state == TaskState::Pending && status.dependencies.iter().all(|d| success_ids.contains(d.as_str())) {
                    *status = status.with_state(TaskState::Eligible);
                }
            }

            let eligible: Vec<String> = statuses
                .values()
                .filter(|s| s.state == TaskState::Eligible && !running.contains(&s.step_id))
                .map(|s| s.step_id.clone())
                .collect();

            if eligible.is_empty() && running.is_empty() {
                // No progress possible: every remaining task is blocked on a
                // dependency that failed terminally or on a genuine cycle
                // the planner should already have rejected.
                let remaining: Vec<DeadlockedStep> = statuses
                    .values()
                    .filter(|s| !matches!(s.state, TaskState::Success | TaskState::Failed))
                    .map(|s| DeadlockedStep {
                        step_id: s.step_id.clone(),
                        unmet_dependencies: s
                            .dependencies
                            .iter()
                            .filter(|d| !success_ids.contains(d.as_str()))
                            .cloned()
                            .collect(),
                    })
                    .collect();
                if !remaining.is_empty() {
                    return Err(PipelineExecutionError::Deadlock { remaining });
                }
                break;
            }

            for id in eligible {
                let entry = (*entries_by_id.get(id.as_str()).expect("status tracked for every plan entry")).clone();
                let status = statuses.get(&id).expect("status exists").with_running(chrono::Utc::now());
                let attempts = status.attempts;
                statuses.insert(id.clone(), status);
                running.insert(id.clone());

                let ctx = ctx.clone();
                let tx = tx.clone();
                pool.spawn(move || {
                    let result = handlers::dispatch(&entry, &ctx, attempts);
                    let _ = tx.send((entry.id().to_string(), result));
                });
            }
        } else if running.is_empty() {
            // Fatal failure recorded and every in-flight task has drained.
            break;
        }

        let (id, result) = rx.recv().map_err(|_| PipelineExecutionError::StepFailed {
            step_id: "orchestrator".to_string(),
            attempts: 0,
            message: "worker channel closed unexpectedly".to_string(),
        })?;
        running.remove(&id);
        let status = statuses.get(&id).expect("status exists for completed task").clone();

        if result.success {
            if let Err(e) = ctx.sql_engine.commit() {
                log::warn!("commit failed after step {id} succeeded: {e}");
            }
            statuses.insert(id.clone(), status.with_success(chrono::Utc::now()));
            results.insert(id, result);
        } else if first_failure.is_none() && status.attempts < config.max_retries {
            log::warn!(
                "step {id} failed (attempt {}/{}), retrying after {:?}: {}",
                status.attempts,
                config.max_retries,
                config.retry_delay,
                result.error_message.clone().unwrap_or_default()
            );
            std::thread::sleep(config.retry_delay);
            statuses.insert(id, status.with_retry_pending(result.error_message.unwrap_or_default()));
        } else {
            if first_failure.is_none() {
                first_failure = Some((id.clone(), status.attempts, result.error_message.clone().unwrap_or_default()));
            }
            statuses.insert(id.clone(), status.with_failed(chrono::Utc::now(), result.error_message.clone().unwrap_or_default()));
            results.insert(id, result);
        }
    }

    if let Some((step_id, attempts, message)) = first_failure {
        return Err(PipelineExecutionError::StepFailed { step_id, attempts, message });
    }

    let ordered: Vec<StepResult> = plan.iter().filter_map(|e| results.remove(e.id())).collect();
    Ok(ExecutionResult::from_results(ordered, ctx.variables.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use sqlflow_connectors::{ConnectorRegistry, InMemorySqlEngine};
    use sqlflow_state::InMemoryStateBackend;

    fn test_ctx() -> ExecutionContext {
        ExecutionContext::new(
            Arc::new(InMemorySqlEngine::new()),
            Arc::new(ConnectorRegistry::new()),
            Arc::new(InMemoryStateBackend::new()),
            "test_pipeline",
            "run-1",
        )
    }

    fn transform(id: &str, depends_on: Vec<&str>) -> PlanEntry {
        PlanEntry::Transform {
            id: id.to_string(),
            name: id.to_string(),
            query: format!("CREATE TABLE {id} AS SELECT 1"),
            is_replace: false,
            depends_on: depends_on.into_iter().map(String::from).collect(),
        }
    }

    #[test]
    fn sequential_runs_every_step_in_order() {
        let ctx = test_ctx();
        let plan = vec![transform("a", vec![]), transform("b", vec!["a"])];
        let result = Orchestrator::new(Strategy::Sequential).execute(&plan, &ctx).unwrap();
        assert!(result.success);
        assert_eq!(result.step_results.len(), 2);
        assert_eq!(result.step_results[0].step_id, "a");
        assert_eq!(result.step_results[1].step_id, "b");
    }

    #[test]
    fn sequential_aborts_on_first_failure() {
        let ctx = test_ctx();
        // CREATE OR REPLACE against a table that was never created fails.
        let plan = vec![PlanEntry::Transform {
            id: "a".into(),
            name: "ghost".into(),
            query: "CREATE OR REPLACE TABLE ghost AS SELECT 1".into(),
            is_replace: true,
            depends_on: vec![],
        }];
        let err = Orchestrator::new(Strategy::Sequential).execute(&plan, &ctx).unwrap_err();
        assert!(matches!(err, PipelineExecutionError::StepFailed { .. }));
    }

    #[test]
    fn parallel_runs_independent_branches() {
        let ctx = test_ctx();
        let plan = vec![transform("a", vec![]), transform("b", vec![])];
        let config = ParallelConfig { max_workers: 2, max_retries: 0, retry_delay: Duration::from_millis(1) };
        let result = Orchestrator::new(Strategy::Parallel).with_parallel_config(config).execute(&plan, &ctx).unwrap();
        assert!(result.success);
        assert_eq!(result.step_results.len(), 2);
    }

    #[test]
    fn parallel_retries_a_failing_step_and_reports_attempts_on_terminal_failure() {
        let ctx = test_ctx();
        // CREATE OR REPLACE against a table that never exists fails every
        // attempt, so this deterministically exhausts max_retries.
        let plan = vec![PlanEntry::Transform {
            id: "ghost".into(),
            name: "ghost".into(),
            query: "CREATE OR REPLACE TABLE ghost AS SELECT 1".into(),
            is_replace: true,
            depends_on: vec![],
        }];
        let config = ParallelConfig { max_workers: 2, max_retries: 2, retry_delay: Duration::from_millis(1) };
        let err = Orchestrator::new(Strategy::Parallel).with_parallel_config(config).execute(&plan, &ctx).unwrap_err();
        match err {
            PipelineExecutionError::StepFailed { step_id, attempts, .. } => {
                assert_eq!(step_id, "ghost");
                assert!(attempts >= 2, "expected at least 2 attempts before giving up, got {attempts}");
            }
            other => panic!("expected StepFailed, got {other:?}"),
        }
    }

    #[test]
    fn parallel_independent_steps_each_commit_before_their_dependent_runs() {
        let ctx = test_ctx();
        let plan = vec![
            transform("a", vec![]),
            transform("b", vec![]),
            transform("c", vec![]),
            transform("d", vec![]),
            transform("summary", vec!["a", "b", "c", "d"]),
        ];
        let config = ParallelConfig { max_workers: 4, max_retries: 0, retry_delay: Duration::from_millis(1) };
        let result = Orchestrator::new(Strategy::Parallel).with_parallel_config(config).execute(&plan, &ctx).unwrap();
        assert!(result.success);
        assert_eq!(result.step_results.len(), 5);
        assert!(ctx.sql_engine.table_exists("a").unwrap());
        assert!(ctx.sql_engine.table_exists("summary").unwrap());
    }

    #[test]
    fn parallel_stops_submitting_new_work_once_a_fatal_failure_is_known() {
        let ctx = test_ctx();
        // `ghost` fails terminally on its very first attempt (max_retries: 0,
        // no deps). The g1 -> g2 -> g3 -> y chain is unrelated to it, but
        // takes several scheduler round-trips to reach `y` — by the time g3
        // succeeds and would make `y` eligible, the `ghost` failure has
        // already been observed, so `y` must never be submitted.
        let plan = vec![
            PlanEntry::Transform {
                id: "ghost".into(),
                name: "ghost".into(),
                query: "CREATE OR REPLACE TABLE ghost AS SELECT 1".into(),
                is_replace: true,
                depends_on: vec![],
            },
            transform("g1", vec![]),
            transform("g2", vec!["g1"]),
            transform("g3", vec!["g2"]),
            transform("y", vec!["g3"]),
        ];
        let config = ParallelConfig { max_workers: 4, max_retries: 0, retry_delay: Duration::from_millis(1) };
        let err = Orchestrator::new(Strategy::Parallel).with_parallel_config(config).execute(&plan, &ctx).unwrap_err();
        assert!(matches!(err, PipelineExecutionError::StepFailed { ref step_id, .. } if step_id == "ghost"));
        assert!(!ctx.sql_engine.table_exists("y").unwrap(), "y should never have been submitted after ghost's fatal failure");
    }

    #[test]
    fn parallel_detects_deadlock_on_unsatisfiable_dependency() {
        let ctx = test_ctx();
        let plan = vec![transform("a", vec!["ghost-dependency"])];
        let config = ParallelConfig { max_workers: 2, max_retries: 0, retry_delay: Duration::from_millis(1) };
        let err = Orchestrator::new(Strategy::Parallel).with_parallel_config(config).execute(&plan, &ctx).unwrap_err();
        assert!(matches!(err, PipelineExecutionError::Deadlock { .. }));
    }

    #[test]
    fn recommended_strategy_picks_sequential_for_a_single_chain() {
        let plan = vec![transform("a", vec![]), transform("b", vec!["a"]), transform("c", vec!["b"])];
        assert_eq!(recommended_strategy(&plan), Strategy::Sequential);
    }

    #[test]
    fn recommended_strategy_picks_parallel_for_independent_branches() {
        let plan = vec![transform("a", vec![]), transform("b", vec![])];
        assert_eq!(recommended_strategy(&plan), Strategy::Parallel);
    }
}
