//! End-to-end demo binary: parses nothing from disk (no pipeline file
//! parser is in scope here) and instead builds a small pipeline
//! programmatically, compiles it with `sqlflow-planner`, and runs it
//! with `sqlflow-exec` against the in-memory reference `SqlEngine` /
//! `StateBackend`. Run with `--features pg_demo` to persist watermarks
//! and execution history to Postgres instead (see `sqlflow_state::DbConfig`).

use std::sync::Arc;

use serde_json::json;
use uuid::Uuid;

use sqlflow_connectors::{ConnectorRegistry, InMemorySourceConnector, InMemorySqlEngine, SourceConnector};
use sqlflow_core::directive::{Directive, Load, LoadMode, SQLBlock, SourceDefinition, SyncMode};
use sqlflow_exec::{recommended_strategy, ExecutionContext, Orchestrator};
use sqlflow_planner::{build_plan, VariableContext};
use sqlflow_state::StateBackend;

fn demo_pipeline() -> Vec<Directive> {
    vec![
        Directive::SourceDefinition(SourceDefinition {
            name: "raw_orders".into(),
            connector_type: "memory".into(),
            params: json!({}),
            is_from_profile: false,
            profile_connector_name: None,
            sync_mode: SyncMode::FullRefresh,
            cursor_field: None,
            primary_key: vec![],
            setup_sql: None,
            validation_rules: vec![],
            line_number: 1,
        }),
        Directive::Load(Load {
            table_name: "orders".into(),
            source_name: "raw_orders".into(),
            mode: LoadMode::Replace,
            upsert_keys: vec![],
            line_number: 2,
        }),
        Directive::SQLBlock(SQLBlock {
            table_name: "orders_summary".into(),
            sql_query: "SELECT * FROM orders".into(),
            is_replace: false,
            line_number: 3,
        }),
    ]
}

fn build_registry() -> ConnectorRegistry {
    let mut registry = ConnectorRegistry::new();
    registry.register_source(
        "memory",
        |_cfg| {
            let chunk = sqlflow_connectors::Chunk::new(
                vec!["id".into(), "amount".into()],
                vec![vec![json!(1), json!(9.99)], vec![json!(2), json!(14.5)]],
            );
            Arc::new(InMemorySourceConnector::new(vec![chunk])) as Arc<dyn SourceConnector>
        },
        serde_json::Map::new(),
        vec![],
        vec![],
        "in-memory orders feed",
    );
    registry
}

#[cfg(not(feature = "pg_demo"))]
fn build_state_backend() -> Arc<dyn StateBackend> {
    Arc::new(sqlflow_state::InMemoryStateBackend::new())
}

#[cfg(feature = "pg_demo")]
fn build_state_backend() -> Arc<dyn StateBackend> {
    let config = sqlflow_state::DbConfig::from_env();
    let backend = sqlflow_state::PostgresStateBackend::connect(&config).expect("failed to connect to Postgres");
    Arc::new(backend)
}

fn main() {
    env_logger::init();

    let pipeline = demo_pipeline();
    let mut var_ctx = VariableContext::default();
    let plan = build_plan(&pipeline, &mut var_ctx).expect("pipeline failed to compile");

    log::info!("compiled plan with {} step(s)", plan.len());

    let ctx = ExecutionContext::new(
        Arc::new(InMemorySqlEngine::new()),
        Arc::new(build_registry()),
        build_state_backend(),
        "orders_pipeline",
        Uuid::new_v4().to_string(),
    );

    let strategy = recommended_strategy(&plan);
    log::info!("running with {strategy:?} strategy");

    let result = Orchestrator::new(strategy).execute(&plan, &ctx).expect("pipeline execution failed");

    println!(
        "run {}: success={} steps={} total_rows={:?}",
        ctx.run_id,
        result.success,
        result.step_results.len(),
        result.metadata.get("total_rows_affected")
    );
}
