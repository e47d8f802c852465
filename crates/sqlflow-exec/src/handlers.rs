//! Step Handlers (C9, spec §4.8): one handler per `PlanEntry` kind.
//! Grounded on the original `SourceDefinitionHandler` / `LoadStepHandler`
//! / `TransformStepHandler` / `ExportStepHandler`: each wraps its body so
//! that any failure surfaces as a failure `StepResult` with
//! `error_code = <TYPE>_EXECUTION_ERROR` rather than propagating, which
//! lets the orchestrator retry without special-casing panics.

use chrono::Utc;
use serde_json::{Map, Value};
use sqlflow_connectors::{Chunk, ConnectorIoError, EngineError, RegistryError};
use sqlflow_core::plan::PlanEntry;
use sqlflow_core::result::StepResult;

use crate::context::ExecutionContext;

/// Anything a handler's body can fail with; always collapsed into a
/// failure `StepResult` by [`dispatch`], never propagated.
struct HandlerError(String);

impl From<EngineError> for HandlerError {
    fn from(value: EngineError) -> Self {
        HandlerError(value.to_string())
    }
}

impl From<ConnectorIoError> for HandlerError {
    fn from(value: ConnectorIoError) -> Self {
        HandlerError(value.to_string())
    }
}

impl From<RegistryError> for HandlerError {
    fn from(value: RegistryError) -> Self {
        HandlerError(value.to_string())
    }
}

/// Runs the handler matching `entry`'s kind and returns a `StepResult`
/// that is always populated, win or lose (§4.8 "observed execution").
/// Every path records start/end and success/failure through
/// `ctx.observability` (§6.6) regardless of outcome.
pub fn dispatch(entry: &PlanEntry, ctx: &ExecutionContext, attempts: u32) -> StepResult {
    let start_time = Utc::now();
    ctx.observability.record_step_start(entry.id(), entry.kind());
    let outcome = match entry {
        PlanEntry::SourceDefinition { .. } => run_source_definition(entry, ctx),
        PlanEntry::Load { .. } => run_load(entry, ctx),
        PlanEntry::Transform { .. } => run_transform(entry, ctx),
        PlanEntry::Export { .. } => run_export(entry, ctx),
    };
    let end_time = Utc::now();
    let error_code = format!("{}_EXECUTION_ERROR", entry.kind().to_uppercase());

    match outcome {
        Ok(result) => {
            if let Some(rows) = result.rows_affected {
                ctx.observability.record_rows_affected(entry.id(), rows);
            }
            ctx.observability.add_step_metadata(entry.id(), result.data_lineage.clone());
            ctx.observability.record_step_success(entry.id(), result.performance_metrics.clone());
            result.into_step_result(entry, start_time, end_time, attempts)
        }
        Err(e) => {
            let duration_ms = (end_time - start_time).num_milliseconds();
            ctx.observability.record_step_failure(entry.id(), entry.kind(), &e.0, duration_ms);
            StepResult::failure(entry.id(), entry.kind(), start_time, end_time, e.0, error_code, attempts)
        }
    }
}

/// Handler-internal success payload, translated into a `StepResult` once
/// the handler's id/type/timing is known to the caller.
struct HandlerOutcome {
    rows_affected: Option<u64>,
    performance_metrics: Map<String, Value>,
    data_lineage: Map<String, Value>,
}

impl HandlerOutcome {
    fn new() -> Self {
        Self { rows_affected: None, performance_metrics: Map::new(), data_lineage: Map::new() }
    }

    fn into_step_result(
        self,
        entry: &PlanEntry,
        start_time: chrono::DateTime<Utc>,
        end_time: chrono::DateTime<Utc>,
        attempts: u32,
    ) -> StepResult {
        let mut result = StepResult::success(entry.id(), entry.kind(), start_time, end_time, attempts);
        if let Some(rows) = self.rows_affected {
            result = result.with_rows_affected(rows);
        }
        result.performance_metrics = self.performance_metrics;
        result.data_lineage = self.data_lineage;
        result
    }
}

fn run_source_definition(entry: &PlanEntry, ctx: &ExecutionContext) -> Result<HandlerOutcome, HandlerError> {
    let PlanEntry::SourceDefinition { name, source_connector_type, query, .. } = entry else {
        unreachable!("dispatch routes by kind")
    };

    let mut outcome = HandlerOutcome::new();
    outcome.data_lineage.insert("source_name".into(), Value::String(name.clone()));

    if let Some(connector_type) = source_connector_type {
        let connector = ctx
            .connector_registry
            .create_source_connector(connector_type, query)
            .map_err(|e| HandlerError(format!("failed to validate source '{name}': {e}")))?;

        if let Some(test) = connector.test_connection() {
            outcome.performance_metrics.insert("connection_test_passed".into(), Value::Bool(test.is_successful));
            if !test.is_successful {
                return Err(HandlerError(format!("connection test failed for source '{name}': {}", test.message)));
            }
        }
        outcome.data_lineage.insert("source_type".into(), Value::String(connector_type.clone()));
    }

    Ok(outcome)
}

fn run_load(entry: &PlanEntry, ctx: &ExecutionContext) -> Result<HandlerOutcome, HandlerError> {
    let PlanEntry::Load {
        source_name, target_table, source_connector_type, mode, upsert_keys, query, sync_mode, cursor_field, ..
    } = entry
    else {
        unreachable!("dispatch routes by kind")
    };

    if mode == &sqlflow_core::directive::LoadMode::Upsert && upsert_keys.is_empty() {
        return Err(HandlerError(format!("upsert load into '{target_table}' requires at least one upsert key")));
    }

    let config = serde_json::to_value(query).unwrap_or(Value::Null);
    let connector = ctx
        .connector_registry
        .create_source_connector(source_connector_type, &config)
        .map_err(|e| HandlerError(format!("failed to create connector for source '{source_name}': {e}")))?;

    let watermark_manager = ctx.watermark_manager();
    let is_incremental = *sync_mode == sqlflow_core::directive::SyncMode::Incremental;
    let prior_watermark = match (is_incremental, cursor_field) {
        (true, Some(field)) => watermark_manager
            .get_watermark(&ctx.pipeline_name, source_name, target_table, field)
            .map_err(|e| HandlerError(format!("failed to read watermark for '{source_name}': {e}")))?,
        _ => None,
    };

    let chunks = match (is_incremental, cursor_field, &prior_watermark) {
        (true, Some(field), Some(after)) => connector
            .read_incremental(field, after)
            .map_err(|e| HandlerError(format!("incremental read from '{source_name}' failed: {e}")))?,
        _ => {
            connector.read_chunks().map_err(|e| HandlerError(format!("read from '{source_name}' failed: {e}")))?
        }
    };
    let total_rows: u64 = chunks.iter().map(|c| c.len() as u64).sum();

    apply_load_mode(ctx, target_table, *mode, upsert_keys, &chunks)?;

    if is_incremental {
        if let Some(field) = cursor_field {
            let incoming = merge_chunks(&chunks);
            if let Some(new_cursor_value) = incoming.max_in_column(field) {
                watermark_manager
                    .update_watermark_atomic(&ctx.pipeline_name, source_name, target_table, field, &new_cursor_value, "incremental")
                    .map_err(|e| HandlerError(format!("failed to advance watermark for '{source_name}': {e}")))?;
            }
        }
    }

    let mut outcome = HandlerOutcome::new();
    outcome.rows_affected = Some(total_rows);
    outcome.performance_metrics.insert("chunks_processed".into(), Value::from(chunks.len()));
    outcome.data_lineage.insert("source".into(), Value::String(source_name.clone()));
    outcome.data_lineage.insert("target_table".into(), Value::String(target_table.clone()));
    outcome.data_lineage.insert("load_mode".into(), Value::String(mode.as_lower_str().to_string()));
    outcome.data_lineage.insert("sync_mode".into(), Value::Bool(is_incremental));
    Ok(outcome)
}

fn apply_load_mode(
    ctx: &ExecutionContext,
    target_table: &str,
    mode: sqlflow_core::directive::LoadMode,
    upsert_keys: &[String],
    chunks: &[Chunk],
) -> Result<(), HandlerError> {
    use sqlflow_core::directive::LoadMode;

    if chunks.is_empty() {
        return Ok(());
    }
    let incoming = merge_chunks(chunks);

    match mode {
        LoadMode::Replace => {
            ctx.sql_engine.register_table(target_table, incoming)?;
        }
        LoadMode::Append => {
            let merged = if ctx.sql_engine.table_exists(target_table)? {
                let mut existing = read_whole_table(ctx, target_table)?;
                existing.rows.extend(incoming.rows);
                existing
            } else {
                incoming
            };
            ctx.sql_engine.register_table(target_table, merged)?;
        }
        LoadMode::Upsert => {
            let merged = if ctx.sql_engine.table_exists(target_table)? {
                let existing = read_whole_table(ctx, target_table)?;
                upsert_rows(existing, incoming, upsert_keys)
            } else {
                incoming
            };
            ctx.sql_engine.register_table(target_table, merged)?;
        }
    }
    Ok(())
}

fn merge_chunks(chunks: &[Chunk]) -> Chunk {
    let columns = chunks[0].columns.clone();
    let rows = chunks.iter().flat_map(|c| c.rows.clone()).collect();
    Chunk::new(columns, rows)
}

fn read_whole_table(ctx: &ExecutionContext, table: &str) -> Result<Chunk, HandlerError> {
    let mut cursor = ctx.sql_engine.execute_query(&format!("SELECT * FROM {table}"))?;
    let columns = cursor.description().to_vec();
    let rows = cursor.fetchall();
    Ok(Chunk::new(columns, rows))
}

/// Deletes existing rows whose key columns match an incoming row, then
/// appends every incoming row — mirrors the handler's "delete then
/// insert" upsert strategy against a real SQL engine.
fn upsert_rows(existing: Chunk, incoming: Chunk, upsert_keys: &[String]) -> Chunk {
    let key_indices: Vec<usize> =
        upsert_keys.iter().filter_map(|k| existing.column_index(k)).collect();
    let incoming_key_indices: Vec<usize> =
        upsert_keys.iter().filter_map(|k| incoming.column_index(k)).collect();

    let incoming_keys: Vec<Vec<Value>> = incoming
        .rows
        .iter()
        .map(|row| incoming_key_indices.iter().map(|&i| row[i].clone()).collect())
        .collect();

    let retained: Vec<Vec<Value>> = existing
        .rows
        .into_iter()
        .filter(|row| {
            let row_key: Vec<Value> = key_indices.iter().map(|&i| row[i].clone()).collect();
            !incoming_keys.contains(&row_key)
        })
        .collect();

    let mut rows = retained;
    rows.extend(incoming.rows);
    Chunk::new(existing.columns, rows)
}

fn run_transform(entry: &PlanEntry, ctx: &ExecutionContext) -> Result<HandlerOutcome, HandlerError> {
    let PlanEntry::Transform { name, query, is_replace, .. } = entry else {
        unreachable!("dispatch routes by kind")
    };

    if *is_replace && !ctx.sql_engine.table_exists(name)? {
        return Err(HandlerError(format!("CREATE OR REPLACE on '{name}' but no prior table exists")));
    }

    ctx.sql_engine.execute_query(query)?;

    let mut outcome = HandlerOutcome::new();
    outcome.data_lineage.insert("table".into(), Value::String(name.clone()));
    outcome.data_lineage.insert("is_replace".into(), Value::Bool(*is_replace));
    if ctx.sql_engine.table_exists(name)? {
        if let Ok(schema) = ctx.sql_engine.get_table_schema(name) {
            let columns: Vec<Value> = schema.into_keys().map(Value::String).collect();
            outcome.data_lineage.insert("output_columns".into(), Value::Array(columns));
        }
    }
    Ok(outcome)
}

fn run_export(entry: &PlanEntry, ctx: &ExecutionContext) -> Result<HandlerOutcome, HandlerError> {
    let PlanEntry::Export { source_table, source_connector_type, query, .. } = entry else {
        unreachable!("dispatch routes by kind")
    };

    let config = serde_json::to_value(query).unwrap_or(Value::Null);
    let destination = ctx
        .connector_registry
        .create_destination_connector(source_connector_type, &config)
        .map_err(|e| HandlerError(format!("failed to create destination for '{source_table}': {e}")))?;

    let chunk = if let Some(sql) = &query.sql_query {
        let mut cursor = ctx.sql_engine.execute_query(sql)?;
        Chunk::new(cursor.description().to_vec(), cursor.fetchall())
    } else {
        read_whole_table(ctx, source_table)?
    };

    let rows = chunk.len() as u64;
    destination
        .write(&chunk, &query.options)
        .map_err(|e| HandlerError(format!("write to '{}' failed: {e}", query.destination_uri)))?;

    let mut outcome = HandlerOutcome::new();
    outcome.rows_affected = Some(rows);
    outcome.data_lineage.insert("source_table".into(), Value::String(source_table.clone()));
    outcome.data_lineage.insert("destination_uri".into(), Value::String(query.destination_uri.clone()));
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use serde_json::json;
    use sqlflow_connectors::{ConnectorRegistry, InMemorySqlEngine, SourceConnector};
    use sqlflow_core::directive::{LoadMode, SyncMode};
    use sqlflow_core::plan::LoadQuery;
    use sqlflow_state::InMemoryStateBackend;

    /// A source double that honors `read_incremental` for real, unlike
    /// `InMemorySourceConnector` (which just delegates to `read_chunks`):
    /// it filters its fixed row set down to those strictly greater than
    /// `after_value` in `cursor_field`, the way a JDBC/CSV connector
    /// would push a `WHERE updated_at > ?` clause down to its source.
    struct CursorFilteringConnector {
        chunk: Chunk,
    }

    impl SourceConnector for CursorFilteringConnector {
        fn read_chunks(&self) -> Result<Vec<Chunk>, ConnectorIoError> {
            Ok(vec![self.chunk.clone()])
        }

        fn read_incremental(&self, cursor_field: &str, after_value: &Value) -> Result<Vec<Chunk>, ConnectorIoError> {
            let idx = self
                .chunk
                .column_index(cursor_field)
                .ok_or_else(|| ConnectorIoError(format!("unknown cursor column '{cursor_field}'")))?;
            let after = after_value.as_i64().unwrap_or(i64::MIN);
            let rows: Vec<Vec<Value>> =
                self.chunk.rows.iter().filter(|row| row[idx].as_i64().unwrap_or(i64::MIN) > after).cloned().collect();
            Ok(vec![Chunk::new(self.chunk.columns.clone(), rows)])
        }
    }

    fn test_ctx(registry: ConnectorRegistry) -> ExecutionContext {
        ExecutionContext::new(
            Arc::new(InMemorySqlEngine::new()),
            Arc::new(registry),
            Arc::new(InMemoryStateBackend::new()),
            "orders_pipeline",
            "run-1",
        )
    }

    fn load_entry(sync_mode: SyncMode, cursor_field: Option<&str>) -> PlanEntry {
        PlanEntry::Load {
            id: "load_orders_append_0".into(),
            name: "orders".into(),
            source_name: "orders_src".into(),
            target_table: "orders".into(),
            source_connector_type: "orders_src".into(),
            mode: LoadMode::Append,
            upsert_keys: vec![],
            query: LoadQuery { source_name: "orders_src".into(), table_name: "orders".into() },
            sync_mode,
            cursor_field: cursor_field.map(str::to_string),
            depends_on: vec![],
        }
    }

    fn register_cursor_connector(registry: &mut ConnectorRegistry, chunk: Chunk) {
        let chunk = Arc::new(Mutex::new(chunk));
        registry.register_source(
            "orders_src",
            move |_cfg| {
                let chunk = chunk.lock().unwrap().clone();
                Arc::new(CursorFilteringConnector { chunk }) as Arc<dyn SourceConnector>
            },
            serde_json::Map::new(),
            vec![],
            vec![],
            "cursor filtering test source",
        );
    }

    #[test]
    fn full_refresh_load_never_touches_watermark() {
        let mut registry = ConnectorRegistry::new();
        let chunk = Chunk::new(vec!["id".into(), "updated_at".into()], vec![vec![json!(1), json!(10)], vec![json!(2), json!(20)]]);
        register_cursor_connector(&mut registry, chunk);
        let ctx = test_ctx(registry);

        let entry = load_entry(SyncMode::FullRefresh, Some("updated_at"));
        let result = dispatch(&entry, &ctx, 1);
        assert!(result.success);
        assert_eq!(result.rows_affected, Some(2));

        let watermark =
            ctx.watermark_manager().get_watermark("orders_pipeline", "orders_src", "orders", "updated_at").unwrap();
        assert!(watermark.is_none());
    }

    #[test]
    fn incremental_load_sets_watermark_to_max_cursor_value() {
        let mut registry = ConnectorRegistry::new();
        let chunk = Chunk::new(vec!["id".into(), "updated_at".into()], vec![vec![json!(1), json!(10)], vec![json!(2), json!(30)], vec![json!(3), json!(20)]]);
        register_cursor_connector(&mut registry, chunk);
        let ctx = test_ctx(registry);

        let entry = load_entry(SyncMode::Incremental, Some("updated_at"));
        let result = dispatch(&entry, &ctx, 1);
        assert!(result.success);
        assert_eq!(result.rows_affected, Some(3));

        let watermark = ctx
            .watermark_manager()
            .get_watermark("orders_pipeline", "orders_src", "orders", "updated_at")
            .unwrap()
            .expect("watermark should be set after a successful incremental load");
        assert_eq!(watermark, json!(30));
    }

    #[test]
    fn second_incremental_run_only_reads_rows_past_prior_watermark() {
        let mut registry = ConnectorRegistry::new();
        let chunk = Chunk::new(vec!["id".into(), "updated_at".into()], vec![vec![json!(1), json!(10)], vec![json!(2), json!(30)]]);
        register_cursor_connector(&mut registry, chunk);
        let ctx = test_ctx(registry);
        let entry = load_entry(SyncMode::Incremental, Some("updated_at"));

        let first = dispatch(&entry, &ctx, 1);
        assert!(first.success);
        assert_eq!(first.rows_affected, Some(2));

        let mut registry = ConnectorRegistry::new();
        let chunk = Chunk::new(
            vec!["id".into(), "updated_at".into()],
            vec![vec![json!(1), json!(10)], vec![json!(2), json!(30)], vec![json!(4), json!(45)]],
        );
        register_cursor_connector(&mut registry, chunk);
        let ctx = ExecutionContext::new(
            ctx.sql_engine.clone(),
            Arc::new(registry),
            ctx.state_backend.clone(),
            "orders_pipeline",
            "run-2",
        );

        let second = dispatch(&entry, &ctx, 1);
        assert!(second.success);
        assert_eq!(second.rows_affected, Some(1), "only the row past the prior watermark should be read");
    }

    #[test]
    fn upsert_load_without_keys_fails_before_touching_the_connector() {
        let registry = ConnectorRegistry::new();
        let ctx = test_ctx(registry);
        let mut entry = load_entry(SyncMode::FullRefresh, None);
        if let PlanEntry::Load { mode, upsert_keys, .. } = &mut entry {
            *mode = LoadMode::Upsert;
            *upsert_keys = vec![];
        }
        let result = dispatch(&entry, &ctx, 1);
        assert!(!result.success);
        assert_eq!(result.error_code.as_deref(), Some("LOAD_EXECUTION_ERROR"));
    }

    #[test]
    fn dispatch_records_a_successful_step_through_observability() {
        let mut registry = ConnectorRegistry::new();
        let chunk = Chunk::new(vec!["id".into(), "updated_at".into()], vec![vec![json!(1), json!(10)]]);
        register_cursor_connector(&mut registry, chunk);
        let ctx = test_ctx(registry);

        let entry = load_entry(SyncMode::FullRefresh, None);
        let result = dispatch(&entry, &ctx, 1);
        assert!(result.success);

        let metrics = ctx.observability.get_metrics();
        assert_eq!(metrics["total_steps"], json!(1));
        assert_eq!(metrics["successful_steps"], json!(1));
        assert_eq!(metrics["total_rows_affected"], json!(1));
    }

    #[test]
    fn dispatch_records_a_failed_step_through_observability() {
        let registry = ConnectorRegistry::new();
        let ctx = test_ctx(registry);
        let mut entry = load_entry(SyncMode::FullRefresh, None);
        if let PlanEntry::Load { mode, upsert_keys, .. } = &mut entry {
            *mode = LoadMode::Upsert;
            *upsert_keys = vec![];
        }
        let result = dispatch(&entry, &ctx, 1);
        assert!(!result.success);

        let metrics = ctx.observability.get_metrics();
        assert_eq!(metrics["failed_steps"], json!(1));
        assert_eq!(metrics["successful_steps"], json!(0));
    }
}
