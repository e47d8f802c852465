//! Step Builder (C7, spec §3 id invariants, §4.7).
//!
//! Turns a flattened, dependency-ordered `Directive` sequence into
//! `PlanEntry` values. Ids follow the §3 invariants exactly (source /
//! load / transform / export each have their own template) rather than
//! an opaque hash, so a plan dump stays readable and `position` breaks
//! ties between multiple directives that share a table name.

use sqlflow_core::directive::{Directive, LoadMode, SyncMode};
use sqlflow_core::plan::{ExportQuery, LoadQuery, PlanEntry};

fn source_id(name: &str) -> String {
    format!("source_{name}")
}

fn load_id(table: &str, mode: LoadMode, position: usize) -> String {
    format!("load_{table}_{}_{position}", mode.as_lower_str())
}

fn transform_id(table: &str, is_replace: bool, position: usize) -> String {
    if is_replace {
        format!("transform_{table}_replace_{position}")
    } else {
        format!("transform_{table}_{position}")
    }
}

fn export_id(connector_type: &str, table: Option<&str>, position: usize) -> String {
    let connector_lower = connector_type.to_lowercase();
    match table {
        Some(t) if !t.is_empty() => format!("export_{connector_lower}_{t}"),
        _ => format!("export_{connector_lower}_{position}"),
    }
}

/// Build the `PlanEntry` for a single directive at `position` (its index
/// in the fully flattened, substituted directive sequence — used only to
/// disambiguate ids for repeated table names), given the already
/// id-resolved dependency ids it depends on.
pub fn build_entry(directive: &Directive, position: usize, depends_on: Vec<String>) -> PlanEntry {
    match directive {
        Directive::SourceDefinition(s) => PlanEntry::SourceDefinition {
            id: source_id(&s.name),
            name: s.name.clone(),
            source_connector_type: (!s.is_from_profile).then(|| s.connector_type.clone()),
            profile_connector_name: s.profile_connector_name.clone(),
            is_from_profile: Some(s.is_from_profile),
            sync_mode: s.sync_mode,
            cursor_field: s.cursor_field.clone(),
            primary_key: s.primary_key.clone(),
            query: s.params.clone(),
            depends_on,
        },
        // source_connector_type/sync_mode/cursor_field are placeholders;
        // the Planner patches them from the producing SourceDefinition
        // once the full directive list is in scope (this function only
        // sees one directive at a time).
        Directive::Load(l) => PlanEntry::Load {
            id: load_id(&l.table_name, l.mode, position),
            name: l.table_name.clone(),
            source_name: l.source_name.clone(),
            target_table: l.table_name.clone(),
            source_connector_type: String::new(),
            mode: l.mode,
            upsert_keys: l.upsert_keys.clone(),
            query: LoadQuery { source_name: l.source_name.clone(), table_name: l.table_name.clone() },
            sync_mode: SyncMode::FullRefresh,
            cursor_field: None,
            depends_on,
        },
        Directive::SQLBlock(b) => PlanEntry::Transform {
            id: transform_id(&b.table_name, b.is_replace, position),
            name: b.table_name.clone(),
            query: b.sql_query.clone(),
            is_replace: b.is_replace,
            depends_on,
        },
        Directive::Export(e) => {
            let connector_type = e.connector_type.clone().unwrap_or_default();
            PlanEntry::Export {
                id: export_id(&connector_type, e.table_name.as_deref(), position),
                source_table: e.table_name.clone().unwrap_or_default(),
                source_connector_type: connector_type.clone(),
                query: ExportQuery {
                    sql_query: e.sql_query.clone(),
                    destination_uri: e.destination_uri.clone(),
                    options: e.options.clone(),
                    connector_type,
                },
                depends_on,
            }
        }
        // Set and ConditionalBlock directives don't survive flattening
        // into executable steps; the Planner resolves them before this
        // point is ever reached.
        Directive::Set(_) | Directive::ConditionalBlock(_) => unreachable!(
            "Set and ConditionalBlock directives must be resolved before step building"
        ),
    }
}

/// True for directives that the Step Builder turns into a `PlanEntry`.
pub fn is_buildable(directive: &Directive) -> bool {
    !matches!(directive, Directive::Set(_) | Directive::ConditionalBlock(_))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlflow_core::directive::{LoadMode as LM, SQLBlock};

    #[test]
    fn source_id_uses_bare_name() {
        use sqlflow_core::directive::{SourceDefinition, SyncMode};
        let d = Directive::SourceDefinition(SourceDefinition {
            name: "raw_orders".into(),
            connector_type: "csv".into(),
            params: serde_json::json!({}),
            is_from_profile: false,
            profile_connector_name: None,
            sync_mode: SyncMode::FullRefresh,
            cursor_field: None,
            primary_key: vec![],
            setup_sql: None,
            validation_rules: vec![],
            line_number: 1,
        });
        assert_eq!(build_entry(&d, 0, vec![]).id(), "source_raw_orders");
    }

    #[test]
    fn load_id_includes_mode_and_position() {
        use sqlflow_core::directive::Load;
        let d = Directive::Load(Load {
            table_name: "orders".into(),
            source_name: "raw".into(),
            mode: LM::Upsert,
            upsert_keys: vec!["id".into()],
            line_number: 2,
        });
        assert_eq!(build_entry(&d, 3, vec![]).id(), "load_orders_upsert_3");
    }

    #[test]
    fn transform_id_marks_replace() {
        let d = Directive::SQLBlock(SQLBlock {
            table_name: "summary".into(),
            sql_query: "select 1".into(),
            is_replace: true,
            line_number: 4,
        });
        assert_eq!(build_entry(&d, 5, vec![]).id(), "transform_summary_replace_5");
    }

    #[test]
    fn export_id_prefers_table_over_position() {
        use sqlflow_core::directive::Export;
        let d = Directive::Export(Export {
            table_name: Some("orders".into()),
            sql_query: None,
            destination_uri: "s3://bucket/orders.csv".into(),
            connector_type: Some("S3".into()),
            options: serde_json::json!({}),
            line_number: 6,
        });
        assert_eq!(build_entry(&d, 9, vec![]).id(), "export_s3_orders");
    }
}
