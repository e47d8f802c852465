//! `PlanEntry`: the JSON-serializable executable step emitted by the
//! Step Builder (C7). Wire format is §6.5; id invariants are §3.
//!
//! Modeled as a tagged variant rather than the "dict-as-step" shape the
//! original Python planner used internally (§9 "Dict-as-step"); the JSON
//! boundary (`to_json`/`from_json`) is the only place the wire shape is
//! visible.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::directive::{LoadMode, SyncMode};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadQuery {
    pub source_name: String,
    pub table_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql_query: Option<String>,
    pub destination_uri: String,
    pub options: Value,
    #[serde(rename = "type")]
    pub connector_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlanEntry {
    SourceDefinition {
        id: String,
        name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        source_connector_type: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        profile_connector_name: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        is_from_profile: Option<bool>,
        sync_mode: SyncMode,
        #[serde(skip_serializing_if = "Option::is_none")]
        cursor_field: Option<String>,
        primary_key: Vec<String>,
        query: Value,
        depends_on: Vec<String>,
    },
    Load {
        id: String,
        name: String,
        source_name: String,
        target_table: String,
        source_connector_type: String,
        mode: LoadMode,
        upsert_keys: Vec<String>,
        query: LoadQuery,
        /// Copied from the producing `SourceDefinition` (spec §4.2): an
        /// `incremental` load consults and advances the watermark for
        /// `(pipeline, source_name, target_table, cursor_field)`; a
        /// `full_refresh` load always reloads everything and never
        /// touches the watermark.
        sync_mode: SyncMode,
        #[serde(skip_serializing_if = "Option::is_none")]
        cursor_field: Option<String>,
        depends_on: Vec<String>,
    },
    Transform {
        id: String,
        name: String,
        query: String,
        is_replace: bool,
        depends_on: Vec<String>,
    },
    Export {
        id: String,
        source_table: String,
        source_connector_type: String,
        query: ExportQuery,
        depends_on: Vec<String>,
    },
}

impl PlanEntry {
    pub fn id(&self) -> &str {
        match self {
            PlanEntry::SourceDefinition { id, .. }
            | PlanEntry::Load { id, .. }
            | PlanEntry::Transform { id, .. }
            | PlanEntry::Export { id, .. } => id,
        }
    }

    pub fn depends_on(&self) -> &[String] {
        match self {
            PlanEntry::SourceDefinition { depends_on, .. }
            | PlanEntry::Load { depends_on, .. }
            | PlanEntry::Transform { depends_on, .. }
            | PlanEntry::Export { depends_on, .. } => depends_on,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PlanEntry::SourceDefinition { .. } => "source_definition",
            PlanEntry::Load { .. } => "load",
            PlanEntry::Transform { .. } => "transform",
            PlanEntry::Export { .. } => "export",
        }
    }

    /// Human-readable form used in cycle reports (§4.6).
    pub fn display_form(&self) -> String {
        match self {
            PlanEntry::SourceDefinition { name, .. } => format!("SOURCE {name}"),
            PlanEntry::Load { target_table, .. } => format!("LOAD {target_table}"),
            PlanEntry::Transform { name, .. } => format!("CREATE TABLE {name}"),
            PlanEntry::Export { source_table, source_connector_type, .. } => {
                format!("EXPORT {source_table} to {source_connector_type}")
            }
        }
    }

    pub fn to_json(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    pub fn from_json(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }
}

/// A full compiled execution plan: a dependency-ordered sequence of
/// `PlanEntry` (spec §8 invariant 1: every dependency appears earlier).
pub type ExecutionPlan = Vec<PlanEntry>;
