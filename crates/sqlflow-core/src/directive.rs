//! Directive AST (spec §3 "Directive").
//!
//! These are the typed nodes the (out-of-scope) SQL parser is assumed to
//! produce. The Planner consumes them read-only; nothing downstream of
//! parsing ever mutates a `Directive`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncMode {
    FullRefresh,
    Incremental,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoadMode {
    Replace,
    Append,
    Upsert,
}

impl LoadMode {
    pub fn as_lower_str(&self) -> &'static str {
        match self {
            LoadMode::Replace => "replace",
            LoadMode::Append => "append",
            LoadMode::Upsert => "upsert",
        }
    }
}

/// A declarative validation rule run after a source read (SUPPLEMENTED
/// FEATURES §5): `expression` is evaluated by the Condition Evaluator (C4)
/// against a scope containing `row_count` and the resolved variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationRule {
    pub name: String,
    pub expression: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDefinition {
    pub name: String,
    pub connector_type: String,
    pub params: Value,
    pub is_from_profile: bool,
    pub profile_connector_name: Option<String>,
    pub sync_mode: SyncMode,
    pub cursor_field: Option<String>,
    pub primary_key: Vec<String>,
    pub setup_sql: Option<String>,
    pub validation_rules: Vec<ValidationRule>,
    pub line_number: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Load {
    pub table_name: String,
    pub source_name: String,
    pub mode: LoadMode,
    pub upsert_keys: Vec<String>,
    pub line_number: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SQLBlock {
    pub table_name: String,
    pub sql_query: String,
    pub is_replace: bool,
    pub line_number: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Export {
    pub table_name: Option<String>,
    pub sql_query: Option<String>,
    pub destination_uri: String,
    pub connector_type: Option<String>,
    pub options: Value,
    pub line_number: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Set {
    pub variable_name: String,
    pub variable_value: String,
    pub line_number: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionalBranch {
    pub condition: String,
    pub steps: Vec<Directive>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionalBlock {
    pub branches: Vec<ConditionalBranch>,
    pub else_branch: Vec<Directive>,
    pub line_number: usize,
}

/// A parsed pipeline AST node. Every variant carries `line_number` via
/// its inner struct (see §3 "Every directive carries an original source
/// `line_number`").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Directive {
    SourceDefinition(SourceDefinition),
    Load(Load),
    SQLBlock(SQLBlock),
    Export(Export),
    Set(Set),
    ConditionalBlock(ConditionalBlock),
}

impl Directive {
    pub fn line_number(&self) -> usize {
        match self {
            Directive::SourceDefinition(d) => d.line_number,
            Directive::Load(d) => d.line_number,
            Directive::SQLBlock(d) => d.line_number,
            Directive::Export(d) => d.line_number,
            Directive::Set(d) => d.line_number,
            Directive::ConditionalBlock(d) => d.line_number,
        }
    }

    /// Table name produced by this directive, if any (Load / SQLBlock).
    pub fn produced_table(&self) -> Option<&str> {
        match self {
            Directive::Load(d) => Some(&d.table_name),
            Directive::SQLBlock(d) => Some(&d.table_name),
            _ => None,
        }
    }
}

/// A full ordered pipeline as handed to the Planner.
pub type Pipeline = Vec<Directive>;
