//! `StepResult` / `ExecutionResult` (spec §3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step_id: String,
    pub step_type: String,
    pub success: bool,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows_affected: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    pub performance_metrics: Map<String, Value>,
    pub data_lineage: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Map<String, Value>>,
    pub input_schemas: Map<String, Value>,
    /// Retry attempts consumed to reach this result (SUPPLEMENTED
    /// FEATURES §1 — surfaced so S6's `attempts_observed` is directly
    /// observable).
    pub attempts: u32,
}

impl StepResult {
    pub fn success(
        step_id: impl Into<String>,
        step_type: impl Into<String>,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        attempts: u32,
    ) -> Self {
        Self {
            step_id: step_id.into(),
            step_type: step_type.into(),
            success: true,
            start_time,
            end_time,
            rows_affected: None,
            error_message: None,
            error_code: None,
            performance_metrics: Map::new(),
            data_lineage: Map::new(),
            output_schema: None,
            input_schemas: Map::new(),
            attempts,
        }
    }

    pub fn failure(
        step_id: impl Into<String>,
        step_type: impl Into<String>,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        error_message: impl Into<String>,
        error_code: impl Into<String>,
        attempts: u32,
    ) -> Self {
        Self {
            step_id: step_id.into(),
            step_type: step_type.into(),
            success: false,
            start_time,
            end_time,
            rows_affected: None,
            error_message: Some(error_message.into()),
            error_code: Some(error_code.into()),
            performance_metrics: Map::new(),
            data_lineage: Map::new(),
            output_schema: None,
            input_schemas: Map::new(),
            attempts,
        }
    }

    pub fn with_metric(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.performance_metrics.insert(key.into(), value.into());
        self
    }

    pub fn with_lineage(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data_lineage.insert(key.into(), value.into());
        self
    }

    pub fn with_rows_affected(mut self, rows: u64) -> Self {
        self.rows_affected = Some(rows);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub step_results: Vec<StepResult>,
    pub total_duration_ms: i64,
    pub variables: HashMap<String, Value>,
    pub metadata: Map<String, Value>,
}

impl ExecutionResult {
    pub fn empty() -> Self {
        Self {
            success: true,
            step_results: Vec::new(),
            total_duration_ms: 0,
            variables: HashMap::new(),
            metadata: Map::new(),
        }
    }

    pub fn from_results(step_results: Vec<StepResult>, variables: HashMap<String, Value>) -> Self {
        let success = step_results.iter().all(|r| r.success);
        let total_duration_ms = step_results
            .iter()
            .map(|r| (r.end_time - r.start_time).num_milliseconds())
            .sum();
        let total_rows_affected: u64 = step_results.iter().filter_map(|r| r.rows_affected).sum();
        let mut metadata = Map::new();
        metadata.insert("total_rows_affected".to_string(), Value::from(total_rows_affected));
        Self { success, step_results, total_duration_ms, variables, metadata }
    }
}
