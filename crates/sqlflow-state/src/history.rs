//! Execution-history audit trail (supplemented feature: per-watermark
//! record of sync attempts, grounded on the original implementation's
//! bookkeeping around watermark updates).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlflow_core::errors::ConnectorError;

use crate::backend::StateBackend;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ExecutionStatus {
    Running,
    Success,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub watermark_key: String,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    pub rows_processed: Option<i64>,
    pub status: ExecutionStatus,
    pub error_message: Option<String>,
}

fn history_key(watermark_key: &str, start: DateTime<Utc>) -> String {
    format!("execution_history.{watermark_key}.{}", start.timestamp_nanos_opt().unwrap_or_default())
}

/// Records the start of a sync attempt against `watermark_key` and
/// returns the key identifying this attempt, to be passed to
/// [`record_execution_end`].
pub fn record_execution_start(
    backend: &dyn StateBackend,
    watermark_key: &str,
    start: DateTime<Utc>,
) -> Result<String, ConnectorError> {
    let key = history_key(watermark_key, start);
    let record = ExecutionRecord {
        watermark_key: watermark_key.to_string(),
        start,
        end: None,
        rows_processed: None,
        status: ExecutionStatus::Running,
        error_message: None,
    };
    let value = serde_json::to_value(&record)
        .map_err(|e| ConnectorError::new("execution_history", e.to_string()))?;
    backend
        .set(&key, &value, start)
        .map_err(|e| ConnectorError::new("execution_history", e.to_string()))?;
    Ok(key)
}

pub fn record_execution_end(
    backend: &dyn StateBackend,
    execution_key: &str,
    end: DateTime<Utc>,
    rows_processed: i64,
    status: ExecutionStatus,
    error_message: Option<String>,
) -> Result<(), ConnectorError> {
    let existing = backend
        .get(execution_key)
        .map_err(|e| ConnectorError::new("execution_history", e.to_string()))?
        .ok_or_else(|| ConnectorError::new("execution_history", format!("no record for {execution_key}")))?;
    let mut record: ExecutionRecord = serde_json::from_value(existing)
        .map_err(|e| ConnectorError::new("execution_history", e.to_string()))?;
    record.end = Some(end);
    record.rows_processed = Some(rows_processed);
    record.status = status;
    record.error_message = error_message;
    let value = json!(record);
    backend
        .set(execution_key, &value, end)
        .map_err(|e| ConnectorError::new("execution_history", e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStateBackend;

    #[test]
    fn start_then_end_round_trips() {
        let backend = InMemoryStateBackend::new();
        let start = Utc::now();
        let key = record_execution_start(&backend, "p.s.t.id", start).unwrap();
        record_execution_end(&backend, &key, start, 120, ExecutionStatus::Success, None).unwrap();

        let stored = backend.get(&key).unwrap().unwrap();
        let record: ExecutionRecord = serde_json::from_value(stored).unwrap();
        assert_eq!(record.status, ExecutionStatus::Success);
        assert_eq!(record.rows_processed, Some(120));
    }

    #[test]
    fn end_without_start_errors() {
        let backend = InMemoryStateBackend::new();
        let result = record_execution_end(&backend, "missing", Utc::now(), 0, ExecutionStatus::Failed, None);
        assert!(result.is_err());
    }
}
