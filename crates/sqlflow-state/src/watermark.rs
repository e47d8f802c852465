//! Watermark Manager (C2, spec §4.2): tracks incremental-load cursor
//! positions so a rerun only pulls rows newer than the last successful
//! sync.

use chrono::Utc;
use serde_json::{json, Value};
use sqlflow_core::errors::ConnectorError;

use crate::backend::StateBackend;

const COMPONENT: &str = "watermark_manager";

fn watermark_key(pipeline: &str, source: &str, target: &str, cursor_field: &str) -> String {
    format!("{pipeline}.{source}.{target}.{cursor_field}")
}

fn to_connector_error(message: impl std::fmt::Display) -> ConnectorError {
    ConnectorError::new(COMPONENT, message.to_string())
}

pub struct WatermarkManager<'a> {
    backend: &'a dyn StateBackend,
}

impl<'a> WatermarkManager<'a> {
    pub fn new(backend: &'a dyn StateBackend) -> Self {
        Self { backend }
    }

    /// Reads the last recorded cursor value, or `None` if this is the
    /// first sync for the (pipeline, source, target, cursor_field) key.
    pub fn get_watermark(
        &self,
        pipeline: &str,
        source: &str,
        target: &str,
        cursor_field: &str,
    ) -> Result<Option<Value>, ConnectorError> {
        let key = watermark_key(pipeline, source, target, cursor_field);
        self.backend
            .get(&key)
            .map_err(to_connector_error)
            .map(|row| row.and_then(|v| v.get("cursor_value").cloned()))
    }

    /// Atomically overwrites the watermark for a key. Writing is wrapped
    /// in a backend transaction so a crash mid-write cannot leave a
    /// partially-updated row.
    pub fn update_watermark_atomic(
        &self,
        pipeline: &str,
        source: &str,
        target: &str,
        cursor_field: &str,
        cursor_value: &Value,
        sync_mode: &str,
    ) -> Result<(), ConnectorError> {
        let key = watermark_key(pipeline, source, target, cursor_field);
        let now = Utc::now();
        let payload = json!({
            "pipeline": pipeline,
            "source": source,
            "target": target,
            "cursor_field": cursor_field,
            "cursor_value": cursor_value,
            "last_updated": now,
            "sync_mode": sync_mode,
        });
        self.backend
            .transaction(&mut |scoped| scoped.set(&key, &payload, now))
            .map_err(to_connector_error)
    }

    /// Deletes a watermark, forcing the next sync to run as a full load.
    pub fn reset_watermark(
        &self,
        pipeline: &str,
        source: &str,
        target: &str,
        cursor_field: &str,
    ) -> Result<bool, ConnectorError> {
        let key = watermark_key(pipeline, source, target, cursor_field);
        self.backend.delete(&key).map_err(to_connector_error)
    }

    /// Source-connector convenience form: source name is used as both
    /// the `source` and `target` watermark-key components (intentional
    /// per spec §4.2 — a Source directive has no separate load target).
    pub fn get_source_watermark(
        &self,
        pipeline: &str,
        source: &str,
        cursor_field: &str,
    ) -> Result<Option<Value>, ConnectorError> {
        self.get_watermark(pipeline, source, source, cursor_field)
    }

    pub fn update_source_watermark(
        &self,
        pipeline: &str,
        source: &str,
        cursor_field: &str,
        cursor_value: &Value,
        sync_mode: &str,
    ) -> Result<(), ConnectorError> {
        self.update_watermark_atomic(pipeline, source, source, cursor_field, cursor_value, sync_mode)
    }
}
