//! Execution Context (C10, spec §4.10): an immutable bundle of shared
//! services handed to every Step Handler, grounded on the original
//! `ExecutionContext` frozen dataclass.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};
use sqlflow_connectors::{ConnectorRegistry, SqlEngine};
use sqlflow_state::{StateBackend, WatermarkManager};

use crate::observability::{Observability, SimpleObservabilityManager};

#[derive(Clone)]
pub struct ExecutionContext {
    pub sql_engine: Arc<dyn SqlEngine>,
    pub connector_registry: Arc<ConnectorRegistry>,
    pub state_backend: Arc<dyn StateBackend>,
    pub observability: Arc<dyn Observability>,
    pub run_id: String,
    pub pipeline_name: String,
    pub variables: HashMap<String, Value>,
    pub config: Map<String, Value>,
}

impl ExecutionContext {
    pub fn new(
        sql_engine: Arc<dyn SqlEngine>,
        connector_registry: Arc<ConnectorRegistry>,
        state_backend: Arc<dyn StateBackend>,
        pipeline_name: impl Into<String>,
        run_id: impl Into<String>,
    ) -> Self {
        let run_id = run_id.into();
        Self {
            sql_engine,
            connector_registry,
            state_backend,
            observability: Arc::new(SimpleObservabilityManager::new(run_id.clone())),
            run_id,
            pipeline_name: pipeline_name.into(),
            variables: HashMap::new(),
            config: Map::new(),
        }
    }

    #[must_use]
    pub fn with_variables(&self, variables: HashMap<String, Value>) -> Self {
        let mut merged = self.variables.clone();
        merged.extend(variables);
        Self { variables: merged, ..self.clone() }
    }

    #[must_use]
    pub fn with_config(&self, config: Map<String, Value>) -> Self {
        let mut merged = self.config.clone();
        merged.extend(config);
        Self { config: merged, ..self.clone() }
    }

    #[must_use]
    pub fn with_observability(&self, observability: Arc<dyn Observability>) -> Self {
        Self { observability, ..self.clone() }
    }

    pub fn watermark_manager(&self) -> WatermarkManager<'_> {
        WatermarkManager::new(self.state_backend.as_ref())
    }
}
