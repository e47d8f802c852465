//! Connector Registry contract (spec §6.3).
//!
//! Holds a factory per connector type name plus its declared defaults
//! and required/optional parameter names, and resolves a concrete
//! connector configuration with override > profile > defaults
//! precedence.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::connector::{DestinationConnector, SourceConnector};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("no source connector registered for type '{0}'")]
    UnknownSource(String),
    #[error("no destination connector registered for type '{0}'")]
    UnknownDestination(String),
    #[error("missing required parameter '{0}' for connector type '{1}'")]
    MissingRequiredParam(String, String),
}

pub struct ConnectorSpec<C: ?Sized> {
    pub defaults: Map<String, Value>,
    pub required_params: Vec<String>,
    pub optional_params: Vec<String>,
    pub description: String,
    pub ctor: Arc<dyn Fn(&Value) -> Arc<C> + Send + Sync>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfiguration {
    pub resolved_config: Value,
    pub overridden_params: Vec<String>,
    pub validation_warnings: Vec<String>,
}

/// Resolution precedence: override > profile > defaults (§6.3).
pub fn resolve_configuration(
    defaults: &Map<String, Value>,
    required_params: &[String],
    profile_params: &Map<String, Value>,
    override_options: &Map<String, Value>,
) -> ResolvedConfiguration {
    let mut resolved = defaults.clone();
    let mut overridden = Vec::new();

    for (k, v) in profile_params {
        resolved.insert(k.clone(), v.clone());
    }
    for (k, v) in override_options {
        if resolved.get(k) != Some(v) {
            overridden.push(k.clone());
        }
        resolved.insert(k.clone(), v.clone());
    }

    let mut warnings = Vec::new();
    for req in required_params {
        if !resolved.contains_key(req) {
            warnings.push(format!("missing required parameter '{req}'"));
        }
    }

    ResolvedConfiguration {
        resolved_config: Value::Object(resolved),
        overridden_params: overridden,
        validation_warnings: warnings,
    }
}

#[derive(Default)]
pub struct ConnectorRegistry {
    sources: HashMap<String, ConnectorSpec<dyn SourceConnector>>,
    destinations: HashMap<String, ConnectorSpec<dyn DestinationConnector>>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_source(
        &mut self,
        connector_type: impl Into<String>,
        ctor: impl Fn(&Value) -> Arc<dyn SourceConnector> + Send + Sync + 'static,
        defaults: Map<String, Value>,
        required_params: Vec<String>,
        optional_params: Vec<String>,
        description: impl Into<String>,
    ) {
        self.sources.insert(
            connector_type.into(),
            ConnectorSpec { defaults, required_params, optional_params, description: description.into(), ctor: Arc::new(ctor) },
        );
    }

    pub fn register_destination(
        &mut self,
        connector_type: impl Into<String>,
        ctor: impl Fn(&Value) -> Arc<dyn DestinationConnector> + Send + Sync + 'static,
        defaults: Map<String, Value>,
        required_params: Vec<String>,
        optional_params: Vec<String>,
        description: impl Into<String>,
    ) {
        self.destinations.insert(
            connector_type.into(),
            ConnectorSpec { defaults, required_params, optional_params, description: description.into(), ctor: Arc::new(ctor) },
        );
    }

    pub fn resolve_source_configuration(
        &self,
        connector_type: &str,
        profile_params: &Map<String, Value>,
        override_options: &Map<String, Value>,
    ) -> Result<ResolvedConfiguration, RegistryError> {
        let spec = self
            .sources
            .get(connector_type)
            .ok_or_else(|| RegistryError::UnknownSource(connector_type.to_string()))?;
        Ok(resolve_configuration(&spec.defaults, &spec.required_params, profile_params, override_options))
    }

    pub fn create_source_connector(
        &self,
        connector_type: &str,
        resolved_config: &Value,
    ) -> Result<Arc<dyn SourceConnector>, RegistryError> {
        let spec = self
            .sources
            .get(connector_type)
            .ok_or_else(|| RegistryError::UnknownSource(connector_type.to_string()))?;
        for req in &spec.required_params {
            if resolved_config.get(req).is_none() {
                return Err(RegistryError::MissingRequiredParam(req.clone(), connector_type.to_string()));
            }
        }
        Ok((spec.ctor)(resolved_config))
    }

    pub fn create_destination_connector(
        &self,
        connector_type: &str,
        resolved_config: &Value,
    ) -> Result<Arc<dyn DestinationConnector>, RegistryError> {
        let spec = self
            .destinations
            .get(connector_type)
            .ok_or_else(|| RegistryError::UnknownDestination(connector_type.to_string()))?;
        for req in &spec.required_params {
            if resolved_config.get(req).is_none() {
                return Err(RegistryError::MissingRequiredParam(req.clone(), connector_type.to_string()));
            }
        }
        Ok((spec.ctor)(resolved_config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::InMemorySourceConnector;
    use serde_json::json;

    #[test]
    fn override_wins_over_profile_and_defaults() {
        let defaults = json!({"path": "default.csv", "delimiter": ","}).as_object().unwrap().clone();
        let profile = json!({"path": "profile.csv"}).as_object().unwrap().clone();
        let overrides = json!({"path": "override.csv"}).as_object().unwrap().clone();
        let resolved = resolve_configuration(&defaults, &[], &profile, &overrides);
        assert_eq!(resolved.resolved_config["path"], json!("override.csv"));
        assert_eq!(resolved.resolved_config["delimiter"], json!(","));
    }

    #[test]
    fn missing_required_param_is_warned() {
        let defaults = Map::new();
        let resolved = resolve_configuration(&defaults, &["path".to_string()], &Map::new(), &Map::new());
        assert_eq!(resolved.validation_warnings.len(), 1);
    }

    #[test]
    fn registry_creates_registered_source() {
        let mut registry = ConnectorRegistry::new();
        registry.register_source(
            "memory",
            |_cfg| Arc::new(InMemorySourceConnector::new(vec![])) as Arc<dyn SourceConnector>,
            Map::new(),
            vec![],
            vec![],
            "in-memory test source",
        );
        assert!(registry.create_source_connector("memory", &json!({})).is_ok());
        assert!(registry.create_source_connector("missing", &json!({})).is_err());
    }
}
