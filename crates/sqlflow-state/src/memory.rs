//! In-memory `StateBackend`, used in tests and for plan-only / dry-run
//! workflows that never touch Postgres (grounded on
//! `chem-core`'s `InMemoryEventStore`).

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::backend::StateBackend;
use crate::error::StateError;

#[derive(Default)]
pub struct InMemoryStateBackend {
    rows: Mutex<HashMap<String, (Value, DateTime<Utc>)>>,
}

impl InMemoryStateBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateBackend for InMemoryStateBackend {
    fn get(&self, key: &str) -> Result<Option<Value>, StateError> {
        let rows = self.rows.lock().expect("state backend mutex poisoned");
        Ok(rows.get(key).map(|(v, _)| v.clone()))
    }

    fn set(&self, key: &str, value: &Value, timestamp: DateTime<Utc>) -> Result<(), StateError> {
        let mut rows = self.rows.lock().expect("state backend mutex poisoned");
        rows.insert(key.to_string(), (value.clone(), timestamp));
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool, StateError> {
        let mut rows = self.rows.lock().expect("state backend mutex poisoned");
        Ok(rows.remove(key).is_some())
    }

    fn transaction(
        &self,
        f: &mut dyn FnMut(&dyn StateBackend) -> Result<(), StateError>,
    ) -> Result<(), StateError> {
        let snapshot = self.rows.lock().expect("state backend mutex poisoned").clone();
        match f(self) {
            Ok(()) => Ok(()),
            Err(e) => {
                *self.rows.lock().expect("state backend mutex poisoned") = snapshot;
                Err(e)
            }
        }
    }

    fn close(&self) -> Result<(), StateError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn set_then_get_round_trips() {
        let backend = InMemoryStateBackend::new();
        backend.set("k", &json!({"a": 1}), Utc::now()).unwrap();
        assert_eq!(backend.get("k").unwrap(), Some(json!({"a": 1})));
    }

    #[test]
    fn delete_reports_existence() {
        let backend = InMemoryStateBackend::new();
        assert!(!backend.delete("missing").unwrap());
        backend.set("k", &json!(1), Utc::now()).unwrap();
        assert!(backend.delete("k").unwrap());
        assert_eq!(backend.get("k").unwrap(), None);
    }

    #[test]
    fn failed_transaction_rolls_back() {
        let backend = InMemoryStateBackend::new();
        backend.set("k", &json!("before"), Utc::now()).unwrap();
        let result = backend.transaction(&mut |scoped| {
            scoped.set("k", &json!("after"), Utc::now()).unwrap();
            Err(StateError::SerializationConflict)
        });
        assert!(result.is_err());
        assert_eq!(backend.get("k").unwrap(), Some(json!("before")));
    }
}
