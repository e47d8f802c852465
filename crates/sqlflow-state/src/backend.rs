//! State Backend contract (C1, spec §4.1): a persistent key -> value map
//! with ACID transactions over an embedded analytic database.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::StateError;

pub trait StateBackend: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>, StateError>;

    /// Upsert; serializes `value` as JSON text. Idempotent at the key
    /// level within a transaction.
    fn set(&self, key: &str, value: &Value, timestamp: DateTime<Utc>) -> Result<(), StateError>;

    /// `true` if the key existed.
    fn delete(&self, key: &str) -> Result<bool, StateError>;

    /// Scoped transaction: `f` is handed a backend bound to the active
    /// transaction. Returning `Ok` commits, `Err` rolls back, on every
    /// exit path including a panic unwind through the pooled connection.
    fn transaction(
        &self,
        f: &mut dyn FnMut(&dyn StateBackend) -> Result<(), StateError>,
    ) -> Result<(), StateError>;

    /// Idempotent.
    fn close(&self) -> Result<(), StateError>;
}
