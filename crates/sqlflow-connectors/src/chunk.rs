//! A connector-agnostic columnar chunk (spec §6.2 "A chunk exposes a
//! pandas-compatible dataframe and a columnar Arrow view plus `len`").
//!
//! Concrete connectors and the SQL engine are out of scope; this is the
//! minimal shape handlers and in-memory test doubles need to agree on.

use serde_json::Value;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Chunk {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl Chunk {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self { columns, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Maximum value of `column` across this chunk's rows, compared as
    /// JSON scalars (numbers numerically, strings lexicographically).
    /// Used by the Load Handler to compute the new watermark cursor.
    pub fn max_in_column(&self, column: &str) -> Option<Value> {
        let idx = self.column_index(column)?;
        self.rows.iter().filter_map(|r| r.get(idx).cloned()).max_by(compare_values)
    }
}

fn compare_values(a: &Value, b: &Value) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .zip(y.as_f64())
            .map(|(x, y)| x.partial_cmp(&y).unwrap_or(Ordering::Equal))
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => Ordering::Equal,
    }
}
