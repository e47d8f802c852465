//! Connector contract (spec §6.2). Concrete connector implementations
//! (CSV, Parquet, S3, JDBC) are out of scope — only the trait surface
//! and small in-memory test doubles live here.

use serde_json::Value;
use thiserror::Error;

use crate::chunk::Chunk;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("connector error: {0}")]
pub struct ConnectorIoError(pub String);

#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionTestResult {
    pub is_successful: bool,
    pub message: String,
}

pub trait SourceConnector: Send + Sync {
    fn read_chunks(&self) -> Result<Vec<Chunk>, ConnectorIoError>;

    fn test_connection(&self) -> Option<ConnectionTestResult> {
        None
    }

    fn read_incremental(&self, _cursor_field: &str, _after_value: &Value) -> Result<Vec<Chunk>, ConnectorIoError> {
        self.read_chunks()
    }
}

pub trait DestinationConnector: Send + Sync {
    fn write(&self, data: &Chunk, options: &Value) -> Result<(), ConnectorIoError>;
}

/// An in-memory source connector, for tests and the demo binary: reads
/// back whatever chunks it was constructed with.
pub struct InMemorySourceConnector {
    chunks: Vec<Chunk>,
}

impl InMemorySourceConnector {
    pub fn new(chunks: Vec<Chunk>) -> Self {
        Self { chunks }
    }
}

impl SourceConnector for InMemorySourceConnector {
    fn read_chunks(&self) -> Result<Vec<Chunk>, ConnectorIoError> {
        Ok(self.chunks.clone())
    }

    fn test_connection(&self) -> Option<ConnectionTestResult> {
        Some(ConnectionTestResult { is_successful: true, message: "in-memory source ready".to_string() })
    }
}

/// An in-memory destination connector that records every write it
/// receives, for assertions in tests.
#[derive(Default)]
pub struct RecordingDestinationConnector {
    pub writes: std::sync::Mutex<Vec<Chunk>>,
}

impl DestinationConnector for RecordingDestinationConnector {
    fn write(&self, data: &Chunk, _options: &Value) -> Result<(), ConnectorIoError> {
        self.writes.lock().unwrap().push(data.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn in_memory_source_reads_back_its_chunks() {
        let chunk = Chunk::new(vec!["a".into()], vec![vec![json!(1)]]);
        let connector = InMemorySourceConnector::new(vec![chunk.clone()]);
        assert_eq!(connector.read_chunks().unwrap(), vec![chunk]);
    }

    #[test]
    fn recording_destination_captures_writes() {
        let connector = RecordingDestinationConnector::default();
        let chunk = Chunk::new(vec!["a".into()], vec![vec![json!(1)]]);
        connector.write(&chunk, &json!({})).unwrap();
        assert_eq!(connector.writes.lock().unwrap().len(), 1);
    }
}
