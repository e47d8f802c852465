//! sqlflow-connectors: the SQL Engine and Connector contracts (spec
//! §6.1-§6.3), plus small in-memory reference implementations used by
//! tests and the demo binary. Concrete connectors (CSV, Parquet, S3,
//! JDBC) and the real analytic SQL engine are out of scope (§1).

pub mod chunk;
pub mod connector;
pub mod engine;
pub mod registry;

pub use chunk::Chunk;
pub use connector::{
    ConnectionTestResult, ConnectorIoError, DestinationConnector, InMemorySourceConnector,
    RecordingDestinationConnector, SourceConnector,
};
pub use engine::{Cursor, EngineError, InMemorySqlEngine, SqlEngine, VecCursor};
pub use registry::{ConnectorRegistry, ConnectorSpec, RegistryError, ResolvedConfiguration};
