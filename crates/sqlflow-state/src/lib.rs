pub mod backend;
pub mod config;
pub mod error;
pub mod history;
pub mod memory;
#[cfg(feature = "pg_demo")]
pub mod postgres;
pub mod schema;
pub mod watermark;

pub use backend::StateBackend;
pub use config::DbConfig;
pub use error::StateError;
pub use history::{record_execution_end, record_execution_start, ExecutionRecord, ExecutionStatus};
pub use memory::InMemoryStateBackend;
#[cfg(feature = "pg_demo")]
pub use postgres::PostgresStateBackend;
pub use watermark::WatermarkManager;
