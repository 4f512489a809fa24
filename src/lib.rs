//! neurodb
//!
//! Database access layer for MySQL, PostgreSQL and SQLite with per-query
//! performance telemetry. A telemetry-collecting query is wrapped in
//! backend-specific diagnostic probes whose results are condensed into a
//! [`QueryMetrics`] record, without ever letting a failed probe affect the
//! query's own result.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod output;
pub mod telemetry;

pub use config::Config;
pub use db::{Database, SelectOutput};
pub use error::{DbError, DbResult};
pub use models::{QueryMetrics, QueryParams, StatementOutcome};
pub use telemetry::{TelemetryCollector, create_collector};
