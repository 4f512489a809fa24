//! Data models for neurodb.
//!
//! This module re-exports all model types used throughout the crate.

pub mod connection;
pub mod metrics;
pub mod query;

// Re-export commonly used types
pub use connection::{ConnectionConfig, ConnectionConfigError, DatabaseType};
pub use metrics::QueryMetrics;
pub use query::{
    DEFAULT_QUERY_TIMEOUT_SECS, MAX_QUERY_TIMEOUT_SECS, QueryParam, QueryParams, QueryResult,
    StatementOutcome,
};
