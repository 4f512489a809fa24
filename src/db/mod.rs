//! Database abstraction layer.
//!
//! This module provides database access functionality:
//! - Connection pool management
//! - Single-connection statement execution
//! - Named parameter binding
//! - SQL dialect handling
//! - Type mappings
//! - The high-level `Database` facade

pub mod connection;
pub mod database;
pub(crate) mod dialect;
pub mod executor;
pub mod params;
pub mod pool;
pub mod types;

pub use connection::{Connection, DbConnection};
pub use database::{Database, SelectOutput};
pub use executor::{FailurePolicy, QueryExecutor, ResultMode};
pub use pool::DbPool;
