//! High-level database interface.
//!
//! [`Database`] ties the pool, the executor and the telemetry collector
//! together. Every call checks out one connection, uses it exclusively for
//! the whole operation and hands it back afterwards. A call that outlives the
//! configured deadline is abandoned and its connection closed rather than
//! returned to the pool.

use crate::config::DatabaseConfig;
use crate::db::connection::DbConnection;
use crate::db::dialect::is_query;
use crate::db::executor::QueryExecutor;
use crate::db::pool::DbPool;
use crate::error::{DbError, DbResult};
use crate::models::{
    ConnectionConfig, DEFAULT_QUERY_TIMEOUT_SECS, DatabaseType, MAX_QUERY_TIMEOUT_SECS,
    QueryMetrics, QueryParams, StatementOutcome,
};
use crate::telemetry::create_collector;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::{error::Elapsed, timeout};
use tracing::{debug, warn};

/// Result of [`Database::select`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectOutput {
    pub result: StatementOutcome,
    /// Present only when telemetry was requested.
    pub metrics: Option<QueryMetrics>,
}

#[derive(Debug, Clone)]
pub struct Database {
    pool: DbPool,
    query_timeout: Duration,
}

impl Database {
    /// Open a pool for `config`.
    pub async fn connect(config: &ConnectionConfig) -> DbResult<Self> {
        let pool = DbPool::connect(config).await?;
        Ok(Self::from_pool(pool))
    }

    /// Parse a connection URL (pool options in the query string) and connect.
    pub async fn connect_url(url: &str) -> DbResult<Self> {
        let config = DatabaseConfig::parse(url)
            .map_err(DbError::config)?
            .to_connection_config()?;
        Self::connect(&config).await
    }

    pub fn from_pool(pool: DbPool) -> Self {
        Self {
            pool,
            query_timeout: Duration::from_secs(DEFAULT_QUERY_TIMEOUT_SECS),
        }
    }

    /// Deadline applied to each call as a whole, capped at the maximum.
    pub fn with_query_timeout(mut self, query_timeout: Duration) -> Self {
        self.query_timeout = query_timeout.min(Duration::from_secs(MAX_QUERY_TIMEOUT_SECS));
        self
    }

    pub fn db_type(&self) -> DatabaseType {
        self.pool.db_type()
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Run a query, optionally wrapped in telemetry collection.
    ///
    /// With `capture_telemetry` the backend must have a telemetry collector;
    /// SQLite fails with `DbError::UnsupportedBackend` before any statement
    /// is sent.
    pub async fn select(
        &self,
        query: &str,
        params: Option<&QueryParams>,
        capture_telemetry: bool,
    ) -> DbResult<SelectOutput> {
        let db_type = self.db_type();
        let mut conn = self.pool.acquire().await?;
        let work = run_select(&mut conn, db_type, query, params, capture_telemetry);
        let output = timeout(self.query_timeout, work).await;
        self.settle("select", conn, output)
    }

    /// Show the backend's execution plan for `query` without running it.
    ///
    /// MySQL and PostgreSQL use `EXPLAIN`; SQLite uses `EXPLAIN QUERY PLAN`
    /// for queries and plain `EXPLAIN` (bytecode) for other statements.
    pub async fn explain(
        &self,
        query: &str,
        params: Option<&QueryParams>,
    ) -> DbResult<StatementOutcome> {
        let sql = explain_sql(self.db_type(), query);
        debug!(sql = %sql, "Explaining query");

        let mut conn = self.pool.acquire().await?;
        let work = async { QueryExecutor::new(&mut conn).query(&sql, params).await };
        let output = timeout(self.query_timeout, work).await;
        self.settle("explain", conn, output)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Hand the connection back, or close it when the deadline expired
    /// while a statement was still in flight.
    fn settle<T>(
        &self,
        operation: &str,
        mut conn: DbConnection,
        output: Result<DbResult<T>, Elapsed>,
    ) -> DbResult<T> {
        match output {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    operation = operation,
                    timeout_secs = self.query_timeout.as_secs(),
                    "Deadline expired, closing connection"
                );
                conn.close_on_drop();
                Err(DbError::timeout(
                    operation,
                    self.query_timeout.as_secs() as u32,
                ))
            }
        }
    }
}

async fn run_select(
    conn: &mut DbConnection,
    db_type: DatabaseType,
    query: &str,
    params: Option<&QueryParams>,
    capture_telemetry: bool,
) -> DbResult<SelectOutput> {
    let mut executor = QueryExecutor::new(conn);
    if !capture_telemetry {
        let result = executor.query(query, params).await?;
        return Ok(SelectOutput {
            result,
            metrics: None,
        });
    }

    let mut collector = create_collector(db_type, executor)?;
    let (result, metrics) = collector.collect_metrics(query, params).await?;
    Ok(SelectOutput {
        result,
        metrics: Some(metrics),
    })
}

/// Build the plan statement for `query`.
fn explain_sql(db_type: DatabaseType, query: &str) -> String {
    match db_type {
        DatabaseType::SQLite if is_query(db_type, query) => {
            format!("EXPLAIN QUERY PLAN {}", query)
        }
        DatabaseType::SQLite | DatabaseType::MySQL | DatabaseType::PostgreSQL => {
            format!("EXPLAIN {}", query)
        }
    }
}
