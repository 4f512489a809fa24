//! Query execution engine.
//!
//! [`QueryExecutor`] runs one statement at a time on a borrowed
//! [`Connection`] and normalizes the outcome. The caller picks how failures
//! are treated:
//! - [`FailurePolicy::Strict`] wraps the failure in `DbError::QueryExecution`
//! - [`FailurePolicy::Lenient`] logs a warning and yields `None`
//!
//! and whether rows are wanted at all:
//! - [`ResultMode::Rows`] returns the tabular result, or a completion signal
//!   when the statement produced no result set
//! - [`ResultMode::Completion`] discards rows and reports completion only

use crate::db::connection::Connection;
use crate::error::{DbError, DbResult};
use crate::models::{DatabaseType, QueryParams, StatementOutcome};
use tracing::{debug, error, warn};

/// How an execution failure is reported to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Propagate as `DbError::QueryExecution`.
    Strict,
    /// Log and collapse to `None`.
    Lenient,
}

/// What the caller wants back from a successful statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultMode {
    Rows,
    Completion,
}

/// Executes statements on one exclusively borrowed connection.
pub struct QueryExecutor<'c, C: Connection> {
    connection: &'c mut C,
}

impl<'c, C: Connection> QueryExecutor<'c, C> {
    pub fn new(connection: &'c mut C) -> Self {
        Self { connection }
    }

    /// Backend of the underlying connection.
    pub fn db_type(&self) -> DatabaseType {
        self.connection.db_type()
    }

    /// Execute one statement.
    ///
    /// Returns `Ok(None)` only under [`FailurePolicy::Lenient`] when the
    /// statement failed. A driver "no result set" signal is not a failure; it
    /// becomes `StatementOutcome::Completed`.
    pub async fn execute(
        &mut self,
        sql: &str,
        params: Option<&QueryParams>,
        policy: FailurePolicy,
        mode: ResultMode,
    ) -> DbResult<Option<StatementOutcome>> {
        let result = match mode {
            ResultMode::Rows => self.connection.execute(sql, params).await,
            ResultMode::Completion => self
                .connection
                .execute_command(sql, params)
                .await
                .map(|rows_affected| StatementOutcome::Completed { rows_affected }),
        };

        match result {
            Ok(outcome) => {
                debug!(sql = %sql, rows = outcome.row_count(), "Statement succeeded");
                Ok(Some(outcome))
            }
            Err(DbError::NoResultSet) => {
                debug!(sql = %sql, "Statement returned no result set");
                Ok(Some(StatementOutcome::Completed { rows_affected: 0 }))
            }
            Err(e) => match policy {
                FailurePolicy::Strict => {
                    error!(sql = %sql, error = %e, "Query execution failed");
                    Err(DbError::query_execution(sql, params.cloned(), e))
                }
                FailurePolicy::Lenient => {
                    warn!(sql = %sql, error = %e, "Statement failed, continuing");
                    Ok(None)
                }
            },
        }
    }

    /// Strict row-returning execution, the common case for caller queries.
    pub async fn query(
        &mut self,
        sql: &str,
        params: Option<&QueryParams>,
    ) -> DbResult<StatementOutcome> {
        let outcome = self
            .execute(sql, params, FailurePolicy::Strict, ResultMode::Rows)
            .await?;
        // Strict execution never collapses to None.
        Ok(outcome.unwrap_or(StatementOutcome::Completed { rows_affected: 0 }))
    }
}
