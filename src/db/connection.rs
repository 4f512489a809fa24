//! Single-connection statement execution.
//!
//! [`Connection`] is the capability the executor and telemetry collector are
//! written against: run one statement with optional named parameters and get
//! back either rows or a completion acknowledgement. [`DbConnection`] is the
//! sqlx-backed implementation over a pooled connection.
//!
//! # Architecture
//!
//! Each backend has its own submodule with the same shape:
//! - statements without parameters go through the raw text protocol, which
//!   also accepts statements that cannot be prepared (`SHOW STATUS`, `SET`)
//! - statements with parameters are rewritten to positional placeholders
//!   and bound
//!
//! The stream from `fetch_many` is drained into rows plus an affected-row
//! count, then classified by [`classify`].

use crate::db::params::{PreparedStatement, prepare_named};
use crate::db::types::RowToJson;
use crate::error::{DbError, DbResult};
use crate::models::{DatabaseType, QueryParams, QueryResult, StatementOutcome};
use futures_util::{Stream, StreamExt};
use serde_json::Value as JsonValue;
use sqlx::pool::PoolConnection;
use sqlx::{Either, MySql, Postgres, Sqlite};
use std::future::Future;
use tracing::debug;

/// Executes statements on one database session.
///
/// Session state (profiling flags, `SET` variables) persists between calls,
/// so callers that depend on it must hold the connection exclusively.
pub trait Connection: Send {
    /// Run one statement. `params` binds `:name` placeholders.
    ///
    /// Implementations that cannot tell a command from a query may return
    /// `DbError::NoResultSet` for a statement without a result set; the
    /// executor treats it as a completion. [`DbConnection`] always
    /// classifies the statement itself.
    fn execute(
        &mut self,
        sql: &str,
        params: Option<&QueryParams>,
    ) -> impl Future<Output = DbResult<StatementOutcome>> + Send;

    /// Backend this connection talks to.
    fn db_type(&self) -> DatabaseType;

    /// Run a statement for its side effect only.
    fn execute_command(
        &mut self,
        sql: &str,
        params: Option<&QueryParams>,
    ) -> impl Future<Output = DbResult<u64>> + Send {
        async move {
            match self.execute(sql, params).await? {
                StatementOutcome::Completed { rows_affected } => Ok(rows_affected),
                StatementOutcome::Rows(_) => Ok(0),
            }
        }
    }
}

/// A pooled sqlx connection for any supported backend.
#[derive(Debug)]
pub enum DbConnection {
    MySql(PoolConnection<MySql>),
    Postgres(PoolConnection<Postgres>),
    SQLite(PoolConnection<Sqlite>),
}

impl DbConnection {
    /// Detach from the pool when dropped instead of returning to it.
    ///
    /// Used when a deadline abandons a statement mid-flight and the session
    /// state can no longer be trusted.
    pub fn close_on_drop(&mut self) {
        match self {
            DbConnection::MySql(conn) => conn.close_on_drop(),
            DbConnection::Postgres(conn) => conn.close_on_drop(),
            DbConnection::SQLite(conn) => conn.close_on_drop(),
        }
    }
}

impl Connection for DbConnection {
    async fn execute(
        &mut self,
        sql: &str,
        params: Option<&QueryParams>,
    ) -> DbResult<StatementOutcome> {
        debug!(
            sql = %sql,
            params = params.map_or(0, QueryParams::len),
            db_type = %self.db_type(),
            "Executing statement"
        );

        // Empty parameter maps take the raw path so non-preparable statements still run.
        let params = params.filter(|p| !p.is_empty());
        match self {
            DbConnection::MySql(conn) => mysql::execute(conn, sql, params).await,
            DbConnection::Postgres(conn) => postgres::execute(conn, sql, params).await,
            DbConnection::SQLite(conn) => sqlite::execute(conn, sql, params).await,
        }
    }

    fn db_type(&self) -> DatabaseType {
        match self {
            DbConnection::MySql(_) => DatabaseType::MySQL,
            DbConnection::Postgres(_) => DatabaseType::PostgreSQL,
            DbConnection::SQLite(_) => DatabaseType::SQLite,
        }
    }
}

// =============================================================================
// Common Helper Functions
// =============================================================================

/// Rows and affected-row count gathered from a `fetch_many` stream.
#[derive(Debug, Default)]
struct Drained {
    columns: Vec<String>,
    rows: Vec<serde_json::Map<String, JsonValue>>,
    rows_affected: u64,
}

async fn drain<S, Q, R>(mut stream: S, rows_affected: impl Fn(&Q) -> u64) -> DbResult<Drained>
where
    S: Stream<Item = Result<Either<Q, R>, sqlx::Error>> + Unpin,
    R: RowToJson,
{
    let mut drained = Drained::default();
    while let Some(item) = stream.next().await {
        match item.map_err(DbError::from)? {
            Either::Left(done) => drained.rows_affected += rows_affected(&done),
            Either::Right(row) => {
                if drained.columns.is_empty() {
                    drained.columns = row.column_names();
                }
                drained.rows.push(row.to_json_map(true));
            }
        }
    }
    Ok(drained)
}

/// Decide between a tabular result and a completion signal.
///
/// A statement that returned no rows is described: reported columns mean a
/// zero-row query, none mean a command. The affected-row count only fills in
/// the completion, since SQLite keeps reporting the last write's count for
/// statements that change nothing.
async fn classify<F>(drained: Drained, describe: F) -> StatementOutcome
where
    F: Future<Output = Result<Vec<String>, sqlx::Error>>,
{
    if !drained.rows.is_empty() {
        return StatementOutcome::Rows(QueryResult::new(drained.columns, drained.rows));
    }
    let completed = StatementOutcome::Completed {
        rows_affected: drained.rows_affected,
    };
    match describe.await {
        Ok(columns) if !columns.is_empty() => {
            StatementOutcome::Rows(QueryResult::new(columns, Vec::new()))
        }
        Ok(_) => completed,
        Err(e) => {
            debug!(error = %e, "Describe failed, treating statement as a command");
            completed
        }
    }
}

fn described_columns<C: sqlx::Column>(columns: &[C]) -> Vec<String> {
    columns.iter().map(|c| c.name().to_string()).collect()
}

// =============================================================================
// Database-Specific Implementations
// =============================================================================

mod mysql {
    use super::*;
    use crate::db::params::bind_mysql_param;
    use sqlx::mysql::{MySqlConnection, MySqlQueryResult};
    use sqlx::Executor;

    pub async fn execute(
        conn: &mut MySqlConnection,
        sql: &str,
        params: Option<&QueryParams>,
    ) -> DbResult<StatementOutcome> {
        match params {
            None => {
                let drained = drain(conn.fetch_many(sql), MySqlQueryResult::rows_affected).await?;
                let describe = async {
                    let described = conn.describe(sql).await?;
                    Ok::<_, sqlx::Error>(described_columns(described.columns()))
                };
                Ok(classify(drained, describe).await)
            }
            Some(params) => {
                let PreparedStatement { sql, values } =
                    prepare_named(sql, params, DatabaseType::MySQL)?;
                let mut query = sqlx::query(&sql);
                for value in values {
                    query = bind_mysql_param(query, value);
                }
                let drained =
                    drain(conn.fetch_many(query), MySqlQueryResult::rows_affected).await?;
                let describe = async {
                    let described = conn.describe(&sql).await?;
                    Ok::<_, sqlx::Error>(described_columns(described.columns()))
                };
                Ok(classify(drained, describe).await)
            }
        }
    }
}

mod postgres {
    use super::*;
    use crate::db::params::bind_postgres_param;
    use sqlx::postgres::{PgConnection, PgQueryResult};
    use sqlx::Executor;

    pub async fn execute(
        conn: &mut PgConnection,
        sql: &str,
        params: Option<&QueryParams>,
    ) -> DbResult<StatementOutcome> {
        match params {
            None => {
                let drained = drain(conn.fetch_many(sql), PgQueryResult::rows_affected).await?;
                let describe = async {
                    let described = conn.describe(sql).await?;
                    Ok::<_, sqlx::Error>(described_columns(described.columns()))
                };
                Ok(classify(drained, describe).await)
            }
            Some(params) => {
                let PreparedStatement { sql, values } =
                    prepare_named(sql, params, DatabaseType::PostgreSQL)?;
                let mut query = sqlx::query(&sql);
                for value in values {
                    query = bind_postgres_param(query, value);
                }
                let drained = drain(conn.fetch_many(query), PgQueryResult::rows_affected).await?;
                let describe = async {
                    let described = conn.describe(&sql).await?;
                    Ok::<_, sqlx::Error>(described_columns(described.columns()))
                };
                Ok(classify(drained, describe).await)
            }
        }
    }
}

mod sqlite {
    use super::*;
    use crate::db::params::bind_sqlite_param;
    use sqlx::sqlite::{SqliteConnection, SqliteQueryResult};
    use sqlx::Executor;

    pub async fn execute(
        conn: &mut SqliteConnection,
        sql: &str,
        params: Option<&QueryParams>,
    ) -> DbResult<StatementOutcome> {
        match params {
            None => {
                let drained =
                    drain(conn.fetch_many(sql), SqliteQueryResult::rows_affected).await?;
                let describe = async {
                    let described = conn.describe(sql).await?;
                    Ok::<_, sqlx::Error>(described_columns(described.columns()))
                };
                Ok(classify(drained, describe).await)
            }
            Some(params) => {
                let PreparedStatement { sql, values } =
                    prepare_named(sql, params, DatabaseType::SQLite)?;
                let mut query = sqlx::query(&sql);
                for value in values {
                    query = bind_sqlite_param(query, value);
                }
                let drained =
                    drain(conn.fetch_many(query), SqliteQueryResult::rows_affected).await?;
                let describe = async {
                    let described = conn.describe(&sql).await?;
                    Ok::<_, sqlx::Error>(described_columns(described.columns()))
                };
                Ok(classify(drained, describe).await)
            }
        }
    }
}
