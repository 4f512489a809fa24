//! Scripted connection used to exercise the executor and telemetry collector
//! without a database server.

#![allow(dead_code)]

use neurodb::db::Connection;
use neurodb::error::{DbError, DbResult};
use neurodb::models::{DatabaseType, QueryParams, QueryResult, StatementOutcome};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::time::Duration;

/// What the stub answers for a statement.
#[derive(Debug, Clone)]
pub enum Reply {
    Rows(QueryResult),
    Completed(u64),
    NoResultSet,
    Fail(String),
}

/// Records every statement it is sent and answers from a script.
///
/// Statements without a scripted reply get an empty result with no columns.
pub struct StubConnection {
    db_type: DatabaseType,
    replies: HashMap<String, Reply>,
    fail_after: Option<usize>,
    delay: Option<(String, Duration)>,
    pub sent: Vec<String>,
}

impl StubConnection {
    pub fn new(db_type: DatabaseType) -> Self {
        Self {
            db_type,
            replies: HashMap::new(),
            fail_after: None,
            delay: None,
            sent: Vec::new(),
        }
    }

    pub fn reply(mut self, sql: &str, reply: Reply) -> Self {
        self.replies.insert(sql.to_string(), reply);
        self
    }

    /// Reject every statement after the first `n`.
    pub fn fail_after(mut self, n: usize) -> Self {
        self.fail_after = Some(n);
        self
    }

    /// Sleep before answering `sql`.
    pub fn delay(mut self, sql: &str, duration: Duration) -> Self {
        self.delay = Some((sql.to_string(), duration));
        self
    }
}

impl Connection for StubConnection {
    async fn execute(
        &mut self,
        sql: &str,
        _params: Option<&QueryParams>,
    ) -> DbResult<StatementOutcome> {
        self.sent.push(sql.to_string());

        if let Some((slow_sql, duration)) = &self.delay {
            if slow_sql == sql {
                tokio::time::sleep(*duration).await;
            }
        }

        if self.fail_after.is_some_and(|n| self.sent.len() > n) {
            return Err(DbError::database(
                "permission denied",
                Some("42501".to_string()),
                "Grant the required privilege",
            ));
        }

        match self.replies.get(sql) {
            Some(Reply::Rows(result)) => Ok(StatementOutcome::Rows(result.clone())),
            Some(Reply::Completed(n)) => Ok(StatementOutcome::Completed { rows_affected: *n }),
            Some(Reply::NoResultSet) => Err(DbError::NoResultSet),
            Some(Reply::Fail(message)) => Err(DbError::database(message.clone(), None, "")),
            None => Ok(StatementOutcome::Rows(QueryResult::default())),
        }
    }

    fn db_type(&self) -> DatabaseType {
        self.db_type
    }
}

/// Build a result from column names and rows of values.
pub fn table(columns: &[&str], rows: &[&[JsonValue]]) -> QueryResult {
    QueryResult::new(
        columns.iter().map(|c| c.to_string()).collect(),
        rows.iter()
            .map(|values| {
                columns
                    .iter()
                    .map(|c| c.to_string())
                    .zip(values.iter().cloned())
                    .collect()
            })
            .collect(),
    )
}
