//! Query telemetry collection.
//!
//! A [`TelemetryCollector`] wraps one caller query with backend-specific
//! diagnostic probes and condenses what they report into a [`QueryMetrics`]
//! record. Collection runs three ordered steps on one connection:
//!
//! 1. **arm** - enable session instrumentation; failure is logged and ignored
//! 2. **measure** - run and time the caller's query; failure aborts collection
//! 3. **harvest** - read indexes, table scans, temp tables and memory; each
//!    failed probe degrades only its own field
//!
//! Backends differ only in their [`ProbeSet`]. Supporting another backend
//! means adding a [`TelemetryBackend`] variant and its probe table.

mod factory;

pub use factory::create_collector;

use crate::db::connection::Connection;
use crate::db::executor::{FailurePolicy, QueryExecutor, ResultMode};
use crate::error::DbResult;
use crate::models::{DatabaseType, QueryMetrics, QueryParams, QueryResult, StatementOutcome};
use chrono::Utc;
use serde_json::Value as JsonValue;
use std::time::Instant;
use tracing::{debug, warn};

/// Backends that have a telemetry probe table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelemetryBackend {
    MySql,
    Postgres,
}

impl TelemetryBackend {
    /// `None` for connection types without telemetry support.
    pub fn from_database_type(db_type: DatabaseType) -> Option<Self> {
        match db_type {
            DatabaseType::MySQL => Some(Self::MySql),
            DatabaseType::PostgreSQL => Some(Self::Postgres),
            DatabaseType::SQLite => None,
        }
    }

    pub fn probes(self) -> &'static ProbeSet {
        match self {
            Self::MySql => &MYSQL_PROBES,
            Self::Postgres => &POSTGRES_PROBES,
        }
    }

    /// Map harvested probe results onto the metrics fields.
    ///
    /// Both backends currently share the same shape: indexes are a column of
    /// names, counters are read from the first row.
    fn map_harvest(self, harvest: &Harvest) -> HarvestedFields {
        let probes = self.probes();
        HarvestedFields {
            indexes_used: harvest
                .indexes
                .as_ref()
                .map(|r| read_names(r, probes.indexes.column))
                .unwrap_or_default(),
            table_scans: harvest
                .table_scans
                .as_ref()
                .and_then(|r| read_counter(r, probes.table_scans.column))
                .unwrap_or(0),
            temp_tables: harvest
                .temp_tables
                .as_ref()
                .and_then(|r| read_counter(r, probes.temp_tables.column))
                .unwrap_or(0),
            memory_used: harvest
                .memory
                .as_ref()
                .and_then(|r| read_counter(r, probes.memory.column)),
        }
    }
}

/// A diagnostic statement and the result column its value is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Probe {
    pub sql: &'static str,
    pub column: &'static str,
}

/// Fixed diagnostic statements for one backend.
#[derive(Debug)]
pub struct ProbeSet {
    /// Session statement that enables instrumentation.
    pub arm: &'static str,
    pub indexes: Probe,
    pub table_scans: Probe,
    pub temp_tables: Probe,
    pub memory: Probe,
}

static MYSQL_PROBES: ProbeSet = ProbeSet {
    arm: "SET profiling = 1",
    indexes: Probe {
        sql: "SELECT index_name FROM information_schema.statistics WHERE table_schema = DATABASE()",
        column: "index_name",
    },
    table_scans: Probe {
        sql: "SHOW STATUS LIKE 'Handler_read%'",
        column: "Value",
    },
    temp_tables: Probe {
        sql: "SHOW STATUS LIKE 'Created_tmp%'",
        column: "Value",
    },
    memory: Probe {
        sql: "SHOW STATUS LIKE 'Memory_used'",
        column: "Value",
    },
};

static POSTGRES_PROBES: ProbeSet = ProbeSet {
    arm: "SET log_statement_stats = on",
    indexes: Probe {
        sql: "SELECT indexname FROM pg_indexes WHERE schemaname = current_schema()",
        column: "indexname",
    },
    table_scans: Probe {
        sql: "SELECT COALESCE(sum(seq_scan), 0) AS scans FROM pg_stat_all_tables",
        column: "scans",
    },
    temp_tables: Probe {
        sql: "SELECT COALESCE(sum(temp_files), 0) AS temp_tables FROM pg_stat_database",
        column: "temp_tables",
    },
    // `unit` is a bare unit such as "kB"; pg_size_bytes needs a number in front.
    memory: Probe {
        sql: "SELECT setting::bigint * pg_size_bytes('1' || unit) AS bytes FROM pg_settings WHERE name = 'work_mem'",
        column: "bytes",
    },
};

/// Raw probe results; `None` where the probe failed or was not tabular.
#[derive(Debug, Default)]
struct Harvest {
    indexes: Option<QueryResult>,
    table_scans: Option<QueryResult>,
    temp_tables: Option<QueryResult>,
    memory: Option<QueryResult>,
}

#[derive(Debug, PartialEq)]
struct HarvestedFields {
    indexes_used: Vec<String>,
    table_scans: u64,
    temp_tables: u64,
    memory_used: Option<u64>,
}

/// Runs one query with telemetry on an exclusively borrowed connection.
pub struct TelemetryCollector<'c, C: Connection> {
    backend: TelemetryBackend,
    executor: QueryExecutor<'c, C>,
}

impl<'c, C: Connection> TelemetryCollector<'c, C> {
    pub fn new(backend: TelemetryBackend, executor: QueryExecutor<'c, C>) -> Self {
        Self { backend, executor }
    }

    pub fn backend(&self) -> TelemetryBackend {
        self.backend
    }

    /// Run `query` between the arm and harvest probes.
    ///
    /// Only a failure of `query` itself is returned as an error
    /// (`DbError::QueryExecution`); in that case no harvest probe runs.
    pub async fn collect_metrics(
        &mut self,
        query: &str,
        params: Option<&QueryParams>,
    ) -> DbResult<(StatementOutcome, QueryMetrics)> {
        let probes = self.backend.probes();

        let armed = self
            .executor
            .execute(probes.arm, None, FailurePolicy::Lenient, ResultMode::Completion)
            .await?;
        if armed.is_none() {
            warn!(backend = ?self.backend, "Instrumentation not enabled, collecting without it");
        }

        let start = Instant::now();
        let result = self
            .executor
            .execute(query, params, FailurePolicy::Strict, ResultMode::Rows)
            .await?
            .unwrap_or(StatementOutcome::Completed { rows_affected: 0 });
        let execution_time = start.elapsed().as_secs_f64();

        let harvest = Harvest {
            indexes: self.probe("indexes", &probes.indexes).await?,
            table_scans: self.probe("table_scans", &probes.table_scans).await?,
            temp_tables: self.probe("temp_tables", &probes.temp_tables).await?,
            memory: self.probe("memory", &probes.memory).await?,
        };
        let fields = self.backend.map_harvest(&harvest);

        let metrics = QueryMetrics {
            query: query.to_string(),
            params: params.cloned(),
            execution_time,
            row_count: result.row_count(),
            timestamp: Utc::now(),
            indexes_used: fields.indexes_used,
            table_scans: fields.table_scans,
            temp_tables: fields.temp_tables,
            memory_used: fields.memory_used,
        };

        debug!(
            backend = ?self.backend,
            execution_time = metrics.execution_time,
            row_count = metrics.row_count,
            indexes = metrics.indexes_used.len(),
            table_scans = metrics.table_scans,
            temp_tables = metrics.temp_tables,
            memory_used = ?metrics.memory_used,
            "Collected query metrics"
        );

        Ok((result, metrics))
    }

    async fn probe(&mut self, name: &'static str, probe: &Probe) -> DbResult<Option<QueryResult>> {
        let outcome = self
            .executor
            .execute(probe.sql, None, FailurePolicy::Lenient, ResultMode::Rows)
            .await?;
        let result = outcome.and_then(StatementOutcome::into_rows);
        if result.is_none() {
            warn!(probe = name, backend = ?self.backend, "Probe unavailable, using default");
        }
        Ok(result)
    }
}

/// Every value of `column`, in row order. Missing column yields an empty list.
fn read_names(result: &QueryResult, column: &str) -> Vec<String> {
    let Some(values) = result.column_values(column) else {
        warn!(column = column, "Probe result has no such column");
        return Vec::new();
    };
    values
        .filter_map(|value| match value {
            JsonValue::String(s) => Some(s.clone()),
            JsonValue::Null => None,
            other => Some(other.to_string()),
        })
        .collect()
}

/// First-row value of `column` as a non-negative count.
fn read_counter(result: &QueryResult, column: &str) -> Option<u64> {
    let value = result.first_value(column)?;
    let parsed = parse_counter(value);
    if parsed.is_none() {
        warn!(column = column, value = %value, "Probe value is not a non-negative integer");
    }
    parsed
}

/// Accept JSON numbers and numeric strings (`SHOW STATUS`, NUMERIC as text).
fn parse_counter(value: &JsonValue) -> Option<u64> {
    match value {
        JsonValue::Number(n) => n.as_u64().or_else(|| n.as_f64().and_then(float_to_count)),
        JsonValue::String(s) => {
            let s = s.trim();
            s.parse::<u64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(float_to_count))
        }
        _ => None,
    }
}

fn float_to_count(v: f64) -> Option<u64> {
    (v.is_finite() && v >= 0.0 && v <= u64::MAX as f64).then(|| v.trunc() as u64)
}
