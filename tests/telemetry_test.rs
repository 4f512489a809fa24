//! Telemetry collector contract tests.
//!
//! These run against a scripted connection and check:
//! - statement order (arm, measure, then the four harvest probes)
//! - that probe failures only degrade their own metrics field
//! - that a failing primary query aborts before any harvest probe
//! - backend selection by the collector factory

mod common;

use common::{Reply, StubConnection, table};
use neurodb::db::QueryExecutor;
use neurodb::error::DbError;
use neurodb::models::{DatabaseType, QueryParams, StatementOutcome};
use neurodb::telemetry::{TelemetryBackend, create_collector};
use serde_json::json;
use std::time::Duration;

const PRIMARY: &str = "SELECT * FROM t";

fn three_rows() -> Reply {
    Reply::Rows(table(
        &["id", "name"],
        &[
            &[json!(1), json!("a")],
            &[json!(2), json!("b")],
            &[json!(3), json!("c")],
        ],
    ))
}

fn expected_statements(backend: TelemetryBackend, primary: &str) -> Vec<String> {
    let probes = backend.probes();
    vec![
        probes.arm.to_string(),
        primary.to_string(),
        probes.indexes.sql.to_string(),
        probes.table_scans.sql.to_string(),
        probes.temp_tables.sql.to_string(),
        probes.memory.sql.to_string(),
    ]
}

#[tokio::test]
async fn test_three_row_scenario_with_empty_probes() {
    let mut conn = StubConnection::new(DatabaseType::MySQL)
        .reply(PRIMARY, three_rows())
        .delay(PRIMARY, Duration::from_millis(5));

    let executor = QueryExecutor::new(&mut conn);
    let mut collector = create_collector(DatabaseType::MySQL, executor).unwrap();
    let (result, metrics) = collector.collect_metrics(PRIMARY, None).await.unwrap();

    assert_eq!(result.row_count(), 3);
    assert_eq!(metrics.query, PRIMARY);
    assert_eq!(metrics.params, None);
    assert_eq!(metrics.row_count, 3);
    assert!(metrics.execution_time > 0.0);
    assert!(metrics.execution_time >= 0.005);
    assert!(metrics.indexes_used.is_empty());
    assert_eq!(metrics.table_scans, 0);
    assert_eq!(metrics.temp_tables, 0);
    assert_eq!(metrics.memory_used, None);
}

#[tokio::test]
async fn test_mysql_statement_order() {
    let mut conn = StubConnection::new(DatabaseType::MySQL).reply(PRIMARY, three_rows());
    {
        let executor = QueryExecutor::new(&mut conn);
        let mut collector = create_collector(DatabaseType::MySQL, executor).unwrap();
        collector.collect_metrics(PRIMARY, None).await.unwrap();
    }

    assert_eq!(conn.sent, expected_statements(TelemetryBackend::MySql, PRIMARY));
    assert_eq!(conn.sent[0], "SET profiling = 1");
    assert_eq!(conn.sent[3], "SHOW STATUS LIKE 'Handler_read%'");
}

#[tokio::test]
async fn test_postgres_statement_order() {
    let mut conn = StubConnection::new(DatabaseType::PostgreSQL).reply(PRIMARY, three_rows());
    {
        let executor = QueryExecutor::new(&mut conn);
        let mut collector = create_collector(DatabaseType::PostgreSQL, executor).unwrap();
        collector.collect_metrics(PRIMARY, None).await.unwrap();
    }

    assert_eq!(
        conn.sent,
        expected_statements(TelemetryBackend::Postgres, PRIMARY)
    );
    assert_eq!(conn.sent[0], "SET log_statement_stats = on");
    assert!(conn.sent[2].contains("pg_indexes"));
}

#[tokio::test]
async fn test_all_probes_failing_degrades_every_field() {
    // Arm and primary succeed, everything after is rejected.
    let mut conn = StubConnection::new(DatabaseType::PostgreSQL)
        .reply(PRIMARY, three_rows())
        .fail_after(2);

    let (result, metrics) = {
        let executor = QueryExecutor::new(&mut conn);
        let mut collector = create_collector(DatabaseType::PostgreSQL, executor).unwrap();
        collector.collect_metrics(PRIMARY, None).await.unwrap()
    };

    assert_eq!(result.row_count(), 3);
    assert_eq!(metrics.row_count, 3);
    assert!(metrics.execution_time >= 0.0);
    assert!(metrics.indexes_used.is_empty());
    assert_eq!(metrics.table_scans, 0);
    assert_eq!(metrics.temp_tables, 0);
    assert_eq!(metrics.memory_used, None);
    assert!(metrics.is_degraded());
    // Every probe was still attempted.
    assert_eq!(conn.sent.len(), 6);
}

#[tokio::test]
async fn test_primary_failure_skips_harvest() {
    let mut conn = StubConnection::new(DatabaseType::MySQL)
        .reply(PRIMARY, Reply::Fail("Table 'db.t' doesn't exist".to_string()));
    let params = QueryParams::new().with("limit", 10);

    let err = {
        let executor = QueryExecutor::new(&mut conn);
        let mut collector = create_collector(DatabaseType::MySQL, executor).unwrap();
        collector
            .collect_metrics(PRIMARY, Some(&params))
            .await
            .unwrap_err()
    };

    match err {
        DbError::QueryExecution {
            statement,
            params: bound,
            message,
            ..
        } => {
            assert_eq!(statement, PRIMARY);
            assert_eq!(bound, Some(params));
            assert!(message.contains("doesn't exist"));
        }
        other => panic!("expected QueryExecution, got {other:?}"),
    }
    assert_eq!(conn.sent, vec!["SET profiling = 1", PRIMARY]);
}

#[tokio::test]
async fn test_arm_failure_does_not_stop_collection() {
    let mut conn = StubConnection::new(DatabaseType::MySQL)
        .reply(
            "SET profiling = 1",
            Reply::Fail("Access denied; you need the SUPER privilege".to_string()),
        )
        .reply(PRIMARY, three_rows())
        .reply(
            "SELECT index_name FROM information_schema.statistics WHERE table_schema = DATABASE()",
            Reply::Rows(table(&["INDEX_NAME"], &[&[json!("PRIMARY")]])),
        );

    let (result, metrics) = {
        let executor = QueryExecutor::new(&mut conn);
        let mut collector = create_collector(DatabaseType::MySQL, executor).unwrap();
        collector.collect_metrics(PRIMARY, None).await.unwrap()
    };

    assert_eq!(result.row_count(), 3);
    assert_eq!(metrics.indexes_used, vec!["PRIMARY"]);
    assert_eq!(conn.sent, expected_statements(TelemetryBackend::MySql, PRIMARY));
}

#[tokio::test]
async fn test_mysql_probe_values_are_mapped() {
    let probes = TelemetryBackend::MySql.probes();
    let mut conn = StubConnection::new(DatabaseType::MySQL)
        .reply(probes.arm, Reply::NoResultSet)
        .reply(PRIMARY, three_rows())
        .reply(
            probes.indexes.sql,
            Reply::Rows(table(
                &["INDEX_NAME"],
                &[&[json!("PRIMARY")], &[json!("idx_email")]],
            )),
        )
        .reply(
            probes.table_scans.sql,
            Reply::Rows(table(
                &["Variable_name", "Value"],
                &[
                    &[json!("Handler_read_first"), json!("12")],
                    &[json!("Handler_read_key"), json!("340")],
                ],
            )),
        )
        .reply(
            probes.temp_tables.sql,
            Reply::Rows(table(
                &["Variable_name", "Value"],
                &[&[json!("Created_tmp_disk_tables"), json!("2")]],
            )),
        )
        .reply(
            probes.memory.sql,
            Reply::Rows(table(
                &["Variable_name", "Value"],
                &[&[json!("Memory_used"), json!("1048576")]],
            )),
        );

    let executor = QueryExecutor::new(&mut conn);
    let mut collector = create_collector(DatabaseType::MySQL, executor).unwrap();
    let (_, metrics) = collector.collect_metrics(PRIMARY, None).await.unwrap();

    assert_eq!(metrics.indexes_used, vec!["PRIMARY", "idx_email"]);
    assert_eq!(metrics.table_scans, 12);
    assert_eq!(metrics.temp_tables, 2);
    assert_eq!(metrics.memory_used, Some(1_048_576));
    assert!(!metrics.is_degraded());
}

#[tokio::test]
async fn test_postgres_probe_values_are_mapped() {
    let probes = TelemetryBackend::Postgres.probes();
    let mut conn = StubConnection::new(DatabaseType::PostgreSQL)
        .reply(probes.arm, Reply::Completed(0))
        .reply(PRIMARY, three_rows())
        .reply(
            probes.indexes.sql,
            Reply::Rows(table(
                &["indexname"],
                &[&[json!("t_pkey")], &[json!("t_name_idx")]],
            )),
        )
        // sum() over bigint is NUMERIC and arrives as text.
        .reply(
            probes.table_scans.sql,
            Reply::Rows(table(&["scans"], &[&[json!("4821")]])),
        )
        .reply(
            probes.temp_tables.sql,
            Reply::Rows(table(&["temp_tables"], &[&[json!("0")]])),
        )
        .reply(
            probes.memory.sql,
            Reply::Rows(table(&["bytes"], &[&[json!(4194304)]])),
        );

    let executor = QueryExecutor::new(&mut conn);
    let mut collector = create_collector(DatabaseType::PostgreSQL, executor).unwrap();
    let (_, metrics) = collector.collect_metrics(PRIMARY, None).await.unwrap();

    assert_eq!(metrics.indexes_used, vec!["t_pkey", "t_name_idx"]);
    assert_eq!(metrics.table_scans, 4821);
    assert_eq!(metrics.temp_tables, 0);
    assert_eq!(metrics.memory_used, Some(4_194_304));
}

#[tokio::test]
async fn test_switching_backend_changes_only_probe_text() {
    let run = |db_type: DatabaseType| async move {
        let mut conn = StubConnection::new(db_type).reply(PRIMARY, three_rows());
        let metrics = {
            let executor = QueryExecutor::new(&mut conn);
            let mut collector = create_collector(db_type, executor).unwrap();
            collector.collect_metrics(PRIMARY, None).await.unwrap().1
        };
        (conn.sent, metrics)
    };

    let (mysql_sent, mysql_metrics) = run(DatabaseType::MySQL).await;
    let (pg_sent, pg_metrics) = run(DatabaseType::PostgreSQL).await;

    assert_eq!(mysql_sent[1], pg_sent[1]);
    for i in [0, 2, 3, 4, 5] {
        assert_ne!(mysql_sent[i], pg_sent[i]);
    }
    assert_eq!(mysql_metrics.row_count, pg_metrics.row_count);
}

#[tokio::test]
async fn test_completion_primary_reports_zero_rows() {
    let update = "UPDATE t SET name = 'x'";
    let mut conn = StubConnection::new(DatabaseType::MySQL).reply(update, Reply::Completed(3));

    let executor = QueryExecutor::new(&mut conn);
    let mut collector = create_collector(DatabaseType::MySQL, executor).unwrap();
    let (result, metrics) = collector.collect_metrics(update, None).await.unwrap();

    assert_eq!(result, StatementOutcome::Completed { rows_affected: 3 });
    assert_eq!(metrics.row_count, 0);
}

#[tokio::test]
async fn test_params_are_recorded() {
    let query = "SELECT * FROM t WHERE id = :id";
    let params = QueryParams::new().with("id", 2);
    let mut conn = StubConnection::new(DatabaseType::PostgreSQL).reply(query, three_rows());

    let executor = QueryExecutor::new(&mut conn);
    let mut collector = create_collector(DatabaseType::PostgreSQL, executor).unwrap();
    let (_, metrics) = collector.collect_metrics(query, Some(&params)).await.unwrap();

    assert_eq!(metrics.params, Some(params));
    let json = serde_json::to_value(&metrics).unwrap();
    assert_eq!(json["params"], json!({"id": 2}));
}

#[tokio::test]
async fn test_factory_rejects_sqlite_without_connection_activity() {
    let mut conn = StubConnection::new(DatabaseType::SQLite);
    {
        let executor = QueryExecutor::new(&mut conn);
        let err = create_collector(DatabaseType::SQLite, executor)
            .err()
            .expect("SQLite has no telemetry collector");
        assert!(matches!(err, DbError::UnsupportedBackend { ref backend } if backend == "SQLite"));
    }
    assert!(conn.sent.is_empty());
}

#[tokio::test]
async fn test_factory_selects_backend() {
    let mut conn = StubConnection::new(DatabaseType::PostgreSQL);
    let executor = QueryExecutor::new(&mut conn);
    let collector = create_collector(DatabaseType::PostgreSQL, executor).unwrap();
    assert_eq!(collector.backend(), TelemetryBackend::Postgres);
}
