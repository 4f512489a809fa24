use super::{TelemetryBackend, TelemetryCollector};
use crate::db::connection::Connection;
use crate::db::executor::QueryExecutor;
use crate::error::{DbError, DbResult};
use crate::models::DatabaseType;

/// Select the telemetry collector for `db_type`.
///
/// Fails with `DbError::UnsupportedBackend` when the backend has no probe
/// table. Nothing is sent over the executor's connection either way.
pub fn create_collector<'c, C: Connection>(
    db_type: DatabaseType,
    executor: QueryExecutor<'c, C>,
) -> DbResult<TelemetryCollector<'c, C>> {
    let backend = TelemetryBackend::from_database_type(db_type)
        .ok_or_else(|| DbError::unsupported_backend(db_type.display_name()))?;
    Ok(TelemetryCollector::new(backend, executor))
}
