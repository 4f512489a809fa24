//! Query performance metrics.

use crate::models::QueryParams;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Backend-agnostic performance record for one telemetry-collecting query.
///
/// Built once by the telemetry collector after the primary query succeeds and
/// never modified afterwards. `execution_time` and `row_count` are always
/// measured; every other field falls back to an empty, zero or absent value
/// when the corresponding diagnostic probe is unavailable.
///
/// `table_scans` and `temp_tables` come from server-wide cumulative counters
/// (`Handler_read%`, `pg_stat_all_tables.seq_scan`, ...). They are snapshots
/// taken after the query, not per-query deltas, and should be read as an
/// approximation of the query's own activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryMetrics {
    /// Statement text as executed.
    pub query: String,
    pub params: Option<QueryParams>,
    /// Wall-clock seconds spent in the primary query, probes excluded.
    pub execution_time: f64,
    /// Rows in the primary result; 0 when it was not tabular.
    pub row_count: usize,
    /// When the record was assembled.
    pub timestamp: DateTime<Utc>,
    pub indexes_used: Vec<String>,
    pub table_scans: u64,
    pub temp_tables: u64,
    /// Bytes, when the backend exposes a comparable statistic.
    pub memory_used: Option<u64>,
}

impl QueryMetrics {
    /// True when every probe-derived field holds its fallback value.
    pub fn is_degraded(&self) -> bool {
        self.indexes_used.is_empty()
            && self.table_scans == 0
            && self.temp_tables == 0
            && self.memory_used.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> QueryMetrics {
        QueryMetrics {
            query: "SELECT * FROM users".to_string(),
            params: Some(QueryParams::new().with("active", true)),
            execution_time: 0.25,
            row_count: 3,
            timestamp: Utc::now(),
            indexes_used: vec!["PRIMARY".to_string()],
            table_scans: 4,
            temp_tables: 0,
            memory_used: Some(4_194_304),
        }
    }

    #[test]
    fn test_metrics_serde_roundtrip_preserves_fields() {
        let metrics = sample();
        let json = serde_json::to_string(&metrics).unwrap();
        assert!(json.contains("\"indexes_used\":[\"PRIMARY\"]"));
        assert!(json.contains("\"memory_used\":4194304"));

        let back: QueryMetrics = serde_json::from_str(&json).unwrap();
        assert_eq!(back, metrics);
    }

    #[test]
    fn test_absent_memory_serializes_as_null() {
        let metrics = QueryMetrics {
            memory_used: None,
            ..sample()
        };
        let value = serde_json::to_value(&metrics).unwrap();
        assert!(value["memory_used"].is_null());
    }

    #[test]
    fn test_is_degraded() {
        assert!(!sample().is_degraded());
        let degraded = QueryMetrics {
            indexes_used: Vec::new(),
            table_scans: 0,
            temp_tables: 0,
            memory_used: None,
            ..sample()
        };
        assert!(degraded.is_degraded());
    }
}
