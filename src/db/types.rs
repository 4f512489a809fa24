//! Database-agnostic type mappings.
//!
//! Rows coming back from sqlx are converted to `serde_json` maps so that query
//! results and probe results share one representation regardless of backend.
//!
//! # Architecture
//!
//! Type conversion uses a two-phase approach:
//! 1. `TypeCategory` classifies column types into logical categories
//! 2. Database-specific decoders handle the actual value extraction

use crate::models::DatabaseType;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::mysql::{MySqlRow, MySqlTypeInfo, MySqlValueRef};
use sqlx::postgres::{PgRow, PgTypeInfo, PgValueFormat, PgValueRef};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Decode, Row, Type, TypeInfo};
use std::fmt::Write as _;

// =============================================================================
// Type Classification
// =============================================================================

/// Logical category for database column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Binary,
    Json,
    Temporal,
    Unknown,
}

/// Classify a database type name into a logical category.
pub fn categorize_type(type_name: &str, db: DatabaseType) -> TypeCategory {
    let lower = type_name.to_lowercase();

    // Decimal/Numeric - check first as it overlaps with "numeric" in float checks
    if lower.contains("decimal") || lower.contains("numeric") {
        // SQLite's NUMERIC is actually a float
        if db == DatabaseType::SQLite {
            return TypeCategory::Float;
        }
        return TypeCategory::Decimal;
    }

    if lower == "interval" || lower.contains("point") {
        return TypeCategory::Unknown;
    }

    if lower.contains("int") || lower.contains("serial") || lower.contains("tiny") {
        return TypeCategory::Integer;
    }

    if lower == "bool" || lower == "boolean" {
        return TypeCategory::Boolean;
    }

    if lower.contains("float") || lower.contains("double") || lower == "real" {
        return TypeCategory::Float;
    }

    if lower == "json" || lower == "jsonb" {
        return TypeCategory::Json;
    }

    if lower.contains("blob") || lower.contains("binary") || lower == "bytea" {
        return TypeCategory::Binary;
    }

    // SQLite stores dates as text; leave them to the text decoder.
    if db != DatabaseType::SQLite
        && (lower.starts_with("timestamp")
            || lower == "datetime"
            || lower == "date"
            || lower == "time")
    {
        return TypeCategory::Temporal;
    }

    // Default to text for everything else (varchar, text, char, name, uuid, etc.)
    TypeCategory::Unknown
}

// =============================================================================
// Decimal Type Support
// =============================================================================

/// Wrapper type for raw DECIMAL/NUMERIC values as strings.
/// This preserves the exact database representation.
#[derive(Debug)]
pub struct RawDecimal(pub String);

impl Type<sqlx::MySql> for RawDecimal {
    fn type_info() -> MySqlTypeInfo {
        <String as Type<sqlx::MySql>>::type_info()
    }

    fn compatible(ty: &MySqlTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("decimal") || name.contains("numeric")
    }
}

impl<'r> Decode<'r, sqlx::MySql> for RawDecimal {
    fn decode(value: MySqlValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::MySql>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

impl Type<sqlx::Postgres> for RawDecimal {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_name("NUMERIC")
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("numeric") || name.contains("decimal")
    }
}

impl<'r> Decode<'r, sqlx::Postgres> for RawDecimal {
    fn decode(value: PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        // Simple-protocol results arrive as text, prepared ones as binary.
        match value.format() {
            PgValueFormat::Text => Ok(RawDecimal(value.as_str()?.to_string())),
            PgValueFormat::Binary => pg_numeric_to_string(value.as_bytes()?)
                .map(RawDecimal)
                .ok_or_else(|| "malformed binary NUMERIC value".into()),
        }
    }
}

/// Render PostgreSQL's binary NUMERIC (base-10000 digit groups) as decimal text.
fn pg_numeric_to_string(bytes: &[u8]) -> Option<String> {
    const NUMERIC_NEG: u16 = 0x4000;
    const NUMERIC_NAN: u16 = 0xC000;
    const NUMERIC_PINF: u16 = 0xD000;
    const NUMERIC_NINF: u16 = 0xF000;

    let read_u16 = |at: usize| -> Option<u16> {
        Some(u16::from_be_bytes([*bytes.get(at)?, *bytes.get(at + 1)?]))
    };

    let ndigits = read_u16(0)? as usize;
    let weight = read_u16(2)? as i16 as i32;
    let sign = read_u16(4)?;
    let dscale = read_u16(6)? as usize;

    match sign {
        NUMERIC_NAN => return Some("NaN".to_string()),
        NUMERIC_PINF => return Some("Infinity".to_string()),
        NUMERIC_NINF => return Some("-Infinity".to_string()),
        _ => {}
    }

    let digits = (0..ndigits)
        .map(|i| read_u16(8 + i * 2))
        .collect::<Option<Vec<u16>>>()?;
    let group = |i: i32| -> u16 {
        if i < 0 {
            0
        } else {
            digits.get(i as usize).copied().unwrap_or(0)
        }
    };

    let mut out = String::new();
    if sign == NUMERIC_NEG && digits.iter().any(|d| *d != 0) {
        out.push('-');
    }

    if weight < 0 {
        out.push('0');
    } else {
        for i in 0..=weight {
            if i == 0 {
                let _ = write!(out, "{}", group(i));
            } else {
                let _ = write!(out, "{:04}", group(i));
            }
        }
    }

    if dscale > 0 {
        let mut fraction = String::new();
        let mut i = weight + 1;
        while fraction.len() < dscale {
            let _ = write!(fraction, "{:04}", group(i));
            i += 1;
        }
        fraction.truncate(dscale);
        out.push('.');
        out.push_str(&fraction);
    }

    Some(out)
}

// =============================================================================
// Binary Encoding
// =============================================================================

/// Decode binary data to JSON value.
///
/// If `decode_binary` is true, attempts to decode as UTF-8 text first.
/// Falls back to base64 encoding if not valid UTF-8 or if `decode_binary` is false.
pub fn decode_binary_value(bytes: &[u8], decode_binary: bool) -> JsonValue {
    use base64::{Engine as _, engine::general_purpose::STANDARD};

    if decode_binary {
        if let Ok(s) = std::str::from_utf8(bytes) {
            return JsonValue::String(s.to_string());
        }
    }
    JsonValue::String(STANDARD.encode(bytes))
}

// =============================================================================
// Row to JSON Trait
// =============================================================================

/// Trait for converting database rows to JSON maps.
pub trait RowToJson {
    fn to_json_map(&self, decode_binary: bool) -> serde_json::Map<String, JsonValue>;
    fn column_names(&self) -> Vec<String>;
}

/// Try each listed Rust type in order and convert the first successful decode.
macro_rules! first_decoded {
    ($row:expr, $idx:expr, [$($ty:ty),+ $(,)?], $convert:expr) => {{
        let mut value = JsonValue::Null;
        $(
            if value.is_null() {
                if let Ok(Some(v)) = $row.try_get::<Option<$ty>, _>($idx) {
                    value = $convert(v);
                }
            }
        )+
        value
    }};
}

macro_rules! impl_row_to_json {
    ($row:ty, $db:expr, $decode:path) => {
        impl RowToJson for $row {
            fn to_json_map(&self, decode_binary: bool) -> serde_json::Map<String, JsonValue> {
                self.columns()
                    .iter()
                    .enumerate()
                    .map(|(idx, col)| {
                        let type_name = col.type_info().name();
                        let category = categorize_type(type_name, $db);
                        let value = $decode(self, idx, type_name, category, decode_binary);
                        (col.name().to_string(), value)
                    })
                    .collect()
            }

            fn column_names(&self) -> Vec<String> {
                self.columns().iter().map(|c| c.name().to_string()).collect()
            }
        }
    };
}

impl_row_to_json!(MySqlRow, DatabaseType::MySQL, mysql::decode_column);
impl_row_to_json!(PgRow, DatabaseType::PostgreSQL, postgres::decode_column);
impl_row_to_json!(SqliteRow, DatabaseType::SQLite, sqlite::decode_column);

fn parse_json_text(text: String, type_name: &str) -> JsonValue {
    if type_name.to_lowercase().contains("json") {
        if let Ok(json) = serde_json::from_str::<JsonValue>(&text) {
            return json;
        }
    }
    JsonValue::String(text)
}

// =============================================================================
// Database-Specific Decoders
// =============================================================================

mod mysql {
    use super::*;

    pub fn decode_column(
        row: &MySqlRow,
        idx: usize,
        type_name: &str,
        category: TypeCategory,
        decode_binary: bool,
    ) -> JsonValue {
        match category {
            TypeCategory::Decimal => match row.try_get::<Option<RawDecimal>, _>(idx) {
                Ok(Some(v)) => JsonValue::String(v.0),
                Ok(None) => JsonValue::Null,
                Err(e) => {
                    tracing::error!("Failed to decode DECIMAL: {:?}", e);
                    JsonValue::Null
                }
            },
            TypeCategory::Integer => {
                first_decoded!(row, idx, [i64, u64], JsonValue::from)
            }
            TypeCategory::Boolean => first_decoded!(row, idx, [bool], JsonValue::Bool),
            TypeCategory::Float => first_decoded!(row, idx, [f64, f32], JsonValue::from),
            TypeCategory::Binary => first_decoded!(row, idx, [Vec<u8>], |v: Vec<u8>| {
                decode_binary_value(&v, decode_binary)
            }),
            TypeCategory::Json => first_decoded!(row, idx, [JsonValue], |v| v),
            TypeCategory::Temporal => first_decoded!(
                row,
                idx,
                [DateTime<Utc>],
                |v: DateTime<Utc>| JsonValue::String(v.to_rfc3339())
            )
            .or_else_null(|| {
                first_decoded!(row, idx, [NaiveDateTime], |v: NaiveDateTime| {
                    JsonValue::String(v.to_string())
                })
            })
            .or_else_null(|| {
                first_decoded!(row, idx, [NaiveDate], |v: NaiveDate| JsonValue::String(
                    v.to_string()
                ))
            })
            .or_else_null(|| {
                first_decoded!(row, idx, [NaiveTime], |v: NaiveTime| JsonValue::String(
                    v.to_string()
                ))
            }),
            TypeCategory::Unknown => {
                first_decoded!(row, idx, [String], |v| parse_json_text(v, type_name))
                    .or_else_null(|| {
                        // Some information_schema columns are reported as binary strings.
                        first_decoded!(row, idx, [Vec<u8>], |v: Vec<u8>| {
                            decode_binary_value(&v, true)
                        })
                    })
            }
        }
    }
}

mod postgres {
    use super::*;

    pub fn decode_column(
        row: &PgRow,
        idx: usize,
        _type_name: &str,
        category: TypeCategory,
        decode_binary: bool,
    ) -> JsonValue {
        match category {
            TypeCategory::Decimal => match row.try_get::<Option<RawDecimal>, _>(idx) {
                Ok(Some(v)) => JsonValue::String(v.0),
                Ok(None) => JsonValue::Null,
                Err(e) => {
                    tracing::error!("Failed to decode NUMERIC: {:?}", e);
                    JsonValue::Null
                }
            },
            TypeCategory::Integer => {
                first_decoded!(row, idx, [i64, i32, i16], JsonValue::from)
            }
            TypeCategory::Boolean => first_decoded!(row, idx, [bool], JsonValue::Bool),
            TypeCategory::Float => first_decoded!(row, idx, [f64, f32], JsonValue::from),
            TypeCategory::Binary => first_decoded!(row, idx, [Vec<u8>], |v: Vec<u8>| {
                decode_binary_value(&v, decode_binary)
            }),
            TypeCategory::Json => first_decoded!(row, idx, [JsonValue], |v| v),
            TypeCategory::Temporal => first_decoded!(
                row,
                idx,
                [DateTime<Utc>],
                |v: DateTime<Utc>| JsonValue::String(v.to_rfc3339())
            )
            .or_else_null(|| {
                first_decoded!(row, idx, [NaiveDateTime], |v: NaiveDateTime| {
                    JsonValue::String(v.to_string())
                })
            })
            .or_else_null(|| {
                first_decoded!(row, idx, [NaiveDate], |v: NaiveDate| JsonValue::String(
                    v.to_string()
                ))
            })
            .or_else_null(|| {
                first_decoded!(row, idx, [NaiveTime], |v: NaiveTime| JsonValue::String(
                    v.to_string()
                ))
            }),
            TypeCategory::Unknown => first_decoded!(row, idx, [String], JsonValue::String)
                .or_else_null(|| text_fallback(row, idx)),
        }
    }

    /// Text-format values (simple protocol) can always be read as UTF-8,
    /// whatever the column type (uuid, inet, interval, ...).
    fn text_fallback(row: &PgRow, idx: usize) -> JsonValue {
        let Ok(raw) = row.try_get_raw(idx) else {
            return JsonValue::Null;
        };
        if sqlx::ValueRef::is_null(&raw) || raw.format() != PgValueFormat::Text {
            return JsonValue::Null;
        }
        raw.as_str()
            .map(|s| JsonValue::String(s.to_string()))
            .unwrap_or(JsonValue::Null)
    }
}

mod sqlite {
    use super::*;

    pub fn decode_column(
        row: &SqliteRow,
        idx: usize,
        type_name: &str,
        category: TypeCategory,
        decode_binary: bool,
    ) -> JsonValue {
        match category {
            TypeCategory::Integer => first_decoded!(row, idx, [i64], JsonValue::from),
            TypeCategory::Boolean => first_decoded!(row, idx, [bool], JsonValue::Bool),
            TypeCategory::Float | TypeCategory::Decimal => {
                first_decoded!(row, idx, [f64], JsonValue::from)
            }
            TypeCategory::Binary => first_decoded!(row, idx, [Vec<u8>], |v: Vec<u8>| {
                decode_binary_value(&v, decode_binary)
            }),
            // Expression columns (COUNT(*), literals) report the value's storage
            // class, so untyped columns try integer, then real, then text.
            _ => first_decoded!(row, idx, [String], |v| parse_json_text(v, type_name))
                .or_else_null(|| first_decoded!(row, idx, [i64], JsonValue::from))
                .or_else_null(|| first_decoded!(row, idx, [f64], JsonValue::from)),
        }
    }
}

/// Chain decoders: evaluate the fallback only when the current value is NULL.
trait OrElseNull {
    fn or_else_null(self, f: impl FnOnce() -> JsonValue) -> JsonValue;
}

impl OrElseNull for JsonValue {
    fn or_else_null(self, f: impl FnOnce() -> JsonValue) -> JsonValue {
        if self.is_null() { f() } else { self }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categorize_type_integer() {
        assert_eq!(
            categorize_type("INT", DatabaseType::MySQL),
            TypeCategory::Integer
        );
        assert_eq!(
            categorize_type("BIGINT", DatabaseType::PostgreSQL),
            TypeCategory::Integer
        );
        assert_eq!(
            categorize_type("INT8", DatabaseType::PostgreSQL),
            TypeCategory::Integer
        );
        assert_eq!(
            categorize_type("TINYINT", DatabaseType::MySQL),
            TypeCategory::Integer
        );
    }

    #[test]
    fn test_categorize_type_decimal() {
        assert_eq!(
            categorize_type("DECIMAL", DatabaseType::MySQL),
            TypeCategory::Decimal
        );
        assert_eq!(
            categorize_type("NUMERIC", DatabaseType::PostgreSQL),
            TypeCategory::Decimal
        );
        assert_eq!(
            categorize_type("numeric", DatabaseType::SQLite),
            TypeCategory::Float
        );
    }

    #[test]
    fn test_categorize_type_misc() {
        assert_eq!(
            categorize_type("jsonb", DatabaseType::PostgreSQL),
            TypeCategory::Json
        );
        assert_eq!(
            categorize_type("TIMESTAMPTZ", DatabaseType::PostgreSQL),
            TypeCategory::Temporal
        );
        assert_eq!(
            categorize_type("DATETIME", DatabaseType::SQLite),
            TypeCategory::Unknown
        );
        assert_eq!(
            categorize_type("NAME", DatabaseType::PostgreSQL),
            TypeCategory::Unknown
        );
        assert_eq!(
            categorize_type("INTERVAL", DatabaseType::PostgreSQL),
            TypeCategory::Unknown
        );
    }

    fn numeric_bytes(weight: i16, sign: u16, dscale: u16, digits: &[u16]) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&(digits.len() as u16).to_be_bytes());
        bytes.extend_from_slice(&weight.to_be_bytes());
        bytes.extend_from_slice(&sign.to_be_bytes());
        bytes.extend_from_slice(&dscale.to_be_bytes());
        for d in digits {
            bytes.extend_from_slice(&d.to_be_bytes());
        }
        bytes
    }

    #[test]
    fn test_pg_numeric_binary_integer() {
        // 123456789 = [1, 2345, 6789] with weight 2
        let bytes = numeric_bytes(2, 0, 0, &[1, 2345, 6789]);
        assert_eq!(pg_numeric_to_string(&bytes).as_deref(), Some("123456789"));
    }

    #[test]
    fn test_pg_numeric_binary_zero() {
        let bytes = numeric_bytes(0, 0, 0, &[]);
        assert_eq!(pg_numeric_to_string(&bytes).as_deref(), Some("0"));
    }

    #[test]
    fn test_pg_numeric_binary_fraction_and_sign() {
        // -12.5 = [12, 5000] with weight 0, dscale 1
        let bytes = numeric_bytes(0, 0x4000, 1, &[12, 5000]);
        assert_eq!(pg_numeric_to_string(&bytes).as_deref(), Some("-12.5"));

        // 0.0042 = [42] with weight -1, dscale 4
        let bytes = numeric_bytes(-1, 0, 4, &[42]);
        assert_eq!(pg_numeric_to_string(&bytes).as_deref(), Some("0.0042"));
    }

    #[test]
    fn test_pg_numeric_binary_special_and_truncated() {
        let bytes = numeric_bytes(0, 0xC000, 0, &[]);
        assert_eq!(pg_numeric_to_string(&bytes).as_deref(), Some("NaN"));

        let mut bytes = numeric_bytes(1, 0, 0, &[1, 2]);
        bytes.truncate(9);
        assert_eq!(pg_numeric_to_string(&bytes), None);
    }

    #[test]
    fn test_decode_binary_value() {
        assert_eq!(
            decode_binary_value(b"hello world", true),
            JsonValue::String("hello world".to_string())
        );
        assert_eq!(
            decode_binary_value(b"hello world", false),
            JsonValue::String("aGVsbG8gd29ybGQ=".to_string())
        );
        assert_eq!(
            decode_binary_value(&[0xFF, 0xFE, 0x00, 0x01], true),
            JsonValue::String("//4AAQ==".to_string())
        );
    }
}
