//! Named parameter handling.
//!
//! Statements are written with `:name` placeholders regardless of backend.
//! Before execution they are rewritten into the driver's positional syntax
//! (`?` for MySQL and SQLite, `$n` for PostgreSQL) and the matching values are
//! bound in placeholder order.
//!
//! Placeholders are found with the sqlparser tokenizer for the backend's
//! dialect, so string literals (including PostgreSQL dollar quoting and MySQL
//! backslash escapes), quoted identifiers and comments are never rewritten.

use crate::db::dialect::get_dialect;
use crate::error::{DbError, DbResult};
use crate::models::{DatabaseType, QueryParam, QueryParams};
use sqlparser::tokenizer::{Location, Token, TokenWithSpan, Tokenizer};
use sqlx::mysql::MySqlArguments;
use sqlx::postgres::PgArguments;
use sqlx::sqlite::SqliteArguments;
use sqlx::{MySql, Postgres, Sqlite};
use std::collections::HashMap;

/// A statement rewritten to positional placeholders plus its ordered values.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedStatement<'p> {
    pub sql: String,
    pub values: Vec<&'p QueryParam>,
}

/// Rewrite `:name` placeholders for the given backend.
///
/// Everything outside the placeholders is copied through byte for byte.
/// PostgreSQL reuses the same `$n` for a repeated name; MySQL and SQLite bind
/// the value once per occurrence. Parameters that no placeholder references
/// are ignored, but a placeholder without a value is an error.
pub fn prepare_named<'p>(
    sql: &str,
    params: &'p QueryParams,
    db_type: DatabaseType,
) -> DbResult<PreparedStatement<'p>> {
    let dialect = get_dialect(db_type);
    let tokens = Tokenizer::new(dialect.as_ref(), sql)
        .with_unescape(false)
        .tokenize_with_location()
        .map_err(|e| DbError::invalid_input(format!("Cannot read statement: {}", e)))?;
    let lines = LineIndex::new(sql);

    let mut out = String::with_capacity(sql.len());
    let mut values: Vec<&'p QueryParam> = Vec::new();
    let mut positions: HashMap<&str, usize> = HashMap::new();
    let mut copied = 0;

    for (i, token) in tokens.iter().enumerate() {
        let Some((name, end)) = placeholder_at(&tokens, i) else {
            continue;
        };
        let (Some(start), Some(end)) = (lines.offset(token.span.start), lines.offset(end)) else {
            return Err(DbError::internal(format!(
                "Placeholder ':{}' has no position in the statement",
                name
            )));
        };

        let value = params.get(name).ok_or_else(|| {
            DbError::invalid_input(format!("No value bound for parameter ':{}'", name))
        })?;

        out.push_str(&sql[copied..start]);
        copied = end;

        match db_type {
            DatabaseType::PostgreSQL => {
                let index = *positions.entry(name).or_insert_with(|| {
                    values.push(value);
                    values.len()
                });
                out.push('$');
                out.push_str(&index.to_string());
            }
            DatabaseType::MySQL | DatabaseType::SQLite => {
                values.push(value);
                out.push('?');
            }
        }
    }
    out.push_str(&sql[copied..]);

    Ok(PreparedStatement { sql: out, values })
}

/// The `:name` placeholder starting at token `i`, with the location just past it.
///
/// The tokenizer yields `:` followed by an unquoted word; some dialects emit a
/// single `Placeholder(":name")` instead.
fn placeholder_at(tokens: &[TokenWithSpan], i: usize) -> Option<(&str, Location)> {
    let token = &tokens[i];
    let (name, end) = match &token.token {
        Token::Colon => match tokens.get(i + 1) {
            Some(TokenWithSpan {
                token: Token::Word(word),
                span,
                ..
            }) if word.quote_style.is_none() => (word.value.as_str(), span.end),
            _ => return None,
        },
        Token::Placeholder(placeholder) => (placeholder.strip_prefix(':')?, token.span.end),
        _ => return None,
    };
    name.starts_with(|ch: char| ch.is_alphabetic() || ch == '_')
        .then_some((name, end))
}

/// Byte offsets for tokenizer locations (1-based line, 1-based character column).
struct LineIndex<'a> {
    sql: &'a str,
    starts: Vec<usize>,
}

impl<'a> LineIndex<'a> {
    fn new(sql: &'a str) -> Self {
        let starts = std::iter::once(0)
            .chain(sql.match_indices('\n').map(|(i, _)| i + 1))
            .collect();
        Self { sql, starts }
    }

    fn offset(&self, location: Location) -> Option<usize> {
        let line = usize::try_from(location.line).ok()?.checked_sub(1)?;
        let column = usize::try_from(location.column).ok()?.checked_sub(1)?;
        let start = *self.starts.get(line)?;
        Some(
            self.sql[start..]
                .char_indices()
                .nth(column)
                .map_or(self.sql.len(), |(i, _)| start + i),
        )
    }
}

/// Bind a parameter to a MySQL query.
pub(crate) fn bind_mysql_param<'q>(
    query: sqlx::query::Query<'q, MySql, MySqlArguments>,
    param: &'q QueryParam,
) -> sqlx::query::Query<'q, MySql, MySqlArguments> {
    match param {
        QueryParam::Null => query.bind(None::<String>),
        QueryParam::Bool(v) => query.bind(*v),
        QueryParam::Int(v) => query.bind(*v),
        QueryParam::Float(v) => query.bind(*v),
        QueryParam::String(v) => query.bind(v.as_str()),
    }
}

/// Bind a parameter to a PostgreSQL query.
pub(crate) fn bind_postgres_param<'q>(
    query: sqlx::query::Query<'q, Postgres, PgArguments>,
    param: &'q QueryParam,
) -> sqlx::query::Query<'q, Postgres, PgArguments> {
    match param {
        QueryParam::Null => query.bind(None::<String>),
        QueryParam::Bool(v) => query.bind(*v),
        QueryParam::Int(v) => query.bind(*v),
        QueryParam::Float(v) => query.bind(*v),
        QueryParam::String(v) => query.bind(v.as_str()),
    }
}

/// Bind a parameter to a SQLite query.
pub(crate) fn bind_sqlite_param<'q>(
    query: sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>,
    param: &'q QueryParam,
) -> sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>> {
    match param {
        QueryParam::Null => query.bind(None::<String>),
        QueryParam::Bool(v) => query.bind(*v),
        QueryParam::Int(v) => query.bind(*v),
        QueryParam::Float(v) => query.bind(*v),
        QueryParam::String(v) => query.bind(v.as_str()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> QueryParams {
        QueryParams::new()
            .with("id", 7)
            .with("name", "alice")
            .with("unused", true)
    }

    #[test]
    fn test_mysql_rewrites_to_question_marks() {
        let params = params();
        let stmt = prepare_named(
            "SELECT * FROM users WHERE id = :id AND name = :name",
            &params,
            DatabaseType::MySQL,
        )
        .unwrap();
        assert_eq!(stmt.sql, "SELECT * FROM users WHERE id = ? AND name = ?");
        assert_eq!(
            stmt.values,
            vec![&QueryParam::Int(7), &QueryParam::String("alice".to_string())]
        );
    }

    #[test]
    fn test_postgres_reuses_index_for_repeated_name() {
        let params = params();
        let stmt = prepare_named(
            "SELECT :id, :name, :id",
            &params,
            DatabaseType::PostgreSQL,
        )
        .unwrap();
        assert_eq!(stmt.sql, "SELECT $1, $2, $1");
        assert_eq!(stmt.values.len(), 2);
    }

    #[test]
    fn test_sqlite_binds_each_occurrence() {
        let params = params();
        let stmt = prepare_named("SELECT :id, :id", &params, DatabaseType::SQLite).unwrap();
        assert_eq!(stmt.sql, "SELECT ?, ?");
        assert_eq!(stmt.values, vec![&QueryParam::Int(7), &QueryParam::Int(7)]);
    }

    #[test]
    fn test_skips_casts_strings_and_comments() {
        let params = params();
        let sql = "SELECT :id::text, ':name', \"col:name\" -- :name\n/* :id */ FROM t";
        let stmt = prepare_named(sql, &params, DatabaseType::PostgreSQL).unwrap();
        assert_eq!(
            stmt.sql,
            "SELECT $1::text, ':name', \"col:name\" -- :name\n/* :id */ FROM t"
        );
        assert_eq!(stmt.values, vec![&QueryParam::Int(7)]);
    }

    #[test]
    fn test_mysql_backticks_and_hash_comments() {
        let params = params();
        let sql = "SELECT `x:id` FROM t # :name\nWHERE id = :id";
        let stmt = prepare_named(sql, &params, DatabaseType::MySQL).unwrap();
        assert_eq!(stmt.sql, "SELECT `x:id` FROM t # :name\nWHERE id = ?");
        assert_eq!(stmt.values, vec![&QueryParam::Int(7)]);
    }

    #[test]
    fn test_postgres_dollar_quoted_body_is_literal() {
        let params = params();
        let stmt = prepare_named(
            "SELECT $$ see :note $$ AS t, :id AS id",
            &params,
            DatabaseType::PostgreSQL,
        )
        .unwrap();
        assert_eq!(stmt.sql, "SELECT $$ see :note $$ AS t, $1 AS id");
        assert_eq!(stmt.values, vec![&QueryParam::Int(7)]);
    }

    #[test]
    fn test_postgres_backslash_does_not_escape_quote() {
        let params = params();
        let stmt = prepare_named(
            "SELECT 'C:\\' AS path, :id AS id",
            &params,
            DatabaseType::PostgreSQL,
        )
        .unwrap();
        assert_eq!(stmt.sql, "SELECT 'C:\\' AS path, $1 AS id");
        assert_eq!(stmt.values.len(), 1);
    }

    #[test]
    fn test_placeholders_across_lines() {
        let params = params();
        let stmt = prepare_named(
            "SELECT '名前'\nFROM t\n  WHERE id = :id\n    AND name = :name",
            &params,
            DatabaseType::PostgreSQL,
        )
        .unwrap();
        assert_eq!(
            stmt.sql,
            "SELECT '名前'\nFROM t\n  WHERE id = $1\n    AND name = $2"
        );
    }

    #[test]
    fn test_unterminated_literal_is_invalid_input() {
        let params = params();
        let err = prepare_named("SELECT 'open, :id", &params, DatabaseType::SQLite).unwrap_err();
        assert!(matches!(err, DbError::InvalidInput { .. }));
    }

    #[test]
    fn test_escaped_quotes_inside_literal() {
        let params = params();
        let stmt = prepare_named(
            "SELECT 'it''s :name', 'a\\' :id' WHERE x = :id",
            &params,
            DatabaseType::MySQL,
        )
        .unwrap();
        assert_eq!(stmt.sql, "SELECT 'it''s :name', 'a\\' :id' WHERE x = ?");
    }

    #[test]
    fn test_non_identifier_colons_are_kept() {
        let params = params();
        let stmt = prepare_named(
            "SELECT arr[1:2], @v := 1, '10:30'",
            &params,
            DatabaseType::MySQL,
        )
        .unwrap();
        assert_eq!(stmt.sql, "SELECT arr[1:2], @v := 1, '10:30'");
        assert!(stmt.values.is_empty());
    }

    #[test]
    fn test_missing_value_is_invalid_input() {
        let params = QueryParams::new();
        let err = prepare_named("SELECT :missing", &params, DatabaseType::SQLite).unwrap_err();
        assert!(matches!(err, DbError::InvalidInput { .. }));
        assert!(err.to_string().contains(":missing"));
    }

    #[test]
    fn test_unicode_text_preserved() {
        let params = params();
        let stmt = prepare_named(
            "SELECT '名前' AS n WHERE name = :name",
            &params,
            DatabaseType::SQLite,
        )
        .unwrap();
        assert_eq!(stmt.sql, "SELECT '名前' AS n WHERE name = ?");
    }
}
