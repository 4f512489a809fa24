//! SQL dialects and statement classification.
//!
//! Uses [sqlparser](https://docs.rs/sqlparser/) so quoting, comments and
//! dialect-specific literals are read the way each backend reads them.

use crate::models::DatabaseType;
use sqlparser::ast::Statement;
use sqlparser::dialect::{Dialect, MySqlDialect, PostgreSqlDialect, SQLiteDialect};
use sqlparser::keywords::Keyword;
use sqlparser::parser::Parser;
use sqlparser::tokenizer::{Token, Tokenizer};
use tracing::debug;

/// Get the appropriate SQL dialect for the given database type.
pub(crate) fn get_dialect(db_type: DatabaseType) -> Box<dyn Dialect> {
    match db_type {
        DatabaseType::PostgreSQL => Box::new(PostgreSqlDialect {}),
        DatabaseType::MySQL => Box::new(MySqlDialect {}),
        DatabaseType::SQLite => Box::new(SQLiteDialect {}),
    }
}

/// Whether `sql` is a single row-returning query (`SELECT`, `WITH`, `VALUES`).
///
/// Statements sqlparser cannot parse are judged by their leading keyword.
pub(crate) fn is_query(db_type: DatabaseType, sql: &str) -> bool {
    let dialect = get_dialect(db_type);
    match Parser::parse_sql(dialect.as_ref(), sql) {
        Ok(statements) => matches!(statements.as_slice(), [Statement::Query(_)]),
        Err(e) => {
            debug!(error = %e, "Statement did not parse, classifying by leading keyword");
            matches!(
                leading_keyword(dialect.as_ref(), sql),
                Some(Keyword::SELECT | Keyword::WITH | Keyword::VALUES)
            )
        }
    }
}

/// First keyword after comments and opening parentheses.
fn leading_keyword(dialect: &dyn Dialect, sql: &str) -> Option<Keyword> {
    let tokens = Tokenizer::new(dialect, sql).tokenize().ok()?;
    match tokens
        .into_iter()
        .find(|token| !matches!(token, Token::Whitespace(_) | Token::LParen))?
    {
        Token::Word(word) => Some(word.keyword),
        _ => None,
    }
}
