//! Compiled SQL parsing
//!
//! dbt models are parsed after compilation, so Jinja never reaches this module.
//! The dialect comes from `sqlglot_dialect` in the config file.

use sqlparser::ast::{Query, Statement};
use sqlparser::dialect::{dialect_from_str, Dialect, GenericDialect};
use sqlparser::parser::{Parser, ParserError};
use thiserror::Error;

/// Parser bound to one SQL dialect
pub struct SqlParser {
    dialect: Box<dyn Dialect>,
}

impl SqlParser {
    /// Generic dialect
    pub fn new() -> Self {
        Self {
            dialect: Box::new(GenericDialect {}),
        }
    }

    /// Parser for a dialect name such as `bigquery` or `duckdb`
    ///
    /// Unknown or missing names fall back to the generic dialect.
    pub fn for_dialect(name: Option<&str>) -> Self {
        let Some(name) = name.map(str::trim).filter(|n| !n.is_empty()) else {
            return Self::new();
        };

        match dialect_from_str(name.to_ascii_lowercase()) {
            Some(dialect) => Self { dialect },
            None => {
                tracing::warn!("Unknown SQL dialect '{}', using the generic one", name);
                Self::new()
            }
        }
    }

    pub fn parse(&self, sql: &str) -> Result<ParsedSql, ParseError> {
        let statements = Parser::parse_sql(&*self.dialect, sql)?;
        Ok(ParsedSql { statements })
    }
}

impl Default for SqlParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Statements of one compiled model
#[derive(Debug, Clone)]
pub struct ParsedSql {
    pub statements: Vec<Statement>,
}

impl ParsedSql {
    /// First query, skipping leading `SET`/`DECLARE` style statements
    pub fn first_query(&self) -> Option<&Query> {
        self.statements.iter().find_map(|statement| match statement {
            Statement::Query(query) => Some(query.as_ref()),
            _ => None,
        })
    }
}

#[derive(Debug, Error)]
#[error("SQL parse error: {0}")]
pub struct ParseError(#[from] ParserError);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_with_filter() {
        let parsed = SqlParser::new()
            .parse("select id, name from users where active = true")
            .unwrap();
        assert_eq!(parsed.statements.len(), 1);
        assert!(parsed.first_query().is_some());
    }

    #[test]
    fn broken_sql_is_an_error() {
        let error = SqlParser::new().parse("select from where (").unwrap_err();
        assert!(error.to_string().starts_with("SQL parse error"));
    }

    #[test]
    fn uncompiled_jinja_is_rejected() {
        assert!(SqlParser::new().parse("select id from {{ ref('users') }}").is_err());
    }

    #[test]
    fn dialect_names() {
        for name in [Some("bigquery"), Some("Snowflake"), Some("duckdb"), Some("nope"), None] {
            assert!(
                SqlParser::for_dialect(name).parse("select id from users").is_ok(),
                "{:?}",
                name
            );
        }
    }

    #[test]
    fn leading_statements_are_skipped() {
        let parsed = SqlParser::new()
            .parse("set x = 1; select id from users")
            .unwrap();
        assert_eq!(parsed.statements.len(), 2);
        assert!(parsed.first_query().is_some());
    }
}
