//! SQL parsing and analysis
//!
//! This crate handles:
//! - Parsing compiled SQL using datafusion-sqlparser-rs
//! - Resolving the output columns of a query through CTEs and wildcards

pub mod lineage;
pub mod parser;

pub use lineage::{
    extract_output_columns, resolve_query, resolve_sql, OutputColumn, NESTED_QUERY_MARKER,
};
pub use parser::{ParseError, ParsedSql, SqlParser};
