//! SQL generation.
//!
//! A small expression tree and SELECT builder rendered per dialect. Literals
//! are always bound parameters; rendering assigns `p1..pn` in the order the
//! placeholders appear in the text.

pub mod dialect;
pub mod expr;
pub mod params;
pub mod query;

pub use dialect::{Dialect, SqlDialect};
pub use expr::{aggregate, binary, col, value, BinaryOp, Expr, LIKE_ESCAPE};
pub use params::{BoundParameter, ParamValue};
pub use query::{Join, OrderByExpr, Query, RenderedSql, SelectExpr, SqlError, SqlWriter, TableRef};

use sqlparser::parser::Parser;

/// Re-parse generated SQL with the dialect's parser.
///
/// Returns the parser message on failure.
pub fn validate(sql: &str, dialect: Dialect) -> Result<(), String> {
    let parser_dialect = dialect.parser_dialect();
    Parser::parse_sql(parser_dialect.as_ref(), sql)
        .map(|_| ())
        .map_err(|e| e.to_string())
}
