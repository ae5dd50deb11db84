//! SQL dialect definitions and formatting rules.
//!
//! Each dialect implements [`SqlDialect`] for the differences that matter to
//! generated analytics queries:
//!
//! - Identifier quoting: `"` (PostgreSQL/DuckDB), `[]` (T-SQL)
//! - Placeholders: `$n` vs `@pn`
//! - Row limiting: trailing `LIMIT n` vs `SELECT TOP n`
//! - Date part extraction: `EXTRACT(MONTH FROM x)` vs `DATEPART(month, x)`
//!
//! # Usage
//!
//! ```ignore
//! use nlq::sql::{Dialect, SqlDialect};
//!
//! let dialect = Dialect::TSql;
//! assert_eq!(dialect.quote_identifier("Country"), "[Country]");
//! assert_eq!(dialect.placeholder(1), "@p1");
//! ```

use serde::{Deserialize, Serialize};

use crate::dictionary::DateGrain;

/// SQL dialect trait - defines how constructs are rendered.
pub trait SqlDialect: std::fmt::Debug {
    /// Dialect name for display/logging.
    fn name(&self) -> &'static str;

    /// Quote an identifier (table, column, alias).
    fn quote_identifier(&self, ident: &str) -> String;

    /// Placeholder for the 1-based parameter `index`.
    fn placeholder(&self, index: usize) -> String;

    /// Whether the row limit is `SELECT TOP n` rather than trailing `LIMIT n`.
    fn uses_top(&self) -> bool {
        false
    }

    /// Extract a date part from an already-rendered expression.
    fn date_part(&self, grain: DateGrain, expr: &str) -> String {
        format!("EXTRACT({} FROM {})", grain.sql_keyword(), expr)
    }

    /// Parser dialect used to validate generated SQL.
    fn parser_dialect(&self) -> Box<dyn sqlparser::dialect::Dialect>;
}

/// Quote identifier with double quotes (ANSI style).
fn quote_double(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Quote identifier with square brackets.
fn quote_bracket(ident: &str) -> String {
    format!("[{}]", ident.replace(']', "]]"))
}

/// PostgreSQL dialect.
#[derive(Debug, Clone, Copy)]
pub struct Postgres;

impl SqlDialect for Postgres {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        quote_double(ident)
    }

    fn placeholder(&self, index: usize) -> String {
        format!("${}", index)
    }

    fn parser_dialect(&self) -> Box<dyn sqlparser::dialect::Dialect> {
        Box::new(sqlparser::dialect::PostgreSqlDialect {})
    }
}

/// DuckDB dialect. Same surface syntax as PostgreSQL for generated queries.
#[derive(Debug, Clone, Copy)]
pub struct DuckDb;

impl SqlDialect for DuckDb {
    fn name(&self) -> &'static str {
        "duckdb"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        quote_double(ident)
    }

    fn placeholder(&self, index: usize) -> String {
        format!("${}", index)
    }

    fn parser_dialect(&self) -> Box<dyn sqlparser::dialect::Dialect> {
        Box::new(sqlparser::dialect::DuckDbDialect {})
    }
}

/// T-SQL (SQL Server / Azure SQL) dialect.
#[derive(Debug, Clone, Copy)]
pub struct TSql;

impl SqlDialect for TSql {
    fn name(&self) -> &'static str {
        "tsql"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        quote_bracket(ident)
    }

    fn placeholder(&self, index: usize) -> String {
        format!("@p{}", index)
    }

    fn uses_top(&self) -> bool {
        true
    }

    fn date_part(&self, grain: DateGrain, expr: &str) -> String {
        format!("DATEPART({}, {})", grain.sql_keyword().to_lowercase(), expr)
    }

    fn parser_dialect(&self) -> Box<dyn sqlparser::dialect::Dialect> {
        Box::new(sqlparser::dialect::MsSqlDialect {})
    }
}

/// Supported SQL dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[default]
    Postgres,
    DuckDb,
    TSql,
}

impl Dialect {
    /// Get the dialect implementation.
    pub fn dialect(&self) -> &'static dyn SqlDialect {
        match self {
            Dialect::Postgres => &Postgres,
            Dialect::DuckDb => &DuckDb,
            Dialect::TSql => &TSql,
        }
    }
}

impl SqlDialect for Dialect {
    fn name(&self) -> &'static str {
        self.dialect().name()
    }

    fn quote_identifier(&self, ident: &str) -> String {
        self.dialect().quote_identifier(ident)
    }

    fn placeholder(&self, index: usize) -> String {
        self.dialect().placeholder(index)
    }

    fn uses_top(&self) -> bool {
        self.dialect().uses_top()
    }

    fn date_part(&self, grain: DateGrain, expr: &str) -> String {
        self.dialect().date_part(grain, expr)
    }

    fn parser_dialect(&self) -> Box<dyn sqlparser::dialect::Dialect> {
        self.dialect().parser_dialect()
    }
}

impl std::str::FromStr for Dialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(Dialect::Postgres),
            "duckdb" => Ok(Dialect::DuckDb),
            "tsql" | "mssql" | "sqlserver" => Ok(Dialect::TSql),
            other => Err(format!("unknown dialect: {}", other)),
        }
    }
}
