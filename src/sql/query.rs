//! Query builder - construct SELECT statements with a fluent API.

use serde::Serialize;

use crate::dictionary::Aggregation;
use crate::schema::FieldRef;

use super::dialect::{Dialect, SqlDialect};
use super::expr::Expr;
use super::params::{BoundParameter, ParamValue};

/// Errors raised while rendering a query.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SqlError {
    #[error("Query has an empty select list")]
    EmptySelect,

    #[error("IN list has no values")]
    EmptyInList,
}

// =============================================================================
// Writer
// =============================================================================

/// Accumulates SQL text and bound parameters in emission order.
#[derive(Debug)]
pub struct SqlWriter {
    dialect: Dialect,
    sql: String,
    params: Vec<BoundParameter>,
}

impl SqlWriter {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            sql: String::new(),
            params: Vec::new(),
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn push(&mut self, s: &str) {
        self.sql.push_str(s);
    }

    pub fn quote(&self, ident: &str) -> String {
        self.dialect.quote_identifier(ident)
    }

    /// Bind a value and emit its placeholder. Names are `p1..pn`.
    pub fn bind(&mut self, value: ParamValue) {
        let index = self.params.len() + 1;
        self.params.push(BoundParameter {
            name: format!("p{}", index),
            value,
        });
        let placeholder = self.dialect.placeholder(index);
        self.sql.push_str(&placeholder);
    }

    /// Render into a detached buffer while still binding parameters here.
    pub fn capture(&mut self, f: impl FnOnce(&mut Self)) -> String {
        let saved = std::mem::take(&mut self.sql);
        f(self);
        std::mem::replace(&mut self.sql, saved)
    }

    pub fn finish(self) -> RenderedSql {
        RenderedSql {
            sql: self.sql,
            parameters: self.params,
        }
    }
}

/// SQL text plus its parameters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderedSql {
    pub sql: String,
    pub parameters: Vec<BoundParameter>,
}

// =============================================================================
// Building blocks
// =============================================================================

/// A SELECT list item: expression with optional alias.
#[derive(Debug, Clone, PartialEq)]
#[must_use = "builders have no effect until used"]
pub struct SelectExpr {
    pub expr: Expr,
    pub alias: Option<String>,
}

impl SelectExpr {
    pub fn new(expr: Expr) -> Self {
        Self { expr, alias: None }
    }

    pub fn with_alias(mut self, alias: &str) -> Self {
        self.alias = Some(alias.into());
        self
    }
}

/// A table reference with optional schema.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[must_use = "builders have no effect until used"]
pub struct TableRef {
    pub schema: Option<String>,
    pub table: String,
}

impl TableRef {
    pub fn new(table: &str) -> Self {
        Self {
            schema: None,
            table: table.into(),
        }
    }

    pub fn with_schema(mut self, schema: Option<&str>) -> Self {
        self.schema = schema.map(String::from);
        self
    }

    fn render(&self, w: &mut SqlWriter) {
        if let Some(schema) = &self.schema {
            let s = w.quote(schema);
            w.push(&s);
            w.push(".");
        }
        let t = w.quote(&self.table);
        w.push(&t);
    }
}

/// An inner join on one or more column equalities.
#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub table: TableRef,
    pub on: Vec<(FieldRef, FieldRef)>,
}

/// ORDER BY item.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderByExpr {
    pub expr: Expr,
    pub descending: bool,
}

// =============================================================================
// Query
// =============================================================================

/// A single SELECT statement.
#[derive(Debug, Clone, Default, PartialEq)]
#[must_use = "builders have no effect until used"]
pub struct Query {
    pub select: Vec<SelectExpr>,
    pub from: TableRef,
    pub joins: Vec<Join>,
    pub filters: Vec<Expr>,
    pub group_by: Vec<Expr>,
    pub having: Vec<Expr>,
    pub order_by: Vec<OrderByExpr>,
    pub limit: Option<u64>,
}

impl Query {
    pub fn new(from: TableRef) -> Self {
        Self {
            select: Vec::new(),
            from,
            joins: Vec::new(),
            filters: Vec::new(),
            group_by: Vec::new(),
            having: Vec::new(),
            order_by: Vec::new(),
            limit: None,
        }
    }

    pub fn select(mut self, expr: Expr, alias: &str) -> Self {
        self.select.push(SelectExpr::new(expr).with_alias(alias));
        self
    }

    pub fn inner_join(mut self, table: TableRef, left: FieldRef, right: FieldRef) -> Self {
        self.joins.push(Join {
            table,
            on: vec![(left, right)],
        });
        self
    }

    /// Add a WHERE predicate (ANDed).
    pub fn filter(mut self, expr: Expr) -> Self {
        self.filters.push(expr);
        self
    }

    pub fn group_by(mut self, expr: Expr) -> Self {
        self.group_by.push(expr);
        self
    }

    /// Add a HAVING predicate (ANDed).
    pub fn having(mut self, expr: Expr) -> Self {
        self.having.push(expr);
        self
    }

    pub fn order_by(mut self, expr: Expr, descending: bool) -> Self {
        self.order_by.push(OrderByExpr { expr, descending });
        self
    }

    pub fn limit(mut self, n: u64) -> Self {
        self.limit = Some(n);
        self
    }

    /// Source tables: FROM then joins.
    pub fn tables(&self) -> Vec<&str> {
        std::iter::once(self.from.table.as_str())
            .chain(self.joins.iter().map(|j| j.table.table.as_str()))
            .collect()
    }

    fn all_exprs(&self) -> impl Iterator<Item = &Expr> {
        self.select
            .iter()
            .map(|s| &s.expr)
            .chain(self.filters.iter())
            .chain(self.group_by.iter())
            .chain(self.having.iter())
            .chain(self.order_by.iter().map(|o| &o.expr))
    }

    /// Columns referenced outside the join conditions.
    pub fn referenced_columns(&self) -> Vec<&FieldRef> {
        let mut out: Vec<&FieldRef> = Vec::new();
        for expr in self.all_exprs() {
            for c in expr.columns() {
                if !out.contains(&c) {
                    out.push(c);
                }
            }
        }
        out
    }

    /// Columns referenced by WHERE predicates.
    pub fn filter_columns(&self) -> Vec<&FieldRef> {
        self.filters.iter().flat_map(|f| f.columns()).collect()
    }

    /// Columns referenced by GROUP BY expressions.
    pub fn group_columns(&self) -> Vec<&FieldRef> {
        self.group_by.iter().flat_map(|g| g.columns()).collect()
    }

    /// Aggregate functions used anywhere in the statement.
    pub fn aggregations(&self) -> Vec<Aggregation> {
        self.all_exprs().flat_map(|e| e.aggregations()).collect()
    }

    /// Rewrite every column reference, including join conditions.
    pub fn map_columns<F>(&mut self, f: &mut F) -> Result<(), FieldRef>
    where
        F: FnMut(&FieldRef) -> Option<FieldRef>,
    {
        for s in &mut self.select {
            s.expr.map_columns(f)?;
        }
        for e in self
            .filters
            .iter_mut()
            .chain(self.group_by.iter_mut())
            .chain(self.having.iter_mut())
        {
            e.map_columns(f)?;
        }
        for o in &mut self.order_by {
            o.expr.map_columns(f)?;
        }
        for join in &mut self.joins {
            for (left, right) in &mut join.on {
                for side in [left, right] {
                    match f(side) {
                        Some(mapped) => *side = mapped,
                        None => return Err(side.clone()),
                    }
                }
            }
        }
        Ok(())
    }

    /// Render for a dialect. Parameters are numbered in emission order.
    pub fn render(&self, dialect: Dialect) -> Result<RenderedSql, SqlError> {
        if self.select.is_empty() {
            return Err(SqlError::EmptySelect);
        }
        if self.all_exprs().any(|e| e.find_empty_list()) {
            return Err(SqlError::EmptyInList);
        }

        let mut w = SqlWriter::new(dialect);

        w.push("SELECT ");
        if let (true, Some(n)) = (dialect.uses_top(), self.limit) {
            w.push(&format!("TOP {} ", n));
        }
        for (i, item) in self.select.iter().enumerate() {
            if i > 0 {
                w.push(", ");
            }
            item.expr.render(&mut w);
            if let Some(alias) = &item.alias {
                let a = w.quote(alias);
                w.push(" AS ");
                w.push(&a);
            }
        }

        w.push("\nFROM ");
        self.from.render(&mut w);

        for join in &self.joins {
            w.push("\nINNER JOIN ");
            join.table.render(&mut w);
            w.push(" ON ");
            for (i, (left, right)) in join.on.iter().enumerate() {
                if i > 0 {
                    w.push(" AND ");
                }
                Expr::Column(left.clone()).render(&mut w);
                w.push(" = ");
                Expr::Column(right.clone()).render(&mut w);
            }
        }

        render_predicates(&mut w, "\nWHERE ", &self.filters);

        if !self.group_by.is_empty() {
            w.push("\nGROUP BY ");
            for (i, g) in self.group_by.iter().enumerate() {
                if i > 0 {
                    w.push(", ");
                }
                g.render(&mut w);
            }
        }

        render_predicates(&mut w, "\nHAVING ", &self.having);

        if !self.order_by.is_empty() {
            w.push("\nORDER BY ");
            for (i, o) in self.order_by.iter().enumerate() {
                if i > 0 {
                    w.push(", ");
                }
                o.expr.render(&mut w);
                w.push(if o.descending { " DESC" } else { " ASC" });
            }
        }

        if let (false, Some(n)) = (dialect.uses_top(), self.limit) {
            w.push(&format!("\nLIMIT {}", n));
        }

        Ok(w.finish())
    }
}

fn render_predicates(w: &mut SqlWriter, keyword: &str, predicates: &[Expr]) {
    if predicates.is_empty() {
        return;
    }
    w.push(keyword);
    for (i, p) in predicates.iter().enumerate() {
        if i > 0 {
            w.push(" AND ");
        }
        p.render(w);
    }
}
