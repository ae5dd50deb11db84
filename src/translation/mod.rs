//! SQL translator - mapped entities to a parameterized SELECT.
//!
//! The translator never looks at surface terms: it works purely from the
//! canonical mapped set, so its output depends only on the entities and the
//! schema. Steps:
//!
//! 1. Collect the tables owning every referenced field.
//! 2. Pick an anchor and plan joins ([`join_builder`]).
//! 3. Build the [`Query`] AST: projection, time range, filters, grouping,
//!    ordering and the row cap.
//! 4. Render for the configured dialect and re-parse with `sqlparser`.

pub mod join_builder;

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::{debug, warn};

use crate::config::TranslationSettings;
use crate::dictionary::{Formula, FormulaOp};
use crate::entities::{
    Comparison, FilterOperator, FilterTarget, MappedDimension, MappedFilter, MappedMetric,
    MappedQueryEntities, ResolvedTimeRange, SortDirection, SortTarget,
};
use crate::error::{TranslateError, TranslateResult};
use crate::schema::{DataType, FieldRef, SchemaModel};
use crate::sql::{
    aggregate, binary, col, value, BinaryOp, BoundParameter, Dialect, Expr, ParamValue, Query,
    SqlError, TableRef, LIKE_ESCAPE,
};

pub use join_builder::{JoinBuilder, JoinPlan};

/// The same query over a shifted time range.
#[derive(Debug, Clone, Serialize)]
pub struct ComparisonQuery {
    pub comparison: Comparison,
    pub time_range: ResolvedTimeRange,
    pub sql: String,
    pub parameters: Vec<BoundParameter>,
    #[serde(skip)]
    pub query: Query,
}

/// A validated statement plus everything needed to run or explain it.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SqlTranslationResult {
    pub sql: String,
    pub parameters: Vec<BoundParameter>,
    /// Tables owning the referenced fields, sorted.
    pub required_tables: Vec<String>,
    /// Materialized view substituted by the optimizer.
    pub used_view: Option<String>,
    pub warnings: Vec<String>,
    /// Plan steps in reading order.
    pub explanation: Vec<String>,
    pub index_hints: Vec<String>,
    pub comparison_queries: Vec<ComparisonQuery>,
    pub dialect: Dialect,
    /// The AST the SQL was rendered from.
    #[serde(skip)]
    pub query: Query,
}

/// Translator bound to one schema version.
pub struct SqlTranslator<'a> {
    schema: &'a SchemaModel,
    settings: &'a TranslationSettings,
}

/// Column the time range applies to.
struct TimeColumn {
    field: FieldRef,
    data_type: DataType,
}

impl<'a> SqlTranslator<'a> {
    pub fn new(schema: &'a SchemaModel, settings: &'a TranslationSettings) -> Self {
        Self { schema, settings }
    }

    pub fn translate(&self, mapped: &MappedQueryEntities) -> TranslateResult<SqlTranslationResult> {
        if mapped.is_empty() {
            return Err(TranslateError::EmptyProjection);
        }

        let mut warnings = Vec::new();
        let mut required = required_columns(mapped);
        if required.is_empty() {
            return Err(TranslateError::EmptyProjection);
        }

        let builder = JoinBuilder::new(
            self.schema,
            self.settings.join_tie_break,
            self.settings.max_join_depth,
        );

        let time_column = match mapped.time_range {
            Some(_) => {
                let found = self.time_column(mapped, &required, &builder);
                if found.is_none() {
                    warnings.push(
                        "No date column is available for the time range; it was not applied"
                            .to_string(),
                    );
                }
                found
            }
            None => None,
        };
        if let Some(tc) = &time_column {
            required
                .entry(tc.field.table.clone())
                .or_default()
                .insert(tc.field.column.clone());
        }

        let plan = builder.build(&required)?;
        let required_tables: Vec<String> = required.keys().cloned().collect();

        let limit = self.effective_limit(mapped.limit, &mut warnings);
        let query = self.build_query(mapped, &plan, time_column.as_ref(), mapped.time_range, limit, &mut warnings)?;
        let rendered = self.render(&query)?;
        self.validate(&rendered.sql, &mut warnings);

        let mut comparison_queries = Vec::new();
        for &comparison in &mapped.comparisons {
            let (Some(range), Some(tc)) = (mapped.time_range, time_column.as_ref()) else {
                warnings.push(format!(
                    "Comparison '{}' needs a time range on a date column; skipped",
                    comparison.as_str()
                ));
                continue;
            };
            let shifted = range.shift(comparison);
            let mut ignored = Vec::new();
            let query = self.build_query(mapped, &plan, Some(tc), Some(shifted), limit, &mut ignored)?;
            let rendered = self.render(&query)?;
            comparison_queries.push(ComparisonQuery {
                comparison,
                time_range: shifted,
                sql: rendered.sql,
                parameters: rendered.parameters,
                query,
            });
        }

        let explanation = explain(mapped, &plan, time_column.as_ref(), &query);

        debug!(
            tables = ?plan.tables(),
            parameters = rendered.parameters.len(),
            "Translated query"
        );

        Ok(SqlTranslationResult {
            sql: rendered.sql,
            parameters: rendered.parameters,
            required_tables,
            used_view: None,
            warnings,
            explanation,
            index_hints: Vec::new(),
            comparison_queries,
            dialect: self.settings.dialect,
            query,
        })
    }

    /// A requested date dimension, else the anchor's date column, else the
    /// first required table (by name) that has one.
    fn time_column(
        &self,
        mapped: &MappedQueryEntities,
        required: &BTreeMap<String, BTreeSet<String>>,
        builder: &JoinBuilder<'_>,
    ) -> Option<TimeColumn> {
        let typed = |field: FieldRef| {
            let data_type = self.schema.column(&field)?.data_type;
            Some(TimeColumn { field, data_type })
        };

        if let Some(dim) = mapped.dimensions.iter().find(|d| d.is_date) {
            return typed(dim.field.clone());
        }

        let date_of = |table: &str| {
            let t = self.schema.table(table)?;
            Some(FieldRef::new(t.name.clone(), t.date_column()?.to_string()))
        };
        if let Some(field) = builder.anchor(required).and_then(date_of) {
            return typed(field);
        }
        required
            .keys()
            .find_map(|t| date_of(t))
            .and_then(typed)
    }

    fn effective_limit(&self, requested: Option<u32>, warnings: &mut Vec<String>) -> u64 {
        let cap = self.settings.row_cap;
        match requested {
            Some(n) if n > cap => {
                warnings.push(format!("Limit {} exceeds the row cap; using {}", n, cap));
                cap as u64
            }
            Some(n) => n as u64,
            None => cap as u64,
        }
    }

    fn build_query(
        &self,
        mapped: &MappedQueryEntities,
        plan: &JoinPlan,
        time_column: Option<&TimeColumn>,
        time_range: Option<ResolvedTimeRange>,
        limit: u64,
        warnings: &mut Vec<String>,
    ) -> TranslateResult<Query> {
        let mut query = Query::new(self.table_ref(&plan.anchor));
        for step in &plan.steps {
            query = query.inner_join(
                self.table_ref(&step.to_table),
                FieldRef::new(step.from_table.clone(), step.from_column.clone()),
                FieldRef::new(step.to_table.clone(), step.to_column.clone()),
            );
        }

        for dim in &mapped.dimensions {
            let expr = dimension_expr(dim);
            query = query.select(expr.clone(), &dim.name).group_by(expr);
        }
        for metric in mapped.visible_metrics() {
            query = query.select(metric_expr(metric, mapped)?, &metric.name);
        }

        if let (Some(tc), Some(range)) = (time_column, time_range) {
            query = query.filter(col(&tc.field).between(
                value(ParamValue::day_start(range.start, tc.data_type)),
                value(ParamValue::day_end(range.end, tc.data_type)),
            ));
        }

        for filter in &mapped.filters {
            match &filter.target {
                FilterTarget::Column(field) => {
                    query = query.filter(filter_expr(filter, col(field))?);
                }
                FilterTarget::Metric(metric) => {
                    query = query.having(filter_expr(filter, metric_expr(metric, mapped)?)?);
                }
            }
        }

        for (expr, descending) in order_by(mapped, warnings)? {
            query = query.order_by(expr, descending);
        }

        Ok(query.limit(limit))
    }

    fn table_ref(&self, name: &str) -> TableRef {
        let schema = self.schema.table(name).and_then(|t| t.schema.as_deref());
        TableRef::new(name).with_schema(schema)
    }

    fn render(&self, query: &Query) -> TranslateResult<crate::sql::RenderedSql> {
        query.render(self.settings.dialect).map_err(|e| match e {
            SqlError::EmptySelect => TranslateError::EmptyProjection,
            SqlError::EmptyInList => TranslateError::InvalidValue {
                field: "IN".into(),
                value: String::new(),
                reason: e.to_string(),
            },
        })
    }

    fn validate(&self, sql: &str, warnings: &mut Vec<String>) {
        if !self.settings.validate_sql {
            return;
        }
        if let Err(message) = crate::sql::validate(sql, self.settings.dialect) {
            warn!(error = %message, "Generated SQL did not re-parse");
            warnings.push(format!("Generated SQL did not re-parse: {}", message));
        }
    }
}

/// Table -> referenced columns, over metrics, dimensions and column filters.
fn required_columns(mapped: &MappedQueryEntities) -> BTreeMap<String, BTreeSet<String>> {
    let mut required: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    let mut add = |field: &FieldRef| {
        required
            .entry(field.table.clone())
            .or_default()
            .insert(field.column.clone());
    };
    for metric in &mapped.metrics {
        if let Some(field) = &metric.field {
            add(field);
        }
    }
    for dim in &mapped.dimensions {
        add(&dim.field);
    }
    for filter in &mapped.filters {
        match &filter.target {
            FilterTarget::Column(field) => add(field),
            FilterTarget::Metric(metric) => {
                if let Some(field) = &metric.field {
                    add(field);
                }
            }
        }
    }
    required
}

fn dimension_expr(dim: &MappedDimension) -> Expr {
    match dim.grain {
        Some(grain) => col(&dim.field).date_part(grain),
        None => col(&dim.field),
    }
}

/// Aggregate for a plain metric; expanded formula for a calculated one.
fn metric_expr(metric: &MappedMetric, mapped: &MappedQueryEntities) -> TranslateResult<Expr> {
    if let Some(formula) = &metric.formula {
        return formula_expr(formula, mapped);
    }
    match &metric.field {
        Some(field) => Ok(aggregate(metric.aggregation, col(field))),
        None => Err(TranslateError::InvalidValue {
            field: metric.name.clone(),
            value: String::new(),
            reason: "metric has neither a field nor a formula".into(),
        }),
    }
}

fn formula_expr(formula: &Formula, mapped: &MappedQueryEntities) -> TranslateResult<Expr> {
    Ok(match formula {
        Formula::Metric(name) => {
            let constituent = mapped.metric(name).ok_or_else(|| TranslateError::InvalidValue {
                field: name.clone(),
                value: String::new(),
                reason: "formula constituent was not mapped".into(),
            })?;
            metric_expr(constituent, mapped)?
        }
        Formula::Number(n) => Expr::Number(*n),
        Formula::Group(inner) => Expr::Nested(Box::new(formula_expr(inner, mapped)?)),
        Formula::Binary { left, op, right } => {
            let l = formula_expr(left, mapped)?;
            let r = formula_expr(right, mapped)?;
            match op {
                FormulaOp::Add => binary(l, BinaryOp::Plus, r),
                FormulaOp::Sub => binary(l, BinaryOp::Minus, r),
                FormulaOp::Mul => binary(l, BinaryOp::Mul, r),
                // division by zero yields NULL instead of an error
                FormulaOp::Div => binary(l, BinaryOp::Div, Expr::NullIfZero(Box::new(r))),
            }
        }
    })
}

fn filter_expr(filter: &MappedFilter, target: Expr) -> TranslateResult<Expr> {
    let at = |i: usize| {
        filter
            .values
            .get(i)
            .cloned()
            .ok_or_else(|| TranslateError::InvalidValue {
                field: filter.term.clone(),
                value: String::new(),
                reason: format!("'{}' is missing a value", filter.operator),
            })
    };
    let pattern = |fmt: fn(&str) -> String| -> TranslateResult<Expr> {
        let raw = escape_like(&at(0)?.to_string());
        Ok(value(ParamValue::Text(fmt(&raw))))
    };

    let expr = match filter.operator {
        FilterOperator::Equals => binary(target, BinaryOp::Eq, value(at(0)?)),
        FilterOperator::NotEquals => binary(target, BinaryOp::NotEq, value(at(0)?)),
        FilterOperator::GreaterThan => binary(target, BinaryOp::Gt, value(at(0)?)),
        FilterOperator::GreaterOrEqual => binary(target, BinaryOp::Gte, value(at(0)?)),
        FilterOperator::LessThan => binary(target, BinaryOp::Lt, value(at(0)?)),
        FilterOperator::LessOrEqual => binary(target, BinaryOp::Lte, value(at(0)?)),
        FilterOperator::Contains => target.like(pattern(|v| format!("%{}%", v))?),
        FilterOperator::StartsWith => target.like(pattern(|v| format!("{}%", v))?),
        FilterOperator::EndsWith => target.like(pattern(|v| format!("%{}", v))?),
        FilterOperator::In | FilterOperator::NotIn => {
            if filter.values.is_empty() {
                return Err(TranslateError::InvalidValue {
                    field: filter.term.clone(),
                    value: String::new(),
                    reason: "empty value list".into(),
                });
            }
            target.in_list(
                filter.values.iter().cloned().map(value).collect(),
                filter.operator == FilterOperator::NotIn,
            )
        }
        FilterOperator::Between => target.between(value(at(0)?), value(at(1)?)),
        FilterOperator::IsNull => target.is_null(false),
        FilterOperator::IsNotNull => target.is_null(true),
    };
    Ok(if filter.negated { expr.not() } else { expr })
}

/// Escape LIKE wildcards so user text matches literally.
fn escape_like(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '%' | '_' | LIKE_ESCAPE) {
            out.push(LIKE_ESCAPE);
        }
        out.push(c);
    }
    out
}

/// Requested sort, else the first metric descending, else the dimensions
/// ascending.
fn order_by(
    mapped: &MappedQueryEntities,
    warnings: &mut Vec<String>,
) -> TranslateResult<Vec<(Expr, bool)>> {
    if let Some(sort) = &mapped.sort {
        let descending = sort.direction == SortDirection::Desc;
        let expr = match &sort.target {
            SortTarget::Metric(name) => mapped
                .metric(name)
                .map(|m| metric_expr(m, mapped))
                .transpose()?,
            SortTarget::Dimension(name) => mapped.dimension(name).map(dimension_expr),
        };
        match expr {
            Some(expr) => return Ok(vec![(expr, descending)]),
            None => warnings.push(format!(
                "Sort on '{}' does not match a selected field; using the default order",
                sort.term
            )),
        }
    }

    if let Some(metric) = mapped.visible_metrics().next() {
        return Ok(vec![(metric_expr(metric, mapped)?, true)]);
    }
    Ok(mapped
        .dimensions
        .iter()
        .map(|d| (dimension_expr(d), false))
        .collect())
}

fn explain(
    mapped: &MappedQueryEntities,
    plan: &JoinPlan,
    time_column: Option<&TimeColumn>,
    query: &Query,
) -> Vec<String> {
    let mut steps = vec![format!("Read from {}", plan.anchor)];
    for step in &plan.steps {
        steps.push(format!(
            "Join {} on {}.{} = {}.{} ({})",
            step.to_table,
            step.from_table,
            step.from_column,
            step.to_table,
            step.to_column,
            step.cardinality
        ));
    }
    if let (Some(tc), Some(range)) = (time_column, mapped.time_range) {
        steps.push(format!(
            "Keep rows where {} is between {} and {}",
            tc.field, range.start, range.end
        ));
    }
    for filter in &mapped.filters {
        let values: Vec<String> = filter.values.iter().map(|v| v.to_string()).collect();
        let clause = match filter.target {
            FilterTarget::Column(_) => "Keep rows",
            FilterTarget::Metric(_) => "Keep groups",
        };
        steps.push(format!(
            "{} where {} {}{} {}",
            clause,
            filter.term,
            if filter.negated { "not " } else { "" },
            filter.operator.as_str().replace('_', " "),
            values.join(", ")
        ).trim_end().to_string());
    }
    if !mapped.dimensions.is_empty() {
        let names: Vec<&str> = mapped.dimensions.iter().map(|d| d.name.as_str()).collect();
        steps.push(format!("Group by {}", names.join(", ")));
    }
    let metrics: Vec<&str> = mapped.visible_metrics().map(|m| m.name.as_str()).collect();
    if !metrics.is_empty() {
        steps.push(format!("Compute {}", metrics.join(", ")));
    }
    if let Some(sort) = &mapped.sort {
        let name = match &sort.target {
            SortTarget::Metric(n) | SortTarget::Dimension(n) => n,
        };
        let dir = match sort.direction {
            SortDirection::Asc => "ascending",
            SortDirection::Desc => "descending",
        };
        steps.push(format!("Order by {} {}", name, dir));
    }
    if let Some(n) = query.limit {
        steps.push(format!("Return at most {} rows", n));
    }
    steps
}
