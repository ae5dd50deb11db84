//! Physical rewrites of a translated query.
//!
//! Only the source changes: a materialized view may replace the base tables
//! and their joins when it covers every referenced column and, for
//! aggregated views, the grouping allows re-aggregation. Filters, grouping,
//! ordering and parameters keep their meaning.
//!
//! Optimization is best-effort. Any internal failure returns the input
//! untouched with a warning.

use std::collections::BTreeSet;

use tracing::{debug, warn};

use crate::config::OptimizerSettings;
use crate::schema::{FieldRef, SchemaModel, View};
use crate::sql::{validate, Query, SqlError, TableRef};
use crate::translation::SqlTranslationResult;

#[derive(Debug, thiserror::Error)]
enum OptimizeError {
    #[error("column {0} has no counterpart in view '{1}'")]
    UnmappedColumn(FieldRef, String),

    #[error("rewritten query failed to render: {0}")]
    Render(#[from] SqlError),

    #[error("rewritten query did not re-parse: {0}")]
    Invalid(String),
}

pub struct Optimizer<'a> {
    schema: &'a SchemaModel,
    settings: &'a OptimizerSettings,
}

impl<'a> Optimizer<'a> {
    pub fn new(schema: &'a SchemaModel, settings: &'a OptimizerSettings) -> Self {
        Self { schema, settings }
    }

    pub fn optimize(&self, result: SqlTranslationResult) -> SqlTranslationResult {
        if !self.settings.enabled {
            return result;
        }

        let view = if self.settings.materialized_views {
            self.find_view(&result.query)
        } else {
            None
        };

        let mut optimized = match view {
            Some(view) => match self.rewrite(&result, view) {
                Ok(rewritten) => rewritten,
                Err(e) => {
                    warn!(view = %view.name, error = %e, "View rewrite abandoned");
                    let mut unchanged = result;
                    unchanged
                        .warnings
                        .push(format!("Optimizer skipped view '{}': {}", view.name, e));
                    unchanged
                }
            },
            None => result,
        };

        if self.settings.index_hints && optimized.used_view.is_none() {
            optimized.index_hints = self.index_hints(&optimized.query);
        }
        optimized
    }

    /// First materialized view (by name) that can serve the query.
    fn find_view(&self, query: &Query) -> Option<&'a View> {
        let tables: BTreeSet<String> = query.tables().iter().map(|t| t.to_lowercase()).collect();
        let referenced = query.referenced_columns();
        let mut grouping: Vec<&FieldRef> = query.group_columns();
        grouping.extend(query.filter_columns());
        let reaggregable = query.aggregations().iter().all(|a| a.is_reaggregable());

        let mut views: Vec<&View> = self.schema.materialized_views().collect();
        views.sort_by(|a, b| a.name.cmp(&b.name));

        views.into_iter().find(|view| {
            let sources: BTreeSet<String> =
                view.source_tables.iter().map(|t| t.to_lowercase()).collect();
            if !tables.is_subset(&sources) {
                return false;
            }
            if !referenced.iter().all(|c| view.column_for(c).is_some()) {
                return false;
            }
            if view.is_aggregated() {
                let grouped = |f: &FieldRef| {
                    view.group_by.iter().any(|g| {
                        g.table.eq_ignore_ascii_case(&f.table)
                            && g.column.eq_ignore_ascii_case(&f.column)
                    })
                };
                return reaggregable && grouping.iter().all(|&f| grouped(f));
            }
            true
        })
    }

    fn rewrite(
        &self,
        result: &SqlTranslationResult,
        view: &View,
    ) -> Result<SqlTranslationResult, OptimizeError> {
        let mut optimized = result.clone();
        optimized.query = retarget(&result.query, view)?;
        let rendered = optimized.query.render(result.dialect)?;
        validate(&rendered.sql, result.dialect).map_err(OptimizeError::Invalid)?;
        optimized.sql = rendered.sql;
        optimized.parameters = rendered.parameters;

        for comparison in &mut optimized.comparison_queries {
            comparison.query = retarget(&comparison.query, view)?;
            let rendered = comparison.query.render(result.dialect)?;
            comparison.sql = rendered.sql;
            comparison.parameters = rendered.parameters;
        }

        let replaced: Vec<&str> = result.query.tables();
        optimized
            .explanation
            .retain(|step| !step.starts_with("Read from") && !step.starts_with("Join "));
        optimized.explanation.insert(
            0,
            format!(
                "Read from materialized view {} instead of {}",
                view.name,
                replaced.join(", ")
            ),
        );
        optimized.used_view = Some(view.name.clone());

        debug!(view = %view.name, "Rewrote query onto materialized view");
        Ok(optimized)
    }

    /// Indexes whose leading column is filtered on.
    fn index_hints(&self, query: &Query) -> Vec<String> {
        let mut hints = BTreeSet::new();
        for field in query.filter_columns() {
            let Some(table) = self.schema.table(&field.table) else {
                continue;
            };
            for index in &table.indexes {
                let leads = index
                    .columns
                    .first()
                    .is_some_and(|c| c.eq_ignore_ascii_case(&field.column));
                if leads {
                    hints.insert(format!(
                        "{} on {}({})",
                        index.name,
                        table.name,
                        index.columns.join(", ")
                    ));
                }
            }
        }
        hints.into_iter().collect()
    }
}

/// Point every column at the view and drop the joins.
fn retarget(query: &Query, view: &View) -> Result<Query, OptimizeError> {
    let mut rewritten = query.clone();
    rewritten.joins.clear();
    rewritten.from = TableRef::new(&view.name).with_schema(view.schema.as_deref());
    rewritten
        .map_columns(&mut |f: &FieldRef| {
            view.column_for(f)
                .map(|c| FieldRef::new(view.name.clone(), c.name.clone()))
        })
        .map_err(|f| OptimizeError::UnmappedColumn(f, view.name.clone()))?;
    Ok(rewritten)
}
