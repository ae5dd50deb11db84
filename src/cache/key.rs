//! Cache key derivation.
//!
//! The key covers what determines the SQL and nothing else: canonical
//! names, fields, aggregations, operators, coerced values, the resolved
//! time range, sort and limit. Surface terms are left out, so different
//! phrasings that map to the same entities share an entry.

use serde::Serialize;

use super::compute_hash;
use crate::dictionary::{Aggregation, DateGrain};
use crate::entities::{
    Comparison, FilterOperator, MappedQueryEntities, ResolvedTimeRange, SortDirection, SortTarget,
};
use crate::schema::FieldRef;
use crate::sql::ParamValue;

#[derive(Serialize)]
struct MetricKey<'a> {
    name: &'a str,
    field: Option<&'a FieldRef>,
    aggregation: Aggregation,
    hidden: bool,
}

#[derive(Serialize)]
struct DimensionKey<'a> {
    name: &'a str,
    field: &'a FieldRef,
    grain: Option<DateGrain>,
}

#[derive(Serialize)]
struct FilterKey<'a> {
    target: String,
    aggregation: Option<Aggregation>,
    operator: FilterOperator,
    negated: bool,
    values: &'a [ParamValue],
}

#[derive(Serialize)]
struct KeyMaterial<'a> {
    scope: &'a str,
    metrics: Vec<MetricKey<'a>>,
    dimensions: Vec<DimensionKey<'a>>,
    filters: Vec<FilterKey<'a>>,
    sort: Option<(&'a SortTarget, SortDirection)>,
    limit: Option<u32>,
    time_range: Option<ResolvedTimeRange>,
    comparisons: &'a [Comparison],
}

/// Cache key builder.
pub struct CacheKey;

impl CacheKey {
    /// SHA-256 key for a mapped entity set.
    ///
    /// `scope` names whatever else the SQL depends on (schema and dictionary
    /// versions), so entries from another version never match.
    pub fn for_mapped(
        mapped: &MappedQueryEntities,
        scope: &str,
    ) -> Result<String, serde_json::Error> {
        let material = KeyMaterial {
            scope,
            metrics: mapped
                .metrics
                .iter()
                .map(|m| MetricKey {
                    name: &m.name,
                    field: m.field.as_ref(),
                    aggregation: m.aggregation,
                    hidden: m.is_part_of_calculation,
                })
                .collect(),
            dimensions: mapped
                .dimensions
                .iter()
                .map(|d| DimensionKey {
                    name: &d.name,
                    field: &d.field,
                    grain: d.grain,
                })
                .collect(),
            filters: mapped
                .filters
                .iter()
                .map(|f| FilterKey {
                    target: f.target_key(),
                    aggregation: match &f.target {
                        crate::entities::FilterTarget::Metric(m) => Some(m.aggregation),
                        crate::entities::FilterTarget::Column(_) => None,
                    },
                    operator: f.operator,
                    negated: f.negated,
                    values: &f.values,
                })
                .collect(),
            sort: mapped.sort.as_ref().map(|s| (&s.target, s.direction)),
            limit: mapped.limit,
            time_range: mapped.time_range,
            comparisons: &mapped.comparisons,
        };
        compute_hash(&material)
    }
}
