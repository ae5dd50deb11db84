//! Entities resolved to schema fields.

use serde::Serialize;

use super::{Comparison, FilterOperator, ResolvedTimeRange, SortDirection};
use crate::dictionary::{Aggregation, DateGrain, Formula};
use crate::schema::{DataType, FieldRef};
use crate::sql::ParamValue;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MappedMetric {
    /// Surface term as written.
    pub term: String,
    /// Canonical dictionary name, also the output alias.
    pub name: String,
    pub field: Option<FieldRef>,
    pub aggregation: Aggregation,
    pub data_type: DataType,
    /// Expression for calculated metrics, referencing other metrics by name.
    pub formula: Option<Formula>,
    /// Pulled in only as a formula constituent; not projected.
    pub is_part_of_calculation: bool,
}

impl MappedMetric {
    pub fn is_calculated(&self) -> bool {
        self.formula.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MappedDimension {
    pub term: String,
    pub name: String,
    pub field: FieldRef,
    pub grain: Option<DateGrain>,
    pub is_date: bool,
}

/// What a filter constrains: a column (WHERE) or an aggregate (HAVING).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterTarget {
    Column(FieldRef),
    Metric(Box<MappedMetric>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MappedFilter {
    pub term: String,
    pub target: FilterTarget,
    pub data_type: DataType,
    pub operator: FilterOperator,
    pub values: Vec<ParamValue>,
    pub negated: bool,
}

impl MappedFilter {
    /// Column for column filters.
    pub fn column(&self) -> Option<&FieldRef> {
        match &self.target {
            FilterTarget::Column(f) => Some(f),
            FilterTarget::Metric(_) => None,
        }
    }

    /// Column filters and metric filters share a key space: `Table.Column`
    /// or the metric name.
    pub fn target_key(&self) -> String {
        match &self.target {
            FilterTarget::Column(f) => f.qualified_name(),
            FilterTarget::Metric(m) => m.name.clone(),
        }
    }
}

/// Sort on a mapped metric or dimension, by canonical name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SortTarget {
    Metric(String),
    Dimension(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MappedSort {
    pub term: String,
    pub target: SortTarget,
    pub direction: SortDirection,
}

/// A conflict-free request, ready for translation.
///
/// Metrics and dimensions are kept sorted by name so that phrasing order
/// does not change the cache key or the generated SQL.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MappedQueryEntities {
    pub metrics: Vec<MappedMetric>,
    pub dimensions: Vec<MappedDimension>,
    pub filters: Vec<MappedFilter>,
    pub sort: Option<MappedSort>,
    pub limit: Option<u32>,
    pub time_range: Option<ResolvedTimeRange>,
    pub comparisons: Vec<Comparison>,
}

impl MappedQueryEntities {
    /// Metrics that appear in the select list.
    pub fn visible_metrics(&self) -> impl Iterator<Item = &MappedMetric> {
        self.metrics.iter().filter(|m| !m.is_part_of_calculation)
    }

    pub fn metric(&self, name: &str) -> Option<&MappedMetric> {
        self.metrics.iter().find(|m| m.name == name)
    }

    pub fn dimension(&self, name: &str) -> Option<&MappedDimension> {
        self.dimensions.iter().find(|d| d.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.visible_metrics().next().is_none() && self.dimensions.is_empty()
    }
}
