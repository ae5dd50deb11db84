//! Raw entities as produced by an extractor.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::EntityConflict;
use crate::dictionary::Aggregation;

fn one() -> f64 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawMetric {
    pub name: String,
    #[serde(default)]
    pub aggregation: Option<Aggregation>,
    #[serde(default = "one")]
    pub confidence: f64,
    /// Dictionary entry chosen during clarification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved: Option<String>,
}

impl RawMetric {
    pub fn new(name: &str, confidence: f64) -> Self {
        Self {
            name: name.into(),
            aggregation: None,
            confidence,
            resolved: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDimension {
    pub name: String,
    #[serde(default = "one")]
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved: Option<String>,
}

impl RawDimension {
    pub fn new(name: &str, confidence: f64) -> Self {
        Self {
            name: name.into(),
            confidence,
            resolved: None,
        }
    }
}

/// Filter literal(s) as written.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Many(Vec<String>),
    One(String),
    #[default]
    None,
}

impl FilterValue {
    pub fn values(&self) -> Vec<&str> {
        match self {
            FilterValue::Many(v) => v.iter().map(String::as_str).collect(),
            FilterValue::One(v) => vec![v.as_str()],
            FilterValue::None => vec![],
        }
    }
}

impl fmt::Display for FilterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.values().join(", "))
    }
}

/// Comparison operators understood in filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperator {
    Equals,
    NotEquals,
    GreaterThan,
    GreaterOrEqual,
    LessThan,
    LessOrEqual,
    Contains,
    StartsWith,
    EndsWith,
    In,
    NotIn,
    Between,
    IsNull,
    IsNotNull,
}

impl FilterOperator {
    /// Parse a free-text operator word or symbol.
    pub fn parse(s: &str) -> Option<Self> {
        let key = s.trim().to_lowercase().replace(['_', '-'], " ");
        let op = match key.as_str() {
            "=" | "==" | "equals" | "equal" | "is" | "eq" => FilterOperator::Equals,
            "!=" | "<>" | "not equals" | "not equal" | "is not" | "ne" => {
                FilterOperator::NotEquals
            }
            ">" | "greater than" | "more than" | "above" | "over" | "gt" => {
                FilterOperator::GreaterThan
            }
            ">=" | "greater or equal" | "at least" | "gte" => FilterOperator::GreaterOrEqual,
            "<" | "less than" | "below" | "under" | "lt" => FilterOperator::LessThan,
            "<=" | "less or equal" | "at most" | "lte" => FilterOperator::LessOrEqual,
            "contains" | "like" => FilterOperator::Contains,
            "starts with" | "begins with" => FilterOperator::StartsWith,
            "ends with" => FilterOperator::EndsWith,
            "in" | "one of" => FilterOperator::In,
            "not in" | "none of" => FilterOperator::NotIn,
            "between" => FilterOperator::Between,
            "is null" | "empty" | "missing" => FilterOperator::IsNull,
            "is not null" | "not empty" | "present" => FilterOperator::IsNotNull,
            _ => return None,
        };
        Some(op)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOperator::Equals => "equals",
            FilterOperator::NotEquals => "not_equals",
            FilterOperator::GreaterThan => "greater_than",
            FilterOperator::GreaterOrEqual => "greater_or_equal",
            FilterOperator::LessThan => "less_than",
            FilterOperator::LessOrEqual => "less_or_equal",
            FilterOperator::Contains => "contains",
            FilterOperator::StartsWith => "starts_with",
            FilterOperator::EndsWith => "ends_with",
            FilterOperator::In => "in",
            FilterOperator::NotIn => "not_in",
            FilterOperator::Between => "between",
            FilterOperator::IsNull => "is_null",
            FilterOperator::IsNotNull => "is_not_null",
        }
    }

    /// Accepted number of values, as `(min, max)`.
    pub fn arity(&self) -> (usize, Option<usize>) {
        match self {
            FilterOperator::IsNull | FilterOperator::IsNotNull => (0, Some(0)),
            FilterOperator::Between => (2, Some(2)),
            FilterOperator::In | FilterOperator::NotIn => (1, None),
            _ => (1, Some(1)),
        }
    }

    pub fn is_pattern(&self) -> bool {
        matches!(
            self,
            FilterOperator::Contains | FilterOperator::StartsWith | FilterOperator::EndsWith
        )
    }
}

impl fmt::Display for FilterOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawFilter {
    /// Term naming the filtered dimension or metric.
    pub field: String,
    /// Operator word as extracted (`"equals"`, `">"`, `"in"`).
    #[serde(default = "default_operator")]
    pub operator: String,
    #[serde(default)]
    pub value: FilterValue,
    #[serde(default)]
    pub negated: bool,
    #[serde(default = "one")]
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved: Option<String>,
}

fn default_operator() -> String {
    "equals".into()
}

impl RawFilter {
    pub fn new(field: &str, operator: &str, value: FilterValue) -> Self {
        Self {
            field: field.into(),
            operator: operator.into(),
            value,
            negated: false,
            confidence: 1.0,
            resolved: None,
        }
    }

    pub fn equals(field: &str, value: &str) -> Self {
        Self::new(field, "equals", FilterValue::One(value.into()))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSort {
    pub field: String,
    #[serde(default)]
    pub direction: SortDirection,
}

/// Time range as extracted: a relative period or explicit bounds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    #[serde(default)]
    pub relative_period: Option<String>,
    #[serde(default)]
    pub start: Option<chrono::NaiveDate>,
    #[serde(default)]
    pub end: Option<chrono::NaiveDate>,
}

impl TimeRange {
    pub fn relative(period: &str) -> Self {
        Self {
            relative_period: Some(period.into()),
            start: None,
            end: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    YearOverYear,
    MonthOverMonth,
    PreviousPeriod,
}

impl Comparison {
    pub fn as_str(&self) -> &'static str {
        match self {
            Comparison::YearOverYear => "year_over_year",
            Comparison::MonthOverMonth => "month_over_month",
            Comparison::PreviousPeriod => "previous_period",
        }
    }
}

/// Raw request state. Extractor output, and the snapshot returned to
/// callers for clarification rounds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryEntities {
    pub original_query: String,
    pub time_range: Option<TimeRange>,
    pub metrics: Vec<RawMetric>,
    pub dimensions: Vec<RawDimension>,
    pub filters: Vec<RawFilter>,
    pub sort_by: Option<RawSort>,
    pub limit: Option<u32>,
    pub comparisons: Vec<Comparison>,
    pub conflicts: Vec<EntityConflict>,
    pub overall_confidence: f64,
    /// Dictionary and schema stamp taken when prompts were issued.
    pub snapshot: Option<String>,
}

impl QueryEntities {
    pub fn new(original_query: &str) -> Self {
        Self {
            original_query: original_query.into(),
            overall_confidence: 1.0,
            ..Default::default()
        }
    }

    pub fn with_metric(mut self, name: &str, confidence: f64) -> Self {
        self.metrics.push(RawMetric::new(name, confidence));
        self
    }

    pub fn with_dimension(mut self, name: &str, confidence: f64) -> Self {
        self.dimensions.push(RawDimension::new(name, confidence));
        self
    }

    pub fn with_filter(mut self, filter: RawFilter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn with_time_range(mut self, period: &str) -> Self {
        self.time_range = Some(TimeRange::relative(period));
        self
    }

    pub fn with_sort(mut self, field: &str, direction: SortDirection) -> Self {
        self.sort_by = Some(RawSort {
            field: field.into(),
            direction,
        });
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_comparison(mut self, comparison: Comparison) -> Self {
        self.comparisons.push(comparison);
        self
    }
}
