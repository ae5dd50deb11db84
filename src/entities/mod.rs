//! Entity types flowing through the pipeline.
//!
//! - [`QueryEntities`]: raw, confidence-scored terms as extracted from text,
//!   plus the conflicts raised against them. This is also the snapshot a
//!   caller sends back with clarification answers.
//! - [`MappedQueryEntities`]: the same request resolved to schema fields.
//!   Only a conflict-free mapping is ever translated or cached.

mod conflict;
mod mapped;
mod raw;
mod time;

pub use conflict::{conflict_id, ConflictType, EntityConflict};
pub use mapped::{
    FilterTarget, MappedDimension, MappedFilter, MappedMetric, MappedQueryEntities, MappedSort,
    SortTarget,
};
pub use raw::{
    Comparison, FilterOperator, FilterValue, QueryEntities, RawDimension, RawFilter, RawMetric,
    RawSort, SortDirection, TimeRange,
};
pub use time::{ResolvedTimeRange, DEFAULT_PERIOD};

use std::fmt;

use serde::{Deserialize, Serialize};

/// Which part of a query an entity or conflict belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Metric,
    Dimension,
    Filter,
    Sort,
    TimeRange,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Metric => "metric",
            EntityKind::Dimension => "dimension",
            EntityKind::Filter => "filter",
            EntityKind::Sort => "sort",
            EntityKind::TimeRange => "time_range",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "metric" | "metrics" => Some(EntityKind::Metric),
            "dimension" | "dimensions" => Some(EntityKind::Dimension),
            "filter" | "filters" => Some(EntityKind::Filter),
            "sort" => Some(EntityKind::Sort),
            "time_range" | "time" => Some(EntityKind::TimeRange),
            _ => None,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
