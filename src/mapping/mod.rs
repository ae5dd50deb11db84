//! Entity mapper - resolves raw terms to schema fields through the dictionary.
//!
//! Mapping is total: every raw metric, dimension, filter and sort either
//! produces a mapped entity or a conflict. Conflicts are data, returned
//! alongside whatever did map, and drive the clarification round-trip.
//!
//! The mapped set is put in canonical order (metrics and dimensions by name,
//! filters by target) so that two phrasings of the same question produce
//! identical SQL and cache keys.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use tracing::debug;

use crate::config::MappingSettings;
use crate::dictionary::{Aggregation, Candidate, EntityDictionary};
use crate::entities::{
    ConflictType, EntityConflict, EntityKind, FilterOperator, FilterTarget,
    MappedDimension, MappedFilter, MappedMetric, MappedQueryEntities, MappedSort, QueryEntities,
    RawFilter, ResolvedTimeRange, SortDirection, SortTarget, DEFAULT_PERIOD,
};
use crate::schema::{DataType, SchemaModel};
use crate::sql::ParamValue;

/// Candidates closer than this are considered equally good.
const SCORE_EPSILON: f64 = 1e-9;

/// Result of mapping one request.
#[derive(Debug, Clone, Default)]
pub struct MappingOutcome {
    pub mapped: MappedQueryEntities,
    pub conflicts: Vec<EntityConflict>,
    pub warnings: Vec<String>,
}

impl MappingOutcome {
    /// No conflicts: the mapped set can be translated.
    pub fn is_resolved(&self) -> bool {
        self.conflicts.is_empty()
    }
}

/// Operator a raw filter will be mapped with, if understood.
///
/// A list of values under `equals` becomes `in` (and `not_equals` becomes
/// `not_in`).
pub fn effective_operator(filter: &RawFilter) -> Option<FilterOperator> {
    let op = FilterOperator::parse(&filter.operator)?;
    let many = filter.value.values().len() > 1;
    Some(match op {
        FilterOperator::Equals if many => FilterOperator::In,
        FilterOperator::NotEquals if many => FilterOperator::NotIn,
        other => other,
    })
}

/// Human-readable filter condition, e.g. `equals UK` or `not in UK, DE`.
///
/// Used as the option text of `Conflicting` prompts and to find the filters
/// an answer refers to.
pub fn describe_filter(filter: &RawFilter) -> String {
    let op = effective_operator(filter)
        .map(|o| o.as_str().replace('_', " "))
        .unwrap_or_else(|| filter.operator.clone());
    let values = filter.value.to_string();
    let negation = if filter.negated { "not " } else { "" };
    if values.is_empty() {
        format!("{}{}", negation, op)
    } else {
        format!("{}{} {}", negation, op, values)
    }
}

pub struct EntityMapper<'a> {
    dictionary: &'a EntityDictionary,
    schema: &'a SchemaModel,
    settings: &'a MappingSettings,
    today: NaiveDate,
}

#[derive(Default)]
struct Collected {
    metrics: Vec<MappedMetric>,
    dimensions: Vec<MappedDimension>,
    conflicts: Vec<EntityConflict>,
    warnings: Vec<String>,
}

impl Collected {
    fn conflict(&mut self, conflict: EntityConflict) {
        if !self.conflicts.iter().any(|c| c.id == conflict.id) {
            self.conflicts.push(conflict);
        }
    }
}

impl<'a> EntityMapper<'a> {
    /// `today` anchors relative time periods.
    pub fn new(
        dictionary: &'a EntityDictionary,
        schema: &'a SchemaModel,
        settings: &'a MappingSettings,
        today: NaiveDate,
    ) -> Self {
        Self {
            dictionary,
            schema,
            settings,
            today,
        }
    }

    pub fn map(&self, raw: &QueryEntities) -> MappingOutcome {
        let mut out = Collected::default();

        for upstream in &raw.conflicts {
            let mut conflict = upstream.clone();
            conflict.upstream = true;
            conflict.ensure_id();
            out.conflict(conflict);
        }

        for metric in &raw.metrics {
            match self.resolve(
                EntityKind::Metric,
                EntityKind::Metric,
                &metric.name,
                metric.confidence,
                metric.resolved.as_deref(),
            ) {
                Ok(name) => self.add_metric(&name, &metric.name, metric.aggregation, false, &mut out),
                Err(conflict) => out.conflict(conflict),
            }
        }
        let first_requested = out
            .metrics
            .iter()
            .find(|m| !m.is_part_of_calculation)
            .map(|m| m.name.clone());

        for dim in &raw.dimensions {
            match self.resolve(
                EntityKind::Dimension,
                EntityKind::Dimension,
                &dim.name,
                dim.confidence,
                dim.resolved.as_deref(),
            ) {
                Ok(name) => self.add_dimension(&name, &dim.name, &mut out),
                Err(conflict) => out.conflict(conflict),
            }
        }

        let mut filters: Vec<(usize, MappedFilter)> = Vec::new();
        for (i, filter) in raw.filters.iter().enumerate() {
            if let Some(mapped) = self.map_filter(filter, &mut out) {
                filters.push((i, mapped));
            }
        }
        self.check_conflicting(raw, &filters, &mut out);

        let sort = match &raw.sort_by {
            Some(raw_sort) => self.map_sort(&raw_sort.field, raw_sort.direction, &mut out),
            None => first_requested.map(|name| MappedSort {
                term: name.clone(),
                target: SortTarget::Metric(name),
                direction: SortDirection::Desc,
            }),
        };

        let has_metric = out.metrics.iter().any(|m| !m.is_part_of_calculation);
        let implies_aggregation = !raw.dimensions.is_empty()
            || raw.sort_by.is_some()
            || raw.limit.is_some()
            || !raw.comparisons.is_empty();
        if raw.metrics.is_empty() && !has_metric && implies_aggregation {
            let suggestions = self
                .dictionary
                .metrics()
                .iter()
                .take(self.settings.max_suggestions)
                .map(|m| m.name.clone())
                .collect();
            out.conflict(
                EntityConflict::new(
                    ConflictType::MissingRequired,
                    EntityKind::Metric,
                    "",
                    "No metric was specified in the query",
                )
                .with_suggestions(suggestions),
            );
        }

        let time_range = match &raw.time_range {
            Some(range) => {
                let (resolved, warning) = ResolvedTimeRange::resolve(range, self.today);
                out.warnings.extend(warning);
                Some(resolved)
            }
            None if !raw.comparisons.is_empty() => {
                out.warnings.push(format!(
                    "Comparisons need a time range; using {}",
                    DEFAULT_PERIOD
                ));
                ResolvedTimeRange::parse_relative(DEFAULT_PERIOD, self.today)
            }
            None => None,
        };

        let mut comparisons = raw.comparisons.clone();
        comparisons.sort();
        comparisons.dedup();

        let Collected {
            mut metrics,
            mut dimensions,
            conflicts,
            warnings,
        } = out;

        metrics.sort_by(|a, b| a.name.cmp(&b.name));
        dimensions.sort_by(|a, b| a.name.cmp(&b.name));
        let mut filters: Vec<MappedFilter> = filters.into_iter().map(|(_, f)| f).collect();
        filters.sort_by_cached_key(|f| {
            let values: Vec<String> = f.values.iter().map(|v| v.to_string()).collect();
            (f.target_key(), f.operator, f.negated, values)
        });

        debug!(
            metrics = metrics.len(),
            dimensions = dimensions.len(),
            filters = filters.len(),
            conflicts = conflicts.len(),
            "Mapped query entities"
        );

        MappingOutcome {
            mapped: MappedQueryEntities {
                metrics,
                dimensions,
                filters,
                sort,
                limit: raw.limit,
                time_range,
                comparisons,
            },
            conflicts,
            warnings,
        }
    }

    // ------------------------------------------------------------------
    // Term resolution
    // ------------------------------------------------------------------

    fn exact_name(&self, kind: EntityKind, name: &str) -> Option<String> {
        match kind {
            EntityKind::Metric => self.dictionary.metric(name).map(|m| m.name.clone()),
            EntityKind::Dimension => self.dictionary.dimension(name).map(|d| d.name.clone()),
            _ => None,
        }
    }

    /// Resolve a term of one dictionary kind, or explain why not.
    fn resolve(
        &self,
        kind: EntityKind,
        conflict_kind: EntityKind,
        term: &str,
        confidence: f64,
        pinned: Option<&str>,
    ) -> Result<String, EntityConflict> {
        if let Some(pinned) = pinned {
            if let Some(name) = self.exact_name(kind, pinned) {
                return Ok(name);
            }
            return self
                .resolve(kind, conflict_kind, pinned, 1.0, None)
                .map_err(|c| answered_with(c, term, pinned));
        }
        let candidates = self.dictionary.lookup(kind, term, self.settings);
        if candidates.is_empty() {
            return Err(self.unknown(kind, conflict_kind, term));
        }
        self.choose(&candidates, conflict_kind, term, confidence)
    }

    /// Resolve a filter or sort term, which may name a dimension or a metric.
    fn resolve_field(
        &self,
        conflict_kind: EntityKind,
        prefer: EntityKind,
        term: &str,
        confidence: f64,
        pinned: Option<&str>,
    ) -> Result<(EntityKind, String), EntityConflict> {
        let other = match prefer {
            EntityKind::Metric => EntityKind::Dimension,
            _ => EntityKind::Metric,
        };
        if let Some(pinned) = pinned {
            for kind in [prefer, other] {
                if let Some(name) = self.exact_name(kind, pinned) {
                    return Ok((kind, name));
                }
            }
            return self
                .resolve_field(conflict_kind, prefer, pinned, 1.0, None)
                .map_err(|c| answered_with(c, term, pinned));
        }

        let preferred = self.dictionary.lookup(prefer, term, self.settings);
        let alternative = self.dictionary.lookup(other, term, self.settings);
        let top = |c: &[Candidate]| c.first().map_or(0.0, |c| c.score);

        let (kind, candidates) = match (preferred.is_empty(), alternative.is_empty()) {
            (true, true) => return Err(self.unknown(prefer, conflict_kind, term)),
            (false, _) if top(&preferred) >= top(&alternative) => (prefer, preferred),
            _ => (other, alternative),
        };
        self.choose(&candidates, conflict_kind, term, confidence)
            .map(|name| (kind, name))
    }

    fn choose(
        &self,
        candidates: &[Candidate],
        conflict_kind: EntityKind,
        term: &str,
        confidence: f64,
    ) -> Result<String, EntityConflict> {
        let top = &candidates[0];
        let tied = candidates
            .get(1)
            .is_some_and(|next| (top.score - next.score).abs() < SCORE_EPSILON);
        let scored = top.score * confidence;

        if tied || scored < self.settings.confidence_threshold {
            let suggestions: Vec<String> = candidates
                .iter()
                .take(self.settings.max_suggestions)
                .map(|c| c.name.clone())
                .collect();
            let message = if tied {
                format!("'{}' matches several {}s equally well", term, top.kind)
            } else {
                format!(
                    "'{}' is not a confident match for {} (confidence {:.2})",
                    term, top.name, scored
                )
            };
            return Err(
                EntityConflict::new(ConflictType::Ambiguous, conflict_kind, term, message)
                    .with_suggestions(suggestions),
            );
        }
        Ok(top.name.clone())
    }

    fn unknown(&self, kind: EntityKind, conflict_kind: EntityKind, term: &str) -> EntityConflict {
        EntityConflict::new(
            ConflictType::Unknown,
            conflict_kind,
            term,
            format!("'{}' is not a known {}", term, kind),
        )
        .with_suggestions(
            self.dictionary
                .closest(kind, term, self.settings.max_suggestions),
        )
    }

    // ------------------------------------------------------------------
    // Building mapped entities
    // ------------------------------------------------------------------

    /// Add a metric (and, for calculated metrics, its constituents).
    fn add_metric(
        &self,
        name: &str,
        term: &str,
        aggregation: Option<Aggregation>,
        part_of_calculation: bool,
        out: &mut Collected,
    ) {
        let Some(def) = self.dictionary.metric(name) else {
            out.conflict(self.unknown(EntityKind::Metric, EntityKind::Metric, name));
            return;
        };

        if let Some(existing) = out.metrics.iter_mut().find(|m| m.name == def.name) {
            if !part_of_calculation {
                if existing.is_part_of_calculation {
                    existing.term = term.to_string();
                }
                existing.is_part_of_calculation = false;
                if let Some(agg) = aggregation {
                    existing.aggregation = agg;
                }
            }
            return;
        }

        let field = match &def.field {
            Some(field) => match self.schema.canonical_field(field) {
                Some(canonical) => Some(canonical),
                None => {
                    out.conflict(EntityConflict::new(
                        ConflictType::Unknown,
                        EntityKind::Metric,
                        term,
                        format!(
                            "Metric '{}' uses {}, which is not in the schema",
                            def.name, field
                        ),
                    ));
                    return;
                }
            },
            None => None,
        };

        let formula = self.dictionary.formula(&def.name).cloned();
        out.metrics.push(MappedMetric {
            term: term.to_string(),
            name: def.name.clone(),
            field,
            aggregation: aggregation.unwrap_or(def.aggregation),
            data_type: def.data_type,
            formula: formula.clone(),
            is_part_of_calculation: part_of_calculation,
        });

        if let Some(formula) = formula {
            for reference in formula.references() {
                if self.dictionary.metric(reference).is_some() {
                    self.add_metric(reference, reference, None, true, out);
                } else {
                    out.conflict(EntityConflict::new(
                        ConflictType::Unknown,
                        EntityKind::Metric,
                        reference,
                        format!(
                            "Formula for '{}' references unknown metric '{}'",
                            def.name, reference
                        ),
                    ));
                }
            }
        }
    }

    fn add_dimension(&self, name: &str, term: &str, out: &mut Collected) {
        let Some(def) = self.dictionary.dimension(name) else {
            out.conflict(self.unknown(EntityKind::Dimension, EntityKind::Dimension, name));
            return;
        };
        if out.dimensions.iter().any(|d| d.name == def.name) {
            return;
        }
        match self.schema.canonical_field(&def.field) {
            Some(field) => out.dimensions.push(MappedDimension {
                term: term.to_string(),
                name: def.name.clone(),
                field,
                grain: def.grain,
                is_date: def.is_date,
            }),
            None => out.conflict(EntityConflict::new(
                ConflictType::Unknown,
                EntityKind::Dimension,
                term,
                format!(
                    "Dimension '{}' uses {}, which is not in the schema",
                    def.name, def.field
                ),
            )),
        }
    }

    fn map_filter(&self, raw: &RawFilter, out: &mut Collected) -> Option<MappedFilter> {
        let (kind, name) = match self.resolve_field(
            EntityKind::Filter,
            EntityKind::Dimension,
            &raw.field,
            raw.confidence,
            raw.resolved.as_deref(),
        ) {
            Ok(resolved) => resolved,
            Err(conflict) => {
                out.conflict(conflict);
                return None;
            }
        };

        let operator = effective_operator(raw).unwrap_or_else(|| {
            out.warnings.push(format!(
                "Operator '{}' on '{}' not understood; using equals",
                raw.operator, raw.field
            ));
            FilterOperator::Equals
        });

        let (target, data_type) = match kind {
            EntityKind::Metric => {
                self.add_metric(&name, &raw.field, None, true, out);
                let metric = out.metrics.iter().find(|m| m.name == name)?.clone();
                let data_type = metric.data_type;
                (FilterTarget::Metric(Box::new(metric)), data_type)
            }
            _ => {
                let def = self.dictionary.dimension(&name)?;
                let Some(field) = self.schema.canonical_field(&def.field) else {
                    out.conflict(EntityConflict::new(
                        ConflictType::Unknown,
                        EntityKind::Filter,
                        &raw.field,
                        format!("Dimension '{}' uses {}, which is not in the schema", name, def.field),
                    ));
                    return None;
                };
                let data_type = self
                    .schema
                    .column(&field)
                    .map_or(DataType::Unknown, |c| c.data_type);
                (FilterTarget::Column(field), data_type)
            }
        };

        let literals = raw.value.values();
        let (min, max) = operator.arity();
        if literals.len() < min || max.is_some_and(|max| literals.len() > max) {
            out.conflict(
                EntityConflict::new(
                    ConflictType::InvalidValue,
                    EntityKind::Filter,
                    &raw.field,
                    format!(
                        "'{}' on '{}' expects {} value(s), got {}",
                        operator,
                        raw.field,
                        match max {
                            Some(max) if max == min => min.to_string(),
                            Some(max) => format!("{}-{}", min, max),
                            None => format!("at least {}", min),
                        },
                        literals.len()
                    ),
                )
                .with_value(&raw.value.to_string()),
            );
            return None;
        }

        let coerce_as = if operator.is_pattern() {
            DataType::String
        } else {
            data_type
        };
        let mut values = Vec::with_capacity(literals.len());
        let mut failed = false;
        for literal in literals {
            match ParamValue::coerce(literal, coerce_as) {
                Ok(v) => values.push(v),
                Err(reason) => {
                    failed = true;
                    out.conflict(
                        EntityConflict::new(
                            ConflictType::InvalidValue,
                            EntityKind::Filter,
                            &raw.field,
                            format!("Invalid value for '{}': {}", raw.field, reason),
                        )
                        .with_value(literal),
                    );
                }
            }
        }
        if failed {
            return None;
        }

        Some(MappedFilter {
            term: raw.field.clone(),
            target,
            data_type,
            operator,
            values,
            negated: raw.negated,
        })
    }

    /// Flag filter groups on one target that cannot all hold.
    fn check_conflicting(
        &self,
        raw: &QueryEntities,
        filters: &[(usize, MappedFilter)],
        out: &mut Collected,
    ) {
        let mut groups: BTreeMap<String, Vec<&(usize, MappedFilter)>> = BTreeMap::new();
        for entry in filters {
            groups.entry(entry.1.target_key()).or_default().push(entry);
        }

        for group in groups.values().filter(|g| g.len() > 1) {
            let clash = group.iter().enumerate().any(|(i, a)| {
                group[i + 1..].iter().any(|b| incompatible(&a.1, &b.1))
            });
            if !clash {
                continue;
            }

            let mut options: Vec<String> = Vec::new();
            for (raw_index, _) in group.iter().map(|e| (e.0, &e.1)) {
                let description = describe_filter(&raw.filters[raw_index]);
                if !options.contains(&description) {
                    options.push(description);
                }
            }
            let all_equals = group
                .iter()
                .all(|(_, f)| f.operator == FilterOperator::Equals && !f.negated);
            let message = format!(
                "Filters on '{}' cannot all hold: {}",
                group[0].1.term,
                options.join(" and ")
            );
            if all_equals {
                options.push("all".to_string());
            }
            out.conflict(
                EntityConflict::new(
                    ConflictType::Conflicting,
                    EntityKind::Filter,
                    &group[0].1.term,
                    message,
                )
                .with_suggestions(options),
            );
        }
    }

    fn map_sort(&self, term: &str, direction: SortDirection, out: &mut Collected) -> Option<MappedSort> {
        let (kind, name) =
            match self.resolve_field(EntityKind::Sort, EntityKind::Metric, term, 1.0, None) {
                Ok(resolved) => resolved,
                Err(conflict) => {
                    out.conflict(conflict);
                    return None;
                }
            };
        let target = match kind {
            EntityKind::Metric => {
                self.add_metric(&name, term, None, false, out);
                SortTarget::Metric(name)
            }
            _ => {
                self.add_dimension(&name, term, out);
                SortTarget::Dimension(name)
            }
        };
        Some(MappedSort {
            term: term.to_string(),
            target,
            direction,
        })
    }
}

/// Keep a failed answer's conflict on the term the caller asked about.
fn answered_with(conflict: EntityConflict, term: &str, answer: &str) -> EntityConflict {
    let message = format!("Answer '{}' for '{}': {}", answer, term, conflict.message);
    let mut conflict = conflict.for_term(term);
    conflict.message = message;
    conflict
}

/// Operator after applying negation.
fn normalized(filter: &MappedFilter) -> FilterOperator {
    if !filter.negated {
        return filter.operator;
    }
    match filter.operator {
        FilterOperator::Equals => FilterOperator::NotEquals,
        FilterOperator::NotEquals => FilterOperator::Equals,
        FilterOperator::In => FilterOperator::NotIn,
        FilterOperator::NotIn => FilterOperator::In,
        FilterOperator::IsNull => FilterOperator::IsNotNull,
        FilterOperator::IsNotNull => FilterOperator::IsNull,
        other => other,
    }
}

fn incompatible(a: &MappedFilter, b: &MappedFilter) -> bool {
    use FilterOperator::*;
    match (normalized(a), normalized(b)) {
        (Equals, Equals) => a.values != b.values,
        (Equals, NotEquals) | (NotEquals, Equals) => a.values == b.values,
        (IsNull, IsNotNull) | (IsNotNull, IsNull) => true,
        _ => false,
    }
}
