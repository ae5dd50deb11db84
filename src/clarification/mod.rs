//! Clarification coordinator.
//!
//! A resumable state machine over caller-held snapshots:
//!
//! ```text
//! Mapped ──(no conflicts)──────────────────────────────▶ Resolved
//!    │                                                     ▲
//!    └─(conflicts)─▶ NeedsClarification ─(answers)─▶ Clarified
//!                          ▲                            │
//!                          └──────(new conflicts)───────┘
//! ```
//!
//! No session state is kept. Every round returns the raw entities with the
//! open conflicts and a snapshot stamp; the caller sends that back with its
//! answers, so any worker can serve the next round. The stamp is derived
//! from the dictionary and schema fingerprints, and answers to a snapshot
//! taken against other versions are rejected.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::MappingSettings;
use crate::dictionary::{normalize_term, EntityDictionary};
use crate::entities::{
    ConflictType, EntityConflict, EntityKind, FilterValue, QueryEntities, RawDimension,
    RawFilter, RawMetric, TimeRange,
};
use crate::error::{TranslateError, TranslateResult};
use crate::mapping::{describe_filter, EntityMapper, MappingOutcome};
use crate::schema::SchemaModel;

/// Option that merges conflicting equality filters into one `in` filter.
pub const MERGE_ALL: &str = "all";

/// Where a request stands in the clarification protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClarificationState {
    Mapped,
    NeedsClarification,
    Clarified,
    Resolved,
    Failed,
}

impl ClarificationState {
    /// Transition after (re)mapping.
    pub fn advance(self, has_conflicts: bool) -> Self {
        match self {
            ClarificationState::Mapped | ClarificationState::Clarified => {
                if has_conflicts {
                    ClarificationState::NeedsClarification
                } else {
                    ClarificationState::Resolved
                }
            }
            other => other,
        }
    }

    /// Transition when answers arrive.
    pub fn answer(self) -> Self {
        match self {
            ClarificationState::NeedsClarification | ClarificationState::Mapped => {
                ClarificationState::Clarified
            }
            other => other,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ClarificationState::Resolved | ClarificationState::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptKind {
    /// Pick one of `options`.
    Selection,
    /// Type a value; `options` are hints.
    FreeText,
    /// Confirm one of the listed conditions.
    Confirmation,
}

/// A question for the user, answered by `conflict_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClarificationPrompt {
    pub kind: PromptKind,
    pub question: String,
    pub options: Vec<String>,
    pub conflict_id: String,
}

impl fmt::Display for ClarificationPrompt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.question)?;
        if !self.options.is_empty() {
            write!(f, " [{}]", self.options.join(" | "))?;
        }
        Ok(())
    }
}

fn noun(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Metric => "metric",
        EntityKind::Dimension => "dimension",
        EntityKind::Filter | EntityKind::Sort => "field",
        EntityKind::TimeRange => "time period",
    }
}

/// Build the prompt for one conflict.
pub fn prompt_for(conflict: &EntityConflict) -> ClarificationPrompt {
    let term = &conflict.original_term;
    let kind_noun = noun(conflict.entity_type);
    let (kind, question) = match conflict.conflict_type {
        ConflictType::Ambiguous => (
            PromptKind::Selection,
            format!(
                "Did you mean one of these {}s when you specified '{}'?",
                kind_noun, term
            ),
        ),
        ConflictType::Unknown => (
            PromptKind::FreeText,
            format!(
                "The {} '{}' is not recognized. Which {} did you mean?",
                kind_noun, term, kind_noun
            ),
        ),
        ConflictType::MissingRequired => (
            PromptKind::Selection,
            format!("Which {} would you like to see?", kind_noun),
        ),
        ConflictType::InvalidValue => (
            PromptKind::FreeText,
            format!(
                "The value '{}' is not valid for '{}'. Please enter a valid value:",
                conflict.value.as_deref().unwrap_or_default(),
                term
            ),
        ),
        ConflictType::Conflicting => (
            PromptKind::Confirmation,
            format!("{}. Which condition should apply?", conflict.message),
        ),
    };
    ClarificationPrompt {
        kind,
        question,
        options: conflict.suggestions.clone(),
        conflict_id: conflict.id.clone(),
    }
}

pub fn prompts_for(conflicts: &[EntityConflict]) -> Vec<ClarificationPrompt> {
    conflicts.iter().map(prompt_for).collect()
}

/// Stamp identifying the dictionary and schema versions a snapshot was
/// taken against.
pub fn snapshot_stamp(dictionary_fingerprint: &str, schema_fingerprint: &str) -> String {
    let short = |fp: &str| fp.get(..16).unwrap_or(fp).to_string();
    format!("{}/{}", short(dictionary_fingerprint), short(schema_fingerprint))
}

/// Result of one clarification round.
#[derive(Debug, Clone)]
pub struct ClarificationRound {
    pub state: ClarificationState,
    /// Raw entities with open conflicts and the snapshot stamp; send back
    /// with the next answers.
    pub entities: QueryEntities,
    pub outcome: MappingOutcome,
    pub prompts: Vec<ClarificationPrompt>,
    pub warnings: Vec<String>,
}

impl ClarificationRound {
    pub fn needs_clarification(&self) -> bool {
        self.state == ClarificationState::NeedsClarification
    }
}

pub struct ClarificationCoordinator<'a> {
    dictionary: &'a EntityDictionary,
    schema: &'a SchemaModel,
    mapper: EntityMapper<'a>,
}

impl<'a> ClarificationCoordinator<'a> {
    pub fn new(
        dictionary: &'a EntityDictionary,
        schema: &'a SchemaModel,
        settings: &'a MappingSettings,
        today: NaiveDate,
    ) -> Self {
        Self {
            dictionary,
            schema,
            mapper: EntityMapper::new(dictionary, schema, settings, today),
        }
    }

    pub fn stamp(&self) -> String {
        snapshot_stamp(self.dictionary.fingerprint(), self.schema.fingerprint())
    }

    /// First round: map freshly extracted entities.
    pub fn begin(&self, raw: QueryEntities) -> ClarificationRound {
        self.finish(raw, ClarificationState::Mapped, Vec::new())
    }

    /// Apply answers keyed by conflict id to a snapshot from an earlier round.
    pub fn apply(
        &self,
        original: &QueryEntities,
        responses: &BTreeMap<String, String>,
    ) -> TranslateResult<ClarificationRound> {
        let current = self.stamp();
        if let Some(expected) = &original.snapshot {
            if *expected != current {
                warn!(expected = %expected, actual = %current, "Stale clarification snapshot");
                return Err(TranslateError::StaleClarificationContext {
                    expected: expected.clone(),
                    actual: current,
                });
            }
        }

        let mut working = original.clone();
        let mut warnings = Vec::new();
        let mut answered: BTreeSet<String> = BTreeSet::new();

        for (id, answer) in responses {
            let Some(conflict) = original.conflicts.iter().find(|c| &c.id == id) else {
                warnings.push(format!("No open conflict with id '{}'; response ignored", id));
                continue;
            };
            match self.apply_response(&mut working, conflict, answer) {
                Ok(()) => {
                    answered.insert(id.clone());
                }
                Err(reason) => warnings.push(format!("Response to '{}' not applied: {}", id, reason)),
            }
        }

        // mapper conflicts are recomputed; upstream ones stay until answered
        working
            .conflicts
            .retain(|c| c.upstream && !answered.contains(&c.id));

        debug!(answered = answered.len(), "Applied clarification responses");

        let mut round = self.finish(working, ClarificationState::Clarified, warnings);
        for conflict in &round.outcome.conflicts {
            if answered.contains(&conflict.id) {
                round.warnings.push(format!(
                    "Conflict '{}' is still unresolved after the response",
                    conflict.id
                ));
            }
        }
        Ok(round)
    }

    fn finish(
        &self,
        mut entities: QueryEntities,
        state: ClarificationState,
        mut warnings: Vec<String>,
    ) -> ClarificationRound {
        let outcome = self.mapper.map(&entities);
        warnings.extend(outcome.warnings.iter().cloned());
        let state = state.advance(!outcome.conflicts.is_empty());

        entities.conflicts = outcome.conflicts.clone();
        entities.snapshot = Some(self.stamp());

        ClarificationRound {
            state,
            prompts: prompts_for(&outcome.conflicts),
            entities,
            outcome,
            warnings,
        }
    }

    fn apply_response(
        &self,
        working: &mut QueryEntities,
        conflict: &EntityConflict,
        answer: &str,
    ) -> Result<(), String> {
        let answer = answer.trim();
        if answer.is_empty() {
            return Err("empty response".into());
        }
        let term = normalize_term(&conflict.original_term);
        let matches = |s: &str| normalize_term(s) == term;

        match conflict.conflict_type {
            ConflictType::Ambiguous | ConflictType::Unknown => {
                pin(working, conflict, answer, &matches)
            }
            ConflictType::MissingRequired => {
                match conflict.entity_type {
                    EntityKind::Dimension => {
                        let mut dim = RawDimension::new(answer, 1.0);
                        dim.resolved = Some(answer.to_string());
                        working.dimensions.push(dim);
                    }
                    _ => {
                        let mut metric = RawMetric::new(answer, 1.0);
                        metric.resolved = Some(answer.to_string());
                        working.metrics.push(metric);
                    }
                }
                Ok(())
            }
            ConflictType::InvalidValue => {
                let rejected = conflict.value.as_deref().unwrap_or_default();
                let mut applied = false;
                for filter in working.filters.iter_mut().filter(|f| matches(&f.field)) {
                    let literals: Vec<String> =
                        filter.value.values().into_iter().map(String::from).collect();
                    let replaced: Vec<String> = if literals.iter().any(|l| l == rejected) {
                        literals
                            .into_iter()
                            .map(|l| if l == rejected { answer.to_string() } else { l })
                            .collect()
                    } else if filter.value.to_string() == rejected {
                        split_list(answer)
                    } else {
                        continue;
                    };
                    filter.value = to_filter_value(replaced);
                    applied = true;
                }
                if applied {
                    Ok(())
                } else {
                    Err(format!("no filter on '{}' has the value '{}'", conflict.original_term, rejected))
                }
            }
            ConflictType::Conflicting => resolve_conflicting(working, conflict, answer),
        }
    }
}

/// Pin the chosen dictionary entry on every raw entity using the term.
fn pin(
    working: &mut QueryEntities,
    conflict: &EntityConflict,
    answer: &str,
    matches: &dyn Fn(&str) -> bool,
) -> Result<(), String> {
    let chosen = Some(answer.to_string());
    let mut applied = false;

    match conflict.entity_type {
        EntityKind::Metric => {
            for m in working.metrics.iter_mut().filter(|m| matches(&m.name)) {
                m.resolved = chosen.clone();
                applied = true;
            }
            if !applied && conflict.upstream {
                let mut metric = RawMetric::new(&conflict.original_term, 1.0);
                metric.resolved = chosen.clone();
                working.metrics.push(metric);
                applied = true;
            }
        }
        EntityKind::Dimension => {
            for d in working.dimensions.iter_mut().filter(|d| matches(&d.name)) {
                d.resolved = chosen.clone();
                applied = true;
            }
            if !applied && conflict.upstream {
                let mut dim = RawDimension::new(&conflict.original_term, 1.0);
                dim.resolved = chosen.clone();
                working.dimensions.push(dim);
                applied = true;
            }
            // the same term used elsewhere means the same thing
            for f in working.filters.iter_mut().filter(|f| matches(&f.field)) {
                f.resolved = chosen.clone();
            }
            if let Some(sort) = working.sort_by.as_mut().filter(|s| matches(&s.field)) {
                sort.field = answer.to_string();
            }
        }
        EntityKind::Filter => {
            for f in working.filters.iter_mut().filter(|f| matches(&f.field)) {
                f.resolved = chosen.clone();
                applied = true;
            }
        }
        EntityKind::Sort => {
            if let Some(sort) = working.sort_by.as_mut().filter(|s| matches(&s.field)) {
                sort.field = answer.to_string();
                applied = true;
            }
        }
        EntityKind::TimeRange => {
            working.time_range = Some(TimeRange::relative(answer));
            applied = true;
        }
    }

    if applied {
        Ok(())
    } else {
        Err(format!("no {} uses the term '{}'", conflict.entity_type, conflict.original_term))
    }
}

fn resolve_conflicting(
    working: &mut QueryEntities,
    conflict: &EntityConflict,
    answer: &str,
) -> Result<(), String> {
    let involved: Vec<usize> = working
        .filters
        .iter()
        .enumerate()
        .filter(|(_, f)| conflict.suggestions.contains(&describe_filter(f)))
        .map(|(i, _)| i)
        .collect();
    let Some(&first) = involved.first() else {
        return Err("the conflicting filters are no longer present".into());
    };

    let keep: Vec<usize> = if answer.eq_ignore_ascii_case(MERGE_ALL) {
        let mut values: Vec<String> = Vec::new();
        for &i in &involved {
            for v in working.filters[i].value.values() {
                if !values.iter().any(|x| x == v) {
                    values.push(v.to_string());
                }
            }
        }
        let base = &working.filters[first];
        let merged = RawFilter {
            operator: "in".into(),
            value: FilterValue::Many(values),
            negated: false,
            ..base.clone()
        };
        working.filters[first] = merged;
        vec![first]
    } else {
        let by_option: Vec<usize> = involved
            .iter()
            .copied()
            .filter(|&i| describe_filter(&working.filters[i]).eq_ignore_ascii_case(answer))
            .collect();
        let by_value: Vec<usize> = involved
            .iter()
            .copied()
            .filter(|&i| {
                working.filters[i]
                    .value
                    .values()
                    .iter()
                    .any(|v| v.eq_ignore_ascii_case(answer))
            })
            .take(1)
            .collect();
        if !by_option.is_empty() {
            by_option
        } else if !by_value.is_empty() {
            by_value
        } else {
            let base = working.filters[first].clone();
            working.filters[first] = RawFilter {
                operator: "equals".into(),
                value: FilterValue::One(answer.to_string()),
                negated: false,
                ..base
            };
            vec![first]
        }
    };

    let mut index = 0;
    working.filters.retain(|_| {
        let i = index;
        index += 1;
        !involved.contains(&i) || keep.contains(&i)
    });
    Ok(())
}

fn split_list(answer: &str) -> Vec<String> {
    answer
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn to_filter_value(mut values: Vec<String>) -> FilterValue {
    match values.len() {
        0 => FilterValue::None,
        1 => FilterValue::One(values.remove(0)),
        _ => FilterValue::Many(values),
    }
}
