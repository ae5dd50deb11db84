//! Mapping conflicts.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::dictionary::normalize_term;

use super::EntityKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    /// Several candidates, or the best one is below the confidence threshold.
    Ambiguous,
    /// The query needs an entity that was never mentioned.
    MissingRequired,
    /// No dictionary entry matches.
    Unknown,
    /// Two filters on the same field cannot both hold.
    Conflicting,
    /// A filter literal does not fit the column type.
    InvalidValue,
}

impl ConflictType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictType::Ambiguous => "ambiguous",
            ConflictType::MissingRequired => "missing_required",
            ConflictType::Unknown => "unknown",
            ConflictType::Conflicting => "conflicting",
            ConflictType::InvalidValue => "invalid_value",
        }
    }
}

impl fmt::Display for ConflictType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Content-derived conflict id, stable across clarification rounds.
///
/// `ambiguous|metric|rev`, `invalid_value|filter|stake amount|lots`
pub fn conflict_id(
    conflict_type: ConflictType,
    kind: EntityKind,
    term: &str,
    value: Option<&str>,
) -> String {
    let mut id = format!("{}|{}|{}", conflict_type, kind, normalize_term(term));
    if let Some(v) = value {
        id.push('|');
        id.push_str(v.trim());
    }
    id
}

/// A flagged gap that blocks translation until the caller answers it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityConflict {
    #[serde(default)]
    pub id: String,
    pub conflict_type: ConflictType,
    pub entity_type: EntityKind,
    pub original_term: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub suggestions: Vec<String>,
    /// Rejected literal for `InvalidValue`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Raised by the extractor rather than the mapper.
    #[serde(default)]
    pub upstream: bool,
}

impl EntityConflict {
    pub fn new(
        conflict_type: ConflictType,
        entity_type: EntityKind,
        original_term: &str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: conflict_id(conflict_type, entity_type, original_term, None),
            conflict_type,
            entity_type,
            original_term: original_term.to_string(),
            message: message.into(),
            suggestions: Vec::new(),
            value: None,
            upstream: false,
        }
    }

    pub fn with_suggestions(mut self, suggestions: Vec<String>) -> Self {
        self.suggestions = suggestions;
        self
    }

    pub fn with_value(mut self, value: &str) -> Self {
        self.id = conflict_id(
            self.conflict_type,
            self.entity_type,
            &self.original_term,
            Some(value),
        );
        self.value = Some(value.to_string());
        self
    }

    /// Attach the conflict to `term`, recomputing the id.
    pub fn for_term(mut self, term: &str) -> Self {
        self.original_term = term.to_string();
        self.id = conflict_id(
            self.conflict_type,
            self.entity_type,
            term,
            self.value.as_deref(),
        );
        self
    }

    /// Fill in a missing id (extractor conflicts usually arrive without one).
    pub fn ensure_id(&mut self) {
        if self.id.is_empty() {
            self.id = conflict_id(
                self.conflict_type,
                self.entity_type,
                &self.original_term,
                self.value.as_deref(),
            );
        }
    }
}
