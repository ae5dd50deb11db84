//! Error taxonomy for the translation pipeline.
//!
//! Mapping conflicts are deliberately absent: they are data carried in
//! [`QueryEntities::conflicts`](crate::entities::QueryEntities) and surface as
//! `needs_clarification` responses. Everything here aborts the request.

use thiserror::Error;

/// Result type for pipeline operations.
pub type TranslateResult<T> = Result<T, TranslateError>;

/// Structural failures of the pipeline.
///
/// `Clone` so a single failed computation can be handed to every caller
/// waiting on it in the translation cache.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TranslateError {
    /// Required tables cannot be connected through known relationships.
    #[error("No relationship path from '{from}' to '{to}'")]
    NoJoinPath { from: String, to: String },

    /// Nothing to select: no metrics and no dimensions survived mapping.
    #[error("Query has nothing to select: no metrics or dimensions were mapped")]
    EmptyProjection,

    /// A filter value cannot be bound for its operator or column type.
    #[error("Invalid value '{value}' for '{field}': {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    /// Clarification answers were sent for a snapshot taken against a
    /// different dictionary or schema.
    #[error("Clarification context is stale (expected {expected}, current {actual})")]
    StaleClarificationContext { expected: String, actual: String },

    /// The schema provider could not load or refresh the model.
    #[error("Schema unavailable: {0}")]
    SchemaUnavailable(String),

    /// A translation computed under the cache failed.
    #[error("Translation failed: {0}")]
    CacheComputeFailed(Box<TranslateError>),

    /// The caller cancelled the request.
    #[error("Translation cancelled")]
    Cancelled,

    /// The upstream extractor failed.
    #[error("Entity extraction failed: {0}")]
    Extraction(String),
}

impl TranslateError {
    /// Stable machine-readable failure kind.
    pub fn kind(&self) -> &'static str {
        match self {
            TranslateError::NoJoinPath { .. } => "no_join_path",
            TranslateError::EmptyProjection => "empty_projection",
            TranslateError::InvalidValue { .. } => "invalid_value",
            TranslateError::StaleClarificationContext { .. } => "stale_clarification_context",
            TranslateError::SchemaUnavailable(_) => "schema_unavailable",
            TranslateError::CacheComputeFailed(_) => "cache_compute_failed",
            TranslateError::Cancelled => "cancelled",
            TranslateError::Extraction(_) => "extraction_failed",
        }
    }

    /// The failure underneath any cache wrapping.
    pub fn root_cause(&self) -> &TranslateError {
        match self {
            TranslateError::CacheComputeFailed(inner) => inner.root_cause(),
            other => other,
        }
    }

    /// Deterministic given the same schema and entities; never retried.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            TranslateError::NoJoinPath { .. }
                | TranslateError::EmptyProjection
                | TranslateError::InvalidValue { .. }
                | TranslateError::SchemaUnavailable(_)
        )
    }

    /// The error as reported to the caller: structural failures come out of
    /// the cache wrapping so their kind is visible.
    pub fn surfaced(self) -> TranslateError {
        match self {
            TranslateError::CacheComputeFailed(inner) if inner.root_cause().is_structural() => {
                (*inner).surfaced()
            }
            other => other,
        }
    }
}
