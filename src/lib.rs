//! # nlq
//!
//! A semantic layer that turns natural-language analytics questions into
//! validated, parameterized SQL.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │               Extractor (free text → raw terms)          │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [mapping]
//! ┌─────────────────────────────────────────────────────────┐
//! │   EntityMapper + EntityDictionary (terms → fields)       │
//! │   conflicts ──► ClarificationCoordinator ──► prompts     │
//! └─────────────────────────────────────────────────────────┘
//!                          │ conflict-free
//!                          ▼ [cache]
//! ┌─────────────────────────────────────────────────────────┐
//! │        TranslationCache (singleflight, tiered TTL)       │
//! └─────────────────────────────────────────────────────────┘
//!                          │ miss
//!                          ▼ [translation]
//! ┌─────────────────────────────────────────────────────────┐
//! │   SqlTranslator (join planning over the SchemaModel)     │
//! │   Optimizer (materialized views, index hints)            │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │        SQL + bound parameters + plan explanation         │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! [`service::SemanticLayerService`] wires the stages together. Generated
//! SQL is never executed.

pub mod cache;
pub mod clarification;
pub mod config;
pub mod dictionary;
pub mod entities;
pub mod error;
pub mod extract;
pub mod gaming;
pub mod mapping;
pub mod optimizer;
pub mod schema;
pub mod service;
pub mod sql;
pub mod translation;

pub use error::{TranslateError, TranslateResult};

/// Re-exports for convenient usage.
pub mod prelude {
    pub use crate::cache::{Clock, ManualClock, SystemClock, TranslationCache};
    pub use crate::clarification::{ClarificationCoordinator, ClarificationPrompt};
    pub use crate::config::Settings;
    pub use crate::dictionary::{
        Aggregation, DimensionDefinition, EntityDictionary, MetricDefinition,
    };
    pub use crate::entities::{
        EntityConflict, EntityKind, FilterValue, MappedQueryEntities, QueryEntities, RawFilter,
    };
    pub use crate::error::{TranslateError, TranslateResult};
    pub use crate::extract::PatternExtractor;
    pub use crate::mapping::EntityMapper;
    pub use crate::optimizer::Optimizer;
    pub use crate::schema::{SchemaModel, SchemaProvider, StaticSchemaProvider};
    pub use crate::service::{Extractor, SemanticLayerService, TranslationResponse};
    pub use crate::sql::Dialect;
    pub use crate::translation::{SqlTranslationResult, SqlTranslator};
}
