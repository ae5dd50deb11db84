//! Semantic layer service.
//!
//! Composes the pipeline behind two request/response calls:
//!
//! ```text
//! text ──► Extractor ──► EntityMapper ──► conflicts? ──► prompts (suspend)
//!                                            │
//!                                            ▼ none
//!                       TranslationCache::get_or_compute
//!                                            │ miss
//!                                            ▼
//!                              SqlTranslator ──► Optimizer
//! ```
//!
//! The service keeps no per-request state. A clarification round is resumed
//! from the `entities` snapshot carried in the previous response, so any
//! instance sharing the same schema and dictionary can serve it.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::cache::{CacheStats, Clock, TranslationCache};
use crate::clarification::{
    ClarificationCoordinator, ClarificationPrompt, ClarificationRound, ClarificationState,
};
use crate::config::Settings;
use crate::dictionary::EntityDictionary;
use crate::entities::{EntityConflict, EntityKind, QueryEntities};
use crate::error::{TranslateError, TranslateResult};
use crate::optimizer::Optimizer;
use crate::schema::{SchemaHandle, SchemaProvider, SchemaSnapshot};
use crate::sql::BoundParameter;
use crate::translation::{SqlTranslationResult, SqlTranslator};

/// Errors from an entity extractor.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("Nothing to extract from an empty question")]
    EmptyInput,

    #[error("Extractor unavailable: {0}")]
    Unavailable(String),
}

impl From<ExtractError> for TranslateError {
    fn from(err: ExtractError) -> Self {
        TranslateError::Extraction(err.to_string())
    }
}

/// Turns free text into raw, confidence-scored entities.
///
/// Implementations may flag conflicts of their own in
/// [`QueryEntities::conflicts`]; they are carried through mapping.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract_entities(&self, text: &str) -> Result<QueryEntities, ExtractError>;
}

/// Answer to `translate_query` and `apply_clarification`.
#[derive(Debug, Clone, Serialize)]
pub struct TranslationResponse {
    pub request_id: Uuid,
    pub state: ClarificationState,
    pub needs_clarification: bool,
    pub sql: Option<String>,
    pub parameters: Vec<BoundParameter>,
    pub prompts: Vec<ClarificationPrompt>,
    pub conflicts: Vec<EntityConflict>,
    /// Snapshot to send back with clarification answers.
    pub entities: QueryEntities,
    pub translation: Option<Arc<SqlTranslationResult>>,
    pub warnings: Vec<String>,
}

pub struct SemanticLayerService {
    settings: Settings,
    extractor: Arc<dyn Extractor>,
    schema_provider: Arc<dyn SchemaProvider>,
    schema: SchemaHandle,
    dictionary: Arc<EntityDictionary>,
    cache: TranslationCache,
    clock: Arc<dyn Clock>,
}

impl SemanticLayerService {
    /// Load the schema from `schema_provider` and assemble the pipeline.
    pub async fn new(
        settings: Settings,
        extractor: Arc<dyn Extractor>,
        schema_provider: Arc<dyn SchemaProvider>,
        dictionary: Arc<EntityDictionary>,
        clock: Arc<dyn Clock>,
    ) -> TranslateResult<Self> {
        let model = schema_provider.load_schema_model().await?;
        for issue in dictionary.validate_against(&model) {
            warn!(issue = %issue, "Dictionary entry does not match schema");
        }
        info!(
            tables = model.tables().len(),
            views = model.views().len(),
            metrics = dictionary.metrics().len(),
            dimensions = dictionary.dimensions().len(),
            "Semantic layer ready"
        );

        Ok(Self {
            cache: TranslationCache::new(settings.cache.clone(), clock.clone()),
            schema: SchemaHandle::new(model),
            settings,
            extractor,
            schema_provider,
            dictionary,
            clock,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn dictionary(&self) -> &EntityDictionary {
        &self.dictionary
    }

    pub fn schema(&self) -> SchemaSnapshot {
        self.schema.current()
    }

    /// Extract, map and translate a question.
    #[instrument(skip_all, fields(request_id = tracing::field::Empty, user_id = user_id.unwrap_or("-")))]
    pub async fn translate_query(
        &self,
        text: &str,
        user_id: Option<&str>,
        cancel: &CancellationToken,
    ) -> TranslateResult<TranslationResponse> {
        let request_id = new_request_id();

        let mut entities = tokio::select! {
            _ = cancel.cancelled() => return Err(TranslateError::Cancelled),
            extracted = self.extractor.extract_entities(text) => extracted?,
        };
        if entities.original_query.is_empty() {
            entities.original_query = text.to_string();
        }
        debug!(
            metrics = entities.metrics.len(),
            dimensions = entities.dimensions.len(),
            filters = entities.filters.len(),
            "Extracted entities"
        );

        self.run(request_id, cancel, |coordinator| Ok(coordinator.begin(entities)))
            .await
    }

    /// Map and translate entities that were extracted elsewhere.
    #[instrument(skip_all, fields(request_id = tracing::field::Empty))]
    pub async fn translate_entities(
        &self,
        entities: QueryEntities,
        cancel: &CancellationToken,
    ) -> TranslateResult<TranslationResponse> {
        let request_id = new_request_id();
        self.run(request_id, cancel, |coordinator| Ok(coordinator.begin(entities)))
            .await
    }

    /// Resume from an earlier response's `entities` with answers keyed by
    /// conflict id.
    #[instrument(skip_all, fields(request_id = tracing::field::Empty, responses = responses.len()))]
    pub async fn apply_clarification(
        &self,
        original: &QueryEntities,
        responses: &BTreeMap<String, String>,
        cancel: &CancellationToken,
    ) -> TranslateResult<TranslationResponse> {
        let request_id = new_request_id();
        self.run(request_id, cancel, |coordinator| {
            coordinator.apply(original, responses)
        })
        .await
    }

    /// Dictionary entries matching `term`, best first.
    pub fn suggestions(&self, kind: EntityKind, term: &str) -> Vec<String> {
        let mapping = &self.settings.mapping;
        let found = self.dictionary.suggestions(kind, term, mapping);
        if found.is_empty() {
            self.dictionary.closest(kind, term, mapping.max_suggestions)
        } else {
            found
        }
    }

    /// Reload the schema, swap it in and drop every cached translation.
    /// Returns the new schema version.
    pub async fn refresh_schema(&self) -> TranslateResult<u64> {
        let model = self.schema_provider.refresh_schema_model().await?;
        for issue in self.dictionary.validate_against(&model) {
            warn!(issue = %issue, "Dictionary entry does not match refreshed schema");
        }
        let version = self.schema.replace(model);
        self.cache.clear();
        info!(version, "Schema refreshed");
        Ok(version)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    async fn run<F>(
        &self,
        request_id: Uuid,
        cancel: &CancellationToken,
        step: F,
    ) -> TranslateResult<TranslationResponse>
    where
        F: FnOnce(&ClarificationCoordinator<'_>) -> TranslateResult<ClarificationRound>,
    {
        tracing::Span::current().record("request_id", tracing::field::display(request_id));
        if cancel.is_cancelled() {
            return Err(TranslateError::Cancelled);
        }

        let snapshot = self.schema.current();
        let coordinator = ClarificationCoordinator::new(
            &self.dictionary,
            &snapshot.model,
            &self.settings.mapping,
            self.clock.today(),
        );
        let round = step(&coordinator)?;
        let scope = coordinator.stamp();

        if round.needs_clarification() {
            info!(
                conflicts = round.outcome.conflicts.len(),
                "Request needs clarification"
            );
            return Ok(TranslationResponse {
                request_id,
                state: round.state,
                needs_clarification: true,
                sql: None,
                parameters: Vec::new(),
                conflicts: round.entities.conflicts.clone(),
                prompts: round.prompts,
                entities: round.entities,
                translation: None,
                warnings: round.warnings,
            });
        }

        let mapped = &round.outcome.mapped;
        let model = snapshot.model.clone();
        let translation_settings = &self.settings.translation;
        let optimizer_settings = &self.settings.optimizer;

        let translation = self
            .cache
            .get_or_compute(mapped, &scope, cancel, || async move {
                let translated = SqlTranslator::new(&model, translation_settings).translate(mapped)?;
                Ok(Optimizer::new(&model, optimizer_settings).optimize(translated))
            })
            .await
            .inspect_err(|e| warn!(kind = e.root_cause().kind(), error = %e, "Translation failed"))
            .map_err(TranslateError::surfaced)?;

        let mut warnings = round.warnings;
        warnings.extend(translation.warnings.iter().cloned());
        info!(
            tables = ?translation.required_tables,
            used_view = ?translation.used_view,
            "Translated request"
        );

        Ok(TranslationResponse {
            request_id,
            state: round.state,
            needs_clarification: false,
            sql: Some(translation.sql.clone()),
            parameters: translation.parameters.clone(),
            prompts: Vec::new(),
            conflicts: Vec::new(),
            entities: round.entities,
            translation: Some(translation),
            warnings,
        })
    }
}

fn new_request_id() -> Uuid {
    Uuid::new_v4()
}
