//! SchemaProvider trait definition.
//!
//! A provider abstracts where schema metadata comes from. The service loads
//! the model once at startup and again on every explicit refresh.

use std::path::PathBuf;
use std::sync::RwLock;

use async_trait::async_trait;

use super::{SchemaDefinition, SchemaError, SchemaModel, SchemaResult};

/// Source of schema metadata.
///
/// # Example
///
/// ```ignore
/// use nlq::schema::{SchemaProvider, TomlSchemaProvider};
///
/// async fn example(provider: &impl SchemaProvider) -> SchemaResult<()> {
///     let model = provider.load_schema_model().await?;
///     let fresh = provider.refresh_schema_model().await?;
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait SchemaProvider: Send + Sync {
    /// Load the schema model.
    async fn load_schema_model(&self) -> SchemaResult<SchemaModel>;

    /// Re-read metadata from the source.
    ///
    /// Default implementation loads again.
    async fn refresh_schema_model(&self) -> SchemaResult<SchemaModel> {
        self.load_schema_model().await
    }
}

/// Provider over an in-memory definition. The definition can be replaced to
/// simulate upstream schema changes.
#[derive(Debug)]
pub struct StaticSchemaProvider {
    definition: RwLock<SchemaDefinition>,
}

impl StaticSchemaProvider {
    pub fn new(definition: SchemaDefinition) -> Self {
        Self {
            definition: RwLock::new(definition),
        }
    }

    /// Replace the definition served by subsequent loads.
    pub fn replace(&self, definition: SchemaDefinition) {
        match self.definition.write() {
            Ok(mut guard) => *guard = definition,
            Err(poisoned) => *poisoned.into_inner() = definition,
        }
    }

    fn current(&self) -> SchemaDefinition {
        match self.definition.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl SchemaProvider for StaticSchemaProvider {
    async fn load_schema_model(&self) -> SchemaResult<SchemaModel> {
        SchemaModel::new(self.current())
    }
}

/// Provider reading a TOML schema definition from disk.
#[derive(Debug, Clone)]
pub struct TomlSchemaProvider {
    path: PathBuf,
}

impl TomlSchemaProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl SchemaProvider for TomlSchemaProvider {
    async fn load_schema_model(&self) -> SchemaResult<SchemaModel> {
        let content = tokio::fs::read_to_string(&self.path).await?;
        let model = SchemaModel::from_toml_str(&content)?;
        tracing::debug!(
            path = %self.path.display(),
            tables = model.tables().len(),
            "Loaded schema definition"
        );
        Ok(model)
    }
}

impl From<SchemaError> for crate::error::TranslateError {
    fn from(err: SchemaError) -> Self {
        crate::error::TranslateError::SchemaUnavailable(err.to_string())
    }
}
