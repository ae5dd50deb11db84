//! TOML-based configuration for nlq.
//!
//! Supports a config file (nlq.toml) with environment variable expansion in
//! file paths. Every section is optional and falls back to defaults.
//!
//! Example configuration:
//! ```toml
//! [mapping]
//! confidence_threshold = 0.6
//! fuzzy_matching = true
//! fuzzy_min_similarity = 0.7
//! max_suggestions = 5
//!
//! [translation]
//! dialect = "tsql"
//! row_cap = 10000
//! max_join_depth = 6
//! validate_sql = true
//! join_tie_break = "prefer_joined"
//!
//! [cache]
//! enabled = true
//! capacity = 1000
//! live_ttl_seconds = 300
//! historical_ttl_seconds = 86400
//!
//! [optimizer]
//! enabled = true
//! materialized_views = true
//! index_hints = true
//!
//! [sources]
//! schema_path = "${NLQ_HOME}/schema.toml"
//! dictionary_path = "${NLQ_HOME}/dictionary.toml"
//! ```

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::schema::TieBreak;
use crate::sql::Dialect;

/// Error type for settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    /// Entity mapping.
    pub mapping: MappingSettings,

    /// SQL generation.
    pub translation: TranslationSettings,

    /// Translation cache.
    pub cache: CacheSettings,

    /// Physical rewrites.
    pub optimizer: OptimizerSettings,

    /// Where schema and dictionary definitions come from.
    pub sources: SourceSettings,
}

/// Entity mapping settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MappingSettings {
    /// Below this confidence a match is ambiguous (0.0 to 1.0).
    pub confidence_threshold: f64,

    /// Enable Levenshtein fallback matching.
    pub fuzzy_matching: bool,

    /// Minimum normalized similarity for a fuzzy match.
    pub fuzzy_min_similarity: f64,

    /// Maximum candidates listed on a conflict.
    pub max_suggestions: usize,
}

impl Default for MappingSettings {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.6,
            fuzzy_matching: true,
            fuzzy_min_similarity: 0.7,
            max_suggestions: 5,
        }
    }
}

/// SQL generation settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TranslationSettings {
    pub dialect: Dialect,

    /// Hard cap on returned rows, applied even when no limit is requested.
    pub row_cap: u32,

    /// Maximum relationships traversed to connect two tables.
    pub max_join_depth: usize,

    /// Re-parse generated SQL and report failures as warnings.
    pub validate_sql: bool,

    pub join_tie_break: TieBreak,
}

impl Default for TranslationSettings {
    fn default() -> Self {
        Self {
            dialect: Dialect::Postgres,
            row_cap: 10_000,
            max_join_depth: 6,
            validate_sql: true,
            join_tie_break: TieBreak::PreferJoined,
        }
    }
}

/// Translation cache settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheSettings {
    pub enabled: bool,

    /// Maximum number of cached translations.
    pub capacity: usize,

    /// TTL for translations whose time range reaches today.
    pub live_ttl_seconds: u64,

    /// TTL for translations over purely historical ranges.
    pub historical_ttl_seconds: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: 1000,
            live_ttl_seconds: 300,
            historical_ttl_seconds: 86_400,
        }
    }
}

impl CacheSettings {
    pub fn live_ttl(&self) -> Duration {
        Duration::from_secs(self.live_ttl_seconds)
    }

    pub fn historical_ttl(&self) -> Duration {
        Duration::from_secs(self.historical_ttl_seconds)
    }
}

/// Optimizer settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OptimizerSettings {
    pub enabled: bool,

    /// Consider materialized views as physical sources.
    pub materialized_views: bool,

    /// Report indexes that support the query's filters.
    pub index_hints: bool,
}

impl Default for OptimizerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            materialized_views: true,
            index_hints: true,
        }
    }
}

/// Definition file locations (support ${ENV_VAR} expansion).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct SourceSettings {
    pub schema_path: Option<String>,
    pub dictionary_path: Option<String>,
}

impl SourceSettings {
    /// Schema file path with environment variables expanded.
    pub fn resolved_schema_path(&self) -> Result<Option<PathBuf>, SettingsError> {
        self.schema_path
            .as_deref()
            .map(|p| expand_env_vars(p).map(PathBuf::from))
            .transpose()
    }

    /// Dictionary file path with environment variables expanded.
    pub fn resolved_dictionary_path(&self) -> Result<Option<PathBuf>, SettingsError> {
        self.dictionary_path
            .as_deref()
            .map(|p| expand_env_vars(p).map(PathBuf::from))
            .transpose()
    }
}

impl Settings {
    /// Load settings from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(SettingsError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        let settings: Settings = toml::from_str(&content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from the default config file locations.
    ///
    /// Searches in order:
    /// 1. Environment variable `NLQ_CONFIG`
    /// 2. `./nlq.toml`
    /// 3. `~/.config/nlq/config.toml`
    pub fn load() -> Result<Self, SettingsError> {
        if let Ok(path) = env::var("NLQ_CONFIG") {
            return Self::from_file(&path);
        }

        let local_config = PathBuf::from("nlq.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("nlq").join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        Ok(Settings::default())
    }

    /// Reject values the pipeline cannot work with.
    pub fn validate(&self) -> Result<(), SettingsError> {
        let threshold = self.mapping.confidence_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(SettingsError::InvalidConfig(format!(
                "mapping.confidence_threshold must be within [0, 1], got {}",
                threshold
            )));
        }
        let similarity = self.mapping.fuzzy_min_similarity;
        if !(0.0..=1.0).contains(&similarity) {
            return Err(SettingsError::InvalidConfig(format!(
                "mapping.fuzzy_min_similarity must be within [0, 1], got {}",
                similarity
            )));
        }
        if self.translation.row_cap == 0 {
            return Err(SettingsError::InvalidConfig(
                "translation.row_cap must be positive".into(),
            ));
        }
        if self.translation.max_join_depth == 0 {
            return Err(SettingsError::InvalidConfig(
                "translation.max_join_depth must be positive".into(),
            ));
        }
        if self.cache.capacity == 0 {
            return Err(SettingsError::InvalidConfig(
                "cache.capacity must be positive".into(),
            ));
        }
        if self.cache.live_ttl_seconds > self.cache.historical_ttl_seconds {
            tracing::warn!(
                live = self.cache.live_ttl_seconds,
                historical = self.cache.historical_ttl_seconds,
                "Live cache TTL exceeds historical TTL"
            );
        }
        Ok(())
    }
}

/// Expand environment variables in a string.
///
/// Supports `${VAR}` and `$VAR` syntax.
pub fn expand_env_vars(s: &str) -> Result<String, SettingsError> {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            result.push(c);
            continue;
        }

        let var_name = if chars.peek() == Some(&'{') {
            chars.next();
            let mut name = String::new();
            for ch in chars.by_ref() {
                if ch == '}' {
                    break;
                }
                name.push(ch);
            }
            name
        } else {
            let mut name = String::new();
            while let Some(&ch) = chars.peek() {
                if ch.is_alphanumeric() || ch == '_' {
                    name.push(ch);
                    chars.next();
                } else {
                    break;
                }
            }
            if name.is_empty() {
                // lone $
                result.push('$');
                continue;
            }
            name
        };

        let value =
            env::var(&var_name).map_err(|_| SettingsError::MissingEnvVar(var_name.clone()))?;
        result.push_str(&value);
    }

    Ok(result)
}
