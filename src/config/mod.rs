//! Configuration module for nlq.
//!
//! Handles settings files and environment variable expansion.

mod settings;

pub use settings::{
    expand_env_vars, CacheSettings, MappingSettings, OptimizerSettings, Settings,
    SettingsError, SourceSettings, TranslationSettings,
};
