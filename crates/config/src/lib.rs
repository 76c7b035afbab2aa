//! Configuration management for the policy retrieval engine
//!
//! Supports loading configuration from:
//! - TOML/JSON files
//! - Environment variables (POLICY_ENGINE_ prefix)
//! - Runtime overrides

pub mod constants;
pub mod settings;

pub use settings::{
    load_settings, Bm25Settings, EmbeddingSettings, EngineFlags, LlmSettings, Settings,
    TimeoutSettings, VectorStoreSettings,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}
