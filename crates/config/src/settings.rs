//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::constants::{endpoints, retrieval, timeouts};
use crate::ConfigError;

/// Main engine settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Feature flags and pipeline toggles
    #[serde(default)]
    pub engine: EngineFlags,

    /// Vector store connection
    #[serde(default)]
    pub vector_store: VectorStoreSettings,

    /// Embedding service
    #[serde(default)]
    pub embedding: EmbeddingSettings,

    /// Generation LLM
    #[serde(default)]
    pub llm: LlmSettings,

    /// Sparse index
    #[serde(default)]
    pub bm25: Bm25Settings,

    /// Per-stage timeout overrides
    #[serde(default)]
    pub timeouts: TimeoutSettings,
}

/// Feature flags controlling pipeline behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineFlags {
    /// Generate rewrites with the LLM (rule-based otherwise); never in qa mode
    #[serde(default)]
    pub use_llm_rewrites: bool,

    /// Use LLM-assisted reranking where available
    #[serde(default = "default_true")]
    pub use_llm_reranking: bool,

    /// Use the cross-encoder reranker
    #[serde(default = "default_true")]
    pub use_cross_encoder: bool,

    /// Enable query/embedding/LLM caches
    #[serde(default = "default_true")]
    pub enable_cache: bool,

    /// Enable the relation/entity reranking phases
    #[serde(default = "default_true")]
    pub use_relation_entity: bool,

    /// Query cache TTL in seconds
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_seconds: u64,

    /// Cache size bound (entries)
    #[serde(default = "default_cache_max_size")]
    pub cache_max_size: usize,

    /// Embedding batch size
    #[serde(default = "default_embed_batch")]
    pub embedding_batch_size: usize,
}

fn default_true() -> bool {
    true
}

fn default_cache_ttl() -> u64 {
    retrieval::CACHE_TTL_SECS
}

fn default_cache_max_size() -> usize {
    retrieval::CACHE_MAX_SIZE
}

fn default_embed_batch() -> usize {
    retrieval::EMBED_BATCH_SIZE
}

impl Default for EngineFlags {
    fn default() -> Self {
        Self {
            use_llm_rewrites: false,
            use_llm_reranking: true,
            use_cross_encoder: true,
            enable_cache: true,
            use_relation_entity: true,
            cache_ttl_seconds: default_cache_ttl(),
            cache_max_size: default_cache_max_size(),
            embedding_batch_size: default_embed_batch(),
        }
    }
}

/// Vector store connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorStoreSettings {
    pub endpoint: String,
    pub api_key: Option<String>,
}

impl Default for VectorStoreSettings {
    fn default() -> Self {
        Self {
            endpoint: endpoints::QDRANT_DEFAULT.clone(),
            api_key: None,
        }
    }
}

/// Embedding service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingSettings {
    pub endpoint: String,
    pub model: String,
    pub dimension: usize,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            endpoint: endpoints::EMBEDDER_DEFAULT.clone(),
            model: "qwen3-embedding:0.6b".to_string(),
            dimension: 1024,
        }
    }
}

/// Generation LLM settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    pub endpoint: String,
    pub model: String,
    pub max_tokens: usize,
    pub temperature: f32,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            endpoint: endpoints::LLM_DEFAULT.clone(),
            model: "qwen3:4b-instruct-2507-q4_K_M".to_string(),
            max_tokens: 512,
            temperature: 0.7,
        }
    }
}

/// Sparse index settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bm25Settings {
    /// Directory holding the on-disk index cache
    pub cache_dir: String,
    /// Enable English stemming
    pub stemming: bool,
}

impl Default for Bm25Settings {
    fn default() -> Self {
        Self {
            cache_dir: "cache/bm25".to_string(),
            stemming: true,
        }
    }
}

/// Per-stage timeout overrides (seconds)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutSettings {
    pub interpret_secs: u64,
    pub rewrite_secs: u64,
    pub expansion_secs: u64,
    pub dense_task_secs: u64,
    pub dense_total_secs: u64,
    pub bm25_secs: u64,
    pub embedding_secs: u64,
    pub internet_secs: u64,
    pub relation_secs: u64,
    pub relation_deep_secs: u64,
    pub cross_encoder_secs: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            interpret_secs: timeouts::INTERPRET_SECS,
            rewrite_secs: timeouts::REWRITE_SECS,
            expansion_secs: timeouts::EXPANSION_SECS,
            dense_task_secs: timeouts::DENSE_TASK_SECS,
            dense_total_secs: timeouts::DENSE_TOTAL_SECS,
            bm25_secs: timeouts::BM25_SECS,
            embedding_secs: timeouts::EMBEDDING_SECS,
            internet_secs: timeouts::INTERNET_SECS,
            relation_secs: timeouts::RELATION_SECS,
            relation_deep_secs: timeouts::RELATION_DEEP_SECS,
            cross_encoder_secs: timeouts::CROSS_ENCODER_SECS,
        }
    }
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate settings values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.cache_max_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "engine.cache_max_size".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        if self.embedding.dimension == 0 {
            return Err(ConfigError::InvalidValue {
                field: "embedding.dimension".to_string(),
                message: "must be positive".to_string(),
            });
        }

        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(ConfigError::InvalidValue {
                field: "llm.temperature".to_string(),
                message: format!("must be in [0, 2], got {}", self.llm.temperature),
            });
        }

        if self.timeouts.dense_task_secs > self.timeouts.dense_total_secs {
            return Err(ConfigError::InvalidValue {
                field: "timeouts.dense_task_secs".to_string(),
                message: "per-task timeout exceeds the overall fan-out budget".to_string(),
            });
        }

        Ok(())
    }
}

/// Load settings from an optional file plus POLICY_ENGINE_* env overrides
pub fn load_settings(path: Option<&Path>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    if let Some(path) = path {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }
        builder = builder.add_source(File::from(path));
    }

    builder = builder.add_source(Environment::with_prefix("POLICY_ENGINE").separator("__"));

    let settings: Settings = builder.build()?.try_deserialize()?;
    settings.validate()?;
    Ok(settings)
}
