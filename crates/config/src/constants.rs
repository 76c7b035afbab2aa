//! Centralized constants for the retrieval engine
//!
//! Single source of truth for service endpoints, stage timeouts, and search
//! tuning parameters. Corpus-specific vocabulary (abbreviations, domain
//! synonym tables, routing keywords) lives next to the components that
//! compile it, not here.

/// Service endpoints (loaded from env vars with fallback defaults)
pub mod endpoints {
    use once_cell::sync::Lazy;

    /// Qdrant vector store endpoint (env: QDRANT_URL)
    pub static QDRANT_DEFAULT: Lazy<String> = Lazy::new(|| {
        std::env::var("QDRANT_URL").unwrap_or_else(|_| "http://127.0.0.1:6334".to_string())
    });

    /// Embedding service endpoint (env: EMBEDDER_URL)
    pub static EMBEDDER_DEFAULT: Lazy<String> = Lazy::new(|| {
        std::env::var("EMBEDDER_URL").unwrap_or_else(|_| "http://localhost:11434".to_string())
    });

    /// Generation LLM endpoint (env: LLM_URL)
    pub static LLM_DEFAULT: Lazy<String> = Lazy::new(|| {
        std::env::var("LLM_URL").unwrap_or_else(|_| "http://localhost:11434".to_string())
    });

    /// Cross-encoder reranking service endpoint (env: RERANKER_URL)
    pub static RERANKER_DEFAULT: Lazy<String> = Lazy::new(|| {
        std::env::var("RERANKER_URL").unwrap_or_else(|_| "http://localhost:8090".to_string())
    });
}

/// Per-stage timeouts (seconds unless noted)
pub mod timeouts {
    /// Query interpretation budget
    pub const INTERPRET_SECS: u64 = 3;

    /// Rewrite generation budget (covers the LLM path)
    pub const REWRITE_SECS: u64 = 5;

    /// Total domain-expansion budget across all rewrites
    pub const EXPANSION_SECS: u64 = 2;

    /// Single dense search task
    pub const DENSE_TASK_SECS: u64 = 25;

    /// Whole dense fan-out for one hop
    pub const DENSE_TOTAL_SECS: u64 = 60;

    /// BM25 sparse search
    pub const BM25_SECS: u64 = 10;

    /// Batched embedding call
    pub const EMBEDDING_SECS: u64 = 5;

    /// Internet search
    pub const INTERNET_SECS: u64 = 10;

    /// Relation/entity phase 1, regular queries
    pub const RELATION_SECS: u64 = 5;

    /// Relation/entity phase 1, deep-mode queries
    pub const RELATION_DEEP_SECS: u64 = 8;

    /// Entity expansion and bidirectional search phases
    pub const ENTITY_PHASE_SECS: u64 = 5;

    /// Cross-encoder reranking call
    pub const CROSS_ENCODER_SECS: u64 = 10;
}

/// Retrieval tuning defaults
pub mod retrieval {
    /// RRF rank-smoothing constant
    pub const RRF_K: f32 = 60.0;

    /// Minimum dense similarity to keep a hit
    pub const SCORE_THRESHOLD: f32 = 0.3;

    /// Query cache TTL
    pub const CACHE_TTL_SECS: u64 = 600;

    /// Embedding/LLM/query cache size bound
    pub const CACHE_MAX_SIZE: usize = 100;

    /// Recent-timeout count that trips the circuit breaker
    pub const CIRCUIT_BREAKER_LIMIT: u32 = 3;

    /// Bounded worker pool: simple QA queries
    pub const WORKERS_QA: usize = 4;

    /// Bounded worker pool: default
    pub const WORKERS_DEFAULT: usize = 6;

    /// Bounded worker pool: policy/framework/brainstorm queries
    pub const WORKERS_DEEP: usize = 10;

    /// Batch size for embedding calls
    pub const EMBED_BATCH_SIZE: usize = 32;

    /// Early exit: minimum top-3 raw-score average
    pub const EARLY_EXIT_AVG: f32 = 0.75;

    /// Early exit: minimum top raw score
    pub const EARLY_EXIT_MAX: f32 = 0.8;

    /// Skip expensive reranking when top-3 already average above this
    pub const GOOD_ENOUGH_AVG: f32 = 0.65;

    /// Skip expensive reranking when the top raw score exceeds this
    pub const GOOD_ENOUGH_MAX: f32 = 0.7;

    /// Hop-2 trigger: hop-1 top-5 max raw score below this
    pub const MULTI_HOP_MAX_SCORE: f32 = 0.6;

    /// Recent-GOs auto-filter window
    pub const RECENT_GO_WINDOW_DAYS: i64 = 18 * 30;

    /// Stage-timing histograms keep the last N samples
    pub const STAGE_SAMPLES: usize = 100;
}
