//! Multi-stage retrieval pipeline for policy question answering
//!
//! Orchestrates query understanding, vertical routing, adaptive planning,
//! parallel hybrid retrieval (dense + sparse), multi-hop expansion,
//! relation/entity-aware reranking, and diversity reranking over a corpus of
//! government orders, legal acts, judicial decisions, statistical reports,
//! and welfare schemes.
//!
//! Features:
//! - Dense vector search via Qdrant, sparse BM25 via Tantivy
//! - Hybrid fusion with RRF
//! - Legal-clause fast path that short-circuits the full pipeline
//! - Early exit when hop-1 results are already high quality
//! - Circuit breaker that disables expensive phases after repeated timeouts
//! - Per-stage timeouts with partial-result degradation
//! - TTL query cache, LRU embedding/LLM caches, per-stage latency histograms

pub mod cache;
pub mod clause_index;
pub mod cross_encoder;
pub mod diversity;
pub mod embeddings;
pub mod engine;
pub mod executor;
pub mod expander;
pub mod internet;
pub mod interpreter;
pub mod multi_hop;
pub mod normalizer;
pub mod planner;
pub mod processor;
pub mod relation;
pub mod rerank_coordinator;
pub mod rewriter;
pub mod router;
pub mod scoring;
pub mod sparse;
pub mod stats;
pub mod understanding;
pub mod vector_store;

pub use cache::{EmbeddingCache, LlmCache, QueryCache};
pub use clause_index::{ClauseIndex, LegalClauseHandler};
pub use cross_encoder::{CrossEncoder, HttpCrossEncoder, KeywordScorer, RerankCandidate};
pub use diversity::{CategoryPredictor, DiversityReranker, PolicyCategory};
pub use embeddings::{CachedEmbedder, Embedder, EmbeddingConfig, HashEmbedder, HttpEmbedder};
pub use engine::{EngineConfig, RetrievalEngine};
pub use executor::HybridExecutor;
pub use expander::DomainExpander;
pub use internet::{InternetHandler, WebHit, WebSearch};
pub use interpreter::QueryInterpreter;
pub use multi_hop::MultiHopExpander;
pub use normalizer::{normalize, QueryNormalizer};
pub use planner::PlanBuilder;
pub use processor::{NormalizeMethod, ResultProcessor};
pub use relation::RelationEntityProcessor;
pub use rewriter::QueryRewriter;
pub use router::VerticalRouter;
pub use sparse::{SparseConfig, SparseHit, SparseIndex};
pub use stats::{EngineStats, StageStats};
pub use vector_store::{MemoryStore, PointHit, QdrantStore, SearchFilter, VectorSearch};

use thiserror::Error;

/// Retrieval pipeline errors
///
/// Every variant except `InvalidInput` is recovered locally: stages degrade
/// to partial results, fall back to rule-based paths, or skip themselves.
#[derive(Error, Debug)]
pub enum RetrievalError {
    #[error("Stage '{stage}' exceeded its {budget_secs}s budget")]
    Timeout { stage: &'static str, budget_secs: u64 },

    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Filter targets unindexed field: {0}")]
    IndexMissing(String),

    #[error("Failed to parse LLM output: {0}")]
    ParseError(String),

    #[error("No results for the original query from either dense or sparse search")]
    NoResults,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Vector store error: {0}")]
    VectorStore(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Sparse index error: {0}")]
    Index(String),

    #[error("Search error: {0}")]
    Search(String),

    #[error("Reranker error: {0}")]
    Reranker(String),
}

impl From<RetrievalError> for policy_engine_core::Error {
    fn from(err: RetrievalError) -> Self {
        match err {
            RetrievalError::InvalidInput(msg) => policy_engine_core::Error::InvalidInput(msg),
            other => policy_engine_core::Error::Retrieval(other.to_string()),
        }
    }
}
