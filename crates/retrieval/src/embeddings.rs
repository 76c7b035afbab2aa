//! Query embeddings
//!
//! The embedding model is an external service exposing a batched
//! `embed(texts) -> vectors` call. `CachedEmbedder` layers the LRU embedding
//! cache on top of any embedder and falls back to per-text calls when the
//! batched call fails.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use policy_engine_config::constants::endpoints;

pub use crate::cache::EmbeddingCache;
use crate::RetrievalError;

/// Embedding configuration
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    /// Service endpoint
    pub endpoint: String,
    /// Model name
    pub model: String,
    /// Embedding dimension
    pub embedding_dim: usize,
    /// Texts per request
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            endpoint: endpoints::EMBEDDER_DEFAULT.clone(),
            model: "qwen3-embedding:0.6b".to_string(),
            embedding_dim: 1024,
            batch_size: policy_engine_config::constants::retrieval::EMBED_BATCH_SIZE,
        }
    }
}

/// Embedding model interface
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts; one vector per input, in order
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RetrievalError>;

    /// Embedding dimension
    fn dimension(&self) -> usize;
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// HTTP embedder for Ollama-compatible embedding endpoints
pub struct HttpEmbedder {
    client: Client,
    config: EmbeddingConfig,
}

impl HttpEmbedder {
    pub fn new(config: EmbeddingConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    async fn embed_chunk(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RetrievalError> {
        let url = format!("{}/api/embed", self.config.endpoint);
        let request = EmbedRequest {
            model: &self.config.model,
            input: texts,
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| RetrievalError::Embedding(format!("embed request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(RetrievalError::Embedding(format!(
                "embedding failed: {} - {}",
                status, body
            )));
        }

        let parsed: EmbedResponse = response
            .json()
            .await
            .map_err(|e| RetrievalError::Embedding(format!("bad embed response: {}", e)))?;

        if parsed.embeddings.len() != texts.len() {
            return Err(RetrievalError::Embedding(format!(
                "embedding count mismatch: {} texts, {} vectors",
                texts.len(),
                parsed.embeddings.len()
            )));
        }

        Ok(parsed.embeddings)
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RetrievalError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut all = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.config.batch_size.max(1)) {
            all.extend(self.embed_chunk(chunk).await?);
        }
        Ok(all)
    }

    fn dimension(&self) -> usize {
        self.config.embedding_dim
    }
}

/// Deterministic hash-based embedder for tests
///
/// No model required; vectors are stable across calls so the cache behaves
/// exactly as it does in production.
pub struct HashEmbedder {
    dim: usize,
}

impl HashEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }

    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0f32; self.dim];
        for (i, c) in text.chars().enumerate() {
            let idx = (c as usize + i) % self.dim;
            embedding[idx] += 1.0;
        }

        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut embedding {
                *v /= norm;
            }
        }
        embedding
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RetrievalError> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dim
    }
}

/// Cache-aware embedder wrapper
///
/// One batched call covers all uncached texts; on batch failure each text is
/// retried individually so a single bad input cannot sink the whole set.
pub struct CachedEmbedder {
    inner: Arc<dyn Embedder>,
    cache: Arc<EmbeddingCache>,
    enable_cache: bool,
}

impl CachedEmbedder {
    pub fn new(inner: Arc<dyn Embedder>, cache: Arc<EmbeddingCache>, enable_cache: bool) -> Self {
        Self {
            inner,
            cache,
            enable_cache,
        }
    }

    /// Embed texts, consulting and updating the cache
    ///
    /// Returns (text, vector) pairs for every input that could be embedded;
    /// inputs that failed even the per-text fallback are omitted. The number
    /// of cache hits is returned alongside.
    pub async fn embed_all(&self, texts: &[String]) -> (Vec<(String, Vec<f32>)>, usize) {
        let mut resolved: Vec<(String, Vec<f32>)> = Vec::with_capacity(texts.len());
        let mut uncached: Vec<String> = Vec::new();
        let mut cache_hits = 0;

        for text in texts {
            if self.enable_cache {
                if let Some(vector) = self.cache.get(text) {
                    resolved.push((text.clone(), vector));
                    cache_hits += 1;
                    continue;
                }
            }
            if !uncached.contains(text) {
                uncached.push(text.clone());
            }
        }

        if uncached.is_empty() {
            return (resolved, cache_hits);
        }

        match self.inner.embed_batch(&uncached).await {
            Ok(vectors) => {
                for (text, vector) in uncached.iter().zip(vectors) {
                    if self.enable_cache {
                        self.cache.insert(text, vector.clone());
                    }
                    resolved.push((text.clone(), vector));
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "batch embedding failed, falling back to per-text calls");
                for text in &uncached {
                    match self.inner.embed_batch(std::slice::from_ref(text)).await {
                        Ok(mut vectors) if !vectors.is_empty() => {
                            let vector = vectors.remove(0);
                            if self.enable_cache {
                                self.cache.insert(text, vector.clone());
                            }
                            resolved.push((text.clone(), vector));
                        }
                        Ok(_) => {}
                        Err(e) => {
                            tracing::warn!(text = %text, error = %e, "embedding failed for text");
                        }
                    }
                }
            }
        }

        (resolved, cache_hits)
    }

    pub fn dimension(&self) -> usize {
        self.inner.dimension()
    }
}
