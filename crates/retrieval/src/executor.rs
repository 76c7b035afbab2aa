//! Hybrid retrieval execution
//!
//! Fans dense searches out over (rewrite x vertical) through a bounded worker
//! pool, runs BM25 in parallel for the original query, and fuses the two
//! result sets with RRF. Embeddings are batched through the cache first.
//! Every external call carries a timeout; on expiry whatever completed is
//! used and the pipeline never fails.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::Semaphore;

use policy_engine_config::constants::retrieval::{RRF_K, SCORE_THRESHOLD};
use policy_engine_config::settings::TimeoutSettings;
use policy_engine_core::{RetrievalPlan, RetrievalResult, Vertical};

use crate::embeddings::CachedEmbedder;
use crate::scoring::section_type_boost;
use crate::sparse::SparseIndex;
use crate::stats::EngineStats;
use crate::vector_store::{PointHit, SearchFilter, VectorSearch};

/// Hybrid retrieval executor
pub struct HybridExecutor {
    store: Arc<dyn VectorSearch>,
    embedder: Arc<CachedEmbedder>,
    sparse: Option<Arc<SparseIndex>>,
    pool: Arc<Semaphore>,
    timeouts: TimeoutSettings,
    stats: Arc<EngineStats>,
}

impl HybridExecutor {
    pub fn new(
        store: Arc<dyn VectorSearch>,
        embedder: Arc<CachedEmbedder>,
        sparse: Option<Arc<SparseIndex>>,
        workers: usize,
        timeouts: TimeoutSettings,
        stats: Arc<EngineStats>,
    ) -> Self {
        Self {
            store,
            embedder,
            sparse,
            pool: Arc::new(Semaphore::new(workers.max(1))),
            timeouts,
            stats,
        }
    }

    /// Dense retrieval across all (query x vertical) combinations
    ///
    /// Embeddings for all unique queries are generated in one batched call
    /// (cache-first). Each search task takes a pool permit and times out
    /// individually; the whole fan-out has its own deadline.
    pub async fn retrieve_hop(
        &self,
        queries: &[String],
        verticals: &[Vertical],
        top_k: usize,
        hop_number: u8,
        filter: Option<&SearchFilter>,
    ) -> Vec<RetrievalResult> {
        if queries.is_empty() || verticals.is_empty() {
            return Vec::new();
        }

        let embed_budget = Duration::from_secs(self.timeouts.embedding_secs);
        let embedded = match tokio::time::timeout(
            embed_budget,
            self.embedder.embed_all(queries),
        )
        .await
        {
            Ok((resolved, cache_hits)) => {
                self.stats.record_cache_hits(cache_hits as u64);
                resolved
            }
            Err(_) => {
                tracing::warn!(
                    budget_secs = self.timeouts.embedding_secs,
                    "embedding stage timed out, skipping dense retrieval"
                );
                return Vec::new();
            }
        };

        let task_budget = Duration::from_secs(self.timeouts.dense_task_secs);
        let mut tasks = FuturesUnordered::new();

        for (query, vector) in &embedded {
            for vertical in verticals {
                let store = Arc::clone(&self.store);
                let pool = Arc::clone(&self.pool);
                let query = query.clone();
                let vector = vector.clone();
                let vertical = *vertical;
                let filter = filter.cloned();

                tasks.push(async move {
                    let _permit = match pool.acquire().await {
                        Ok(permit) => permit,
                        Err(_) => return Vec::new(),
                    };

                    let search = store.query_points(
                        vertical.collection_name(),
                        &vector,
                        top_k,
                        Some(SCORE_THRESHOLD),
                        filter.as_ref(),
                    );

                    match tokio::time::timeout(task_budget, search).await {
                        Ok(Ok(hits)) => hits
                            .into_iter()
                            .map(|hit| hit_to_result(hit, vertical, &query, hop_number))
                            .collect(),
                        Ok(Err(e)) => {
                            tracing::warn!(
                                collection = vertical.collection_name(),
                                error = %e,
                                "dense search failed"
                            );
                            Vec::new()
                        }
                        Err(_) => {
                            tracing::warn!(
                                collection = vertical.collection_name(),
                                "dense search task timed out"
                            );
                            Vec::new()
                        }
                    }
                });
            }
        }

        let mut all_results = Vec::new();
        let overall = Duration::from_secs(self.timeouts.dense_total_secs);
        let drain = async {
            while let Some(batch) = tasks.next().await {
                all_results.extend(batch);
            }
        };

        if tokio::time::timeout(overall, drain).await.is_err() {
            tracing::warn!(
                budget_secs = self.timeouts.dense_total_secs,
                collected = all_results.len(),
                "dense fan-out deadline reached, using partial results"
            );
        }

        all_results
    }

    /// Hybrid (dense + BM25) retrieval for a single query
    ///
    /// The fused list is rank-scored (1/(rank+1)) and then section-type
    /// boosted, so boosts can reorder the fused candidates.
    pub async fn execute_hybrid(
        &self,
        query: &str,
        verticals: &[Vertical],
        plan: &RetrievalPlan,
        hop_number: u8,
        filter: Option<&SearchFilter>,
    ) -> Vec<RetrievalResult> {
        let queries = vec![query.to_string()];
        let dense_fut =
            self.retrieve_hop(&queries, verticals, plan.top_k_per_vertical, hop_number, filter);

        let sparse_fut = self.sparse_search(query, plan.top_k_per_vertical, hop_number);

        let (dense, sparse) = if plan.use_hybrid {
            tokio::join!(dense_fut, sparse_fut)
        } else {
            (dense_fut.await, Vec::new())
        };

        if sparse.is_empty() {
            return dense;
        }
        let sparse = scale_sparse_scores(sparse);
        if dense.is_empty() {
            return sparse;
        }

        fuse_dense_sparse(dense, sparse)
    }

    async fn sparse_search(&self, query: &str, top_k: usize, hop_number: u8) -> Vec<RetrievalResult> {
        let Some(ref sparse) = self.sparse else {
            return Vec::new();
        };

        let index = Arc::clone(sparse);
        let query_owned = query.to_string();
        let budget = Duration::from_secs(self.timeouts.bm25_secs);

        let task = tokio::task::spawn_blocking(move || index.search(&query_owned, top_k));

        match tokio::time::timeout(budget, task).await {
            Ok(Ok(Ok(hits))) => hits
                .into_iter()
                .map(|hit| RetrievalResult {
                    doc_id: hit
                        .metadata
                        .get("doc_id")
                        .and_then(|v| v.as_str())
                        .unwrap_or("unknown")
                        .to_string(),
                    chunk_id: hit.chunk_id,
                    content: hit.content,
                    score: hit.score,
                    vertical: hit.vertical,
                    metadata: hit.metadata,
                    rewrite_source: format!("bm25_{}", query),
                    hop_number,
                })
                .collect(),
            Ok(Ok(Err(e))) => {
                tracing::warn!(error = %e, "BM25 search failed");
                Vec::new()
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "BM25 search task panicked");
                Vec::new()
            }
            Err(_) => {
                tracing::warn!(budget_secs = self.timeouts.bm25_secs, "BM25 search timed out");
                Vec::new()
            }
        }
    }
}

fn hit_to_result(
    hit: PointHit,
    vertical: Vertical,
    query: &str,
    hop_number: u8,
) -> RetrievalResult {
    let content = hit
        .payload
        .get("content")
        .or_else(|| hit.payload.get("text"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();
    let doc_id = hit
        .payload
        .get("doc_id")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_string();

    RetrievalResult {
        chunk_id: hit.id,
        doc_id,
        content,
        score: hit.score,
        vertical: vertical.as_str().to_string(),
        metadata: hit.payload,
        rewrite_source: query.to_string(),
        hop_number,
    }
}

/// Rescale BM25 scores into [0, 1] so fused raw scores stay comparable with
/// dense similarities
fn scale_sparse_scores(mut sparse: Vec<RetrievalResult>) -> Vec<RetrievalResult> {
    let min = sparse.iter().map(|r| r.score).fold(f32::INFINITY, f32::min);
    let max = sparse.iter().map(|r| r.score).fold(f32::NEG_INFINITY, f32::max);

    if (max - min).abs() < f32::EPSILON {
        for r in &mut sparse {
            r.score = 1.0;
        }
    } else {
        for r in &mut sparse {
            r.score = (r.score - min) / (max - min);
        }
    }
    sparse
}

/// RRF-fuse dense and sparse lists, reassign rank scores, apply section boost
///
/// On shared hits the dense occurrence is kept; the sparse ranking only adds
/// its RRF contribution.
fn fuse_dense_sparse(
    dense: Vec<RetrievalResult>,
    sparse: Vec<RetrievalResult>,
) -> Vec<RetrievalResult> {
    let mut fused: Vec<(RetrievalResult, f32)> = Vec::new();

    for list in [dense, sparse] {
        for (rank, result) in list.into_iter().enumerate() {
            let contribution = 1.0 / (RRF_K + (rank + 1) as f32);
            match fused.iter_mut().find(|(r, _)| r.chunk_id == result.chunk_id) {
                Some((_, score)) => {
                    *score += contribution;
                }
                None => fused.push((result, contribution)),
            }
        }
    }

    fused.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let mut results: Vec<RetrievalResult> = fused
        .into_iter()
        .enumerate()
        .map(|(rank, (mut result, rrf_score))| {
            result.set_meta("rrf_score", rrf_score as f64);
            result.set_meta("fusion_method", "rrf");
            result.preserve_raw_score();
            result.score = 1.0 / (rank + 1) as f32;

            let boost = section_type_boost(result.meta_str("section_type"));
            if (boost - 1.0).abs() > f32::EPSILON {
                result.score *= boost;
                result.set_meta("section_boost", boost as f64);
            }
            result
        })
        .collect();

    results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::EmbeddingCache;
    use crate::embeddings::{Embedder, HashEmbedder};
    use crate::sparse::SparseConfig;
    use crate::vector_store::MemoryStore;
    use policy_engine_core::{Metadata, PlanMode};
    use serde_json::json;

    fn plan(top_k: usize) -> RetrievalPlan {
        RetrievalPlan {
            num_rewrites: 1,
            num_hops: 1,
            top_k_per_vertical: top_k,
            top_k_total: top_k * 2,
            use_internet: false,
            use_hybrid: true,
            rerank_top_k: top_k,
            diversity_weight: 0.2,
            mode: PlanMode::Qa,
        }
    }

    async fn seeded() -> (Arc<MemoryStore>, Arc<CachedEmbedder>, Arc<SparseIndex>) {
        let store = Arc::new(MemoryStore::new());
        let hash = HashEmbedder::new(32);

        let docs = [
            ("l1", Vertical::Legal, "Section 12 mandates admission of weaker sections", "orders"),
            ("l2", Vertical::Legal, "Preamble discussing educational aims", "preamble"),
            ("g1", Vertical::Go, "Teacher transfer counselling government order", "orders"),
        ];
        for (id, vertical, content, section_type) in docs {
            let mut payload = Metadata::new();
            payload.insert("content".to_string(), json!(content));
            payload.insert("doc_id".to_string(), json!(id));
            payload.insert("section_type".to_string(), json!(section_type));
            store.insert(
                vertical.collection_name(),
                id,
                hash.embed_one(content),
                payload,
            );
        }

        let sparse = Arc::new(
            SparseIndex::open_or_build(
                SparseConfig { cache_dir: None, stemming: true },
                store.as_ref(),
                &Vertical::ALL,
            )
            .await
            .unwrap(),
        );

        let embedder = Arc::new(CachedEmbedder::new(
            Arc::new(HashEmbedder::new(32)),
            Arc::new(EmbeddingCache::new(100)),
            true,
        ));

        (store, embedder, sparse)
    }

    fn executor(
        store: Arc<MemoryStore>,
        embedder: Arc<CachedEmbedder>,
        sparse: Option<Arc<SparseIndex>>,
    ) -> HybridExecutor {
        HybridExecutor::new(
            store,
            embedder,
            sparse,
            6,
            TimeoutSettings::default(),
            Arc::new(EngineStats::new()),
        )
    }

    #[tokio::test]
    async fn test_hybrid_returns_fused_results() {
        let (store, embedder, sparse) = seeded().await;
        let exec = executor(store, embedder, Some(sparse));

        let results = exec
            .execute_hybrid(
                "Section 12 mandates admission of weaker sections",
                &[Vertical::Legal, Vertical::Go],
                &plan(10),
                1,
                None,
            )
            .await;

        assert!(!results.is_empty());
        assert_eq!(results[0].chunk_id, "l1");
        assert_eq!(results[0].meta_str("fusion_method"), Some("rrf"));
        // Scores are monotonically non-increasing after fusion
        for pair in results.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[tokio::test]
    async fn test_dense_only_when_no_sparse() {
        let (store, embedder, _) = seeded().await;
        let exec = executor(store, embedder, None);

        let results = exec
            .execute_hybrid(
                "Teacher transfer counselling government order",
                &[Vertical::Go],
                &plan(10),
                1,
                None,
            )
            .await;

        assert!(!results.is_empty());
        assert!(results.iter().all(|r| r.meta_str("fusion_method").is_none()));
    }

    #[tokio::test]
    async fn test_retrieve_hop_tags_provenance() {
        let (store, embedder, _) = seeded().await;
        let exec = executor(store, embedder, None);

        let queries = vec!["weaker section admission".to_string()];
        let results = exec
            .retrieve_hop(&queries, &[Vertical::Legal], 10, 2, None)
            .await;

        for r in &results {
            assert_eq!(r.hop_number, 2);
            assert_eq!(r.rewrite_source, "weaker section admission");
            assert_eq!(r.vertical, "legal");
        }
    }

    #[test]
    fn test_section_boost_applied_after_rank_reassignment() {
        let make = |id: &str, score: f32, section: &str| {
            let mut metadata = Metadata::new();
            metadata.insert("section_type".to_string(), json!(section));
            RetrievalResult {
                chunk_id: id.to_string(),
                doc_id: id.to_string(),
                content: String::new(),
                score,
                vertical: "legal".to_string(),
                metadata,
                rewrite_source: "q".to_string(),
                hop_number: 1,
            }
        };

        // Dense rank 1 is a preamble chunk, rank 2 an orders chunk; after
        // rank reassignment the orders boost can flip them only if large
        // enough (1/2 * 1.3 = 0.65 < 1 * 0.85, so order holds here).
        let dense = vec![make("p", 0.9, "preamble"), make("o", 0.8, "orders")];
        let sparse = vec![make("p", 5.0, "preamble"), make("o", 4.0, "orders")];

        let fused = fuse_dense_sparse(dense, sparse);
        assert_eq!(fused[0].chunk_id, "p");
        assert!(fused[0].meta_f64("section_boost").is_some());
        assert!((fused[0].score - 0.85).abs() < 1e-6);
        assert!((fused[1].score - 0.65).abs() < 1e-6);
    }
}
