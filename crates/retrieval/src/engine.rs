//! Engine orchestrator
//!
//! Drives the full pipeline: normalize -> cache lookup -> clause fast path ->
//! query understanding -> routing/planning -> hybrid retrieval (with early
//! exit) -> rewrites -> conditional multi-hop -> optional internet -> dedup
//! and supersession partitioning -> reranking -> packaging. Every stage is
//! timed, narrated in `trace_steps`, and degrades to partial results instead
//! of failing.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;

use policy_engine_config::constants::retrieval::{
    EARLY_EXIT_AVG, EARLY_EXIT_MAX, RECENT_GO_WINDOW_DAYS, WORKERS_DEEP, WORKERS_DEFAULT,
    WORKERS_QA,
};
use policy_engine_config::settings::{EngineFlags, TimeoutSettings};
use policy_engine_core::{
    Answer, AnswerBuilder, Interpretation, Metadata, Mode, QueryScope, QueryType, RetrievalOutput,
    RetrievalPlan, RetrievalResult, RetrieveOptions, ValidationReport, Vertical,
};
use policy_engine_llm::LlmBackend;

use crate::cache::{filter_hash, LlmCache, QueryCache};
use crate::clause_index::{ClauseIndex, LegalClauseHandler};
use crate::cross_encoder::{CrossEncoder, KeywordScorer};
use crate::diversity::CategoryPredictor;
use crate::embeddings::{CachedEmbedder, Embedder, EmbeddingCache};
use crate::executor::HybridExecutor;
use crate::expander::DomainExpander;
use crate::internet::{InternetHandler, WebSearch};
use crate::interpreter::QueryInterpreter;
use crate::multi_hop::MultiHopExpander;
use crate::normalizer::QueryNormalizer;
use crate::planner::PlanBuilder;
use crate::processor::{NormalizeMethod, ResultProcessor};
use crate::relation::RelationEntityProcessor;
use crate::rerank_coordinator::RerankCoordinator;
use crate::rewriter::QueryRewriter;
use crate::router::VerticalRouter;
use crate::sparse::SparseIndex;
use crate::stats::{EngineStats, StageStats, StatsSnapshot};
use crate::understanding::UnderstandingCoordinator;
use crate::vector_store::{SearchFilter, VectorSearch};
use crate::RetrievalError;

/// Engine-level configuration
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub flags: EngineFlags,
    pub timeouts: TimeoutSettings,
}

/// Builder assembling the engine from its collaborators
pub struct EngineBuilder {
    config: EngineConfig,
    store: Arc<dyn VectorSearch>,
    embedder: Arc<dyn Embedder>,
    sparse: Option<Arc<SparseIndex>>,
    clause_index: Option<Arc<ClauseIndex>>,
    llm: Option<Arc<dyn LlmBackend>>,
    cross_encoder: Option<Arc<dyn CrossEncoder>>,
    web_search: Option<Arc<dyn WebSearch>>,
    answer_builder: Option<Arc<dyn AnswerBuilder>>,
}

impl EngineBuilder {
    pub fn with_sparse_index(mut self, sparse: Arc<SparseIndex>) -> Self {
        self.sparse = Some(sparse);
        self
    }

    pub fn with_clause_index(mut self, index: Arc<ClauseIndex>) -> Self {
        self.clause_index = Some(index);
        self
    }

    pub fn with_llm(mut self, llm: Arc<dyn LlmBackend>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_cross_encoder(mut self, encoder: Arc<dyn CrossEncoder>) -> Self {
        self.cross_encoder = Some(encoder);
        self
    }

    pub fn with_web_search(mut self, search: Arc<dyn WebSearch>) -> Self {
        self.web_search = Some(search);
        self
    }

    pub fn with_answer_builder(mut self, builder: Arc<dyn AnswerBuilder>) -> Self {
        self.answer_builder = Some(builder);
        self
    }

    pub fn build(self) -> RetrievalEngine {
        let flags = self.config.flags.clone();
        let timeouts = self.config.timeouts.clone();
        let stats = Arc::new(EngineStats::new());

        let embedding_cache = Arc::new(EmbeddingCache::new(flags.cache_max_size));
        let cached_embedder = Arc::new(CachedEmbedder::new(
            Arc::clone(&self.embedder),
            embedding_cache,
            flags.enable_cache,
        ));

        let executor = HybridExecutor::new(
            Arc::clone(&self.store),
            cached_embedder,
            self.sparse.clone(),
            WORKERS_DEFAULT,
            timeouts.clone(),
            Arc::clone(&stats),
        );

        let llm_cache = flags
            .enable_cache
            .then(|| Arc::new(LlmCache::new(flags.cache_max_size)));

        let rewriter = match (&self.llm, flags.use_llm_rewrites) {
            (Some(llm), true) => QueryRewriter::with_llm(Arc::clone(llm), llm_cache),
            _ => QueryRewriter::rule_based(),
        };

        let understanding = UnderstandingCoordinator::new(
            Arc::new(QueryInterpreter::new()),
            Arc::new(rewriter),
            Arc::new(DomainExpander::new()),
            timeouts.clone(),
        );

        let relation = flags
            .use_relation_entity
            .then(|| Arc::new(RelationEntityProcessor::new(Some(Arc::clone(&self.store)))));

        // Reranker choice: the cross-encoder when enabled (falling back to
        // the keyword scorer if no service is wired), the keyword scorer
        // alone when only LLM-assisted reranking is on, otherwise sort-only.
        let cross_encoder: Option<Arc<dyn CrossEncoder>> = if flags.use_cross_encoder {
            Some(
                self.cross_encoder
                    .unwrap_or_else(|| Arc::new(KeywordScorer::new())),
            )
        } else if flags.use_llm_reranking {
            Some(Arc::new(KeywordScorer::new()))
        } else {
            None
        };

        let rerank = RerankCoordinator::new(
            relation,
            cross_encoder,
            timeouts.clone(),
            Arc::clone(&stats),
        );

        let query_cache = flags.enable_cache.then(|| {
            QueryCache::new(
                Duration::from_secs(flags.cache_ttl_seconds),
                flags.cache_max_size,
            )
        });

        let internet = InternetHandler::new(
            self.web_search,
            Duration::from_secs(timeouts.internet_secs),
        );

        RetrievalEngine {
            normalizer: QueryNormalizer::new(),
            understanding,
            router: VerticalRouter::new(),
            planner: PlanBuilder::new(),
            clause_handler: LegalClauseHandler::new(self.clause_index),
            executor,
            multi_hop: MultiHopExpander::new(),
            internet,
            processor: ResultProcessor::new(),
            predictor: CategoryPredictor::new(),
            rerank,
            store: self.store,
            query_cache,
            stats,
            answer_builder: self.answer_builder,
        }
    }
}

/// The retrieval engine
///
/// Reentrant: all mutable shared state (caches, stats, breaker counter) is
/// internally locked, so one engine serves concurrent queries.
pub struct RetrievalEngine {
    normalizer: QueryNormalizer,
    understanding: UnderstandingCoordinator,
    router: VerticalRouter,
    planner: PlanBuilder,
    clause_handler: LegalClauseHandler,
    executor: HybridExecutor,
    multi_hop: MultiHopExpander,
    internet: InternetHandler,
    processor: ResultProcessor,
    predictor: CategoryPredictor,
    rerank: RerankCoordinator,
    store: Arc<dyn VectorSearch>,
    query_cache: Option<QueryCache>,
    stats: Arc<EngineStats>,
    answer_builder: Option<Arc<dyn AnswerBuilder>>,
}

impl RetrievalEngine {
    pub fn builder(
        config: EngineConfig,
        store: Arc<dyn VectorSearch>,
        embedder: Arc<dyn Embedder>,
    ) -> EngineBuilder {
        EngineBuilder {
            config,
            store,
            embedder,
            sparse: None,
            clause_index: None,
            llm: None,
            cross_encoder: None,
            web_search: None,
            answer_builder: None,
        }
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn stage_stats(&self) -> std::collections::HashMap<String, StageStats> {
        self.stats.stage_stats()
    }

    /// Main retrieval entry point
    pub async fn retrieve(
        &self,
        query: &str,
        opts: RetrieveOptions,
    ) -> Result<RetrievalOutput, RetrievalError> {
        if query.trim().is_empty() {
            return Err(RetrievalError::InvalidInput("empty query".to_string()));
        }

        let start = Instant::now();
        let now_ts = chrono::Utc::now().timestamp();
        let mode = opts
            .custom_plan
            .as_ref()
            .and_then(|c| c.mode)
            .unwrap_or_default();
        let is_qa_mode = mode == Mode::Qa;

        let mut trace_steps = vec!["Understanding your query...".to_string()];
        let mut stage_start = Instant::now();

        // Step 1: normalize, derive the recent-GOs auto-filter
        let normalized_query = self.normalizer.normalize(query);
        tracing::info!(normalized = %normalized_query, "query normalized");

        let auto_filter = recent_go_filter(&normalized_query, now_ts);
        let filter_digest = filter_hash(auto_filter.as_ref().map(|f| f.to_json()).as_ref());

        // Step 2: query cache
        if let Some(ref cache) = self.query_cache {
            if let Some(cached) = cache.get(&normalized_query, &filter_digest, mode.as_str()) {
                self.stats.record_cache_hits(1);
                return Ok(cached);
            }
        }

        // Step 3: legal clause fast path
        if let Some((interpretation, plan, results)) =
            self.clause_handler
                .try_fast_path(query, &normalized_query, opts.top_k)
        {
            trace_steps.push("Answered from the legal clause index.".to_string());
            let mut metadata = Metadata::new();
            metadata.insert("fast_path".to_string(), true.into());
            metadata.insert("clause_indexer_hits".to_string(), (results.len() as u64).into());
            metadata.insert("bypass_full_pipeline".to_string(), true.into());
            metadata.insert("fast_path_confidence".to_string(), 0.95.into());

            let output = self.package(
                query,
                &normalized_query,
                interpretation,
                plan,
                vec![normalized_query.clone()],
                vec![Vertical::Legal.as_str().to_string()],
                results.len(),
                results,
                metadata,
                trace_steps,
                start,
            );
            self.cache_and_record(&normalized_query, &filter_digest, mode, &output);
            return Ok(output);
        }

        // Step 4: understanding (interpretation + rewrites, concurrent)
        trace_steps.push("Expanding and rewriting query...".to_string());
        let num_rewrites = if is_qa_mode { 1 } else { 3 };
        let understanding = self
            .understanding
            .understand(
                &normalized_query,
                mode,
                num_rewrites,
                opts.external_context.as_deref(),
            )
            .await;
        let interpretation = understanding.interpretation.clone();

        self.stats
            .record_stage("query_understanding", stage_start.elapsed().as_secs_f64());
        stage_start = Instant::now();

        // Step 5: routing and planning
        trace_steps.push("Selecting verticals to search...".to_string());
        let verticals = match opts.force_verticals {
            Some(ref forced) if !forced.is_empty() => forced.clone(),
            _ => self.router.route(
                &normalized_query,
                interpretation.query_type,
                &interpretation.detected_entities,
            ),
        };

        let plan = self.planner.build(
            interpretation.query_type,
            interpretation.scope,
            interpretation.needs_internet,
            verticals.len(),
            mode,
            opts.custom_plan.as_ref(),
            opts.top_k,
        );

        // The pool is process-wide; the per-query optimum is only advisory
        let optimal_workers = if is_qa_mode {
            WORKERS_QA
        } else if matches!(
            interpretation.query_type,
            QueryType::Policy | QueryType::Framework | QueryType::Brainstorm
        ) {
            WORKERS_DEEP
        } else {
            WORKERS_DEFAULT
        };
        tracing::debug!(optimal_workers, "worker pool recommendation for this query");

        self.stats
            .record_stage("routing", stage_start.elapsed().as_secs_f64());
        stage_start = Instant::now();

        // Step 6: hybrid retrieval on the original query
        trace_steps.push("Running hybrid retrieval (vector + BM25)...".to_string());
        let mut all_results = self
            .executor
            .execute_hybrid(&normalized_query, &verticals, &plan, 1, auto_filter.as_ref())
            .await;

        if all_results.is_empty() {
            // Both dense and sparse came back empty for the original query
            trace_steps.push(
                "Retrieval failed: no results from vector or keyword search.".to_string(),
            );
            self.stats
                .record_stage("retrieval", stage_start.elapsed().as_secs_f64());
            let output = self.package(
                query,
                &normalized_query,
                interpretation,
                plan,
                understanding.rewrites,
                verticals.iter().map(|v| v.as_str().to_string()).collect(),
                0,
                Vec::new(),
                Metadata::new(),
                trace_steps,
                start,
            );
            self.cache_and_record(&normalized_query, &filter_digest, mode, &output);
            return Ok(output);
        }

        // Early-exit check on hop-1 quality
        let early_exit = early_exit_triggered(&all_results, &interpretation, &normalized_query);
        if early_exit {
            tracing::info!("early exit: excellent hop-1 results, skipping deep stages");
            trace_steps.push("High-quality matches found early, skipping deep search.".to_string());
        }

        // Remaining rewrites, dense-only
        if !early_exit && understanding.expanded_rewrites.len() > 1 {
            let rewrite_results = self
                .executor
                .retrieve_hop(
                    &understanding.expanded_rewrites[1..],
                    &verticals,
                    plan.top_k_per_vertical,
                    1,
                    auto_filter.as_ref(),
                )
                .await;
            all_results.extend(
                self.processor
                    .normalize_scores(rewrite_results, NormalizeMethod::MinMax),
            );
        }

        // Step 7: conditional multi-hop
        let mut hops_executed = 1u8;
        if !early_exit
            && plan.num_hops > 1
            && self.multi_hop.should_run_hop2(
                &all_results,
                &interpretation,
                opts.custom_plan.as_ref(),
            )
        {
            let hop2_queries = self.multi_hop.hop2_queries(&all_results);
            if !hop2_queries.is_empty() {
                trace_steps.push("Following document references (hop 2)...".to_string());
                let hop2 = self
                    .executor
                    .retrieve_hop(
                        &hop2_queries,
                        &verticals,
                        (plan.top_k_per_vertical / 2).max(1),
                        2,
                        auto_filter.as_ref(),
                    )
                    .await;
                all_results.extend(
                    self.processor
                        .normalize_scores(hop2, NormalizeMethod::MinMax),
                );
                hops_executed = 2;
            }
        }

        // Step 8: optional internet layer
        if self
            .internet
            .should_enable(&plan, opts.custom_plan.as_ref())
        {
            trace_steps.push("Searching the internet for recent updates...".to_string());
            let web_results = self.internet.search(query, now_ts).await;
            if !web_results.is_empty() {
                trace_steps.push(format!("Found {} web results.", web_results.len()));
            }
            all_results.extend(web_results);
        }

        self.stats
            .record_stage("retrieval", stage_start.elapsed().as_secs_f64());
        stage_start = Instant::now();

        // Step 9: dedup + supersession partitioning
        let total_candidates = all_results.len();
        let mut unique = self.processor.deduplicate(all_results);
        let dedup_reduction = total_candidates - unique.len();

        // Recency-pinned queries get a time-score adjustment regardless of
        // which reranking phases run later
        if auto_filter.is_some() {
            for result in &mut unique {
                let bonus = crate::scoring::time_score(&result.metadata, now_ts);
                if bonus > 0.5 {
                    result.preserve_raw_score();
                    result.score *= 1.0 + bonus * 0.5;
                    result.set_meta("recency_boost", bonus as f64);
                } else if bonus < -0.5 {
                    result.preserve_raw_score();
                    result.score *= 0.3;
                    result.set_meta("superseded_penalty", bonus as f64);
                }
            }
            unique.sort_by(|a, b| {
                b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal)
            });
        }

        unique = partition_superseded(unique);
        unique.truncate(plan.top_k_total * 2);

        self.stats
            .record_stage("aggregation", stage_start.elapsed().as_secs_f64());
        stage_start = Instant::now();

        // Step 10: reranking (or the lightweight early-exit path)
        let mut output_metadata = Metadata::new();
        let final_results = if early_exit {
            trace_steps.push("Applying lightweight reranking (early exit)...".to_string());
            let predicted = self
                .predictor
                .predict(&normalized_query, interpretation.query_type);
            output_metadata.insert(
                "predicted_categories".to_string(),
                Value::Array(predicted.iter().map(|c| Value::from(c.as_str())).collect()),
            );
            output_metadata.insert("early_exit".to_string(), true.into());
            spread_across_verticals(unique, plan.top_k_total)
        } else {
            let outcome = self
                .rerank
                .rerank(
                    &normalized_query,
                    unique,
                    &interpretation,
                    &plan,
                    is_qa_mode,
                    now_ts,
                    &mut trace_steps,
                )
                .await;

            output_metadata.insert(
                "predicted_categories".to_string(),
                Value::Array(
                    outcome
                        .predicted_categories
                        .iter()
                        .map(|c| Value::from(c.as_str()))
                        .collect(),
                ),
            );
            output_metadata.insert(
                "relation_phases_ran".to_string(),
                outcome.relation_phases_ran.into(),
            );
            output_metadata.insert("deep_phases_ran".to_string(), outcome.deep_phases_ran.into());
            output_metadata.insert(
                "cross_encoder_ran".to_string(),
                outcome.cross_encoder_ran.into(),
            );
            output_metadata.insert("diversity_ran".to_string(), outcome.diversity_ran.into());
            if let Some(reason) = outcome.skip_reason {
                output_metadata.insert("rerank_skip_reason".to_string(), reason.into());
            }

            let mut final_results = outcome.results;

            // Legal-clause rescue when the pipeline starved a clause query
            if self.clause_handler.is_clause_query(&normalized_query) && final_results.len() < 3 {
                let mut rescue = self.clause_handler.lookup_results(&normalized_query);
                if rescue.is_empty() {
                    rescue = self
                        .clause_handler
                        .fallback_scan(self.store.as_ref(), &normalized_query)
                        .await;
                }
                if !rescue.is_empty() {
                    trace_steps.push("Recovered clause matches from the clause index.".to_string());
                    let existing: std::collections::HashSet<String> =
                        final_results.iter().map(|r| r.chunk_id.clone()).collect();
                    let mut merged = rescue;
                    merged.retain(|r| !existing.contains(&r.chunk_id));
                    merged.extend(final_results);
                    merged.truncate(plan.top_k_total);
                    final_results = merged;
                }
            }

            final_results
        };

        // Reranking may rescore superseded documents upward; keep them at
        // the tail of the final set
        let final_results = partition_superseded(final_results);

        self.stats
            .record_stage("reranking", stage_start.elapsed().as_secs_f64());

        output_metadata.insert("num_rewrites".to_string(), (understanding.rewrites.len() as u64).into());
        output_metadata.insert("num_verticals".to_string(), (verticals.len() as u64).into());
        output_metadata.insert("num_hops".to_string(), (hops_executed as u64).into());
        output_metadata.insert("dedup_reduction".to_string(), (dedup_reduction as u64).into());

        trace_steps.push("Building final results...".to_string());

        let output = self.package(
            query,
            &normalized_query,
            interpretation,
            plan,
            understanding.rewrites,
            verticals.iter().map(|v| v.as_str().to_string()).collect(),
            total_candidates,
            final_results,
            output_metadata,
            trace_steps,
            start,
        );
        self.cache_and_record(&normalized_query, &filter_digest, mode, &output);
        Ok(output)
    }

    /// Retrieval plus answer generation via the external collaborator
    pub async fn retrieve_and_answer(
        &self,
        query: &str,
        mode: Mode,
        top_k: Option<usize>,
        validate_answer: bool,
    ) -> Result<(RetrievalOutput, Answer, Option<ValidationReport>), RetrievalError> {
        let Some(ref builder) = self.answer_builder else {
            return Err(RetrievalError::UpstreamUnavailable(
                "no answer builder configured".to_string(),
            ));
        };

        let opts = RetrieveOptions {
            top_k,
            custom_plan: Some(policy_engine_core::CustomPlan {
                mode: Some(mode),
                ..Default::default()
            }),
            ..Default::default()
        };
        let output = self.retrieve(query, opts).await?;

        let answer = builder
            .build(query, &output.results, mode)
            .await
            .map_err(|e| RetrievalError::UpstreamUnavailable(e.to_string()))?;

        let validation = if validate_answer {
            match builder.validate(&answer, &output.results, query).await {
                Ok(report) => {
                    self.stats.add_validation_score(report.quality_score);
                    if !report.is_valid {
                        tracing::warn!(
                            issues = report.issues.len(),
                            "answer validation flagged issues"
                        );
                    }
                    Some(report)
                }
                Err(e) => {
                    tracing::warn!(error = %e, "answer validation failed");
                    None
                }
            }
        } else {
            None
        };

        Ok((output, answer, validation))
    }

    #[allow(clippy::too_many_arguments)]
    fn package(
        &self,
        query: &str,
        normalized_query: &str,
        interpretation: Interpretation,
        plan: RetrievalPlan,
        rewrites: Vec<String>,
        verticals_searched: Vec<String>,
        total_candidates: usize,
        mut results: Vec<RetrievalResult>,
        metadata: Metadata,
        trace_steps: Vec<String>,
        start: Instant,
    ) -> RetrievalOutput {
        results.truncate(plan.top_k_total.max(1));
        for result in &mut results {
            result.preserve_raw_score();
            if result.score > 1.0 {
                result.score = 1.0;
            }
        }
        let final_count = results.len();

        RetrievalOutput {
            query: query.to_string(),
            normalized_query: normalized_query.to_string(),
            interpretation,
            plan,
            rewrites,
            verticals_searched,
            results,
            total_candidates,
            final_count,
            processing_time_seconds: start.elapsed().as_secs_f64(),
            metadata,
            trace_steps,
        }
    }

    fn cache_and_record(
        &self,
        normalized_query: &str,
        filter_digest: &str,
        mode: Mode,
        output: &RetrievalOutput,
    ) {
        self.stats.record_query(output.processing_time_seconds);
        self.stats
            .record_stage("total", output.processing_time_seconds);

        if let Some(ref cache) = self.query_cache {
            cache.set(normalized_query, filter_digest, mode.as_str(), output.clone());
        }
    }
}

/// Auto-pin filters for "recent GOs" queries: the go vertical, an 18-month
/// issue-date window (rounded to start of day for cache stability), and the
/// department when one is named.
fn recent_go_filter(normalized_query: &str, now_ts: i64) -> Option<SearchFilter> {
    let lower = normalized_query.to_lowercase();
    let mentions_go = lower.contains("government order") || lower.split_whitespace().any(|w| w == "go");
    if !(lower.contains("recent") && mentions_go) {
        return None;
    }

    let start_of_day = (now_ts / 86_400) * 86_400;
    let window_start = start_of_day - RECENT_GO_WINDOW_DAYS * 86_400;

    let mut filter = SearchFilter::new()
        .must_match("vertical", "go")
        .must_range("date_issued_ts", Some(window_start as f64), None);

    if lower.contains("school education") {
        filter = filter.must_match("department", "School Education");
    }

    tracing::info!("auto-pinned filters for recent GOs query (last 18 months)");
    Some(filter)
}

/// Early exit fires on excellent hop-1 scores for simple narrow qa queries
fn early_exit_triggered(
    results: &[RetrievalResult],
    interpretation: &Interpretation,
    normalized_query: &str,
) -> bool {
    let mut raw: Vec<f32> = results.iter().map(|r| r.raw_score()).collect();
    raw.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
    let top: Vec<f32> = raw.into_iter().take(3).collect();

    if top.len() < 3 {
        return false;
    }
    let max = top.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let avg = top.iter().sum::<f32>() / top.len() as f32;

    let excellent = max > EARLY_EXIT_MAX && avg > EARLY_EXIT_AVG;
    let simple = interpretation.query_type == QueryType::Qa
        && interpretation.scope == QueryScope::Narrow
        && normalized_query.split_whitespace().count() < 10;

    excellent && simple
}

/// Move superseded documents to the tail, preserving relative order
fn partition_superseded(results: Vec<RetrievalResult>) -> Vec<RetrievalResult> {
    let (active, superseded): (Vec<_>, Vec<_>) = results
        .into_iter()
        .partition(|r| !r.meta_bool("is_superseded"));

    let mut out = active;
    out.extend(superseded);
    out
}

/// Lightweight early-exit selection: best chunk per vertical first, then fill
/// by score
fn spread_across_verticals(results: Vec<RetrievalResult>, top_k: usize) -> Vec<RetrievalResult> {
    let mut sorted = results;
    sorted.sort_by(|a, b| {
        b.raw_score()
            .partial_cmp(&a.raw_score())
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut selected: Vec<RetrievalResult> = Vec::with_capacity(top_k);
    let mut seen_verticals: std::collections::HashSet<String> = std::collections::HashSet::new();
    let mut leftovers: Vec<RetrievalResult> = Vec::new();

    for result in sorted {
        if selected.len() >= top_k {
            break;
        }
        if seen_verticals.insert(result.vertical.clone()) {
            selected.push(result);
        } else {
            leftovers.push(result);
        }
    }

    for result in leftovers {
        if selected.len() >= top_k {
            break;
        }
        selected.push(result);
    }

    selected.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    selected
}

#[cfg(test)]
mod tests {
    use super::*;
    use policy_engine_core::Metadata as Meta;

    fn result(chunk_id: &str, score: f32, vertical: &str) -> RetrievalResult {
        let mut r = RetrievalResult {
            chunk_id: chunk_id.to_string(),
            doc_id: chunk_id.to_string(),
            content: String::new(),
            score,
            vertical: vertical.to_string(),
            metadata: Meta::new(),
            rewrite_source: "original".to_string(),
            hop_number: 1,
        };
        r.preserve_raw_score();
        r
    }

    #[test]
    fn test_recent_go_filter_detection() {
        assert!(recent_go_filter("recent government orders from school education", 1_700_000_000)
            .is_some());
        assert!(recent_go_filter("teacher transfer rules", 1_700_000_000).is_none());

        let filter = recent_go_filter(
            "recent government orders from school education department",
            1_700_000_000,
        )
        .unwrap();
        let json = filter.to_json();
        assert_eq!(json["must"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn test_recent_go_filter_cache_stable_within_day() {
        let a = recent_go_filter("recent government orders", 1_700_000_000).unwrap();
        let b = recent_go_filter("recent government orders", 1_700_000_500).unwrap();
        assert_eq!(a.to_json(), b.to_json());
    }

    #[test]
    fn test_partition_superseded_moves_to_tail() {
        let mut superseded = result("old", 0.9, "go");
        superseded.set_meta("is_superseded", true);
        let results = vec![superseded, result("current", 0.5, "go")];

        let partitioned = partition_superseded(results);
        assert_eq!(partitioned[0].chunk_id, "current");
        assert_eq!(partitioned[1].chunk_id, "old");
    }

    #[test]
    fn test_spread_prefers_vertical_coverage() {
        let results = vec![
            result("l1", 0.9, "legal"),
            result("l2", 0.85, "legal"),
            result("g1", 0.8, "go"),
            result("d1", 0.7, "data"),
        ];
        let selected = spread_across_verticals(results, 3);
        let verticals: std::collections::HashSet<&str> =
            selected.iter().map(|r| r.vertical.as_str()).collect();
        assert_eq!(verticals.len(), 3);
    }

    #[test]
    fn test_early_exit_requires_simple_query_and_quality() {
        let good = vec![
            result("a", 0.9, "legal"),
            result("b", 0.85, "legal"),
            result("c", 0.8, "legal"),
        ];
        let narrow_qa = Interpretation {
            query_type: QueryType::Qa,
            scope: QueryScope::Narrow,
            needs_internet: false,
            needs_deep_mode: false,
            confidence: 0.9,
            detected_entities: Default::default(),
            keywords: vec![],
            temporal_references: vec![],
            reasoning: String::new(),
        };
        assert!(early_exit_triggered(&good, &narrow_qa, "what is section 12"));

        let mut broad = narrow_qa.clone();
        broad.scope = QueryScope::Broad;
        assert!(!early_exit_triggered(&good, &broad, "what is section 12"));

        let weak = vec![
            result("a", 0.6, "legal"),
            result("b", 0.5, "legal"),
            result("c", 0.4, "legal"),
        ];
        assert!(!early_exit_triggered(&weak, &narrow_qa, "what is section 12"));
    }
}
