//! Reranking coordination
//!
//! Gates and schedules the relation/entity phases, the cross-encoder, and the
//! diversity pass. Phase 1 relation scoring is cheap and runs whenever
//! enabled; phases 2-4 are skipped for qa-mode queries, for already-good
//! result sets, and while the circuit breaker is open. The cross-encoder
//! rescores the relation-enhanced intermediate set, and the diversity pass
//! always runs last.

use std::sync::Arc;
use std::time::Duration;

use policy_engine_config::constants::retrieval::{GOOD_ENOUGH_AVG, GOOD_ENOUGH_MAX};
use policy_engine_config::settings::TimeoutSettings;
use policy_engine_core::{Interpretation, QueryType, RetrievalPlan, RetrievalResult};

use crate::cross_encoder::{candidate_cap, CrossEncoder, RerankCandidate};
use crate::diversity::{CategoryPredictor, DiversityReranker, PolicyCategory};
use crate::relation::{PhaseToggles, RelationEntityProcessor};
use crate::stats::EngineStats;

/// What the reranking pass did, for trace metadata
pub struct RerankOutcome {
    pub results: Vec<RetrievalResult>,
    pub predicted_categories: Vec<PolicyCategory>,
    pub relation_phases_ran: bool,
    pub deep_phases_ran: bool,
    pub cross_encoder_ran: bool,
    pub diversity_ran: bool,
    pub skip_reason: Option<&'static str>,
}

/// Coordinates all reranking stages
pub struct RerankCoordinator {
    predictor: CategoryPredictor,
    diversity: DiversityReranker,
    relation: Option<Arc<RelationEntityProcessor>>,
    cross_encoder: Option<Arc<dyn CrossEncoder>>,
    timeouts: TimeoutSettings,
    stats: Arc<EngineStats>,
}

impl RerankCoordinator {
    pub fn new(
        relation: Option<Arc<RelationEntityProcessor>>,
        cross_encoder: Option<Arc<dyn CrossEncoder>>,
        timeouts: TimeoutSettings,
        stats: Arc<EngineStats>,
    ) -> Self {
        Self {
            predictor: CategoryPredictor::new(),
            diversity: DiversityReranker::new(),
            relation,
            cross_encoder,
            timeouts,
            stats,
        }
    }

    pub async fn rerank(
        &self,
        normalized_query: &str,
        results: Vec<RetrievalResult>,
        interpretation: &Interpretation,
        plan: &RetrievalPlan,
        is_qa_mode: bool,
        now_ts: i64,
        trace_steps: &mut Vec<String>,
    ) -> RerankOutcome {
        let predicted_categories = self
            .predictor
            .predict(normalized_query, interpretation.query_type);

        let mut skip_reason: Option<&'static str> = None;

        // Phase 2-4 gating
        let simple_qa = interpretation.query_type == QueryType::Qa
            && interpretation.confidence > 0.8
            && normalized_query.split_whitespace().count() < 8;

        let top_raw: Vec<f32> = results.iter().take(3).map(|r| r.raw_score()).collect();
        let already_good = top_raw.len() >= 3
            && top_raw.iter().copied().fold(f32::NEG_INFINITY, f32::max) > GOOD_ENOUGH_MAX
            && top_raw.iter().sum::<f32>() / top_raw.len() as f32 > GOOD_ENOUGH_AVG;

        let mut deep_phases = self.relation.is_some() && !is_qa_mode && !simple_qa;
        if deep_phases && already_good {
            deep_phases = false;
            skip_reason = Some("already_good");
            tracing::info!("skipping relation-entity phases 2-4 (high-quality results already)");
        }
        if deep_phases && self.stats.breaker_open() {
            deep_phases = false;
            skip_reason = Some("circuit_breaker");
            tracing::warn!(
                recent_timeouts = self.stats.recent_timeouts(),
                "circuit breaker open, skipping relation-entity phases 2-4"
            );
        }

        let (relation_enhanced, relation_ran) = match &self.relation {
            Some(processor) => {
                trace_steps.push("Checking superseded policies and relations...".to_string());
                let toggles = PhaseToggles {
                    relation_scoring: true,
                    entity_matching: deep_phases,
                    entity_expansion: deep_phases,
                    bidirectional_search: deep_phases,
                };
                let budget = if interpretation.needs_deep_mode {
                    Duration::from_secs(self.timeouts.relation_deep_secs)
                } else {
                    Duration::from_secs(self.timeouts.relation_secs)
                };

                let fallback = results.clone();
                match tokio::time::timeout(
                    budget,
                    processor.process(normalized_query, results, &toggles, now_ts),
                )
                .await
                {
                    Ok(enhanced) => {
                        self.stats.record_clean_success();
                        (enhanced, true)
                    }
                    Err(_) => {
                        self.stats.record_timeout();
                        tracing::warn!(
                            budget_secs = budget.as_secs(),
                            "relation-entity processing timed out, using original results"
                        );
                        (fallback, false)
                    }
                }
            }
            None => (results, false),
        };

        // Cross-encoder on the relation-enhanced intermediate set
        let (mut reranked, cross_ran) = self
            .cross_encode(normalized_query, relation_enhanced, plan, trace_steps)
            .await;

        reranked.truncate(plan.rerank_top_k.max(1));

        // Diversity pass
        let mut diversity_ran = false;
        let final_results = if plan.diversity_weight <= f32::EPSILON {
            let mut out = reranked;
            out.truncate(plan.top_k_total);
            out
        } else if self.diversity.already_diverse(&reranked) {
            tracing::info!("skipping diversity reranking (top results already span verticals)");
            let mut out = reranked;
            out.truncate(plan.top_k_total);
            out
        } else {
            diversity_ran = true;
            trace_steps.push("Applying diversity reranking...".to_string());
            self.diversity.rerank(
                reranked,
                &predicted_categories,
                plan.top_k_total,
                plan.diversity_weight,
            )
        };

        RerankOutcome {
            results: final_results,
            predicted_categories,
            relation_phases_ran: relation_ran,
            deep_phases_ran: relation_ran && deep_phases,
            cross_encoder_ran: cross_ran,
            diversity_ran,
            skip_reason,
        }
    }

    async fn cross_encode(
        &self,
        query: &str,
        mut results: Vec<RetrievalResult>,
        plan: &RetrievalPlan,
        trace_steps: &mut Vec<String>,
    ) -> (Vec<RetrievalResult>, bool) {
        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

        let Some(ref encoder) = self.cross_encoder else {
            return (results, false);
        };

        trace_steps.push("Applying cross-encoder reranking...".to_string());

        let pool = results
            .len()
            .min(candidate_cap(plan.mode).max(plan.rerank_top_k));
        let candidates: Vec<RerankCandidate> = results[..pool]
            .iter()
            .map(|r| RerankCandidate {
                content: r.content.clone(),
                score: r.score,
            })
            .collect();

        let budget = Duration::from_secs(self.timeouts.cross_encoder_secs);
        match tokio::time::timeout(
            budget,
            encoder.rerank(query, &candidates, plan.rerank_top_k, plan.mode),
        )
        .await
        {
            Ok(Ok(scores)) => {
                for (result, score) in results.iter_mut().zip(scores) {
                    result.preserve_raw_score();
                    result.score = score;
                    result.set_meta("cross_encoder_score", score as f64);
                }
                results.sort_by(|a, b| {
                    b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal)
                });
                (results, true)
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "cross-encoder failed, keeping prior ordering");
                (results, false)
            }
            Err(_) => {
                tracing::warn!(
                    budget_secs = self.timeouts.cross_encoder_secs,
                    "cross-encoder timed out, keeping prior ordering"
                );
                (results, false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cross_encoder::KeywordScorer;
    use policy_engine_core::{Metadata, PlanMode, QueryScope};
    use std::collections::HashMap;

    fn result(chunk_id: &str, score: f32, content: &str) -> RetrievalResult {
        let mut r = RetrievalResult {
            chunk_id: chunk_id.to_string(),
            doc_id: chunk_id.to_string(),
            content: content.to_string(),
            score,
            vertical: "go".to_string(),
            metadata: Metadata::new(),
            rewrite_source: "original".to_string(),
            hop_number: 1,
        };
        r.preserve_raw_score();
        r
    }

    fn interpretation(query_type: QueryType, confidence: f32) -> Interpretation {
        Interpretation {
            query_type,
            scope: QueryScope::Medium,
            needs_internet: false,
            needs_deep_mode: false,
            confidence,
            detected_entities: HashMap::new(),
            keywords: vec![],
            temporal_references: vec![],
            reasoning: String::new(),
        }
    }

    fn plan(rerank_top_k: usize, top_k_total: usize, diversity_weight: f32) -> RetrievalPlan {
        RetrievalPlan {
            num_rewrites: 1,
            num_hops: 1,
            top_k_per_vertical: 10,
            top_k_total,
            use_internet: false,
            use_hybrid: true,
            rerank_top_k,
            diversity_weight,
            mode: PlanMode::Policy,
        }
    }

    fn coordinator(stats: Arc<EngineStats>) -> RerankCoordinator {
        RerankCoordinator::new(
            Some(Arc::new(RelationEntityProcessor::new(None))),
            Some(Arc::new(KeywordScorer::new())),
            TimeoutSettings::default(),
            stats,
        )
    }

    #[tokio::test]
    async fn test_qa_mode_skips_deep_phases() {
        let stats = Arc::new(EngineStats::new());
        let coord = coordinator(stats);
        let results = vec![result("a", 0.5, "teacher order"), result("b", 0.4, "other")];
        let mut trace = Vec::new();

        let outcome = coord
            .rerank(
                "teacher order",
                results,
                &interpretation(QueryType::Qa, 0.9),
                &plan(10, 10, 0.0),
                true,
                0,
                &mut trace,
            )
            .await;

        assert!(outcome.relation_phases_ran);
        assert!(!outcome.deep_phases_ran);
    }

    #[tokio::test]
    async fn test_good_results_skip_deep_phases() {
        let stats = Arc::new(EngineStats::new());
        let coord = coordinator(stats);
        let results = vec![
            result("a", 0.9, "teacher order"),
            result("b", 0.85, "teacher order two"),
            result("c", 0.8, "teacher order three"),
        ];
        let mut trace = Vec::new();

        let outcome = coord
            .rerank(
                "education policy analysis for the state",
                results,
                &interpretation(QueryType::Policy, 0.6),
                &plan(10, 10, 0.0),
                false,
                0,
                &mut trace,
            )
            .await;

        assert!(!outcome.deep_phases_ran);
        assert_eq!(outcome.skip_reason, Some("already_good"));
    }

    #[tokio::test]
    async fn test_circuit_breaker_skips_deep_phases() {
        let stats = Arc::new(EngineStats::new());
        for _ in 0..4 {
            stats.record_timeout();
        }
        let coord = coordinator(Arc::clone(&stats));
        let results = vec![
            result("a", 0.4, "one"),
            result("b", 0.3, "two"),
            result("c", 0.2, "three"),
        ];
        let mut trace = Vec::new();

        let outcome = coord
            .rerank(
                "education policy analysis for the state",
                results,
                &interpretation(QueryType::Policy, 0.6),
                &plan(10, 10, 0.0),
                false,
                0,
                &mut trace,
            )
            .await;

        assert!(!outcome.deep_phases_ran);
        assert_eq!(outcome.skip_reason, Some("circuit_breaker"));
        // Phase 1 completed cleanly, so the breaker heals one step
        assert_eq!(stats.recent_timeouts(), 3);
    }

    #[tokio::test]
    async fn test_cross_encoder_rescoring() {
        let stats = Arc::new(EngineStats::new());
        let coord = coordinator(stats);
        // Lower-scored chunk is actually the better keyword match
        let results = vec![
            result("weak", 0.9, "unrelated budget circular"),
            result("strong", 0.5, "teacher transfer counselling order"),
        ];
        let mut trace = Vec::new();

        let outcome = coord
            .rerank(
                "teacher transfer counselling policy details",
                results,
                &interpretation(QueryType::Policy, 0.6),
                &plan(10, 10, 0.0),
                false,
                0,
                &mut trace,
            )
            .await;

        assert!(outcome.cross_encoder_ran);
        assert_eq!(outcome.results[0].chunk_id, "strong");
        assert!(outcome.results[0].meta_f64("cross_encoder_score").is_some());
    }

    #[tokio::test]
    async fn test_diversity_skipped_at_zero_weight_and_bounds_hold() {
        let stats = Arc::new(EngineStats::new());
        let coord = coordinator(stats);
        let results: Vec<RetrievalResult> = (0..8)
            .map(|i| result(&format!("r{}", i), 0.9 - i as f32 * 0.1, "teacher"))
            .collect();
        let mut trace = Vec::new();

        let outcome = coord
            .rerank(
                "education policy analysis for the state",
                results,
                &interpretation(QueryType::Policy, 0.6),
                &plan(5, 3, 0.0),
                false,
                0,
                &mut trace,
            )
            .await;

        assert!(!outcome.diversity_ran);
        assert!(outcome.results.len() <= 3);
    }
}
