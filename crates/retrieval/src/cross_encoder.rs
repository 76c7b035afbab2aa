//! Cross-encoder reranking
//!
//! High-precision pairwise scoring of the top candidates. The production
//! implementation calls an external reranking service; when none is
//! configured the keyword scorer provides a TF-IDF-flavoured fallback so the
//! stage never disappears entirely.

use std::collections::HashSet;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use policy_engine_config::constants::endpoints;
use policy_engine_core::PlanMode;

use crate::RetrievalError;

/// One candidate passed to the reranker
#[derive(Debug, Clone, Serialize)]
pub struct RerankCandidate {
    pub content: String,
    pub score: f32,
}

/// Pairwise reranking model
#[async_trait]
pub trait CrossEncoder: Send + Sync {
    /// Score every candidate against the query; returns one score per
    /// candidate, in input order
    async fn rerank(
        &self,
        query: &str,
        candidates: &[RerankCandidate],
        top_k: usize,
        mode: PlanMode,
    ) -> Result<Vec<f32>, RetrievalError>;
}

/// Mode-adaptive cap on how many candidates are worth pairwise scoring
pub fn candidate_cap(mode: PlanMode) -> usize {
    match mode {
        PlanMode::Qa | PlanMode::Compliance | PlanMode::FastClauseLookup => 20,
        PlanMode::Policy | PlanMode::Framework => 40,
        PlanMode::DeepThink | PlanMode::Brainstorm => 60,
    }
}

#[derive(Debug, Serialize)]
struct RerankRequest<'a> {
    query: &'a str,
    documents: &'a [RerankCandidate],
    top_k: usize,
    mode: &'a str,
}

#[derive(Debug, Deserialize)]
struct RerankResponse {
    scores: Vec<f32>,
}

/// HTTP client for an external cross-encoder service
pub struct HttpCrossEncoder {
    client: Client,
    endpoint: String,
}

impl HttpCrossEncoder {
    pub fn new(endpoint: Option<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.unwrap_or_else(|| endpoints::RERANKER_DEFAULT.clone()),
        }
    }
}

#[async_trait]
impl CrossEncoder for HttpCrossEncoder {
    async fn rerank(
        &self,
        query: &str,
        candidates: &[RerankCandidate],
        top_k: usize,
        mode: PlanMode,
    ) -> Result<Vec<f32>, RetrievalError> {
        let url = format!("{}/rerank", self.endpoint);
        let request = RerankRequest {
            query,
            documents: candidates,
            top_k,
            mode: mode.as_str(),
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| RetrievalError::Reranker(format!("rerank request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(RetrievalError::Reranker(format!(
                "rerank failed: {}",
                response.status()
            )));
        }

        let parsed: RerankResponse = response
            .json()
            .await
            .map_err(|e| RetrievalError::Reranker(format!("bad rerank response: {}", e)))?;

        if parsed.scores.len() != candidates.len() {
            return Err(RetrievalError::Reranker(format!(
                "rerank score count mismatch: {} candidates, {} scores",
                candidates.len(),
                parsed.scores.len()
            )));
        }

        Ok(parsed.scores)
    }
}

const STOPWORDS: &[&str] = &[
    "the", "a", "an", "is", "are", "was", "were", "be", "been", "have", "has", "had", "do",
    "does", "did", "will", "would", "could", "should", "may", "might", "must", "can", "to",
    "of", "in", "for", "on", "with", "at", "by", "from", "as", "into", "and", "but", "if",
    "or", "what", "which", "who", "this", "that", "these", "those", "about", "how", "why",
];

/// Keyword-overlap scorer used when no cross-encoder service is configured
///
/// Term frequency with diminishing returns, a length-based specificity
/// weight, position weighting for early query terms, and a coverage bonus.
#[derive(Debug, Default)]
pub struct KeywordScorer;

impl KeywordScorer {
    pub fn new() -> Self {
        Self
    }

    pub fn score(query: &str, document: &str) -> f32 {
        let stopwords: HashSet<&str> = STOPWORDS.iter().copied().collect();
        let query_lower = query.to_lowercase();
        let doc_lower = document.to_lowercase();

        let query_terms: Vec<&str> = query_lower
            .split_whitespace()
            .filter(|w| w.len() > 1 && !stopwords.contains(w))
            .collect();
        if query_terms.is_empty() {
            return 0.0;
        }

        let doc_words: Vec<&str> = doc_lower.split_whitespace().collect();
        let doc_len = doc_words.len().max(1) as f32;

        let mut total = 0.0f32;
        let mut matched = 0usize;

        for (pos, term) in query_terms.iter().enumerate() {
            let tf = doc_words.iter().filter(|w| *w == term).count() as f32;
            if tf == 0.0 {
                continue;
            }
            matched += 1;

            let tf_score = tf.sqrt();
            let specificity = (1.0 + term.len() as f32).ln();
            let position_weight = 1.0 / (1.0 + pos as f32 * 0.1);
            let length_norm = 1.0 / (1.0 + (doc_len / 50.0).sqrt());

            total += tf_score * specificity * position_weight * length_norm;
        }

        let coverage = matched as f32 / query_terms.len() as f32;
        let raw = total + coverage * 0.3;
        (raw / (raw + 1.0)).min(1.0)
    }
}

#[async_trait]
impl CrossEncoder for KeywordScorer {
    async fn rerank(
        &self,
        query: &str,
        candidates: &[RerankCandidate],
        _top_k: usize,
        _mode: PlanMode,
    ) -> Result<Vec<f32>, RetrievalError> {
        Ok(candidates
            .iter()
            .map(|c| Self::score(query, &c.content))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_scorer_relevance_ordering() {
        let specific = KeywordScorer::score(
            "midday meal scheme eligibility",
            "Midday meal scheme eligibility requires enrollment in a government school",
        );
        let generic = KeywordScorer::score(
            "midday meal scheme eligibility",
            "The department issues various orders on many subjects",
        );
        assert!(specific > generic);
    }

    #[test]
    fn test_keyword_scorer_stopwords_ignored() {
        assert_eq!(KeywordScorer::score("the of and", "any document"), 0.0);
    }

    #[test]
    fn test_candidate_caps_grow_with_depth() {
        assert!(candidate_cap(PlanMode::Qa) < candidate_cap(PlanMode::Policy));
        assert!(candidate_cap(PlanMode::Policy) < candidate_cap(PlanMode::DeepThink));
    }

    #[tokio::test]
    async fn test_keyword_scorer_as_cross_encoder() {
        let scorer = KeywordScorer::new();
        let candidates = vec![
            RerankCandidate {
                content: "teacher transfer counselling order".to_string(),
                score: 0.5,
            },
            RerankCandidate {
                content: "unrelated budget circular".to_string(),
                score: 0.5,
            },
        ];
        let scores = scorer
            .rerank("teacher transfer", &candidates, 2, PlanMode::Qa)
            .await
            .unwrap();
        assert_eq!(scores.len(), 2);
        assert!(scores[0] > scores[1]);
    }
}
