//! Retrieval result types

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Arbitrary payload metadata carried with every result
///
/// Holds the raw vector-store payload plus reranker-assigned annotations
/// (raw_score, rrf_score, currency_status, entity matches, ...).
pub type Metadata = serde_json::Map<String, Value>;

/// A single generated query rewrite
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rewrite {
    pub text: String,
    /// Policy domain the rewrite targets (infrastructure_safety, ...)
    pub target_domain: String,
    pub rationale: String,
}

/// One retrieved chunk with provenance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalResult {
    /// Unique, stable chunk identifier
    pub chunk_id: String,
    pub doc_id: String,
    pub content: String,
    /// Normalized relevance score in [0, 1]
    pub score: f32,
    /// Vertical name, or "internet" for web results
    pub vertical: String,
    #[serde(default)]
    pub metadata: Metadata,
    /// Which rewrite produced this result
    pub rewrite_source: String,
    /// 1 or 2
    pub hop_number: u8,
}

impl RetrievalResult {
    /// Pre-normalization score if preserved, otherwise the current score
    pub fn raw_score(&self) -> f32 {
        self.metadata
            .get("raw_score")
            .and_then(Value::as_f64)
            .map(|v| v as f32)
            .unwrap_or(self.score)
    }

    /// Record the current score as `raw_score`, exactly once
    pub fn preserve_raw_score(&mut self) {
        if !self.metadata.contains_key("raw_score") {
            self.metadata
                .insert("raw_score".to_string(), Value::from(self.score as f64));
        }
    }

    /// String-valued metadata field
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    /// Numeric metadata field
    pub fn meta_f64(&self, key: &str) -> Option<f64> {
        self.metadata.get(key).and_then(Value::as_f64)
    }

    /// Boolean metadata field (false when absent)
    pub fn meta_bool(&self, key: &str) -> bool {
        self.metadata
            .get(key)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn set_meta(&mut self, key: &str, value: impl Into<Value>) {
        self.metadata.insert(key.to_string(), value.into());
    }
}

/// Final packaged output of one retrieval call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalOutput {
    pub query: String,
    pub normalized_query: String,
    pub interpretation: crate::Interpretation,
    pub plan: crate::RetrievalPlan,
    pub rewrites: Vec<String>,
    pub verticals_searched: Vec<String>,
    pub results: Vec<RetrievalResult>,
    /// Candidates seen before dedup/reranking
    pub total_candidates: usize,
    /// len(results); always <= plan.top_k_total
    pub final_count: usize,
    pub processing_time_seconds: f64,
    /// Which stages ran, which were skipped and why, category predictions
    #[serde(default)]
    pub metadata: Metadata,
    /// Human-readable narration of the pipeline decisions
    pub trace_steps: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RetrievalResult {
        RetrievalResult {
            chunk_id: "c1".to_string(),
            doc_id: "d1".to_string(),
            content: "text".to_string(),
            score: 0.42,
            vertical: "legal".to_string(),
            metadata: Metadata::new(),
            rewrite_source: "original".to_string(),
            hop_number: 1,
        }
    }

    #[test]
    fn test_raw_score_preserved_once() {
        let mut r = sample();
        r.preserve_raw_score();
        r.score = 1.0;
        r.preserve_raw_score();
        assert!((r.raw_score() - 0.42).abs() < 1e-6);
    }

    #[test]
    fn test_meta_helpers() {
        let mut r = sample();
        r.set_meta("is_web", true);
        r.set_meta("section_type", "orders");
        assert!(r.meta_bool("is_web"));
        assert_eq!(r.meta_str("section_type"), Some("orders"));
        assert!(!r.meta_bool("missing"));
    }
}
