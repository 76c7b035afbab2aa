//! Multi-hop expansion
//!
//! Hop-2 runs only when hop-1 results are weak, the query type is deep, or
//! the caller explicitly asked for deep search. Hop-2 queries are the GO and
//! section references extracted from the top hop-1 contents.

use once_cell::sync::Lazy;
use regex::Regex;

use policy_engine_config::constants::retrieval::MULTI_HOP_MAX_SCORE;
use policy_engine_core::{CustomPlan, Interpretation, QueryType, RetrievalResult};

static GO_REF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)GO\.?\s*(?:Ms\.?|Rt\.?)?\s*No\.?\s*\d+").unwrap());
static SECTION_REF: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)Section\s+\d+").unwrap());

/// Multi-hop expander
#[derive(Debug, Default)]
pub struct MultiHopExpander;

impl MultiHopExpander {
    pub fn new() -> Self {
        Self
    }

    /// Should hop-2 run at all?
    pub fn should_run_hop2(
        &self,
        hop1_results: &[RetrievalResult],
        interpretation: &Interpretation,
        custom: Option<&CustomPlan>,
    ) -> bool {
        if hop1_results.is_empty() {
            return false;
        }

        if custom.and_then(|c| c.deep_search).unwrap_or(false) {
            return true;
        }

        if matches!(
            interpretation.query_type,
            QueryType::Policy | QueryType::Framework | QueryType::Brainstorm
        ) {
            return true;
        }

        let max_raw = hop1_results
            .iter()
            .take(5)
            .map(|r| r.raw_score())
            .fold(f32::NEG_INFINITY, f32::max);

        max_raw < MULTI_HOP_MAX_SCORE
    }

    /// Derive hop-2 queries from the top hop-1 contents
    ///
    /// Up to three GO references and three section references from the ten
    /// highest-scored chunks.
    pub fn hop2_queries(&self, hop1_results: &[RetrievalResult]) -> Vec<String> {
        let mut top: Vec<&RetrievalResult> = hop1_results.iter().collect();
        top.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

        let mut go_refs: Vec<String> = Vec::new();
        let mut sections: Vec<String> = Vec::new();

        for result in top.iter().take(10) {
            for m in GO_REF.find_iter(&result.content).take(2) {
                let term = m.as_str().to_string();
                if go_refs.len() < 3 && !go_refs.contains(&term) {
                    go_refs.push(term);
                }
            }
            for m in SECTION_REF.find_iter(&result.content).take(2) {
                let term = m.as_str().to_string();
                if sections.len() < 3 && !sections.contains(&term) {
                    sections.push(term);
                }
            }
        }

        go_refs.extend(sections);
        go_refs
    }
}
