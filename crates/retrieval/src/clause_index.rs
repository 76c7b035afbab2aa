//! Legal clause fast path
//!
//! Detects queries asking for a specific section/rule/article, answers them
//! from a clause index built over the legal collection's payloads, and
//! short-circuits the full pipeline when the lookup is confident. Also serves
//! as the last-resort rescue when a legal-clause query ends up with fewer
//! than three results.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;

use policy_engine_core::{
    Interpretation, Metadata, PlanMode, QueryScope, QueryType, RetrievalPlan, RetrievalResult,
    Vertical,
};

use crate::vector_store::VectorSearch;
use crate::RetrievalError;

static CLAUSE_QUERY_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)\b(?:section|clause|article|rule|sub-rule|amendment)\s+\d+",
        r"(?i)\b(?:rte|education)\s+(?:act\s+)?section\s+\d+",
        r"(?i)\bsection\s+\d+\s+(?:of\s+)?(?:the\s+)?(?:rte|right to education|education)\b",
        r"\b\d+\(\d+\)\(\w+\)",
        r"(?i)\b(?:act|rule|regulation)\s+\d+",
        r"(?i)\b(?:go|government\s+order)\s+(?:no\.?\s*)?\d+",
        // Tolerate normalization placeholder artifacts
        r"__preserved_\d+__",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

const LEGAL_KEYWORDS: &[&str] = &["section", "article", "rule", "clause", "act"];

static CLAUSE_REF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(section|rule|article|clause)\s+(\d+(?:\(\w+\))*)").unwrap()
});
static HAS_DIGIT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d").unwrap());

/// A clause entry extracted from one legal chunk
#[derive(Debug, Clone)]
struct ClauseEntry {
    chunk_id: String,
    doc_id: String,
    content: String,
    payload: Metadata,
}

/// One confident clause match
#[derive(Debug, Clone)]
pub struct ClauseMatch {
    pub chunk_id: String,
    pub doc_id: String,
    pub content: String,
    pub confidence: f32,
    pub payload: Metadata,
}

/// Index from clause keys ("section 12(1)(c)", "rule 9") to legal chunks
pub struct ClauseIndex {
    by_key: HashMap<String, Vec<usize>>,
    entries: Vec<ClauseEntry>,
}

impl ClauseIndex {
    /// Build the index by scanning the legal collection's payload text
    pub async fn build(store: &dyn VectorSearch) -> Result<Self, RetrievalError> {
        let mut entries = Vec::new();
        let mut by_key: HashMap<String, Vec<usize>> = HashMap::new();
        let collection = Vertical::Legal.collection_name();
        let mut offset: Option<String> = None;

        loop {
            let (points, next) = store.scroll(collection, None, 500, offset).await?;

            for point in points {
                let content = point
                    .payload
                    .get("content")
                    .or_else(|| point.payload.get("text"))
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string();
                if content.is_empty() {
                    continue;
                }

                let keys = extract_clause_keys(&content);
                if keys.is_empty() {
                    continue;
                }

                let doc_id = point
                    .payload
                    .get("doc_id")
                    .and_then(|v| v.as_str())
                    .unwrap_or(&point.id)
                    .to_string();

                let idx = entries.len();
                entries.push(ClauseEntry {
                    chunk_id: point.id.clone(),
                    doc_id,
                    content,
                    payload: point.payload,
                });
                for key in keys {
                    by_key.entry(key).or_default().push(idx);
                }
            }

            offset = next;
            if offset.is_none() {
                break;
            }
        }

        tracing::info!(
            clauses = by_key.len(),
            chunks = entries.len(),
            "clause index built"
        );

        Ok(Self { by_key, entries })
    }

    /// Look up clause references found in the query
    ///
    /// Full references ("section 12(1)(c)") match at confidence 0.95, base
    /// references ("section 12") at 0.8.
    pub fn lookup(&self, query: &str) -> Vec<ClauseMatch> {
        let mut matches: Vec<ClauseMatch> = Vec::new();

        for caps in CLAUSE_REF.captures_iter(query) {
            let kind = caps[1].to_lowercase();
            let full_ref = format!("{} {}", kind, caps[2].to_lowercase());
            let base_num = caps[2]
                .split('(')
                .next()
                .unwrap_or(&caps[2])
                .to_lowercase();
            let base_ref = format!("{} {}", kind, base_num);

            for (key, confidence) in [(full_ref, 0.95f32), (base_ref, 0.8f32)] {
                if let Some(indices) = self.by_key.get(&key) {
                    for &idx in indices {
                        let entry = &self.entries[idx];
                        if matches.iter().any(|m| m.chunk_id == entry.chunk_id) {
                            continue;
                        }
                        matches.push(ClauseMatch {
                            chunk_id: entry.chunk_id.clone(),
                            doc_id: entry.doc_id.clone(),
                            content: entry.content.clone(),
                            confidence,
                            payload: entry.payload.clone(),
                        });
                    }
                }
            }
        }

        matches.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        matches
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn extract_clause_keys(content: &str) -> Vec<String> {
    let mut keys = Vec::new();

    for caps in CLAUSE_REF.captures_iter(content) {
        let kind = caps[1].to_lowercase();
        let reference = caps[2].to_lowercase();

        keys.push(format!("{} {}", kind, reference));

        // Also index the base number so "section 12" finds "section 12(1)(c)"
        if let Some(base) = reference.split('(').next() {
            let base_key = format!("{} {}", kind, base);
            if !keys.contains(&base_key) {
                keys.push(base_key);
            }
        }
    }

    keys.dedup();
    keys
}

/// Legal clause query handling: detection, fast path, rescue
pub struct LegalClauseHandler {
    index: Option<Arc<ClauseIndex>>,
}

impl LegalClauseHandler {
    pub fn new(index: Option<Arc<ClauseIndex>>) -> Self {
        Self { index }
    }

    /// Is the query asking for a specific legal clause?
    pub fn is_clause_query(&self, query: &str) -> bool {
        if CLAUSE_QUERY_PATTERNS.iter().any(|p| p.is_match(query)) {
            return true;
        }

        // Heuristic: legal keyword plus any digit
        let lower = query.to_lowercase();
        LEGAL_KEYWORDS.iter().any(|k| lower.contains(k)) && HAS_DIGIT.is_match(query)
    }

    /// Clause index lookup converted into retrieval results
    pub fn lookup_results(&self, query: &str) -> Vec<RetrievalResult> {
        let Some(ref index) = self.index else {
            return Vec::new();
        };

        index
            .lookup(query)
            .into_iter()
            .map(|m| {
                let mut metadata = m.payload;
                metadata.insert("source".to_string(), "clause_index".into());
                RetrievalResult {
                    chunk_id: m.chunk_id,
                    doc_id: m.doc_id,
                    content: m.content,
                    score: m.confidence,
                    vertical: Vertical::Legal.as_str().to_string(),
                    metadata,
                    rewrite_source: "clause_index".to_string(),
                    hop_number: 1,
                }
            })
            .collect()
    }

    /// Try the fast path; fires only with >= 2 confident index matches
    ///
    /// The lookup uses the original query (normalization placeholders would
    /// mask the clause numbers).
    pub fn try_fast_path(
        &self,
        original_query: &str,
        normalized_query: &str,
        top_k: Option<usize>,
    ) -> Option<(Interpretation, RetrievalPlan, Vec<RetrievalResult>)> {
        if !self.is_clause_query(normalized_query) {
            return None;
        }
        self.index.as_ref()?;

        let clause_results = self.lookup_results(original_query);
        if clause_results.len() < 2 {
            return None;
        }

        tracing::info!(
            hits = clause_results.len(),
            "legal clause fast path engaged"
        );

        let mut detected_entities = HashMap::new();
        detected_entities.insert(
            "legal_clauses".to_string(),
            vec![normalized_query.to_string()],
        );

        let interpretation = Interpretation {
            query_type: QueryType::Qa,
            scope: QueryScope::Narrow,
            needs_internet: false,
            needs_deep_mode: false,
            confidence: 0.95,
            detected_entities,
            keywords: vec![normalized_query.to_lowercase()],
            temporal_references: Vec::new(),
            reasoning: "legal clause fast path detected".to_string(),
        };

        let final_top_k = top_k.unwrap_or(10).min(clause_results.len()).max(1);
        let plan = RetrievalPlan {
            num_rewrites: 1,
            num_hops: 1,
            top_k_per_vertical: final_top_k,
            top_k_total: final_top_k,
            use_internet: false,
            use_hybrid: false,
            rerank_top_k: final_top_k,
            diversity_weight: 0.0,
            mode: PlanMode::FastClauseLookup,
        };

        let mut results = clause_results;
        results.truncate(final_top_k);

        Some((interpretation, plan, results))
    }

    /// Exact clause scan over the legal collection, used when everything else
    /// came back empty
    pub async fn fallback_scan(
        &self,
        store: &dyn VectorSearch,
        query: &str,
    ) -> Vec<RetrievalResult> {
        let mut patterns: Vec<String> = Vec::new();
        for caps in CLAUSE_REF.captures_iter(&query.to_lowercase()) {
            patterns.push(format!("{} {}", &caps[1], &caps[2]));
            if let Some(base) = caps[2].split('(').next() {
                patterns.push(format!("({})", base));
            }
        }
        if patterns.is_empty() {
            return Vec::new();
        }
        patterns.truncate(2);

        let collection = Vertical::Legal.collection_name();
        let mut results = Vec::new();
        let mut offset: Option<String> = None;

        // Bounded scan; this path only runs for starved legal queries
        for _ in 0..4 {
            let page = match store.scroll(collection, None, 100, offset).await {
                Ok(page) => page,
                Err(e) => {
                    tracing::warn!(error = %e, "fallback clause scan failed");
                    break;
                }
            };

            for point in &page.0 {
                let content = point
                    .payload
                    .get("content")
                    .or_else(|| point.payload.get("text"))
                    .and_then(|v| v.as_str())
                    .unwrap_or("");
                let content_lower = content.to_lowercase();

                if patterns.iter().any(|p| content_lower.contains(p.as_str())) {
                    let doc_id = point
                        .payload
                        .get("doc_id")
                        .and_then(|v| v.as_str())
                        .unwrap_or(&point.id)
                        .to_string();
                    results.push(RetrievalResult {
                        chunk_id: point.id.clone(),
                        doc_id,
                        content: content.to_string(),
                        score: 1.0,
                        vertical: Vertical::Legal.as_str().to_string(),
                        metadata: point.payload.clone(),
                        rewrite_source: "fallback_clause_scan".to_string(),
                        hop_number: 1,
                    });
                }
            }

            offset = page.1;
            if offset.is_none() || results.len() >= 3 {
                break;
            }
        }

        results.truncate(3);
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector_store::MemoryStore;
    use serde_json::json;

    fn legal_payload(content: &str, doc_id: &str) -> Metadata {
        let mut payload = Metadata::new();
        payload.insert("content".to_string(), json!(content));
        payload.insert("doc_id".to_string(), json!(doc_id));
        payload
    }

    async fn seeded_index() -> Arc<ClauseIndex> {
        let store = MemoryStore::new();
        let collection = Vertical::Legal.collection_name();
        store.insert(
            collection,
            "c1",
            vec![1.0],
            legal_payload(
                "Section 12(1)(c) of the Act mandates 25 percent admissions for weaker sections.",
                "rte_act",
            ),
        );
        store.insert(
            collection,
            "c2",
            vec![1.0],
            legal_payload(
                "Commentary on Section 12(1)(c): private unaided schools shall reserve seats.",
                "rte_commentary",
            ),
        );
        store.insert(
            collection,
            "c3",
            vec![1.0],
            legal_payload("Rule 9 prescribes working days for schools.", "ap_rules"),
        );
        Arc::new(ClauseIndex::build(&store).await.unwrap())
    }

    #[test]
    fn test_clause_query_detection() {
        let handler = LegalClauseHandler::new(None);
        assert!(handler.is_clause_query("what is section 12 of rte act"));
        assert!(handler.is_clause_query("explain 12(1)(c)"));
        assert!(handler.is_clause_query("rule 9 working days"));
        assert!(!handler.is_clause_query("teacher transfer guidelines"));
    }

    #[tokio::test]
    async fn test_index_lookup_full_and_base_refs() {
        let index = seeded_index().await;

        let full = index.lookup("What is Section 12(1)(c) of RTE Act?");
        assert_eq!(full.len(), 2);
        assert!((full[0].confidence - 0.95).abs() < 1e-6);

        let base = index.lookup("Explain Section 12");
        assert!(!base.is_empty());
        assert!((base[0].confidence - 0.8).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_fast_path_fires_with_two_matches() {
        let index = seeded_index().await;
        let handler = LegalClauseHandler::new(Some(index));

        let (interpretation, plan, results) = handler
            .try_fast_path(
                "What is Section 12(1)(c) of RTE Act?",
                "what is Section 12(1)(c) of right to education act?",
                Some(10),
            )
            .expect("fast path should fire");

        assert_eq!(interpretation.query_type, QueryType::Qa);
        assert_eq!(interpretation.scope, QueryScope::Narrow);
        assert!(interpretation.confidence >= 0.95);
        assert_eq!(plan.mode, PlanMode::FastClauseLookup);
        assert_eq!(plan.num_rewrites, 1);
        assert!((plan.diversity_weight - 0.0).abs() < 1e-6);
        assert!(results.len() >= 2);
        assert!(results.len() <= 10);
        assert_eq!(plan.rerank_top_k, results.len());
    }

    #[tokio::test]
    async fn test_fast_path_declines_single_match() {
        let index = seeded_index().await;
        let handler = LegalClauseHandler::new(Some(index));

        // Only one chunk mentions rule 9
        assert!(handler
            .try_fast_path("Rule 9 working days", "rule 9 working days", None)
            .is_none());
    }

    #[tokio::test]
    async fn test_fallback_scan_finds_exact_clause() {
        let store = MemoryStore::new();
        store.insert(
            Vertical::Legal.collection_name(),
            "c9",
            vec![1.0],
            legal_payload("Under section 17 no capitation fee shall be charged.", "rte_act"),
        );
        let handler = LegalClauseHandler::new(None);

        let results = handler.fallback_scan(&store, "section 17 capitation").await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk_id, "c9");
        assert!((results[0].score - 1.0).abs() < 1e-6);
    }
}
