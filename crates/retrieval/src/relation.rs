//! Relation- and entity-aware reranking
//!
//! Four phases, gated per query by the coordinator:
//! 1. Relation scoring: downrank superseded documents, boost superseding
//!    documents, amendments, implementations, important citations, and
//!    governance relations; then 1-hop neighbor expansion along
//!    amends/supersedes edges from the top results.
//! 2. Entity matching: weighted overlap between query entities and payload
//!    entities, plus recency boosts when the query carries recency intent.
//! 3. Entity expansion: pull additional documents sharing the most frequent
//!    entities of the top results, restricted to payload-indexed fields.
//! 4. Bidirectional search: find documents whose relations target a result
//!    with supersedes/amends, downranking the target and adding the source.
//!
//! Relation graphs may be cyclic; relations are treated as data, dereferenced
//! at most one hop, and guarded by a seen-set of chunk ids.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use policy_engine_core::{Metadata, RetrievalResult, Vertical};

use crate::scoring::time_score;
use crate::vector_store::{FilterCondition, SearchFilter, VectorSearch};

/// Entity payload fields with a vector-store payload index
///
/// Filter queries on anything else would fail upstream; newcomers must be
/// added here explicitly once indexed.
const INDEXED_ENTITY_FIELDS: &[&str] = &[
    "departments",
    "acts",
    "schemes",
    "go_numbers",
    "sections",
    "go_refs",
];

const SUPERSEDED_PHRASES: &[&str] = &[
    "superseded",
    "replaced by",
    "substituted by",
    "cancelled",
    "withdrawn",
    "modified by",
    "updated by",
];

const SUPERSEDES_PHRASES: &[&str] = &["supersedes", "replaces", "substitutes", "hereby cancels"];

const IMPORTANT_CITATION_TERMS: &[&str] = &[
    "right to education",
    "rte",
    "education act",
    "constitution",
    "section",
    "rule",
    "article",
    "government order",
    "fundamental rights",
];

const RECENCY_WORDS: &[&str] = &["recent", "recently", "latest", "new", "current"];

/// Entity type weights for overlap scoring
const ENTITY_WEIGHTS: &[(&str, f32)] = &[
    ("go_numbers", 1.5),
    ("sections", 1.4),
    ("articles", 1.3),
    ("acts", 1.2),
    ("schemes", 1.1),
    ("departments", 1.0),
    ("dates", 0.8),
];

static FORMAL_ENTITY_PATTERNS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    vec![
        (
            "go_numbers",
            Regex::new(r"(?i)(?:go|government order|govt order)[\s.]?(?:ms|rt)[\s.]?no[\s.]?(\d+)")
                .unwrap(),
        ),
        (
            "sections",
            Regex::new(r"(?i)section[\s.]?(\d+(?:\(\w+\))*)").unwrap(),
        ),
        ("articles", Regex::new(r"(?i)article[\s.]?(\d+[a-z]?)").unwrap()),
        (
            "acts",
            Regex::new(r"(?i)(rte|right to education|education|cce)[\s.]?act").unwrap(),
        ),
        (
            "schemes",
            Regex::new(r"(?i)(nadu[- ]nedu|amma vodi|vidya kanuka|gorumudda|midday meal)").unwrap(),
        ),
        (
            "departments",
            Regex::new(r"(?i)(school education|higher education|finance|revenue)[\s.]?department")
                .unwrap(),
        ),
        ("dates", Regex::new(r"(\d{1,2}[-/]\d{1,2}[-/]\d{4})").unwrap()),
        ("years", Regex::new(r"\b(20\d{2})\b").unwrap()),
    ]
});

static INFORMAL_ENTITY_PATTERNS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    vec![
        ("go_numbers", Regex::new(r"(?i)\bg\.?o\.?s?\b").unwrap()),
        ("go_numbers", Regex::new(r"(?i)\bgovernment\s+orders?\b").unwrap()),
        ("sections", Regex::new(r"(?i)\bsections?\b").unwrap()),
        ("sections", Regex::new(r"(?i)\bprovisions?\b").unwrap()),
        ("schemes", Regex::new(r"(?i)\bschemes?\b").unwrap()),
        ("departments", Regex::new(r"(?i)\bschool\s+education\b").unwrap()),
        ("departments", Regex::new(r"(?i)\beducation\s+department\b").unwrap()),
        ("keywords", Regex::new(r"(?i)\bteacher\b").unwrap()),
        ("keywords", Regex::new(r"(?i)\btransfer\b").unwrap()),
        ("keywords", Regex::new(r"(?i)\brecent(?:ly)?\b").unwrap()),
        ("keywords", Regex::new(r"(?i)\blatest\b").unwrap()),
        ("keywords", Regex::new(r"(?i)\bnew\b").unwrap()),
        ("keywords", Regex::new(r"(?i)\bcurrent\b").unwrap()),
    ]
});

/// Which phases to run for a query
#[derive(Debug, Clone)]
pub struct PhaseToggles {
    pub relation_scoring: bool,
    pub entity_matching: bool,
    pub entity_expansion: bool,
    pub bidirectional_search: bool,
}

impl Default for PhaseToggles {
    fn default() -> Self {
        Self {
            relation_scoring: true,
            entity_matching: true,
            entity_expansion: true,
            bidirectional_search: false,
        }
    }
}

/// Combined relation/entity processor
pub struct RelationEntityProcessor {
    store: Option<Arc<dyn VectorSearch>>,
}

impl RelationEntityProcessor {
    pub fn new(store: Option<Arc<dyn VectorSearch>>) -> Self {
        Self { store }
    }

    /// Run the enabled phases over a result set
    pub async fn process(
        &self,
        query: &str,
        mut results: Vec<RetrievalResult>,
        phases: &PhaseToggles,
        now_ts: i64,
    ) -> Vec<RetrievalResult> {
        if phases.relation_scoring {
            results = self.apply_relation_scoring(results);
            results = self.expand_with_neighbors(results, 5).await;
            results = final_relation_rerank(results);
        }

        if phases.entity_matching {
            results = enhance_with_entities(query, results, now_ts);
        }

        if phases.entity_expansion {
            results = self.expand_by_entities(results, 10).await;
        }

        if phases.bidirectional_search {
            results = self.bidirectional_search(results).await;
        }

        results
    }

    /// Phase 1: score adjustments from the relations payload
    fn apply_relation_scoring(&self, mut results: Vec<RetrievalResult>) -> Vec<RetrievalResult> {
        let mut superseded = 0usize;
        let mut boosted = 0usize;

        for result in &mut results {
            let relations = relations_of(&result.metadata);
            let relation_types = relation_types_of(&result.metadata, &relations);

            if let Some(source) = superseded_signal(result, &relations) {
                result.score *= 0.4;
                result.set_meta("currency_status", "superseded");
                result.set_meta("currency_source", source);
                superseded += 1;
            }

            if let Some(source) = supersedes_signal(result, &relations, &relation_types) {
                result.score *= 1.3;
                result.set_meta("currency_status", "current");
                result.set_meta("currency_source", source);
                boosted += 1;
            }

            let mut boost = 1.0f32;
            if relation_types.iter().any(|t| t == "amends") {
                boost *= 1.15;
            }
            if relation_types.iter().any(|t| t == "implements") {
                boost *= 1.1;
            }
            if relation_types.iter().any(|t| t == "cites") && cites_important_refs(&relations) {
                boost *= 1.1;
            }
            if relation_types.iter().any(|t| t == "governed_by") {
                boost *= 1.08;
            }

            if (boost - 1.0).abs() > f32::EPSILON {
                result.score *= boost;
                result.set_meta("relation_boost_applied", boost as f64);
                result.set_meta(
                    "relation_types_found",
                    Value::Array(relation_types.iter().map(|t| Value::from(t.clone())).collect()),
                );
                boosted += 1;
            }
        }

        tracing::debug!(superseded, boosted, "relation scoring applied");
        results
    }

    /// Phase 1b: 1-hop neighbor expansion along amends/supersedes edges
    ///
    /// Only the top 20 results seed the walk, and GO families that already
    /// have a recent document are skipped.
    async fn expand_with_neighbors(
        &self,
        results: Vec<RetrievalResult>,
        max_neighbors: usize,
    ) -> Vec<RetrievalResult> {
        let Some(ref store) = self.store else {
            return results;
        };

        const VALID_RELS: [&str; 4] = ["amends", "supersedes", "amended_by", "superseded_by"];

        let recent_go_numbers: HashSet<String> = results
            .iter()
            .take(20)
            .filter(|r| r.meta_f64("year").map(|y| y >= 2024.0).unwrap_or(false))
            .filter_map(|r| r.meta_str("go_number").map(str::to_string))
            .collect();

        let seen: HashSet<String> = results.iter().map(|r| r.chunk_id.clone()).collect();

        let mut targets: Vec<(String, f32)> = Vec::new();
        for result in results.iter().take(20) {
            for relation in relations_of(&result.metadata) {
                let rel_type = relation
                    .get("relation_type")
                    .or_else(|| relation.get("type"))
                    .and_then(Value::as_str)
                    .unwrap_or("");
                if !VALID_RELS.contains(&rel_type) {
                    continue;
                }
                let Some(target) = relation.get("target").and_then(Value::as_str) else {
                    continue;
                };

                if recent_go_numbers.iter().any(|go| target.contains(go.as_str())) {
                    continue;
                }
                if targets.iter().any(|(t, _)| t == target) {
                    continue;
                }
                targets.push((target.to_string(), result.score));
                if targets.len() >= max_neighbors {
                    break;
                }
            }
            if targets.len() >= max_neighbors {
                break;
            }
        }

        if targets.is_empty() {
            return results;
        }

        // Single batched fetch for all id-like targets
        let ids: Vec<String> = targets.iter().map(|(t, _)| t.clone()).collect();
        let fetched = match store.retrieve(Vertical::Go.collection_name(), &ids).await {
            Ok(points) => points,
            Err(e) => {
                tracing::warn!(error = %e, "neighbor fetch failed");
                return results;
            }
        };

        let mut all_results = results;
        let mut added = 0usize;

        for point in fetched {
            if seen.contains(&point.id) || added >= max_neighbors {
                continue;
            }
            let parent_score = targets
                .iter()
                .find(|(t, _)| *t == point.id)
                .map(|(_, s)| *s)
                .unwrap_or(0.5);

            let mut neighbor = point_to_result(point, Vertical::Go.as_str());
            neighbor.score = parent_score * 0.8;
            neighbor.set_meta("neighbor_expansion", true);
            neighbor.rewrite_source = "neighbor_expansion".to_string();
            all_results.push(neighbor);
            added += 1;
        }

        if added > 0 {
            tracing::debug!(added, "neighbors fetched via 1-hop expansion");
        }
        all_results
    }

    /// Phase 3: find additional documents sharing the top results' entities
    async fn expand_by_entities(
        &self,
        results: Vec<RetrievalResult>,
        max_expansions: usize,
    ) -> Vec<RetrievalResult> {
        let Some(ref store) = self.store else {
            return results;
        };

        let top_entities = most_frequent_entities(&results[..results.len().min(5)]);
        if top_entities.is_empty() {
            return results;
        }

        let mut filter = SearchFilter::new();
        for (entity_type, values) in &top_entities {
            if !INDEXED_ENTITY_FIELDS.contains(&entity_type.as_str()) {
                tracing::debug!(field = %entity_type, "skipping unindexed entity field");
                continue;
            }
            for value in values.iter().take(2) {
                filter = filter.should_match(format!("entities.{}", entity_type), value.clone());
            }
        }
        if filter.is_empty() {
            return results;
        }

        let page = match store
            .scroll(Vertical::Go.collection_name(), Some(&filter), max_expansions, None)
            .await
        {
            Ok((points, _)) => points,
            Err(e) => {
                tracing::warn!(error = %e, "entity expansion query failed");
                return results;
            }
        };

        let existing_docs: HashSet<String> = results.iter().map(|r| r.doc_id.clone()).collect();
        let existing_chunks: HashSet<String> = results.iter().map(|r| r.chunk_id.clone()).collect();
        let mut all_results = results;

        for point in page {
            if existing_chunks.contains(&point.id) {
                continue;
            }
            let mut expansion = point_to_result(point, Vertical::Go.as_str());
            if existing_docs.contains(&expansion.doc_id) {
                continue;
            }
            expansion.score = 0.6;
            expansion.set_meta("found_via_relation", "entity_expansion");
            expansion.set_meta("found_via_entity", true);
            expansion.rewrite_source = "entity_expansion".to_string();
            all_results.push(expansion);
        }

        all_results
    }

    /// Phase 4: bidirectional relation search for currency detection
    async fn bidirectional_search(
        &self,
        mut results: Vec<RetrievalResult>,
    ) -> Vec<RetrievalResult> {
        let Some(ref store) = self.store else {
            return results;
        };

        let top_docs: Vec<(String, String)> = results
            .iter()
            .take(10)
            .map(|r| (r.chunk_id.clone(), r.doc_id.clone()))
            .collect();
        let seen: HashSet<String> = results.iter().map(|r| r.chunk_id.clone()).collect();
        let mut additions: Vec<RetrievalResult> = Vec::new();

        for (chunk_id, doc_id) in top_docs {
            for (rel_type, boost) in [("supersedes", 1.5f32), ("amends", 1.2f32)] {
                let filter = SearchFilter::new().must_nested(
                    "relations",
                    vec![
                        FilterCondition::Match {
                            key: "target".to_string(),
                            value: Value::from(doc_id.clone()),
                        },
                        FilterCondition::Match {
                            key: "relation_type".to_string(),
                            value: Value::from(rel_type),
                        },
                    ],
                );

                let points = match store
                    .scroll(Vertical::Go.collection_name(), Some(&filter), 5, None)
                    .await
                {
                    Ok((points, _)) => points,
                    Err(e) => {
                        tracing::warn!(doc_id = %doc_id, error = %e, "bidirectional search failed");
                        continue;
                    }
                };

                if points.is_empty() {
                    continue;
                }

                if rel_type == "supersedes" {
                    if let Some(original) = results.iter_mut().find(|r| r.chunk_id == chunk_id) {
                        original.score *= 0.3;
                        original.set_meta("is_superseded", true);
                        original.set_meta("currency_source", "relations");
                        original.set_meta(
                            "superseded_by",
                            Value::Array(points.iter().map(|p| Value::from(p.id.clone())).collect()),
                        );
                    }
                }

                for point in points {
                    if seen.contains(&point.id)
                        || additions.iter().any(|r| r.chunk_id == point.id)
                    {
                        continue;
                    }
                    let mut added = point_to_result(point, Vertical::Go.as_str());
                    added.score = boost;
                    match rel_type {
                        "supersedes" => {
                            added.set_meta("is_superseding", true);
                            added.set_meta("supersedes", doc_id.clone());
                            added.set_meta("found_via_relation", "bidirectional_supersedes");
                        }
                        _ => {
                            added.set_meta("is_amendment", true);
                            added.set_meta("amends", doc_id.clone());
                            added.set_meta("found_via_relation", "bidirectional_amends");
                        }
                    }
                    added.rewrite_source = "bidirectional_search".to_string();
                    additions.push(added);
                }
            }
        }

        results.extend(additions);
        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        results
    }
}

fn relations_of(metadata: &Metadata) -> Vec<serde_json::Map<String, Value>> {
    metadata
        .get("relations")
        .and_then(Value::as_array)
        .map(|rels| {
            rels.iter()
                .filter_map(Value::as_object)
                .cloned()
                .collect()
        })
        .unwrap_or_default()
}

fn relation_types_of(
    metadata: &Metadata,
    relations: &[serde_json::Map<String, Value>],
) -> Vec<String> {
    let declared: Vec<String> = metadata
        .get("relation_types")
        .and_then(Value::as_array)
        .map(|types| {
            types
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    // Backfill from the relations array when the declared list is missing or
    // degenerate
    if declared.is_empty() || declared == ["unknown"] {
        let mut backfilled: Vec<String> = relations
            .iter()
            .filter_map(|rel| {
                rel.get("relation_type")
                    .or_else(|| rel.get("type"))
                    .and_then(Value::as_str)
            })
            .map(str::to_string)
            .collect();
        backfilled.sort();
        backfilled.dedup();
        backfilled
    } else {
        declared
    }
}

fn superseded_signal(
    result: &RetrievalResult,
    relations: &[serde_json::Map<String, Value>],
) -> Option<&'static str> {
    let structured = result.meta_bool("is_superseded")
        || relations.iter().any(|rel| {
            rel.get("relation_type")
                .or_else(|| rel.get("type"))
                .and_then(Value::as_str)
                == Some("superseded_by")
        });
    if structured {
        return Some("relations");
    }

    let content_lower = result.content.to_lowercase();
    if SUPERSEDED_PHRASES.iter().any(|p| content_lower.contains(p)) {
        return Some("content");
    }
    None
}

fn supersedes_signal(
    result: &RetrievalResult,
    relations: &[serde_json::Map<String, Value>],
    relation_types: &[String],
) -> Option<&'static str> {
    let structured = relation_types.iter().any(|t| t == "supersedes")
        || relations.iter().any(|rel| {
            rel.get("relation_type")
                .or_else(|| rel.get("type"))
                .and_then(Value::as_str)
                == Some("supersedes")
        });
    if structured {
        return Some("relations");
    }

    let content_lower = result.content.to_lowercase();
    if SUPERSEDES_PHRASES.iter().any(|p| content_lower.contains(p)) {
        return Some("content");
    }
    None
}

fn cites_important_refs(relations: &[serde_json::Map<String, Value>]) -> bool {
    relations.iter().any(|rel| {
        rel.get("relation_type").and_then(Value::as_str) == Some("cites")
            && rel
                .get("target")
                .and_then(Value::as_str)
                .map(|target| {
                    let target_lower = target.to_lowercase();
                    IMPORTANT_CITATION_TERMS.iter().any(|t| target_lower.contains(t))
                })
                .unwrap_or(false)
    })
}

fn final_relation_rerank(mut results: Vec<RetrievalResult>) -> Vec<RetrievalResult> {
    results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

    for (i, result) in results.iter_mut().enumerate() {
        if i < 5 && result.meta_str("currency_status") == Some("current") {
            result.score *= 1.05;
        }
        if i < 3 && result.metadata.contains_key("neighbor_expansion") {
            result.score *= 0.95;
        }
    }

    results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    results
}

/// Phase 2: entity overlap boosting and recency adjustment
fn enhance_with_entities(
    query: &str,
    mut results: Vec<RetrievalResult>,
    now_ts: i64,
) -> Vec<RetrievalResult> {
    let query_entities = extract_query_entities(query);
    if query_entities.is_empty() {
        return results;
    }

    let wants_recent = query_entities
        .get("keywords")
        .map(|keywords| {
            keywords
                .iter()
                .any(|k| RECENCY_WORDS.contains(&k.to_lowercase().as_str()))
        })
        .unwrap_or(false);

    let mut enhanced = 0usize;

    for result in &mut results {
        let result_entities = result_entity_map(result);
        let (overlap, matched) = entity_overlap(&query_entities, &result_entities);

        if overlap > 0.0 {
            let boost = 1.0 + overlap * 0.3;
            result.score *= boost;
            result.set_meta("entity_overlap_score", overlap as f64);
            result.set_meta("entity_boost_applied", boost as f64);
            result.set_meta(
                "matched_entities",
                Value::Object(
                    matched
                        .into_iter()
                        .map(|(k, v)| {
                            (k, Value::Array(v.into_iter().map(Value::from).collect()))
                        })
                        .collect(),
                ),
            );
            enhanced += 1;
        }

        if wants_recent {
            let bonus = time_score(&result.metadata, now_ts);
            if bonus > 0.5 {
                result.score *= 1.0 + bonus * 0.5;
                result.set_meta("recency_boost", bonus as f64);
            } else if bonus < -0.5 {
                result.score *= 0.3;
                result.set_meta("superseded_penalty", bonus as f64);
            }
        }
    }

    tracing::debug!(enhanced, wants_recent, "entity matching applied");
    results
}

/// Query entities via formal patterns first, informal fallbacks second
fn extract_query_entities(query: &str) -> HashMap<String, Vec<String>> {
    let mut entities: HashMap<String, Vec<String>> = HashMap::new();

    for (entity_type, pattern) in FORMAL_ENTITY_PATTERNS.iter() {
        for caps in pattern.captures_iter(query) {
            let value = caps
                .get(1)
                .map(|m| m.as_str())
                .unwrap_or_else(|| caps.get(0).map(|m| m.as_str()).unwrap_or(""))
                .to_lowercase();
            if value.is_empty() {
                continue;
            }
            let bucket = entities.entry(entity_type.to_string()).or_default();
            if !bucket.contains(&value) {
                bucket.push(value);
            }
        }
    }

    for (entity_type, pattern) in INFORMAL_ENTITY_PATTERNS.iter() {
        if let Some(m) = pattern.find(query) {
            let bucket = entities.entry(entity_type.to_string()).or_default();
            let value = m.as_str().to_lowercase();
            if !bucket.contains(&value) {
                bucket.push(value);
            }
        }
    }

    entities.retain(|_, v| !v.is_empty());
    entities
}

/// Entities carried by a result, with direct-field and doc-id fallbacks
fn result_entity_map(result: &RetrievalResult) -> HashMap<String, Vec<String>> {
    let mut entities: HashMap<String, Vec<String>> = HashMap::new();

    if let Some(Value::Object(structured)) = result.metadata.get("entities") {
        for (entity_type, values) in structured {
            let list = match values {
                Value::Array(items) => items
                    .iter()
                    .filter_map(|v| match v {
                        Value::String(s) => Some(s.to_lowercase()),
                        other => Some(other.to_string()),
                    })
                    .collect(),
                Value::String(s) => vec![s.to_lowercase()],
                other => vec![other.to_string()],
            };
            entities.insert(entity_type.clone(), list);
        }
    }

    let direct_fields: [(&str, &[&str]); 4] = [
        ("go_numbers", &["go_number", "go_num"]),
        ("sections", &["section", "sections", "mentioned_sections"]),
        ("departments", &["department", "departments"]),
        ("years", &["year"]),
    ];
    for (entity_type, fields) in direct_fields {
        for field in fields {
            if let Some(value) = result.metadata.get(*field) {
                let bucket = entities.entry(entity_type.to_string()).or_default();
                match value {
                    Value::Array(items) => {
                        for item in items {
                            if let Some(s) = item.as_str() {
                                bucket.push(s.to_lowercase());
                            }
                        }
                    }
                    Value::String(s) => bucket.push(s.to_lowercase()),
                    Value::Number(n) => bucket.push(n.to_string()),
                    _ => {}
                }
            }
        }
    }

    // The doc id itself often encodes the GO identity
    let doc_lower = result.doc_id.to_lowercase();
    if doc_lower.contains("ms") || doc_lower.contains("go") || doc_lower.starts_with("20") {
        entities
            .entry("go_numbers".to_string())
            .or_default()
            .push(doc_lower);
    }

    for bucket in entities.values_mut() {
        bucket.sort();
        bucket.dedup();
    }
    entities
}

fn entity_weight(entity_type: &str) -> f32 {
    ENTITY_WEIGHTS
        .iter()
        .find(|(t, _)| *t == entity_type)
        .map(|(_, w)| *w)
        .unwrap_or(1.0)
}

/// Weighted Jaccard overlap across entity types; also returns the matches
fn entity_overlap(
    query_entities: &HashMap<String, Vec<String>>,
    result_entities: &HashMap<String, Vec<String>>,
) -> (f32, HashMap<String, Vec<String>>) {
    if query_entities.is_empty() || result_entities.is_empty() {
        return (0.0, HashMap::new());
    }

    let mut total = 0.0f32;
    let mut max_possible = 0.0f32;
    let mut matched: HashMap<String, Vec<String>> = HashMap::new();

    for (entity_type, query_values) in query_entities {
        let weight = entity_weight(entity_type);
        max_possible += weight;

        let Some(result_values) = result_entities.get(entity_type) else {
            continue;
        };

        let query_set: HashSet<&String> = query_values.iter().collect();
        let result_set: HashSet<&String> = result_values.iter().collect();
        let intersection: Vec<String> = query_set
            .intersection(&result_set)
            .map(|s| (*s).clone())
            .collect();
        let union = query_set.union(&result_set).count();

        if union > 0 && !intersection.is_empty() {
            total += (intersection.len() as f32 / union as f32) * weight;
            matched.insert(entity_type.clone(), intersection);
        }
    }

    if max_possible == 0.0 {
        (0.0, matched)
    } else {
        (total / max_possible, matched)
    }
}

/// Most frequent entities across the top results, up to three values per type
fn most_frequent_entities(results: &[RetrievalResult]) -> HashMap<String, Vec<String>> {
    let mut counts: HashMap<String, HashMap<String, usize>> = HashMap::new();

    for result in results {
        for (entity_type, values) in result_entity_map(result) {
            let type_counts = counts.entry(entity_type).or_default();
            for value in values {
                *type_counts.entry(value).or_insert(0) += 1;
            }
        }
    }

    counts
        .into_iter()
        .map(|(entity_type, type_counts)| {
            let mut ranked: Vec<(String, usize)> = type_counts.into_iter().collect();
            ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
            (
                entity_type,
                ranked.into_iter().take(3).map(|(v, _)| v).collect(),
            )
        })
        .collect()
}

fn point_to_result(point: crate::vector_store::PointHit, vertical: &str) -> RetrievalResult {
    let content = point
        .payload
        .get("content")
        .or_else(|| point.payload.get("text"))
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    let doc_id = point
        .payload
        .get("doc_id")
        .and_then(Value::as_str)
        .unwrap_or(&point.id)
        .to_string();
    let vertical = point
        .payload
        .get("vertical")
        .and_then(Value::as_str)
        .unwrap_or(vertical)
        .to_string();

    RetrievalResult {
        chunk_id: point.id,
        doc_id,
        content,
        score: 0.5,
        vertical,
        metadata: point.payload,
        rewrite_source: String::new(),
        hop_number: 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector_store::MemoryStore;
    use serde_json::json;

    const NOW: i64 = 1_700_000_000;

    fn result_with(chunk_id: &str, score: f32, metadata: Metadata) -> RetrievalResult {
        RetrievalResult {
            chunk_id: chunk_id.to_string(),
            doc_id: format!("doc_{}", chunk_id),
            content: String::new(),
            score,
            vertical: "go".to_string(),
            metadata,
            rewrite_source: "original".to_string(),
            hop_number: 1,
        }
    }

    fn meta(pairs: &[(&str, Value)]) -> Metadata {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[tokio::test]
    async fn test_superseded_downranked_with_relations_source() {
        let processor = RelationEntityProcessor::new(None);
        let results = vec![result_with(
            "a",
            1.0,
            meta(&[(
                "relations",
                json!([{"relation_type": "superseded_by", "target": "doc_new"}]),
            )]),
        )];

        let out = processor
            .process("query", results, &PhaseToggles::default(), NOW)
            .await;

        assert!((out[0].score - 0.4).abs() < 1e-6);
        assert_eq!(out[0].meta_str("currency_status"), Some("superseded"));
        assert_eq!(out[0].meta_str("currency_source"), Some("relations"));
    }

    #[tokio::test]
    async fn test_content_heuristic_used_when_relations_silent() {
        let processor = RelationEntityProcessor::new(None);
        let mut r = result_with("a", 1.0, Metadata::new());
        r.content = "This order stands superseded by later instructions".to_string();

        let out = processor
            .process("query", vec![r], &PhaseToggles::default(), NOW)
            .await;
        assert_eq!(out[0].meta_str("currency_source"), Some("content"));
    }

    #[tokio::test]
    async fn test_superseding_document_boosted() {
        let processor = RelationEntityProcessor::new(None);
        let results = vec![
            result_with(
                "current",
                0.5,
                meta(&[("relation_types", json!(["supersedes"]))]),
            ),
            result_with("plain", 0.5, Metadata::new()),
        ];

        let out = processor
            .process("query", results, &PhaseToggles::default(), NOW)
            .await;
        let current = out.iter().find(|r| r.chunk_id == "current").unwrap();
        let plain = out.iter().find(|r| r.chunk_id == "plain").unwrap();
        assert!(current.score > plain.score);
        assert_eq!(current.meta_str("currency_status"), Some("current"));
    }

    #[tokio::test]
    async fn test_amendment_boost_and_backfill() {
        let processor = RelationEntityProcessor::new(None);
        // relation_types degenerate -> backfilled from relations array
        let results = vec![result_with(
            "a",
            0.5,
            meta(&[
                ("relation_types", json!(["unknown"])),
                (
                    "relations",
                    json!([{"relation_type": "amends", "target": "doc_old"}]),
                ),
            ]),
        )];

        let out = processor
            .process("query", results, &PhaseToggles::default(), NOW)
            .await;
        assert!(out[0].meta_f64("relation_boost_applied").unwrap() > 1.1);
    }

    #[tokio::test]
    async fn test_entity_overlap_boost() {
        let toggles = PhaseToggles {
            relation_scoring: false,
            entity_matching: true,
            entity_expansion: false,
            bidirectional_search: false,
        };
        let processor = RelationEntityProcessor::new(None);
        let results = vec![
            result_with(
                "match",
                0.5,
                meta(&[("entities", json!({"go_numbers": ["54"]}))]),
            ),
            result_with("nomatch", 0.5, Metadata::new()),
        ];

        let out = processor
            .process("Explain GO Ms No 54", results, &toggles, NOW)
            .await;
        let matched = out.iter().find(|r| r.chunk_id == "match").unwrap();
        assert!(matched.meta_f64("entity_boost_applied").unwrap() > 1.0);
        assert!(matched.metadata.contains_key("matched_entities"));
    }

    #[tokio::test]
    async fn test_recency_intent_boosts_recent_and_penalizes_superseded() {
        let toggles = PhaseToggles {
            relation_scoring: false,
            entity_matching: true,
            entity_expansion: false,
            bidirectional_search: false,
        };
        let processor = RelationEntityProcessor::new(None);
        let results = vec![
            result_with(
                "fresh",
                0.5,
                meta(&[("date_issued_ts", json!(NOW - 5 * 86_400))]),
            ),
            result_with(
                "stale",
                0.5,
                meta(&[
                    ("date_issued_ts", json!(NOW - 3 * 365 * 86_400)),
                    ("is_superseded", json!(true)),
                ]),
            ),
        ];

        let out = processor
            .process("recent GOs from school education", results, &toggles, NOW)
            .await;
        let fresh = out.iter().find(|r| r.chunk_id == "fresh").unwrap();
        let stale = out.iter().find(|r| r.chunk_id == "stale").unwrap();

        assert!(fresh.meta_f64("recency_boost").is_some());
        assert!(fresh.score > 0.5);
        assert!(stale.meta_f64("superseded_penalty").is_some());
        assert!(stale.score < 0.2);
    }

    #[tokio::test]
    async fn test_entity_expansion_skips_unindexed_fields() {
        let store = Arc::new(MemoryStore::new());
        store.insert(
            Vertical::Go.collection_name(),
            "exp1",
            vec![1.0],
            meta(&[
                ("content", json!("Related order for the same department")),
                ("doc_id", json!("go_2024_77")),
                ("entities", json!({"departments": ["school education"]})),
            ]),
        );

        let toggles = PhaseToggles {
            relation_scoring: false,
            entity_matching: false,
            entity_expansion: true,
            bidirectional_search: false,
        };
        let processor = RelationEntityProcessor::new(Some(store));

        // Top result shares the department entity; also carries an unindexed
        // "years" entity that must not reach the filter
        let results = vec![result_with(
            "seed",
            0.9,
            meta(&[(
                "entities",
                json!({"departments": ["school education"], "years": ["2024"]}),
            )]),
        )];

        let out = processor.process("query", results, &toggles, NOW).await;
        let expansion = out.iter().find(|r| r.chunk_id == "exp1").expect("expanded");
        assert!((expansion.score - 0.6).abs() < 1e-6);
        assert_eq!(
            expansion.meta_str("found_via_relation"),
            Some("entity_expansion")
        );
    }

    #[tokio::test]
    async fn test_bidirectional_supersession() {
        let store = Arc::new(MemoryStore::new());
        store.insert(
            Vertical::Go.collection_name(),
            "newer",
            vec![1.0],
            meta(&[
                ("content", json!("This order supersedes earlier instructions")),
                ("doc_id", json!("go_2025_10")),
                (
                    "relations",
                    json!([{"relation_type": "supersedes", "target": "doc_old"}]),
                ),
            ]),
        );

        let toggles = PhaseToggles {
            relation_scoring: false,
            entity_matching: false,
            entity_expansion: false,
            bidirectional_search: true,
        };
        let processor = RelationEntityProcessor::new(Some(store));

        let mut seed = result_with("old", 0.9, Metadata::new());
        seed.doc_id = "doc_old".to_string();

        let out = processor.process("query", vec![seed], &toggles, NOW).await;

        let old = out.iter().find(|r| r.chunk_id == "old").unwrap();
        assert!(old.meta_bool("is_superseded"));
        assert!(old.score < 0.3);

        let newer = out.iter().find(|r| r.chunk_id == "newer").expect("added");
        assert!(newer.meta_bool("is_superseding"));
        assert!(newer.score > 1.0);
    }

    #[tokio::test]
    async fn test_neighbor_expansion_one_hop_with_cycle_guard() {
        let store = Arc::new(MemoryStore::new());
        // Neighbor that itself points back at the seed; only one hop happens
        store.insert(
            Vertical::Go.collection_name(),
            "n1",
            vec![1.0],
            meta(&[
                ("content", json!("Amending order text")),
                ("doc_id", json!("go_n1")),
                (
                    "relations",
                    json!([{"relation_type": "amended_by", "target": "seed"}]),
                ),
            ]),
        );

        let toggles = PhaseToggles {
            relation_scoring: true,
            entity_matching: false,
            entity_expansion: false,
            bidirectional_search: false,
        };
        let processor = RelationEntityProcessor::new(Some(store));

        let seed = result_with(
            "seed",
            1.0,
            meta(&[(
                "relations",
                json!([{"relation_type": "amends", "target": "n1"}]),
            )]),
        );

        let out = processor.process("query", vec![seed], &toggles, NOW).await;
        let neighbor = out.iter().find(|r| r.chunk_id == "n1").expect("neighbor");
        assert!(neighbor.meta_bool("neighbor_expansion"));
        // One neighbor only; the back-edge is not walked
        assert_eq!(out.len(), 2);
    }
}
