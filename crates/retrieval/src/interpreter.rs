//! Query interpretation
//!
//! Rule-based classifier over compiled regex banks. Scores each query-type
//! label by counting pattern matches, picks scope from competing narrow/broad
//! indicators plus a length heuristic, and extracts entities, keywords, and
//! temporal references.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

use policy_engine_core::{Interpretation, QueryScope, QueryType};

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(&format!("(?i){}", p)).expect("invalid pattern"))
        .collect()
}

static QA_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"\bwhat\s+is\b",
        r"\bwhat\s+are\b",
        r"\bwho\s+is\b",
        r"\bwhen\s+was\b",
        r"\bwhere\s+is\b",
        r"\bhow\s+many\b",
        r"\bdefine\b",
        r"\bexplain\b",
        r"\btell\s+me\s+about\b",
    ])
});

static FRAMEWORK_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"\bdesign\b",
        r"\bcreate\s+a\s+framework\b",
        r"\bdevelop\s+a\s+plan\b",
        r"\bpropose\b",
        r"\bcomprehensive\s+(framework|plan|strategy)\b",
        r"\bhow\s+to\s+(implement|design|create|build)\b",
        r"\bstrategy\s+for\b",
        r"\bapproach\s+to\b",
    ])
});

static LIST_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"\blist\s+(all|the)\b",
        r"\benumerate\b",
        r"\bshow\s+me\s+all\b",
        r"\bgive\s+me\s+(all|the)\s+\w+\b",
        r"\btypes\s+of\b",
        r"\bcategories\s+of\b",
    ])
});

static COMPLIANCE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"\bcheck\s+compliance\b",
        r"\bis\s+\w+\s+compliant\b",
        r"\bvalidate\b",
        r"\bverify\b",
        r"\bmeets?\s+requirements?\b",
        r"\badhere\s+to\b",
        r"\bfollows?\s+the\s+rules?\b",
    ])
});

static COMPARISON_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"\bcompare\b",
        r"\bdifference\s+between\b",
        r"\bvs\.?\b",
        r"\bversus\b",
        r"\bhow\s+does\s+\w+\s+differ\b",
        r"\bsimilarities\s+and\s+differences\b",
    ])
});

static HISTORY_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"\bhistory\s+of\b",
        r"\bhow\s+has\s+\w+\s+changed\b",
        r"\bevolution\s+of\b",
        r"\bover\s+time\b",
        r"\bold\s+(version|rule|policy)\b",
        r"\bsuperseded\b",
        r"\bamended\b",
    ])
});

static HR_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"\bhiring\b",
        r"\brecruitment\b",
        r"\bappointment\b",
        r"\bvacancy\b",
        r"\bpayscale\b",
        r"\bremuneration\b",
        r"\bcontract\s+teacher\b",
        r"\boutsourcing\b",
        r"\bstaffing\b",
        r"\bhuman\s+resource\b",
        r"\bservice\s+rules\b",
        r"\bemployment\b",
    ])
});

static NARROW_INDICATORS: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"\bspecific\b",
        r"\bexact\b",
        r"\bsection\s+\d+\b",
        r"\bGO\.?\s*(?:Ms\.?|Rt\.?)?\s*No\.?\s*\d+\b",
        r"\bclause\s+\d+\b",
        r"\bparagraph\s+\d+\b",
    ])
});

static BROAD_INDICATORS: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"\ball\b",
        r"\bcomplete\b",
        r"\bcomprehensive\b",
        r"\bentire\b",
        r"\bfull\b",
        r"\beverything\s+about\b",
        r"\boverall\b",
        r"\bholistic\b",
        r"\bmultiple\b",
    ])
});

static INTERNET_TRIGGERS: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"\blatest\b",
        r"\brecent\b",
        r"\bcurrent\b",
        r"\b202[6-9]\b",
        r"\b203\d\b",
        r"\bthis\s+year\b",
        r"\bupdated\b",
        r"\btoday\b",
    ])
});

static ENTITY_PATTERNS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    vec![
        (
            "go_refs",
            Regex::new(r"(?i)GO\.?\s*(?:Ms\.?|Rt\.?)?\s*No\.?\s*(\d+)").unwrap(),
        ),
        (
            "sections",
            Regex::new(r"(?i)Section\s+(\d+(?:\([a-z0-9]+\))*)").unwrap(),
        ),
        (
            "acts",
            Regex::new(r"(?i)(RTE|Right\s+to\s+Education|SSA|RMSA|MDM)\s+Act").unwrap(),
        ),
        ("years", Regex::new(r"\b((?:19|20)\d{2})\b").unwrap()),
        (
            "schemes",
            Regex::new(r"(?i)(Nadu[- ]Nedu|Samagra\s+Shiksha|Mid\s*[Dd]ay\s+Meal|Amma\s+Vodi)")
                .unwrap(),
        ),
        (
            "hr_terms",
            Regex::new(r"(?i)\b(salary|payscale|recruitment|hiring|contract|appointment|vacancy)\b")
                .unwrap(),
        ),
    ]
});

static RELATIVE_TIME: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"\blast\s+year\b",
        r"\bthis\s+year\b",
        r"\bnext\s+year\b",
        r"\brecent\b",
        r"\bcurrent\b",
        r"\bprevious\b",
    ])
});

const KEYWORD_STOPWORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by",
    "from", "as", "is", "are", "was", "were", "be", "been", "being", "have", "has", "had", "do",
    "does", "did", "will", "would", "should", "could", "may", "might", "must", "can", "what",
    "when", "where", "who", "how", "why", "which",
];

const BRAINSTORM_WORDS: &[&str] = &["ideas", "suggestions", "brainstorm", "innovate"];

/// Rule-based query interpreter
#[derive(Debug, Default)]
pub struct QueryInterpreter;

impl QueryInterpreter {
    pub fn new() -> Self {
        Self
    }

    /// Interpret a normalized query
    pub fn interpret(&self, query: &str) -> Interpretation {
        let (query_type, confidence) = detect_query_type(query);
        let scope = detect_scope(query);
        let needs_internet = INTERNET_TRIGGERS.iter().any(|p| p.is_match(query));
        let needs_deep_mode = needs_deep_mode(query_type, scope);
        let detected_entities = extract_entities(query);
        let keywords = extract_keywords(query);
        let temporal_references = detect_temporal(query);

        let mut reasoning = format!(
            "Query classified as {}, scope is {}",
            query_type.as_str(),
            scope.as_str()
        );
        if needs_internet {
            reasoning.push_str(", requires internet search for current information");
        }
        if needs_deep_mode {
            reasoning.push_str(", requires deep retrieval mode for comprehensive results");
        }

        Interpretation {
            query_type,
            scope,
            needs_internet,
            needs_deep_mode,
            confidence,
            detected_entities,
            keywords,
            temporal_references,
            reasoning,
        }
    }
}

fn detect_query_type(query: &str) -> (QueryType, f32) {
    let banks: [(QueryType, &Lazy<Vec<Regex>>); 7] = [
        (QueryType::Qa, &QA_PATTERNS),
        (QueryType::Framework, &FRAMEWORK_PATTERNS),
        (QueryType::List, &LIST_PATTERNS),
        (QueryType::Compliance, &COMPLIANCE_PATTERNS),
        (QueryType::Comparison, &COMPARISON_PATTERNS),
        (QueryType::History, &HISTORY_PATTERNS),
        (QueryType::Hr, &HR_PATTERNS),
    ];

    let mut scores: Vec<(QueryType, f32)> = Vec::with_capacity(banks.len());
    let mut total = 0.0f32;
    for (qtype, bank) in banks {
        let hits = bank.iter().filter(|p| p.is_match(query)).count() as f32;
        total += hits;
        scores.push((qtype, hits));
    }

    if total == 0.0 {
        if has_brainstorm_words(query) {
            return (QueryType::Brainstorm, 0.7);
        }
        return (QueryType::Qa, 0.3);
    }

    let (top_type, top_score) = scores
        .iter()
        .copied()
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
        .expect("non-empty score table");
    let share = top_score / total;

    if share < 0.3 && has_brainstorm_words(query) {
        return (QueryType::Brainstorm, 0.7);
    }

    (top_type, share)
}

fn has_brainstorm_words(query: &str) -> bool {
    let lower = query.to_lowercase();
    BRAINSTORM_WORDS.iter().any(|w| lower.contains(w))
}

fn detect_scope(query: &str) -> QueryScope {
    let mut narrow = NARROW_INDICATORS.iter().filter(|p| p.is_match(query)).count();
    let mut broad = BROAD_INDICATORS.iter().filter(|p| p.is_match(query)).count();

    let word_count = query.split_whitespace().count();
    if word_count <= 5 {
        narrow += 1;
    } else if word_count > 15 {
        broad += 1;
    }

    match broad.cmp(&narrow) {
        std::cmp::Ordering::Greater => QueryScope::Broad,
        std::cmp::Ordering::Less => QueryScope::Narrow,
        std::cmp::Ordering::Equal => QueryScope::Medium,
    }
}

fn needs_deep_mode(query_type: QueryType, scope: QueryScope) -> bool {
    matches!(query_type, QueryType::Framework | QueryType::Brainstorm)
        || scope == QueryScope::Broad
        || (query_type == QueryType::Policy && scope == QueryScope::Medium)
}

fn extract_entities(query: &str) -> HashMap<String, Vec<String>> {
    let mut entities = HashMap::new();

    for (name, pattern) in ENTITY_PATTERNS.iter() {
        let mut values: Vec<String> = pattern
            .captures_iter(query)
            .filter_map(|c| c.get(1).or_else(|| c.get(0)))
            .map(|m| m.as_str().to_string())
            .collect();
        values.sort();
        values.dedup();
        if !values.is_empty() {
            entities.insert(name.to_string(), values);
        }
    }

    entities
}

fn extract_keywords(query: &str) -> Vec<String> {
    static WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\w+\b").unwrap());

    WORD.find_iter(&query.to_lowercase())
        .map(|m| m.as_str().to_string())
        .filter(|w| w.len() > 2 && !KEYWORD_STOPWORDS.contains(&w.as_str()))
        .take(10)
        .collect()
}

fn detect_temporal(query: &str) -> Vec<String> {
    let mut temporal: Vec<String> = YEAR_CAPTURE
        .find_iter(query)
        .map(|m| m.as_str().to_string())
        .collect();

    for pattern in RELATIVE_TIME.iter() {
        for m in pattern.find_iter(query) {
            temporal.push(m.as_str().to_string());
        }
    }

    temporal.sort();
    temporal.dedup();
    temporal
}

static YEAR_CAPTURE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(?:19|20)\d{2}\b").unwrap());

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qa_classification() {
        let interp = QueryInterpreter::new().interpret("What is Section 12(1)(c) of RTE Act?");
        assert_eq!(interp.query_type, QueryType::Qa);
        assert!(interp.detected_entities.contains_key("sections"));
        assert!(interp.detected_entities.contains_key("acts"));
    }

    #[test]
    fn test_framework_broad() {
        let interp = QueryInterpreter::new()
            .interpret("Design a comprehensive FLN framework for primary schools");
        assert_eq!(interp.query_type, QueryType::Framework);
        assert_eq!(interp.scope, QueryScope::Broad);
        assert!(interp.needs_deep_mode);
    }

    #[test]
    fn test_comparison() {
        let interp =
            QueryInterpreter::new().interpret("Compare Nadu-Nedu and Samagra Shiksha schemes");
        assert_eq!(interp.query_type, QueryType::Comparison);
        assert!(interp.detected_entities.contains_key("schemes"));
        assert_eq!(interp.detected_entities["schemes"].len(), 2);
    }

    #[test]
    fn test_brainstorm_fallback() {
        let interp =
            QueryInterpreter::new().interpret("ideas for improving student attendance levels");
        assert_eq!(interp.query_type, QueryType::Brainstorm);
        assert!((interp.confidence - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_default_qa_low_confidence() {
        let interp = QueryInterpreter::new().interpret("teacher transfer norms");
        assert_eq!(interp.query_type, QueryType::Qa);
        assert!((interp.confidence - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_internet_trigger_on_future_year() {
        let interp = QueryInterpreter::new().interpret("education budget allocations for 2027");
        assert!(interp.needs_internet);
        assert!(interp.temporal_references.contains(&"2027".to_string()));
    }

    #[test]
    fn test_short_query_is_narrow() {
        let interp = QueryInterpreter::new().interpret("define midday meal");
        assert_eq!(interp.scope, QueryScope::Narrow);
    }

    #[test]
    fn test_keywords_filtered() {
        let interp = QueryInterpreter::new().interpret("What are the rules for teacher transfer?");
        assert!(interp.keywords.contains(&"teacher".to_string()));
        assert!(!interp.keywords.contains(&"what".to_string()));
        assert!(interp.keywords.len() <= 10);
    }

    #[test]
    fn test_reasoning_mentions_decisions() {
        let interp = QueryInterpreter::new().interpret("Design a comprehensive framework");
        assert!(interp.reasoning.contains("framework"));
        assert!(interp.reasoning.contains("deep retrieval"));
    }
}
