//! Domain keyword expansion
//!
//! Appends domain synonyms for matched query terms. Terms already present in
//! the query are deduped out and the expansion is capped at `max_terms`.
//! Queries about AI/technology integration in the curriculum get a
//! prioritized technology keyword list instead of the generic expansion.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

/// Single-word term expansions
const TERM_EXPANSIONS: &[(&str, &[&str])] = &[
    // Infrastructure
    (
        "infrastructure",
        &["nadu nedu", "facilities", "buildings", "construction", "school buildings", "classrooms", "premises"],
    ),
    (
        "toilet",
        &["toilets", "sanitation facilities", "washrooms", "sanitary facilities", "hygiene facilities"],
    ),
    (
        "classroom",
        &["classrooms", "teaching rooms", "learning spaces", "smart classroom"],
    ),
    (
        "electricity",
        &["power supply", "electrification", "lighting", "electric connection"],
    ),
    (
        "water",
        &["drinking water", "potable water", "water supply", "bore well"],
    ),
    (
        "furniture",
        &["benches", "desks", "seating", "school furniture", "blackboard"],
    ),
    (
        "playground",
        &["play area", "sports ground", "playing field", "recreation ground"],
    ),
    // Safety
    (
        "safety",
        &["security", "safety measures", "safety norms", "fire safety", "child protection"],
    ),
    (
        "cctv",
        &["surveillance", "security cameras", "video surveillance", "camera system"],
    ),
    // Welfare schemes
    (
        "gorumudda",
        &["midday meal", "nutrition program", "school meal", "free meal", "meal scheme"],
    ),
    (
        "scholarship",
        &["financial aid", "educational assistance", "stipend", "student aid"],
    ),
    (
        "transport",
        &["transportation", "school bus", "conveyance", "student transport"],
    ),
    (
        "hostel",
        &["residential facility", "boarding", "accommodation", "residential school"],
    ),
    (
        "uniform",
        &["school dress", "dress code", "uniform provision"],
    ),
    ("mdm", &["mid day meal", "midday meal", "school meal", "noon meal", "nutrition program"]),
    // Health
    (
        "health",
        &["healthcare", "medical", "health services", "hygiene", "wellness"],
    ),
    // Teacher development
    (
        "teacher",
        &["teachers", "educator", "faculty", "teaching staff", "school teacher"],
    ),
    (
        "training",
        &["teacher training", "professional development", "capacity building", "in-service training"],
    ),
    (
        "transfer",
        &["transfers", "posting", "deployment", "teacher posting", "relocation"],
    ),
    (
        "recruitment",
        &["appointment", "hiring", "teacher appointment", "teacher selection", "employment"],
    ),
    // Academic
    (
        "curriculum",
        &["syllabus", "course content", "academic curriculum", "curriculum framework"],
    ),
    (
        "textbook",
        &["textbooks", "course books", "study material", "learning material"],
    ),
    (
        "assessment",
        &["evaluation", "examination", "testing", "learning assessment"],
    ),
    (
        "examination",
        &["exam", "test", "public examination", "board exam"],
    ),
    // FLN
    (
        "fln",
        &["foundational literacy numeracy", "foundational learning", "basic literacy", "basic numeracy", "early learning"],
    ),
    (
        "literacy",
        &["reading", "reading skills", "reading proficiency", "language skills"],
    ),
    (
        "numeracy",
        &["mathematics", "math", "numerical skills", "arithmetic"],
    ),
    // Monitoring & data
    (
        "monitoring",
        &["supervision", "oversight", "tracking", "quality monitoring"],
    ),
    (
        "udise",
        &["unified district information", "school data", "education data", "district information system"],
    ),
    (
        "compliance",
        &["adherence", "conformity", "meeting standards", "regulatory compliance"],
    ),
    // Administrative & legal
    (
        "go",
        &["government order", "government orders", "official order", "executive order"],
    ),
    (
        "act",
        &["legislation", "law", "statute", "education act"],
    ),
    (
        "rte",
        &["right to education", "free and compulsory education"],
    ),
    (
        "rule",
        &["rules", "regulation", "guidelines", "norms", "statutory provisions"],
    ),
    (
        "section",
        &["clause", "provision", "sub-section", "statutory section"],
    ),
    (
        "policy",
        &["policies", "education policy", "policy framework", "policy guidelines"],
    ),
    // Inclusion & community
    (
        "cwsn",
        &["children with special needs", "differently abled", "inclusive education"],
    ),
    (
        "inclusion",
        &["inclusive education", "mainstreaming", "inclusive schooling"],
    ),
    (
        "smc",
        &["school management committee", "school committee", "management committee"],
    ),
    (
        "pta",
        &["parent teacher association", "parents association"],
    ),
];

/// Multi-word phrase expansions, checked before single terms
const PHRASE_EXPANSIONS: &[(&str, &[&str])] = &[
    (
        "school infrastructure",
        &["school facilities", "educational infrastructure", "school premises"],
    ),
    (
        "teacher transfer",
        &["teacher posting", "teacher deployment", "transfer of teachers"],
    ),
    (
        "learning outcomes",
        &["student achievement", "educational outcomes", "learning achievements"],
    ),
    (
        "quality education",
        &["educational quality", "education standards", "quality schooling"],
    ),
];

/// Priority terms injected for AI/technology-in-curriculum queries
const TECH_PRIORITY_TERMS: &[&str] = &[
    "atal tinkering labs",
    "atl",
    "nep 2020",
    "national education policy",
    "technology integration",
    "digital education",
    "educational technology",
    "smart classroom",
    "stem education",
    "innovation labs",
    "coding education",
    "robotics education",
    "digital literacy",
    "computer education",
];

const AI_INDICATORS: &[&str] = &[
    "ai",
    "artificial intelligence",
    "technology integration",
    "digital",
    "coding",
    "robotics",
    "innovation",
];

const CURRICULUM_INDICATORS: &[&str] = &["curriculum", "syllabus", "school", "education"];

static TERM_PATTERNS: Lazy<HashMap<&'static str, Regex>> = Lazy::new(|| {
    TERM_EXPANSIONS
        .iter()
        .map(|(term, _)| {
            let pattern = Regex::new(&format!(r"(?i)\b{}\b", regex::escape(term))).unwrap();
            (*term, pattern)
        })
        .collect()
});

/// Domain synonym expander
#[derive(Debug, Default)]
pub struct DomainExpander;

impl DomainExpander {
    pub fn new() -> Self {
        Self
    }

    /// Expand a query with domain synonyms, capped at `max_terms`
    pub fn expand(&self, query: &str, max_terms: usize) -> String {
        if is_ai_technology_query(query) {
            return expand_ai_technology(query, max_terms);
        }

        let terms = expansion_terms(query);
        if terms.is_empty() {
            return query.to_string();
        }

        let capped: Vec<&str> = terms.into_iter().take(max_terms).collect();
        format!("{} {}", query, capped.join(" "))
    }

    /// All matched term -> expansion pairs, for inspection
    pub fn matched_expansions(&self, query: &str) -> Vec<(&'static str, &'static [&'static str])> {
        let query_lower = query.to_lowercase();
        let mut matched = Vec::new();

        for (phrase, expansions) in PHRASE_EXPANSIONS {
            if query_lower.contains(phrase) {
                matched.push((*phrase, *expansions));
            }
        }
        for (term, expansions) in TERM_EXPANSIONS {
            if TERM_PATTERNS[term].is_match(query) {
                matched.push((*term, *expansions));
            }
        }

        matched
    }
}

fn expansion_terms(query: &str) -> Vec<&'static str> {
    let query_lower = query.to_lowercase();
    let expander = DomainExpander;
    let mut terms: Vec<&'static str> = expander
        .matched_expansions(query)
        .into_iter()
        .flat_map(|(_, expansions)| expansions.iter().copied())
        .filter(|term| !query_lower.contains(&term.to_lowercase()))
        .collect();

    // Longest terms first; dedup after sorting
    terms.sort_by(|a, b| b.len().cmp(&a.len()).then(a.cmp(b)));
    terms.dedup();
    terms
}

static AI_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bai\b").unwrap());

fn is_ai_technology_query(query: &str) -> bool {
    let query_lower = query.to_lowercase();
    let has_ai = AI_INDICATORS.iter().any(|t| {
        // Word-boundary match for the short "ai" token
        if *t == "ai" {
            AI_WORD.is_match(&query_lower)
        } else {
            query_lower.contains(t)
        }
    });
    let has_curriculum = CURRICULUM_INDICATORS.iter().any(|t| query_lower.contains(t));

    has_ai && (has_curriculum || query_lower.contains("integration"))
}

fn expand_ai_technology(query: &str, max_terms: usize) -> String {
    let query_lower = query.to_lowercase();

    let mut terms: Vec<&str> = TECH_PRIORITY_TERMS
        .iter()
        .copied()
        .chain(expansion_terms(query))
        .filter(|term| !query_lower.contains(&term.to_lowercase()))
        .collect();
    terms.dedup();

    // Shorter, more specific terms first
    terms.sort_by_key(|t| (t.split_whitespace().count(), t.len()));

    let selected: Vec<&str> = terms.into_iter().take(max_terms * 2).collect();
    format!("{} {}", query, selected.join(" "))
}
