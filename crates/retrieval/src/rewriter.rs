//! Query rewriting
//!
//! Produces 1-5 rewrites targeting the seven policy domains. The rule path
//! detects the query pattern and relevant domains by vocabulary overlap, then
//! builds one rewrite per domain from extracted key terms. The LLM path asks
//! the generation model for DOMAIN:/REWRITE:/REASON: blocks and falls through
//! to the rule path on any error.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;

use policy_engine_core::{Mode, Rewrite};
use policy_engine_llm::LlmBackend;

use crate::cache::LlmCache;
use crate::RetrievalError;

/// Policy domain vocabularies used for rewrite targeting
pub const DOMAIN_VOCABULARIES: &[(&str, &[&str])] = &[
    (
        "access_inclusion",
        &[
            "admission", "enrollment", "enrolment", "dropout", "out-of-school children",
            "inclusion", "equity", "girl child education", "minority education",
            "children with special needs", "disadvantaged groups", "school mapping",
            "accessibility", "inclusive classroom", "special needs education",
        ],
    ),
    (
        "infrastructure_safety",
        &[
            "infrastructure", "nadu nedu", "facilities", "buildings", "classrooms", "toilets",
            "drinking water", "electricity", "boundary walls", "ramps", "furniture",
            "playgrounds", "kitchen", "construction", "maintenance", "cctv", "security",
            "fire safety", "sanitation",
        ],
    ),
    (
        "governance_administration",
        &[
            "governance", "administration", "management", "inspection", "monitoring",
            "supervision", "compliance", "regulation", "headmaster", "district collector",
            "authority", "accountability", "oversight", "quality assurance",
            "government orders",
        ],
    ),
    (
        "welfare_schemes",
        &[
            "amma vodi", "vidya kanuka", "vidya deevena", "gorumudda", "mid day meal",
            "midday meal", "school kit", "uniform", "scholarship", "financial assistance",
            "transport", "hostel", "welfare scheme", "incentive", "nutrition",
            "health checkup", "student welfare",
        ],
    ),
    (
        "curriculum_pedagogy",
        &[
            "curriculum", "syllabus", "textbook", "subject", "learning material",
            "digital content", "pedagogy", "teaching method", "learning outcome",
            "competency", "foundational literacy", "foundational numeracy", "lesson plan",
            "experiential learning", "educational technology",
        ],
    ),
    (
        "assessment_evaluation",
        &[
            "assessment", "evaluation", "examination", "test",
            "continuous comprehensive evaluation", "grading", "marking",
            "progress tracking", "achievement", "performance", "promotion", "report card",
            "formative assessment", "summative assessment",
        ],
    ),
    (
        "teacher_development",
        &[
            "teacher", "teaching", "faculty", "staff", "recruitment", "appointment",
            "transfer", "posting", "training", "capacity building",
            "professional development", "in-service training", "teacher eligibility test",
            "qualification", "service conditions", "career progression",
        ],
    ),
];

static BROAD_POLICY_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)\b(?:current|latest|all|comprehensive|complete|overall)\s+(?:education\s+)?policies?\b",
        r"(?i)\beducation\s+(?:system|framework|structure|overview)\b",
        r"(?i)\b(?:list|overview|summary)\s+(?:of\s+)?(?:all\s+)?(?:education\s+)?(?:policies|initiatives|schemes)\b",
        r"(?i)\beducation\s+(?:in\s+)?(?:andhra\s+pradesh|ap)\b",
        r"(?i)\bstate\s+education\s+policies?\b",
        r"(?i)\bpolicy\s+(?:landscape|ecosystem|framework)\b",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

const KEY_TERM_STOPWORDS: &[&str] = &[
    "what", "is", "are", "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for",
    "of", "with", "by", "how", "do", "does", "can", "could", "should", "would", "will", "tell",
    "me", "about", "explain", "describe", "list",
];

/// Detected shape of a query, used for template selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QueryPattern {
    WhatIs,
    HowTo,
    Requirements,
    List,
    General,
}

/// Query rewriter with rule-based and LLM-backed paths
pub struct QueryRewriter {
    llm: Option<Arc<dyn LlmBackend>>,
    llm_cache: Option<Arc<LlmCache>>,
}

impl QueryRewriter {
    /// Rule-based only
    pub fn rule_based() -> Self {
        Self {
            llm: None,
            llm_cache: None,
        }
    }

    /// Rule-based with an LLM path layered on top
    pub fn with_llm(llm: Arc<dyn LlmBackend>, cache: Option<Arc<LlmCache>>) -> Self {
        Self {
            llm: Some(llm),
            llm_cache: cache,
        }
    }

    /// Generate rewrites for a normalized query
    ///
    /// The LLM path is skipped in qa mode; any LLM failure falls back to the
    /// rule path, so this never fails.
    pub async fn generate(&self, query: &str, num_rewrites: usize, mode: Mode) -> Vec<Rewrite> {
        let n = num_rewrites.clamp(1, 5);

        if mode != Mode::Qa {
            if let Some(ref llm) = self.llm {
                match self.generate_with_llm(llm.as_ref(), query, n).await {
                    Ok(rewrites) if !rewrites.is_empty() => return rewrites,
                    Ok(_) => {
                        tracing::debug!("LLM returned no parseable rewrites, using rule path");
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "LLM rewrite failed, using rule path");
                    }
                }
            }
        }

        self.generate_rule_based(query, n)
    }

    /// Rule-based rewrite generation
    pub fn generate_rule_based(&self, query: &str, num_rewrites: usize) -> Vec<Rewrite> {
        let n = num_rewrites.clamp(1, 5);
        let pattern = detect_pattern(query);
        let mut rewrites = Vec::with_capacity(n);

        if is_broad_policy_query(query) {
            for (domain, _) in DOMAIN_VOCABULARIES.iter().take(n) {
                rewrites.push(domain_rewrite(query, domain, pattern));
            }
        } else {
            for domain in detect_target_domains(query).into_iter().take(n) {
                rewrites.push(domain_rewrite(query, domain, pattern));
            }
        }

        if rewrites.len() < n {
            rewrites.push(comprehensive_rewrite(query));
        }

        rewrites.truncate(n);
        rewrites
    }

    async fn generate_with_llm(
        &self,
        llm: &dyn LlmBackend,
        query: &str,
        num_rewrites: usize,
    ) -> Result<Vec<Rewrite>, RetrievalError> {
        let prompt = rewrite_prompt(query, num_rewrites);

        if let Some(ref cache) = self.llm_cache {
            if let Some(cached) = cache.get(&prompt) {
                let parsed = parse_llm_blocks(&cached);
                if !parsed.is_empty() {
                    return Ok(parsed.into_iter().take(num_rewrites).collect());
                }
            }
        }

        let result = llm
            .generate(&prompt)
            .await
            .map_err(|e| RetrievalError::UpstreamUnavailable(e.to_string()))?;

        let parsed = parse_llm_blocks(&result.text);
        if parsed.is_empty() {
            return Err(RetrievalError::ParseError(
                "no DOMAIN:/REWRITE: blocks in response".to_string(),
            ));
        }

        if let Some(ref cache) = self.llm_cache {
            cache.insert(&prompt, &result.text);
        }

        Ok(parsed.into_iter().take(num_rewrites).collect())
    }
}

fn rewrite_prompt(query: &str, num_rewrites: usize) -> String {
    format!(
        "You are an expert in Indian education policy. Generate {n} different rewrites \
of this query, each targeting a different aspect of education policy:\n\n\
Original Query: {query}\n\n\
Target domains: infrastructure and safety, welfare schemes, curriculum and pedagogy, \
teacher policy, assessment, governance and monitoring.\n\n\
Format each rewrite as:\n\
DOMAIN: <domain>\n\
REWRITE: <rewritten query>\n\
REASON: <why this rewrite is useful>\n\n\
Keep rewrites concise (10-15 words) and focused on policy/legal documents.",
        n = num_rewrites,
        query = query
    )
}

fn parse_llm_blocks(response: &str) -> Vec<Rewrite> {
    let mut rewrites = Vec::new();

    for block in response.split("\n\n") {
        let mut domain = None;
        let mut text = None;
        let mut reason = None;

        for line in block.lines() {
            let line = line.trim();
            if let Some(rest) = line.strip_prefix("DOMAIN:") {
                domain = Some(rest.trim().to_lowercase());
            } else if let Some(rest) = line.strip_prefix("REWRITE:") {
                text = Some(rest.trim().to_string());
            } else if let Some(rest) = line.strip_prefix("REASON:") {
                reason = Some(rest.trim().to_string());
            }
        }

        if let (Some(domain), Some(text)) = (domain, text) {
            rewrites.push(Rewrite {
                text,
                target_domain: domain,
                rationale: reason.unwrap_or_else(|| "model-generated rewrite".to_string()),
            });
        }
    }

    rewrites
}

fn detect_pattern(query: &str) -> QueryPattern {
    static WHAT_IS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bwhat\s+(is|are)\b").unwrap());
    static HOW_TO: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bhow\s+(to|do)\b").unwrap());
    static REQUIREMENTS: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(?i)\brequirements?\b|\bmust\b|\bshould\b").unwrap());
    static LIST: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\blist\b|\ball\b|\btypes?\b").unwrap());

    if WHAT_IS.is_match(query) {
        QueryPattern::WhatIs
    } else if HOW_TO.is_match(query) {
        QueryPattern::HowTo
    } else if REQUIREMENTS.is_match(query) {
        QueryPattern::Requirements
    } else if LIST.is_match(query) {
        QueryPattern::List
    } else {
        QueryPattern::General
    }
}

fn is_broad_policy_query(query: &str) -> bool {
    BROAD_POLICY_PATTERNS.iter().any(|p| p.is_match(query))
}

/// Domains relevant to the query, scored by vocabulary overlap
fn detect_target_domains(query: &str) -> Vec<&'static str> {
    let query_lower = query.to_lowercase();
    let mut scores: Vec<(&str, usize)> = DOMAIN_VOCABULARIES
        .iter()
        .map(|(domain, vocabulary)| {
            let score: usize = vocabulary
                .iter()
                .filter(|term| query_lower.contains(&term.to_lowercase()))
                .map(|term| term.split_whitespace().count())
                .sum();
            (*domain, score)
        })
        .collect();

    scores.sort_by(|a, b| b.1.cmp(&a.1));

    let relevant: Vec<&str> = scores
        .iter()
        .filter(|(_, s)| *s > 0)
        .map(|(d, _)| *d)
        .collect();

    if relevant.is_empty() {
        vec![
            "governance_administration",
            "curriculum_pedagogy",
            "teacher_development",
            "infrastructure_safety",
        ]
    } else {
        relevant
    }
}

fn extract_key_terms(query: &str) -> Vec<String> {
    static WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\w+\b").unwrap());

    WORD.find_iter(&query.to_lowercase())
        .map(|m| m.as_str().to_string())
        .filter(|w| w.len() > 2 && !KEY_TERM_STOPWORDS.contains(&w.as_str()))
        .take(5)
        .collect()
}

fn domain_rewrite(query: &str, domain: &str, pattern: QueryPattern) -> Rewrite {
    let key_terms = extract_key_terms(query).join(" ");
    let domain_label = domain.replace('_', " ");

    let text = match pattern {
        QueryPattern::WhatIs => format!("{} {} policy provisions", key_terms, domain_label),
        QueryPattern::HowTo => format!("Implementation of {} in {}", key_terms, domain_label),
        QueryPattern::Requirements => {
            format!("{} {} requirements standards", key_terms, domain_label)
        }
        QueryPattern::List => format!("All {} related to {}", key_terms, domain_label),
        QueryPattern::General => {
            let vocabulary = DOMAIN_VOCABULARIES
                .iter()
                .find(|(d, _)| *d == domain)
                .map(|(_, v)| *v)
                .unwrap_or(&[]);
            let extras = vocabulary
                .iter()
                .take(3)
                .copied()
                .collect::<Vec<_>>()
                .join(" ");
            format!("{} {}", query, extras)
        }
    };

    Rewrite {
        text,
        target_domain: domain.to_string(),
        rationale: format!("Targeting {} vertical with domain-specific vocabulary", domain),
    }
}

fn comprehensive_rewrite(query: &str) -> Rewrite {
    let key_terms = extract_key_terms(query).join(" ");
    Rewrite {
        text: format!("{} comprehensive policy implementation", key_terms),
        target_domain: "comprehensive".to_string(),
        rationale: "Broad cross-domain rewrite for maximum coverage".to_string(),
    }
}
