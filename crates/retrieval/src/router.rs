//! Vertical routing
//!
//! Picks which corpus verticals to search. Broad policy queries and deep
//! query types get all five; otherwise the union of entity-driven,
//! keyword-driven, and type-driven signals decides, with `{legal, go}` as the
//! default. The result is sorted by the fixed vertical priority.

use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;
use regex::Regex;

use policy_engine_core::{QueryType, Vertical};

/// Keywords that vote for each vertical; longer keywords weigh more
const VERTICAL_KEYWORDS: &[(Vertical, &[&str])] = &[
    (
        Vertical::Legal,
        &[
            "act", "section", "rule", "regulation", "statute", "law", "right to education",
            "legal provision", "amendment", "clause", "subsection", "article", "chapter",
        ],
    ),
    (
        Vertical::Go,
        &[
            "government order", "g.o.", "circular", "notification", "order", "govt order",
            "executive order", "administrative order", "ms.no", "rt.no", "superseded",
            "supersedes",
        ],
    ),
    (
        Vertical::Judicial,
        &[
            "judgment", "court", "case", "ruling", "verdict", "case law", "supreme court",
            "high court", "judicial", "litigation", "writ", "petition", "appeal",
            "case number",
        ],
    ),
    (
        Vertical::Data,
        &[
            "data", "statistics", "report", "udise", "enrollment", "attendance", "dropout",
            "survey", "census", "figures", "metrics", "indicators", "trend",
        ],
    ),
    (
        Vertical::Schemes,
        &[
            "scheme", "program", "initiative", "samagra shiksha", "nadu-nedu", "nadu nedu",
            "midday meal", "mid day meal", "amma vodi", "scholarship", "implementation",
            "artificial intelligence", "technology integration", "atal tinkering labs",
            "digital education", "stem education", "nep 2020",
        ],
    ),
];

static ENTITY_ROUTES: Lazy<Vec<(Vertical, Vec<Regex>)>> = Lazy::new(|| {
    let compile = |patterns: &[&str]| -> Vec<Regex> {
        patterns
            .iter()
            .map(|p| Regex::new(&format!("(?i){}", p)).unwrap())
            .collect()
    };
    vec![
        (
            Vertical::Legal,
            compile(&[
                r"\bSection\s+\d+",
                r"\b(RTE|SSA|RMSA)\s+Act\b",
                r"\bRule\s+\d+",
                r"\bChapter\s+[IVX]+",
            ]),
        ),
        (
            Vertical::Go,
            compile(&[r"GO\.?\s*(?:Ms\.?|Rt\.?)?\s*No\.?\s*\d+", r"G\.O\.(?:Ms|Rt)\.No\.\d+"]),
        ),
        (
            Vertical::Judicial,
            compile(&[r"\bW\.P\.No\.\d+", r"\bS\.L\.P\.\s*\(C\)", r"\b\d{4}\s+\(\d+\)\s+[A-Z]+\s+\d+"]),
        ),
        (
            Vertical::Data,
            compile(&[r"\bUDISE\+?", r"\bASER\s+\d{4}"]),
        ),
        (
            Vertical::Schemes,
            compile(&[r"\b(Nadu[- ]Nedu|Samagra\s+Shiksha|Amma\s+Vodi)"]),
        ),
    ]
});

static BROAD_POLICY: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)\b(?:current|latest|all|comprehensive|complete|overall)\s+(?:education\s+)?policies?\b",
        r"(?i)\beducation\s+(?:system|framework|structure|overview)\b",
        r"(?i)\b(?:list|overview|summary)\s+(?:of\s+)?(?:all\s+)?(?:education\s+)?(?:policies|initiatives|schemes)\b",
        r"(?i)\bstate\s+education\s+policies?\b",
        r"(?i)\bpolicy\s+(?:landscape|ecosystem|framework)\b",
        r"(?i)\b(?:education|policy)\s+governance\b",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

/// Vertical router
#[derive(Debug, Default)]
pub struct VerticalRouter;

impl VerticalRouter {
    pub fn new() -> Self {
        Self
    }

    /// Route a query to the verticals worth searching, in priority order
    pub fn route(
        &self,
        query: &str,
        query_type: QueryType,
        detected_entities: &HashMap<String, Vec<String>>,
    ) -> Vec<Vertical> {
        if is_broad_policy_query(query)
            || matches!(query_type, QueryType::Framework | QueryType::Brainstorm)
        {
            return sorted(Vertical::ALL.into_iter().collect());
        }

        let mut verticals: HashSet<Vertical> = HashSet::new();

        verticals.extend(route_by_entities(query, detected_entities));
        verticals.extend(route_by_keywords(query));
        verticals.extend(route_by_type(query_type));

        if verticals.is_empty() {
            verticals.insert(Vertical::Legal);
            verticals.insert(Vertical::Go);
        }

        sorted(verticals)
    }
}

fn sorted(verticals: HashSet<Vertical>) -> Vec<Vertical> {
    let mut list: Vec<Vertical> = verticals.into_iter().collect();
    list.sort_by_key(|v| v.priority());
    list
}

fn is_broad_policy_query(query: &str) -> bool {
    BROAD_POLICY.iter().any(|p| p.is_match(query))
}

fn route_by_entities(
    query: &str,
    detected_entities: &HashMap<String, Vec<String>>,
) -> HashSet<Vertical> {
    let mut verticals = HashSet::new();

    for (vertical, patterns) in ENTITY_ROUTES.iter() {
        if patterns.iter().any(|p| p.is_match(query)) {
            verticals.insert(*vertical);
        }
    }

    if detected_entities.contains_key("sections") || detected_entities.contains_key("acts") {
        verticals.insert(Vertical::Legal);
    }
    if detected_entities.contains_key("go_refs") {
        verticals.insert(Vertical::Go);
    }
    if detected_entities.contains_key("schemes") {
        verticals.insert(Vertical::Schemes);
    }

    verticals
}

fn route_by_keywords(query: &str) -> HashSet<Vertical> {
    let query_lower = query.to_lowercase();
    let mut verticals = HashSet::new();

    for (vertical, keywords) in VERTICAL_KEYWORDS {
        let score: usize = keywords
            .iter()
            .filter(|k| query_lower.contains(*k))
            .map(|k| k.split_whitespace().count())
            .sum();
        if score > 0 {
            verticals.insert(*vertical);
        }
    }

    verticals
}

fn route_by_type(query_type: QueryType) -> HashSet<Vertical> {
    let mut verticals = HashSet::new();

    match query_type {
        QueryType::Qa | QueryType::Compliance => {
            verticals.insert(Vertical::Legal);
            verticals.insert(Vertical::Go);
        }
        QueryType::Framework | QueryType::Policy | QueryType::Brainstorm => {
            verticals.extend(Vertical::ALL);
        }
        QueryType::Comparison => {
            verticals.insert(Vertical::Schemes);
            verticals.insert(Vertical::Data);
            verticals.insert(Vertical::Go);
        }
        QueryType::History => {
            verticals.insert(Vertical::Go);
            verticals.insert(Vertical::Judicial);
            verticals.insert(Vertical::Legal);
        }
        QueryType::List | QueryType::Hr => {}
    }

    verticals
}
