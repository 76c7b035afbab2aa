//! Query normalization
//!
//! Deterministic, idempotent cleanup of raw user queries: whitespace and
//! quote unification, punctuation-run capping, selective lowercasing that
//! keeps GO references, section references, and year tokens verbatim,
//! abbreviation expansion, and a small OCR/typo correction table.

use once_cell::sync::Lazy;
use regex::Regex;

/// Domain abbreviations expanded during normalization
const ABBREVIATIONS: &[(&str, &str)] = &[
    // Education domain
    ("go", "government order"),
    ("gos", "government orders"),
    ("rte", "right to education"),
    ("fln", "foundational literacy numeracy"),
    ("ssa", "sarva shiksha abhiyan"),
    ("mdm", "mid day meal"),
    ("rmsa", "rashtriya madhyamik shiksha abhiyan"),
    ("ncert", "national council of educational research and training"),
    ("ncte", "national council for teacher education"),
    ("tet", "teacher eligibility test"),
    ("ctet", "central teacher eligibility test"),
    ("aptet", "andhra pradesh teacher eligibility test"),
    // Administrative
    ("cse", "commissioner of school education"),
    ("dee", "director of elementary education"),
    ("dse", "director of school education"),
    ("spo", "state project office"),
    ("dpo", "district project office"),
    ("mpo", "mandal project office"),
    ("crc", "cluster resource centre"),
    // Programs
    ("pwds", "persons with disabilities"),
    ("cwsn", "children with special needs"),
    ("oosc", "out of school children"),
    ("ecce", "early childhood care and education"),
    ("npe", "national policy on education"),
    // Infrastructure
    ("smdc", "school management and development committee"),
    ("vmc", "village monitoring committee"),
    ("pta", "parent teacher association"),
];

/// Common OCR/typing corrections
const TYPO_FIXES: &[(&str, &str)] = &[
    ("goverment", "government"),
    ("govenment", "government"),
    ("committe", "committee"),
    ("recieve", "receive"),
    ("occured", "occurred"),
    ("right toeducation", "right to education"),
];

static GO_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)GO\.?\s*(?:Ms\.?|Rt\.?)?\s*No\.?\s*\d+").unwrap());
static SECTION_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)Section\s+\d+(?:\([a-z0-9]+\))*").unwrap());
static YEAR_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(?:19|20)\d{2}\b").unwrap());

static MULTI_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static PUNCT_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"([!?.]){2,}").unwrap());
static PUNCT_SPACING: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s*([,;:!?])\s*").unwrap());

/// Query normalizer
///
/// Stateless; a single instance is shared across the engine.
#[derive(Debug, Default)]
pub struct QueryNormalizer;

impl QueryNormalizer {
    pub fn new() -> Self {
        Self
    }

    /// Main normalization pipeline
    pub fn normalize(&self, text: &str) -> String {
        if text.trim().is_empty() {
            return String::new();
        }

        let text = basic_clean(text);

        // Hide pattern-matched tokens behind placeholders so lowercasing and
        // abbreviation expansion cannot touch them.
        let (text, preserved) = preserve_patterns(&text);

        let text = text.to_lowercase();
        let text = expand_abbreviations(&text);
        let text = fix_common_errors(&text);
        let text = normalize_whitespace(&text);

        restore_patterns(&text, &preserved).trim().to_string()
    }
}

/// Normalize a query (convenience wrapper)
pub fn normalize(query: &str) -> String {
    QueryNormalizer::new().normalize(query)
}

fn basic_clean(text: &str) -> String {
    let text = MULTI_SPACE.replace_all(text.trim(), " ");

    let text = text
        .replace(['\u{201c}', '\u{201d}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    PUNCT_RUN.replace_all(&text, "$1").into_owned()
}

fn preserve_patterns(text: &str) -> (String, Vec<String>) {
    let mut preserved = Vec::new();
    let mut out = text.to_string();

    for pattern in [&*GO_PATTERN, &*SECTION_PATTERN, &*YEAR_PATTERN] {
        // Collect first; replacement shifts offsets
        let matches: Vec<String> = pattern
            .find_iter(&out)
            .map(|m| m.as_str().to_string())
            .collect();
        for m in matches {
            // Placeholders are lowercase so the lowercasing pass is a no-op
            // on them and restoration still finds them.
            let placeholder = format!("__preserved_{}__", preserved.len());
            out = out.replacen(&m, &placeholder, 1);
            preserved.push(m);
        }
    }

    (out, preserved)
}

fn restore_patterns(text: &str, preserved: &[String]) -> String {
    let mut out = text.to_string();
    for (i, original) in preserved.iter().enumerate() {
        let placeholder = format!("__preserved_{}__", i);
        out = out.replace(&placeholder, original);
    }
    out
}

fn expand_abbreviations(text: &str) -> String {
    text.split_whitespace()
        .map(|word| {
            let trimmed = word.trim_end_matches(['.', ',', '!', '?', ';', ':']);
            let punct = &word[trimmed.len()..];
            match ABBREVIATIONS.iter().find(|(abbr, _)| *abbr == trimmed) {
                Some((_, full)) => format!("{}{}", full, punct),
                None => word.to_string(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn fix_common_errors(text: &str) -> String {
    let mut out = text.to_string();
    for (error, correction) in TYPO_FIXES {
        out = out.replace(error, correction);
    }
    out
}

fn normalize_whitespace(text: &str) -> String {
    let text = text.replace(['\t', '\n', '\r'], " ");
    let text = PUNCT_SPACING.replace_all(&text, "$1 ");
    MULTI_SPACE.replace_all(&text, " ").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idempotent() {
        let queries = [
            "What is GO 42?",
            "Explain   RTE  Section 12(1)(c)",
            "FLN implementation in govt schools",
            "SHOW ME GO.Ms.No.54 details!!!",
            "Teacher transfer rules 2023",
            "What are CWSN provisions?",
        ];
        for q in queries {
            let once = normalize(q);
            let twice = normalize(&once);
            assert_eq!(once, twice, "not idempotent for {:?}", q);
        }
    }

    #[test]
    fn test_preserves_go_reference() {
        let out = normalize("SHOW ME GO.Ms.No.54 details!!!");
        assert!(out.contains("GO.Ms.No.54"), "got: {}", out);
        assert!(!out.contains("!!!"));
    }

    #[test]
    fn test_preserves_section_and_year() {
        let out = normalize("Explain Section 12(1)(c) amendments of 2023");
        assert!(out.contains("Section 12(1)(c)"), "got: {}", out);
        assert!(out.contains("2023"));
    }

    #[test]
    fn test_expands_abbreviations() {
        let out = normalize("What are CWSN provisions?");
        assert!(out.contains("children with special needs"), "got: {}", out);

        let out = normalize("FLN in schools");
        assert!(out.contains("foundational literacy numeracy"));
    }

    #[test]
    fn test_abbreviation_keeps_trailing_punctuation() {
        let out = normalize("what is rte?");
        assert!(out.contains("right to education?"), "got: {}", out);
    }

    #[test]
    fn test_typo_fixes() {
        let out = normalize("goverment committe order");
        assert!(out.contains("government committee"), "got: {}", out);
    }

    #[test]
    fn test_whitespace_collapsed() {
        let out = normalize("  teacher   transfer \t rules \n 2023 ");
        assert_eq!(out, "teacher transfer rules 2023");
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("   "), "");
    }
}
