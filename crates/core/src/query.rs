//! Query request types

use serde::{Deserialize, Serialize};

use crate::Vertical;

/// Answer/retrieval mode requested by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    #[default]
    Qa,
    DeepThink,
    Brainstorm,
    PolicyBrief,
    PolicyDraft,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Qa => "qa",
            Mode::DeepThink => "deep_think",
            Mode::Brainstorm => "brainstorm",
            Mode::PolicyBrief => "policy_brief",
            Mode::PolicyDraft => "policy_draft",
        }
    }

    pub fn parse(s: &str) -> Option<Mode> {
        match s {
            "qa" => Some(Mode::Qa),
            "deep_think" | "deepthink" => Some(Mode::DeepThink),
            "brainstorm" => Some(Mode::Brainstorm),
            "policy_brief" => Some(Mode::PolicyBrief),
            "policy_draft" => Some(Mode::PolicyDraft),
            _ => None,
        }
    }

    /// Modes that warrant larger retrieval pools and deeper reranking
    pub fn is_deep(&self) -> bool {
        matches!(
            self,
            Mode::DeepThink | Mode::Brainstorm | Mode::PolicyBrief | Mode::PolicyDraft
        )
    }
}

/// Partial plan override supplied by the caller
///
/// Only the fields that are `Some` replace the derived plan values; everything
/// else keeps the mode/scope-derived defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CustomPlan {
    pub mode: Option<Mode>,
    pub num_rewrites: Option<usize>,
    pub num_hops: Option<u8>,
    pub top_k_per_vertical: Option<usize>,
    pub top_k_total: Option<usize>,
    pub rerank_top_k: Option<usize>,
    pub diversity_weight: Option<f32>,
    pub use_hybrid: Option<bool>,
    /// Explicit internet override; takes precedence over plan detection
    pub internet_enabled: Option<bool>,
    /// Force hop-2 regardless of hop-1 quality
    pub deep_search: Option<bool>,
}

impl CustomPlan {
    pub fn is_qa_mode(&self) -> bool {
        self.mode == Some(Mode::Qa)
    }
}

/// Options for a single retrieval call
#[derive(Debug, Clone, Default)]
pub struct RetrieveOptions {
    /// Override the final result count
    pub top_k: Option<usize>,
    /// Partial plan overrides
    pub custom_plan: Option<CustomPlan>,
    /// Bypass routing and search exactly these verticals
    pub force_verticals: Option<Vec<Vertical>>,
    /// Text extracted from uploaded attachments; mined for entities
    pub external_context: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_roundtrip() {
        for mode in [
            Mode::Qa,
            Mode::DeepThink,
            Mode::Brainstorm,
            Mode::PolicyBrief,
            Mode::PolicyDraft,
        ] {
            assert_eq!(Mode::parse(mode.as_str()), Some(mode));
        }
        assert_eq!(Mode::parse("bogus"), None);
    }

    #[test]
    fn test_deep_modes() {
        assert!(!Mode::Qa.is_deep());
        assert!(Mode::DeepThink.is_deep());
        assert!(Mode::Brainstorm.is_deep());
    }
}
