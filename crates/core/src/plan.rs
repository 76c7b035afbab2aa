//! Retrieval plan types

use serde::{Deserialize, Serialize};

/// Internal execution mode a plan was derived for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanMode {
    Qa,
    Policy,
    Framework,
    DeepThink,
    Compliance,
    Brainstorm,
    /// Synthesized by the legal-clause fast path
    FastClauseLookup,
}

impl PlanMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanMode::Qa => "qa",
            PlanMode::Policy => "policy",
            PlanMode::Framework => "framework",
            PlanMode::DeepThink => "deepthink",
            PlanMode::Compliance => "compliance",
            PlanMode::Brainstorm => "brainstorm",
            PlanMode::FastClauseLookup => "fast_clause_lookup",
        }
    }
}

/// Complete retrieval execution plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalPlan {
    /// How many query rewrites to generate (1-5)
    pub num_rewrites: usize,
    /// Multi-hop iterations (1-2)
    pub num_hops: u8,
    /// Chunks to retrieve per vertical
    pub top_k_per_vertical: usize,
    /// Total chunks after aggregation
    pub top_k_total: usize,
    /// Whether to use internet search
    pub use_internet: bool,
    /// Vector + BM25 hybrid search
    pub use_hybrid: bool,
    /// How many candidates the rerankers consider
    pub rerank_top_k: usize,
    /// Diversity vs relevance trade-off in [0, 1]
    pub diversity_weight: f32,
    pub mode: PlanMode,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_mode_labels() {
        assert_eq!(PlanMode::DeepThink.as_str(), "deepthink");
        assert_eq!(PlanMode::FastClauseLookup.as_str(), "fast_clause_lookup");
    }
}
