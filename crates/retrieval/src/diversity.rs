//! Diversity reranking
//!
//! Predicts a small set of policy categories for the query, then runs an
//! MMR-style selection with lambda = 1 - diversity_weight, trading relevance
//! against coverage of the predicted category set.

use policy_engine_core::{QueryType, RetrievalResult};

use crate::rewriter::DOMAIN_VOCABULARIES;

/// Coarse policy category tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolicyCategory {
    AccessInclusion,
    InfrastructureSafety,
    GovernanceAdministration,
    WelfareSchemes,
    CurriculumPedagogy,
    AssessmentEvaluation,
    TeacherDevelopment,
}

impl PolicyCategory {
    pub const ALL: [PolicyCategory; 7] = [
        PolicyCategory::AccessInclusion,
        PolicyCategory::InfrastructureSafety,
        PolicyCategory::GovernanceAdministration,
        PolicyCategory::WelfareSchemes,
        PolicyCategory::CurriculumPedagogy,
        PolicyCategory::AssessmentEvaluation,
        PolicyCategory::TeacherDevelopment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyCategory::AccessInclusion => "access_inclusion",
            PolicyCategory::InfrastructureSafety => "infrastructure_safety",
            PolicyCategory::GovernanceAdministration => "governance_administration",
            PolicyCategory::WelfareSchemes => "welfare_schemes",
            PolicyCategory::CurriculumPedagogy => "curriculum_pedagogy",
            PolicyCategory::AssessmentEvaluation => "assessment_evaluation",
            PolicyCategory::TeacherDevelopment => "teacher_development",
        }
    }

    fn vocabulary(&self) -> &'static [&'static str] {
        DOMAIN_VOCABULARIES
            .iter()
            .find(|(domain, _)| *domain == self.as_str())
            .map(|(_, vocab)| *vocab)
            .unwrap_or(&[])
    }
}

/// Predicts policy categories for queries and chunks
#[derive(Debug, Default)]
pub struct CategoryPredictor;

impl CategoryPredictor {
    pub fn new() -> Self {
        Self
    }

    /// Categories relevant to a query, most relevant first
    pub fn predict(&self, query: &str, query_type: QueryType) -> Vec<PolicyCategory> {
        let mut scored = score_categories(query);

        if scored.is_empty() {
            // No vocabulary signal; fall back to type-driven defaults
            return match query_type {
                QueryType::Framework | QueryType::Brainstorm => vec![
                    PolicyCategory::CurriculumPedagogy,
                    PolicyCategory::GovernanceAdministration,
                    PolicyCategory::TeacherDevelopment,
                    PolicyCategory::InfrastructureSafety,
                ],
                QueryType::Comparison => vec![
                    PolicyCategory::WelfareSchemes,
                    PolicyCategory::GovernanceAdministration,
                ],
                _ => vec![
                    PolicyCategory::GovernanceAdministration,
                    PolicyCategory::CurriculumPedagogy,
                ],
            };
        }

        // Deep query types keep a wider category set
        let limit = match query_type {
            QueryType::Framework | QueryType::Brainstorm => 4,
            _ => 3,
        };
        scored.truncate(limit);
        scored.into_iter().map(|(c, _)| c).collect()
    }

    /// Best-matching categories for one chunk of content (up to two)
    pub fn categorize_content(&self, content: &str) -> Vec<PolicyCategory> {
        let mut scored = score_categories(content);
        scored.truncate(2);
        scored.into_iter().map(|(c, _)| c).collect()
    }
}

fn score_categories(text: &str) -> Vec<(PolicyCategory, usize)> {
    let text_lower = text.to_lowercase();
    let mut scored: Vec<(PolicyCategory, usize)> = PolicyCategory::ALL
        .iter()
        .map(|category| {
            let score = category
                .vocabulary()
                .iter()
                .filter(|term| text_lower.contains(&term.to_lowercase()))
                .map(|term| term.split_whitespace().count())
                .sum();
            (*category, score)
        })
        .filter(|(_, score)| *score > 0)
        .collect();

    scored.sort_by(|a, b| b.1.cmp(&a.1));
    scored
}

/// MMR-style diversity reranker over predicted categories
#[derive(Debug, Default)]
pub struct DiversityReranker {
    predictor: CategoryPredictor,
}

impl DiversityReranker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Quick skip heuristic: the top three already span two verticals
    pub fn already_diverse(&self, results: &[RetrievalResult]) -> bool {
        let verticals: std::collections::HashSet<&str> = results
            .iter()
            .take(3)
            .map(|r| r.vertical.as_str())
            .collect();
        verticals.len() >= 2
    }

    /// Select `top_k` results trading relevance against category coverage
    ///
    /// lambda = 1 - diversity_weight: at weight 0 this is a pure relevance
    /// sort, at high weights category repetition is punished hard.
    pub fn rerank(
        &self,
        results: Vec<RetrievalResult>,
        predicted: &[PolicyCategory],
        top_k: usize,
        diversity_weight: f32,
    ) -> Vec<RetrievalResult> {
        if diversity_weight <= f32::EPSILON || results.len() <= 1 {
            let mut out = results;
            out.truncate(top_k);
            return out;
        }

        let lambda = 1.0 - diversity_weight.clamp(0.0, 1.0);

        let mut remaining: Vec<(RetrievalResult, Vec<PolicyCategory>)> = results
            .into_iter()
            .map(|r| {
                let categories = self.predictor.categorize_content(&r.content);
                (r, categories)
            })
            .collect();

        let mut selected: Vec<RetrievalResult> = Vec::with_capacity(top_k);
        let mut covered: std::collections::HashSet<PolicyCategory> =
            std::collections::HashSet::new();

        while selected.len() < top_k && !remaining.is_empty() {
            let mut best_idx = 0;
            let mut best_score = f32::NEG_INFINITY;

            for (idx, (result, categories)) in remaining.iter().enumerate() {
                let redundancy = if categories.is_empty() {
                    0.0
                } else {
                    categories.iter().filter(|c| covered.contains(*c)).count() as f32
                        / categories.len() as f32
                };

                // Small bonus for covering a predicted category not yet seen
                let novelty_bonus = if categories
                    .iter()
                    .any(|c| predicted.contains(c) && !covered.contains(c))
                {
                    0.05
                } else {
                    0.0
                };

                let mmr = lambda * result.score - (1.0 - lambda) * redundancy + novelty_bonus;
                if mmr > best_score {
                    best_score = mmr;
                    best_idx = idx;
                }
            }

            let (result, categories) = remaining.remove(best_idx);
            covered.extend(categories);
            selected.push(result);
        }

        selected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use policy_engine_core::Metadata;

    fn result(chunk_id: &str, score: f32, content: &str, vertical: &str) -> RetrievalResult {
        RetrievalResult {
            chunk_id: chunk_id.to_string(),
            doc_id: chunk_id.to_string(),
            content: content.to_string(),
            score,
            vertical: vertical.to_string(),
            metadata: Metadata::new(),
            rewrite_source: "original".to_string(),
            hop_number: 1,
        }
    }

    #[test]
    fn test_category_prediction_from_vocabulary() {
        let predictor = CategoryPredictor::new();
        let categories = predictor.predict(
            "school infrastructure toilets and drinking water",
            QueryType::Qa,
        );
        assert_eq!(categories[0], PolicyCategory::InfrastructureSafety);
    }

    #[test]
    fn test_framework_defaults_are_broad() {
        let predictor = CategoryPredictor::new();
        let categories = predictor.predict("xyzzy", QueryType::Framework);
        assert!(categories.len() >= 3);
    }

    #[test]
    fn test_zero_weight_is_pure_relevance() {
        let reranker = DiversityReranker::new();
        let results = vec![
            result("a", 0.9, "teacher training program", "go"),
            result("b", 0.8, "teacher recruitment rules", "go"),
            result("c", 0.7, "midday meal scheme", "schemes"),
        ];
        let out = reranker.rerank(results, &[], 3, 0.0);
        assert_eq!(out[0].chunk_id, "a");
        assert_eq!(out[1].chunk_id, "b");
        assert_eq!(out[2].chunk_id, "c");
    }

    #[test]
    fn test_high_weight_spreads_categories() {
        let reranker = DiversityReranker::new();
        // Three near-tied teacher chunks and one slightly weaker welfare chunk
        let results = vec![
            result("t1", 0.90, "teacher training and professional development", "go"),
            result("t2", 0.89, "teacher recruitment and appointment rules", "go"),
            result("t3", 0.88, "teacher transfer posting guidelines", "go"),
            result("w1", 0.80, "midday meal and scholarship welfare scheme", "schemes"),
        ];
        let predicted = [
            PolicyCategory::TeacherDevelopment,
            PolicyCategory::WelfareSchemes,
        ];
        let out = reranker.rerank(results, &predicted, 3, 0.8);

        let has_welfare = out.iter().any(|r| r.chunk_id == "w1");
        assert!(has_welfare, "welfare chunk should displace a redundant teacher chunk");
    }

    #[test]
    fn test_already_diverse_heuristic() {
        let reranker = DiversityReranker::new();
        let mixed = vec![
            result("a", 0.9, "", "legal"),
            result("b", 0.8, "", "go"),
            result("c", 0.7, "", "go"),
        ];
        assert!(reranker.already_diverse(&mixed));

        let uniform = vec![
            result("a", 0.9, "", "go"),
            result("b", 0.8, "", "go"),
            result("c", 0.7, "", "go"),
        ];
        assert!(!reranker.already_diverse(&uniform));
    }

    #[test]
    fn test_top_k_bound() {
        let reranker = DiversityReranker::new();
        let results = (0..10)
            .map(|i| result(&format!("r{}", i), 1.0 - i as f32 * 0.05, "teacher", "go"))
            .collect();
        let out = reranker.rerank(results, &[], 4, 0.5);
        assert_eq!(out.len(), 4);
    }
}
