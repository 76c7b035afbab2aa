//! Query understanding coordination
//!
//! Runs interpretation and rewriting concurrently under their own timeouts,
//! then expands every rewrite with domain keywords inside a shared budget.
//! Entities found in attachment context are appended as extra rewrites.

use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;

use policy_engine_config::settings::TimeoutSettings;
use policy_engine_core::{Interpretation, Mode};

use crate::expander::DomainExpander;
use crate::interpreter::QueryInterpreter;
use crate::rewriter::QueryRewriter;

static CONTEXT_GO: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)G\.?O\.?\s*(?:Ms\.?|Rt\.?|P\.?)?[\s.]?(?:No\.?|Number)?\s*\d+").unwrap());
static CONTEXT_ACT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:The\s+)?([A-Z][A-Za-z ]{8,48}Act(?:,?\s+\d{4})?)").unwrap());

/// Extract explicit entities (GO refs, Acts) from attachment text
pub fn extract_context_entities(text: &str) -> Vec<String> {
    let mut entities: Vec<String> = Vec::new();

    for m in CONTEXT_GO.find_iter(text) {
        let entity = m.as_str().trim().to_string();
        if !entities.contains(&entity) {
            entities.push(entity);
        }
    }
    for caps in CONTEXT_ACT.captures_iter(text) {
        let entity = caps[1].trim().to_string();
        if !entities.contains(&entity) {
            entities.push(entity);
        }
    }

    entities
}

/// Output of the understanding phase
pub struct Understanding {
    pub interpretation: Interpretation,
    /// Normalized original first, then generated rewrites, then context entities
    pub rewrites: Vec<String>,
    /// Same list after domain expansion (falls back to the raw rewrite on
    /// per-item failure)
    pub expanded_rewrites: Vec<String>,
}

/// Coordinates interpretation, rewriting, and expansion
pub struct UnderstandingCoordinator {
    interpreter: Arc<QueryInterpreter>,
    rewriter: Arc<QueryRewriter>,
    expander: Arc<DomainExpander>,
    timeouts: TimeoutSettings,
}

impl UnderstandingCoordinator {
    pub fn new(
        interpreter: Arc<QueryInterpreter>,
        rewriter: Arc<QueryRewriter>,
        expander: Arc<DomainExpander>,
        timeouts: TimeoutSettings,
    ) -> Self {
        Self {
            interpreter,
            rewriter,
            expander,
            timeouts,
        }
    }

    /// Interpret + rewrite concurrently, then expand
    pub async fn understand(
        &self,
        normalized_query: &str,
        mode: Mode,
        num_rewrites: usize,
        external_context: Option<&str>,
    ) -> Understanding {
        let interpret_budget = Duration::from_secs(self.timeouts.interpret_secs);
        let rewrite_budget = Duration::from_secs(self.timeouts.rewrite_secs);

        let interpreter = Arc::clone(&self.interpreter);
        let query_for_interp = normalized_query.to_string();
        let interpret_fut = tokio::time::timeout(interpret_budget, async move {
            interpreter.interpret(&query_for_interp)
        });

        let rewriter = Arc::clone(&self.rewriter);
        let query_for_rewrite = normalized_query.to_string();
        let rewrite_fut = tokio::time::timeout(rewrite_budget, async move {
            rewriter.generate(&query_for_rewrite, num_rewrites, mode).await
        });

        let (interpretation, generated) = tokio::join!(interpret_fut, rewrite_fut);

        let interpretation = match interpretation {
            Ok(interp) => interp,
            Err(_) => {
                tracing::warn!("interpretation timed out, re-running inline");
                self.interpreter.interpret(normalized_query)
            }
        };

        let generated = match generated {
            Ok(rewrites) => rewrites,
            Err(_) => {
                tracing::warn!("rewrite generation timed out, using rule path");
                self.rewriter.generate_rule_based(normalized_query, num_rewrites)
            }
        };

        let mut rewrites: Vec<String> = vec![normalized_query.to_string()];
        rewrites.extend(generated.into_iter().map(|r| r.text));

        if let Some(context) = external_context {
            let entities = extract_context_entities(context);
            if !entities.is_empty() {
                tracing::info!(count = entities.len(), "entities extracted from attachment context");
                rewrites.extend(entities);
            }
        }

        let expanded_rewrites = self.expand_all(&rewrites, mode, num_rewrites).await;

        Understanding {
            interpretation,
            rewrites,
            expanded_rewrites,
        }
    }

    /// Expand every rewrite within one shared budget; a failed or timed-out
    /// expansion falls back to the unexpanded form
    async fn expand_all(&self, rewrites: &[String], mode: Mode, num_rewrites: usize) -> Vec<String> {
        // Expansion breadth is mode-aware: qa stays minimal, deep modes widen
        let max_terms = if mode == Mode::Qa {
            3
        } else if num_rewrites >= 5 {
            10
        } else {
            8
        };

        let expander = Arc::clone(&self.expander);
        let inputs = rewrites.to_vec();
        let budget = Duration::from_secs(self.timeouts.expansion_secs);

        let expand = async move {
            inputs
                .iter()
                .map(|r| expander.expand(r, max_terms))
                .collect::<Vec<String>>()
        };

        match tokio::time::timeout(budget, expand).await {
            Ok(expanded) => expanded,
            Err(_) => {
                tracing::warn!("domain expansion timed out, using unexpanded rewrites");
                rewrites.to_vec()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coordinator() -> UnderstandingCoordinator {
        UnderstandingCoordinator::new(
            Arc::new(QueryInterpreter::new()),
            Arc::new(QueryRewriter::rule_based()),
            Arc::new(DomainExpander::new()),
            TimeoutSettings::default(),
        )
    }

    #[tokio::test]
    async fn test_understand_produces_original_plus_rewrites() {
        let u = coordinator()
            .understand("teacher transfer rules", Mode::DeepThink, 3, None)
            .await;

        assert_eq!(u.rewrites[0], "teacher transfer rules");
        assert!(u.rewrites.len() > 1);
        assert_eq!(u.rewrites.len(), u.expanded_rewrites.len());
    }

    #[tokio::test]
    async fn test_context_entities_appended() {
        let context = "As per G.O.Ms.No. 54 and The Right to Education Act, 2009 ...";
        let u = coordinator()
            .understand("admission rules", Mode::DeepThink, 2, Some(context))
            .await;

        assert!(u.rewrites.iter().any(|r| r.contains("54")));
        assert!(u.rewrites.iter().any(|r| r.contains("Act")));
    }

    #[test]
    fn test_extract_context_entities() {
        let text = "Refer GO Ms No 123 and G.O.Rt.No. 456; also the Samagra Shiksha Abhiyan Act, 2018.";
        let entities = extract_context_entities(text);
        assert!(entities.iter().any(|e| e.contains("123")));
        assert!(entities.iter().any(|e| e.contains("456")));
        assert!(entities.iter().any(|e| e.contains("Act")));
    }

    #[tokio::test]
    async fn test_qa_mode_expansion_is_minimal() {
        let u = coordinator()
            .understand("teacher training", Mode::Qa, 1, None)
            .await;
        // Expansion capped at three added terms in qa mode
        let added = u.expanded_rewrites[0]
            .split_whitespace()
            .count()
            .saturating_sub(u.rewrites[0].split_whitespace().count());
        assert!(added <= 3 * 4);
    }
}
