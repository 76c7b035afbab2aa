//! Internet search layer
//!
//! Optional external web search normalized into the common result shape.
//! Hits are filtered against a trusted-domain whitelist before conversion;
//! any failure is swallowed and yields an empty list.

use std::time::Duration;

use async_trait::async_trait;

use policy_engine_core::{CustomPlan, Metadata, RetrievalPlan, RetrievalResult};

use crate::RetrievalError;

/// Trusted source domains; a hit survives if its domain equals or is a
/// subdomain of one of these
const WHITELISTED_DOMAINS: &[&str] = &[
    // Indian government
    "gov.in",
    "nic.in",
    "india.gov.in",
    "education.gov.in",
    // International organizations
    "unesco.org",
    "worldbank.org",
    "oecd.org",
    "unicef.org",
    "who.int",
    // Research/academia
    "ac.in",
    "ac.uk",
    // Reputable news
    "thehindu.com",
    "indianexpress.com",
    "reuters.com",
    // Education-specific
    "ncert.nic.in",
    "nios.ac.in",
    "ugc.ac.in",
    "aicte-india.org",
];

/// One raw web search hit
#[derive(Debug, Clone)]
pub struct WebHit {
    pub title: String,
    pub snippet: String,
    pub url: String,
    pub domain: String,
}

/// External web search service
#[async_trait]
pub trait WebSearch: Send + Sync {
    async fn search(
        &self,
        query: &str,
        top_k: usize,
        timeout: Duration,
    ) -> Result<Vec<WebHit>, RetrievalError>;
}

fn domain_allowed(domain: &str) -> bool {
    let domain = domain.to_lowercase();
    WHITELISTED_DOMAINS
        .iter()
        .any(|allowed| domain == *allowed || domain.ends_with(&format!(".{}", allowed)))
}

/// Internet search handler
pub struct InternetHandler {
    client: Option<std::sync::Arc<dyn WebSearch>>,
    timeout: Duration,
}

impl InternetHandler {
    pub fn new(client: Option<std::sync::Arc<dyn WebSearch>>, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    /// Explicit custom-plan override wins; otherwise the plan decides
    pub fn should_enable(&self, plan: &RetrievalPlan, custom: Option<&CustomPlan>) -> bool {
        if let Some(custom) = custom {
            if let Some(enabled) = custom.internet_enabled {
                tracing::info!(enabled, "internet search set via custom plan override");
                return enabled;
            }
        }
        plan.use_internet
    }

    /// Search the web and convert hits into retrieval results
    ///
    /// Scores decay from 0.85 by 0.05 per rank. Failures are swallowed.
    pub async fn search(&self, query: &str, now_epoch: i64) -> Vec<RetrievalResult> {
        let Some(ref client) = self.client else {
            return Vec::new();
        };

        let hits = match client.search(query, 5, self.timeout).await {
            Ok(hits) => hits,
            Err(e) => {
                tracing::error!(error = %e, "internet search failed");
                return Vec::new();
            }
        };

        hits.into_iter()
            .filter(|hit| {
                let allowed = domain_allowed(&hit.domain);
                if !allowed {
                    tracing::debug!(domain = %hit.domain, "blocked non-whitelisted domain");
                }
                allowed
            })
            .enumerate()
            .map(|(i, hit)| {
                let mut metadata = Metadata::new();
                metadata.insert("title".to_string(), hit.title.clone().into());
                metadata.insert("url".to_string(), hit.url.clone().into());
                metadata.insert("source".to_string(), "web_search".into());
                metadata.insert("is_web".to_string(), true.into());

                RetrievalResult {
                    chunk_id: format!("web_{}_{}", i, now_epoch),
                    doc_id: format!("web_{}", i),
                    content: format!("{}\n{}", hit.title, hit.snippet),
                    score: 0.85 - 0.05 * i as f32,
                    vertical: "internet".to_string(),
                    metadata,
                    rewrite_source: "original_query".to_string(),
                    hop_number: 1,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use policy_engine_core::PlanMode;
    use std::sync::Arc;

    struct FixedSearch(Vec<WebHit>);

    #[async_trait]
    impl WebSearch for FixedSearch {
        async fn search(
            &self,
            _query: &str,
            _top_k: usize,
            _timeout: Duration,
        ) -> Result<Vec<WebHit>, RetrievalError> {
            Ok(self.0.clone())
        }
    }

    struct FailingSearch;

    #[async_trait]
    impl WebSearch for FailingSearch {
        async fn search(
            &self,
            _query: &str,
            _top_k: usize,
            _timeout: Duration,
        ) -> Result<Vec<WebHit>, RetrievalError> {
            Err(RetrievalError::UpstreamUnavailable("down".to_string()))
        }
    }

    fn hit(domain: &str) -> WebHit {
        WebHit {
            title: "New education policy update".to_string(),
            snippet: "Details of the latest circular".to_string(),
            url: format!("https://{}/page", domain),
            domain: domain.to_string(),
        }
    }

    fn plan(use_internet: bool) -> RetrievalPlan {
        RetrievalPlan {
            num_rewrites: 1,
            num_hops: 1,
            top_k_per_vertical: 10,
            top_k_total: 10,
            use_internet,
            use_hybrid: true,
            rerank_top_k: 10,
            diversity_weight: 0.2,
            mode: PlanMode::Qa,
        }
    }

    #[test]
    fn test_custom_plan_override_wins() {
        let handler = InternetHandler::new(None, Duration::from_secs(10));
        let custom = CustomPlan {
            internet_enabled: Some(false),
            ..Default::default()
        };
        assert!(!handler.should_enable(&plan(true), Some(&custom)));
        assert!(handler.should_enable(&plan(true), None));
        assert!(!handler.should_enable(&plan(false), None));
    }

    #[tokio::test]
    async fn test_whitelist_filtering_and_score_decay() {
        let hits = vec![
            hit("education.gov.in"),
            hit("malicious.example.com"),
            hit("scert.ap.gov.in"),
        ];
        let handler = InternetHandler::new(
            Some(Arc::new(FixedSearch(hits))),
            Duration::from_secs(10),
        );

        let results = handler.search("latest policy", 1_700_000_000).await;
        assert_eq!(results.len(), 2);
        assert!(results[0].chunk_id.starts_with("web_0_"));
        assert!((results[0].score - 0.85).abs() < 1e-6);
        assert!((results[1].score - 0.80).abs() < 1e-6);
        assert_eq!(results[0].vertical, "internet");
        assert!(results[0].meta_bool("is_web"));
    }

    #[tokio::test]
    async fn test_failure_swallowed() {
        let handler = InternetHandler::new(
            Some(Arc::new(FailingSearch)),
            Duration::from_secs(10),
        );
        let results = handler.search("anything", 0).await;
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_no_client_is_empty() {
        let handler = InternetHandler::new(None, Duration::from_secs(10));
        assert!(handler.search("anything", 0).await.is_empty());
    }
}
