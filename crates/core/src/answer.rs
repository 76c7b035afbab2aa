//! Answer generation collaborator
//!
//! Answer construction and validation live outside the retrieval core. The
//! engine's `retrieve_and_answer` delegates to this trait and folds the
//! validation score back into its stats.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{Metadata, Mode, Result, RetrievalResult};

/// A generated answer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    pub summary: String,
    pub sections: Vec<AnswerSection>,
    pub citations: Vec<Citation>,
    pub confidence: f32,
    #[serde(default)]
    pub metadata: Metadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerSection {
    pub heading: String,
    pub body: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Citation {
    pub chunk_id: String,
    pub doc_id: String,
    pub url: Option<String>,
}

/// Result of validating a generated answer against its sources
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub issues: Vec<String>,
    pub quality_score: f32,
    pub suggestions: Vec<String>,
}

/// External answer generation and validation service
#[async_trait]
pub trait AnswerBuilder: Send + Sync {
    async fn build(
        &self,
        query: &str,
        results: &[RetrievalResult],
        mode: Mode,
    ) -> Result<Answer>;

    async fn validate(
        &self,
        answer: &Answer,
        results: &[RetrievalResult],
        query: &str,
    ) -> Result<ValidationReport>;
}
