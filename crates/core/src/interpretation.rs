//! Query interpretation types

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Classified intent of a user query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    /// Simple question-answer
    Qa,
    /// Policy explanation/analysis
    Policy,
    /// List/enumerate items
    List,
    /// Design/create a framework
    Framework,
    /// Compliance checking
    Compliance,
    /// Compare policies/rules
    Comparison,
    /// Historical changes
    History,
    /// Idea generation
    Brainstorm,
    /// Staffing/recruitment/service matters
    Hr,
}

impl QueryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryType::Qa => "qa",
            QueryType::Policy => "policy",
            QueryType::List => "list",
            QueryType::Framework => "framework",
            QueryType::Compliance => "compliance",
            QueryType::Comparison => "comparison",
            QueryType::History => "history",
            QueryType::Brainstorm => "brainstorm",
            QueryType::Hr => "hr",
        }
    }
}

/// Breadth of a query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryScope {
    /// Specific fact or document
    Narrow,
    /// Multiple related facts
    Medium,
    /// Comprehensive analysis
    Broad,
}

impl QueryScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryScope::Narrow => "narrow",
            QueryScope::Medium => "medium",
            QueryScope::Broad => "broad",
        }
    }
}

/// Complete interpretation of a query
///
/// Immutable once built; the orchestrator treats it as read-only input for
/// routing and planning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interpretation {
    pub query_type: QueryType,
    pub scope: QueryScope,
    pub needs_internet: bool,
    pub needs_deep_mode: bool,
    /// Share of pattern matches won by the top type, in [0, 1]
    pub confidence: f32,
    /// Entity kind -> extracted values (go_refs, sections, acts, years, ...)
    pub detected_entities: HashMap<String, Vec<String>>,
    pub keywords: Vec<String>,
    pub temporal_references: Vec<String>,
    /// Human-readable narrative of the classification decisions
    pub reasoning: String,
}
