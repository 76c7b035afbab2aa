//! Core types for the policy retrieval engine
//!
//! This crate provides the foundational types shared across all other crates:
//! - Query request types (mode, custom plan overrides)
//! - Query interpretation (type, scope, entities)
//! - Retrieval plans and results with provenance metadata
//! - Corpus verticals and their collection mapping
//! - Answer generation collaborator traits
//! - Error types

pub mod answer;
pub mod error;
pub mod interpretation;
pub mod plan;
pub mod query;
pub mod result;
pub mod vertical;

pub use answer::{Answer, AnswerBuilder, AnswerSection, Citation, ValidationReport};
pub use error::{Error, Result};
pub use interpretation::{Interpretation, QueryScope, QueryType};
pub use plan::{PlanMode, RetrievalPlan};
pub use query::{CustomPlan, Mode, RetrieveOptions};
pub use result::{Metadata, RetrievalOutput, RetrievalResult, Rewrite};
pub use vertical::Vertical;
