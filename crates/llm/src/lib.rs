//! Generation-LLM client
//!
//! Thin async client for the external text-generation service used by the
//! query rewriter (and by the answer layer outside this workspace). Exposes a
//! single `generate(prompt) -> text` capability behind the `LlmBackend`
//! trait, with retry/backoff on transient failures.

pub mod backend;

pub use backend::{GenerationResult, HttpLlmBackend, LlmBackend, LlmConfig};

use thiserror::Error;

/// LLM errors
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Request failed: {0}")]
    Request(String),

    #[error("Generation timed out after {0}s")]
    Timeout(u64),

    #[error("Unexpected response: {0}")]
    Response(String),
}

impl From<LlmError> for policy_engine_core::Error {
    fn from(err: LlmError) -> Self {
        policy_engine_core::Error::Llm(err.to_string())
    }
}
