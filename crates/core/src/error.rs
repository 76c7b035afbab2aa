//! Shared error type
//!
//! Crate-specific errors (`LlmError`, `RetrievalError`) convert into this
//! type at crate boundaries.

use thiserror::Error;

/// Engine-wide error
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Retrieval error: {0}")]
    Retrieval(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

pub type Result<T> = std::result::Result<T, Error>;
