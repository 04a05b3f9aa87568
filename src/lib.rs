use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors surfaced across the engine boundary.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid token budget: {0}")]
    InvalidBudget(String),

    #[error("Engine is not initialized")]
    NotInitialized,

    #[error("Query was cancelled")]
    Cancelled,

    #[error("Query deadline exceeded")]
    DeadlineExceeded,

    #[error("Index unavailable: {0}")]
    IndexUnavailable(String),

    #[error("Embedding provider failed: {0}")]
    EmbeddingProviderFailed(String),

    #[error("Packing invariant violated: {0}")]
    PackingInvariantViolated(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub mod commands;
pub mod config;
pub mod context;
pub mod database;
pub mod embeddings;
pub mod engine;
pub mod indexer;
pub mod retrieval;
pub mod tokenizer;
