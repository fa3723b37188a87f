use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Operation failed: {0}")]
    Operation(String),

    #[error("Document store unavailable: {0}")]
    Store(String),

    #[error("Vector index error: {0}")]
    VectorIndex(String),

    #[error("Reasoning collaborator error: {0}")]
    Reasoning(String),

    #[error("Strategy '{strategy}' timed out after {elapsed_ms}ms")]
    Timeout { strategy: String, elapsed_ms: u64 },

    #[error("Invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

impl Error {
    /// Wraps a document-store failure, keeping the full cause chain.
    pub fn store(err: &anyhow::Error) -> Self {
        Self::Store(format!("{err:#}"))
    }

    pub fn vector(err: &anyhow::Error) -> Self {
        Self::VectorIndex(format!("{err:#}"))
    }

    pub fn reasoning(err: &anyhow::Error) -> Self {
        Self::Reasoning(format!("{err:#}"))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
