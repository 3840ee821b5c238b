use thiserror::Error;

/// Failures surfaced by the store, the inference gateway and the orchestrator.
#[derive(Debug, Error)]
pub enum ChatError {
    /// A required field was missing or blank.
    #[error("{0}")]
    Validation(String),

    #[error("conversation not found: {0}")]
    NotFound(String),

    /// The inference service was unreachable or its stream broke.
    #[error("inference service error: {0}")]
    Gateway(String),

    #[error("persistence error: {0}")]
    Persistence(String),
}

impl From<redis::RedisError> for ChatError {
    fn from(e: redis::RedisError) -> Self {
        ChatError::Persistence(e.to_string())
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(e: reqwest::Error) -> Self {
        ChatError::Gateway(e.to_string())
    }
}
