//! Error types for the tax-law agent.
//!
//! One enum covers every failure a turn can surface. Quality-correction
//! outcomes (ungrounded or unhelpful answers, an exhausted retry budget) are
//! never errors; they are ordinary graph transitions.

use thiserror::Error;

/// Unified error type for the workspace.
///
/// All library functions return `Result<T, AppError>`.
#[derive(Error, Debug)]
pub enum AppError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O and filesystem errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Reasoning capability transport errors (HTTP, timeout, unreadable body)
    #[error("LLM error: {0}")]
    Llm(String),

    /// The reasoning capability did not return a schema-conformant decision
    #[error("Classification failed: {0}")]
    Classification(String),

    /// Vector or web search capability unavailable
    #[error("Retrieval error: {0}")]
    Retrieval(String),

    /// Knowledge base ingestion and index errors
    #[error("Knowledge error: {0}")]
    Knowledge(String),

    /// Prompt system errors
    #[error("Prompt error: {0}")]
    Prompt(String),

    /// A pipeline node or branch failed to complete
    #[error("Graph error: {0}")]
    Graph(String),

    /// Conversation store errors
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors
    #[error("{0}")]
    Other(String),
}

impl AppError {
    /// Whether the error came from a capability call that may succeed if the
    /// caller retries the whole turn.
    pub fn is_transient(&self) -> bool {
        matches!(self, AppError::Llm(_) | AppError::Retrieval(_))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for AppError {
    fn from(err: serde_yaml::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_errors() {
        assert!(AppError::Llm("timeout".into()).is_transient());
        assert!(AppError::Retrieval("down".into()).is_transient());
        assert!(!AppError::Classification("bad json".into()).is_transient());
    }

    #[test]
    fn test_error_display() {
        let err = AppError::Classification("missing field `Score`".into());
        assert_eq!(err.to_string(), "Classification failed: missing field `Score`");
    }
}
