//! Error types for Threadline
//!
//! Provides a unified error type for the store, services and CLI.

use std::fmt;
use thread_context::ContextError;

/// Result type alias for Threadline operations
pub type Result<T> = std::result::Result<T, ThreadlineError>;

/// Main error type for Threadline operations
#[derive(Debug)]
pub enum ThreadlineError {
    /// Configuration error
    Config(String),

    /// Database error
    Database(String),

    /// Rejected input
    Validation(String),

    /// Not found error
    NotFound(String),

    /// Context construction error
    Context(ContextError),

    /// LLM client error
    Llm(llm::LlmError),

    /// IO error
    Io(std::io::Error),

    /// Serialization/deserialization error
    Serde(serde_json::Error),

    /// SQL error
    Sqlx(sqlx::Error),

    /// Generic error with message
    Other(String),
}

impl ThreadlineError {
    /// Whether the caller sent something invalid or unknown
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::NotFound(_) | Self::Context(ContextError::UnknownModel(_))
        )
    }
}

impl fmt::Display for ThreadlineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "Configuration error: {}", msg),
            Self::Database(msg) => write!(f, "Database error: {}", msg),
            Self::Validation(msg) => write!(f, "Invalid request: {}", msg),
            Self::NotFound(msg) => write!(f, "Not found: {}", msg),
            Self::Context(err) => write!(f, "Context error: {}", err),
            Self::Llm(err) => write!(f, "LLM error: {}", err),
            Self::Io(err) => write!(f, "IO error: {}", err),
            Self::Serde(err) => write!(f, "Serialization error: {}", err),
            Self::Sqlx(err) => write!(f, "SQL error: {}", err),
            Self::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for ThreadlineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Context(err) => Some(err),
            Self::Llm(err) => Some(err),
            Self::Io(err) => Some(err),
            Self::Serde(err) => Some(err),
            Self::Sqlx(err) => Some(err),
            _ => None,
        }
    }
}

// Conversions from common error types
impl From<ContextError> for ThreadlineError {
    fn from(err: ContextError) -> Self {
        Self::Context(err)
    }
}

impl From<llm::LlmError> for ThreadlineError {
    fn from(err: llm::LlmError) -> Self {
        Self::Llm(err)
    }
}

impl From<std::io::Error> for ThreadlineError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<serde_json::Error> for ThreadlineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serde(err)
    }
}

impl From<sqlx::Error> for ThreadlineError {
    fn from(err: sqlx::Error) -> Self {
        Self::Sqlx(err)
    }
}

impl From<anyhow::Error> for ThreadlineError {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}

impl From<String> for ThreadlineError {
    fn from(msg: String) -> Self {
        Self::Other(msg)
    }
}

impl From<&str> for ThreadlineError {
    fn from(msg: &str) -> Self {
        Self::Other(msg.to_string())
    }
}
