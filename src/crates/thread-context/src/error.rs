//! Error types for context construction.

use thiserror::Error;

/// Result type for context operations.
pub type Result<T> = std::result::Result<T, ContextError>;

/// Errors raised while building a model context.
#[derive(Debug, Error)]
pub enum ContextError {
    /// Model identifier is not in the model table.
    #[error("Unknown model: {0}")]
    UnknownModel(String),

    /// Tokenizer could not be loaded or failed to encode.
    #[error("Tokenizer error: {0}")]
    Tokenizer(String),

    /// Operation requires at least one response version.
    #[error("Response {0} has no versions")]
    NoVersions(String),

    /// Memory collaborator failed.
    #[error("Memory error: {0}")]
    Memory(String),

    /// File content could not be fetched.
    #[error("File resolution error: {0}")]
    FileResolution(String),
}

impl ContextError {
    /// Whether the error indicates a configuration problem rather than bad data.
    pub fn is_misconfiguration(&self) -> bool {
        matches!(self, ContextError::UnknownModel(_) | ContextError::Tokenizer(_))
    }
}
