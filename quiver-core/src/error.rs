//! Error types for Quiver setup-time operations
//!
//! Call-time failures are never surfaced through this type; they are reified
//! into a [`ToolResult`](crate::tools::ToolResult) by the execution engine.

/// Result type for Quiver operations
pub type Result<T> = std::result::Result<T, QuiverError>;

/// Error types for the Quiver runtime
#[derive(Debug, thiserror::Error)]
pub enum QuiverError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A tool definition was rejected while being built
    #[error("Invalid tool definition: {0}")]
    InvalidDefinition(String),

    /// Schema compilation or transformation failed
    #[error("Schema error: {0}")]
    Schema(String),

    /// A combinator was given arguments it cannot work with
    #[error("Composition error: {0}")]
    Composition(String),

    /// Bound or omitted keys that the schema does not declare
    #[error("Unknown keys: {}", keys.join(", "))]
    UnknownKeys {
        /// The offending keys, sorted
        keys: Vec<String>,
    },

    /// Registry operation failed
    #[error("Registry error: {0}")]
    Registry(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<String> for QuiverError {
    fn from(s: String) -> Self {
        QuiverError::Other(s)
    }
}

impl From<&str> for QuiverError {
    fn from(s: &str) -> Self {
        QuiverError::Other(s.to_string())
    }
}

impl From<anyhow::Error> for QuiverError {
    fn from(err: anyhow::Error) -> Self {
        QuiverError::Other(err.to_string())
    }
}
