use thiserror::Error;

/// Errors raised while reading a domain event.
#[derive(Debug, Error)]
pub enum EventError {
    /// The envelope holds a different event type than the one requested.
    #[error("Event type mismatch: expected {expected}, found {actual}")]
    TypeMismatch {
        expected: &'static str,
        actual: String,
    },

    /// The payload could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for event operations.
pub type Result<T> = std::result::Result<T, EventError>;
