use thiserror::Error;

use crate::{SagaKey, Version};

/// Errors that can occur when reading or writing saga records.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// The stored version did not match the version the writer loaded.
    #[error("Concurrency conflict for saga {key}: expected version {expected}, found {actual}")]
    ConcurrencyConflict {
        key: SagaKey,
        expected: Version,
        actual: Version,
    },

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PersistenceError {
    /// Returns true for optimistic-concurrency collisions.
    pub fn is_conflict(&self) -> bool {
        matches!(self, PersistenceError::ConcurrencyConflict { .. })
    }
}

/// Result type for persistence operations.
pub type Result<T> = std::result::Result<T, PersistenceError>;
