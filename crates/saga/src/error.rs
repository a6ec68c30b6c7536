//! Saga error types.

use common::SagaType;
use events::EventError;
use saga_persistence::{PersistenceError, SagaKey};
use thiserror::Error;

/// Errors that can occur while dispatching events to sagas.
#[derive(Debug, Error)]
pub enum SagaError {
    /// A saga definition is malformed (empty handled set, duplicate type).
    #[error("Invalid saga definition: {0}")]
    InvalidDefinition(String),

    /// An event type is declared as handled but the saga has no handler for it.
    #[error("Saga {saga_type} declares event type {event_type} but has no handler for it")]
    MissingHandler {
        saga_type: SagaType,
        event_type: String,
    },

    /// The resolver has no instance for a type token.
    #[error("No {kind} registered for {token}")]
    Unresolved { kind: &'static str, token: String },

    /// The saga's business logic refused the event.
    #[error("Saga rejected event: {0}")]
    Business(String),

    /// Optimistic concurrency retries were exhausted.
    #[error("Concurrency conflict on saga {key} after {attempts} attempts")]
    ConcurrencyConflict { key: SagaKey, attempts: u32 },

    /// The stored record could not be turned back into a saga.
    #[error("Corrupt saga record {key}: {reason}")]
    CorruptRecord { key: SagaKey, reason: String },

    /// A locator could not compute a saga ID.
    #[error("Saga locator failed: {0}")]
    Locator(String),

    /// Commands emitted by a saga could not be published.
    #[error("Command publishing failed: {0}")]
    CommandPublish(String),

    /// Persisting a saga that an error handler decided to fail did not work.
    #[error("Could not persist failure of saga {key}: {source}")]
    FailurePersistence {
        key: SagaKey,
        source: Box<SagaError>,
    },

    /// Cancellation was requested before the update committed.
    #[error("Dispatch cancelled")]
    Cancelled,

    /// Persistence error.
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    /// Event payload error.
    #[error("Event error: {0}")]
    Event(#[from] EventError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SagaError {
    /// Creates a business failure.
    pub fn business(reason: impl Into<String>) -> Self {
        SagaError::Business(reason.into())
    }

    /// Returns true for saga definition bugs. These are never routed to an
    /// error handler.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            SagaError::InvalidDefinition(_)
                | SagaError::MissingHandler { .. }
                | SagaError::Unresolved { .. }
        )
    }

    /// Returns true for errors that abort a dispatch regardless of policy.
    pub fn is_fatal(&self) -> bool {
        self.is_configuration_error()
            || matches!(
                self,
                SagaError::Cancelled | SagaError::FailurePersistence { .. }
            )
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
