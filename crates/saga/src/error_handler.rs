//! Decides what happens to a saga update that failed.

use std::collections::HashMap;

use async_trait::async_trait;
use common::{SagaId, SagaType};
use events::DomainEvent;
use tokio_util::sync::CancellationToken;

use crate::definition::SagaDetails;
use crate::error::SagaError;

/// The fate of a failed saga update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorDecision {
    /// Log the error and carry on as if the event was processed.
    Suppress,
    /// Move the saga to `Failed` and carry on.
    Fail,
    /// Abort the dispatch with the error.
    Rethrow,
}

impl ErrorDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorDecision::Suppress => "suppress",
            ErrorDecision::Fail => "fail",
            ErrorDecision::Rethrow => "rethrow",
        }
    }
}

impl std::fmt::Display for ErrorDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handles errors raised while updating one saga instance.
///
/// Configuration errors and cancellation never reach the handler.
#[async_trait]
pub trait SagaErrorHandler: Send + Sync {
    async fn handle(
        &self,
        saga_id: &SagaId,
        details: &SagaDetails,
        event: &DomainEvent,
        error: &SagaError,
        cancel: &CancellationToken,
    ) -> ErrorDecision;
}

/// A fixed decision with optional per-saga-type overrides.
#[derive(Debug, Clone)]
pub struct ErrorPolicy {
    default: ErrorDecision,
    overrides: HashMap<SagaType, ErrorDecision>,
}

impl ErrorPolicy {
    fn with_default(default: ErrorDecision) -> Self {
        Self {
            default,
            overrides: HashMap::new(),
        }
    }

    pub fn rethrow() -> Self {
        Self::with_default(ErrorDecision::Rethrow)
    }

    pub fn suppress() -> Self {
        Self::with_default(ErrorDecision::Suppress)
    }

    pub fn fail() -> Self {
        Self::with_default(ErrorDecision::Fail)
    }

    pub fn with_override(mut self, saga_type: impl Into<SagaType>, decision: ErrorDecision) -> Self {
        self.overrides.insert(saga_type.into(), decision);
        self
    }

    pub fn decision_for(&self, saga_type: &SagaType) -> ErrorDecision {
        self.overrides.get(saga_type).copied().unwrap_or(self.default)
    }
}

impl Default for ErrorPolicy {
    fn default() -> Self {
        Self::rethrow()
    }
}

#[async_trait]
impl SagaErrorHandler for ErrorPolicy {
    async fn handle(
        &self,
        saga_id: &SagaId,
        details: &SagaDetails,
        event: &DomainEvent,
        error: &SagaError,
        _cancel: &CancellationToken,
    ) -> ErrorDecision {
        let decision = self.decision_for(details.saga_type());
        tracing::warn!(
            saga_type = %details.saga_type(),
            %saga_id,
            event_type = %event.event_type,
            source_id = %event.source_id,
            %decision,
            error = %error,
            "saga update failed"
        );
        decision
    }
}
