//! Ambient information handed to a saga for one event.

use chrono::{DateTime, Utc};
use common::{EventId, SagaId, SagaType, SourceId};
use events::DomainEvent;

/// Per-dispatch context. Built fresh for every (event, saga) pair and never
/// persisted.
#[derive(Debug, Clone)]
pub struct SagaContext {
    pub saga_type: SagaType,
    pub saga_id: SagaId,
    /// Source ID of the event being applied.
    pub source_id: SourceId,
    /// The event being applied.
    pub causation_id: EventId,
    /// Taken from the event metadata; falls back to the event ID when the
    /// event starts a new flow.
    pub correlation_id: String,
    pub dispatched_at: DateTime<Utc>,
}

impl SagaContext {
    pub fn new(saga_type: SagaType, saga_id: SagaId, event: &DomainEvent) -> Self {
        Self {
            saga_type,
            saga_id,
            source_id: event.source_id.clone(),
            causation_id: event.event_id,
            correlation_id: event
                .correlation_id()
                .unwrap_or_else(|| event.event_id.to_string()),
            dispatched_at: Utc::now(),
        }
    }
}
