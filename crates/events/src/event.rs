use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{AggregateId, EventError, EventId, Result, SourceId, metadata};

/// A typed event payload.
///
/// The associated name is what ends up in [`DomainEvent::event_type`] and is
/// used to route the event to interested sagas.
pub trait EventPayload: Serialize + DeserializeOwned + Send + Sync {
    /// The event type name (e.g. `"OrderPlaced"`).
    const EVENT_TYPE: &'static str;
}

/// An immutable record of something that happened to an aggregate.
///
/// This structure carries everything the saga engine needs to route the event
/// and to deduplicate its application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEvent {
    /// Unique identifier for this event.
    pub event_id: EventId,

    /// The type of the event (e.g., "OrderPlaced", "PaymentCaptured").
    pub event_type: String,

    /// The aggregate this event belongs to.
    pub aggregate_id: AggregateId,

    /// The type of aggregate (e.g., "Order").
    pub aggregate_type: String,

    /// Position of this event in its aggregate's stream.
    pub sequence_number: i64,

    /// The operation that caused this event; the saga idempotency key.
    pub source_id: SourceId,

    /// When the event was created.
    pub timestamp: DateTime<Utc>,

    /// The event payload as JSON.
    pub payload: serde_json::Value,

    /// Additional metadata about the event.
    pub metadata: HashMap<String, serde_json::Value>,
}

impl DomainEvent {
    /// Creates a new event builder.
    pub fn builder() -> DomainEventBuilder {
        DomainEventBuilder::default()
    }

    /// Decodes the payload as `E`, checking the event type first.
    pub fn decode<E: EventPayload>(&self) -> Result<E> {
        if self.event_type != E::EVENT_TYPE {
            return Err(EventError::TypeMismatch {
                expected: E::EVENT_TYPE,
                actual: self.event_type.clone(),
            });
        }
        Ok(serde_json::from_value(self.payload.clone())?)
    }

    /// Returns true if this envelope carries an `E`.
    pub fn is<E: EventPayload>(&self) -> bool {
        self.event_type == E::EVENT_TYPE
    }

    /// Reads a metadata entry as text. Numbers and booleans are rendered,
    /// other JSON values yield `None`.
    pub fn metadata_str(&self, key: &str) -> Option<String> {
        match self.metadata.get(key)? {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            serde_json::Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// Returns the correlation ID from the metadata, if any.
    pub fn correlation_id(&self) -> Option<String> {
        self.metadata_str(metadata::CORRELATION_ID)
    }
}

/// Builder for constructing domain events.
#[derive(Debug, Default)]
pub struct DomainEventBuilder {
    event_id: Option<EventId>,
    event_type: Option<String>,
    aggregate_id: Option<AggregateId>,
    aggregate_type: Option<String>,
    sequence_number: Option<i64>,
    source_id: Option<SourceId>,
    timestamp: Option<DateTime<Utc>>,
    payload: Option<serde_json::Value>,
    metadata: HashMap<String, serde_json::Value>,
}

impl DomainEventBuilder {
    /// Sets the event ID. If not set, a new ID will be generated.
    pub fn event_id(mut self, id: EventId) -> Self {
        self.event_id = Some(id);
        self
    }

    /// Sets the event type.
    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    /// Sets the aggregate ID.
    pub fn aggregate_id(mut self, id: AggregateId) -> Self {
        self.aggregate_id = Some(id);
        self
    }

    /// Sets the aggregate type.
    pub fn aggregate_type(mut self, aggregate_type: impl Into<String>) -> Self {
        self.aggregate_type = Some(aggregate_type.into());
        self
    }

    /// Sets the sequence number.
    pub fn sequence_number(mut self, sequence_number: i64) -> Self {
        self.sequence_number = Some(sequence_number);
        self
    }

    /// Sets the source ID.
    pub fn source_id(mut self, source_id: impl Into<SourceId>) -> Self {
        self.source_id = Some(source_id.into());
        self
    }

    /// Sets the timestamp. If not set, the current time will be used.
    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Sets both the event type and the payload from a typed event.
    pub fn typed_payload<E: EventPayload>(mut self, payload: &E) -> Result<Self> {
        self.event_type = Some(E::EVENT_TYPE.to_string());
        self.payload = Some(serde_json::to_value(payload)?);
        Ok(self)
    }

    /// Sets the payload from a raw JSON value.
    pub fn payload_raw(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Adds a metadata entry.
    pub fn metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Builds the event.
    ///
    /// # Panics
    ///
    /// Panics if required fields (event_type, aggregate_id, aggregate_type,
    /// sequence_number, source_id, payload) are not set.
    pub fn build(self) -> DomainEvent {
        DomainEvent {
            event_id: self.event_id.unwrap_or_default(),
            event_type: self.event_type.expect("event_type is required"),
            aggregate_id: self.aggregate_id.expect("aggregate_id is required"),
            aggregate_type: self.aggregate_type.expect("aggregate_type is required"),
            sequence_number: self.sequence_number.expect("sequence_number is required"),
            source_id: self.source_id.expect("source_id is required"),
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            payload: self.payload.expect("payload is required"),
            metadata: self.metadata,
        }
    }

    /// Tries to build the event, returning None if required fields are missing.
    pub fn try_build(self) -> Option<DomainEvent> {
        Some(DomainEvent {
            event_id: self.event_id.unwrap_or_default(),
            event_type: self.event_type?,
            aggregate_id: self.aggregate_id?,
            aggregate_type: self.aggregate_type?,
            sequence_number: self.sequence_number?,
            source_id: self.source_id?,
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            payload: self.payload?,
            metadata: self.metadata,
        })
    }
}
