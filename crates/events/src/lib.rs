//! Immutable domain event envelope.
//!
//! Events are produced upstream by event-sourced aggregates; the saga engine
//! only reads them. Typed payloads implement [`EventPayload`] and are decoded
//! from the envelope on demand.

pub mod error;
pub mod event;
pub mod metadata;

pub use common::{AggregateId, EventId, SourceId};
pub use error::{EventError, Result};
pub use event::{DomainEvent, DomainEventBuilder, EventPayload};
