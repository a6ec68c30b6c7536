//! Value-typed identifiers shared by the saga dispatch crates.

pub mod types;

pub use types::{AggregateId, EventId, SagaId, SagaType, SourceId};
