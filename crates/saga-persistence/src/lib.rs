//! Persistence boundary for saga state.
//!
//! A [`SagaRepository`] loads a saga record by key and writes it back with a
//! compare-and-swap on the record version. Two implementations are provided:
//! [`InMemorySagaRepository`] for tests and single-process use, and
//! [`PostgresSagaRepository`] for durable storage.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod record;
pub mod repository;

pub use common::{SagaId, SagaType, SourceId};
pub use error::{PersistenceError, Result};
pub use memory::InMemorySagaRepository;
pub use postgres::PostgresSagaRepository;
pub use record::{SagaKey, SagaRecord, Version};
pub use repository::SagaRepository;
