//! Saga dispatch engine.
//!
//! Delivers domain events to the long-running process managers (sagas) that
//! react to them. For every event the engine:
//! 1. looks up the saga types interested in its event type,
//! 2. asks each saga's locator which instance the event addresses,
//! 3. loads that instance, applies the event through the saga's updater and
//!    commits the result under optimistic concurrency,
//! 4. hands failures to an error handler that suppresses, fails or rethrows.
//!
//! Each event source ID is applied at most once per saga instance, so
//! redelivering a batch is safe.

pub mod command;
pub mod config;
pub mod context;
pub mod coordinator;
pub mod definition;
pub mod error;
pub mod error_handler;
pub mod instance;
pub mod locator;
pub mod resolver;
pub mod state;
pub mod store;
pub mod updater;

pub use command::{CommandPublisher, InMemoryCommandPublisher, NullCommandPublisher, SagaCommand};
pub use config::{DispatchConfig, StoreConfig};
pub use context::SagaContext;
pub use coordinator::{DispatchCoordinator, DispatchReport, SagaDispatcher};
pub use definition::{LocatorType, SagaDefinitionRegistry, SagaDefinitionRegistryBuilder, SagaDetails};
pub use error::{Result, SagaError};
pub use error_handler::{ErrorDecision, ErrorPolicy, SagaErrorHandler};
pub use instance::SagaInstance;
pub use locator::{AggregateIdLocator, FnLocator, MetadataLocator, SagaLocator};
pub use resolver::{SagaCatalog, SagaResolver};
pub use state::SagaState;
pub use store::{SagaMutation, SagaStore, SagaUpdate, TransactionalSagaStore, UpdateOutcome};
pub use updater::{Saga, SagaEventUpdater, SagaHandlers, SagaScope, SagaUpdater};
