//! Saga locators compute which saga instance an event addresses.

use async_trait::async_trait;
use common::SagaId;
use events::DomainEvent;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// Computes the saga instance an event belongs to, for one saga type.
///
/// Implementations must be deterministic: the same event always yields the
/// same ID (or always `None`). Idempotent replay depends on it.
#[async_trait]
pub trait SagaLocator: Send + Sync {
    /// Returns the saga ID, or `None` if the event addresses no instance.
    async fn locate(&self, event: &DomainEvent, cancel: &CancellationToken)
    -> Result<Option<SagaId>>;
}

/// Uses the event's aggregate ID as the saga ID.
#[derive(Debug, Clone, Copy, Default)]
pub struct AggregateIdLocator;

#[async_trait]
impl SagaLocator for AggregateIdLocator {
    async fn locate(
        &self,
        event: &DomainEvent,
        _cancel: &CancellationToken,
    ) -> Result<Option<SagaId>> {
        Ok(Some(SagaId::from(event.aggregate_id)))
    }
}

/// Reads the saga ID from a metadata entry; events without it are skipped.
#[derive(Debug, Clone)]
pub struct MetadataLocator {
    key: String,
}

impl MetadataLocator {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

#[async_trait]
impl SagaLocator for MetadataLocator {
    async fn locate(
        &self,
        event: &DomainEvent,
        _cancel: &CancellationToken,
    ) -> Result<Option<SagaId>> {
        Ok(event.metadata_str(&self.key).map(SagaId::new))
    }
}

/// Wraps a synchronous function.
pub struct FnLocator<F> {
    locate: F,
}

impl<F> FnLocator<F>
where
    F: Fn(&DomainEvent) -> Option<SagaId> + Send + Sync,
{
    pub fn new(locate: F) -> Self {
        Self { locate }
    }
}

#[async_trait]
impl<F> SagaLocator for FnLocator<F>
where
    F: Fn(&DomainEvent) -> Option<SagaId> + Send + Sync,
{
    async fn locate(
        &self,
        event: &DomainEvent,
        _cancel: &CancellationToken,
    ) -> Result<Option<SagaId>> {
        Ok((self.locate)(event))
    }
}
