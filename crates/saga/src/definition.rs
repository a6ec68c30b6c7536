//! Saga definitions and the registry that routes event types to them.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use common::SagaType;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SagaError};
use crate::updater::Saga;

/// Type token naming a locator implementation. Resolved to an instance by a
/// [`SagaResolver`](crate::resolver::SagaResolver).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocatorType(String);

impl LocatorType {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for LocatorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LocatorType {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Static description of one saga type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SagaDetails {
    saga_type: SagaType,
    locator_type: LocatorType,
    handled_event_types: BTreeSet<String>,
}

impl SagaDetails {
    /// Creates saga details. The handled set must not be empty.
    pub fn new<I, E>(
        saga_type: impl Into<SagaType>,
        locator_type: impl Into<LocatorType>,
        handled_event_types: I,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = E>,
        E: Into<String>,
    {
        let saga_type = saga_type.into();
        let handled_event_types: BTreeSet<String> =
            handled_event_types.into_iter().map(Into::into).collect();

        if handled_event_types.is_empty() {
            return Err(SagaError::InvalidDefinition(format!(
                "saga {saga_type} handles no event types"
            )));
        }

        Ok(Self {
            saga_type,
            locator_type: locator_type.into(),
            handled_event_types,
        })
    }

    /// Derives the details of a typed saga from its handler table, so the
    /// handled set is exactly what the saga can process.
    pub fn for_saga<S: Saga>(locator_type: impl Into<LocatorType>) -> Result<Self> {
        Self::new(
            S::saga_type(),
            locator_type,
            S::handlers().event_types(),
        )
    }

    pub fn saga_type(&self) -> &SagaType {
        &self.saga_type
    }

    pub fn locator_type(&self) -> &LocatorType {
        &self.locator_type
    }

    pub fn handled_event_types(&self) -> &BTreeSet<String> {
        &self.handled_event_types
    }

    pub fn handles(&self, event_type: &str) -> bool {
        self.handled_event_types.contains(event_type)
    }
}

/// Read-only mapping from event type to the sagas interested in it.
#[derive(Debug, Clone, Default)]
pub struct SagaDefinitionRegistry {
    by_event_type: HashMap<String, Vec<Arc<SagaDetails>>>,
    by_saga_type: HashMap<SagaType, Arc<SagaDetails>>,
}

impl SagaDefinitionRegistry {
    pub fn builder() -> SagaDefinitionRegistryBuilder {
        SagaDefinitionRegistryBuilder::default()
    }

    /// Returns the sagas handling `event_type`, in registration order.
    /// Unknown event types yield an empty slice.
    pub fn definitions_for(&self, event_type: &str) -> &[Arc<SagaDetails>] {
        self.by_event_type
            .get(event_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn get(&self, saga_type: &SagaType) -> Option<&Arc<SagaDetails>> {
        self.by_saga_type.get(saga_type)
    }

    /// Number of registered saga types.
    pub fn len(&self) -> usize {
        self.by_saga_type.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_saga_type.is_empty()
    }
}

/// Collects saga definitions and validates them into a registry.
#[derive(Debug, Default)]
pub struct SagaDefinitionRegistryBuilder {
    definitions: Vec<SagaDetails>,
}

impl SagaDefinitionRegistryBuilder {
    pub fn register(mut self, details: SagaDetails) -> Self {
        self.definitions.push(details);
        self
    }

    /// Builds the registry. Fails if a saga type is registered twice.
    pub fn build(self) -> Result<SagaDefinitionRegistry> {
        let mut registry = SagaDefinitionRegistry::default();

        for details in self.definitions {
            if registry.by_saga_type.contains_key(details.saga_type()) {
                return Err(SagaError::InvalidDefinition(format!(
                    "saga {} registered twice",
                    details.saga_type()
                )));
            }

            let details = Arc::new(details);
            for event_type in details.handled_event_types() {
                registry
                    .by_event_type
                    .entry(event_type.clone())
                    .or_default()
                    .push(Arc::clone(&details));
            }
            registry
                .by_saga_type
                .insert(details.saga_type().clone(), details);
        }

        Ok(registry)
    }
}
