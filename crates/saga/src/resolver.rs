//! Turns the type tokens in saga definitions into live instances.

use std::collections::HashMap;
use std::sync::Arc;

use common::SagaType;

use crate::definition::{LocatorType, SagaDetails};
use crate::error::Result;
use crate::locator::SagaLocator;
use crate::updater::{Saga, SagaEventUpdater, SagaUpdater};

/// Resolves locator and updater instances from their type tokens.
///
/// Implementations may hand out shared instances or build one per call.
pub trait SagaResolver: Send + Sync {
    fn locator(&self, locator_type: &LocatorType) -> Option<Arc<dyn SagaLocator>>;

    fn updater(&self, saga_type: &SagaType) -> Option<Arc<dyn SagaUpdater>>;
}

/// Explicit map-based resolver.
#[derive(Default, Clone)]
pub struct SagaCatalog {
    locators: HashMap<LocatorType, Arc<dyn SagaLocator>>,
    updaters: HashMap<SagaType, Arc<dyn SagaUpdater>>,
}

impl SagaCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a locator under a token. A later registration replaces an
    /// earlier one.
    pub fn register_locator(
        &mut self,
        locator_type: impl Into<LocatorType>,
        locator: impl SagaLocator + 'static,
    ) -> &mut Self {
        self.locators.insert(locator_type.into(), Arc::new(locator));
        self
    }

    pub fn register_updater(
        &mut self,
        saga_type: impl Into<SagaType>,
        updater: impl SagaUpdater + 'static,
    ) -> &mut Self {
        self.updaters.insert(saga_type.into(), Arc::new(updater));
        self
    }

    /// Registers a typed saga together with its locator and returns its
    /// details, ready for the definition registry.
    pub fn register_saga<S: Saga>(
        &mut self,
        locator_type: impl Into<LocatorType>,
        locator: impl SagaLocator + 'static,
    ) -> Result<SagaDetails> {
        let locator_type = locator_type.into();
        let details = SagaDetails::for_saga::<S>(locator_type.clone())?;
        self.register_locator(locator_type, locator);
        self.register_updater(S::saga_type(), SagaEventUpdater::<S>::new());
        Ok(details)
    }
}

impl SagaResolver for SagaCatalog {
    fn locator(&self, locator_type: &LocatorType) -> Option<Arc<dyn SagaLocator>> {
        self.locators.get(locator_type).cloned()
    }

    fn updater(&self, saga_type: &SagaType) -> Option<Arc<dyn SagaUpdater>> {
        self.updaters.get(saga_type).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SagaError;
    use crate::locator::AggregateIdLocator;
    use crate::updater::{SagaHandlers, SagaScope};
    use events::EventPayload;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize)]
    struct Started {}

    impl EventPayload for Started {
        const EVENT_TYPE: &'static str = "Started";
    }

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct Probe;

    impl Saga for Probe {
        const SAGA_TYPE: &'static str = "Probe";

        fn handlers() -> SagaHandlers<Self> {
            SagaHandlers::new().on(|_: &mut Probe, _: Started, _: &mut SagaScope| Ok(()))
        }
    }

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct Silent;

    impl Saga for Silent {
        const SAGA_TYPE: &'static str = "Silent";

        fn handlers() -> SagaHandlers<Self> {
            SagaHandlers::new()
        }
    }

    #[test]
    fn test_register_saga_wires_locator_and_updater() {
        let mut catalog = SagaCatalog::new();
        let details = catalog
            .register_saga::<Probe>("ByAggregateId", AggregateIdLocator)
            .unwrap();

        assert_eq!(details.saga_type(), &SagaType::from("Probe"));
        assert!(details.handles("Started"));
        assert!(catalog.locator(details.locator_type()).is_some());
        assert!(catalog.updater(details.saga_type()).is_some());
    }

    #[test]
    fn test_unknown_tokens_resolve_to_none() {
        let catalog = SagaCatalog::new();
        assert!(catalog.locator(&LocatorType::from("Nope")).is_none());
        assert!(catalog.updater(&SagaType::from("Nope")).is_none());
    }

    #[test]
    fn test_saga_without_handlers_is_invalid() {
        let mut catalog = SagaCatalog::new();
        let result = catalog.register_saga::<Silent>("ByAggregateId", AggregateIdLocator);
        assert!(matches!(result, Err(SagaError::InvalidDefinition(_))));
    }
}
