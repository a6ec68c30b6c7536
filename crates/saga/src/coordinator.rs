//! Dispatches domain events to the sagas interested in them.

use std::sync::Arc;

use async_trait::async_trait;
use events::DomainEvent;
use futures_util::{StreamExt, stream};
use saga_persistence::SagaKey;
use tokio_util::sync::CancellationToken;

use crate::command::{CommandPublisher, NullCommandPublisher};
use crate::config::DispatchConfig;
use crate::context::SagaContext;
use crate::definition::{SagaDefinitionRegistry, SagaDetails};
use crate::error::{Result, SagaError};
use crate::error_handler::{ErrorDecision, ErrorPolicy, SagaErrorHandler};
use crate::instance::SagaInstance;
use crate::resolver::SagaResolver;
use crate::store::{SagaMutation, SagaStore, UpdateOutcome};
use crate::updater::SagaUpdater;

/// Entry point for delivering domain events to sagas.
#[async_trait]
pub trait SagaDispatcher: Send + Sync {
    /// Delivers `events` in order to every saga instance they address.
    ///
    /// Returns once every (event, saga) pair is resolved, or with the first
    /// error that aborts the dispatch.
    async fn dispatch(
        &self,
        events: &[DomainEvent],
        cancel: &CancellationToken,
    ) -> Result<DispatchReport>;
}

/// Counts what a dispatch did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Events examined.
    pub events: usize,
    /// Updates committed.
    pub applied: usize,
    /// Updates skipped because the event's source ID was already applied.
    pub already_applied: usize,
    /// Updates skipped because the saga had already finished.
    pub terminal: usize,
    /// (event, saga) pairs the locator did not map to an instance.
    pub unlocated: usize,
    /// Failed updates the error handler suppressed.
    pub suppressed: usize,
    /// Failed updates that moved their saga to `Failed`.
    pub failed: usize,
}

impl DispatchReport {
    fn record(&mut self, outcome: CandidateOutcome) {
        match outcome {
            CandidateOutcome::Unlocated => self.unlocated += 1,
            CandidateOutcome::Updated(UpdateOutcome::Applied) => self.applied += 1,
            CandidateOutcome::Updated(UpdateOutcome::AlreadyApplied) => self.already_applied += 1,
            CandidateOutcome::Updated(UpdateOutcome::Terminal) => self.terminal += 1,
            CandidateOutcome::Suppressed => self.suppressed += 1,
            CandidateOutcome::Failed => self.failed += 1,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum CandidateOutcome {
    Unlocated,
    Updated(UpdateOutcome),
    Suppressed,
    Failed,
}

/// Runs the updater on the saga and publishes the commands it emitted.
struct ApplyEvent<'a> {
    updater: &'a dyn SagaUpdater,
    publisher: &'a dyn CommandPublisher,
    event: &'a DomainEvent,
    context: SagaContext,
}

#[async_trait]
impl SagaMutation for ApplyEvent<'_> {
    async fn apply(&self, saga: &mut SagaInstance, cancel: &CancellationToken) -> Result<()> {
        self.updater
            .process(saga, self.event, &self.context, cancel)
            .await?;

        let commands = saga.take_commands();
        if !commands.is_empty() {
            tracing::debug!(count = commands.len(), "publishing saga commands");
            self.publisher.publish(commands, cancel).await?;
        }
        Ok(())
    }
}

/// Moves the saga to `Failed`.
struct FailSaga {
    reason: String,
}

#[async_trait]
impl SagaMutation for FailSaga {
    async fn apply(&self, saga: &mut SagaInstance, _cancel: &CancellationToken) -> Result<()> {
        saga.fail(self.reason.clone());
        Ok(())
    }
}

/// Fans each event out to its candidate sagas.
///
/// Events are handled strictly one after another; the candidates of one event
/// are updated concurrently, up to `max_concurrency` at a time. Per-instance
/// exclusion is the store's job.
pub struct DispatchCoordinator {
    registry: Arc<SagaDefinitionRegistry>,
    resolver: Arc<dyn SagaResolver>,
    store: Arc<dyn SagaStore>,
    error_handler: Arc<dyn SagaErrorHandler>,
    publisher: Arc<dyn CommandPublisher>,
    config: DispatchConfig,
}

impl DispatchCoordinator {
    /// Creates a coordinator that rethrows every update failure and drops
    /// emitted commands.
    pub fn new(
        registry: Arc<SagaDefinitionRegistry>,
        resolver: Arc<dyn SagaResolver>,
        store: Arc<dyn SagaStore>,
    ) -> Self {
        Self {
            registry,
            resolver,
            store,
            error_handler: Arc::new(ErrorPolicy::default()),
            publisher: Arc::new(NullCommandPublisher),
            config: DispatchConfig::default(),
        }
    }

    pub fn with_error_handler(mut self, handler: Arc<dyn SagaErrorHandler>) -> Self {
        self.error_handler = handler;
        self
    }

    pub fn with_command_publisher(mut self, publisher: Arc<dyn CommandPublisher>) -> Self {
        self.publisher = publisher;
        self
    }

    pub fn with_config(mut self, config: DispatchConfig) -> Self {
        self.config = config;
        self
    }

    pub fn registry(&self) -> &SagaDefinitionRegistry {
        &self.registry
    }

    async fn process_candidate(
        &self,
        details: Arc<SagaDetails>,
        event: &DomainEvent,
        cancel: &CancellationToken,
    ) -> Result<CandidateOutcome> {
        let locator = self
            .resolver
            .locator(details.locator_type())
            .ok_or_else(|| SagaError::Unresolved {
                kind: "locator",
                token: details.locator_type().to_string(),
            })?;

        let Some(saga_id) = locator.locate(event, cancel).await? else {
            tracing::trace!(saga_type = %details.saga_type(), "event addresses no saga instance");
            return Ok(CandidateOutcome::Unlocated);
        };

        let updater = self
            .resolver
            .updater(details.saga_type())
            .ok_or_else(|| SagaError::Unresolved {
                kind: "updater",
                token: details.saga_type().to_string(),
            })?;

        let key = SagaKey::new(details.saga_type().clone(), saga_id.clone());
        let mutation = ApplyEvent {
            updater: updater.as_ref(),
            publisher: self.publisher.as_ref(),
            event,
            context: SagaContext::new(details.saga_type().clone(), saga_id, event),
        };

        match self
            .store
            .update(&key, &event.source_id, &mutation, cancel)
            .await
        {
            Ok(update) => Ok(CandidateOutcome::Updated(update.outcome)),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => self.handle_failure(&key, &details, event, e, cancel).await,
        }
    }

    async fn handle_failure(
        &self,
        key: &SagaKey,
        details: &SagaDetails,
        event: &DomainEvent,
        error: SagaError,
        cancel: &CancellationToken,
    ) -> Result<CandidateOutcome> {
        let decision = self
            .error_handler
            .handle(&key.saga_id, details, event, &error, cancel)
            .await;
        metrics::counter!("saga_errors_total", "decision" => decision.as_str()).increment(1);

        match decision {
            ErrorDecision::Suppress => Ok(CandidateOutcome::Suppressed),
            ErrorDecision::Rethrow => Err(error),
            ErrorDecision::Fail => {
                let mutation = FailSaga {
                    reason: error.to_string(),
                };
                match self
                    .store
                    .update(key, &event.source_id, &mutation, cancel)
                    .await
                {
                    Ok(update) if update.is_applied() => {
                        tracing::info!(saga = %key, reason = %error, "saga failed");
                        Ok(CandidateOutcome::Failed)
                    }
                    // Another writer finished the saga or applied the event
                    // first; there is nothing left to fail.
                    Ok(update) => Ok(CandidateOutcome::Updated(update.outcome)),
                    Err(SagaError::Cancelled) => Err(SagaError::Cancelled),
                    Err(source) => Err(SagaError::FailurePersistence {
                        key: key.clone(),
                        source: Box::new(source),
                    }),
                }
            }
        }
    }
}

#[async_trait]
impl SagaDispatcher for DispatchCoordinator {
    #[tracing::instrument(skip(self, events, cancel), fields(events = events.len()))]
    async fn dispatch(
        &self,
        events: &[DomainEvent],
        cancel: &CancellationToken,
    ) -> Result<DispatchReport> {
        let start = std::time::Instant::now();
        let mut report = DispatchReport::default();

        for event in events {
            if cancel.is_cancelled() {
                return Err(SagaError::Cancelled);
            }
            report.events += 1;
            metrics::counter!("saga_dispatch_events_total").increment(1);

            let candidates = self.registry.definitions_for(&event.event_type);
            if candidates.is_empty() {
                tracing::trace!(event_type = %event.event_type, "no saga handles event");
                continue;
            }

            let updates: Vec<_> = candidates
                .iter()
                .map(|details| self.process_candidate(Arc::clone(details), event, cancel))
                .collect();
            let mut results = stream::iter(updates).buffered(self.config.max_concurrency.max(1));

            while let Some(result) = results.next().await {
                report.record(result?);
            }
        }

        metrics::histogram!("saga_dispatch_duration_seconds")
            .record(start.elapsed().as_secs_f64());
        tracing::debug!(?report, "dispatch finished");
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::definition::LocatorType;
    use crate::locator::{FnLocator, SagaLocator};
    use crate::state::SagaState;
    use crate::store::SagaUpdate;
    use common::{AggregateId, SagaId, SagaType, SourceId};

    const SAGA_TYPE: &str = "TestSaga";
    const LOCATOR: &str = "Constant";

    /// Counts calls and optionally refuses every event.
    #[derive(Default)]
    struct CountingUpdater {
        calls: AtomicUsize,
        refuse: bool,
    }

    #[async_trait]
    impl SagaUpdater for CountingUpdater {
        async fn process(
            &self,
            _saga: &mut SagaInstance,
            _event: &DomainEvent,
            _context: &SagaContext,
            _cancel: &CancellationToken,
        ) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.refuse {
                return Err(SagaError::business("refused"));
            }
            Ok(())
        }
    }

    /// Store that hands every mutation a running saga and commits nothing.
    #[derive(Default)]
    struct FakeStore {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SagaStore for FakeStore {
        async fn update(
            &self,
            key: &SagaKey,
            _source_id: &SourceId,
            mutation: &dyn SagaMutation,
            cancel: &CancellationToken,
        ) -> Result<SagaUpdate> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut saga = SagaInstance::new(key.saga_type.clone(), key.saga_id.clone());
            saga.set_state(SagaState::Running);
            mutation.apply(&mut saga, cancel).await?;
            Ok(SagaUpdate {
                saga,
                outcome: UpdateOutcome::Applied,
            })
        }
    }

    struct TestResolver {
        locator: Arc<dyn SagaLocator>,
        updater: Option<Arc<CountingUpdater>>,
    }

    impl SagaResolver for TestResolver {
        fn locator(&self, locator_type: &LocatorType) -> Option<Arc<dyn SagaLocator>> {
            (locator_type.as_str() == LOCATOR).then(|| Arc::clone(&self.locator))
        }

        fn updater(&self, saga_type: &SagaType) -> Option<Arc<dyn SagaUpdater>> {
            if saga_type.as_str() != SAGA_TYPE {
                return None;
            }
            self.updater
                .as_ref()
                .map(|u| Arc::clone(u) as Arc<dyn SagaUpdater>)
        }
    }

    struct Fixture {
        coordinator: DispatchCoordinator,
        store: Arc<FakeStore>,
        updater: Arc<CountingUpdater>,
    }

    fn fixture(locator: impl SagaLocator + 'static, updater: CountingUpdater, wire_updater: bool) -> Fixture {
        let registry = SagaDefinitionRegistry::builder()
            .register(SagaDetails::new(SAGA_TYPE, LOCATOR, ["ThingyPinged"]).unwrap())
            .build()
            .unwrap();
        let updater = Arc::new(updater);
        let store = Arc::new(FakeStore::default());
        let resolver = TestResolver {
            locator: Arc::new(locator),
            updater: wire_updater.then(|| Arc::clone(&updater)),
        };
        let coordinator = DispatchCoordinator::new(
            Arc::new(registry),
            Arc::new(resolver),
            Arc::clone(&store) as Arc<dyn SagaStore>,
        );
        Fixture {
            coordinator,
            store,
            updater,
        }
    }

    fn constant_locator() -> impl SagaLocator {
        FnLocator::new(|_: &DomainEvent| Some(SagaId::from("constant")))
    }

    fn pinged(n: usize) -> Vec<DomainEvent> {
        let aggregate_id = AggregateId::new();
        (1..=n)
            .map(|i| {
                DomainEvent::builder()
                    .event_type("ThingyPinged")
                    .aggregate_id(aggregate_id)
                    .aggregate_type("Thingy")
                    .sequence_number(i as i64)
                    .source_id(format!("ping-{i}"))
                    .payload_raw(serde_json::json!({}))
                    .build()
            })
            .collect()
    }

    #[tokio::test]
    async fn test_each_event_is_processed_once() {
        let f = fixture(constant_locator(), CountingUpdater::default(), true);

        let report = f
            .coordinator
            .dispatch(&pinged(4), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(f.updater.calls.load(Ordering::SeqCst), 4);
        assert_eq!(report.events, 4);
        assert_eq!(report.applied, 4);
    }

    #[tokio::test]
    async fn test_unlocated_event_skips_store_and_updater() {
        let f = fixture(
            FnLocator::new(|_: &DomainEvent| None),
            CountingUpdater::default(),
            true,
        );

        let report = f
            .coordinator
            .dispatch(&pinged(2), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.unlocated, 2);
        assert_eq!(f.store.calls.load(Ordering::SeqCst), 0);
        assert_eq!(f.updater.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unhandled_event_type_is_ignored() {
        let f = fixture(constant_locator(), CountingUpdater::default(), true);
        let other = DomainEvent::builder()
            .event_type("SomethingElse")
            .aggregate_id(AggregateId::new())
            .aggregate_type("Thingy")
            .sequence_number(1)
            .source_id("x")
            .payload_raw(serde_json::json!({}))
            .build();

        let report = f
            .coordinator
            .dispatch(&[other], &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report, DispatchReport { events: 1, ..Default::default() });
        assert_eq!(f.store.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_default_policy_rethrows_and_stops() {
        let refusing = CountingUpdater {
            refuse: true,
            ..Default::default()
        };
        let f = fixture(constant_locator(), refusing, true);

        let result = f
            .coordinator
            .dispatch(&pinged(3), &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(SagaError::Business(_))));
        assert_eq!(f.updater.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_suppressed_failures_continue_the_batch() {
        let refusing = CountingUpdater {
            refuse: true,
            ..Default::default()
        };
        let f = fixture(constant_locator(), refusing, true);
        let coordinator = f
            .coordinator
            .with_error_handler(Arc::new(ErrorPolicy::suppress()));

        let report = coordinator
            .dispatch(&pinged(3), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.suppressed, 3);
        assert_eq!(f.updater.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_unresolved_updater_is_fatal_under_suppress() {
        let f = fixture(constant_locator(), CountingUpdater::default(), false);
        let coordinator = f
            .coordinator
            .with_error_handler(Arc::new(ErrorPolicy::suppress()));

        let result = coordinator
            .dispatch(&pinged(1), &CancellationToken::new())
            .await;

        match result {
            Err(SagaError::Unresolved { kind, .. }) => assert_eq!(kind, "updater"),
            other => panic!("expected Unresolved, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cancelled_dispatch_processes_nothing() {
        let f = fixture(constant_locator(), CountingUpdater::default(), true);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = f.coordinator.dispatch(&pinged(2), &cancel).await;

        assert!(matches!(result, Err(SagaError::Cancelled)));
        assert_eq!(f.store.calls.load(Ordering::SeqCst), 0);
    }

    /// Runs the first mutation it is given, then behaves as if another writer
    /// completed the saga in the meantime.
    #[derive(Default)]
    struct RacingStore {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SagaStore for RacingStore {
        async fn update(
            &self,
            key: &SagaKey,
            _source_id: &SourceId,
            mutation: &dyn SagaMutation,
            cancel: &CancellationToken,
        ) -> Result<SagaUpdate> {
            let mut saga = SagaInstance::new(key.saga_type.clone(), key.saga_id.clone());
            if self.calls.fetch_add(1, Ordering::SeqCst) > 0 {
                saga.set_state(SagaState::Completed);
                return Ok(SagaUpdate {
                    saga,
                    outcome: UpdateOutcome::Terminal,
                });
            }
            saga.set_state(SagaState::Running);
            mutation.apply(&mut saga, cancel).await?;
            Ok(SagaUpdate {
                saga,
                outcome: UpdateOutcome::Applied,
            })
        }
    }

    #[tokio::test]
    async fn test_fail_decision_on_finished_saga_is_not_counted_as_failure() {
        let registry = SagaDefinitionRegistry::builder()
            .register(SagaDetails::new(SAGA_TYPE, LOCATOR, ["ThingyPinged"]).unwrap())
            .build()
            .unwrap();
        let resolver = TestResolver {
            locator: Arc::new(constant_locator()),
            updater: Some(Arc::new(CountingUpdater {
                refuse: true,
                ..Default::default()
            })),
        };
        let store = Arc::new(RacingStore::default());
        let coordinator = DispatchCoordinator::new(
            Arc::new(registry),
            Arc::new(resolver),
            Arc::clone(&store) as Arc<dyn SagaStore>,
        )
        .with_error_handler(Arc::new(ErrorPolicy::fail()));

        let report = coordinator
            .dispatch(&pinged(1), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(store.calls.load(Ordering::SeqCst), 2);
        assert_eq!(report.failed, 0);
        assert_eq!(report.terminal, 1);
    }
}
