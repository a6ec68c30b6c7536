//! Saga updaters apply one domain event to one saga instance.

use std::collections::{BTreeSet, HashMap};
use std::marker::PhantomData;

use async_trait::async_trait;
use common::{SagaType, SourceId};
use events::{DomainEvent, EventPayload, metadata};
use serde::{Serialize, de::DeserializeOwned};
use tokio_util::sync::CancellationToken;

use crate::command::SagaCommand;
use crate::context::SagaContext;
use crate::error::{Result, SagaError};
use crate::instance::SagaInstance;
use crate::state::SagaState;

/// Applies a domain event to a saga instance.
///
/// Updaters know nothing about persistence or identifiers: they transform
/// `(current saga, event)` into a new saga state in place.
#[async_trait]
pub trait SagaUpdater: Send + Sync {
    async fn process(
        &self,
        saga: &mut SagaInstance,
        event: &DomainEvent,
        context: &SagaContext,
        cancel: &CancellationToken,
    ) -> Result<()>;
}

/// Business state of a typed saga.
///
/// The state is stored as JSON between events; a saga that has never seen an
/// event starts from `Default`.
pub trait Saga: Default + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// The saga type name (e.g. `"OrderFulfillment"`).
    const SAGA_TYPE: &'static str;

    /// Returns the event handlers of this saga.
    fn handlers() -> SagaHandlers<Self>;

    fn saga_type() -> SagaType {
        SagaType::from(Self::SAGA_TYPE)
    }
}

type Handler<S> = Box<dyn Fn(&mut S, &DomainEvent, &mut SagaScope) -> Result<()> + Send + Sync>;

/// Handler table of a typed saga, keyed by event type.
pub struct SagaHandlers<S> {
    handlers: HashMap<&'static str, Handler<S>>,
}

impl<S: Send + Sync + 'static> SagaHandlers<S> {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Registers the handler for payload type `E`.
    pub fn on<E, F>(mut self, handler: F) -> Self
    where
        E: EventPayload + 'static,
        F: Fn(&mut S, E, &mut SagaScope) -> Result<()> + Send + Sync + 'static,
    {
        let erased: Handler<S> = Box::new(
            move |saga: &mut S, event: &DomainEvent, scope: &mut SagaScope| {
                let payload = event.decode::<E>()?;
                handler(saga, payload, scope)
            },
        );
        self.handlers.insert(E::EVENT_TYPE, erased);
        self
    }

    /// Returns the event types that have a handler.
    pub fn event_types(&self) -> BTreeSet<String> {
        self.handlers.keys().map(|t| t.to_string()).collect()
    }

    pub fn handles(&self, event_type: &str) -> bool {
        self.handlers.contains_key(event_type)
    }

    fn get(&self, event_type: &str) -> Option<&Handler<S>> {
        self.handlers.get(event_type)
    }
}

impl<S: Send + Sync + 'static> Default for SagaHandlers<S> {
    fn default() -> Self {
        Self::new()
    }
}

/// What a handler can see and change besides its own business state.
#[derive(Debug)]
pub struct SagaScope {
    context: SagaContext,
    state: SagaState,
    failure_reason: Option<String>,
    commands: Vec<SagaCommand>,
}

impl SagaScope {
    fn new(context: SagaContext, state: SagaState) -> Self {
        Self {
            context,
            state,
            failure_reason: None,
            commands: Vec::new(),
        }
    }

    pub fn context(&self) -> &SagaContext {
        &self.context
    }

    pub fn state(&self) -> SagaState {
        self.state
    }

    /// Declares the saga successfully finished.
    pub fn complete(&mut self) {
        self.state = SagaState::Completed;
    }

    /// Declares that the saga cannot proceed.
    pub fn reject(&mut self, reason: impl Into<String>) {
        self.state = SagaState::Rejected;
        self.failure_reason = Some(reason.into());
    }

    /// Emits a command. Its source ID is derived from the saga and the event
    /// being applied, so a redelivery emits the same command identity.
    pub fn publish<C: Serialize>(&mut self, command_type: impl Into<String>, command: &C) -> Result<()> {
        let ctx = &self.context;
        let source_id = SourceId::new(format!(
            "{}/{}/{}/{}",
            ctx.saga_type,
            ctx.saga_id,
            ctx.source_id,
            self.commands.len()
        ));

        let mut command_metadata = HashMap::new();
        command_metadata.insert(
            metadata::CORRELATION_ID.to_string(),
            serde_json::Value::String(ctx.correlation_id.clone()),
        );
        command_metadata.insert(
            metadata::CAUSATION_ID.to_string(),
            serde_json::Value::String(ctx.causation_id.to_string()),
        );

        self.commands.push(SagaCommand {
            command_type: command_type.into(),
            source_id,
            payload: serde_json::to_value(command)?,
            metadata: command_metadata,
        });
        Ok(())
    }
}

/// [`SagaUpdater`] for a typed [`Saga`]: routes the event to the handler
/// registered for its runtime type.
pub struct SagaEventUpdater<S: Saga> {
    handlers: SagaHandlers<S>,
    _phantom: PhantomData<S>,
}

impl<S: Saga> SagaEventUpdater<S> {
    pub fn new() -> Self {
        Self {
            handlers: S::handlers(),
            _phantom: PhantomData,
        }
    }
}

impl<S: Saga> Default for SagaEventUpdater<S> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<S: Saga> SagaUpdater for SagaEventUpdater<S> {
    async fn process(
        &self,
        saga: &mut SagaInstance,
        event: &DomainEvent,
        context: &SagaContext,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(SagaError::Cancelled);
        }

        let handler = self
            .handlers
            .get(&event.event_type)
            .ok_or_else(|| SagaError::MissingHandler {
                saga_type: S::saga_type(),
                event_type: event.event_type.clone(),
            })?;

        let mut state: S = if saga.data().is_null() {
            S::default()
        } else {
            serde_json::from_value(saga.data().clone())?
        };

        let mut scope = SagaScope::new(context.clone(), saga.state());
        handler(&mut state, event, &mut scope)?;

        saga.set_data(serde_json::to_value(&state)?);
        saga.set_state(scope.state);
        if scope.failure_reason.is_some() {
            saga.set_failure_reason(scope.failure_reason);
        }
        saga.push_commands(scope.commands);
        Ok(())
    }
}
