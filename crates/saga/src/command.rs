//! Commands emitted by sagas and the publisher they are handed to.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::SourceId;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, SagaError};

/// A command a saga wants executed against some aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaCommand {
    /// The command type (e.g. "CapturePayment").
    pub command_type: String,

    /// Deterministic ID so that a redelivered event yields the same command
    /// identity and downstream handlers can deduplicate.
    pub source_id: SourceId,

    /// The command payload as JSON.
    pub payload: serde_json::Value,

    /// Correlation and causation metadata.
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Outbound port to the command bus.
#[async_trait]
pub trait CommandPublisher: Send + Sync {
    /// Publishes the commands emitted by one saga update.
    async fn publish(&self, commands: Vec<SagaCommand>, cancel: &CancellationToken) -> Result<()>;
}

/// Drops every command. Used when no command bus is wired in.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullCommandPublisher;

#[async_trait]
impl CommandPublisher for NullCommandPublisher {
    async fn publish(&self, commands: Vec<SagaCommand>, _cancel: &CancellationToken) -> Result<()> {
        tracing::debug!(count = commands.len(), "discarding saga commands");
        Ok(())
    }
}

#[derive(Debug, Default)]
struct InMemoryPublisherState {
    published: Vec<SagaCommand>,
    fail_on_publish: bool,
}

/// In-memory command publisher for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCommandPublisher {
    state: Arc<Mutex<InMemoryPublisherState>>,
}

impl InMemoryCommandPublisher {
    /// Creates a new in-memory publisher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the publisher to reject every publish call.
    pub async fn set_fail_on_publish(&self, fail: bool) {
        self.state.lock().await.fail_on_publish = fail;
    }

    /// Returns every command published so far.
    pub async fn published(&self) -> Vec<SagaCommand> {
        self.state.lock().await.published.clone()
    }

    /// Returns the number of published commands.
    pub async fn published_count(&self) -> usize {
        self.state.lock().await.published.len()
    }
}

#[async_trait]
impl CommandPublisher for InMemoryCommandPublisher {
    async fn publish(&self, commands: Vec<SagaCommand>, _cancel: &CancellationToken) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.fail_on_publish {
            return Err(SagaError::CommandPublish("command bus unavailable".to_string()));
        }
        state.published.extend(commands);
        Ok(())
    }
}
