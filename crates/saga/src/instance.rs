//! Saga instance state as seen by the store and the updaters.

use std::collections::BTreeSet;

use chrono::Utc;
use common::{SagaId, SagaType, SourceId};
use saga_persistence::{SagaKey, SagaRecord, Version};

use crate::command::SagaCommand;
use crate::error::{Result, SagaError};
use crate::state::SagaState;

/// One saga instance.
///
/// Tracks the lifecycle state, the version used for optimistic concurrency,
/// the source IDs already applied, and the saga's own business data as JSON.
/// Commands emitted during an update are carried here until they are
/// published; they are never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct SagaInstance {
    key: SagaKey,
    version: Version,
    state: SagaState,
    applied_source_ids: BTreeSet<SourceId>,
    data: serde_json::Value,
    failure_reason: Option<String>,
    pending_commands: Vec<SagaCommand>,
}

impl SagaInstance {
    /// Creates a fresh, never persisted saga in state `New`.
    pub fn new(saga_type: SagaType, saga_id: SagaId) -> Self {
        Self {
            key: SagaKey::new(saga_type, saga_id),
            version: Version::initial(),
            state: SagaState::New,
            applied_source_ids: BTreeSet::new(),
            data: serde_json::Value::Null,
            failure_reason: None,
            pending_commands: Vec::new(),
        }
    }

    /// Rebuilds a saga from its stored record.
    pub fn from_record(record: SagaRecord) -> Result<Self> {
        let state = SagaState::parse(&record.state).ok_or_else(|| SagaError::CorruptRecord {
            key: record.key.clone(),
            reason: format!("unknown state '{}'", record.state),
        })?;

        Ok(Self {
            key: record.key,
            version: record.version,
            state,
            applied_source_ids: record.applied_source_ids,
            data: record.data,
            failure_reason: record.failure_reason,
            pending_commands: Vec::new(),
        })
    }

    /// Produces the record to persist. The repository assigns the version.
    pub fn to_record(&self) -> SagaRecord {
        SagaRecord {
            key: self.key.clone(),
            version: self.version,
            state: self.state.as_str().to_string(),
            applied_source_ids: self.applied_source_ids.clone(),
            data: self.data.clone(),
            failure_reason: self.failure_reason.clone(),
            updated_at: Utc::now(),
        }
    }

    /// Records a successful update: remembers the source ID and leaves
    /// `New` for `Running` unless the update already moved the saga on.
    pub(crate) fn mark_applied(&mut self, source_id: &SourceId) {
        if self.state == SagaState::New {
            self.state = SagaState::Running;
        }
        self.applied_source_ids.insert(source_id.clone());
    }

    pub(crate) fn set_version(&mut self, version: Version) {
        self.version = version;
    }
}

// Query methods
impl SagaInstance {
    pub fn id(&self) -> &SagaId {
        &self.key.saga_id
    }

    pub fn saga_type(&self) -> &SagaType {
        &self.key.saga_type
    }

    pub fn key(&self) -> &SagaKey {
        &self.key
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn state(&self) -> SagaState {
        self.state
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Returns true if an event with this source ID was already applied.
    pub fn has_applied(&self, source_id: &SourceId) -> bool {
        self.applied_source_ids.contains(source_id)
    }

    pub fn applied_source_ids(&self) -> &BTreeSet<SourceId> {
        &self.applied_source_ids
    }

    /// Returns the saga's business data.
    pub fn data(&self) -> &serde_json::Value {
        &self.data
    }

    /// Returns the failure or rejection reason, if any.
    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    /// Returns the commands emitted during the current update.
    pub fn pending_commands(&self) -> &[SagaCommand] {
        &self.pending_commands
    }
}

// Mutation methods used by updaters
impl SagaInstance {
    pub fn set_state(&mut self, state: SagaState) {
        self.state = state;
    }

    pub fn set_data(&mut self, data: serde_json::Value) {
        self.data = data;
    }

    pub fn set_failure_reason(&mut self, reason: Option<String>) {
        self.failure_reason = reason;
    }

    /// Moves the saga to `Failed` with the given reason.
    pub fn fail(&mut self, reason: impl Into<String>) {
        self.state = SagaState::Failed;
        self.failure_reason = Some(reason.into());
    }

    pub fn push_commands(&mut self, commands: impl IntoIterator<Item = SagaCommand>) {
        self.pending_commands.extend(commands);
    }

    /// Drains the commands emitted during the current update.
    pub fn take_commands(&mut self) -> Vec<SagaCommand> {
        std::mem::take(&mut self.pending_commands)
    }
}
