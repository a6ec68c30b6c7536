use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{SagaId, SagaType, SourceId};

/// Version number of a saga record, used for optimistic concurrency control.
///
/// A saga that has never been persisted is at version 0; every successful
/// save moves it forward by one.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(i64);

impl Version {
    /// Creates a new version from a raw value.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the initial version (0) for a saga that was never saved.
    pub fn initial() -> Self {
        Self(0)
    }

    /// Returns the next version.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns the raw version value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Version {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

/// Storage key of a saga instance.
///
/// Saga IDs are scoped to their type, so the type is part of the key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SagaKey {
    pub saga_type: SagaType,
    pub saga_id: SagaId,
}

impl SagaKey {
    pub fn new(saga_type: SagaType, saga_id: SagaId) -> Self {
        Self { saga_type, saga_id }
    }
}

impl std::fmt::Display for SagaKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.saga_type, self.saga_id)
    }
}

/// The persisted form of a saga instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaRecord {
    /// The saga this record belongs to.
    pub key: SagaKey,

    /// Version of this record. Set by the repository on save.
    pub version: Version,

    /// Lifecycle state name (e.g. "Running").
    pub state: String,

    /// Source IDs already applied to this saga.
    pub applied_source_ids: BTreeSet<SourceId>,

    /// Serialized business state of the saga.
    pub data: serde_json::Value,

    /// Reason the saga was failed or rejected, if any.
    pub failure_reason: Option<String>,

    /// When the record was last written.
    pub updated_at: DateTime<Utc>,
}
