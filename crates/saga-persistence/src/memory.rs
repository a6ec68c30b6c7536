use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::{PersistenceError, Result, SagaKey, SagaRecord, Version, repository::SagaRepository};

#[derive(Debug, Default)]
struct InMemoryState {
    records: HashMap<SagaKey, SagaRecord>,
    saves: u64,
    injected_conflicts: u32,
}

/// In-memory saga repository.
///
/// Provides the same compare-and-swap semantics as the PostgreSQL
/// implementation. Conflicts can be injected to exercise retry paths.
#[derive(Clone, Default)]
pub struct InMemorySagaRepository {
    state: Arc<RwLock<InMemoryState>>,
}

impl InMemorySagaRepository {
    /// Creates a new empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored sagas.
    pub async fn len(&self) -> usize {
        self.state.read().await.records.len()
    }

    /// Returns true if no saga has been stored.
    pub async fn is_empty(&self) -> bool {
        self.state.read().await.records.is_empty()
    }

    /// Returns the number of successful saves.
    pub async fn save_count(&self) -> u64 {
        self.state.read().await.saves
    }

    /// Makes the next `count` saves lose a race against a simulated external
    /// writer: the stored version is bumped and the save is rejected.
    pub async fn inject_conflicts(&self, count: u32) {
        self.state.write().await.injected_conflicts = count;
    }

    /// Clears all records.
    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        state.records.clear();
        state.saves = 0;
    }
}

#[async_trait]
impl SagaRepository for InMemorySagaRepository {
    async fn load(&self, key: &SagaKey) -> Result<Option<SagaRecord>> {
        let state = self.state.read().await;
        Ok(state.records.get(key).cloned())
    }

    async fn save(&self, mut record: SagaRecord, expected: Version) -> Result<Version> {
        let mut state = self.state.write().await;
        let key = record.key.clone();

        let current = state
            .records
            .get(&key)
            .map(|r| r.version)
            .unwrap_or(Version::initial());

        if state.injected_conflicts > 0 {
            state.injected_conflicts -= 1;
            // The external writer persists its own copy of the saga. For a
            // saga that does not exist yet, that copy is an empty `New` one:
            // nothing from the losing write may leak into it.
            let mut external = state
                .records
                .get(&key)
                .cloned()
                .unwrap_or_else(|| SagaRecord {
                    key: key.clone(),
                    version: Version::initial(),
                    state: "New".to_string(),
                    applied_source_ids: BTreeSet::new(),
                    data: serde_json::Value::Null,
                    failure_reason: None,
                    updated_at: Utc::now(),
                });
            external.version = current.next();
            state.records.insert(key.clone(), external);
            return Err(PersistenceError::ConcurrencyConflict {
                key,
                expected,
                actual: current.next(),
            });
        }

        if current != expected {
            return Err(PersistenceError::ConcurrencyConflict {
                key,
                expected,
                actual: current,
            });
        }

        let new_version = expected.next();
        record.version = new_version;
        state.records.insert(key, record);
        state.saves += 1;

        Ok(new_version)
    }
}
