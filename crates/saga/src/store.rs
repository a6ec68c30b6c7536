//! Transactional saga store: load, mutate and save one saga under
//! optimistic concurrency.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use async_trait::async_trait;
use common::SourceId;
use saga_persistence::{SagaKey, SagaRepository};
use tokio_util::sync::CancellationToken;

use crate::config::StoreConfig;
use crate::error::{Result, SagaError};
use crate::instance::SagaInstance;

/// A change applied to a saga inside a store update.
///
/// The mutation may run more than once when the save loses a version race;
/// every run starts from a freshly loaded saga.
#[async_trait]
pub trait SagaMutation: Send + Sync {
    async fn apply(&self, saga: &mut SagaInstance, cancel: &CancellationToken) -> Result<()>;
}

/// What an update did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The mutation ran and its result was committed.
    Applied,
    /// The source ID was already applied. Nothing was written.
    AlreadyApplied,
    /// The saga is completed, rejected or failed. Nothing was written.
    Terminal,
}

/// Result of a store update: the saga as it now stands and the outcome.
#[derive(Debug, Clone)]
pub struct SagaUpdate {
    pub saga: SagaInstance,
    pub outcome: UpdateOutcome,
}

impl SagaUpdate {
    pub fn is_applied(&self) -> bool {
        self.outcome == UpdateOutcome::Applied
    }
}

/// Loads-or-creates a saga, applies a mutation and persists the result
/// atomically.
#[async_trait]
pub trait SagaStore: Send + Sync {
    /// Updates the saga under `key` with the change identified by
    /// `source_id`.
    ///
    /// A saga that does not exist yet starts out `New`. If `source_id` was
    /// already applied, or the saga is terminal, the mutation is not run.
    async fn update(
        &self,
        key: &SagaKey,
        source_id: &SourceId,
        mutation: &dyn SagaMutation,
        cancel: &CancellationToken,
    ) -> Result<SagaUpdate>;
}

/// Dead entries are swept once the table grows past this many keys.
const MIN_PRUNE_AT: usize = 64;

/// Hands out one async lock per saga key. Entries die with their last user
/// and are swept when the table doubles in size, so a sweep costs amortized
/// O(1) per new key.
#[derive(Default)]
struct KeyLocks {
    table: Mutex<LockTable>,
}

#[derive(Default)]
struct LockTable {
    entries: HashMap<SagaKey, Weak<tokio::sync::Mutex<()>>>,
    prune_at: usize,
}

impl KeyLocks {
    fn lock_for(&self, key: &SagaKey) -> Arc<tokio::sync::Mutex<()>> {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = table.entries.get(key).and_then(Weak::upgrade) {
            return existing;
        }

        if table.entries.len() >= table.prune_at.max(MIN_PRUNE_AT) {
            table.entries.retain(|_, lock| lock.strong_count() > 0);
            table.prune_at = table.entries.len() * 2;
        }

        let lock = Arc::new(tokio::sync::Mutex::new(()));
        table.entries.insert(key.clone(), Arc::downgrade(&lock));
        lock
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }
}

/// [`SagaStore`] over a [`SagaRepository`].
///
/// Updates to the same key are serialized in-process; writers in other
/// processes are caught by the repository's version check and retried up to
/// `max_retries` times.
pub struct TransactionalSagaStore<R> {
    repository: R,
    config: StoreConfig,
    locks: KeyLocks,
}

impl<R: SagaRepository> TransactionalSagaStore<R> {
    pub fn new(repository: R) -> Self {
        Self::with_config(repository, StoreConfig::default())
    }

    pub fn with_config(repository: R, config: StoreConfig) -> Self {
        Self {
            repository,
            config,
            locks: KeyLocks::default(),
        }
    }

    pub fn repository(&self) -> &R {
        &self.repository
    }

    /// Loads a saga without modifying it.
    pub async fn load(&self, key: &SagaKey) -> Result<Option<SagaInstance>> {
        self.repository
            .load(key)
            .await?
            .map(SagaInstance::from_record)
            .transpose()
    }

    async fn load_or_new(&self, key: &SagaKey) -> Result<SagaInstance> {
        Ok(self.load(key).await?.unwrap_or_else(|| {
            SagaInstance::new(key.saga_type.clone(), key.saga_id.clone())
        }))
    }
}

#[async_trait]
impl<R: SagaRepository> SagaStore for TransactionalSagaStore<R> {
    #[tracing::instrument(
        skip(self, key, source_id, mutation, cancel),
        fields(saga = %key, source_id = %source_id)
    )]
    async fn update(
        &self,
        key: &SagaKey,
        source_id: &SourceId,
        mutation: &dyn SagaMutation,
        cancel: &CancellationToken,
    ) -> Result<SagaUpdate> {
        let lock = self.locks.lock_for(key);
        let _guard = lock.lock().await;

        let mut attempts = 0u32;
        loop {
            attempts += 1;
            if cancel.is_cancelled() {
                return Err(SagaError::Cancelled);
            }

            let mut saga = self.load_or_new(key).await?;

            if saga.has_applied(source_id) {
                tracing::debug!("source already applied, skipping");
                metrics::counter!("saga_updates_duplicate_total").increment(1);
                return Ok(SagaUpdate {
                    saga,
                    outcome: UpdateOutcome::AlreadyApplied,
                });
            }

            if saga.is_terminal() {
                tracing::debug!(state = %saga.state(), "saga is terminal, skipping");
                return Ok(SagaUpdate {
                    saga,
                    outcome: UpdateOutcome::Terminal,
                });
            }

            mutation.apply(&mut saga, cancel).await?;
            saga.mark_applied(source_id);

            if cancel.is_cancelled() {
                return Err(SagaError::Cancelled);
            }

            let expected = saga.version();
            match self.repository.save(saga.to_record(), expected).await {
                Ok(version) => {
                    saga.set_version(version);
                    metrics::counter!("saga_updates_applied_total").increment(1);
                    tracing::debug!(%version, state = %saga.state(), "saga updated");
                    return Ok(SagaUpdate {
                        saga,
                        outcome: UpdateOutcome::Applied,
                    });
                }
                Err(e) if e.is_conflict() => {
                    metrics::counter!("saga_update_conflicts_total").increment(1);
                    if attempts > self.config.max_retries {
                        tracing::warn!(attempts, "giving up after repeated version conflicts");
                        return Err(SagaError::ConcurrencyConflict {
                            key: key.clone(),
                            attempts,
                        });
                    }

                    tracing::debug!(attempts, "version conflict, retrying");
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(SagaError::Cancelled),
                        _ = tokio::time::sleep(self.config.retry_backoff) => {}
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}
