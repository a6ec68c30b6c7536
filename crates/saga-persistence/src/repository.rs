use async_trait::async_trait;

use crate::{Result, SagaKey, SagaRecord, Version};

/// Storage for saga records.
///
/// Implementations must be thread-safe (Send + Sync) and must make `save`
/// atomic: either the whole record is written or nothing is.
#[async_trait]
pub trait SagaRepository: Send + Sync {
    /// Loads the record stored under `key`.
    ///
    /// Returns None if the saga has never been saved.
    async fn load(&self, key: &SagaKey) -> Result<Option<SagaRecord>>;

    /// Writes `record` if the stored version still equals `expected`.
    ///
    /// `Version::initial()` means "must not exist yet". Fails with
    /// `ConcurrencyConflict` when another writer got there first.
    /// Returns the new version of the record.
    async fn save(&self, record: SagaRecord, expected: Version) -> Result<Version>;
}

#[async_trait]
impl<T: SagaRepository + ?Sized> SagaRepository for std::sync::Arc<T> {
    async fn load(&self, key: &SagaKey) -> Result<Option<SagaRecord>> {
        (**self).load(key).await
    }

    async fn save(&self, record: SagaRecord, expected: Version) -> Result<Version> {
        (**self).save(record, expected).await
    }
}
