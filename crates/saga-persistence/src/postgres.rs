use std::collections::BTreeSet;

use async_trait::async_trait;
use sqlx::{PgPool, Row, postgres::PgRow};

use crate::{
    PersistenceError, Result, SagaId, SagaKey, SagaRecord, SagaType, SourceId, Version,
    repository::SagaRepository,
};

/// PostgreSQL-backed saga repository.
///
/// Records live in the `sagas` table. Compare-and-swap is a conditional
/// `UPDATE ... WHERE version = $expected` for existing sagas and an
/// `INSERT ... ON CONFLICT DO NOTHING` for new ones.
#[derive(Clone)]
pub struct PostgresSagaRepository {
    pool: PgPool,
}

impl PostgresSagaRepository {
    /// Creates a new PostgreSQL saga repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Counts stored sagas of a type in a given lifecycle state.
    pub async fn count_in_state(&self, saga_type: &SagaType, state: &str) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM sagas WHERE saga_type = $1 AND state = $2")
                .bind(saga_type.as_str())
                .bind(state)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    fn row_to_record(row: PgRow) -> Result<SagaRecord> {
        let applied_json: serde_json::Value = row.try_get("applied_source_ids")?;
        let applied_source_ids: BTreeSet<SourceId> = serde_json::from_value(applied_json)?;

        Ok(SagaRecord {
            key: SagaKey::new(
                SagaType::new(row.try_get::<String, _>("saga_type")?),
                SagaId::new(row.try_get::<String, _>("saga_id")?),
            ),
            version: Version::new(row.try_get("version")?),
            state: row.try_get("state")?,
            applied_source_ids,
            data: row.try_get("data")?,
            failure_reason: row.try_get("failure_reason")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    async fn current_version(&self, key: &SagaKey) -> Result<Version> {
        let version: Option<i64> =
            sqlx::query_scalar("SELECT version FROM sagas WHERE saga_type = $1 AND saga_id = $2")
                .bind(key.saga_type.as_str())
                .bind(key.saga_id.as_str())
                .fetch_optional(&self.pool)
                .await?;
        Ok(Version::new(version.unwrap_or(0)))
    }
}

#[async_trait]
impl SagaRepository for PostgresSagaRepository {
    #[tracing::instrument(skip(self), fields(saga = %key))]
    async fn load(&self, key: &SagaKey) -> Result<Option<SagaRecord>> {
        let row = sqlx::query(
            r#"
            SELECT saga_type, saga_id, version, state, applied_source_ids, data, failure_reason, updated_at
            FROM sagas
            WHERE saga_type = $1 AND saga_id = $2
            "#,
        )
        .bind(key.saga_type.as_str())
        .bind(key.saga_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_record).transpose()
    }

    #[tracing::instrument(skip(self, record), fields(saga = %record.key))]
    async fn save(&self, record: SagaRecord, expected: Version) -> Result<Version> {
        let new_version = expected.next();
        let applied_json = serde_json::to_value(&record.applied_source_ids)?;

        let result = if expected == Version::initial() {
            sqlx::query(
                r#"
                INSERT INTO sagas (saga_type, saga_id, version, state, applied_source_ids, data, failure_reason, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ON CONFLICT (saga_type, saga_id) DO NOTHING
                "#,
            )
            .bind(record.key.saga_type.as_str())
            .bind(record.key.saga_id.as_str())
            .bind(new_version.as_i64())
            .bind(&record.state)
            .bind(applied_json)
            .bind(&record.data)
            .bind(&record.failure_reason)
            .bind(record.updated_at)
            .execute(&self.pool)
            .await?
        } else {
            sqlx::query(
                r#"
                UPDATE sagas
                SET version = $3, state = $4, applied_source_ids = $5, data = $6,
                    failure_reason = $7, updated_at = $8
                WHERE saga_type = $1 AND saga_id = $2 AND version = $9
                "#,
            )
            .bind(record.key.saga_type.as_str())
            .bind(record.key.saga_id.as_str())
            .bind(new_version.as_i64())
            .bind(&record.state)
            .bind(applied_json)
            .bind(&record.data)
            .bind(&record.failure_reason)
            .bind(record.updated_at)
            .bind(expected.as_i64())
            .execute(&self.pool)
            .await?
        };

        if result.rows_affected() == 0 {
            let actual = self.current_version(&record.key).await?;
            metrics::counter!("saga_repository_conflicts_total").increment(1);
            return Err(PersistenceError::ConcurrencyConflict {
                key: record.key,
                expected,
                actual,
            });
        }

        Ok(new_version)
    }
}
