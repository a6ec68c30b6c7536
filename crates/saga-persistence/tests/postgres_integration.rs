//! PostgreSQL integration tests
//!
//! These tests use a shared PostgreSQL container for efficiency.
//! Run with:
//!
//! ```bash
//! cargo test -p saga-persistence --test postgres_integration -- --test-threads=1
//! ```

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use saga_persistence::{
    PersistenceError, PostgresSagaRepository, SagaId, SagaKey, SagaRecord, SagaRepository,
    SagaType, SourceId, Version,
};
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

/// Global shared container
static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            let repo = PostgresSagaRepository::new(temp_pool);
            repo.run_migrations().await.unwrap();
            repo.pool().close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Get a fresh repository with its own pool and a cleared table
async fn get_test_repository() -> PostgresSagaRepository {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE sagas")
        .execute(&pool)
        .await
        .unwrap();

    PostgresSagaRepository::new(pool)
}

fn create_record(saga_id: &str, state: &str, sources: &[&str]) -> SagaRecord {
    SagaRecord {
        key: SagaKey::new(SagaType::from("OrderFulfillment"), SagaId::from(saga_id)),
        version: Version::initial(),
        state: state.to_string(),
        applied_source_ids: sources.iter().map(|s| SourceId::from(*s)).collect(),
        data: serde_json::json!({"items": sources.len()}),
        failure_reason: None,
        updated_at: Utc::now(),
    }
}

#[tokio::test]
async fn save_and_load_new_saga() {
    let repo = get_test_repository().await;
    let record = create_record("order-1", "Running", &["cmd-1"]);

    let version = repo
        .save(record.clone(), Version::initial())
        .await
        .unwrap();
    assert_eq!(version, Version::new(1));

    let loaded = repo.load(&record.key).await.unwrap().unwrap();
    assert_eq!(loaded.version, Version::new(1));
    assert_eq!(loaded.state, "Running");
    assert_eq!(loaded.data, serde_json::json!({"items": 1}));
    assert!(loaded.applied_source_ids.contains(&SourceId::from("cmd-1")));
}

#[tokio::test]
async fn load_missing_saga_returns_none() {
    let repo = get_test_repository().await;
    let key = SagaKey::new(SagaType::from("OrderFulfillment"), SagaId::from("ghost"));
    assert!(repo.load(&key).await.unwrap().is_none());
}

#[tokio::test]
async fn update_with_expected_version() {
    let repo = get_test_repository().await;
    let record = create_record("order-2", "Running", &["cmd-1"]);
    repo.save(record.clone(), Version::initial()).await.unwrap();

    let mut next = create_record("order-2", "Completed", &["cmd-1", "cmd-2"]);
    next.failure_reason = None;
    let version = repo.save(next, Version::new(1)).await.unwrap();
    assert_eq!(version, Version::new(2));

    let loaded = repo.load(&record.key).await.unwrap().unwrap();
    let expected: BTreeSet<SourceId> = ["cmd-1", "cmd-2"].into_iter().map(SourceId::from).collect();
    assert_eq!(loaded.applied_source_ids, expected);
    assert_eq!(loaded.state, "Completed");
}

#[tokio::test]
async fn stale_update_is_a_conflict() {
    let repo = get_test_repository().await;
    let record = create_record("order-3", "Running", &["cmd-1"]);
    repo.save(record.clone(), Version::initial()).await.unwrap();
    repo.save(create_record("order-3", "Running", &["cmd-1", "cmd-2"]), Version::new(1))
        .await
        .unwrap();

    let result = repo
        .save(create_record("order-3", "Running", &["cmd-1", "cmd-3"]), Version::new(1))
        .await;

    match result {
        Err(PersistenceError::ConcurrencyConflict {
            expected, actual, ..
        }) => {
            assert_eq!(expected, Version::new(1));
            assert_eq!(actual, Version::new(2));
        }
        other => panic!("expected conflict, got {other:?}"),
    }
}

#[tokio::test]
async fn duplicate_insert_is_a_conflict() {
    let repo = get_test_repository().await;
    let record = create_record("order-4", "Running", &["cmd-1"]);
    repo.save(record.clone(), Version::initial()).await.unwrap();

    let result = repo.save(record, Version::initial()).await;
    assert!(matches!(
        result,
        Err(PersistenceError::ConcurrencyConflict { .. })
    ));
}

#[tokio::test]
async fn same_id_under_different_saga_types_is_independent() {
    let repo = get_test_repository().await;
    let mut billing = create_record("shared-id", "Running", &["cmd-1"]);
    billing.key.saga_type = SagaType::from("Billing");
    let shipping = create_record("shared-id", "Running", &["cmd-1"]);

    repo.save(billing.clone(), Version::initial()).await.unwrap();
    repo.save(shipping.clone(), Version::initial()).await.unwrap();

    assert!(repo.load(&billing.key).await.unwrap().is_some());
    assert!(repo.load(&shipping.key).await.unwrap().is_some());
}

#[tokio::test]
async fn count_sagas_by_state() {
    let repo = get_test_repository().await;
    repo.save(create_record("a", "Running", &["x"]), Version::initial())
        .await
        .unwrap();
    repo.save(create_record("b", "Completed", &["y"]), Version::initial())
        .await
        .unwrap();
    repo.save(create_record("c", "Running", &["z"]), Version::initial())
        .await
        .unwrap();

    let saga_type = SagaType::from("OrderFulfillment");
    assert_eq!(repo.count_in_state(&saga_type, "Running").await.unwrap(), 2);
    assert_eq!(repo.count_in_state(&saga_type, "Completed").await.unwrap(), 1);
}

#[tokio::test]
async fn migrations_are_idempotent() {
    let repo = get_test_repository().await;
    repo.run_migrations().await.unwrap();

    repo.save(create_record("m", "Running", &["cmd-1"]), Version::initial())
        .await
        .unwrap();
    let saga_type = SagaType::from("OrderFulfillment");
    assert_eq!(repo.count_in_state(&saga_type, "Running").await.unwrap(), 1);
}
