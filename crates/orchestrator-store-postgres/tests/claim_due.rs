//! Integration tests against a real PostgreSQL instance.
//!
//! These exercise the behavior that the in-memory test double
//! (`orchestrator-testing::InMemoryEventStore`) can't: `FOR UPDATE SKIP
//! LOCKED` actually producing disjoint claims across concurrent
//! transactions, and the `ON CONFLICT DO NOTHING` dedup backstop under a
//! real unique index.
//!
//! Ignored by default — set `DATABASE_URL` to a scratch Postgres database
//! and run with `cargo test -- --ignored` to exercise them.

use std::sync::Arc;

use chrono::{Duration, Utc};
use orchestrator_core::event::{DeliveryType, NewEvent};
use orchestrator_core::store::EventStore;
use orchestrator_store_postgres::PgEventStore;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

async fn test_pool() -> PgPool {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set to run postgres integration tests");
    PgPoolOptions::new()
        .max_connections(10)
        .connect(&url)
        .await
        .expect("failed to connect to DATABASE_URL")
}

/// Unpartitioned schema sufficient to exercise `EventStore`'s row-level
/// semantics; `ensure_partitions`/partition routing is covered separately.
async fn reset_schema(pool: &PgPool) {
    sqlx::query("DROP TABLE IF EXISTS events").execute(pool).await.unwrap();
    sqlx::query(
        r#"
        CREATE TABLE events (
            id UUID PRIMARY KEY,
            external_job_id TEXT NOT NULL,
            source TEXT NOT NULL,
            scheduled_at TIMESTAMPTZ NOT NULL,
            delivery_type TEXT NOT NULL,
            destination TEXT NOT NULL,
            payload JSONB NOT NULL,
            status TEXT NOT NULL DEFAULT 'PENDING',
            retry_count INTEGER NOT NULL DEFAULT 0,
            max_retries INTEGER NOT NULL,
            last_error TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            executed_at TIMESTAMPTZ,
            locked_by TEXT,
            lock_expires_at TIMESTAMPTZ,
            partition_key INTEGER NOT NULL,
            version INTEGER NOT NULL DEFAULT 1
        )
        "#,
    )
    .execute(pool)
    .await
    .unwrap();
    sqlx::query("CREATE UNIQUE INDEX events_dedup_key ON events (external_job_id, source, scheduled_at, partition_key)")
        .execute(pool)
        .await
        .unwrap();
}

fn new_event(external_job_id: &str, scheduled_at: chrono::DateTime<Utc>) -> NewEvent {
    NewEvent {
        external_job_id: external_job_id.to_owned(),
        source: "orders".to_owned(),
        scheduled_at,
        delivery_type: DeliveryType::Http,
        destination: "http://example.invalid/hook".to_owned(),
        payload: serde_json::json!({}),
        max_retries: 3,
    }
}

#[tokio::test]
#[ignore]
async fn concurrent_claims_are_disjoint() {
    let pool = test_pool().await;
    reset_schema(&pool).await;
    let store = Arc::new(PgEventStore::new(pool));

    let due = Utc::now() - Duration::seconds(1);
    for i in 0..20 {
        store.insert(new_event(&format!("job-{i}"), due)).await.unwrap();
    }

    let now = Utc::now();
    let lease_until = now + Duration::minutes(5);

    let store_a = store.clone();
    let store_b = store.clone();
    let (claimed_a, claimed_b) = tokio::join!(
        store_a.claim_due("worker-a", now, lease_until, 10),
        store_b.claim_due("worker-b", now, lease_until, 10),
    );
    let claimed_a = claimed_a.unwrap();
    let claimed_b = claimed_b.unwrap();

    assert_eq!(claimed_a.len() + claimed_b.len(), 20);
    let ids_a: std::collections::HashSet<_> = claimed_a.iter().map(|e| e.id).collect();
    let ids_b: std::collections::HashSet<_> = claimed_b.iter().map(|e| e.id).collect();
    assert!(ids_a.is_disjoint(&ids_b), "two workers must never claim the same row");
}

#[tokio::test]
#[ignore]
async fn duplicate_insert_is_suppressed_by_the_unique_index() {
    let pool = test_pool().await;
    reset_schema(&pool).await;
    let store = PgEventStore::new(pool);

    let scheduled_at = Utc::now() + Duration::minutes(5);
    let first = store.insert(new_event("job-1", scheduled_at)).await.unwrap();
    let second = store.insert(new_event("job-1", scheduled_at)).await.unwrap();

    assert!(matches!(first, orchestrator_core::error::InsertOutcome::Inserted));
    assert!(matches!(second, orchestrator_core::error::InsertOutcome::Duplicate));
}

#[tokio::test]
#[ignore]
async fn complete_requires_the_claiming_worker() {
    let pool = test_pool().await;
    reset_schema(&pool).await;
    let store = PgEventStore::new(pool);

    let due = Utc::now() - Duration::seconds(1);
    store.insert(new_event("job-1", due)).await.unwrap();

    let now = Utc::now();
    let claimed = store.claim_due("worker-a", now, now + Duration::minutes(5), 10).await.unwrap();
    let event = claimed.into_iter().next().unwrap();

    assert!(!store.complete(event.id, "worker-b").await.unwrap());
    assert!(store.complete(event.id, "worker-a").await.unwrap());
}
