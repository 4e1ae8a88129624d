//! PostgreSQL implementation of the orchestrator's Event Store.
//!
//! # Schema
//!
//! ```sql
//! CREATE TABLE events (
//!     id UUID NOT NULL,
//!     external_job_id TEXT NOT NULL,
//!     source TEXT NOT NULL,
//!     scheduled_at TIMESTAMPTZ NOT NULL,
//!     delivery_type TEXT NOT NULL,
//!     destination TEXT NOT NULL,
//!     payload JSONB NOT NULL,
//!     status TEXT NOT NULL DEFAULT 'PENDING',
//!     retry_count INTEGER NOT NULL DEFAULT 0,
//!     max_retries INTEGER NOT NULL,
//!     last_error TEXT,
//!     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
//!     updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
//!     executed_at TIMESTAMPTZ,
//!     locked_by TEXT,
//!     lock_expires_at TIMESTAMPTZ,
//!     partition_key INTEGER NOT NULL,
//!     version INTEGER NOT NULL DEFAULT 1,
//!     PRIMARY KEY (id, partition_key)
//! ) PARTITION BY RANGE (partition_key);
//!
//! CREATE UNIQUE INDEX events_dedup_key ON events (external_job_id, source, scheduled_at, partition_key);
//! CREATE INDEX events_poll ON events (scheduled_at) WHERE status IN ('PENDING', 'PROCESSING');
//! CREATE INDEX events_external_job_id ON events (external_job_id);
//! CREATE INDEX events_lease ON events (lock_expires_at) WHERE status = 'PROCESSING';
//! CREATE INDEX events_retention ON events (executed_at) WHERE status IN ('COMPLETED', 'DEAD_LETTER', 'CANCELLED');
//! ```
//!
//! Partitions cover ten consecutive day-keys each; `ensure_partitions`
//! creates any missing ranges instead of relying on DB-side triggers.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use orchestrator_core::{
    CancelOutcome, DedupKey, DeliveryType, Event, EventStatus, EventStore, InsertOutcome, NewEvent, StatusCounts,
};
use sqlx::{PgPool, Row};
use tracing::warn;
use uuid::Uuid;

/// PostgreSQL-backed event store.
#[derive(Clone)]
pub struct PgEventStore {
    pool: PgPool,
}

impl PgEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn row_to_event(row: &sqlx::postgres::PgRow) -> Result<Event> {
        Ok(Event {
            id: row.try_get("id")?,
            external_job_id: row.try_get("external_job_id")?,
            source: row.try_get("source")?,
            scheduled_at: row.try_get("scheduled_at")?,
            delivery_type: DeliveryType::from_db_str(row.try_get::<String, _>("delivery_type")?.as_str())?,
            destination: row.try_get("destination")?,
            payload: row.try_get("payload")?,
            status: EventStatus::from_db_str(row.try_get::<String, _>("status")?.as_str())?,
            retry_count: row.try_get("retry_count")?,
            max_retries: row.try_get("max_retries")?,
            last_error: row.try_get("last_error")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            executed_at: row.try_get("executed_at")?,
            locked_by: row.try_get("locked_by")?,
            lock_expires_at: row.try_get("lock_expires_at")?,
            partition_key: row.try_get("partition_key")?,
            version: row.try_get("version")?,
        })
    }
}

#[async_trait]
impl EventStore for PgEventStore {
    async fn insert(&self, event: NewEvent) -> Result<InsertOutcome> {
        let id = Uuid::new_v4();
        let partition_key = event.partition_key();

        let result = sqlx::query(
            r#"
            INSERT INTO events (
                id, external_job_id, source, scheduled_at, delivery_type, destination,
                payload, status, retry_count, max_retries, partition_key
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, 'PENDING', 0, $8, $9)
            ON CONFLICT (external_job_id, source, scheduled_at, partition_key) DO NOTHING
            "#,
        )
        .bind(id)
        .bind(&event.external_job_id)
        .bind(&event.source)
        .bind(event.scheduled_at)
        .bind(event.delivery_type.as_db_str())
        .bind(&event.destination)
        .bind(&event.payload)
        .bind(event.max_retries)
        .bind(partition_key)
        .execute(&self.pool)
        .await?;

        // A constraint-backstopped race lands here too: the conflicting row
        // was inserted by another process between the caller's dedup check
        // and this statement, and `ON CONFLICT DO NOTHING` silently no-ops
        // instead of erroring.
        if result.rows_affected() == 0 {
            Ok(InsertOutcome::Duplicate)
        } else {
            Ok(InsertOutcome::Inserted)
        }
    }

    async fn claim_due(
        &self,
        worker_id: &str,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Event>> {
        let rows = sqlx::query(
            r#"
            WITH claimable AS (
                SELECT id, partition_key
                FROM events
                WHERE status = 'PENDING'
                  AND scheduled_at <= $1
                ORDER BY scheduled_at ASC
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            UPDATE events
            SET status = 'PROCESSING',
                locked_by = $3,
                lock_expires_at = $4,
                updated_at = NOW(),
                version = version + 1
            FROM claimable
            WHERE events.id = claimable.id AND events.partition_key = claimable.partition_key
            RETURNING events.*
            "#,
        )
        .bind(now)
        .bind(limit)
        .bind(worker_id)
        .bind(lease_until)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_event).collect()
    }

    async fn complete(&self, id: Uuid, worker_id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE events
            SET status = 'COMPLETED',
                locked_by = NULL,
                lock_expires_at = NULL,
                executed_at = NOW(),
                updated_at = NOW(),
                version = version + 1
            WHERE id = $1 AND status = 'PROCESSING' AND locked_by = $2
            "#,
        )
        .bind(id)
        .bind(worker_id)
        .execute(&self.pool)
        .await?;

        warn_if_stale(result.rows_affected(), id, worker_id, "complete");
        Ok(result.rows_affected() > 0)
    }

    async fn fail_retriable(&self, id: Uuid, worker_id: &str, error: &str) -> Result<bool> {
        let truncated = orchestrator_core::truncate_last_error(error);
        let result = sqlx::query(
            r#"
            UPDATE events
            SET status = 'PENDING',
                retry_count = retry_count + 1,
                last_error = $3,
                locked_by = NULL,
                lock_expires_at = NULL,
                updated_at = NOW(),
                version = version + 1
            WHERE id = $1 AND status = 'PROCESSING' AND locked_by = $2
            "#,
        )
        .bind(id)
        .bind(worker_id)
        .bind(truncated)
        .execute(&self.pool)
        .await?;

        warn_if_stale(result.rows_affected(), id, worker_id, "fail_retriable");
        Ok(result.rows_affected() > 0)
    }

    async fn fail_terminal(&self, id: Uuid, worker_id: &str, error: &str) -> Result<bool> {
        let truncated = orchestrator_core::truncate_last_error(error);
        let result = sqlx::query(
            r#"
            UPDATE events
            SET status = 'DEAD_LETTER',
                retry_count = retry_count + 1,
                last_error = $3,
                locked_by = NULL,
                lock_expires_at = NULL,
                executed_at = NOW(),
                updated_at = NOW(),
                version = version + 1
            WHERE id = $1 AND status = 'PROCESSING' AND locked_by = $2
            "#,
        )
        .bind(id)
        .bind(worker_id)
        .bind(truncated)
        .execute(&self.pool)
        .await?;

        warn_if_stale(result.rows_affected(), id, worker_id, "fail_terminal");
        Ok(result.rows_affected() > 0)
    }

    async fn cancel_by_id(&self, id: Uuid) -> Result<CancelOutcome> {
        let existing = sqlx::query("SELECT status FROM events WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = existing else { return Ok(CancelOutcome::NotFound) };
        let status: String = row.try_get("status")?;
        if status != "PENDING" {
            return Ok(CancelOutcome::InvalidState);
        }

        sqlx::query(
            r#"
            UPDATE events
            SET status = 'CANCELLED', executed_at = NOW(), updated_at = NOW(), version = version + 1
            WHERE id = $1 AND status = 'PENDING'
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(CancelOutcome::Cancelled)
    }

    async fn cancel_by_external_job_id(&self, external_job_id: &str) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE events
            SET status = 'CANCELLED', executed_at = NOW(), updated_at = NOW(), version = version + 1
            WHERE external_job_id = $1 AND status = 'PENDING'
            "#,
        )
        .bind(external_job_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn reschedule_unclaim(&self, id: Uuid, worker_id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE events
            SET status = 'PENDING',
                locked_by = NULL,
                lock_expires_at = NULL,
                updated_at = NOW(),
                version = version + 1
            WHERE id = $1 AND status = 'PROCESSING' AND locked_by = $2
            "#,
        )
        .bind(id)
        .bind(worker_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn release_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE events
            SET status = 'PENDING',
                locked_by = NULL,
                lock_expires_at = NULL,
                updated_at = NOW(),
                version = version + 1
            WHERE status = 'PROCESSING' AND lock_expires_at < $1
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn delete_terminal_batch(&self, cutoff: DateTime<Utc>, batch_size: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            WITH doomed AS (
                SELECT id, partition_key
                FROM events
                WHERE status IN ('COMPLETED', 'DEAD_LETTER', 'CANCELLED')
                  AND executed_at < $1
                LIMIT $2
            )
            DELETE FROM events
            USING doomed
            WHERE events.id = doomed.id AND events.partition_key = doomed.partition_key
            "#,
        )
        .bind(cutoff)
        .bind(batch_size)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn exists_dedup_key(&self, key: &DedupKey) -> Result<bool> {
        let row = sqlx::query(
            "SELECT EXISTS(SELECT 1 FROM events WHERE external_job_id = $1 AND source = $2 AND scheduled_at = $3) AS present",
        )
        .bind(&key.external_job_id)
        .bind(&key.source)
        .bind(key.scheduled_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get("present")?)
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Event>> {
        let row = sqlx::query("SELECT * FROM events WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_event).transpose()
    }

    async fn get_by_external_job_id(&self, external_job_id: &str) -> Result<Option<Event>> {
        let row = sqlx::query("SELECT * FROM events WHERE external_job_id = $1 ORDER BY created_at DESC LIMIT 1")
            .bind(external_job_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_event).transpose()
    }

    async fn list_by_external_job_id(&self, external_job_id: &str) -> Result<Vec<Event>> {
        let rows = sqlx::query("SELECT * FROM events WHERE external_job_id = $1 ORDER BY created_at DESC")
            .bind(external_job_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::row_to_event).collect()
    }

    /// A full-scan aggregate over a potentially large partitioned table —
    /// an admin endpoint, not a hot path.
    async fn statistics(&self) -> Result<StatusCounts> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'PENDING') AS pending,
                COUNT(*) FILTER (WHERE status = 'PROCESSING') AS processing,
                COUNT(*) FILTER (WHERE status = 'COMPLETED') AS completed,
                COUNT(*) FILTER (WHERE status = 'DEAD_LETTER') AS dead_letter,
                COUNT(*) FILTER (WHERE status = 'CANCELLED') AS cancelled
            FROM events
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(StatusCounts {
            pending: row.try_get("pending")?,
            processing: row.try_get("processing")?,
            completed: row.try_get("completed")?,
            dead_letter: row.try_get("dead_letter")?,
            cancelled: row.try_get("cancelled")?,
        })
    }

    async fn ensure_partitions(&self, partition_keys: &[i32]) -> Result<()> {
        for &start in partition_keys {
            let end = start + 10;
            let name = format!("events_p{start}");
            let ddl = format!(
                "CREATE TABLE IF NOT EXISTS {name} PARTITION OF events FOR VALUES FROM ({start}) TO ({end})"
            );
            sqlx::query(&ddl).execute(&self.pool).await?;
        }
        Ok(())
    }
}

fn warn_if_stale(rows_affected: u64, id: Uuid, worker_id: &str, op: &str) {
    if rows_affected == 0 {
        warn!(event_id = %id, worker_id, op, "outcome write affected no rows: lease no longer held");
    }
}
