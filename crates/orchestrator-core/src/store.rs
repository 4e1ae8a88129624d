//! The Event Store abstraction: the durable, partitioned, lease-based
//! record of every scheduled event.
//!
//! Implementations (see `orchestrator-store-postgres`) own the canonical
//! row; workers only ever hold a *lease* over it. This trait is
//! policy-light on purpose — it exposes exactly the atomic operations the
//! rest of the pipeline needs and nothing about how a backend realizes them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::event::{DedupKey, Event, NewEvent};
use crate::error::InsertOutcome;

/// Result of a cancel request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled,
    /// The row was not `Pending` — cancellation is only reachable from
    /// `Pending`.
    InvalidState,
    NotFound,
}

/// Aggregate counts grouped by status.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusCounts {
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub dead_letter: i64,
    pub cancelled: i64,
}

impl StatusCounts {
    pub fn total(&self) -> i64 {
        self.pending + self.processing + self.completed + self.dead_letter + self.cancelled
    }
}

/// Durable, partitioned event store with a pessimistic-lease claim
/// protocol. Every mutating method here must honor the event lifecycle's
/// invariants: a row is either unclaimed, or claimed by exactly one worker
/// under a lease with an expiry, and every terminal transition is
/// idempotent under retry.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Persist a new event with status `Pending`. Returns
    /// [`InsertOutcome::Duplicate`] instead of an error when the dedup key
    /// collides — a duplicate submission is not a failure.
    async fn insert(&self, event: NewEvent) -> anyhow::Result<InsertOutcome>;

    /// Atomically claim up to `limit` due, unlocked rows under a lease held
    /// by `worker_id` until `lease_until`. Must use skip-locked pessimistic
    /// locking so concurrently-polling workers claim disjoint batches.
    async fn claim_due(
        &self,
        worker_id: &str,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
        limit: i64,
    ) -> anyhow::Result<Vec<Event>>;

    /// Transition a claimed event to `Completed`. The transition is
    /// predicated on `locked_by = worker_id`: returns `false` (no-op) if the
    /// lease was reassigned to another worker in the meantime.
    async fn complete(&self, id: Uuid, worker_id: &str) -> anyhow::Result<bool>;

    /// Retriable-failure transition: increments `retry_count`, records the
    /// truncated error, clears the lease, returns the row to `Pending`.
    /// Same lease predicate as [`Self::complete`].
    async fn fail_retriable(&self, id: Uuid, worker_id: &str, error: &str) -> anyhow::Result<bool>;

    /// Terminal-failure transition: increments `retry_count`, records the
    /// error, sets `executed_at`, moves the row to `DeadLetter`. Same lease
    /// predicate as [`Self::complete`].
    async fn fail_terminal(&self, id: Uuid, worker_id: &str, error: &str) -> anyhow::Result<bool>;

    /// Cancel a single `Pending` event.
    async fn cancel_by_id(&self, id: Uuid) -> anyhow::Result<CancelOutcome>;

    /// Cancel every `Pending` event for an external job id. Returns the
    /// number of rows affected.
    async fn cancel_by_external_job_id(&self, external_job_id: &str) -> anyhow::Result<u64>;

    /// Return a claimed event to `Pending` without counting it as a
    /// failure — used by the Poller when a claimed row's `scheduled_at` is
    /// still in the future (the clock-drift edge case).
    async fn reschedule_unclaim(&self, id: Uuid, worker_id: &str) -> anyhow::Result<bool>;

    /// Bulk-release leases that expired before `now`, returning them to
    /// `Pending`. Returns the count of released rows.
    async fn release_expired(&self, now: DateTime<Utc>) -> anyhow::Result<u64>;

    /// Bulk-delete terminal rows whose `executed_at` is older than
    /// `cutoff`, bounded by `batch_size`.
    async fn delete_terminal_batch(&self, cutoff: DateTime<Utc>, batch_size: i64) -> anyhow::Result<u64>;

    /// Authoritative dedup check against the durable store, the fallback
    /// tier behind the in-process caches.
    async fn exists_dedup_key(&self, key: &DedupKey) -> anyhow::Result<bool>;

    async fn get_by_id(&self, id: Uuid) -> anyhow::Result<Option<Event>>;

    /// Most recent match by external job id.
    async fn get_by_external_job_id(&self, external_job_id: &str) -> anyhow::Result<Option<Event>>;

    async fn list_by_external_job_id(&self, external_job_id: &str) -> anyhow::Result<Vec<Event>>;

    /// Aggregate counts by status. A full-scan aggregate over a potentially
    /// large partitioned table — an admin endpoint, not a hot path.
    async fn statistics(&self) -> anyhow::Result<StatusCounts>;

    /// Pre-create any of the given partition-key ranges that do not already
    /// exist. Idempotent. Keeps partition provisioning in application code
    /// (a periodic maintenance job) rather than database-side procedures.
    async fn ensure_partitions(&self, partition_keys: &[i32]) -> anyhow::Result<()>;
}
