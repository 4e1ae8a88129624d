//! In-memory test doubles for the scheduled event orchestrator.
//!
//! [`InMemoryEventStore`] implements the full [`EventStore`] contract
//! (including the skip-locked claim semantics, modeled with a single
//! process-wide mutex since there is nothing to lose by serializing claims
//! within one test) so unit tests across the workspace can exercise the
//! Poller, Outcome Writer, Recovery, and Retention loops without a real
//! Postgres instance.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use orchestrator_core::delivery::BrokerProducer;
use orchestrator_core::error::InsertOutcome;
use orchestrator_core::event::{DedupKey, Event, EventStatus, NewEvent, truncate_last_error};
use orchestrator_core::ingestion::{ConsumedMessage, IngestionBuffer};
use orchestrator_core::store::{CancelOutcome, EventStore, StatusCounts};
use parking_lot::Mutex;
use uuid::Uuid;

/// An in-process, mutex-guarded stand-in for the partitioned Postgres store.
#[derive(Default)]
pub struct InMemoryEventStore {
    rows: Mutex<HashMap<Uuid, Event>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<Event> {
        self.rows.lock().values().cloned().collect()
    }

    pub fn insert_row(&self, event: Event) {
        self.rows.lock().insert(event.id, event);
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn insert(&self, event: NewEvent) -> anyhow::Result<InsertOutcome> {
        let mut rows = self.rows.lock();
        let key = event.dedup_key();
        let duplicate = rows.values().any(|row| {
            row.external_job_id == key.external_job_id
                && row.source == key.source
                && row.scheduled_at == key.scheduled_at
        });
        if duplicate {
            return Ok(InsertOutcome::Duplicate);
        }

        let now = Utc::now();
        let id = Uuid::new_v4();
        rows.insert(
            id,
            Event {
                id,
                external_job_id: event.external_job_id,
                source: event.source,
                scheduled_at: event.scheduled_at,
                delivery_type: event.delivery_type,
                destination: event.destination,
                payload: event.payload,
                status: EventStatus::Pending,
                retry_count: 0,
                max_retries: event.max_retries,
                last_error: None,
                created_at: now,
                updated_at: now,
                executed_at: None,
                locked_by: None,
                lock_expires_at: None,
                partition_key: event.partition_key(),
                version: 1,
            },
        );
        Ok(InsertOutcome::Inserted)
    }

    async fn claim_due(
        &self,
        worker_id: &str,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
        limit: i64,
    ) -> anyhow::Result<Vec<Event>> {
        let mut rows = self.rows.lock();
        let mut eligible: Vec<Uuid> = rows
            .values()
            .filter(|row| {
                row.status == EventStatus::Pending
                    && row.scheduled_at <= now
                    && row.lock_expires_at.map(|exp| exp < now).unwrap_or(true)
            })
            .map(|row| row.id)
            .collect();
        eligible.sort_by_key(|id| rows[id].scheduled_at);
        eligible.truncate(limit.max(0) as usize);

        let mut claimed = Vec::with_capacity(eligible.len());
        for id in eligible {
            let row = rows.get_mut(&id).expect("id came from this map");
            row.status = EventStatus::Processing;
            row.locked_by = Some(worker_id.to_owned());
            row.lock_expires_at = Some(lease_until);
            row.updated_at = now;
            row.version += 1;
            claimed.push(row.clone());
        }
        Ok(claimed)
    }

    async fn complete(&self, id: Uuid, worker_id: &str) -> anyhow::Result<bool> {
        let mut rows = self.rows.lock();
        let Some(row) = rows.get_mut(&id) else { return Ok(false) };
        if row.status != EventStatus::Processing || row.locked_by.as_deref() != Some(worker_id) {
            return Ok(false);
        }
        row.status = EventStatus::Completed;
        row.locked_by = None;
        row.lock_expires_at = None;
        row.executed_at = Some(Utc::now());
        row.updated_at = Utc::now();
        row.version += 1;
        Ok(true)
    }

    async fn fail_retriable(&self, id: Uuid, worker_id: &str, error: &str) -> anyhow::Result<bool> {
        let mut rows = self.rows.lock();
        let Some(row) = rows.get_mut(&id) else { return Ok(false) };
        if row.status != EventStatus::Processing || row.locked_by.as_deref() != Some(worker_id) {
            return Ok(false);
        }
        row.status = EventStatus::Pending;
        row.retry_count += 1;
        row.last_error = Some(truncate_last_error(error));
        row.locked_by = None;
        row.lock_expires_at = None;
        row.updated_at = Utc::now();
        row.version += 1;
        Ok(true)
    }

    async fn fail_terminal(&self, id: Uuid, worker_id: &str, error: &str) -> anyhow::Result<bool> {
        let mut rows = self.rows.lock();
        let Some(row) = rows.get_mut(&id) else { return Ok(false) };
        if row.status != EventStatus::Processing || row.locked_by.as_deref() != Some(worker_id) {
            return Ok(false);
        }
        row.status = EventStatus::DeadLetter;
        row.retry_count += 1;
        row.last_error = Some(truncate_last_error(error));
        row.locked_by = None;
        row.lock_expires_at = None;
        row.executed_at = Some(Utc::now());
        row.updated_at = Utc::now();
        row.version += 1;
        Ok(true)
    }

    async fn cancel_by_id(&self, id: Uuid) -> anyhow::Result<CancelOutcome> {
        let mut rows = self.rows.lock();
        let Some(row) = rows.get_mut(&id) else { return Ok(CancelOutcome::NotFound) };
        if row.status != EventStatus::Pending {
            return Ok(CancelOutcome::InvalidState);
        }
        row.status = EventStatus::Cancelled;
        row.executed_at = Some(Utc::now());
        row.updated_at = Utc::now();
        row.version += 1;
        Ok(CancelOutcome::Cancelled)
    }

    async fn cancel_by_external_job_id(&self, external_job_id: &str) -> anyhow::Result<u64> {
        let mut rows = self.rows.lock();
        let mut count = 0;
        for row in rows.values_mut() {
            if row.external_job_id == external_job_id && row.status == EventStatus::Pending {
                row.status = EventStatus::Cancelled;
                row.executed_at = Some(Utc::now());
                row.updated_at = Utc::now();
                row.version += 1;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn reschedule_unclaim(&self, id: Uuid, worker_id: &str) -> anyhow::Result<bool> {
        let mut rows = self.rows.lock();
        let Some(row) = rows.get_mut(&id) else { return Ok(false) };
        if row.locked_by.as_deref() != Some(worker_id) {
            return Ok(false);
        }
        row.status = EventStatus::Pending;
        row.locked_by = None;
        row.lock_expires_at = None;
        row.updated_at = Utc::now();
        row.version += 1;
        Ok(true)
    }

    async fn release_expired(&self, now: DateTime<Utc>) -> anyhow::Result<u64> {
        let mut rows = self.rows.lock();
        let mut count = 0;
        for row in rows.values_mut() {
            if row.status == EventStatus::Processing && row.lock_expires_at.map(|exp| exp < now).unwrap_or(false) {
                row.status = EventStatus::Pending;
                row.locked_by = None;
                row.lock_expires_at = None;
                row.updated_at = now;
                row.version += 1;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn delete_terminal_batch(&self, cutoff: DateTime<Utc>, batch_size: i64) -> anyhow::Result<u64> {
        let mut rows = self.rows.lock();
        let to_delete: Vec<Uuid> = rows
            .values()
            .filter(|row| row.status.is_terminal() && row.executed_at.map(|at| at < cutoff).unwrap_or(false))
            .take(batch_size.max(0) as usize)
            .map(|row| row.id)
            .collect();
        let count = to_delete.len() as u64;
        for id in to_delete {
            rows.remove(&id);
        }
        Ok(count)
    }

    async fn exists_dedup_key(&self, key: &DedupKey) -> anyhow::Result<bool> {
        let rows = self.rows.lock();
        Ok(rows.values().any(|row| {
            row.external_job_id == key.external_job_id
                && row.source == key.source
                && row.scheduled_at == key.scheduled_at
        }))
    }

    async fn get_by_id(&self, id: Uuid) -> anyhow::Result<Option<Event>> {
        Ok(self.rows.lock().get(&id).cloned())
    }

    async fn get_by_external_job_id(&self, external_job_id: &str) -> anyhow::Result<Option<Event>> {
        Ok(self
            .rows
            .lock()
            .values()
            .filter(|row| row.external_job_id == external_job_id)
            .max_by_key(|row| row.created_at)
            .cloned())
    }

    async fn list_by_external_job_id(&self, external_job_id: &str) -> anyhow::Result<Vec<Event>> {
        Ok(self
            .rows
            .lock()
            .values()
            .filter(|row| row.external_job_id == external_job_id)
            .cloned()
            .collect())
    }

    async fn statistics(&self) -> anyhow::Result<StatusCounts> {
        let rows = self.rows.lock();
        let mut counts = StatusCounts::default();
        for row in rows.values() {
            match row.status {
                EventStatus::Pending => counts.pending += 1,
                EventStatus::Processing => counts.processing += 1,
                EventStatus::Completed => counts.completed += 1,
                EventStatus::DeadLetter => counts.dead_letter += 1,
                EventStatus::Cancelled => counts.cancelled += 1,
            }
        }
        Ok(counts)
    }

    async fn ensure_partitions(&self, _partition_keys: &[i32]) -> anyhow::Result<()> {
        Ok(())
    }
}

/// A [`BrokerProducer`] that records every produced message instead of
/// talking to a real broker.
#[derive(Default)]
pub struct RecordingBrokerProducer {
    pub produced: Mutex<Vec<(String, String, Vec<u8>)>>,
    pub fail_next: Mutex<bool>,
}

impl RecordingBrokerProducer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_next(&self, fail: bool) {
        *self.fail_next.lock() = fail;
    }

    pub fn produced_count(&self) -> usize {
        self.produced.lock().len()
    }
}

#[async_trait]
impl BrokerProducer for RecordingBrokerProducer {
    async fn produce(&self, topic: &str, key: &str, value: &[u8]) -> anyhow::Result<()> {
        if std::mem::take(&mut *self.fail_next.lock()) {
            anyhow::bail!("simulated broker failure");
        }
        self.produced
            .lock()
            .push((topic.to_owned(), key.to_owned(), value.to_owned()));
        Ok(())
    }
}

/// Convenience constructor for tests that want a ready-to-claim `Pending`
/// row without going through `EventStore::insert`.
pub fn pending_event(
    external_job_id: &str,
    source: &str,
    scheduled_at: DateTime<Utc>,
    delivery_type: orchestrator_core::event::DeliveryType,
    destination: &str,
    max_retries: i32,
) -> Event {
    let now = Utc::now();
    Event {
        id: Uuid::new_v4(),
        external_job_id: external_job_id.to_owned(),
        source: source.to_owned(),
        scheduled_at,
        delivery_type,
        destination: destination.to_owned(),
        payload: serde_json::json!({}),
        status: EventStatus::Pending,
        retry_count: 0,
        max_retries,
        last_error: None,
        created_at: now,
        updated_at: now,
        executed_at: None,
        locked_by: None,
        lock_expires_at: None,
        partition_key: Event::partition_key_for(scheduled_at),
        version: 1,
    }
}

pub fn shared_store() -> Arc<InMemoryEventStore> {
    Arc::new(InMemoryEventStore::new())
}

/// An [`IngestionBuffer`] that holds submitted events in a `Vec` instead of
/// talking to a real topic, so call sites that only accept submissions (the
/// REST facade's submit handlers) can be exercised without Kafka.
#[derive(Default)]
pub struct InMemoryIngestionBuffer {
    pub produced: Mutex<Vec<NewEvent>>,
    pub dead_lettered: Mutex<Vec<(NewEvent, String)>>,
    pub fail_next: Mutex<bool>,
}

impl InMemoryIngestionBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_next(&self, fail: bool) {
        *self.fail_next.lock() = fail;
    }

    pub fn produced_count(&self) -> usize {
        self.produced.lock().len()
    }
}

#[async_trait]
impl IngestionBuffer for InMemoryIngestionBuffer {
    async fn produce(&self, event: &NewEvent) -> anyhow::Result<()> {
        if std::mem::take(&mut *self.fail_next.lock()) {
            anyhow::bail!("simulated ingestion buffer failure");
        }
        self.produced.lock().push(event.clone());
        Ok(())
    }

    async fn produce_dlq(&self, event: &NewEvent, error: &str) -> anyhow::Result<()> {
        self.dead_lettered.lock().push((event.clone(), error.to_owned()));
        Ok(())
    }

    async fn poll_batch(&self, _max: usize) -> anyhow::Result<Vec<ConsumedMessage>> {
        Ok(Vec::new())
    }

    async fn ack_batch(&self, _batch: &[ConsumedMessage]) -> anyhow::Result<()> {
        Ok(())
    }
}
