//! Ingestion Buffer abstraction and the Persister that consumes it.
//!
//! The buffer itself — partitioned, durable, at-least-once — is implemented
//! by `orchestrator-broker-kafka`; this module only defines the seam the
//! Persister needs and the batch-processing loop that is broker-agnostic.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tracing::{error, warn};

use crate::dedup::Deduplicator;
use crate::error::{BatchOutcome, InsertOutcome};
use crate::event::NewEvent;
use crate::store::EventStore;

/// One message pulled off the Ingestion Buffer, carrying whatever the
/// implementation needs to acknowledge it later (partition + offset for a
/// Kafka-backed buffer).
#[derive(Debug, Clone)]
pub struct ConsumedMessage {
    pub event: NewEvent,
    pub partition: i32,
    pub offset: i64,
}

/// Seam between the Persister and a concrete partitioned log. Partition key
/// on produce is `source + ":" + external_job_id`, so all submissions for
/// one job land on the same partition and preserve order.
#[async_trait]
pub trait IngestionBuffer: Send + Sync {
    /// Append one newly-submitted event to the buffer.
    async fn produce(&self, event: &NewEvent) -> anyhow::Result<()>;

    /// Publish a message that failed persistence (other than as a
    /// duplicate) to the ingestion dead-letter topic.
    async fn produce_dlq(&self, event: &NewEvent, error: &str) -> anyhow::Result<()>;

    /// Pull up to `max` unacknowledged messages.
    async fn poll_batch(&self, max: usize) -> anyhow::Result<Vec<ConsumedMessage>>;

    /// Commit the offsets for every message in `batch`. Must only be called
    /// once every message in the batch reached a terminal outcome
    /// (persisted, suppressed, or DLQ'd).
    async fn ack_batch(&self, batch: &[ConsumedMessage]) -> anyhow::Result<()>;
}

/// Consumes the Ingestion Buffer and durably persists, suppresses, or
/// dead-letters each message.
pub struct Persister {
    buffer: Arc<dyn IngestionBuffer>,
    dedup: Arc<Deduplicator>,
    store: Arc<dyn EventStore>,
    poll_batch_size: usize,
    concurrency: usize,
}

impl Persister {
    /// `poll_batch_size` bounds how many messages are fetched per poll;
    /// `concurrency` bounds how many of them are processed at once (spec's
    /// `consumer_concurrency` knob).
    pub fn new(
        buffer: Arc<dyn IngestionBuffer>,
        dedup: Arc<Deduplicator>,
        store: Arc<dyn EventStore>,
        poll_batch_size: usize,
        concurrency: usize,
    ) -> Self {
        Self {
            buffer,
            dedup,
            store,
            poll_batch_size,
            concurrency,
        }
    }

    /// Poll and process batches until the process exits. A batch-processing
    /// error (i.e. a catastrophic DLQ-produce failure) is logged and the
    /// batch is left unacknowledged for redelivery; the loop then moves on
    /// to the next poll.
    pub async fn run(self: Arc<Self>) {
        loop {
            match self.buffer.poll_batch(self.poll_batch_size).await {
                Ok(batch) if batch.is_empty() => continue,
                Ok(batch) => {
                    if let Err(e) = self.process_batch(batch).await {
                        error!(error = format!("{e:#}"), "persister batch left unacknowledged");
                    }
                }
                Err(e) => error!(error = format!("{e:#}"), "failed to poll ingestion buffer"),
            }
        }
    }

    /// Process one consumed batch, up to `concurrency` messages in flight at
    /// once. Returns `Err` only when a message could not even be DLQ'd — the
    /// batch must then be redelivered in full.
    pub async fn process_batch(&self, batch: Vec<ConsumedMessage>) -> anyhow::Result<Vec<BatchOutcome>> {
        self.dedup.begin_batch();

        let dedup: &Deduplicator = self.dedup.as_ref();
        let store: &dyn EventStore = self.store.as_ref();
        let buffer: &dyn IngestionBuffer = self.buffer.as_ref();
        let outcomes: Vec<anyhow::Result<BatchOutcome>> = stream::iter(batch.iter())
            .map(|message| process_one(dedup, store, buffer, &message.event))
            .buffered(self.concurrency.max(1))
            .collect()
            .await;
        let outcomes = outcomes.into_iter().collect::<anyhow::Result<Vec<_>>>()?;

        self.buffer.ack_batch(&batch).await?;
        Ok(outcomes)
    }
}

/// Persist, suppress, or dead-letter a single message. A free function
/// (rather than a `Persister` method) so `process_batch` can run many of
/// these concurrently via `buffered` without borrowing `&self` across an
/// `.await` boundary per message.
async fn process_one(
    dedup: &Deduplicator,
    store: &dyn EventStore,
    buffer: &dyn IngestionBuffer,
    event: &NewEvent,
) -> anyhow::Result<BatchOutcome> {
    let key = event.dedup_key();

    match dedup.is_duplicate(&key).await {
        Ok(true) => return Ok(BatchOutcome::Suppressed),
        Ok(false) => {}
        Err(e) => {
            warn!(error = format!("{e:#}"), "dedup check failed, falling through to store insert");
        }
    }

    match store.insert(event.clone()).await {
        Ok(InsertOutcome::Inserted) => {
            dedup.record_accepted(key);
            Ok(BatchOutcome::Persisted)
        }
        Ok(InsertOutcome::Duplicate) => {
            dedup.record_accepted(key);
            Ok(BatchOutcome::Suppressed)
        }
        Err(e) => {
            // Any non-duplicate insert failure is routed to the
            // ingestion DLQ. A DLQ-produce failure is catastrophic and
            // propagates out of the batch, blocking the ack so the
            // whole batch is redelivered.
            buffer.produce_dlq(event, &format!("{e:#}")).await?;
            Ok(BatchOutcome::DeadLettered)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{DedupKey, DeliveryType, Event};
    use crate::store::{CancelOutcome, StatusCounts};
    use async_trait::async_trait;
    use chrono::Utc;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use uuid::Uuid;

    fn new_event(external_job_id: &str) -> NewEvent {
        NewEvent {
            external_job_id: external_job_id.to_owned(),
            source: "payments".to_owned(),
            scheduled_at: Utc::now(),
            delivery_type: DeliveryType::Http,
            destination: "http://example.invalid/hook".to_owned(),
            payload: serde_json::json!({}),
            max_retries: 3,
        }
    }

    struct FakeStore {
        existing: Mutex<Vec<DedupKey>>,
        fail_insert: AtomicBool,
    }

    #[async_trait]
    impl EventStore for FakeStore {
        async fn insert(&self, event: NewEvent) -> anyhow::Result<InsertOutcome> {
            if self.fail_insert.load(Ordering::SeqCst) {
                anyhow::bail!("simulated insert failure");
            }
            let key = event.dedup_key();
            let mut existing = self.existing.lock();
            if existing.contains(&key) {
                return Ok(InsertOutcome::Duplicate);
            }
            existing.push(key);
            Ok(InsertOutcome::Inserted)
        }
        async fn claim_due(&self, _: &str, _: chrono::DateTime<Utc>, _: chrono::DateTime<Utc>, _: i64) -> anyhow::Result<Vec<Event>> {
            unimplemented!()
        }
        async fn complete(&self, _: Uuid, _: &str) -> anyhow::Result<bool> {
            unimplemented!()
        }
        async fn fail_retriable(&self, _: Uuid, _: &str, _: &str) -> anyhow::Result<bool> {
            unimplemented!()
        }
        async fn fail_terminal(&self, _: Uuid, _: &str, _: &str) -> anyhow::Result<bool> {
            unimplemented!()
        }
        async fn cancel_by_id(&self, _: Uuid) -> anyhow::Result<CancelOutcome> {
            unimplemented!()
        }
        async fn cancel_by_external_job_id(&self, _: &str) -> anyhow::Result<u64> {
            unimplemented!()
        }
        async fn reschedule_unclaim(&self, _: Uuid, _: &str) -> anyhow::Result<bool> {
            unimplemented!()
        }
        async fn release_expired(&self, _: chrono::DateTime<Utc>) -> anyhow::Result<u64> {
            unimplemented!()
        }
        async fn delete_terminal_batch(&self, _: chrono::DateTime<Utc>, _: i64) -> anyhow::Result<u64> {
            unimplemented!()
        }
        async fn exists_dedup_key(&self, key: &DedupKey) -> anyhow::Result<bool> {
            Ok(self.existing.lock().contains(key))
        }
        async fn get_by_id(&self, _: Uuid) -> anyhow::Result<Option<Event>> {
            unimplemented!()
        }
        async fn get_by_external_job_id(&self, _: &str) -> anyhow::Result<Option<Event>> {
            unimplemented!()
        }
        async fn list_by_external_job_id(&self, _: &str) -> anyhow::Result<Vec<Event>> {
            unimplemented!()
        }
        async fn statistics(&self) -> anyhow::Result<StatusCounts> {
            unimplemented!()
        }
        async fn ensure_partitions(&self, _partition_keys: &[i32]) -> anyhow::Result<()> {
            unimplemented!()
        }
    }

    struct RecordingBuffer {
        dlq: Mutex<Vec<NewEvent>>,
        acked: Mutex<Vec<i64>>,
    }

    #[async_trait]
    impl IngestionBuffer for RecordingBuffer {
        async fn produce(&self, _event: &NewEvent) -> anyhow::Result<()> {
            Ok(())
        }
        async fn produce_dlq(&self, event: &NewEvent, _error: &str) -> anyhow::Result<()> {
            self.dlq.lock().push(event.clone());
            Ok(())
        }
        async fn poll_batch(&self, _max: usize) -> anyhow::Result<Vec<ConsumedMessage>> {
            Ok(vec![])
        }
        async fn ack_batch(&self, batch: &[ConsumedMessage]) -> anyhow::Result<()> {
            self.acked.lock().extend(batch.iter().map(|m| m.offset));
            Ok(())
        }
    }

    fn consumed(offset: i64, event: NewEvent) -> ConsumedMessage {
        ConsumedMessage { event, partition: 0, offset }
    }

    #[tokio::test]
    async fn fresh_message_is_persisted_and_acked() {
        let store = Arc::new(FakeStore { existing: Mutex::new(vec![]), fail_insert: AtomicBool::new(false) });
        let buffer = Arc::new(RecordingBuffer { dlq: Mutex::new(vec![]), acked: Mutex::new(vec![]) });
        let dedup = Arc::new(Deduplicator::new(store.clone(), 100));
        let persister = Persister::new(buffer.clone(), dedup, store, 10, 10);

        let outcomes = persister
            .process_batch(vec![consumed(0, new_event("job-1"))])
            .await
            .unwrap();

        assert_eq!(outcomes, vec![BatchOutcome::Persisted]);
        assert_eq!(*buffer.acked.lock(), vec![0]);
    }

    #[tokio::test]
    async fn duplicate_within_the_same_batch_is_suppressed() {
        let store = Arc::new(FakeStore { existing: Mutex::new(vec![]), fail_insert: AtomicBool::new(false) });
        let buffer = Arc::new(RecordingBuffer { dlq: Mutex::new(vec![]), acked: Mutex::new(vec![]) });
        let dedup = Arc::new(Deduplicator::new(store.clone(), 100));
        let persister = Persister::new(buffer.clone(), dedup, store, 10, 10);

        let event = new_event("job-1");
        let outcomes = persister
            .process_batch(vec![consumed(0, event.clone()), consumed(1, event)])
            .await
            .unwrap();

        assert_eq!(outcomes, vec![BatchOutcome::Persisted, BatchOutcome::Suppressed]);
    }

    #[tokio::test]
    async fn insert_failure_routes_to_dlq_and_still_acks() {
        let store = Arc::new(FakeStore { existing: Mutex::new(vec![]), fail_insert: AtomicBool::new(true) });
        let buffer = Arc::new(RecordingBuffer { dlq: Mutex::new(vec![]), acked: Mutex::new(vec![]) });
        let dedup = Arc::new(Deduplicator::new(store.clone(), 100));
        let persister = Persister::new(buffer.clone(), dedup, store, 10, 10);

        let outcomes = persister
            .process_batch(vec![consumed(0, new_event("job-1"))])
            .await
            .unwrap();

        assert_eq!(outcomes, vec![BatchOutcome::DeadLettered]);
        assert_eq!(buffer.dlq.lock().len(), 1);
        assert_eq!(*buffer.acked.lock(), vec![0]);
    }

    #[tokio::test]
    async fn dlq_produce_failure_blocks_the_ack() {
        struct FailingDlqBuffer;
        #[async_trait]
        impl IngestionBuffer for FailingDlqBuffer {
            async fn produce(&self, _event: &NewEvent) -> anyhow::Result<()> {
                Ok(())
            }
            async fn produce_dlq(&self, _event: &NewEvent, _error: &str) -> anyhow::Result<()> {
                anyhow::bail!("dlq topic unreachable")
            }
            async fn poll_batch(&self, _max: usize) -> anyhow::Result<Vec<ConsumedMessage>> {
                Ok(vec![])
            }
            async fn ack_batch(&self, _batch: &[ConsumedMessage]) -> anyhow::Result<()> {
                panic!("must not be called when a message could not be dlq'd");
            }
        }

        let store = Arc::new(FakeStore { existing: Mutex::new(vec![]), fail_insert: AtomicBool::new(true) });
        let buffer = Arc::new(FailingDlqBuffer);
        let dedup = Arc::new(Deduplicator::new(store.clone(), 100));
        let persister = Persister::new(buffer, dedup, store, 10, 10);

        let result = persister.process_batch(vec![consumed(0, new_event("job-1"))]).await;
        assert!(result.is_err());
    }
}
