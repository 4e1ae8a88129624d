//! Kafka-backed Ingestion Buffer and the BROKER arm of the Delivery Engine.
//!
//! `orchestrator-core` only ever depends on the [`IngestionBuffer`] and
//! [`BrokerProducer`] traits; this crate is the concrete realization with a
//! Kafka-compatible client, kept out of the core crate so the broker
//! client library stays an external, swappable collaborator.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use orchestrator_core::delivery::BrokerProducer;
use orchestrator_core::event::{DeliveryType, NewEvent};
use orchestrator_core::ingestion::{ConsumedMessage, IngestionBuffer};
use rdkafka::config::{ClientConfig, RDKafkaLogLevel};
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::{Offset, TopicPartitionList};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

/// Wire envelope for a [`NewEvent`] carried on the ingestion buffer.
/// `NewEvent` itself carries no serde impls — it's a store insertion DTO,
/// not a wire format — so the buffer gets its own representation.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct EventEnvelope {
    external_job_id: String,
    source: String,
    scheduled_at: DateTime<Utc>,
    delivery_type: String,
    destination: String,
    payload: serde_json::Value,
    max_retries: i32,
}

impl From<&NewEvent> for EventEnvelope {
    fn from(event: &NewEvent) -> Self {
        Self {
            external_job_id: event.external_job_id.clone(),
            source: event.source.clone(),
            scheduled_at: event.scheduled_at,
            delivery_type: event.delivery_type.as_db_str().to_owned(),
            destination: event.destination.clone(),
            payload: event.payload.clone(),
            max_retries: event.max_retries,
        }
    }
}

impl TryFrom<EventEnvelope> for NewEvent {
    type Error = anyhow::Error;

    fn try_from(value: EventEnvelope) -> Result<Self> {
        Ok(NewEvent {
            external_job_id: value.external_job_id,
            source: value.source,
            scheduled_at: value.scheduled_at,
            delivery_type: DeliveryType::from_db_str(&value.delivery_type)?,
            destination: value.destination,
            payload: value.payload,
            max_retries: value.max_retries,
        })
    }
}

/// Settings needed to reach the cluster and address the ingestion topic.
#[derive(Debug, Clone)]
pub struct KafkaSettings {
    pub brokers: String,
    pub topic: String,
    pub group_id: String,
    pub partitions: i32,
}

/// A single shared producer, used both by the Ingestion Buffer's
/// `produce`/`produce_dlq` and as the Delivery Engine's [`BrokerProducer`]
/// for BROKER-channel events. `rdkafka`'s producer handle is already
/// `Clone` + `Send` + `Sync` internally, so one instance wrapped in an
/// `Arc` satisfies both call sites.
pub struct KafkaBrokerProducer {
    producer: FutureProducer,
}

impl KafkaBrokerProducer {
    /// Durable acknowledgement (`acks=all`), idempotent produce (no
    /// duplicates on producer retry), batched with a linger window,
    /// compressed.
    pub fn new(brokers: &str) -> Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("acks", "all")
            .set("enable.idempotence", "true")
            .set("linger.ms", "10")
            .set("compression.type", "lz4")
            .set_log_level(RDKafkaLogLevel::Warning)
            .create()
            .context("failed to construct kafka producer")?;
        Ok(Self { producer })
    }
}

#[async_trait]
impl BrokerProducer for KafkaBrokerProducer {
    async fn produce(&self, topic: &str, key: &str, value: &[u8]) -> Result<()> {
        let record = FutureRecord::to(topic).key(key).payload(value);
        self.producer
            .send(record, Duration::from_secs(10))
            .await
            .map_err(|(err, _msg)| anyhow::anyhow!("kafka produce failed: {err}"))?;
        Ok(())
    }
}

/// Ingestion Buffer backed by a Kafka-compatible topic. The produce-time
/// partition key is `source + ":" + external_job_id`, so every submission
/// for one job lands on the same partition and keeps order. Offsets are
/// committed manually (`enable.auto.commit=false`) only after an entire
/// polled batch reaches a terminal outcome.
pub struct KafkaIngestionBuffer {
    consumer: StreamConsumer,
    producer: Arc<KafkaBrokerProducer>,
    topic: String,
    dlq_topic: String,
}

impl KafkaIngestionBuffer {
    pub fn new(settings: &KafkaSettings, producer: Arc<KafkaBrokerProducer>) -> Result<Self> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &settings.brokers)
            .set("group.id", &settings.group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .set("session.timeout.ms", "10000")
            .set_log_level(RDKafkaLogLevel::Warning)
            .create()
            .context("failed to construct kafka consumer")?;

        consumer
            .subscribe(&[settings.topic.as_str()])
            .with_context(|| format!("failed to subscribe to topic {:?}", settings.topic))?;

        Ok(Self {
            consumer,
            producer,
            topic: settings.topic.clone(),
            dlq_topic: format!("{}.dlq", settings.topic),
        })
    }

    fn partition_key(event: &NewEvent) -> String {
        format!("{}:{}", event.source, event.external_job_id)
    }
}

#[async_trait]
impl IngestionBuffer for KafkaIngestionBuffer {
    async fn produce(&self, event: &NewEvent) -> Result<()> {
        let envelope = EventEnvelope::from(event);
        let payload = serde_json::to_vec(&envelope).context("failed to encode event envelope")?;
        let key = Self::partition_key(event);
        self.producer.produce(&self.topic, &key, &payload).await
    }

    async fn produce_dlq(&self, event: &NewEvent, error: &str) -> Result<()> {
        let envelope = serde_json::json!({
            "event": EventEnvelope::from(event),
            "error": error,
        });
        let payload = serde_json::to_vec(&envelope).context("failed to encode dlq envelope")?;
        let key = Self::partition_key(event);
        self.producer.produce(&self.dlq_topic, &key, &payload).await
    }

    /// Pull up to `max` unacknowledged messages, waiting at most 500ms for
    /// the batch to fill so a quiet topic doesn't stall the Persister's loop
    /// indefinitely.
    async fn poll_batch(&self, max: usize) -> Result<Vec<ConsumedMessage>> {
        let mut batch = Vec::with_capacity(max);
        let deadline = tokio::time::Instant::now() + Duration::from_millis(500);

        while batch.len() < max {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                break;
            }
            let received = match tokio::time::timeout(remaining, self.consumer.recv()).await {
                Ok(Ok(message)) => message,
                Ok(Err(e)) => {
                    warn!(error = %e, "kafka consumer recv error");
                    break;
                }
                Err(_) => break,
            };

            let Some(payload) = received.payload() else {
                warn!(offset = received.offset(), "ingestion message without a payload, skipping");
                continue;
            };

            let envelope: EventEnvelope = match serde_json::from_slice(payload) {
                Ok(e) => e,
                Err(e) => {
                    error!(error = %e, offset = received.offset(), "failed to decode ingestion message, skipping");
                    continue;
                }
            };

            let event: NewEvent = match envelope.try_into() {
                Ok(e) => e,
                Err(e) => {
                    error!(error = %e, offset = received.offset(), "failed to convert ingestion envelope, skipping");
                    continue;
                }
            };

            batch.push(ConsumedMessage {
                event,
                partition: received.partition(),
                offset: received.offset(),
            });
        }

        Ok(batch)
    }

    async fn ack_batch(&self, batch: &[ConsumedMessage]) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        // Commit the highest offset + 1 seen per partition; earlier offsets
        // in the same partition within this batch collapse into it.
        let mut max_offsets: HashMap<i32, i64> = HashMap::new();
        for message in batch {
            max_offsets
                .entry(message.partition)
                .and_modify(|o| *o = (*o).max(message.offset))
                .or_insert(message.offset);
        }

        let mut tpl = TopicPartitionList::new();
        for (partition, offset) in max_offsets {
            tpl.add_partition_offset(&self.topic, partition, Offset::Offset(offset + 1))
                .map_err(|e| anyhow::anyhow!("failed to stage commit offset: {e}"))?;
        }

        self.consumer
            .commit(&tpl, CommitMode::Sync)
            .context("failed to commit ingestion offsets")?;
        Ok(())
    }
}
