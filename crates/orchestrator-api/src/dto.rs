//! Wire DTOs for the REST facade.
//!
//! These are deliberately distinct from `orchestrator_core::event`'s
//! domain types: the wire contract spells the broker channel `"KAFKA"`
//! while the domain (and the store's db representation) calls it
//! `BROKER`, since the core is written against a generic message-broker
//! seam rather than any one implementation.

use chrono::{DateTime, Utc};
use orchestrator_core::event::DeliveryType;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Batch submissions above this size are rejected outright.
pub const MAX_BATCH_SIZE: usize = 1000;

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum WireDeliveryType {
    Http,
    Kafka,
}

impl From<WireDeliveryType> for DeliveryType {
    fn from(value: WireDeliveryType) -> Self {
        match value {
            WireDeliveryType::Http => DeliveryType::Http,
            WireDeliveryType::Kafka => DeliveryType::Broker,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmitEventRequest {
    pub external_job_id: String,
    pub source: String,
    pub scheduled_at: DateTime<Utc>,
    pub delivery_type: WireDeliveryType,
    pub destination: String,
    #[serde(default = "default_payload")]
    pub payload: Value,
    pub max_retries: Option<i32>,
}

fn default_payload() -> Value {
    Value::Object(Default::default())
}

#[derive(Debug, Serialize)]
pub struct SubmitAcceptedResponse {
    pub message_id: Uuid,
    pub message: &'static str,
}

impl SubmitAcceptedResponse {
    pub fn new(message_id: Uuid) -> Self {
        Self {
            message_id,
            message: "Event queued for processing",
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SubmitBatchRequest {
    pub events: Vec<SubmitEventRequest>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BatchItemResult {
    Accepted { message_id: Uuid },
    Rejected { reason: String },
}

#[derive(Debug, Serialize)]
pub struct SubmitBatchResponse {
    pub results: Vec<BatchItemResult>,
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub cancelled: bool,
}

#[derive(Debug, Serialize)]
pub struct CancelBulkResponse {
    pub cancelled_count: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatisticsResponse {
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub dead_letter: i64,
    pub cancelled: i64,
    pub total: i64,
}

#[derive(Debug, Deserialize)]
pub struct CleanupQuery {
    pub days: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct CleanupResponse {
    pub deleted: u64,
}
