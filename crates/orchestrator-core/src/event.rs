//! The central domain entity: a scheduled delivery unit.

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum length enforced on `external_job_id` (spec: ≤255 chars).
pub const MAX_EXTERNAL_JOB_ID_LEN: usize = 255;
/// Maximum length enforced on `source` (spec: ≤100 chars).
pub const MAX_SOURCE_LEN: usize = 100;
/// Maximum length enforced on `destination` (spec: ≤2048 chars).
pub const MAX_DESTINATION_LEN: usize = 2048;
/// `last_error` is truncated to this many chars before being persisted.
pub const MAX_LAST_ERROR_LEN: usize = 4000;
/// Upper bound on `max_retries` accepted at submission time.
pub const MAX_RETRIES_CEILING: i32 = 10;

/// Delivery channel for a scheduled event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeliveryType {
    Http,
    Broker,
}

impl DeliveryType {
    pub fn as_db_str(self) -> &'static str {
        match self {
            Self::Http => "HTTP",
            Self::Broker => "BROKER",
        }
    }

    pub fn from_db_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "HTTP" => Ok(Self::Http),
            "BROKER" => Ok(Self::Broker),
            other => anyhow::bail!("unrecognized delivery type {other:?}"),
        }
    }
}

/// Lifecycle status of an event. There is no persisted `Failed` state: a
/// retriable attempt that fails returns the row straight to `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventStatus {
    Pending,
    Processing,
    Completed,
    DeadLetter,
    Cancelled,
}

impl EventStatus {
    /// Terminal statuses are never re-claimed and are the only ones eligible
    /// for retention deletion.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::DeadLetter | Self::Cancelled)
    }

    /// The literal string a store backend persists.
    pub fn as_db_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::DeadLetter => "DEAD_LETTER",
            Self::Cancelled => "CANCELLED",
        }
    }

    pub fn from_db_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "PROCESSING" => Ok(Self::Processing),
            "COMPLETED" => Ok(Self::Completed),
            "DEAD_LETTER" => Ok(Self::DeadLetter),
            "CANCELLED" => Ok(Self::Cancelled),
            other => anyhow::bail!("unrecognized event status {other:?}"),
        }
    }
}

/// A scheduled event row, as persisted by the Event Store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub external_job_id: String,
    pub source: String,
    pub scheduled_at: DateTime<Utc>,
    pub delivery_type: DeliveryType,
    pub destination: String,
    pub payload: serde_json::Value,
    pub status: EventStatus,
    pub retry_count: i32,
    pub max_retries: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub executed_at: Option<DateTime<Utc>>,
    pub locked_by: Option<String>,
    pub lock_expires_at: Option<DateTime<Utc>>,
    pub partition_key: i32,
    pub version: i32,
}

impl Event {
    /// `year*1000 + day_of_year(scheduled_at)`, computed against UTC — the
    /// store's physical partitioning discriminator.
    pub fn partition_key_for(scheduled_at: DateTime<Utc>) -> i32 {
        scheduled_at.year() * 1000 + scheduled_at.ordinal() as i32
    }
}

/// Request to create a new event, as accepted by `EventStore::insert`.
///
/// This is the insertion-time DTO: it carries no id, status, or lease
/// columns because those are assigned by the store (`id`, `created_at`,
/// `updated_at`) or are invariants of a freshly-inserted row (`status =
/// Pending`, lease columns null).
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub external_job_id: String,
    pub source: String,
    pub scheduled_at: DateTime<Utc>,
    pub delivery_type: DeliveryType,
    pub destination: String,
    pub payload: serde_json::Value,
    pub max_retries: i32,
}

impl NewEvent {
    /// The dedup key identifying this submission.
    pub fn dedup_key(&self) -> DedupKey {
        DedupKey {
            external_job_id: self.external_job_id.clone(),
            source: self.source.clone(),
            scheduled_at: self.scheduled_at,
        }
    }

    pub fn partition_key(&self) -> i32 {
        Event::partition_key_for(self.scheduled_at)
    }
}

/// `(external_job_id, source, scheduled_at)` — uniquely identifies a
/// submission.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    pub external_job_id: String,
    pub source: String,
    pub scheduled_at: DateTime<Utc>,
}

/// Truncate an error message to the column's storage budget.
pub fn truncate_last_error(message: &str) -> String {
    if message.len() <= MAX_LAST_ERROR_LEN {
        message.to_owned()
    } else {
        // Truncate on a char boundary so we never split a multi-byte UTF-8 sequence.
        let mut end = MAX_LAST_ERROR_LEN;
        while !message.is_char_boundary(end) {
            end -= 1;
        }
        message[..end].to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn partition_key_matches_year_and_day_of_year() {
        let dt = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        // 2026 is not a leap year; Jan (31) + Feb (28) + 1 = day 60.
        assert_eq!(Event::partition_key_for(dt), 2026 * 1000 + 60);
    }

    #[test]
    fn truncate_last_error_respects_char_boundaries() {
        let message = "é".repeat(MAX_LAST_ERROR_LEN);
        let truncated = truncate_last_error(&message);
        assert!(truncated.len() <= MAX_LAST_ERROR_LEN);
        assert!(std::str::from_utf8(truncated.as_bytes()).is_ok());
    }

    #[test]
    fn truncate_last_error_is_noop_under_limit() {
        assert_eq!(truncate_last_error("short"), "short");
    }
}
