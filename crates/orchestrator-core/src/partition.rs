//! Partition Maintainer.
//!
//! Pre-creates the day-range partitions the Event Store will need for the
//! current and next year, as a periodic job rather than DB-side procedural
//! triggers. Idempotent: `ensure_partitions` is a no-op for ranges that
//! already exist.

use std::sync::Arc;

use chrono::{Datelike, Utc};
use tracing::{debug, error};

use crate::event::Event;
use crate::store::EventStore;

/// Partitions cover ten consecutive day-keys each; pre-create enough of
/// them to span a year plus a buffer into the next.
const DAYS_PER_PARTITION: i32 = 10;
const HORIZON_DAYS: i32 = 370;

pub struct PartitionMaintainer {
    store: Arc<dyn EventStore>,
    interval: std::time::Duration,
}

impl PartitionMaintainer {
    pub fn new(store: Arc<dyn EventStore>, interval: std::time::Duration) -> Self {
        Self { store, interval }
    }

    /// Run until the process exits, re-checking the partition horizon once
    /// per `interval` (daily in production).
    pub async fn run(self: Arc<Self>) {
        loop {
            if let Err(e) = self.tick().await {
                error!(error = format!("{e:#}"), "partition maintenance tick failed");
            }
            tokio::time::sleep(self.interval).await;
        }
    }

    pub async fn tick(&self) -> anyhow::Result<()> {
        let keys = upcoming_partition_keys(Utc::now());
        debug!(count = keys.len(), "ensuring partition horizon");
        self.store.ensure_partitions(&keys).await
    }
}

/// The distinct ten-day-range partition keys needed to cover
/// `[now, now + HORIZON_DAYS)`, expressed as the `partition_key` of the
/// first day in each range (the value `Event::partition_key_for` assigns a
/// row falling in that range).
fn upcoming_partition_keys(now: chrono::DateTime<Utc>) -> Vec<i32> {
    let mut keys = Vec::new();
    let mut day = 0;
    while day < HORIZON_DAYS {
        let at = now + chrono::Duration::days(day as i64);
        let key = Event::partition_key_for(at);
        let range_start = (key / DAYS_PER_PARTITION) * DAYS_PER_PARTITION;
        if keys.last() != Some(&range_start) {
            keys.push(range_start);
        }
        day += DAYS_PER_PARTITION;
    }
    keys
}
