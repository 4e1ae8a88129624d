//! Recovery Loop.
//!
//! Periodic loop, independent of the Lease Poller, that releases rows whose
//! lease has expired without a matching outcome write — the worker that
//! claimed them died, was partitioned, or simply ran past its lease. A
//! released row goes back to `Pending` with its `locked_by`/`lock_expires_at`
//! cleared, picked up by the next poll tick like any other due event.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error};

use crate::store::EventStore;

pub struct RecoveryLoop {
    store: Arc<dyn EventStore>,
    interval: Duration,
}

impl RecoveryLoop {
    pub fn new(store: Arc<dyn EventStore>, interval: Duration) -> Self {
        Self { store, interval }
    }

    /// Run until the process exits. A failed tick is logged and retried at
    /// the next interval, matching the Poller's own tolerance for transient
    /// store errors.
    pub async fn run(self: Arc<Self>) {
        loop {
            if let Err(e) = self.tick().await {
                error!(error = format!("{e:#}"), "recovery tick failed, will retry next interval");
            }
            tokio::time::sleep(self.interval).await;
        }
    }

    /// Release every row whose lease has expired. Returns the number of
    /// rows released.
    pub async fn tick(&self) -> anyhow::Result<u64> {
        let released = self.store.release_expired(Utc::now()).await?;
        if released > 0 {
            debug!(released, "recovery loop released expired leases");
        }
        Ok(released)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::DeliveryType;
    use chrono::Duration as ChronoDuration;
    use orchestrator_testing::{pending_event, InMemoryEventStore};

    #[tokio::test]
    async fn tick_releases_rows_with_an_expired_lease() {
        let store = Arc::new(InMemoryEventStore::new());
        let event = pending_event("job-1", "src", Utc::now() - ChronoDuration::seconds(1), DeliveryType::Http, "http://x", 3);
        store.insert_row(event.clone());
        store
            .claim_due("worker-1", Utc::now(), Utc::now() - ChronoDuration::minutes(1), 10)
            .await
            .unwrap();

        let recovery = RecoveryLoop::new(store.clone(), Duration::from_secs(60));
        let released = recovery.tick().await.unwrap();
        assert_eq!(released, 1);

        let row = store.get_by_id(event.id).await.unwrap().unwrap();
        assert_eq!(row.status, crate::event::EventStatus::Pending);
        assert!(row.locked_by.is_none());
    }

    #[tokio::test]
    async fn tick_leaves_unexpired_leases_alone() {
        let store = Arc::new(InMemoryEventStore::new());
        let event = pending_event("job-1", "src", Utc::now() - ChronoDuration::seconds(1), DeliveryType::Http, "http://x", 3);
        store.insert_row(event.clone());
        store
            .claim_due("worker-1", Utc::now(), Utc::now() + ChronoDuration::minutes(5), 10)
            .await
            .unwrap();

        let recovery = RecoveryLoop::new(store.clone(), Duration::from_secs(60));
        let released = recovery.tick().await.unwrap();
        assert_eq!(released, 0);

        let row = store.get_by_id(event.id).await.unwrap().unwrap();
        assert_eq!(row.status, crate::event::EventStatus::Processing);
    }
}
