//! Lease Poller.
//!
//! A single periodic loop per process. Each tick claims a batch of due
//! events under a lease and dispatches one concurrent task per event; the
//! poller itself never waits for those tasks before its next tick — the
//! claim-and-dispatch step bounds only one batch per tick.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, warn};

use crate::delivery::DeliveryEngine;
use crate::outcome::OutcomeWriter;
use crate::store::EventStore;

pub struct LeasePoller {
    store: Arc<dyn EventStore>,
    delivery: Arc<DeliveryEngine>,
    outcome: Arc<OutcomeWriter>,
    worker_id: String,
    poll_interval: Duration,
    lease_duration: chrono::Duration,
    batch_size: i64,
}

impl LeasePoller {
    pub fn new(
        store: Arc<dyn EventStore>,
        delivery: Arc<DeliveryEngine>,
        outcome: Arc<OutcomeWriter>,
        worker_id: String,
        poll_interval: Duration,
        lease_duration: chrono::Duration,
        batch_size: i64,
    ) -> Self {
        Self {
            store,
            delivery,
            outcome,
            worker_id,
            poll_interval,
            lease_duration,
            batch_size,
        }
    }

    /// Run the poll loop until the process exits. Never returns `Err` —
    /// a transient store failure is logged and the loop simply waits for
    /// the next tick.
    pub async fn run(self: Arc<Self>) {
        loop {
            if let Err(e) = self.tick().await {
                error!(error = format!("{e:#}"), "poller tick failed, will retry next interval");
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Claim due events and dispatch one concurrent delivery task per
    /// event. Returns the number of events actually dispatched for
    /// delivery (excludes any unclaimed back out due to clock drift).
    pub async fn tick(&self) -> anyhow::Result<usize> {
        let now = Utc::now();
        let lease_until = now + self.lease_duration;

        let claimed = self
            .store
            .claim_due(&self.worker_id, now, lease_until, self.batch_size)
            .await?;

        debug!(claimed = claimed.len(), worker_id = %self.worker_id, "poll tick claimed events");

        let mut dispatched = 0;
        for event in claimed {
            if event.scheduled_at > now {
                // Clock drift or a partial-tick edge case: give the row
                // back without counting it as a delivery attempt.
                let store = self.store.clone();
                let worker_id = self.worker_id.clone();
                let id = event.id;
                tokio::spawn(async move {
                    if let Err(e) = store.reschedule_unclaim(id, &worker_id).await {
                        warn!(event_id = %id, error = format!("{e:#}"), "failed to unclaim not-yet-due event");
                    }
                });
                continue;
            }

            dispatched += 1;
            let delivery = self.delivery.clone();
            let outcome = self.outcome.clone();
            let worker_id = self.worker_id.clone();
            tokio::spawn(async move {
                let result = delivery.deliver(&event).await;
                if let Err(e) = outcome
                    .apply(event.id, &worker_id, event.retry_count, event.max_retries, result)
                    .await
                {
                    error!(event_id = %event.id, error = format!("{e:#}"), "failed to write delivery outcome");
                }
            });
        }

        Ok(dispatched)
    }
}
