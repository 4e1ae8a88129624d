//! Retention Loop.
//!
//! Fires on a configured cron cadence (default daily at 02:00) and deletes
//! terminal rows older than `retention_days` in bounded batches, pausing
//! between batches to throttle DB load. `manual_cleanup` exposes the same
//! mechanics for the admin surface with an explicit day count instead of
//! the loop's configured default.

use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, warn};

use crate::store::EventStore;

pub struct RetentionLoop {
    store: Arc<dyn EventStore>,
    schedule: cron_clock::Schedule,
    retention_days: i64,
    batch_size: i64,
    safety_iteration_cap: u32,
    batch_pause: std::time::Duration,
}

impl RetentionLoop {
    pub fn new(
        store: Arc<dyn EventStore>,
        cron_expr: &str,
        retention_days: i64,
        batch_size: i64,
        safety_iteration_cap: u32,
        batch_pause: std::time::Duration,
    ) -> anyhow::Result<Self> {
        let schedule = cron_clock::Schedule::from_str(cron_expr)
            .map_err(|e| anyhow::anyhow!("invalid cleanup_cron {cron_expr:?}: {e}"))?;
        Ok(Self {
            store,
            schedule,
            retention_days,
            batch_size,
            safety_iteration_cap,
            batch_pause,
        })
    }

    /// Sleep until each upcoming cron fire time and run a cleanup pass.
    /// Never returns; a failed pass is logged and the loop waits for its
    /// next scheduled fire rather than retrying immediately.
    pub async fn run(self: Arc<Self>) {
        loop {
            let Some(next) = self.schedule.upcoming(Utc).next() else {
                error!("retention cron schedule has no upcoming fire time, loop is stuck");
                return;
            };
            let wait = (next - Utc::now()).to_std().unwrap_or(std::time::Duration::ZERO);
            tokio::time::sleep(wait).await;

            if let Err(e) = self.run_cleanup_pass(self.retention_days).await {
                error!(error = format!("{e:#}"), "retention pass failed");
            }
        }
    }

    /// Delete terminal rows older than `retention_days` in batches of
    /// `batch_size`, stopping when a batch returns fewer rows than
    /// requested or the safety iteration cap is hit. Returns the total
    /// number of rows deleted.
    pub async fn run_cleanup_pass(&self, retention_days: i64) -> anyhow::Result<u64> {
        let cutoff = Utc::now() - chrono::Duration::days(retention_days);
        let mut total = 0u64;

        for iteration in 0..self.safety_iteration_cap {
            let deleted = self.store.delete_terminal_batch(cutoff, self.batch_size).await?;
            total += deleted;
            if deleted < self.batch_size as u64 {
                debug!(total, iteration, "retention pass complete");
                return Ok(total);
            }
            tokio::time::sleep(self.batch_pause).await;
        }

        warn!(
            total,
            cap = self.safety_iteration_cap,
            "retention pass hit the safety iteration cap with more rows possibly remaining"
        );
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{DeliveryType, EventStatus};
    use chrono::Duration as ChronoDuration;
    use orchestrator_testing::{pending_event, InMemoryEventStore};

    fn old_dead_letter(store: &InMemoryEventStore, age_days: i64) -> uuid::Uuid {
        let mut event = pending_event("job", "src", Utc::now(), DeliveryType::Http, "http://x", 3);
        event.status = EventStatus::DeadLetter;
        event.executed_at = Some(Utc::now() - ChronoDuration::days(age_days));
        let id = event.id;
        store.insert_row(event);
        id
    }

    #[tokio::test]
    async fn cleanup_pass_deletes_only_rows_past_the_cutoff() {
        let store = Arc::new(InMemoryEventStore::new());
        let old_id = old_dead_letter(&store, 10);
        let recent_id = old_dead_letter(&store, 1);

        let retention = RetentionLoop::new(
            store.clone(),
            "0 0 2 * * *",
            7,
            10_000,
            1_000,
            std::time::Duration::from_millis(0),
        )
        .unwrap();

        let deleted = retention.run_cleanup_pass(7).await.unwrap();
        assert_eq!(deleted, 1);
        assert!(store.get_by_id(old_id).await.unwrap().is_none());
        assert!(store.get_by_id(recent_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn cleanup_pass_paginates_across_multiple_batches() {
        let store = Arc::new(InMemoryEventStore::new());
        for _ in 0..5 {
            old_dead_letter(&store, 10);
        }

        let retention = RetentionLoop::new(
            store.clone(),
            "0 0 2 * * *",
            7,
            2,
            1_000,
            std::time::Duration::from_millis(0),
        )
        .unwrap();

        let deleted = retention.run_cleanup_pass(7).await.unwrap();
        assert_eq!(deleted, 5);
    }

    #[test]
    fn rejects_a_malformed_cron_expression() {
        let store = Arc::new(InMemoryEventStore::new());
        assert!(RetentionLoop::new(store, "not a cron", 7, 100, 10, std::time::Duration::ZERO).is_err());
    }
}
