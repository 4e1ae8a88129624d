//! Outcome Writer.
//!
//! Applies the result of one delivery attempt to the store. Every
//! transition is predicated on the calling worker still holding the lease
//! (`locked_by = worker_id`), closing a lost-update window: a delivery that
//! outlives its lease and only completes after the Recovery Loop
//! re-released the row becomes a silent no-op instead of corrupting a row
//! now owned by another worker.

use std::sync::Arc;

use tracing::warn;
use uuid::Uuid;

use crate::delivery::DeliveryResult;
use crate::store::EventStore;

pub struct OutcomeWriter {
    store: Arc<dyn EventStore>,
}

impl OutcomeWriter {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self { store }
    }

    /// Apply `result` to the event identified by `id`, which the caller
    /// claimed under `worker_id`'s lease with the given `retry_count` and
    /// `max_retries` at claim time.
    pub async fn apply(
        &self,
        id: Uuid,
        worker_id: &str,
        retry_count: i32,
        max_retries: i32,
        result: DeliveryResult,
    ) -> anyhow::Result<()> {
        let applied = match result {
            DeliveryResult::Success => self.store.complete(id, worker_id).await?,
            DeliveryResult::Retriable { error } => {
                if retry_count + 1 <= max_retries {
                    self.store.fail_retriable(id, worker_id, &error).await?
                } else {
                    // Retries exhausted: routed to the same terminal
                    // transition as a non-retriable failure, so a
                    // dead-lettered row doesn't distinguish "gave up" from
                    // "unrecoverable" beyond its last_error text.
                    self.store.fail_terminal(id, worker_id, &error).await?
                }
            }
            DeliveryResult::Terminal { error } => self.store.fail_terminal(id, worker_id, &error).await?,
        };

        if !applied {
            warn!(
                event_id = %id,
                worker_id,
                "outcome write skipped: lease no longer held by this worker"
            );
        }

        Ok(())
    }
}
