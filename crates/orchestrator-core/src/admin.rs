//! Admin/Query Surface.
//!
//! Thin orchestration over `EventStore` read/cancel methods plus an
//! explicit-parameter entry point into the retention mechanics — exposed
//! both as this library API and, unmodified, as `orchestrator-api`'s HTTP
//! routes.

use std::sync::Arc;

use uuid::Uuid;

use crate::event::Event;
use crate::retention::RetentionLoop;
use crate::store::{CancelOutcome, EventStore, StatusCounts};

pub struct AdminService {
    store: Arc<dyn EventStore>,
}

impl AdminService {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self { store }
    }

    pub async fn get_by_id(&self, id: Uuid) -> anyhow::Result<Option<Event>> {
        self.store.get_by_id(id).await
    }

    /// Most recent match.
    pub async fn get_by_external_job_id(&self, external_job_id: &str) -> anyhow::Result<Option<Event>> {
        self.store.get_by_external_job_id(external_job_id).await
    }

    pub async fn list_by_external_job_id(&self, external_job_id: &str) -> anyhow::Result<Vec<Event>> {
        self.store.list_by_external_job_id(external_job_id).await
    }

    pub async fn cancel_by_id(&self, id: Uuid) -> anyhow::Result<CancelOutcome> {
        self.store.cancel_by_id(id).await
    }

    /// Bulk transition of every matching `Pending` row to `Cancelled`.
    /// Returns the number of rows affected.
    pub async fn cancel_by_external_job_id(&self, external_job_id: &str) -> anyhow::Result<u64> {
        self.store.cancel_by_external_job_id(external_job_id).await
    }

    pub async fn statistics(&self) -> anyhow::Result<StatusCounts> {
        self.store.statistics().await
    }

    /// Same mechanics as the Retention Loop (C9) but with an explicit day
    /// count, invoked on demand rather than on the configured cron cadence.
    pub async fn manual_cleanup(&self, days: i64, batch_size: i64, safety_iteration_cap: u32) -> anyhow::Result<u64> {
        let retention = RetentionLoop::new(
            self.store.clone(),
            "0 0 2 * * *",
            days,
            batch_size,
            safety_iteration_cap,
            std::time::Duration::from_millis(100),
        )?;
        retention.run_cleanup_pass(days).await
    }
}
