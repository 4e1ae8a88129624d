//! Shared application state, handed to every route via `axum::State`
//! (trace-dispatcher's `AppState` pattern).

use std::sync::Arc;

use orchestrator_core::config::OrchestratorConfig;
use orchestrator_core::ingestion::IngestionBuffer;
use orchestrator_core::AdminService;

#[derive(Clone)]
pub struct ApiState {
    pub buffer: Arc<dyn IngestionBuffer>,
    pub admin: Arc<AdminService>,
    pub config: Arc<OrchestratorConfig>,
    pub admin_token: Arc<str>,
}

impl ApiState {
    pub fn new(
        buffer: Arc<dyn IngestionBuffer>,
        admin: Arc<AdminService>,
        config: Arc<OrchestratorConfig>,
        admin_token: impl Into<Arc<str>>,
    ) -> Self {
        Self {
            buffer,
            admin,
            config,
            admin_token: admin_token.into(),
        }
    }
}
