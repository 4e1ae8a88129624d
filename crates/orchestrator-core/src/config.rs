//! Domain-level configuration: the recognized tuning options and their
//! defaults.
//!
//! Loading this from a file + environment overlay is the daemon's concern
//! (`orchestrator-daemon::config`); this module only defines the shape and
//! the defaults every field falls back to.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Knobs consumed by the Poller, Delivery Engine, Recovery/Retention loops,
/// and Deduplicator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub poll_interval_ms: u64,
    pub batch_size: i64,
    pub lease_duration_min: i64,
    pub max_retries_default: i32,
    pub retention_days: i64,
    pub cleanup_batch_size: i64,
    pub cleanup_cron: String,
    pub ingestion_partitions: i32,
    pub consumer_concurrency: usize,
    pub http_connect_timeout_ms: u64,
    pub http_read_timeout_ms: u64,
    pub dedup_lru_size: usize,
    pub recovery_interval_secs: u64,
    pub retention_safety_iteration_cap: u32,
    pub retention_batch_pause_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            batch_size: 100,
            lease_duration_min: 5,
            max_retries_default: 3,
            retention_days: 7,
            cleanup_batch_size: 10_000,
            cleanup_cron: "0 0 2 * * *".to_owned(),
            ingestion_partitions: 24,
            consumer_concurrency: 10,
            http_connect_timeout_ms: 5_000,
            http_read_timeout_ms: 30_000,
            dedup_lru_size: 100_000,
            recovery_interval_secs: 60,
            retention_safety_iteration_cap: 1_000,
            retention_batch_pause_ms: 100,
        }
    }
}

impl OrchestratorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn lease_duration(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.lease_duration_min)
    }

    pub fn http_connect_timeout(&self) -> Duration {
        Duration::from_millis(self.http_connect_timeout_ms)
    }

    pub fn http_read_timeout(&self) -> Duration {
        Duration::from_millis(self.http_read_timeout_ms)
    }

    pub fn recovery_interval(&self) -> Duration {
        Duration::from_secs(self.recovery_interval_secs)
    }

    pub fn retention_batch_pause(&self) -> Duration {
        Duration::from_millis(self.retention_batch_pause_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_table() {
        let cfg = OrchestratorConfig::default();
        assert_eq!(cfg.poll_interval_ms, 1000);
        assert_eq!(cfg.batch_size, 100);
        assert_eq!(cfg.lease_duration_min, 5);
        assert_eq!(cfg.max_retries_default, 3);
        assert_eq!(cfg.retention_days, 7);
        assert_eq!(cfg.cleanup_batch_size, 10_000);
        assert_eq!(cfg.cleanup_cron, "0 0 2 * * *");
        assert_eq!(cfg.dedup_lru_size, 100_000);
    }
}
