//! Process-level configuration: everything `orchestrator_core::OrchestratorConfig`
//! doesn't know about (connection strings, bind address, admin token) plus
//! the domain config itself, loaded from an optional JSON file with an
//! environment-variable overlay — the same two-layer shape the gateway's
//! `ConfHandle` uses (file first, environment wins), reduced to what a
//! single-binary daemon actually needs.

use orchestrator_core::config::OrchestratorConfig;
use serde::Deserialize;

const CONFIG_PATH_VAR: &str = "ORCHESTRATOR_CONFIG_PATH";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub database_url: String,
    pub kafka_brokers: String,
    pub kafka_topic: String,
    pub kafka_group_id: String,
    pub bind_address: String,
    pub admin_token: String,
    #[serde(flatten)]
    pub orchestrator: OrchestratorConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/orchestrator".to_owned(),
            kafka_brokers: "localhost:9092".to_owned(),
            kafka_topic: "orchestrator.events".to_owned(),
            kafka_group_id: "orchestrator-daemon".to_owned(),
            bind_address: "0.0.0.0:8080".to_owned(),
            admin_token: String::new(),
            orchestrator: OrchestratorConfig::default(),
        }
    }
}

impl DaemonConfig {
    /// Load from the file named by `ORCHESTRATOR_CONFIG_PATH` (if set and
    /// present), then apply a small set of environment overrides for the
    /// secrets and endpoints that operators typically inject per
    /// deployment instead of checking into a config file.
    pub fn load() -> anyhow::Result<Self> {
        let mut config = match std::env::var(CONFIG_PATH_VAR) {
            Ok(path) => {
                let contents = std::fs::read_to_string(&path)
                    .map_err(|e| anyhow::anyhow!("failed to read {CONFIG_PATH_VAR} at {path:?}: {e}"))?;
                serde_json::from_str(&contents)
                    .map_err(|e| anyhow::anyhow!("failed to parse config file {path:?}: {e}"))?
            }
            Err(_) => Self::default(),
        };

        if let Ok(value) = std::env::var("DATABASE_URL") {
            config.database_url = value;
        }
        if let Ok(value) = std::env::var("KAFKA_BROKERS") {
            config.kafka_brokers = value;
        }
        if let Ok(value) = std::env::var("BIND_ADDRESS") {
            config.bind_address = value;
        }
        if let Ok(value) = std::env::var("ADMIN_TOKEN") {
            config.admin_token = value;
        }

        if config.admin_token.is_empty() {
            anyhow::bail!("ADMIN_TOKEN must be set (admin endpoints would otherwise accept any bearer token)");
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_domain_config_defaults() {
        let config = DaemonConfig::default();
        assert_eq!(config.orchestrator.poll_interval_ms, 1000);
        assert_eq!(config.orchestrator.batch_size, 100);
    }
}
