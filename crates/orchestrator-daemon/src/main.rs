//! Process entry point: wires the Postgres-backed Event Store, the
//! Kafka-backed Ingestion Buffer, every background loop, and the REST
//! facade together, then runs until a shutdown signal arrives.
//!
//! Exit codes: `0` on a clean shutdown, non-zero if startup fails (config
//! missing, store unreachable).

mod config;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use orchestrator_broker_kafka::{KafkaBrokerProducer, KafkaIngestionBuffer, KafkaSettings};
use orchestrator_core::{
    generate_worker_id, AdminService, DeliveryEngine, Deduplicator, LeasePoller, OutcomeWriter,
    PartitionMaintainer, Persister, RecoveryLoop, RetentionLoop,
};
use orchestrator_store_postgres::PgEventStore;
use sqlx::postgres::PgPoolOptions;

use crate::config::DaemonConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(err) = run().await {
        tracing::error!(error = format!("{err:#}"), "orchestrator-daemon exited with an error");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();

    let config = DaemonConfig::load().context("failed to load configuration")?;
    let orch_config = Arc::new(config.orchestrator.clone());
    let worker_id = generate_worker_id();
    tracing::info!(worker_id = %worker_id, "starting orchestrator-daemon");

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .connect(&config.database_url)
        .await
        .context("failed to connect to the event store")?;
    let store: Arc<dyn orchestrator_core::EventStore> = Arc::new(PgEventStore::new(pool));

    let kafka_settings = KafkaSettings {
        brokers: config.kafka_brokers.clone(),
        topic: config.kafka_topic.clone(),
        group_id: config.kafka_group_id.clone(),
        partitions: orch_config.ingestion_partitions,
    };
    let broker_producer = Arc::new(
        KafkaBrokerProducer::new(&config.kafka_brokers).context("failed to construct the broker producer")?,
    );
    let ingestion_buffer: Arc<dyn orchestrator_core::IngestionBuffer> = Arc::new(
        KafkaIngestionBuffer::new(&kafka_settings, broker_producer.clone())
            .context("failed to construct the ingestion buffer")?,
    );

    let dedup = Arc::new(Deduplicator::new(store.clone(), orch_config.dedup_lru_size));
    let persister = Arc::new(Persister::new(
        ingestion_buffer.clone(),
        dedup,
        store.clone(),
        orch_config.batch_size as usize,
        orch_config.consumer_concurrency,
    ));

    let delivery = Arc::new(
        DeliveryEngine::new(
            broker_producer.clone(),
            orch_config.http_connect_timeout(),
            orch_config.http_read_timeout(),
        )
        .context("failed to construct the delivery engine")?,
    );
    let outcome = Arc::new(OutcomeWriter::new(store.clone()));
    let poller = Arc::new(LeasePoller::new(
        store.clone(),
        delivery,
        outcome,
        worker_id.clone(),
        orch_config.poll_interval(),
        orch_config.lease_duration(),
        orch_config.batch_size,
    ));

    let recovery = Arc::new(RecoveryLoop::new(store.clone(), orch_config.recovery_interval()));
    let retention = Arc::new(
        RetentionLoop::new(
            store.clone(),
            &orch_config.cleanup_cron,
            orch_config.retention_days,
            orch_config.cleanup_batch_size,
            orch_config.retention_safety_iteration_cap,
            orch_config.retention_batch_pause(),
        )
        .context("failed to parse cleanup_cron")?,
    );
    let partitions = Arc::new(PartitionMaintainer::new(store.clone(), Duration::from_secs(86_400)));
    let admin = Arc::new(AdminService::new(store.clone()));

    let persister_handle = tokio::spawn(persister.run());
    let poller_handle = tokio::spawn(poller.run());
    let recovery_handle = tokio::spawn(recovery.run());
    let retention_handle = tokio::spawn(retention.run());
    let partition_handle = tokio::spawn(partitions.run());

    let api_state = orchestrator_api::ApiState::new(
        ingestion_buffer,
        admin,
        orch_config,
        config.admin_token.clone(),
    );
    let router = orchestrator_api::build_router(api_state);
    let listener = tokio::net::TcpListener::bind(&config.bind_address)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_address))?;
    tracing::info!(address = %config.bind_address, "REST facade listening");

    let server = axum::serve(listener, router.into_make_service());
    tokio::select! {
        result = server => {
            if let Err(e) = result {
                tracing::error!(error = %e, "REST facade server error");
            }
        }
        _ = build_shutdown_signal() => {
            tracing::info!("shutdown signal received, stopping");
        }
    }

    persister_handle.abort();
    poller_handle.abort();
    recovery_handle.abort();
    retention_handle.abort();
    partition_handle.abort();

    Ok(())
}

#[cfg(unix)]
async fn build_shutdown_signal() -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    let mut interrupt = signal(SignalKind::interrupt()).context("failed to install SIGINT handler")?;

    futures::future::select(Box::pin(terminate.recv()), Box::pin(interrupt.recv())).await;
    Ok(())
}

#[cfg(not(unix))]
async fn build_shutdown_signal() -> anyhow::Result<()> {
    tokio::signal::ctrl_c().await.context("ctrl_c signal failed")
}
