//! # orchestrator-core
//!
//! Domain model, store abstraction, and lifecycle loops for a scheduled
//! event orchestrator: clients submit jobs with a future execution time, a
//! delivery channel (HTTP webhook or message-broker topic), and an opaque
//! payload; the orchestrator guarantees each job is delivered at-or-after
//! its scheduled time, exactly once per successful completion, with
//! bounded retries before being parked in a dead-letter state.
//!
//! ## Pipeline
//!
//! ```text
//! submit ──► Ingestion Buffer ──► Persister (via Deduplicator) ──► Event Store
//!                                                                       │
//!                    ┌──────────────────────────────────────────────────┘
//!                    ▼
//!             Lease Poller ──► Delivery Engine ──► Outcome Writer ──► Event Store
//!
//! (independent loops, running alongside the Poller:)
//! Recovery Loop ──► Event Store     Retention Loop ──► Event Store
//! Partition Maintainer ──► Event Store
//! ```
//!
//! Every component above the buffer is transport-agnostic: this crate
//! defines [`EventStore`] and [`IngestionBuffer`] as seams, and depends on
//! no concrete backend. `orchestrator-store-postgres` and
//! `orchestrator-broker-kafka` provide the real implementations;
//! `orchestrator-testing` provides in-memory ones for tests elsewhere in
//! the workspace.
//!
//! ## Key invariants
//!
//! 1. `status = PROCESSING ⇔ locked_by ≠ null ∧ lock_expires_at ≠ null`.
//! 2. Terminal statuses always carry a non-null `executed_at` and a null lease.
//! 3. `retry_count ≤ max_retries + 1`.
//! 4. `partition_key` is fixed at insert time and never recomputed.
//! 5. `(external_job_id, source, scheduled_at)` is unique — the dedup key.

pub mod admin;
pub mod config;
pub mod dedup;
pub mod delivery;
pub mod error;
pub mod event;
pub mod ingestion;
pub mod outcome;
pub mod partition;
pub mod poller;
pub mod recovery;
pub mod retention;
pub mod store;
pub mod worker_id;

pub use admin::AdminService;
pub use config::OrchestratorConfig;
pub use dedup::{Deduplicator, DEFAULT_LRU_CAPACITY};
pub use delivery::{BrokerProducer, DeliveryEngine, DeliveryResult, RETRIABLE_HTTP_STATUSES};
pub use error::{BatchOutcome, Categorizable, InsertOutcome, OrchestratorError, SafeErrorCategory};
pub use event::{
    truncate_last_error, DedupKey, DeliveryType, Event, EventStatus, NewEvent, MAX_DESTINATION_LEN,
    MAX_EXTERNAL_JOB_ID_LEN, MAX_LAST_ERROR_LEN, MAX_RETRIES_CEILING, MAX_SOURCE_LEN,
};
pub use ingestion::{ConsumedMessage, IngestionBuffer, Persister};
pub use outcome::OutcomeWriter;
pub use partition::PartitionMaintainer;
pub use poller::LeasePoller;
pub use recovery::RecoveryLoop;
pub use retention::RetentionLoop;
pub use store::{CancelOutcome, EventStore, StatusCounts};
pub use worker_id::generate_worker_id;

pub use async_trait::async_trait;
