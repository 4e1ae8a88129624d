//! Error taxonomy for the orchestrator.
//!
//! Exceptions-for-control-flow style signaling (duplicate-key detection,
//! HTTP/transport error classification) is re-expressed here as
//! discriminated results: [`InsertOutcome`] and [`DeliveryResult`] (the
//! latter lives in [`crate::delivery`]) instead of thrown exceptions.

use thiserror::Error;

/// Top-level error type for store and delivery-path failures.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("transient store failure: {0}")]
    TransientStore(#[source] anyhow::Error),

    #[error("fatal startup failure: {0}")]
    FatalStartup(#[source] anyhow::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// A coarse, safe-to-log classification of an error, independent of the
/// underlying cause — used for metrics/log dimensions without leaking
/// error internals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SafeErrorCategory {
    Validation,
    Duplicate,
    TransientStore,
    DeliveryRetriable,
    DeliveryTerminal,
    LeaseLost,
    FatalStartup,
}

/// Anything that can be reduced to a [`SafeErrorCategory`] for logging and
/// dispatch decisions.
pub trait Categorizable {
    fn category(&self) -> SafeErrorCategory;
}

impl Categorizable for OrchestratorError {
    fn category(&self) -> SafeErrorCategory {
        match self {
            Self::Validation(_) => SafeErrorCategory::Validation,
            Self::TransientStore(_) => SafeErrorCategory::TransientStore,
            Self::FatalStartup(_) => SafeErrorCategory::FatalStartup,
            Self::Other(_) => SafeErrorCategory::TransientStore,
        }
    }
}

/// Outcome of an `EventStore::insert` call. A duplicate-key collision is not
/// an error — it's treated as a successful duplicate submission.
#[derive(Debug)]
pub enum InsertOutcome {
    Inserted,
    Duplicate,
}

/// Outcome of processing one message out of a batch consumed by the
/// Persister. Used to decide whether the buffer offset for that batch may
/// be acknowledged — only once every message reaches a terminal outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    Persisted,
    Suppressed,
    DeadLettered,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_categorizes_as_validation() {
        let err = OrchestratorError::Validation("bad scheduled_at".into());
        assert_eq!(err.category(), SafeErrorCategory::Validation);
    }
}
