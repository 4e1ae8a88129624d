//! REST facade for the scheduled event orchestrator: thin request
//! validation over `orchestrator-core`'s ingestion and admin/query seams,
//! no domain logic of its own.
//!
//! A `Clone`-able state struct threaded through `State<ApiState>`, a
//! uniform `ApiError` mapped to JSON error bodies, handlers that do
//! nothing but validate, delegate, and translate.

mod dto;
mod error;
mod routes;
mod state;
mod validation;

pub use dto::{
    BatchItemResult, CancelBulkResponse, CancelResponse, CleanupQuery, CleanupResponse,
    StatisticsResponse, SubmitAcceptedResponse, SubmitBatchRequest, SubmitBatchResponse,
    SubmitEventRequest, WireDeliveryType, MAX_BATCH_SIZE,
};
pub use error::{ApiError, ApiResult};
pub use routes::build_router;
pub use state::ApiState;
pub use validation::validate_submit;
