//! Route handlers and router assembly for the scheduled event orchestrator's
//! REST facade: one `AppState`-shaped extractor, thin handlers that
//! delegate into the domain layer and translate its outcomes to HTTP
//! status codes.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use orchestrator_core::store::CancelOutcome;
use uuid::Uuid;

use crate::dto::{
    BatchItemResult, CancelBulkResponse, CancelResponse, CleanupQuery, CleanupResponse,
    StatisticsResponse, SubmitAcceptedResponse, SubmitBatchRequest, SubmitBatchResponse,
    SubmitEventRequest, MAX_BATCH_SIZE,
};
use crate::error::{ApiError, ApiResult};
use crate::state::ApiState;
use crate::validation::validate_submit;

pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/v1/events", post(submit_event))
        .route("/api/v1/events/batch", post(submit_batch))
        .route("/api/v1/events/statistics", get(statistics))
        .route("/api/v1/events/admin/cleanup", post(admin_cleanup))
        .route("/api/v1/events/{id}", get(get_by_id).delete(cancel_by_id))
        .route("/api/v1/events/external/{ext}", get(get_by_external_job_id).delete(cancel_by_external_job_id))
        .route("/api/v1/events/external/{ext}/all", get(list_by_external_job_id))
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn submit_event(
    State(state): State<ApiState>,
    Json(req): Json<SubmitEventRequest>,
) -> ApiResult<(StatusCode, Json<SubmitAcceptedResponse>)> {
    let event = validate_submit(req, state.config.max_retries_default).map_err(ApiError::validation)?;
    let message_id = Uuid::new_v4();
    state
        .buffer
        .produce(&event)
        .await
        .map_err(ApiError::internal)?;
    Ok((StatusCode::ACCEPTED, Json(SubmitAcceptedResponse::new(message_id))))
}

async fn submit_batch(
    State(state): State<ApiState>,
    Json(req): Json<SubmitBatchRequest>,
) -> ApiResult<Json<SubmitBatchResponse>> {
    if req.events.len() > MAX_BATCH_SIZE {
        return Err(ApiError::validation(format!(
            "batch exceeds the maximum of {MAX_BATCH_SIZE} events"
        )));
    }

    let mut results = Vec::with_capacity(req.events.len());
    for item in req.events {
        match validate_submit(item, state.config.max_retries_default) {
            Ok(event) => match state.buffer.produce(&event).await {
                Ok(()) => results.push(BatchItemResult::Accepted {
                    message_id: Uuid::new_v4(),
                }),
                Err(err) => results.push(BatchItemResult::Rejected {
                    reason: err.to_string(),
                }),
            },
            Err(reason) => results.push(BatchItemResult::Rejected { reason }),
        }
    }

    Ok(Json(SubmitBatchResponse { results }))
}

async fn get_by_id(State(state): State<ApiState>, Path(id): Path<Uuid>) -> ApiResult<Json<orchestrator_core::event::Event>> {
    let event = state.admin.get_by_id(id).await.map_err(ApiError::internal)?;
    event.map(Json).ok_or_else(|| ApiError::not_found("event not found"))
}

async fn get_by_external_job_id(
    State(state): State<ApiState>,
    Path(ext): Path<String>,
) -> ApiResult<Json<orchestrator_core::event::Event>> {
    let event = state
        .admin
        .get_by_external_job_id(&ext)
        .await
        .map_err(ApiError::internal)?;
    event.map(Json).ok_or_else(|| ApiError::not_found("event not found"))
}

async fn list_by_external_job_id(
    State(state): State<ApiState>,
    Path(ext): Path<String>,
) -> ApiResult<Json<Vec<orchestrator_core::event::Event>>> {
    let events = state
        .admin
        .list_by_external_job_id(&ext)
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(events))
}

async fn cancel_by_id(State(state): State<ApiState>, Path(id): Path<Uuid>) -> ApiResult<Json<CancelResponse>> {
    match state.admin.cancel_by_id(id).await.map_err(ApiError::internal)? {
        CancelOutcome::Cancelled => Ok(Json(CancelResponse { cancelled: true })),
        CancelOutcome::NotFound => Err(ApiError::not_found("event not found")),
        CancelOutcome::InvalidState => Err(ApiError::invalid_state("event is no longer cancellable")),
    }
}

async fn cancel_by_external_job_id(
    State(state): State<ApiState>,
    Path(ext): Path<String>,
) -> ApiResult<Json<CancelBulkResponse>> {
    let cancelled_count = state
        .admin
        .cancel_by_external_job_id(&ext)
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(CancelBulkResponse { cancelled_count }))
}

async fn statistics(State(state): State<ApiState>) -> ApiResult<Json<StatisticsResponse>> {
    let counts = state.admin.statistics().await.map_err(ApiError::internal)?;
    Ok(Json(StatisticsResponse {
        pending: counts.pending,
        processing: counts.processing,
        completed: counts.completed,
        dead_letter: counts.dead_letter,
        cancelled: counts.cancelled,
        total: counts.total(),
    }))
}

/// Bearer-token gated: a single shared secret header check, since there's
/// no broader auth subsystem in scope here.
async fn admin_cleanup(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(query): Query<CleanupQuery>,
) -> ApiResult<Json<CleanupResponse>> {
    require_admin_token(&headers, &state.admin_token)?;

    let days = query.days.unwrap_or(state.config.retention_days);
    let deleted = state
        .admin
        .manual_cleanup(
            days,
            state.config.cleanup_batch_size,
            state.config.retention_safety_iteration_cap,
        )
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(CleanupResponse { deleted }))
}

fn require_admin_token(headers: &HeaderMap, expected: &str) -> ApiResult<()> {
    let provided = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    match provided {
        Some(token) if token == expected => Ok(()),
        _ => Err(ApiError::unauthorized("missing or invalid admin token")),
    }
}
