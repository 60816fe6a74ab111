use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use seerrbridge_core::{
    request::UNIT_STATE_TYPES, MediaKind, MediaRequest, RequestFilter, RequestStoreError,
    SchedulerError,
};

use crate::state::AppState;

/// Maximum allowed limit for list queries
const MAX_LIMIT: i64 = 1000;

/// Default limit for list queries
const DEFAULT_LIMIT: i64 = 100;

#[derive(Debug, Deserialize)]
pub struct ListRequestsParams {
    /// Only requests with at least one unit in this state
    pub state: Option<String>,
    /// "movie" or "show"
    pub kind: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ListRequestsResponse {
    pub requests: Vec<MediaRequest>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Default, Deserialize)]
pub struct ResubmitBody {
    /// Season to reset; all units of the request when absent.
    pub season: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct ResubmitResponse {
    pub request_id: String,
    /// States the resubmitted units left.
    pub previous_states: Vec<String>,
    pub request: Option<MediaRequest>,
}

#[derive(Debug, Serialize)]
pub struct RequestErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<RequestErrorResponse>);

fn error_response(status: StatusCode, error: impl Into<String>) -> ApiError {
    (
        status,
        Json(RequestErrorResponse {
            error: error.into(),
        }),
    )
}

fn store_error_response(e: RequestStoreError) -> ApiError {
    let status = match e {
        RequestStoreError::NotFound(_) => StatusCode::NOT_FOUND,
        RequestStoreError::InvalidState { .. } => StatusCode::CONFLICT,
        RequestStoreError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(status, e.to_string())
}

/// List requests with optional filters
pub async fn list_requests(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListRequestsParams>,
) -> Result<Json<ListRequestsResponse>, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = params.offset.unwrap_or(0).max(0);

    let mut filter = RequestFilter::new().with_limit(limit).with_offset(offset);

    if let Some(ref state_filter) = params.state {
        if !UNIT_STATE_TYPES.contains(&state_filter.as_str()) {
            return Err(error_response(
                StatusCode::BAD_REQUEST,
                format!("Unknown state: {}", state_filter),
            ));
        }
        filter = filter.with_state(state_filter);
    }

    if let Some(ref kind) = params.kind {
        match MediaKind::parse(kind) {
            Some(kind) => filter = filter.with_kind(kind),
            None => {
                return Err(error_response(
                    StatusCode::BAD_REQUEST,
                    format!("Unknown kind: {}", kind),
                ));
            }
        }
    }

    let requests = state
        .request_store()
        .list(&filter)
        .map_err(store_error_response)?;
    let total = state
        .request_store()
        .count(&filter)
        .map_err(store_error_response)?;

    Ok(Json(ListRequestsResponse {
        requests,
        total,
        limit,
        offset,
    }))
}

/// Get a request with all its units
pub async fn get_request(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<MediaRequest>, ApiError> {
    match state.request_store().get(&id) {
        Ok(Some(request)) => Ok(Json(request)),
        Ok(None) => Err(error_response(
            StatusCode::NOT_FOUND,
            format!("Request not found: {}", id),
        )),
        Err(e) => Err(store_error_response(e)),
    }
}

/// Reset a request (or one season of it) to pending and trigger a cycle
pub async fn resubmit_request(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Option<Json<ResubmitBody>>,
) -> Result<(StatusCode, Json<ResubmitResponse>), ApiError> {
    let season = body.and_then(|Json(b)| b.season);

    let transitions = match state.scheduler().resubmit(&id, season).await {
        Ok(transitions) => transitions,
        Err(SchedulerError::Store(e)) => return Err(store_error_response(e)),
        Err(e) => {
            return Err(error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                e.to_string(),
            ))
        }
    };

    let request = state
        .request_store()
        .get(&id)
        .map_err(store_error_response)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(ResubmitResponse {
            request_id: id,
            previous_states: transitions
                .iter()
                .map(|t| t.from.state_type().to_string())
                .collect(),
            request,
        }),
    ))
}
