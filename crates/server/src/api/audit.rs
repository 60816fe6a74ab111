use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use seerrbridge_core::{AuditQuery, AuditRecord, Page};

use crate::state::AppState;

const MAX_LIMIT: i64 = 1000;

/// Query parameters for `GET /audit`.
#[derive(Debug, Deserialize)]
pub struct AuditParams {
    pub request_id: Option<String>,
    /// Season of a show request; needs `request_id`.
    pub season: Option<u32>,
    /// State a unit landed in, e.g. `failed`.
    pub outcome: Option<String>,
    pub event_type: Option<String>,
    #[serde(alias = "from")]
    pub since: Option<DateTime<Utc>>,
    #[serde(alias = "to")]
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl AuditParams {
    fn query(&self) -> AuditQuery {
        AuditQuery {
            request_id: self.request_id.clone(),
            season: self.season,
            outcome: self.outcome.clone(),
            event_type: self.event_type.clone(),
            since: self.since,
            until: self.until,
        }
    }

    fn page(&self) -> Page {
        Page::new(
            self.limit.unwrap_or(Page::DEFAULT_LIMIT).clamp(1, MAX_LIMIT),
            self.offset.unwrap_or(0).max(0),
        )
    }
}

#[derive(Debug, Serialize)]
pub struct AuditResponse {
    pub events: Vec<AuditRecord>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Serialize)]
pub struct AuditErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<AuditErrorResponse>);

fn bad_request(error: impl Into<String>) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(AuditErrorResponse {
            error: error.into(),
        }),
    )
}

fn internal(e: seerrbridge_core::AuditError) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(AuditErrorResponse {
            error: e.to_string(),
        }),
    )
}

/// Audit trail, newest first.
pub async fn query_audit(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AuditParams>,
) -> Result<Json<AuditResponse>, ApiError> {
    if params.season.is_some() && params.request_id.is_none() {
        return Err(bad_request("season filter requires request_id"));
    }

    let query = params.query();
    let page = params.page();
    let events = state.audit_store().history(&query, page).map_err(internal)?;
    let total = state.audit_store().count(&query).map_err(internal)?;

    Ok(Json(AuditResponse {
        events,
        total,
        limit: page.limit,
        offset: page.offset,
    }))
}
