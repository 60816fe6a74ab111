use axum::{extract::State, http::StatusCode, Json};
use std::sync::Arc;
use tracing::info;

use seerrbridge_core::{TriggerAck, TriggerSource};

use crate::state::AppState;

/// Ask the scheduler for a cycle. Returns 503 when the scheduler is stopped.
pub async fn trigger_cycle(State(state): State<Arc<AppState>>) -> (StatusCode, Json<TriggerAck>) {
    let ack = state.scheduler().trigger(TriggerSource::Manual);
    info!(accepted = ack.accepted, coalesced = ack.coalesced, "Manual cycle requested");

    let status = if ack.accepted {
        StatusCode::ACCEPTED
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(ack))
}
