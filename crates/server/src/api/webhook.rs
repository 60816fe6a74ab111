//! Inbound request-source notifications.
//!
//! The payload only tells us that something changed; the cycle it triggers
//! re-reads the approved requests from the source.

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

use seerrbridge_core::{TriggerAck, TriggerSource};

use crate::state::AppState;

const TEST_NOTIFICATION: &str = "TEST_NOTIFICATION";

/// Overseerr webhook body. Only the fields used for logging are typed.
#[derive(Debug, Deserialize)]
pub struct WebhookPayload {
    pub notification_type: String,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub media: Option<WebhookMedia>,
    #[serde(default)]
    pub request: Option<WebhookRequest>,
    #[serde(default)]
    pub extra: Vec<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookMedia {
    #[serde(default, alias = "media_type")]
    pub media_type: Option<String>,
    #[serde(default)]
    pub tmdb_id: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookRequest {
    #[serde(default)]
    pub request_id: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub notification_type: String,
    pub triggered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger: Option<TriggerAck>,
}

pub async fn receive_webhook(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<WebhookPayload>,
) -> (StatusCode, Json<WebhookResponse>) {
    if payload.notification_type == TEST_NOTIFICATION {
        info!("Received test notification");
        return (
            StatusCode::OK,
            Json(WebhookResponse {
                notification_type: payload.notification_type,
                triggered: false,
                trigger: None,
            }),
        );
    }

    let media_type = payload.media.as_ref().and_then(|m| m.media_type.as_deref());
    let request_id = payload
        .request
        .as_ref()
        .and_then(|r| r.request_id.as_ref())
        .map(|id| id.to_string());
    info!(
        notification_type = %payload.notification_type,
        subject = payload.subject.as_deref().unwrap_or(""),
        media_type = media_type.unwrap_or(""),
        request_id = request_id.as_deref().unwrap_or(""),
        "Webhook received"
    );
    debug!(
        extra = payload.extra.len(),
        tmdb_id = ?payload.media.as_ref().and_then(|m| m.tmdb_id.as_ref()),
        "Webhook details"
    );

    let ack = state.scheduler().trigger(TriggerSource::Webhook);
    (
        StatusCode::ACCEPTED,
        Json(WebhookResponse {
            notification_type: payload.notification_type,
            triggered: ack.accepted,
            trigger: Some(ack),
        }),
    )
}
