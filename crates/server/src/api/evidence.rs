use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use seerrbridge_core::EvidenceEntry;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct EvidenceQueryParams {
    pub request_id: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct EvidenceResponse {
    pub dir: String,
    /// Newest first.
    pub entries: Vec<EvidenceEntry>,
}

/// List stored failure snapshots
pub async fn list_evidence(
    State(state): State<Arc<AppState>>,
    Query(params): Query<EvidenceQueryParams>,
) -> Json<EvidenceResponse> {
    let evidence = state.evidence();
    let entries = evidence
        .recent()
        .await
        .into_iter()
        .filter(|e| {
            params
                .request_id
                .as_ref()
                .is_none_or(|id| &e.request_id == id)
        })
        .take(params.limit.unwrap_or(usize::MAX))
        .collect();

    Json(EvidenceResponse {
        dir: evidence.dir().display().to_string(),
        entries,
    })
}
