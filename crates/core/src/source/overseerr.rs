//! Overseerr API client.
//!
//! Authenticates with the `X-Api-Key` header. Jellyseerr exposes the same API.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::{RequestSource, SourceError};
use crate::config::OverseerrConfig;
use crate::metrics;
use crate::request::{MediaIds, MediaKind, MediaRequest, ObservedRequest};

/// Media status values meaning the media is (partially) available.
const AVAILABLE_STATUSES: [u8; 2] = [4, 5];

#[derive(Debug, Deserialize)]
struct RequestPage {
    #[serde(default)]
    results: Vec<RequestItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RequestItem {
    id: u64,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    media: Option<RequestMedia>,
    #[serde(default)]
    seasons: Vec<RequestSeason>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RequestMedia {
    id: u64,
    media_type: String,
    tmdb_id: Option<u64>,
    #[serde(default)]
    imdb_id: Option<String>,
    #[serde(default)]
    status: Option<u8>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RequestSeason {
    season_number: u32,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExternalIds {
    #[serde(default)]
    imdb_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MovieDetails {
    title: String,
    #[serde(default)]
    release_date: Option<String>,
    #[serde(default)]
    imdb_id: Option<String>,
    #[serde(default)]
    external_ids: ExternalIds,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TvDetails {
    name: String,
    #[serde(default)]
    first_air_date: Option<String>,
    #[serde(default)]
    external_ids: ExternalIds,
    #[serde(default)]
    media_info: Option<TvMediaInfo>,
}

#[derive(Debug, Deserialize)]
struct TvMediaInfo {
    #[serde(default)]
    seasons: Vec<TvSeasonStatus>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TvSeasonStatus {
    season_number: u32,
    status: u8,
}

/// Year from a "YYYY-MM-DD" date.
fn year_of(date: Option<&str>) -> Option<i32> {
    date.and_then(|d| d.get(..4)).and_then(|y| y.parse().ok())
}

fn is_available(status: Option<u8>) -> bool {
    status.is_some_and(|s| AVAILABLE_STATUSES.contains(&s))
}

/// Requested seasons minus those the source already reports available.
fn pending_seasons(requested: &[RequestSeason], details: &TvDetails) -> Vec<u32> {
    let available: Vec<u32> = details
        .media_info
        .as_ref()
        .map(|info| {
            info.seasons
                .iter()
                .filter(|s| is_available(Some(s.status)))
                .map(|s| s.season_number)
                .collect()
        })
        .unwrap_or_default();

    let mut seasons: Vec<u32> = requested
        .iter()
        .map(|s| s.season_number)
        .filter(|n| *n > 0 && !available.contains(n))
        .collect();
    seasons.sort_unstable();
    seasons.dedup();
    seasons
}

/// Overseerr request source.
pub struct OverseerrClient {
    client: Client,
    base_url: String,
    api_key: String,
    take: u32,
}

impl OverseerrClient {
    pub fn new(config: &OverseerrConfig) -> Result<Self, SourceError> {
        if config.url.trim().is_empty() {
            return Err(SourceError::NotConfigured("overseerr.url is empty".into()));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: format!("{}/api/v1", config.url.trim_end_matches('/')),
            api_key: config.api_key.clone(),
            take: config.take,
        })
    }

    async fn check(response: Response) -> Result<Response, SourceError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(SourceError::Api {
            status: status.as_u16(),
            message: body,
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, SourceError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "Overseerr GET");

        let response = self
            .client
            .get(&url)
            .header("X-Api-Key", &self.api_key)
            .send()
            .await?;
        Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| SourceError::Parse(format!("{}: {}", path, e)))
    }

    async fn resolve(&self, item: RequestItem) -> Result<Option<ObservedRequest>, SourceError> {
        let Some(media) = item.media else {
            return Ok(None);
        };
        if is_available(media.status) {
            return Ok(None);
        }
        let Some(tmdb_id) = media.tmdb_id else {
            warn!(request_id = item.id, "Request has no TMDB id, skipping");
            return Ok(None);
        };
        let Some(kind) = MediaKind::parse(&media.media_type) else {
            warn!(request_id = item.id, media_type = %media.media_type, "Unknown media type");
            return Ok(None);
        };

        let observed_at = item.created_at.unwrap_or_else(Utc::now);
        let mut ids = MediaIds {
            tmdb_id: Some(tmdb_id),
            imdb_id: media.imdb_id,
            source_media_id: Some(media.id),
        };

        let observed = match kind {
            MediaKind::Movie => {
                let details: MovieDetails = self.get_json(&format!("/movie/{}", tmdb_id)).await?;
                ids.imdb_id = ids
                    .imdb_id
                    .or(details.imdb_id)
                    .or(details.external_ids.imdb_id);
                ObservedRequest::movie(
                    item.id.to_string(),
                    details.title,
                    year_of(details.release_date.as_deref()),
                )
            }
            MediaKind::Show => {
                let details: TvDetails = self.get_json(&format!("/tv/{}", tmdb_id)).await?;
                let seasons = pending_seasons(&item.seasons, &details);
                if seasons.is_empty() {
                    debug!(request_id = item.id, "All requested seasons available");
                    return Ok(None);
                }
                ids.imdb_id = ids.imdb_id.or(details.external_ids.imdb_id);
                ObservedRequest::show(
                    item.id.to_string(),
                    details.name,
                    year_of(details.first_air_date.as_deref()),
                    seasons,
                )
            }
        };

        Ok(Some(observed.with_ids(ids).observed_at(observed_at)))
    }
}

#[async_trait]
impl RequestSource for OverseerrClient {
    fn name(&self) -> &str {
        "overseerr"
    }

    async fn approved_requests(&self) -> Result<Vec<ObservedRequest>, SourceError> {
        let path = format!("/request?take={}&filter=approved&sort=added", self.take);
        let page: RequestPage = match self.get_json(&path).await {
            Ok(page) => page,
            Err(e) => {
                metrics::SOURCE_REQUESTS
                    .with_label_values(&["list", "error"])
                    .inc();
                return Err(e);
            }
        };
        metrics::SOURCE_REQUESTS
            .with_label_values(&["list", "success"])
            .inc();

        let total = page.results.len();
        let mut requests = Vec::with_capacity(total);
        for item in page.results {
            let request_id = item.id;
            match self.resolve(item).await {
                Ok(Some(observed)) => requests.push(observed),
                Ok(None) => {}
                // One unresolvable request must not hide the others.
                Err(e) => warn!(request_id, error = %e, "Failed to resolve request details"),
            }
        }

        requests.sort_by_key(|r| r.observed_at);
        info!(listed = total, pending = requests.len(), "Fetched approved requests");
        Ok(requests)
    }

    async fn mark_available(&self, request: &MediaRequest) -> Result<(), SourceError> {
        let media_id = request
            .ids
            .source_media_id
            .ok_or_else(|| SourceError::MissingMediaId(request.id.clone()))?;
        let url = format!("{}/media/{}/available", self.base_url, media_id);

        let result = self
            .client
            .post(&url)
            .header("X-Api-Key", &self.api_key)
            .json(&serde_json::json!({ "is4k": false }))
            .send()
            .await;

        let outcome = match result {
            Ok(response) => Self::check(response).await.map(|_| ()),
            Err(e) => Err(SourceError::from(e)),
        };
        let status = if outcome.is_ok() { "success" } else { "error" };
        metrics::SOURCE_REQUESTS
            .with_label_values(&["mark_available", status])
            .inc();

        if outcome.is_ok() {
            info!(request_id = %request.id, media_id, "Marked media available");
        }
        outcome
    }
}
