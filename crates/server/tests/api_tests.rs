//! API tests against the in-process router with mocked collaborators.

mod common;

use std::time::Duration;

use axum::http::StatusCode;
use serde_json::json;

use seerrbridge_core::testing::SurfaceStep;
use seerrbridge_core::{RequestStore, SurfaceError, TriggerSource};

use common::{fixtures, TestConfig, TestFixture};

const WAIT: Duration = Duration::from_secs(5);

// =============================================================================
// Basic API Tests
// =============================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let fixture = TestFixture::new().await;
    let response = fixture.get("/api/v1/health").await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["status"], "ok");
}

#[tokio::test]
async fn test_config_redacts_api_key() {
    let fixture = TestFixture::new().await;
    let response = fixture.get("/api/v1/config").await;

    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["overseerr"]["url"], "http://overseerr.test");
    assert_eq!(response.body["overseerr"]["api_key_configured"], true);
    assert!(response.body["overseerr"].get("api_key").is_none());
    assert!(!response.body.to_string().contains("test-api-key"));
}

#[tokio::test]
async fn test_status_reports_all_components() {
    let fixture = TestFixture::new().await;
    let response = fixture.get("/api/v1/status").await;

    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["version"], "test");
    assert_eq!(response.body["scheduler"]["running"], true);
    assert_eq!(response.body["session"]["state"], "absent");
    assert_eq!(response.body["credential"]["expired"], false);
    assert!(response.body["uptime_secs"].is_u64());
}

#[tokio::test]
async fn test_status_records_last_run() {
    let fixture = TestFixture::new().await;
    fixture
        .source
        .add_request(fixtures::movie_request("7", "Arrival", 2016))
        .await;
    fixture
        .surface
        .set_results(vec![fixtures::candidate(0, "Arrival.2016.1080p.BluRay.x264", 8.0, true)])
        .await;

    let response = fixture.post_empty("/api/v1/cycle").await;
    assert_status!(response, StatusCode::ACCEPTED);
    assert!(fixture.wait_for_fetches(1, WAIT).await);

    let response = fixture.get("/api/v1/status").await;
    let scheduler = &response.body["scheduler"];
    assert_eq!(scheduler["last_trigger"], "manual");
    assert!(scheduler["last_run_started"].is_string());
    assert!(scheduler["last_run_completed"].is_string());
    assert_eq!(scheduler["last_report"]["completed"], 1);
    assert_eq!(response.body["session"]["state"], "idle");
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let fixture = TestFixture::new().await;
    fixture.get("/api/v1/health").await;

    let (status, body) = fixture.get_text("/metrics").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("seerrbridge_http_requests_total"));
    assert!(body.contains("seerrbridge_units_by_state"));
    assert!(body.contains("seerrbridge_scheduler_running"));
}

// =============================================================================
// Cycle Trigger Tests
// =============================================================================

#[tokio::test]
async fn test_manual_cycle_completes_movie() {
    let fixture = TestFixture::new().await;
    fixture
        .source
        .add_request(fixtures::movie_request("7", "Arrival", 2016))
        .await;
    fixture
        .surface
        .set_results(vec![fixtures::candidate(0, "Arrival.2016.1080p.BluRay.x264", 8.0, true)])
        .await;

    let response = fixture.post_empty("/api/v1/cycle").await;
    assert_status!(response, StatusCode::ACCEPTED);
    assert_eq!(response.body["source"], "manual");
    assert_eq!(response.body["accepted"], true);

    assert!(fixture.wait_for_unit_state("7", None, "completed", WAIT).await);
    assert_eq!(fixture.surface.fetch_count().await, 1);
    assert!(fixture.wait_for_fetches(1, WAIT).await);
    assert_eq!(fixture.source.marked_available().await, vec!["7".to_string()]);
}

#[tokio::test]
async fn test_manual_cycle_rejected_when_scheduler_stopped() {
    let fixture = TestFixture::with_config(TestConfig::stopped()).await;

    let response = fixture.post_empty("/api/v1/cycle").await;
    assert_status!(response, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.body["accepted"], false);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(fixture.source.fetch_count().await, 0);
}

// =============================================================================
// Library Stats Tests
// =============================================================================

#[tokio::test]
async fn test_library_refresh_updates_status() {
    let fixture = TestFixture::with_config(TestConfig::stopped()).await;
    let response = fixture.get("/api/v1/status").await;
    assert!(response.body["library_stats"].is_null());

    fixture.surface.set_library_stats(1204, 38.7).await;
    let response = fixture.post_empty("/api/v1/library/refresh").await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["refreshed"], true);
    assert_eq!(response.body["library_stats"]["torrents"], 1204);

    let response = fixture.get("/api/v1/status").await;
    assert_eq!(response.body["library_stats"]["torrents"], 1204);
    assert_eq!(response.body["library_stats"]["total_size_tb"], 38.7);
    assert!(response.body["library_stats"]["refreshed_at"].is_string());

    tokio::time::sleep(Duration::from_millis(200)).await;
    let response = fixture
        .get("/api/v1/audit?event_type=library_stats_refreshed")
        .await;
    assert_eq!(response.body["total"], 1);
}

#[tokio::test]
async fn test_library_refresh_failure_keeps_last_stats() {
    let fixture = TestFixture::with_config(TestConfig::stopped()).await;
    fixture.surface.set_library_stats(10, 1.5).await;
    fixture.post_empty("/api/v1/library/refresh").await;

    fixture
        .surface
        .fail_next(
            SurfaceStep::LibraryStats,
            SurfaceError::ElementMissing("library heading".into()),
        )
        .await;
    let response = fixture.post_empty("/api/v1/library/refresh").await;
    assert_status!(response, StatusCode::BAD_GATEWAY);
    assert_eq!(response.body["refreshed"], false);
    assert_eq!(response.body["library_stats"]["torrents"], 10);
    assert!(response.body["error"]
        .as_str()
        .unwrap()
        .contains("library heading"));
}

#[tokio::test]
async fn test_library_refresh_without_browser_is_unavailable() {
    let fixture = TestFixture::with_config(TestConfig::stopped()).await;
    fixture.factory.set_fail_launches(true);

    let response = fixture.post_empty("/api/v1/library/refresh").await;
    assert_status!(response, StatusCode::SERVICE_UNAVAILABLE);
    assert!(response.body["library_stats"].is_null());
}

// =============================================================================
// Request Tests
// =============================================================================

#[tokio::test]
async fn test_list_requests_empty() {
    let fixture = TestFixture::new().await;
    let response = fixture.get("/api/v1/requests").await;

    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["requests"].as_array().unwrap().len(), 0);
    assert_eq!(response.body["total"], 0);
    assert_eq!(response.body["limit"], 100);
    assert_eq!(response.body["offset"], 0);
}

#[tokio::test]
async fn test_list_requests_filters_and_paginates() {
    let fixture = TestFixture::with_config(TestConfig::stopped()).await;
    let base = chrono::Utc::now() - chrono::Duration::minutes(10);
    fixture
        .store
        .upsert_observed(&fixtures::movie_request("1", "Arrival", 2016).observed_at(base))
        .unwrap();
    fixture
        .store
        .upsert_observed(
            &fixtures::show_request("2", "Severance", 2022, vec![1, 2])
                .observed_at(base + chrono::Duration::minutes(1)),
        )
        .unwrap();
    fixture
        .store
        .upsert_observed(
            &fixtures::movie_request("3", "Dune", 2021)
                .observed_at(base + chrono::Duration::minutes(2)),
        )
        .unwrap();

    let response = fixture.get("/api/v1/requests?kind=movie").await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["total"], 2);
    let ids: Vec<&str> = response.body["requests"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["1", "3"]);

    let response = fixture.get("/api/v1/requests?limit=1&offset=1").await;
    assert_eq!(response.body["total"], 3);
    assert_eq!(response.body["requests"][0]["id"], "2");
    assert_eq!(response.body["requests"][0]["units"].as_array().unwrap().len(), 2);

    let response = fixture.get("/api/v1/requests?state=pending").await;
    assert_eq!(response.body["total"], 3);
    let response = fixture.get("/api/v1/requests?state=completed").await;
    assert_eq!(response.body["total"], 0);
}

#[tokio::test]
async fn test_list_requests_rejects_unknown_filters() {
    let fixture = TestFixture::new().await;

    let response = fixture.get("/api/v1/requests?state=bogus").await;
    assert_status!(response, StatusCode::BAD_REQUEST);
    assert!(response.body["error"].as_str().unwrap().contains("bogus"));

    let response = fixture.get("/api/v1/requests?kind=album").await;
    assert_status!(response, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_get_request_not_found() {
    let fixture = TestFixture::new().await;
    let response = fixture.get("/api/v1/requests/404").await;
    assert_status!(response, StatusCode::NOT_FOUND);
    assert!(response.body["error"].as_str().unwrap().contains("404"));
}

#[tokio::test]
async fn test_get_request_shows_units() {
    let fixture = TestFixture::with_config(TestConfig::stopped()).await;
    fixture
        .store
        .upsert_observed(&fixtures::show_request("12", "Severance", 2022, vec![2, 1]))
        .unwrap();

    let response = fixture.get("/api/v1/requests/12").await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["kind"], "show");
    assert_eq!(response.body["units"][0]["season"], 1);
    assert_eq!(response.body["units"][1]["season"], 2);
    assert_eq!(response.body["units"][0]["state"]["type"], "pending");
}

#[tokio::test]
async fn test_no_match_fails_until_resubmitted() {
    let fixture = TestFixture::new().await;
    fixture
        .source
        .add_request(fixtures::movie_request("7", "Arrival", 2016))
        .await;

    // Nothing found: permanent failure, with a snapshot kept.
    fixture.scheduler.trigger(TriggerSource::Manual);
    assert!(fixture.wait_for_unit_state("7", None, "failed", WAIT).await);
    assert!(fixture.wait_for_fetches(1, WAIT).await);

    let response = fixture.get("/api/v1/requests/7").await;
    assert!(response.body["units"][0]["state"]["reason"]
        .as_str()
        .unwrap()
        .contains("no-match"));

    let response = fixture.get("/api/v1/evidence").await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["entries"].as_array().unwrap().len(), 1);
    assert_eq!(response.body["entries"][0]["request_id"], "7");

    // Another cycle leaves it alone.
    fixture.scheduler.trigger(TriggerSource::Manual);
    assert!(fixture.wait_for_fetches(2, WAIT).await);
    assert_eq!(fixture.surface.fetch_count().await, 0);
    assert!(fixture.wait_for_unit_state("7", None, "failed", WAIT).await);

    // A resubmit puts it back in the queue.
    fixture
        .surface
        .set_results(vec![fixtures::candidate(0, "Arrival.2016.1080p.WEB-DL", 6.0, true)])
        .await;
    let response = fixture.post("/api/v1/requests/7/resubmit", json!({})).await;
    assert_status!(response, StatusCode::ACCEPTED);
    assert_eq!(response.body["previous_states"], json!(["failed"]));

    assert!(fixture.wait_for_unit_state("7", None, "completed", WAIT).await);
    assert_eq!(fixture.surface.fetch_count().await, 1);
}

#[tokio::test]
async fn test_resubmit_single_season() {
    let fixture = TestFixture::with_config(TestConfig::stopped()).await;
    fixture
        .store
        .upsert_observed(&fixtures::show_request("12", "Severance", 2022, vec![1, 2]))
        .unwrap();
    let policy = seerrbridge_core::RetryPolicy::default();
    for season in [1, 2] {
        fixture.store.begin_attempt("12", Some(season)).unwrap();
        fixture
            .store
            .record_outcome(
                "12",
                Some(season),
                &seerrbridge_core::UnitOutcome::Permanent {
                    reason: "no-match".to_string(),
                },
                &policy,
            )
            .unwrap();
    }

    let response = fixture
        .post("/api/v1/requests/12/resubmit", json!({"season": 2}))
        .await;
    assert_status!(response, StatusCode::ACCEPTED);
    assert_eq!(response.body["previous_states"], json!(["failed"]));

    let request = fixture.store.get("12").unwrap().unwrap();
    assert_eq!(request.unit(Some(1)).unwrap().state.state_type(), "failed");
    assert_eq!(request.unit(Some(2)).unwrap().state.state_type(), "pending");
}

#[tokio::test]
async fn test_resubmit_unknown_request() {
    let fixture = TestFixture::new().await;
    let response = fixture.post("/api/v1/requests/999/resubmit", json!({})).await;
    assert_status!(response, StatusCode::NOT_FOUND);

    let response = fixture.post_empty("/api/v1/requests/999/resubmit").await;
    assert_status!(response, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_resubmit_in_progress_conflicts() {
    let fixture = TestFixture::with_config(TestConfig::stopped()).await;
    fixture
        .store
        .upsert_observed(&fixtures::movie_request("7", "Arrival", 2016))
        .unwrap();
    fixture.store.begin_attempt("7", None).unwrap();

    let response = fixture.post("/api/v1/requests/7/resubmit", json!({})).await;
    assert_status!(response, StatusCode::CONFLICT);
}

// =============================================================================
// Audit Tests
// =============================================================================

#[tokio::test]
async fn test_audit_records_request_lifecycle() {
    let fixture = TestFixture::new().await;
    fixture
        .source
        .add_request(fixtures::movie_request("7", "Arrival", 2016))
        .await;
    fixture
        .surface
        .set_results(vec![fixtures::candidate(0, "Arrival.2016.1080p.BluRay.x264", 8.0, true)])
        .await;

    fixture.post_empty("/api/v1/cycle").await;
    assert!(fixture.wait_for_fetches(1, WAIT).await);
    // The audit writer persists asynchronously.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let response = fixture.get("/api/v1/audit?request_id=7").await;
    assert_status!(response, StatusCode::OK);
    let types: Vec<&str> = response.body["events"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["event_type"].as_str().unwrap())
        .collect();
    assert!(types.contains(&"request_observed"));
    assert!(types.contains(&"candidate_selected"));
    assert!(types.contains(&"unit_state_changed"));
    assert!(types.contains(&"request_marked_available"));

    let response = fixture
        .get("/api/v1/audit?event_type=cycle_completed&limit=5000")
        .await;
    assert_eq!(response.body["limit"], 1000);
    assert_eq!(response.body["total"], 1);
}

#[tokio::test]
async fn test_audit_filters_by_outcome() {
    let fixture = TestFixture::new().await;
    fixture
        .source
        .add_request(fixtures::movie_request("7", "Arrival", 2016))
        .await;
    fixture
        .source
        .add_request(fixtures::movie_request("8", "Dune", 2021))
        .await;
    fixture
        .surface
        .set_results_for(
            "Dune",
            None,
            vec![fixtures::candidate(0, "Dune.2021.2160p.WEB-DL", 20.0, true)],
        )
        .await;

    fixture.scheduler.trigger(TriggerSource::Manual);
    assert!(fixture.wait_for_unit_state("7", None, "failed", WAIT).await);
    assert!(fixture.wait_for_unit_state("8", None, "completed", WAIT).await);
    tokio::time::sleep(Duration::from_millis(200)).await;

    let response = fixture.get("/api/v1/audit?outcome=failed").await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["total"], 1);
    assert_eq!(response.body["events"][0]["request_id"], "7");
    assert_eq!(response.body["events"][0]["outcome"], "failed");

    let response = fixture
        .get("/api/v1/audit?request_id=8&outcome=completed")
        .await;
    assert_eq!(response.body["total"], 1);

    let response = fixture.get("/api/v1/audit?request_id=8&outcome=failed").await;
    assert_eq!(response.body["total"], 0);
}

#[tokio::test]
async fn test_audit_filters_by_season() {
    let fixture = TestFixture::with_config(TestConfig::stopped()).await;
    fixture
        .store
        .upsert_observed(&fixtures::show_request("12", "Severance", 2022, vec![1, 2]))
        .unwrap();
    fixture.store.begin_attempt("12", Some(2)).unwrap();
    fixture
        .store
        .record_outcome(
            "12",
            Some(2),
            &seerrbridge_core::UnitOutcome::Permanent {
                reason: "no-match".to_string(),
            },
            &seerrbridge_core::RetryPolicy::default(),
        )
        .unwrap();

    // Resubmitting season 2 records a transition for that season only.
    let response = fixture
        .post("/api/v1/requests/12/resubmit", json!({"season": 2}))
        .await;
    assert_status!(response, StatusCode::ACCEPTED);
    tokio::time::sleep(Duration::from_millis(200)).await;

    let response = fixture.get("/api/v1/audit?request_id=12&season=2").await;
    assert_status!(response, StatusCode::OK);
    let events = response.body["events"].as_array().unwrap();
    assert!(!events.is_empty());
    assert!(events.iter().all(|e| e["season"] == 2));

    let response = fixture.get("/api/v1/audit?request_id=12&season=1").await;
    assert_eq!(response.body["total"], 0);
}

#[tokio::test]
async fn test_audit_season_without_request_is_rejected() {
    let fixture = TestFixture::new().await;

    let response = fixture.get("/api/v1/audit?season=1").await;
    assert_status!(response, StatusCode::BAD_REQUEST);
    assert!(response.body["error"]
        .as_str()
        .unwrap()
        .contains("request_id"));
}

#[tokio::test]
async fn test_http_metrics_are_labelled_by_route() {
    let fixture = TestFixture::with_config(TestConfig::stopped()).await;
    fixture.get("/api/v1/requests/404404").await;

    let (_, body) = fixture.get_text("/metrics").await;
    assert!(body.contains(r#"path="/api/v1/requests/{id}""#));
    assert!(!body.contains("404404"));
}
