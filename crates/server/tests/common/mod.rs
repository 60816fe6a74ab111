//! Common test utilities for in-process API testing with mocks.
//!
//! The fixture wires the real scheduler, recovery controller, selection
//! engine and stores to the mock request source, scripted automation
//! surface and mock token endpoint, then exposes the router.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use seerrbridge_core::{
    create_audit_system, load_config_from_str,
    testing::{
        MemoryCredentialPersistence, MockRequestSource, MockSurfaceFactory, MockTokenEndpoint,
        ScriptedSurface,
    },
    AuditStore, BrowserSessionManager, CredentialPersistence, CredentialStore, EvidenceStore,
    RecoveryController, RequestSource, RequestStore, RetryPolicy, Scheduler, SelectionEngine,
    Selector, SqliteAuditStore, SqliteRequestStore, SurfaceFactory, TokenEndpoint,
};
use seerrbridge_server::state::AppState;

/// Re-export fixtures for test convenience
pub use seerrbridge_core::testing::fixtures;

const TEST_CONFIG: &str = r#"
[overseerr]
url = "http://overseerr.test"
api_key = "test-api-key"

[scheduler]
enabled = false
run_on_start = false
"#;

/// In-process server backed by mocks.
pub struct TestFixture {
    pub router: Router,
    pub store: Arc<SqliteRequestStore>,
    pub audit_store: Arc<SqliteAuditStore>,
    pub source: Arc<MockRequestSource>,
    /// Scripted automation surface shared with the session factory.
    pub surface: ScriptedSurface,
    pub factory: MockSurfaceFactory,
    pub endpoint: Arc<MockTokenEndpoint>,
    pub scheduler: Arc<Scheduler>,
    pub evidence: Arc<EvidenceStore>,
    pub temp_dir: TempDir,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
}

/// Configuration for test fixture.
#[derive(Debug, Clone)]
pub struct TestConfig {
    /// Start the scheduler worker so triggers are accepted.
    pub start_scheduler: bool,
    pub retry_policy: RetryPolicy,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            start_scheduler: true,
            retry_policy: RetryPolicy {
                max_attempts: 3,
                base_delay_secs: 0,
                max_delay_secs: 0,
                multiplier: 2.0,
            },
        }
    }
}

impl TestConfig {
    pub fn stopped() -> Self {
        Self {
            start_scheduler: false,
            ..Default::default()
        }
    }
}

impl TestFixture {
    pub async fn new() -> Self {
        Self::with_config(TestConfig::default()).await
    }

    pub async fn with_config(test_config: TestConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.db");

        let mut config = load_config_from_str(TEST_CONFIG).expect("Failed to parse test config");
        config.database.path = db_path.clone();
        config.recovery.evidence_dir = temp_dir.path().join("evidence");

        // Stores
        let audit_store =
            Arc::new(SqliteAuditStore::new(&db_path).expect("Failed to create audit store"));
        let store =
            Arc::new(SqliteRequestStore::new(&db_path).expect("Failed to create request store"));

        let (audit_handle, audit_writer) =
            create_audit_system(Arc::clone(&audit_store) as Arc<dyn AuditStore>, 100);
        tokio::spawn(audit_writer.run());

        // Mocks
        let source = Arc::new(MockRequestSource::new());
        let surface = ScriptedSurface::new();
        let factory = MockSurfaceFactory::new(surface.clone());
        let endpoint = Arc::new(MockTokenEndpoint::new());

        let credential = fixtures::credential(chrono::Duration::hours(2));
        let credentials = Arc::new(
            CredentialStore::new(
                credential.clone(),
                Arc::clone(&endpoint) as Arc<dyn TokenEndpoint>,
                Arc::new(MemoryCredentialPersistence::new(credential))
                    as Arc<dyn CredentialPersistence>,
                Duration::from_secs(600),
            )
            .with_audit(audit_handle.clone()),
        );

        let sessions = Arc::new(
            BrowserSessionManager::new(
                Arc::new(factory.clone()) as Arc<dyn SurfaceFactory>,
                Duration::from_secs(5),
            )
            .with_audit(audit_handle.clone()),
        );

        let engine = SelectionEngine::new(
            Selector::from_config(&config.selection).expect("default selection config"),
            Arc::clone(&credentials),
            Duration::from_secs(2),
            Duration::from_millis(200),
        )
        .with_audit(audit_handle.clone());

        let evidence = Arc::new(
            EvidenceStore::open(&config.recovery.evidence_dir, 10)
                .await
                .expect("Failed to open evidence store"),
        );

        let recovery = RecoveryController::new(
            Arc::new(engine),
            Arc::clone(&store) as Arc<dyn RequestStore>,
            Arc::clone(&evidence),
            test_config.retry_policy.clone(),
            Duration::from_secs(5),
            Duration::from_secs(1),
        )
        .with_audit(audit_handle.clone());

        let scheduler = Arc::new(
            Scheduler::new(
                config.scheduler.clone(),
                Arc::clone(&store) as Arc<dyn RequestStore>,
                Some(Arc::clone(&source) as Arc<dyn RequestSource>),
                Arc::clone(&sessions),
                Arc::clone(&credentials),
                Arc::new(recovery),
            )
            .with_audit(audit_handle),
        );
        if test_config.start_scheduler {
            scheduler.start().await.expect("Failed to start scheduler");
        }

        let state = Arc::new(AppState::new(
            config,
            "test",
            Arc::clone(&audit_store) as Arc<dyn AuditStore>,
            Arc::clone(&store) as Arc<dyn RequestStore>,
            Arc::clone(&scheduler),
            sessions,
            credentials,
            Arc::clone(&evidence),
        ));

        let router = seerrbridge_server::api::create_router(state);

        Self {
            router,
            store,
            audit_store,
            source,
            surface,
            factory,
            endpoint,
            scheduler,
            evidence,
            temp_dir,
        }
    }

    /// Send a GET request to the test server.
    pub async fn get(&self, path: &str) -> TestResponse {
        self.request("GET", path, None).await
    }

    /// Send a POST request with JSON body.
    pub async fn post(&self, path: &str, body: Value) -> TestResponse {
        self.request("POST", path, Some(body)).await
    }

    /// Send a POST request without a body.
    pub async fn post_empty(&self, path: &str) -> TestResponse {
        self.request("POST", path, None).await
    }

    /// Send a POST request with raw string body (for testing malformed JSON).
    pub async fn post_raw(&self, path: &str, body: &str) -> TestResponse {
        let request = Request::builder()
            .method("POST")
            .uri(path)
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send(request).await
    }

    /// Raw response text (for non-JSON endpoints).
    pub async fn get_text(&self, path: &str) -> (StatusCode, String) {
        let request = Request::builder()
            .method("GET")
            .uri(path)
            .body(Body::empty())
            .unwrap();
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();
        (status, String::from_utf8_lossy(&bytes).to_string())
    }

    async fn request(&self, method: &str, path: &str, body: Option<Value>) -> TestResponse {
        let mut request_builder = Request::builder().method(method).uri(path);

        let body = if let Some(json_body) = body {
            request_builder = request_builder.header("Content-Type", "application/json");
            Body::from(serde_json::to_vec(&json_body).unwrap())
        } else {
            Body::empty()
        };

        self.send(request_builder.body(body).unwrap()).await
    }

    async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();

        let body: Value = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
        };

        TestResponse { status, body }
    }

    /// Poll until the unit reaches `state_type` or the timeout elapses.
    pub async fn wait_for_unit_state(
        &self,
        request_id: &str,
        season: Option<u32>,
        state_type: &str,
        timeout: Duration,
    ) -> bool {
        let start = std::time::Instant::now();
        while start.elapsed() < timeout {
            if let Ok(Some(request)) = self.store.get(request_id) {
                if request
                    .unit(season)
                    .is_some_and(|u| u.state.state_type() == state_type)
                {
                    return true;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }

    /// Poll until `count` cycles have listed the request source.
    pub async fn wait_for_fetches_started(&self, count: usize, timeout: Duration) -> bool {
        let start = std::time::Instant::now();
        while start.elapsed() < timeout {
            if self.source.fetch_count().await >= count {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    /// Poll until the scheduler has finished `count` cycles.
    pub async fn wait_for_fetches(&self, count: usize, timeout: Duration) -> bool {
        let start = std::time::Instant::now();
        while start.elapsed() < timeout {
            if self.source.fetch_count().await >= count
                && !self.scheduler.status().cycle_running
            {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }
}

/// Helper to assert a response has expected status.
#[macro_export]
macro_rules! assert_status {
    ($response:expr, $status:expr) => {
        assert_eq!(
            $response.status, $status,
            "Expected status {:?}, got {:?}. Body: {}",
            $status,
            $response.status,
            serde_json::to_string_pretty(&$response.body).unwrap_or_default()
        );
    };
}
