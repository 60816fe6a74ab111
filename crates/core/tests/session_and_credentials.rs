//! Shared-resource integration tests: the browser session and the provider
//! credential are each used by one holder at a time.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use seerrbridge_core::{
    session::SessionState,
    testing::{fixtures, MockSurfaceFactory, MockTokenEndpoint, ScriptedSurface},
    BrowserSessionManager, CredentialPersistence, CredentialStore, JsonFileCredentialPersistence,
    SurfaceFactory, TokenEndpoint,
};

#[tokio::test]
async fn test_session_never_held_twice() {
    let factory = MockSurfaceFactory::new(ScriptedSurface::new());
    let manager = Arc::new(BrowserSessionManager::new(
        Arc::new(factory.clone()) as Arc<dyn SurfaceFactory>,
        Duration::from_secs(10),
    ));
    let holders = Arc::new(AtomicUsize::new(0));
    let max_holders = Arc::new(AtomicUsize::new(0));

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let manager = Arc::clone(&manager);
        let holders = Arc::clone(&holders);
        let max_holders = Arc::clone(&max_holders);
        tasks.push(tokio::spawn(async move {
            let handle = manager.acquire().await.expect("acquire");
            let now = holders.fetch_add(1, Ordering::SeqCst) + 1;
            max_holders.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            holders.fetch_sub(1, Ordering::SeqCst);
            drop(handle);
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(max_holders.load(Ordering::SeqCst), 1);
    assert_eq!(factory.launch_count(), 1);
    assert_eq!(manager.status().state, SessionState::Idle);
}

#[tokio::test]
async fn test_status_readable_while_session_held() {
    let manager = BrowserSessionManager::new(
        Arc::new(MockSurfaceFactory::new(ScriptedSurface::new())) as Arc<dyn SurfaceFactory>,
        Duration::from_secs(1),
    );
    let _handle = manager.acquire().await.unwrap();

    let status = manager.status();
    assert_eq!(status.state, SessionState::Busy);
    assert!(status.healthy);
}

#[tokio::test]
async fn test_concurrent_callers_share_one_refresh() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("credentials.json");
    let persistence = Arc::new(JsonFileCredentialPersistence::new(&path));
    persistence
        .save(&fixtures::credential(chrono::Duration::minutes(2)))
        .unwrap();

    let endpoint = Arc::new(MockTokenEndpoint::new());
    endpoint.set_delay(Duration::from_millis(50)).await;
    let store = Arc::new(
        CredentialStore::load(
            Arc::clone(&endpoint) as Arc<dyn TokenEndpoint>,
            Arc::clone(&persistence) as Arc<dyn CredentialPersistence>,
            Duration::from_secs(600),
        )
        .unwrap(),
    );

    let mut tasks = Vec::new();
    for _ in 0..5 {
        let store = Arc::clone(&store);
        tasks.push(tokio::spawn(async move { store.get_valid_token().await }));
    }
    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap(), "access-1");
    }
    assert_eq!(endpoint.exchange_count().await, 1);

    // The refreshed pair reached disk before anyone used it.
    let on_disk = persistence.load().unwrap();
    assert_eq!(on_disk.access_token, "access-1");
    assert_eq!(on_disk.refresh_token, "refresh-1");
    assert!(on_disk.expiry > chrono::Utc::now() + chrono::Duration::minutes(50));
}

#[tokio::test]
async fn test_token_never_expired() {
    let credential = fixtures::credential(chrono::Duration::seconds(-30));
    let endpoint = Arc::new(MockTokenEndpoint::new());
    let store = CredentialStore::new(
        credential.clone(),
        Arc::clone(&endpoint) as Arc<dyn TokenEndpoint>,
        Arc::new(seerrbridge_core::testing::MemoryCredentialPersistence::new(credential))
            as Arc<dyn CredentialPersistence>,
        Duration::from_secs(600),
    );

    let status = store.status().await;
    assert!(status.expired);

    let token = store.get_valid_token().await.unwrap();
    assert_ne!(token, "initial-access");
    assert!(!store.status().await.expired);
}
