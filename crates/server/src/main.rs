use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use seerrbridge_core::{
    create_audit_system, load_config, validate_config, AuditEvent, AuditStore,
    BrowserSessionManager, ChromiumSurfaceFactory, CredentialPersistence, CredentialStore,
    EvidenceStore, JsonFileCredentialPersistence, OverseerrClient, RealDebridTokenEndpoint,
    RecoveryController, RequestSource, RequestStore, RetryPolicy, Scheduler, SelectionEngine,
    Selector, SqliteAuditStore, SqliteRequestStore, SurfaceFactory, TokenEndpoint,
};
use seerrbridge_server::{api::create_router, state::AppState};

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Buffer size for audit event channel
const AUDIT_BUFFER_SIZE: usize = 1000;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Determine config path
    let config_path = std::env::var("SEERRBRIDGE_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    validate_config(&config).context("Configuration validation failed")?;

    info!("Configuration loaded successfully");
    info!("Database path: {:?}", config.database.path);
    if config.overseerr.enabled {
        info!("Request source: {}", config.overseerr.url);
    } else {
        warn!("Request source disabled, working from stored requests only");
    }

    // Compute config hash for audit
    let config_json = serde_json::to_string(&config).unwrap_or_default();
    let config_hash = format!("{:x}", Sha256::digest(config_json.as_bytes()));
    let config_hash_short = &config_hash[..16];

    // Stores
    let audit_store: Arc<dyn AuditStore> = Arc::new(
        SqliteAuditStore::new(&config.database.path).context("Failed to create audit store")?,
    );
    info!("Audit store initialized");

    let request_store: Arc<dyn RequestStore> = Arc::new(
        SqliteRequestStore::new(&config.database.path)
            .context("Failed to create request store")?,
    );
    info!("Request store initialized");

    // Create audit system
    let (audit_handle, audit_writer) =
        create_audit_system(Arc::clone(&audit_store), AUDIT_BUFFER_SIZE);
    let writer_handle = tokio::spawn(audit_writer.run());

    audit_handle
        .emit(AuditEvent::ServiceStarted {
            version: VERSION.to_string(),
            config_hash: config_hash_short.to_string(),
        })
        .await;
    info!("Emitted ServiceStarted audit event");

    // Provider credential
    let endpoint: Arc<dyn TokenEndpoint> = Arc::new(
        RealDebridTokenEndpoint::new(&config.credentials)
            .context("Failed to create token endpoint")?,
    );
    let persistence: Arc<dyn CredentialPersistence> =
        Arc::new(JsonFileCredentialPersistence::new(&config.credentials.path));
    let credentials = Arc::new(
        CredentialStore::load(
            endpoint,
            persistence,
            Duration::from_secs(config.credentials.refresh_margin_secs),
        )
        .with_context(|| {
            format!(
                "Failed to load provider credential from {:?}",
                config.credentials.path
            )
        })?
        .with_audit(audit_handle.clone()),
    );

    // Browser session
    let factory: Arc<dyn SurfaceFactory> =
        Arc::new(ChromiumSurfaceFactory::new(config.browser.clone()));
    let sessions = Arc::new(
        BrowserSessionManager::new(
            factory,
            Duration::from_secs(config.browser.acquire_timeout_secs),
        )
        .with_audit(audit_handle.clone()),
    );
    if config.browser.launch_at_startup {
        // A failed warm-up is retried lazily by the first cycle.
        match sessions.warm_up().await {
            Ok(()) => {
                // Queued behind the first cycle if it gets the session first.
                let sessions = Arc::clone(&sessions);
                tokio::spawn(async move {
                    let _ = sessions.refresh_library_stats().await;
                });
            }
            Err(e) => warn!(error = %e, "Browser warm-up failed"),
        }
    }

    // Search, selection and recovery
    let selector = Selector::from_config(&config.selection).context("Invalid selection config")?;
    let engine = Arc::new(
        SelectionEngine::new(
            selector,
            Arc::clone(&credentials),
            Duration::from_secs(config.browser.step_timeout_secs),
            Duration::from_secs(config.browser.ready_timeout_secs),
        )
        .with_audit(audit_handle.clone()),
    );

    let evidence = Arc::new(
        EvidenceStore::open(&config.recovery.evidence_dir, config.recovery.evidence_retain)
            .await
            .with_context(|| {
                format!(
                    "Failed to open evidence directory {:?}",
                    config.recovery.evidence_dir
                )
            })?,
    );

    let recovery = Arc::new(
        RecoveryController::new(
            engine,
            Arc::clone(&request_store),
            Arc::clone(&evidence),
            RetryPolicy::new(&config.recovery),
            Duration::from_secs(config.recovery.attempt_timeout_secs),
            Duration::from_secs(config.recovery.snapshot_timeout_secs),
        )
        .with_audit(audit_handle.clone()),
    );

    // Request source and scheduler
    let source: Option<Arc<dyn RequestSource>> = if config.overseerr.enabled {
        Some(Arc::new(
            OverseerrClient::new(&config.overseerr)
                .context("Failed to create Overseerr client")?,
        ))
    } else {
        None
    };
    let scheduler = Arc::new(
        Scheduler::new(
            config.scheduler.clone(),
            Arc::clone(&request_store),
            source,
            Arc::clone(&sessions),
            Arc::clone(&credentials),
            recovery,
        )
        .with_audit(audit_handle.clone()),
    );
    scheduler.start().await.context("Failed to start scheduler")?;

    // Create app state
    let state = Arc::new(AppState::new(
        config.clone(),
        VERSION,
        audit_store,
        request_store,
        Arc::clone(&scheduler),
        Arc::clone(&sessions),
        credentials,
        evidence,
    ));

    let app = create_router(state);

    // Start server
    let addr = SocketAddr::new(config.server.host, config.server.port);
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutting down...");
    scheduler.stop().await;

    if let Err(e) = sessions.shutdown().await {
        warn!(error = %e, "Browser session did not shut down cleanly");
    }

    audit_handle
        .emit(AuditEvent::ServiceStopped {
            reason: "graceful_shutdown".to_string(),
        })
        .await;

    // Every AuditHandle clone must be gone before the writer's channel closes.
    // The scheduler owns the recovery controller, engine and credential store;
    // the session manager holds its own clone.
    drop(scheduler);
    drop(sessions);
    drop(audit_handle);

    let _ = writer_handle.await;
    info!("Audit writer stopped");

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
