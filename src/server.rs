//! HTTP server bootstrap for eventlog-sync.
//!
//! This module wires together:
//! - configuration
//! - database connection pool and migrations
//! - identity, keystore and writer policy
//! - the event log and its sync engine
//! - the Axum router

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use axum::routing::get;
use axum::Router;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::api::handlers::{health_check, prometheus_metrics, readiness_check};
use crate::auth::{
    AccessController, FileKeystore, IdentityProvider, InMemoryKeystore, Keystore,
};
use crate::domain::{AccessPolicy, PeerRole};
use crate::infra::{
    is_retryable_db_error, shutdown_signal, EventSink, PgEventSink, Retry, RetryConfig,
    ShutdownCoordinator, ShutdownSignal,
};
use crate::log::{EventLog, InMemoryEventLog, DEFAULT_NOTIFY_CAPACITY};
use crate::sync::{SyncConfig, SyncEngine};
use crate::telemetry::{init_telemetry, TelemetryConfig};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection URL.
    pub database_url: String,
    /// Server listen address.
    pub listen_addr: SocketAddr,
    /// Maximum database connections.
    pub max_connections: u32,
    /// Schema put on the `search_path` of every connection.
    pub schema: Option<String>,
    pub migrate_on_startup: bool,
    /// Hex key material of the local writer; random when unset.
    pub identity_key: Option<String>,
    /// Directory of the file keystore; in-memory when unset.
    pub keystore_dir: Option<PathBuf>,
    /// Writer ids admitted besides the local writer.
    pub writers: Vec<String>,
    /// Capacity of the live notification channel.
    pub notify_capacity: usize,
    pub sync: SyncConfig,
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgres://localhost/eventlog_sync".to_string());

        let port: u16 = std::env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(8080);

        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());

        let listen_addr: SocketAddr = format!("{host}:{port}")
            .parse()
            .with_context(|| format!("Invalid listen address {host}:{port}"))?;

        let max_connections: u32 = std::env::var("MAX_DB_CONNECTIONS")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(10);

        let migrate_on_startup = std::env::var("DB_MIGRATE_ON_STARTUP")
            .ok()
            .map(|v| {
                !matches!(
                    v.trim().to_ascii_lowercase().as_str(),
                    "0" | "false" | "off"
                )
            })
            .unwrap_or(true);

        let writers = std::env::var("LOG_WRITERS")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        let notify_capacity = std::env::var("SYNC_CHANNEL_CAPACITY")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_NOTIFY_CAPACITY);

        let sync = SyncConfig::from_env();
        sync.validate()?;

        Ok(Self {
            database_url,
            listen_addr,
            max_connections,
            schema: non_empty_var("POSTGRES_SCHEMA"),
            migrate_on_startup,
            identity_key: non_empty_var("IDENTITY_KEY"),
            keystore_dir: non_empty_var("KEYSTORE_DIR").map(PathBuf::from),
            writers,
            notify_capacity,
            sync,
        })
    }
}

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// The log; its access controller serves the writer policy routes
    pub log: Arc<dyn EventLog>,
    pub engine: SyncEngine,
    pub sink: Arc<dyn EventSink>,
    /// Ends long-lived response streams on shutdown
    pub shutdown: ShutdownSignal,
}

/// Start the HTTP server.
pub async fn run() -> anyhow::Result<()> {
    init_telemetry(&TelemetryConfig::from_env())
        .map_err(|e| anyhow::anyhow!("Failed to initialize telemetry: {e}"))?;

    info!("Starting eventlog-sync v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = Config::from_env()?;
    info!(
        listen_addr = %config.listen_addr,
        max_connections = config.max_connections,
        schema = config.schema.as_deref().unwrap_or("public"),
        batch_size = config.sync.batch_size,
        flush_interval_ms = config.sync.flush_interval.as_millis() as u64,
        "Configuration loaded"
    );

    // Connect to PostgreSQL
    let mut connect_options = PgConnectOptions::from_str(&config.database_url)
        .context("Invalid DATABASE_URL")?;
    if let Some(schema) = &config.schema {
        connect_options = connect_options.options([("search_path", schema.as_str())]);
    }
    info!("Connecting to PostgreSQL...");
    let pool = Retry::new(RetryConfig::connect())
        .run_with_predicate(
            "postgres connect",
            || {
                PgPoolOptions::new()
                    .max_connections(config.max_connections)
                    .connect_with(connect_options.clone())
            },
            is_retryable_db_error,
        )
        .await
        .into_result()?;
    info!("Connected to PostgreSQL");

    if config.migrate_on_startup {
        info!("Running database migrations...");
        crate::migrations::run_postgres(&pool).await?;
        info!("Database migrations applied");
    } else {
        info!("DB migrations skipped (DB_MIGRATE_ON_STARTUP=0)");
    }

    // Identity and writer policy
    let keystore: Arc<dyn Keystore> = match &config.keystore_dir {
        Some(dir) => Arc::new(FileKeystore::new(dir)?),
        None => {
            warn!("KEYSTORE_DIR not set, keys are kept in memory only");
            Arc::new(InMemoryKeystore::new())
        }
    };
    let key_material = match &config.identity_key {
        Some(key) => key.clone(),
        None => {
            warn!("IDENTITY_KEY not set, using an ephemeral identity");
            hex::encode(rand::random::<[u8; 32]>())
        }
    };
    let identity = IdentityProvider::new(keystore.clone())
        .create_identity(&key_material)
        .await?;
    info!(writer = %identity.id, "Local writer identity ready");

    let policy = AccessPolicy::new(
        config
            .writers
            .iter()
            .cloned()
            .chain(std::iter::once(identity.id.clone())),
    );
    info!(writers = policy.writer_ids.len(), "Writer policy loaded");
    let access = Arc::new(AccessController::new(policy, keystore, PeerRole::Owner));

    // Log, sink and sync engine
    let log: Arc<dyn EventLog> = Arc::new(InMemoryEventLog::with_capacity(
        "events",
        identity,
        access,
        config.notify_capacity,
    ));
    let sink: Arc<dyn EventSink> = Arc::new(PgEventSink::new(pool));
    let engine = SyncEngine::new(config.sync.clone(), log.clone(), sink.clone())?;
    engine.initialize().await?;

    let coordinator = ShutdownCoordinator::new();
    let state = AppState {
        log,
        engine: engine.clone(),
        sink,
        shutdown: coordinator.signal(),
    };

    let app = build_router(state)?;

    // Start server
    info!("Starting HTTP server on {}", config.listen_addr);
    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;

    info!("eventlog-sync is ready to accept connections");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            coordinator.shutdown();
        })
        .await?;

    info!("HTTP server stopped, draining sync engine");
    let report = engine.stop().await?;
    info!(
        committed_events = report.committed_events,
        "Shutdown complete"
    );

    Ok(())
}

/// Build the full router with state applied.
pub fn build_router(state: AppState) -> anyhow::Result<Router> {
    let mut router = Router::new()
        .nest("/api/v1", crate::api::router())
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/metrics", get(prometheus_metrics))
        .layer(TraceLayer::new_for_http());

    if let Some(cors_layer) = cors_layer_from_env()? {
        router = router.layer(cors_layer);
    }

    Ok(router.with_state(state))
}

fn cors_layer_from_env() -> anyhow::Result<Option<CorsLayer>> {
    let origins = match std::env::var("CORS_ALLOW_ORIGINS") {
        Ok(v) => v,
        Err(_) => return Ok(None),
    };

    let origins = origins.trim();
    if origins.is_empty() {
        return Ok(None);
    }

    let allow_origin = if origins == "*" {
        AllowOrigin::any()
    } else {
        let origins: Vec<HeaderValue> = origins
            .split(',')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<HeaderValue>()
                    .map_err(|e| anyhow::anyhow!("Invalid CORS origin {s:?}: {e}"))
            })
            .collect::<anyhow::Result<_>>()?;
        AllowOrigin::list(origins)
    };

    Ok(Some(
        CorsLayer::new()
            .allow_origin(allow_origin)
            .allow_methods([Method::GET, Method::POST, Method::DELETE])
            .allow_headers([axum::http::header::CONTENT_TYPE]),
    ))
}
