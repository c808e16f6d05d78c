//! HTTP server bootstrap for the check-in service.
//!
//! This module wires together:
//! - configuration
//! - the document store (SQLite or in-memory) behind a deadline decorator
//! - the face capability sidecar and the optional camera
//! - drivers, auth, and the Axum router

use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderValue, Method};
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::auth::{AuthMiddlewareState, Authenticator, JwtValidator, RateLimiter};
use crate::auth::{DEFAULT_AUDIENCE, DEFAULT_ISSUER};
use crate::domain::RegistrationGating;
use crate::driver::{
    BatchProcessor, CameraFactory, CheckinContext, CheckinService, EnrollmentService,
    LiveStreamConfig, SnapshotCameraFactory, LIVE_MIN_CONFIDENCE,
};
use crate::face::{FaceCapability, HttpFaceCapability, HttpFaceConfig};
use crate::infra::{
    shutdown_signal, DocumentAttendanceLedger, DocumentEmbeddingStore, DocumentEventRegistry,
    DocumentStore, InMemoryDocumentStore, ShutdownCoordinator, SqliteDocumentStore,
    TimedDocumentStore,
};
use crate::metrics::MetricsRegistry;

/// `DATABASE_URL` value that selects the in-memory store.
pub const MEMORY_STORE: &str = "memory";

/// Server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite URL, or `memory`.
    pub database_url: String,
    pub listen_addr: SocketAddr,
    pub max_connections: u32,
    /// Deadline for every document store call.
    pub store_timeout: Duration,
    pub face_service_url: Option<String>,
    /// Deadline for one face capability HTTP call.
    pub face_timeout: Duration,
    /// Snapshot URL polled by the live stream.
    pub camera_url: Option<String>,
    pub camera_frame_interval: Duration,
    /// Concurrent embedding calls per group photo.
    pub batch_workers: usize,
    /// Expected embedding length; learned from the first enrollment when unset.
    pub embedding_dimension: Option<usize>,
    pub live_gating: RegistrationGating,
    pub max_upload_bytes: usize,
    /// How long shutdown waits for live streams to close.
    pub drain_timeout: Duration,
    pub cors_allow_origins: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite://volunteer_checkin.db".to_string(),
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_connections: 10,
            store_timeout: Duration::from_millis(5_000),
            face_service_url: None,
            face_timeout: Duration::from_millis(10_000),
            camera_url: None,
            camera_frame_interval: Duration::from_millis(200),
            batch_workers: 4,
            embedding_dimension: None,
            live_gating: RegistrationGating::Open,
            max_upload_bytes: 10 * 1024 * 1024,
            drain_timeout: Duration::from_secs(10),
            cors_allow_origins: None,
        }
    }
}

impl Config {
    /// Load configuration from environment variables. Invalid values are errors.
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port: u16 = env_parse("PORT", 8080)?;
        let listen_addr: SocketAddr = format!("{host}:{port}")
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid listen address {host}:{port}: {e}"))?;

        let embedding_dimension = match env_opt("EMBEDDING_DIMENSION") {
            Some(raw) => {
                let dim: usize = raw
                    .parse()
                    .map_err(|e| anyhow::anyhow!("invalid EMBEDDING_DIMENSION {raw:?}: {e}"))?;
                anyhow::ensure!(dim > 0, "EMBEDDING_DIMENSION must be positive");
                Some(dim)
            }
            None => None,
        };

        let batch_workers: usize = env_parse("BATCH_WORKERS", defaults.batch_workers)?;
        anyhow::ensure!(batch_workers > 0, "BATCH_WORKERS must be positive");

        Ok(Self {
            database_url: env_opt("DATABASE_URL").unwrap_or(defaults.database_url),
            listen_addr,
            max_connections: env_parse("MAX_DB_CONNECTIONS", defaults.max_connections)?,
            store_timeout: Duration::from_millis(env_parse("STORE_TIMEOUT_MS", 5_000)?),
            face_service_url: env_opt("FACE_SERVICE_URL"),
            face_timeout: Duration::from_millis(env_parse("FACE_TIMEOUT_MS", 10_000)?),
            camera_url: env_opt("CAMERA_URL"),
            camera_frame_interval: Duration::from_millis(env_parse(
                "CAMERA_FRAME_INTERVAL_MS",
                200,
            )?),
            batch_workers,
            embedding_dimension,
            live_gating: if env_flag("LIVE_REQUIRE_REGISTRATION")? {
                RegistrationGating::Enforced
            } else {
                RegistrationGating::Open
            },
            max_upload_bytes: env_parse("MAX_UPLOAD_BYTES", defaults.max_upload_bytes)?,
            drain_timeout: Duration::from_secs(env_parse("SHUTDOWN_DRAIN_SECS", 10)?),
            cors_allow_origins: env_opt("CORS_ALLOW_ORIGINS"),
        })
    }
}

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_opt(name) {
        Some(raw) => raw
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid {name} {raw:?}: {e}")),
        None => Ok(default),
    }
}

fn env_flag(name: &str) -> anyhow::Result<bool> {
    match env_opt(name).map(|v| v.to_ascii_lowercase()) {
        None => Ok(false),
        Some(v) => match v.as_str() {
            "1" | "true" | "on" | "yes" => Ok(true),
            "0" | "false" | "off" | "no" => Ok(false),
            _ => anyhow::bail!("invalid {name} {v:?}: expected true or false"),
        },
    }
}

/// Live stream settings shared by every session.
#[derive(Debug, Clone)]
pub struct LiveSettings {
    pub gating: RegistrationGating,
    pub min_confidence: f64,
    pub stream: LiveStreamConfig,
}

impl Default for LiveSettings {
    fn default() -> Self {
        Self {
            gating: RegistrationGating::Open,
            min_confidence: LIVE_MIN_CONFIDENCE,
            stream: LiveStreamConfig::default(),
        }
    }
}

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub checkin: CheckinContext,
    pub enrollment: Arc<EnrollmentService>,
    pub batch: Arc<BatchProcessor>,
    pub attendance: Arc<CheckinService>,
    pub camera: Option<Arc<dyn CameraFactory>>,
    pub store: Arc<dyn DocumentStore>,
    pub shutdown: Arc<ShutdownCoordinator>,
    pub live: LiveSettings,
}

impl AppState {
    /// Build the drivers over `store` and a face capability.
    pub fn new(
        store: Arc<dyn DocumentStore>,
        faces: Arc<dyn FaceCapability>,
        metrics: Arc<MetricsRegistry>,
        embedding_dimension: Option<usize>,
        batch_workers: usize,
    ) -> Self {
        let events = Arc::new(DocumentEventRegistry::new(store.clone()));
        let identities = Arc::new(
            DocumentEmbeddingStore::new(store.clone()).with_dimension(embedding_dimension),
        );
        let ledger = Arc::new(DocumentAttendanceLedger::new(store.clone(), events.clone()));

        let checkin = CheckinContext {
            faces,
            identities,
            events,
            ledger,
            metrics,
        };

        Self {
            enrollment: Arc::new(EnrollmentService::new(checkin.clone())),
            batch: Arc::new(BatchProcessor::new(checkin.clone(), batch_workers)),
            attendance: Arc::new(CheckinService::new(checkin.clone())),
            checkin,
            camera: None,
            store,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            live: LiveSettings::default(),
        }
    }

    pub fn with_camera(mut self, camera: Arc<dyn CameraFactory>) -> Self {
        self.camera = Some(camera);
        self
    }

    pub fn with_live_settings(mut self, live: LiveSettings) -> Self {
        self.live = live;
        self
    }
}

/// Open the configured document store, wrapped in the store deadline.
pub async fn open_store(config: &Config) -> anyhow::Result<Arc<dyn DocumentStore>> {
    let inner: Arc<dyn DocumentStore> = if config.database_url == MEMORY_STORE {
        info!("Using in-memory document store; data is lost on exit");
        Arc::new(InMemoryDocumentStore::new())
    } else {
        info!("Opening SQLite document store");
        Arc::new(SqliteDocumentStore::connect(&config.database_url, config.max_connections).await?)
    };
    Ok(Arc::new(TimedDocumentStore::new(inner, config.store_timeout)))
}

/// Auth settings from `AUTH_MODE`, `JWT_*` and `RATE_LIMIT_PER_MINUTE`.
pub fn auth_state_from_env() -> anyhow::Result<AuthMiddlewareState> {
    let auth_mode = std::env::var("AUTH_MODE").unwrap_or_else(|_| "required".to_string());
    let require_auth = auth_mode != "disabled";

    let jwt_validator = match std::env::var("JWT_SECRET") {
        Ok(secret) if !secret.is_empty() => {
            let issuer = std::env::var("JWT_ISSUER").unwrap_or_else(|_| DEFAULT_ISSUER.to_string());
            let audience =
                std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| DEFAULT_AUDIENCE.to_string());
            Some(Arc::new(JwtValidator::new(
                secret.as_bytes(),
                &issuer,
                &audience,
            )))
        }
        _ => None,
    };

    if require_auth && jwt_validator.is_none() {
        anyhow::bail!(
            "AUTH_MODE=required but JWT_SECRET is not set (set AUTH_MODE=disabled for local dev)"
        );
    }
    if !require_auth {
        tracing::warn!("Authentication is disabled; every request runs as an administrator");
    }

    let rate_limiter = std::env::var("RATE_LIMIT_PER_MINUTE")
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .filter(|v| *v > 0)
        .map(|rpm| Arc::new(RateLimiter::new(rpm)));

    Ok(AuthMiddlewareState {
        authenticator: Arc::new(Authenticator::new(jwt_validator)),
        require_auth,
        rate_limiter,
    })
}

/// Start the HTTP server and run until SIGINT or SIGTERM.
pub async fn run() -> anyhow::Result<()> {
    info!("Starting volunteer-checkin v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    let auth_state = auth_state_from_env()?;
    info!("Configuration loaded");
    info!("  Listen address: {}", config.listen_addr);
    info!("  Batch workers: {}", config.batch_workers);
    info!("  Live gating: {:?}", config.live_gating);

    let face_url = config.face_service_url.clone().ok_or_else(|| {
        anyhow::anyhow!("FACE_SERVICE_URL is required (the face detection sidecar)")
    })?;
    let faces = Arc::new(HttpFaceCapability::new(
        HttpFaceConfig::new(face_url, config.face_timeout)
            .with_dimension(config.embedding_dimension),
    )?);

    let store = open_store(&config).await?;
    let metrics = Arc::new(MetricsRegistry::new());

    let mut state = AppState::new(
        store,
        faces,
        metrics,
        config.embedding_dimension,
        config.batch_workers,
    )
    .with_live_settings(LiveSettings {
        gating: config.live_gating,
        ..LiveSettings::default()
    });

    match &config.camera_url {
        Some(url) => {
            info!("  Camera: {}", url);
            let camera = SnapshotCameraFactory::new(
                url.clone(),
                config.camera_frame_interval,
                config.face_timeout,
            )?;
            state = state.with_camera(Arc::new(camera));
        }
        None => info!("  Camera: not configured (set CAMERA_URL to enable /live_attendance)"),
    }

    let coordinator = state.shutdown.clone();
    let app = build_router(
        state,
        auth_state,
        config.max_upload_bytes,
        config.cors_allow_origins.as_deref(),
    )?;

    info!("Starting HTTP server on {}", config.listen_addr);
    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;

    let on_signal = coordinator.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            on_signal.shutdown();
        })
        .await?;

    coordinator.graceful_shutdown(config.drain_timeout).await;
    Ok(())
}

/// Assemble the full router with auth, tracing, body limits and CORS.
pub fn build_router(
    state: AppState,
    auth_state: AuthMiddlewareState,
    max_upload_bytes: usize,
    cors_allow_origins: Option<&str>,
) -> anyhow::Result<Router> {
    let api = crate::api::router().layer(axum::middleware::from_fn_with_state(
        auth_state.clone(),
        crate::auth::auth_middleware,
    ));

    let dashboard = crate::api::dashboard_router().layer(axum::middleware::from_fn_with_state(
        auth_state,
        crate::auth::auth_middleware,
    ));

    let mut router = Router::new()
        .merge(dashboard)
        .nest("/api", api)
        .merge(crate::api::ops_router())
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_upload_bytes))
        .layer(TraceLayer::new_for_http());

    if let Some(cors_layer) = cors_layer(cors_allow_origins)? {
        router = router.layer(cors_layer);
    }

    Ok(router.with_state(state))
}

fn cors_layer(origins: Option<&str>) -> anyhow::Result<Option<CorsLayer>> {
    let origins = match origins.map(str::trim) {
        Some(v) if !v.is_empty() => v,
        _ => return Ok(None),
    };

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
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([
                axum::http::header::AUTHORIZATION,
                axum::http::header::CONTENT_TYPE,
            ]),
    ))
}
