use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    extract::DefaultBodyLimit,
    http::Method,
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{
    clock::{Clock, SystemClock},
    handlers::{consume_secret, create_secret, health},
    janitor::Janitor,
    metrics::{InMemoryMetrics, MetricsSink},
    service::Service,
    store::{FsBlobStore, RedbIndex, SecretStore, Store},
    AppState,
};

pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub data_dir: Option<PathBuf>,
    /// Payloads at or below this many bytes are stored inline in the
    /// index row; larger payloads go to blob files.
    pub inline_max_bytes: u64,
    pub max_bytes: u64,
    pub min_ttl: Duration,
    pub max_ttl: Duration,
    pub janitor_interval: Duration,
    /// Freshness guard for the blob scan; see `FsBlobStore::list`.
    pub blob_min_age: Duration,
    pub cors_origins: Option<String>,
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: std::env::var("WISP_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: std::env::var("WISP_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
            data_dir: std::env::var("WISP_DATA_DIR").ok().map(PathBuf::from),
            inline_max_bytes: env_u64("WISP_INLINE_MAX_BYTES", 8 * 1024),
            max_bytes: env_u64("WISP_MAX_BYTES", 1024 * 1024),
            min_ttl: Duration::from_secs(env_u64("WISP_MIN_TTL_SECS", 300)),
            max_ttl: Duration::from_secs(env_u64("WISP_MAX_TTL_SECS", 86_400)),
            janitor_interval: Duration::from_secs(env_u64("WISP_JANITOR_INTERVAL_SECS", 60)),
            blob_min_age: Duration::from_millis(env_u64("WISP_BLOB_MIN_AGE_MS", 1_000)),
            cors_origins: std::env::var("WISP_CORS_ORIGINS").ok(),
        }
    }
}

/// Resolve the data directory, creating it if needed.
pub fn resolve_data_dir(data_dir: Option<&PathBuf>) -> Result<PathBuf> {
    match data_dir {
        Some(d) => {
            std::fs::create_dir_all(d).context("create data dir")?;
            Ok(d.clone())
        }
        None => crate::dirs::data_dir(),
    }
}

pub async fn run(cfg: ServerConfig) -> Result<()> {
    let data_dir = resolve_data_dir(cfg.data_dir.as_ref())?;
    info!(data_dir = %data_dir.display(), "using data directory");

    // Blob files carry raw ciphertext; the directory is owner-only.
    let blob_dir = data_dir.join("blobs");
    std::fs::create_dir_all(&blob_dir).context("create blobs dir")?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&blob_dir, std::fs::Permissions::from_mode(0o700))
            .context("restrict blobs dir")?;
    }

    let index = RedbIndex::open(&data_dir.join("wisp.db")).context("open index")?;
    let blobs = FsBlobStore::new(&blob_dir, cfg.blob_min_age).context("open blob store")?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store: Arc<dyn SecretStore> = Arc::new(Store::new(
        Arc::new(index),
        Arc::new(blobs),
        clock.clone(),
        cfg.inline_max_bytes,
    ));
    let metrics: Arc<dyn MetricsSink> = Arc::new(InMemoryMetrics::default());

    let service = Arc::new(Service {
        store: store.clone(),
        clock: clock.clone(),
        max_bytes: cfg.max_bytes,
        min_ttl: cfg.min_ttl,
        max_ttl: cfg.max_ttl,
        metrics: Some(metrics.clone()),
    });

    let janitor = Janitor::new(store, clock, Some(metrics), cfg.janitor_interval);
    janitor.start();

    let app = router(
        AppState { service },
        cfg.max_bytes,
        cfg.cors_origins.as_deref(),
    );

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .context("invalid host/port")?;

    info!(%addr, "wisp server listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("bind listener")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    // Let the in-flight cycle finish before the process exits.
    janitor.stop().await;
    Ok(())
}

/// Build the HTTP surface. Split out so tests can drive it without a
/// listener.
pub fn router(state: AppState, max_bytes: u64, cors_origins: Option<&str>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/secrets", post(create_secret))
        .route("/api/secrets/{id}", get(consume_secret))
        .layer(DefaultBodyLimit::max(max_bytes as usize))
        .with_state(state)
        .layer(build_cors(cors_origins))
        .layer(TraceLayer::new_for_http())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "install ctrl-c handler");
    }
}

fn build_cors(origins: Option<&str>) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    match origins {
        Some(o) => {
            let origins: Vec<_> = o.split(',').filter_map(|s| s.trim().parse().ok()).collect();
            cors.allow_origin(origins)
        }
        None => cors.allow_origin(Any),
    }
}
