//! HTTP surface: the stream control API plus playlist/segment delivery.
//!
//! | Endpoint | Description |
//! |----------|-------------|
//! | `POST /api/stream/start` | Start (or replace) the relay for `{rtsp_url}` |
//! | `POST /api/stream/stop` | Stop the relay |
//! | `POST /api/stream/restart` | Relaunch the recorded source |
//! | `GET /api/stream/status` | Live session status |
//! | `GET/POST /api/overlays` | List or create overlays |
//! | `GET/PUT/DELETE /api/overlays/{id}` | Read, update or delete one overlay |
//! | `GET /health` | Liveness probe |
//! | `GET /stream.m3u8` | Current playlist |
//! | `GET /<file>.ts`, `GET /<file>.m3u8` | Segments and other playlists |

pub mod artifacts;
pub mod control;
pub mod overlays;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::{HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use thiserror::Error;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::supervisor::{StreamSupervisor, SupervisorSettings};
use crate::RelayConfig;

pub use self::artifacts::{ArtifactDirectory, ArtifactError, ArtifactKind};
pub use self::control::{ControlResponse, OutcomeStatus, StartRequest, StatusReport};
pub use self::overlays::{Overlay, OverlayError, OverlayKind, OverlayStore};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[error("config error: {0}")]
    Config(#[from] crate::ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Shared by every handler. Cheap to clone.
#[derive(Debug, Clone)]
pub struct AppState {
    pub supervisor: StreamSupervisor,
    pub artifacts: Arc<ArtifactDirectory>,
    pub overlays: Arc<OverlayStore>,
}

impl AppState {
    pub fn new(supervisor: StreamSupervisor, artifacts: ArtifactDirectory) -> Self {
        Self {
            supervisor,
            artifacts: Arc::new(artifacts),
            overlays: Arc::new(OverlayStore::new()),
        }
    }
}

pub fn router(state: AppState, cors_origins: &[String]) -> Router {
    let api = Router::new()
        .route("/stream/start", post(control::start_stream))
        .route("/stream/stop", post(control::stop_stream))
        .route("/stream/restart", post(control::restart_stream))
        .route("/stream/status", get(control::stream_status))
        .route(
            "/overlays",
            get(overlays::list_overlays).post(overlays::create_overlay),
        )
        .route(
            "/overlays/{id}",
            get(overlays::get_overlay)
                .put(overlays::update_overlay)
                .delete(overlays::delete_overlay),
        )
        .layer(cors_layer(cors_origins));

    Router::new()
        .nest("/api", api)
        .route("/health", get(control::health))
        .route("/stream.m3u8", get(artifacts::playlist))
        .route("/{*path}", get(artifacts::artifact))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);
    if origins.iter().any(|origin| origin == "*") {
        return layer.allow_origin(Any);
    }
    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(%origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(parsed))
}

/// Runs the relay service until SIGINT/SIGTERM, then stops any active stream.
pub async fn serve(config: RelayConfig) -> Result<(), ServerError> {
    let addr = config.bind_address()?;
    let settings = SupervisorSettings::from_config(&config);
    let output_dir = settings.output_dir.clone();
    tokio::fs::create_dir_all(&output_dir).await?;

    let (supervisor, actor) = StreamSupervisor::spawn(settings, None);
    let state = AppState::new(supervisor.clone(), ArtifactDirectory::new(output_dir.clone()));
    let app = router(state, &config.server.cors_origins);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })?;

    info!(%addr, output_dir = %output_dir.display(), "relay listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    match supervisor.shutdown().await {
        Ok(outcome) => info!(%outcome, "active stream released"),
        Err(err) => warn!(%err, "supervisor already gone at shutdown"),
    }
    let _ = actor.await;
    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("received SIGINT, shutting down");
        }
        _ = terminate_signal() => {
            info!("received SIGTERM, shutting down");
        }
    }
}

#[cfg(unix)]
async fn terminate_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(err) => {
            warn!(%err, "cannot install SIGTERM handler");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate_signal() {
    std::future::pending::<()>().await;
}
