//! HTTP surface: stream endpoint, submit endpoint, and operator probes.
//!
//! Routing between the two relay endpoints is entirely broker-mediated;
//! a submit call may land on a different process than the stream it
//! targets.

pub mod stream;
pub mod submit;

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::broker::RelayBroker;
use crate::config::RelayConfig;
use crate::relay::registry::SessionRegistry;
use crate::relay::session::SessionContext;
use crate::{AppError, Result};

/// Shared state accessible by every HTTP handler.
pub struct AppState {
    /// Relay configuration.
    pub config: Arc<RelayConfig>,
    /// Broker shared by sessions and submit calls.
    pub broker: Arc<dyn RelayBroker>,
    /// Live sessions of this process.
    pub registry: Arc<SessionRegistry>,
}

impl AppState {
    /// Build state with an empty registry.
    #[must_use]
    pub fn new(config: Arc<RelayConfig>, broker: Arc<dyn RelayBroker>) -> Self {
        Self {
            config,
            broker,
            registry: Arc::new(SessionRegistry::new()),
        }
    }

    /// Collaborators handed to every new session.
    #[must_use]
    pub fn session_context(&self) -> SessionContext {
        SessionContext {
            broker: Arc::clone(&self.broker),
            registry: Arc::clone(&self.registry),
            lifetime: self.config.session_lifetime(),
            flush_interval: self.config.log_flush_interval(),
        }
    }
}

/// Handler for `GET /health`: 200 with a plain-text body.
async fn health() -> &'static str {
    "ok"
}

/// Handler for `GET /sessions`: live sessions of this process.
async fn sessions(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let sessions = state.registry.snapshot();
    Json(serde_json::json!({
        "count": sessions.len(),
        "sessions": sessions,
    }))
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "Not found")
}

/// Build the relay router.
pub fn router(state: Arc<AppState>) -> Router {
    let sse_path = state.config.sse_path.clone();
    let message_path = state.config.message_path.clone();
    Router::new()
        .route(&sse_path, get(stream::open_stream))
        .route(&message_path, post(submit::submit_message))
        .route("/health", get(health))
        .route("/sessions", get(sessions))
        .fallback(not_found)
        .with_state(state)
}

/// Bind `config.bind_addr()` and serve until `ct` fires.
///
/// # Errors
///
/// Returns `AppError::Io` if the listener cannot bind or the server fails.
pub async fn serve(state: Arc<AppState>, ct: CancellationToken) -> Result<()> {
    let bind = state.config.bind_addr();
    let listener = TcpListener::bind(bind)
        .await
        .map_err(|err| AppError::Io(format!("failed to bind {bind}: {err}")))?;
    serve_on(listener, state, ct).await
}

/// Serve on an already-bound listener until `ct` fires.
///
/// On shutdown every live session is closed so its event stream ends and
/// graceful shutdown can complete.
///
/// # Errors
///
/// Returns `AppError::Io` if the server fails.
pub async fn serve_on(listener: TcpListener, state: Arc<AppState>, ct: CancellationToken) -> Result<()> {
    let local = listener
        .local_addr()
        .map_err(|err| AppError::Io(format!("listener has no local address: {err}")))?;
    info!(%local, sse = %state.config.sse_path, message = %state.config.message_path, "starting relay http server");

    let registry = Arc::clone(&state.registry);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            ct.cancelled().await;
            info!(sessions = registry.len(), "closing live sessions");
            registry.close_all();
        })
        .await
        .map_err(|err| AppError::Io(format!("http server error: {err}")))?;

    info!("relay http server shut down");
    Ok(())
}
