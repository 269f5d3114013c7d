//! Stream endpoint: one long-lived SSE connection per session.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use uuid::Uuid;

use super::AppState;
use crate::mcp::RelayToolServer;
use crate::relay::session::Session;
use crate::transport::sse::SseTransport;

/// Handler for `GET {sse_path}`.
///
/// Allocates a session id, starts the protocol engine behind an SSE
/// transport, and returns the event stream. The session runs on its own
/// task; the response body ends when the session closes.
pub async fn open_stream(State(state): State<Arc<AppState>>) -> Response {
    let session_id = Uuid::new_v4().to_string();
    info!(%session_id, "new sse connection");

    let hangup = CancellationToken::new();
    let (transport, events) = SseTransport::open(
        &session_id,
        &state.config.message_path,
        RelayToolServer::new(),
        hangup.clone(),
    );

    if let Err(err) = Session::start(session_id.clone(), transport, hangup, state.session_context()).await {
        error!(%session_id, %err, "session failed to start");
        return (StatusCode::SERVICE_UNAVAILABLE, "Relay broker unavailable").into_response();
    }

    let sse = Sse::new(events);
    match state.config.sse_keep_alive() {
        Some(interval) => sse.keep_alive(KeepAlive::new().interval(interval)).into_response(),
        None => sse.into_response(),
    }
}
