//! Submit endpoint: relay one POST into a session and answer with its
//! correlated response.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tracing::{error, info_span, warn, Instrument};
use uuid::Uuid;

use super::AppState;
use crate::relay::envelope::{headers_from_http, InboundRequestEnvelope};
use crate::relay::submit::{forward, SubmitOutcome};

/// Query string of a submit call.
#[derive(Debug, Deserialize)]
pub struct SubmitQuery {
    /// Target session.
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
}

/// Handler for `POST {message_path}?sessionId=...`.
///
/// The body is taken as raw bytes so that only the session decides what
/// a malformed body means; non-UTF-8 input is decoded lossily.
pub async fn submit_message(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SubmitQuery>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(session_id) = query.session_id.filter(|id| !id.is_empty()) else {
        return (StatusCode::BAD_REQUEST, "No sessionId provided").into_response();
    };

    let envelope = InboundRequestEnvelope {
        request_id: Uuid::new_v4().to_string(),
        method: method.to_string(),
        url: uri
            .path_and_query()
            .map_or_else(|| uri.path().to_owned(), ToString::to_string),
        headers: headers_from_http(&headers),
        body: Some(String::from_utf8_lossy(&body).into_owned()),
    };

    let span = info_span!("submit", %session_id, request_id = %envelope.request_id);
    let timeout = state.config.response_timeout();
    let outcome = forward(state.broker.as_ref(), &session_id, &envelope, timeout)
        .instrument(span)
        .await;

    match outcome {
        Ok(SubmitOutcome::Response(response)) => match StatusCode::from_u16(response.status) {
            Ok(status) => (status, response.body).into_response(),
            Err(_) => {
                warn!(%session_id, status = response.status, "session answered with an invalid status");
                (StatusCode::BAD_GATEWAY, "Invalid status from session").into_response()
            }
        },
        Ok(SubmitOutcome::TimedOut) => {
            (StatusCode::REQUEST_TIMEOUT, "Request timed out").into_response()
        }
        Err(err) => {
            error!(%session_id, %err, "failed to relay request");
            (StatusCode::SERVICE_UNAVAILABLE, "Relay broker unavailable").into_response()
        }
    }
}
