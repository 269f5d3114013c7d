//! Integration tests for the SSE transport outside the HTTP stack.

use std::time::Duration;

use axum::http::StatusCode;
use futures_util::StreamExt;
use mcp_relay::mcp::RelayToolServer;
use mcp_relay::relay::envelope::{HeaderValue, Headers};
use mcp_relay::relay::synthetic::{CapturedResponse, SyntheticRequest};
use mcp_relay::transport::sse::SseTransport;
use mcp_relay::transport::PushTransport;
use tokio_util::sync::CancellationToken;

fn json_request(body: &str) -> SyntheticRequest {
    let mut headers = Headers::new();
    headers.insert("content-type".into(), HeaderValue::Single("application/json".into()));
    SyntheticRequest::builder()
        .method("POST")
        .url("/message?sessionId=t")
        .headers(headers)
        .body(body)
        .build()
}

#[tokio::test]
async fn accepted_message_reaches_engine() {
    let (transport, _events) =
        SseTransport::open("t-accept", "/message", RelayToolServer::new(), CancellationToken::new());

    let mut response = CapturedResponse::new();
    transport
        .handle_inbound_message(
            json_request(r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"2024-11-05","capabilities":{},"clientInfo":{"name":"t","version":"0"}}}"#),
            &mut response,
        )
        .await;

    assert_eq!(response.status(), Some(StatusCode::ACCEPTED));
    assert_eq!(response.body(), "Accepted");
    assert!(response.is_finished());
    transport.close();
}

#[tokio::test]
async fn closed_transport_answers_server_error() {
    let (transport, _events) =
        SseTransport::open("t-closed", "/message", RelayToolServer::new(), CancellationToken::new());
    transport.close();
    transport.close();

    let mut response = CapturedResponse::new();
    transport
        .handle_inbound_message(json_request(r#"{"jsonrpc":"2.0","method":"ping","id":1}"#), &mut response)
        .await;

    assert_eq!(response.status(), Some(StatusCode::INTERNAL_SERVER_ERROR));
    assert_eq!(response.body(), "SSE connection not established");
}

#[tokio::test]
async fn wrong_jsonrpc_version_is_rejected() {
    let (transport, _events) =
        SseTransport::open("t-version", "/message", RelayToolServer::new(), CancellationToken::new());

    let mut response = CapturedResponse::new();
    transport
        .handle_inbound_message(json_request(r#"{"jsonrpc":"1.0","id":1}"#), &mut response)
        .await;

    assert_eq!(response.status(), Some(StatusCode::BAD_REQUEST));
    assert!(response.body().starts_with("Invalid message"));
    transport.close();
}

#[tokio::test]
async fn event_stream_ends_after_close() {
    let (transport, mut events) =
        SseTransport::open("t-stream", "/message", RelayToolServer::new(), CancellationToken::new());

    // Endpoint event comes first.
    assert!(events.next().await.is_some());

    transport.close();
    let end = tokio::time::timeout(Duration::from_secs(5), async {
        while events.next().await.is_some() {}
    })
    .await;
    assert!(end.is_ok(), "stream ended");

    tokio::time::timeout(Duration::from_secs(1), transport.closed())
        .await
        .expect("closed resolves");
}

#[tokio::test]
async fn dropping_event_stream_signals_hang_up() {
    let hangup = CancellationToken::new();
    let (transport, events) =
        SseTransport::open("t-hangup", "/message", RelayToolServer::new(), hangup.clone());

    assert!(!hangup.is_cancelled());
    drop(events);
    assert!(hangup.is_cancelled());
    transport.close();
}
