use axum::http::StatusCode;
use futures_util::StreamExt;
use mcp_relay::relay::envelope::{HeaderValue, Headers, InboundRequestEnvelope};
use mcp_relay::relay::synthetic::{CapturedResponse, Peer, SyntheticRequest, DEFAULT_STATUS};

#[test]
fn builder_defaults_to_get_root() {
    let request = SyntheticRequest::builder().build();
    assert_eq!(request.method(), "GET");
    assert_eq!(request.url(), "/");
    assert!(request.headers().is_empty());
    assert_eq!(request.peer(), Peer::Relayed);
}

#[tokio::test]
async fn body_streams_as_one_chunk_then_ends() {
    let mut request = SyntheticRequest::builder()
        .method("POST")
        .url("/message")
        .body("hello")
        .build();

    let mut stream = request.take_body_stream();
    assert_eq!(stream.next().await.as_deref(), Some(&b"hello"[..]));
    assert_eq!(stream.next().await, None);
    drop(stream);

    // Consumed: a second read sees nothing.
    assert_eq!(request.read_body_to_string(), "");
}

#[tokio::test]
async fn empty_body_ends_immediately() {
    let mut request = SyntheticRequest::builder().body("").build();
    let mut stream = request.take_body_stream();
    assert_eq!(stream.next().await, None);
}

#[test]
fn structured_body_is_serialized() {
    let mut request = SyntheticRequest::builder()
        .body(serde_json::json!({"jsonrpc": "2.0", "id": 1}))
        .build();
    let body: serde_json::Value =
        serde_json::from_str(&request.read_body_to_string()).expect("json body");
    assert_eq!(body["id"], 1);
}

#[test]
fn from_envelope_carries_every_field() {
    let mut headers = Headers::new();
    headers.insert("Content-Type".into(), HeaderValue::Single("application/json".into()));
    let envelope = InboundRequestEnvelope {
        request_id: "r-1".into(),
        method: "POST".into(),
        url: "/message?sessionId=s".into(),
        headers,
        body: Some("{}".into()),
    };

    let mut request = SyntheticRequest::from_envelope(envelope);
    assert_eq!(request.method(), "POST");
    assert_eq!(request.url(), "/message?sessionId=s");
    assert_eq!(request.header("content-type"), Some("application/json"));
    assert_eq!(request.header("x-missing"), None);
    assert_eq!(request.read_body_to_string(), "{}");
}

#[test]
fn captured_response_concatenates_chunks() {
    let mut response = CapturedResponse::new();
    response.set_status(StatusCode::CREATED);
    response.write("hel");
    response.write("lo");
    assert!(!response.is_finished());
    response.end(Some(" world"));

    assert!(response.is_finished());
    assert_eq!(response.body(), "hello world");
    let envelope = response.into_envelope();
    assert_eq!(envelope.status, 201);
    assert_eq!(envelope.body, "hello world");
}

#[test]
fn last_status_wins() {
    let mut response = CapturedResponse::new();
    response.set_status(StatusCode::OK);
    response.set_status(StatusCode::BAD_REQUEST);
    assert_eq!(response.status(), Some(StatusCode::BAD_REQUEST));
}

#[test]
fn unset_status_reports_default() {
    let mut response = CapturedResponse::new();
    response.end(Some("done"));
    assert_eq!(response.status(), None);

    let envelope = response.into_envelope();
    assert_eq!(envelope.status, DEFAULT_STATUS.as_u16());
    assert_eq!(envelope.status, 200);
    assert_eq!(envelope.body, "done");
}
