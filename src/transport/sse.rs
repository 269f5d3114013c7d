//! MCP server-sent-events transport.
//!
//! The outbound side is an SSE stream: an `endpoint` event telling the
//! client where to POST, then one `message` event per JSON-RPC message
//! produced by the protocol engine. The inbound side accepts replayed
//! POSTs and feeds their bodies to the engine over an in-memory pipe
//! using newline-delimited JSON.

use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::http::StatusCode;
use axum::response::sse::Event;
use futures_util::Stream;
use rmcp::service::{RoleServer, Service, ServiceExt};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

use super::PushTransport;
use crate::relay::synthetic::{CapturedResponse, SyntheticRequest};

/// In-memory pipe capacity between the transport and the engine.
const DUPLEX_CAPACITY: usize = 64 * 1024;

/// Outbound events buffered before the pump waits on the client.
const EVENT_BUFFER: usize = 64;

/// SSE transport bound to one session.
pub struct SseTransport {
    session_id: String,
    inbound: Mutex<Option<WriteHalf<DuplexStream>>>,
    closed: CancellationToken,
}

impl SseTransport {
    /// Start `service` behind a new transport.
    ///
    /// Returns the transport and the event stream to hand to the HTTP
    /// response. Dropping the stream (client hang-up) cancels `hangup`.
    pub fn open<S>(
        session_id: &str,
        message_path: &str,
        service: S,
        hangup: CancellationToken,
    ) -> (Arc<Self>, EventStream)
    where
        S: Service<RoleServer> + Send + 'static,
    {
        let (engine_io, relay_io) = tokio::io::duplex(DUPLEX_CAPACITY);
        let (engine_read, engine_write) = tokio::io::split(engine_io);
        let (relay_read, relay_write) = tokio::io::split(relay_io);
        let closed = CancellationToken::new();

        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        let endpoint = endpoint_url(message_path, session_id);

        spawn_engine(session_id.to_owned(), service, engine_read, engine_write, closed.clone());
        spawn_pump(session_id.to_owned(), endpoint, relay_read, events_tx, closed.clone());

        let transport = Arc::new(Self {
            session_id: session_id.to_owned(),
            inbound: Mutex::new(Some(relay_write)),
            closed,
        });
        let stream = EventStream {
            events: events_rx,
            _hangup: hangup.drop_guard(),
        };
        (transport, stream)
    }

    /// Session this transport belongs to.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    async fn forward(&self, line: &str) -> std::io::Result<()> {
        let mut inbound = self.inbound.lock().await;
        let Some(writer) = inbound.as_mut() else {
            return Err(std::io::ErrorKind::NotConnected.into());
        };
        let written = async {
            writer.write_all(line.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await
        };
        let result = tokio::select! {
            () = self.closed.cancelled() => Err(std::io::ErrorKind::NotConnected.into()),
            result = written => result,
        };
        if result.is_err() {
            *inbound = None;
        }
        result
    }
}

impl PushTransport for SseTransport {
    fn handle_inbound_message<'a>(
        &'a self,
        mut request: SyntheticRequest,
        response: &'a mut CapturedResponse,
    ) -> Pin<Box<dyn std::future::Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            if self.closed.is_cancelled() {
                response.respond(StatusCode::INTERNAL_SERVER_ERROR, "SSE connection not established");
                return;
            }

            let content_type = request.header("content-type").unwrap_or_default().to_owned();
            if !is_json_content_type(&content_type) {
                response.respond(
                    StatusCode::BAD_REQUEST,
                    &format!("Unsupported content-type: {content_type}"),
                );
                return;
            }

            let body = request.read_body_to_string();
            let message = match parse_message(&body) {
                Ok(message) => message,
                Err(reason) => {
                    response.respond(StatusCode::BAD_REQUEST, &format!("Invalid message: {reason}"));
                    return;
                }
            };

            if let Err(err) = self.forward(&message.to_string()).await {
                warn!(session_id = %self.session_id, %err, "failed to forward message to engine");
                response.respond(StatusCode::INTERNAL_SERVER_ERROR, "SSE connection not established");
                return;
            }

            response.respond(StatusCode::ACCEPTED, "Accepted");
        })
    }

    fn close(&self) {
        if !self.closed.is_cancelled() {
            debug!(session_id = %self.session_id, "closing sse transport");
        }
        self.closed.cancel();
        if let Ok(mut inbound) = self.inbound.try_lock() {
            inbound.take();
        }
    }

    fn closed(&self) -> Pin<Box<dyn std::future::Future<Output = ()> + Send + '_>> {
        Box::pin(self.closed.cancelled())
    }
}

/// SSE body handed to axum.
///
/// Ends when the transport closes. Dropping it before then signals a
/// client hang-up.
pub struct EventStream {
    events: mpsc::Receiver<Event>,
    _hangup: DropGuard,
}

impl Stream for EventStream {
    type Item = Result<Event, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.events.poll_recv(cx).map(|event| event.map(Ok))
    }
}

/// Data of the initial `endpoint` event.
#[must_use]
pub fn endpoint_url(message_path: &str, session_id: &str) -> String {
    format!("{message_path}?sessionId={session_id}")
}

fn is_json_content_type(value: &str) -> bool {
    value
        .split(';')
        .next()
        .is_some_and(|mime| mime.trim().eq_ignore_ascii_case("application/json"))
}

/// Validate a JSON-RPC 2.0 message body.
fn parse_message(body: &str) -> std::result::Result<serde_json::Value, String> {
    let value: serde_json::Value = serde_json::from_str(body).map_err(|err| err.to_string())?;
    match value.get("jsonrpc").and_then(serde_json::Value::as_str) {
        Some("2.0") => Ok(value),
        Some(other) => Err(format!("unsupported jsonrpc version {other}")),
        None => Err("expected a JSON-RPC 2.0 object".into()),
    }
}

fn spawn_engine<S>(
    session_id: String,
    service: S,
    read: ReadHalf<DuplexStream>,
    write: WriteHalf<DuplexStream>,
    closed: CancellationToken,
) where
    S: Service<RoleServer> + Send + 'static,
{
    tokio::spawn(async move {
        match service.serve_with_ct((read, write), closed.clone()).await {
            Ok(running) => {
                info!(%session_id, "protocol engine initialized");
                match running.waiting().await {
                    Ok(reason) => debug!(%session_id, ?reason, "protocol engine stopped"),
                    Err(err) => warn!(%session_id, %err, "protocol engine task failed"),
                }
            }
            Err(err) => debug!(%session_id, %err, "protocol engine ended before initialization"),
        }
        closed.cancel();
    });
}

/// Emit the `endpoint` event, then forward engine output until closed.
fn spawn_pump(
    session_id: String,
    endpoint: String,
    read: ReadHalf<DuplexStream>,
    events: mpsc::Sender<Event>,
    closed: CancellationToken,
) {
    tokio::spawn(async move {
        if events.send(Event::default().event("endpoint").data(endpoint)).await.is_err() {
            debug!(%session_id, "event stream dropped before endpoint event");
            return;
        }

        let mut lines = BufReader::new(read).lines();
        loop {
            let line = tokio::select! {
                () = closed.cancelled() => break,
                line = lines.next_line() => line,
            };
            match line {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(Some(line)) => {
                    if events.send(Event::default().event("message").data(line)).await.is_err() {
                        debug!(%session_id, "event stream dropped; stopping pump");
                        break;
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    warn!(%session_id, %err, "failed reading engine output");
                    break;
                }
            }
        }
    });
}
