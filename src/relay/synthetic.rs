//! In-memory request/response stand-ins for replaying a submitted call.
//!
//! A session replays each inbound envelope against its push transport as
//! if the call had arrived on a real connection. [`SyntheticRequest`]
//! carries the request side and [`CapturedResponse`] records what the
//! transport answers.

use axum::http::StatusCode;
use bytes::Bytes;
use futures_util::stream::{self, Stream};

use super::envelope::{Headers, InboundRequestEnvelope, OutboundResponseEnvelope};

/// Status reported when the transport finished without setting one.
pub const DEFAULT_STATUS: StatusCode = StatusCode::OK;

/// Connection identity of a synthetic request.
///
/// Replayed requests have no socket; the variant only marks where the
/// request came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Peer {
    /// Delivered through the broker relay.
    Relayed,
}

/// Body accepted by [`SyntheticRequestBuilder::body`].
#[derive(Debug, Clone, PartialEq)]
pub enum SyntheticBody {
    /// Raw text, forwarded untouched.
    Text(String),
    /// Structured value, serialized to JSON on build.
    Json(serde_json::Value),
}

impl From<String> for SyntheticBody {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for SyntheticBody {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<serde_json::Value> for SyntheticBody {
    fn from(value: serde_json::Value) -> Self {
        Self::Json(value)
    }
}

/// Request reconstructed from an [`InboundRequestEnvelope`].
#[derive(Debug)]
pub struct SyntheticRequest {
    method: String,
    url: String,
    headers: Headers,
    body: Option<Bytes>,
}

impl SyntheticRequest {
    /// Start building a request; defaults to `GET /` with no body.
    #[must_use]
    pub fn builder() -> SyntheticRequestBuilder {
        SyntheticRequestBuilder::default()
    }

    /// Rebuild the request carried by an envelope.
    #[must_use]
    pub fn from_envelope(envelope: InboundRequestEnvelope) -> Self {
        let mut builder = Self::builder()
            .method(envelope.method)
            .url(envelope.url)
            .headers(envelope.headers);
        if let Some(body) = envelope.body {
            builder = builder.body(body);
        }
        builder.build()
    }

    /// HTTP method.
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Request target, query included.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Request headers.
    #[must_use]
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// First value of the named header (case-insensitive).
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .and_then(|(_, value)| value.first())
    }

    /// Inert placeholder for the originating connection.
    #[must_use]
    pub fn peer(&self) -> Peer {
        Peer::Relayed
    }

    /// Take the body as a stream: one chunk, then end-of-stream.
    ///
    /// The body can be read once; later calls yield an empty stream.
    pub fn take_body_stream(&mut self) -> impl Stream<Item = Bytes> + Send + Unpin {
        stream::iter(self.body.take())
    }

    /// Take the body as UTF-8 text (lossy); empty once consumed.
    pub fn read_body_to_string(&mut self) -> String {
        self.body
            .take()
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
            .unwrap_or_default()
    }
}

/// Builder for [`SyntheticRequest`]; building never fails.
#[derive(Debug)]
pub struct SyntheticRequestBuilder {
    method: String,
    url: String,
    headers: Headers,
    body: Option<SyntheticBody>,
}

impl Default for SyntheticRequestBuilder {
    fn default() -> Self {
        Self {
            method: "GET".into(),
            url: "/".into(),
            headers: Headers::new(),
            body: None,
        }
    }
}

impl SyntheticRequestBuilder {
    /// Set the HTTP method.
    #[must_use]
    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    /// Set the request target.
    #[must_use]
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Replace the header map.
    #[must_use]
    pub fn headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    /// Set the body from text or a JSON value.
    #[must_use]
    pub fn body(mut self, body: impl Into<SyntheticBody>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Finish the request.
    #[must_use]
    pub fn build(self) -> SyntheticRequest {
        let body = self
            .body
            .map(|body| match body {
                SyntheticBody::Text(text) => text,
                SyntheticBody::Json(value) => value.to_string(),
            })
            .filter(|text| !text.is_empty())
            .map(Bytes::from);

        SyntheticRequest {
            method: self.method,
            url: self.url,
            headers: self.headers,
            body,
        }
    }
}

/// Write-only response that records instead of transmitting.
#[derive(Debug, Default)]
pub struct CapturedResponse {
    status: Option<StatusCode>,
    body: String,
    finished: bool,
}

impl CapturedResponse {
    /// Create an empty capture with no status set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a status; the last call wins.
    pub fn set_status(&mut self, status: StatusCode) {
        self.status = Some(status);
    }

    /// Append a body chunk.
    pub fn write(&mut self, chunk: &str) {
        self.body.push_str(chunk);
    }

    /// Append an optional final chunk and mark the response finished.
    pub fn end(&mut self, chunk: Option<&str>) {
        if let Some(chunk) = chunk {
            self.write(chunk);
        }
        self.finished = true;
    }

    /// Convenience: set status, write `body`, and finish.
    pub fn respond(&mut self, status: StatusCode, body: &str) {
        self.set_status(status);
        self.end(Some(body));
    }

    /// Captured status, `None` if the transport never set one.
    #[must_use]
    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    /// Concatenation of every written chunk.
    #[must_use]
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Whether [`CapturedResponse::end`] was called.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Convert into the wire response; an unset status becomes
    /// [`DEFAULT_STATUS`].
    #[must_use]
    pub fn into_envelope(self) -> OutboundResponseEnvelope {
        OutboundResponseEnvelope {
            status: self.status.unwrap_or(DEFAULT_STATUS).as_u16(),
            body: self.body,
        }
    }
}
