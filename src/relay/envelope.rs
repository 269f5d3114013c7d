//! Wire envelopes exchanged over broker channels.
//!
//! Field names are part of the interoperability contract with existing
//! deployments and must not change.

use std::collections::BTreeMap;

use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};

use crate::Result;

/// A header value as carried on the wire: one string or a list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum HeaderValue {
    /// Header seen once.
    Single(String),
    /// Header repeated on the original request.
    Multi(Vec<String>),
}

impl HeaderValue {
    /// Every value, in order.
    #[must_use]
    pub fn values(&self) -> Vec<&str> {
        match self {
            Self::Single(value) => vec![value.as_str()],
            Self::Multi(values) => values.iter().map(String::as_str).collect(),
        }
    }

    /// First value, if any.
    #[must_use]
    pub fn first(&self) -> Option<&str> {
        match self {
            Self::Single(value) => Some(value),
            Self::Multi(values) => values.first().map(String::as_str),
        }
    }
}

/// Header map keyed by lower-case header name.
pub type Headers = BTreeMap<String, HeaderValue>;

/// Collapse an HTTP header map into the wire representation.
///
/// Names are lower-cased by `http` already. Repeated headers become a
/// [`HeaderValue::Multi`]. Values that are not visible ASCII are decoded
/// lossily.
#[must_use]
pub fn headers_from_http(map: &HeaderMap) -> Headers {
    let mut headers = Headers::new();
    for name in map.keys() {
        let mut values: Vec<String> = map
            .get_all(name)
            .iter()
            .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
            .collect();
        let value = if values.len() == 1 {
            HeaderValue::Single(values.remove(0))
        } else {
            HeaderValue::Multi(values)
        };
        headers.insert(name.as_str().to_owned(), value);
    }
    headers
}

/// Request published on `requests:{sessionId}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InboundRequestEnvelope {
    /// Correlates the response channel; unique within the session.
    pub request_id: String,
    /// HTTP method of the original submit call.
    pub method: String,
    /// Request target of the original submit call, query included.
    pub url: String,
    /// Headers of the original submit call.
    #[serde(default)]
    pub headers: Headers,
    /// Raw request body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

impl InboundRequestEnvelope {
    /// Serialize for publishing.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Envelope` if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a payload received from the broker.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Envelope` for malformed JSON or missing fields.
    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// Response published on `responses:{sessionId}:{requestId}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutboundResponseEnvelope {
    /// HTTP status produced by the transport.
    pub status: u16,
    /// Response body produced by the transport.
    #[serde(default)]
    pub body: String,
}

impl OutboundResponseEnvelope {
    /// Serialize for publishing.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Envelope` if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a payload received from the broker.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Envelope` for malformed JSON or missing fields.
    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Whether the status counts as success (2xx or 3xx).
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..400).contains(&self.status)
    }
}
