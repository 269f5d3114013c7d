//! Submit side of the relay: publish one request, await its response.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::envelope::{InboundRequestEnvelope, OutboundResponseEnvelope};
use crate::broker::{requests_channel, responses_channel, RelayBroker};
use crate::Result;

/// How a submit call resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The session answered within the timeout.
    Response(OutboundResponseEnvelope),
    /// Nothing answered in time. The session may not exist, may have
    /// closed, or may be too slow; the broker cannot tell these apart.
    TimedOut,
}

/// Publish `envelope` into `session_id` and wait up to `timeout` for the
/// correlated response.
///
/// The timeout covers the whole call, broker round trips included. The
/// response subscription is in place before the publish. It lives
/// exactly as long as this future: dropping the future (caller hung up)
/// unsubscribes and abandons the wait. A malformed response payload is
/// logged and skipped.
///
/// # Errors
///
/// Returns `AppError::Broker` if subscribing or publishing fails, and
/// `AppError::Envelope` if the request cannot be serialized.
pub async fn forward(
    broker: &dyn RelayBroker,
    session_id: &str,
    envelope: &InboundRequestEnvelope,
    timeout: Duration,
) -> Result<SubmitOutcome> {
    let deadline = Instant::now() + timeout;
    let request_id = envelope.request_id.as_str();
    let response_channel = responses_channel(session_id, request_id);
    let payload = envelope.to_json()?;

    let Ok(subscribed) = tokio::time::timeout_at(deadline, broker.subscribe(&response_channel)).await else {
        warn!(session_id, request_id, "timed out subscribing for the response");
        return Ok(SubmitOutcome::TimedOut);
    };
    let mut subscription = subscribed?;

    let request_channel = requests_channel(session_id);
    let Ok(published) = tokio::time::timeout_at(deadline, broker.publish(&request_channel, payload)).await else {
        warn!(session_id, request_id, "timed out publishing the request");
        return Ok(SubmitOutcome::TimedOut);
    };
    let receivers = published?;
    info!(%request_channel, request_id, receivers, "published request");
    if receivers == 0 {
        debug!(session_id, "no session subscribed; expecting timeout");
    }

    let outcome = loop {
        let Ok(message) = tokio::time::timeout_at(deadline, subscription.next()).await else {
            warn!(session_id, request_id, "request timed out");
            break SubmitOutcome::TimedOut;
        };
        let Some(raw) = message else {
            // Broker side went away; nothing else can arrive before the
            // deadline, so report the same signal a silent session gives.
            warn!(session_id, request_id, "response subscription lost");
            tokio::time::sleep_until(deadline).await;
            break SubmitOutcome::TimedOut;
        };
        match OutboundResponseEnvelope::from_json(&raw) {
            Ok(response) => break SubmitOutcome::Response(response),
            Err(err) => warn!(%response_channel, %err, "dropping malformed response envelope"),
        }
    };

    subscription.unsubscribe();
    Ok(outcome)
}
