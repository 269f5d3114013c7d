//! Publish/subscribe broker abstraction.
//!
//! The [`RelayBroker`] trait is the only path between the streaming side
//! and the submit side of the relay. Implementations must deliver every
//! message published on a channel to each subscriber active at publish
//! time (at-least-once). Nothing is retained for channels without
//! subscribers.

pub mod memory;
pub mod redis;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::Result;

/// URL scheme selecting the in-process [`memory::MemoryBroker`].
pub const MEMORY_SCHEME: &str = "memory://";

/// Buffered messages per subscription. When full, the Redis forwarder
/// waits and the memory broker drops.
pub const SUBSCRIPTION_BUFFER: usize = 64;

/// Channel carrying inbound request envelopes for one session.
#[must_use]
pub fn requests_channel(session_id: &str) -> String {
    format!("requests:{session_id}")
}

/// Channel carrying the single response envelope for one request.
#[must_use]
pub fn responses_channel(session_id: &str, request_id: &str) -> String {
    format!("responses:{session_id}:{request_id}")
}

/// Connect to the broker named by `url`.
///
/// `memory://` selects the in-process broker, which only relays between
/// endpoints of the same process. Any other URL is handed to Redis.
///
/// # Errors
///
/// Returns `AppError::Broker` if the Redis connection cannot be
/// established.
pub async fn connect(url: &str) -> Result<Arc<dyn RelayBroker>> {
    if url.starts_with(MEMORY_SCHEME) {
        warn!("using in-process memory broker; submit calls must reach this process");
        return Ok(Arc::new(memory::MemoryBroker::new()));
    }
    let broker = self::redis::RedisBroker::connect(url).await?;
    info!("redis broker ready");
    Ok(Arc::new(broker))
}

/// Publish/subscribe capability shared by all sessions and submit calls.
///
/// Implementations are cheap to share behind an [`std::sync::Arc`] and
/// accept concurrent calls without external locking.
pub trait RelayBroker: Send + Sync {
    /// Publish `payload` on `channel`.
    ///
    /// Resolves to the number of subscribers that received the message.
    /// Zero is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Broker`](crate::AppError::Broker) if the broker
    /// rejects the publish or the connection fails.
    fn publish<'a>(
        &'a self,
        channel: &'a str,
        payload: String,
    ) -> Pin<Box<dyn Future<Output = Result<usize>> + Send + 'a>>;

    /// Subscribe to `channel`.
    ///
    /// Resolves once the broker has acknowledged the subscription, so a
    /// publish issued afterwards is guaranteed to be observed.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Broker`](crate::AppError::Broker) if the
    /// subscription cannot be established.
    fn subscribe<'a>(
        &'a self,
        channel: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Subscription>> + Send + 'a>>;
}

/// Live subscription to one broker channel.
///
/// Dropping the value unsubscribes: the broker side observes the closed
/// receiver and releases its end.
#[derive(Debug)]
pub struct Subscription {
    channel: String,
    messages: mpsc::Receiver<String>,
}

impl Subscription {
    /// Wrap the receiving half fed by a broker implementation.
    #[must_use]
    pub fn new(channel: impl Into<String>, messages: mpsc::Receiver<String>) -> Self {
        Self {
            channel: channel.into(),
            messages,
        }
    }

    /// Channel this subscription listens on.
    #[must_use]
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Wait for the next payload.
    ///
    /// Returns `None` once the broker side has gone away.
    pub async fn next(&mut self) -> Option<String> {
        self.messages.recv().await
    }

    /// Explicitly end the subscription.
    pub fn unsubscribe(self) {
        tracing::debug!(channel = %self.channel, "unsubscribed");
    }
}
