//! In-process broker for single-node development and tests.
//!
//! Selected with a `memory://` broker URL. Delivery semantics mirror
//! Redis pub/sub: only subscribers present at publish time receive the
//! message, and publishing never waits on a slow subscriber. A message
//! that finds a subscriber's buffer full is dropped for that subscriber.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use tokio::sync::mpsc;
use tracing::{trace, warn};

use super::{RelayBroker, Subscription, SUBSCRIPTION_BUFFER};
use crate::Result;

/// Channel map guarded by a plain mutex; no await happens while held.
#[derive(Debug, Default)]
pub struct MemoryBroker {
    channels: Mutex<HashMap<String, Vec<mpsc::Sender<String>>>>,
}

impl MemoryBroker {
    /// Create an empty broker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live subscribers on `channel`.
    #[must_use]
    pub fn subscriber_count(&self, channel: &str) -> usize {
        let mut channels = self
            .channels
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        prune(&mut channels, channel);
        channels.get(channel).map_or(0, Vec::len)
    }

    /// Snapshot the live senders for `channel`, dropping closed ones.
    fn live_senders(&self, channel: &str) -> Vec<mpsc::Sender<String>> {
        let mut channels = self
            .channels
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        prune(&mut channels, channel);
        channels.get(channel).cloned().unwrap_or_default()
    }
}

fn prune(channels: &mut HashMap<String, Vec<mpsc::Sender<String>>>, channel: &str) {
    if let Some(senders) = channels.get_mut(channel) {
        senders.retain(|tx| !tx.is_closed());
        if senders.is_empty() {
            channels.remove(channel);
        }
    }
}

impl RelayBroker for MemoryBroker {
    fn publish<'a>(
        &'a self,
        channel: &'a str,
        payload: String,
    ) -> Pin<Box<dyn Future<Output = Result<usize>> + Send + 'a>> {
        Box::pin(async move {
            let mut delivered = 0;
            for tx in self.live_senders(channel) {
                match tx.try_send(payload.clone()) {
                    Ok(()) => delivered += 1,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        warn!(channel, "subscriber buffer full; dropping message");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {}
                }
            }
            trace!(channel, delivered, "memory publish");
            Ok(delivered)
        })
    }

    fn subscribe<'a>(
        &'a self,
        channel: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Subscription>> + Send + 'a>> {
        Box::pin(async move {
            let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
            self.channels
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .entry(channel.to_owned())
                .or_default()
                .push(tx);
            trace!(channel, "memory subscribe");
            Ok(Subscription::new(channel, rx))
        })
    }
}
