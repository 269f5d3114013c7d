//! Redis pub/sub broker.
//!
//! Publishing shares one multiplexed connection across the process.
//! Every subscription opens a dedicated pub/sub connection driven by a
//! forwarding task; the task unsubscribes and exits as soon as the
//! [`Subscription`] is dropped.

use std::future::Future;
use std::pin::Pin;

use ::redis::aio::MultiplexedConnection;
use ::redis::Client;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{RelayBroker, Subscription, SUBSCRIPTION_BUFFER};
use crate::{AppError, Result};

/// Broker backed by a Redis server.
#[derive(Clone)]
pub struct RedisBroker {
    client: Client,
    publisher: MultiplexedConnection,
}

impl RedisBroker {
    /// Connect to the Redis server at `url` and verify it answers `PING`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Broker` if the URL is invalid, the connection
    /// fails, or the server does not answer.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = Client::open(url)
            .map_err(|err| AppError::Broker(format!("invalid broker url: {err}")))?;
        let mut publisher = client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(|err| AppError::Broker(format!("failed to connect to broker: {err}")))?;

        let pong: String = ::redis::cmd("PING")
            .query_async::<_, String>(&mut publisher)
            .await?;
        info!(reply = %pong, "broker connection established");

        Ok(Self { client, publisher })
    }
}

impl RelayBroker for RedisBroker {
    fn publish<'a>(
        &'a self,
        channel: &'a str,
        payload: String,
    ) -> Pin<Box<dyn Future<Output = Result<usize>> + Send + 'a>> {
        Box::pin(async move {
            let mut conn = self.publisher.clone();
            let receivers: i64 = ::redis::cmd("PUBLISH")
                .arg(channel)
                .arg(payload)
                .query_async::<_, i64>(&mut conn)
                .await?;
            Ok(usize::try_from(receivers).unwrap_or_default())
        })
    }

    fn subscribe<'a>(
        &'a self,
        channel: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Subscription>> + Send + 'a>> {
        Box::pin(async move {
            let mut pubsub = self.client.get_async_connection().await?.into_pubsub();
            pubsub.subscribe(channel).await?;

            let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
            let channel_name = channel.to_owned();
            tokio::spawn(async move {
                {
                    let mut messages = pubsub.on_message();
                    loop {
                        tokio::select! {
                            () = tx.closed() => break,
                            message = messages.next() => {
                                let Some(message) = message else {
                                    warn!(channel = %channel_name, "broker subscription stream ended");
                                    break;
                                };
                                match message.get_payload::<String>() {
                                    Ok(payload) => {
                                        if tx.send(payload).await.is_err() {
                                            break;
                                        }
                                    }
                                    Err(err) => {
                                        warn!(channel = %channel_name, %err, "dropping non-text broker payload");
                                    }
                                }
                            }
                        }
                    }
                }
                if let Err(err) = pubsub.unsubscribe(&channel_name).await {
                    debug!(channel = %channel_name, %err, "unsubscribe on closed connection");
                }
            });

            Ok(Subscription::new(channel, rx))
        })
    }
}
