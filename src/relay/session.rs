//! Session lifecycle: the streaming side of the relay.
//!
//! A session owns one push transport, one subscription on
//! `requests:{id}`, and one deferred log buffer. It relays every inbound
//! envelope through the transport and publishes the captured outcome on
//! the per-request response channel. It ends on the first of:
//! - the duration limit elapsing,
//! - the client hanging up,
//! - the transport closing itself,
//! - an explicit close or process shutdown.
//!
//! Teardown funnels through one guarded path and runs at most once.

use std::fmt::{Display, Formatter};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

use super::envelope::InboundRequestEnvelope;
use super::log_buffer::{DeferredLog, LogFlusher};
use super::registry::SessionRegistry;
use super::synthetic::{CapturedResponse, SyntheticRequest};
use crate::broker::{requests_channel, responses_channel, RelayBroker, Subscription};
use crate::transport::PushTransport;
use crate::Result;

const INITIAL_RESUBSCRIBE_DELAY: Duration = Duration::from_secs(1);
const MAX_RESUBSCRIBE_DELAY: Duration = Duration::from_secs(30);

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Relaying messages.
    Active,
    /// Teardown in progress.
    Closing,
    /// All resources released.
    Closed,
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The duration limit elapsed.
    MaxDuration,
    /// The client dropped the event stream.
    ClientHangUp,
    /// The transport closed on its own.
    TransportClosed,
    /// Explicit close or process shutdown.
    Shutdown,
}

impl Display for CloseReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MaxDuration => write!(f, "max duration reached"),
            Self::ClientHangUp => write!(f, "client hang up"),
            Self::TransportClosed => write!(f, "transport closed"),
            Self::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// Process-wide collaborators a session runs against.
#[derive(Clone)]
pub struct SessionContext {
    /// Broker shared by every session and submit call.
    pub broker: Arc<dyn RelayBroker>,
    /// Live-session bookkeeping.
    pub registry: Arc<SessionRegistry>,
    /// Time from start until the session closes itself.
    pub lifetime: Duration,
    /// Deferred log flush cadence.
    pub flush_interval: Duration,
}

/// The long-lived unit of work bound to one push channel.
pub struct Session {
    id: String,
    started_at: DateTime<Utc>,
    transport: Arc<dyn PushTransport>,
    log: DeferredLog,
    state: Mutex<SessionState>,
    stop: CancellationToken,
}

impl Session {
    /// Subscribe `transport` to `requests:{id}` and start the session.
    ///
    /// Returns once the subscription is acknowledged, so envelopes
    /// published afterwards are relayed. The join handle resolves to the
    /// close reason after teardown has completed. `hangup` is the
    /// client-disconnect signal of the outbound connection.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Broker` if the initial subscription fails. The
    /// transport is closed before returning.
    pub async fn start(
        id: String,
        transport: Arc<dyn PushTransport>,
        hangup: CancellationToken,
        ctx: SessionContext,
    ) -> Result<(Arc<Self>, JoinHandle<CloseReason>)> {
        let span = info_span!("session", session_id = %id);

        let channel = requests_channel(&id);
        let subscription = match ctx.broker.subscribe(&channel).await {
            Ok(subscription) => subscription,
            Err(err) => {
                error!(parent: &span, %err, %channel, "failed to subscribe; closing transport");
                transport.close();
                return Err(err);
            }
        };
        info!(parent: &span, %channel, "subscribed");

        let (log, flusher) = DeferredLog::channel();
        let session = Arc::new(Self {
            id,
            started_at: Utc::now(),
            transport,
            log,
            state: Mutex::new(SessionState::Active),
            stop: CancellationToken::new(),
        });
        ctx.registry.insert(Arc::clone(&session));

        let handle = tokio::spawn(
            Arc::clone(&session)
                .lifecycle(ctx, hangup, subscription, flusher)
                .instrument(span),
        );
        Ok((session, handle))
    }

    /// Session identifier; also the broker channel namespace root.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// When the session started.
    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Ask the session to close with [`CloseReason::Shutdown`]. Idempotent.
    pub fn close(&self) {
        self.stop.cancel();
    }

    async fn lifecycle(
        self: Arc<Self>,
        ctx: SessionContext,
        hangup: CancellationToken,
        subscription: Subscription,
        flusher: LogFlusher,
    ) -> CloseReason {
        let flush_stop = CancellationToken::new();
        let flush_task = flusher.spawn_traced(ctx.flush_interval, flush_stop.clone(), Span::current());

        let worker_stop = CancellationToken::new();
        let worker = tokio::spawn(
            relay_worker(
                Arc::clone(&self),
                Arc::clone(&ctx.broker),
                subscription,
                worker_stop.clone(),
            )
            .in_current_span(),
        );

        let deadline = tokio::time::sleep(ctx.lifetime);
        tokio::pin!(deadline);

        let reason = tokio::select! {
            () = &mut deadline => CloseReason::MaxDuration,
            () = hangup.cancelled() => CloseReason::ClientHangUp,
            () = self.transport.closed() => CloseReason::TransportClosed,
            () = self.stop.cancelled() => CloseReason::Shutdown,
        };
        info!(%reason, "session closing");

        self.teardown(&ctx.registry, Teardown {
            flush_stop,
            flush_task,
            worker_stop,
            worker,
        })
        .await;
        reason
    }

    /// Move `Active -> Closing`; only the caller that wins may tear down.
    fn begin_close(&self) -> bool {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if *state == SessionState::Active {
            *state = SessionState::Closing;
            true
        } else {
            false
        }
    }

    async fn teardown(&self, registry: &SessionRegistry, parts: Teardown) {
        if !self.begin_close() {
            debug!("teardown already performed");
            return;
        }

        // Stop taking new envelopes. An in-flight one is abandoned and its
        // caller times out.
        parts.worker_stop.cancel();
        self.transport.close();
        if let Err(err) = parts.worker.await {
            warn!(%err, "relay worker ended abnormally");
        }

        parts.flush_stop.cancel();
        if let Err(err) = parts.flush_task.await {
            warn!(%err, "log flusher ended abnormally");
        }

        *self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = SessionState::Closed;
        registry.remove(&self.id);
        info!("session closed");
    }

    /// Relay one broker payload through the transport and publish the
    /// correlated response.
    async fn relay(&self, broker: &dyn RelayBroker, payload: &str) {
        let envelope = match InboundRequestEnvelope::from_json(payload) {
            Ok(envelope) => envelope,
            Err(err) => {
                self.log.error(format!("dropping malformed request envelope: {err}"));
                return;
            }
        };
        let request_id = envelope.request_id.clone();
        self.log.debug(format!(
            "received request {}:{request_id} ({} {})",
            self.id, envelope.method, envelope.url
        ));

        let request = SyntheticRequest::from_envelope(envelope);
        let mut captured = CapturedResponse::new();
        self.transport
            .handle_inbound_message(request, &mut captured)
            .await;
        if captured.status().is_none() {
            self.log.warn(format!(
                "transport left status unset for {}:{request_id}; reporting default",
                self.id
            ));
        }

        let reply = captured.into_envelope();
        let channel = responses_channel(&self.id, &request_id);
        let published = match reply.to_json() {
            Ok(payload) => broker.publish(&channel, payload).await,
            Err(err) => Err(err),
        };
        match published {
            Ok(0) => self.log.warn(format!(
                "response for {}:{request_id} had no listener (caller gone or timed out)",
                self.id
            )),
            Ok(_) => {}
            Err(err) => {
                self.log.error(format!(
                    "failed to publish response for {}:{request_id}: {err}",
                    self.id
                ));
                return;
            }
        }

        if reply.is_success() {
            self.log.info(format!(
                "Request {}:{request_id} succeeded: {}",
                self.id, reply.body
            ));
        } else {
            self.log.error(format!(
                "Message for {}:{request_id} failed with status {}: {}",
                self.id, reply.status, reply.body
            ));
        }
    }
}

/// Resources released by [`Session::teardown`].
struct Teardown {
    flush_stop: CancellationToken,
    flush_task: JoinHandle<()>,
    worker_stop: CancellationToken,
    worker: JoinHandle<()>,
}

/// Serially relay envelopes until `stop` fires.
///
/// `stop` also cancels the envelope in flight, so the worker always
/// joins promptly.
///
/// A lost subscription is re-established with exponential backoff; the
/// session itself stays open meanwhile.
async fn relay_worker(
    session: Arc<Session>,
    broker: Arc<dyn RelayBroker>,
    mut subscription: Subscription,
    stop: CancellationToken,
) {
    loop {
        let payload = tokio::select! {
            () = stop.cancelled() => break,
            payload = subscription.next() => payload,
        };
        if let Some(payload) = payload {
            // A transport that never answers must not hold up teardown.
            tokio::select! {
                () = session.relay(broker.as_ref(), &payload) => continue,
                () = stop.cancelled() => {
                    session.log.warn("abandoning in-flight request on close");
                    break;
                }
            }
        }

        let channel = subscription.channel().to_owned();
        session
            .log
            .warn(format!("subscription to {channel} lost; resubscribing"));
        match resubscribe(broker.as_ref(), &channel, &session.log, &stop).await {
            Some(fresh) => subscription = fresh,
            None => break,
        }
    }
    subscription.unsubscribe();
}

async fn resubscribe(
    broker: &dyn RelayBroker,
    channel: &str,
    log: &DeferredLog,
    stop: &CancellationToken,
) -> Option<Subscription> {
    let mut delay = INITIAL_RESUBSCRIBE_DELAY;
    loop {
        tokio::select! {
            () = stop.cancelled() => return None,
            () = tokio::time::sleep(delay) => {}
        }
        match broker.subscribe(channel).await {
            Ok(subscription) => {
                log.info(format!("resubscribed to {channel}"));
                return Some(subscription);
            }
            Err(err) => {
                log.error(format!("resubscribe to {channel} failed: {err}"));
                delay = (delay * 2).min(MAX_RESUBSCRIBE_DELAY);
            }
        }
    }
}
