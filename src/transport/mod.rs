//! Push-channel transport abstraction.
//!
//! A session owns exactly one [`PushTransport`]. The relay replays
//! submitted calls into it and watches it for self-closure; framing of the
//! outbound stream is entirely the transport's business.

pub mod sse;

use std::future::Future;
use std::pin::Pin;

use crate::relay::synthetic::{CapturedResponse, SyntheticRequest};

/// Capabilities the relay needs from a push-channel transport.
pub trait PushTransport: Send + Sync {
    /// Handle one submitted call as if it arrived on a real connection,
    /// writing the outcome to `response`.
    ///
    /// Implementations must tolerate being called after [`close`](Self::close)
    /// and answer with an error status rather than panic.
    fn handle_inbound_message<'a>(
        &'a self,
        request: SyntheticRequest,
        response: &'a mut CapturedResponse,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

    /// Close the transport and terminate its outbound stream. Idempotent.
    fn close(&self);

    /// Resolves once the transport has closed, whether through
    /// [`close`](Self::close) or on its own.
    fn closed(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}
