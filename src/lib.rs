#![forbid(unsafe_code)]

//! Stateless MCP SSE relay.
//!
//! Pairs long-lived server-sent-event sessions with short-lived submit
//! calls that may run in a different process, using a publish/subscribe
//! broker as the only shared medium.

pub mod broker;
pub mod config;
pub mod errors;
pub mod http;
pub mod mcp;
pub mod relay;
pub mod transport;

pub use config::RelayConfig;
pub use errors::{AppError, Result};
