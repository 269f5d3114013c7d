//! Broker-mediated relay between push channels and submit calls.

pub mod envelope;
pub mod log_buffer;
pub mod registry;
pub mod session;
pub mod submit;
pub mod synthetic;
