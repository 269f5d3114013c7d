//! Model Context Protocol engine.

pub mod server;

pub use server::RelayToolServer;
