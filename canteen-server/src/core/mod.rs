//! Core module - configuration, state, server
//!
//! - [`Config`] - environment-driven configuration
//! - [`ServerState`] - shared service handles
//! - [`Server`] - HTTP + message bus startup

pub mod config;
pub mod server;
pub mod state;

pub use config::Config;
pub use server::Server;
pub use state::ServerState;
