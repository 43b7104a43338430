//! HTTP API routes
//!
//! # Structure
//!
//! - [`health`] - liveness probe
//! - [`orders`] - order lifecycle endpoints

pub mod health;
pub mod orders;

pub use crate::utils::{AppResponse, AppResult};

use axum::Router;

use crate::core::ServerState;

/// Assemble the full API router
pub fn router() -> Router<ServerState> {
    Router::new()
        .merge(health::router())
        .merge(orders::router())
}
