//! Order API
//!
//! Submission, cancellation, kitchen advancement, and lookup. All
//! mutations go through the OrdersManager.

mod handler;

use axum::routing::{get, patch, post};
use axum::Router;

use crate::core::ServerState;

pub fn router() -> Router<ServerState> {
    Router::new().nest("/api/orders", routes())
}

fn routes() -> Router<ServerState> {
    Router::new()
        .route("/", post(handler::submit))
        .route("/{id}", get(handler::get_by_id))
        .route("/{id}/cancel", post(handler::cancel))
        .route("/{id}/status", patch(handler::advance_status))
}
