//! Health check endpoint

use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::core::ServerState;

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub connected_clients: usize,
}

pub fn router() -> Router<ServerState> {
    Router::new().route("/api/health", get(health))
}

async fn health(
    axum::extract::State(state): axum::extract::State<ServerState>,
) -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "ok",
        connected_clients: state.bus.get_connected_clients().len(),
    })
}
