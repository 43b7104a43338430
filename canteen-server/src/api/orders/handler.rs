//! Order API handlers

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use shared::order::{OrderDraft, OrderRecord, OrderStatus};

use crate::core::ServerState;
use crate::orders::SubmitReceipt;
use crate::utils::{AppError, AppResponse, AppResult};

/// Header carrying the kitchen shared key
const KITCHEN_KEY_HEADER: &str = "x-kitchen-key";

/// Submit an order draft
pub async fn submit(
    State(state): State<ServerState>,
    Json(draft): Json<OrderDraft>,
) -> AppResult<Json<AppResponse<SubmitReceipt>>> {
    let receipt = state.orders.submit(draft).await?;
    Ok(Json(AppResponse::success(receipt)))
}

#[derive(Debug, Deserialize)]
pub struct CancelRequest {
    pub owner_key: String,
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub refund_amount: Decimal,
}

/// Cancel a pending order within its window
pub async fn cancel(
    State(state): State<ServerState>,
    Path(id): Path<String>,
    Json(request): Json<CancelRequest>,
) -> AppResult<Json<AppResponse<CancelResponse>>> {
    let refund_amount = state
        .orders
        .cancel(&id, &request.owner_key, Utc::now())
        .await?;
    Ok(Json(AppResponse::success(CancelResponse { refund_amount })))
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: OrderStatus,
}

/// Advance an order's status (kitchen/admin only)
pub async fn advance_status(
    State(state): State<ServerState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<StatusRequest>,
) -> AppResult<Json<AppResponse<OrderRecord>>> {
    let kitchen_key = headers
        .get(KITCHEN_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::forbidden("Missing kitchen key header"))?;

    let updated = state
        .orders
        .advance_status(&id, request.status, kitchen_key)
        .await?;
    Ok(Json(AppResponse::success(updated)))
}

/// Get an order by id
pub async fn get_by_id(
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> AppResult<Json<AppResponse<OrderRecord>>> {
    let order = state.orders.get_order(&id)?;
    Ok(Json(AppResponse::success(order)))
}
