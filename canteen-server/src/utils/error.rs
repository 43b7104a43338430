//! Unified error handling
//!
//! Application error enum and the API response envelope:
//! - [`AppError`] - error taxonomy for the order lifecycle
//! - [`AppResponse`] - unified JSON envelope
//!
//! # Error code ranges
//!
//! | Prefix | Category | Example |
//! |--------|----------|---------|
//! | E1xxx  | Validation / request errors | E1001 draft rejected |
//! | E2xxx  | Saga aborts | E2001 insufficient balance |
//! | E3xxx  | State machine | E3001 invalid transition |
//! | E0xxx  | System errors | E0001 storage error |

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use rust_decimal::Decimal;
use serde::Serialize;
use shared::order::OrderStatus;
use tracing::error;

/// Unified API response envelope
///
/// ```json
/// { "code": "0000", "message": "success", "data": { ... } }
/// ```
#[derive(Debug, Serialize)]
pub struct AppResponse<T> {
    /// Error code ("0000" means success)
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T: Serialize> AppResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: "0000".to_string(),
            message: "success".to_string(),
            data: Some(data),
        }
    }
}

/// Application error taxonomy
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // ========== Validation (rejected before any mutation) ==========
    /// Every violated constraint, not just the first
    #[error("Validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("Invalid request: {0}")]
    Invalid(String),

    // ========== Saga aborts (order marked failed) ==========
    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance {
        required: Decimal,
        available: Decimal,
    },

    #[error("Insufficient stock for {item}: requested {requested}, available {available}")]
    InsufficientStock {
        item: String,
        requested: u32,
        available: u32,
    },

    // ========== State machine ==========
    #[error("Invalid transition: {from} -> {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    #[error("Cancellation window expired")]
    WindowExpired,

    // ========== Access ==========
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    Forbidden(String),

    // ========== System ==========
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Client disconnected")]
    ClientDisconnected,
}

impl AppError {
    pub fn validation(violations: Vec<String>) -> Self {
        Self::Validation(violations)
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Stable machine-readable code for clients
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "E1001",
            Self::Invalid(_) => "E1002",
            Self::InsufficientBalance { .. } => "E2001",
            Self::InsufficientStock { .. } => "E2002",
            Self::InvalidTransition { .. } => "E3001",
            Self::WindowExpired => "E3002",
            Self::NotFound(_) => "E1404",
            Self::Forbidden(_) => "E1403",
            Self::Storage(_) => "E0001",
            Self::Internal(_) => "E0002",
            Self::ClientDisconnected => "E0003",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Validation(_) | AppError::Invalid(_) => StatusCode::BAD_REQUEST,
            AppError::InsufficientBalance { .. } | AppError::InsufficientStock { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            AppError::InvalidTransition { .. } | AppError::WindowExpired => StatusCode::CONFLICT,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Storage(_) | AppError::Internal(_) | AppError::ClientDisconnected => {
                error!("Internal error: {}", self);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = AppResponse::<serde_json::Value> {
            code: self.code().to_string(),
            message: self.to_string(),
            data: match &self {
                // Validation errors carry the full violation list
                AppError::Validation(violations) => {
                    Some(serde_json::json!({ "violations": violations }))
                }
                _ => None,
            },
        };

        (status, Json(body)).into_response()
    }
}

/// Result alias used across the server
pub type AppResult<T> = Result<T, AppError>;
