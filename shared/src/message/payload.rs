//! Typed payloads carried inside [`BusMessage`](super::BusMessage) frames.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::order::{OrderKind, OrderStatus, OwnerClass};

/// Handshake payload (client -> server, first frame on a connection)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandshakePayload {
    /// Protocol version, must match the server's
    pub version: u16,
    /// Client name/identifier for logs
    pub client_name: Option<String>,
    /// Client unique id; server generates one when absent
    pub client_id: Option<String>,
}

/// Join/leave room payload (client -> server)
///
/// `owner_key` must match the order's owner, or carry the kitchen key
/// for dashboard clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinRoomPayload {
    pub order_id: String,
    pub owner_key: String,
}

/// Status transition event (server -> room members)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderUpdatePayload {
    pub order_id: String,
    /// Event name, `<owner_class>_<kind>_order_update`
    pub event: String,
    pub status: OrderStatus,
    /// Present on `cancelled` transitions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refund_amount: Option<Decimal>,
    /// Owner balance after a refund
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_balance: Option<Decimal>,
}

/// Fresh status query (client -> server)
///
/// Answered with a correlated Response carrying the current record, not
/// a replay of historical events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusQueryPayload {
    pub order_id: String,
}

/// Generic RPC response (server -> client)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsePayload {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

impl ResponsePayload {
    pub fn success(message: impl Into<String>, data: Option<serde_json::Value>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data,
            error_code: None,
        }
    }

    pub fn error(message: impl Into<String>, code: Option<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
            error_code: code,
        }
    }
}

/// Event name for status updates, scoped per owner class and order kind
pub fn update_event_name(owner_class: OwnerClass, kind: OrderKind) -> String {
    format!("{}_{}_order_update", owner_class, kind)
}

/// Room topic for an order
pub fn room_for_order(order_id: &str) -> String {
    format!("order:{}", order_id)
}
