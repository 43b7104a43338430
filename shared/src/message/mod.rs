//! Message bus protocol shared by server and clients.
//!
//! Messages travel over in-process (memory) or network (TCP) transports
//! using a fixed frame: 1-byte event type, 16-byte request id, 16-byte
//! correlation id (nil = none), 2-byte LE room length + room name,
//! 4-byte LE payload length, JSON payload.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

use uuid::Uuid;

pub mod payload;
pub use payload::*;

/// Protocol version, checked during handshake
pub const PROTOCOL_VERSION: u16 = 1;

/// Bus event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    /// Client handshake (first message on a connection)
    Handshake = 0,
    /// Join an order room
    JoinRoom = 1,
    /// Leave an order room
    LeaveRoom = 2,
    /// Order status transition (server -> room members)
    OrderUpdate = 3,
    /// Fresh status query (client -> server, answered with Response)
    StatusQuery = 4,
    /// Correlated RPC response
    Response = 5,
}

/// Byte on the wire that maps to no known event type
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Unknown event type byte: {0}")]
pub struct UnknownEventType(pub u8);

impl TryFrom<u8> for EventType {
    type Error = UnknownEventType;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(EventType::Handshake),
            1 => Ok(EventType::JoinRoom),
            2 => Ok(EventType::LeaveRoom),
            3 => Ok(EventType::OrderUpdate),
            4 => Ok(EventType::StatusQuery),
            5 => Ok(EventType::Response),
            _ => Err(UnknownEventType(value)),
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventType::Handshake => write!(f, "handshake"),
            EventType::JoinRoom => write!(f, "join_room"),
            EventType::LeaveRoom => write!(f, "leave_room"),
            EventType::OrderUpdate => write!(f, "order_update"),
            EventType::StatusQuery => write!(f, "status_query"),
            EventType::Response => write!(f, "response"),
        }
    }
}

/// Message bus frame
///
/// `target` addresses a single client (unicast). `room` scopes the
/// message to members of one order room. Both unset means broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusMessage {
    pub request_id: Uuid,
    pub event_type: EventType,
    /// Sending client id, injected server-side (source tracking)
    pub source: Option<String>,
    /// Request id this message responds to (RPC)
    pub correlation_id: Option<Uuid>,
    /// Unicast target client id
    pub target: Option<String>,
    /// Room scope (delivered only to room members)
    pub room: Option<String>,
    pub payload: Vec<u8>,
}

impl BusMessage {
    pub fn new(event_type: EventType, payload: Vec<u8>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            event_type,
            source: None,
            correlation_id: None,
            target: None,
            room: None,
            payload,
        }
    }

    /// Address a single client
    pub fn with_target(mut self, target: &str) -> Self {
        self.target = Some(target.to_string());
        self
    }

    /// Scope to a room
    pub fn with_room(mut self, room: &str) -> Self {
        self.room = Some(room.to_string());
        self
    }

    /// Attach a correlation id (RPC response)
    pub fn with_correlation_id(mut self, id: Uuid) -> Self {
        self.correlation_id = Some(id);
        self
    }

    pub fn handshake(payload: &HandshakePayload) -> Self {
        Self::new(
            EventType::Handshake,
            serde_json::to_vec(payload).expect("Failed to serialize handshake payload"),
        )
    }

    pub fn join_room(payload: &JoinRoomPayload) -> Self {
        Self::new(
            EventType::JoinRoom,
            serde_json::to_vec(payload).expect("Failed to serialize join payload"),
        )
    }

    pub fn leave_room(payload: &JoinRoomPayload) -> Self {
        Self::new(
            EventType::LeaveRoom,
            serde_json::to_vec(payload).expect("Failed to serialize leave payload"),
        )
    }

    pub fn order_update(payload: &OrderUpdatePayload) -> Self {
        Self::new(
            EventType::OrderUpdate,
            serde_json::to_vec(payload).expect("Failed to serialize order update"),
        )
    }

    pub fn status_query(payload: &StatusQueryPayload) -> Self {
        Self::new(
            EventType::StatusQuery,
            serde_json::to_vec(payload).expect("Failed to serialize status query"),
        )
    }

    pub fn response(payload: &ResponsePayload) -> Self {
        Self::new(
            EventType::Response,
            serde_json::to_vec(payload).expect("Failed to serialize response payload"),
        )
    }

    /// Parse the payload as a typed struct
    pub fn parse_payload<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::{OrderKind, OrderStatus, OwnerClass};

    #[test]
    fn test_event_type_roundtrip() {
        for raw in 0u8..=5 {
            let et = EventType::try_from(raw).unwrap();
            assert_eq!(et as u8, raw);
        }
        assert!(EventType::try_from(6).is_err());
    }

    #[test]
    fn test_handshake_message() {
        let payload = HandshakePayload {
            version: PROTOCOL_VERSION,
            client_name: Some("test-client".to_string()),
            client_id: None,
        };

        let msg = BusMessage::handshake(&payload);
        assert_eq!(msg.event_type, EventType::Handshake);
        assert!(!msg.request_id.is_nil());

        let parsed: HandshakePayload = msg.parse_payload().unwrap();
        assert_eq!(parsed.version, PROTOCOL_VERSION);
    }

    #[test]
    fn test_room_scoped_update() {
        let payload = OrderUpdatePayload {
            order_id: "o-1".into(),
            event: update_event_name(OwnerClass::Student, OrderKind::Regular),
            status: OrderStatus::Preparing,
            refund_amount: None,
            new_balance: None,
        };
        let msg = BusMessage::order_update(&payload).with_room(&room_for_order("o-1"));
        assert_eq!(msg.room.as_deref(), Some("order:o-1"));
        assert_eq!(payload.event, "student_regular_order_update");
    }
}
