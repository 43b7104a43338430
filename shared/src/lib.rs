//! Shared types for the canteen order system
//!
//! These types are used by both `canteen-server` and `canteen-client`:
//!
//! - **message**: bus protocol (`BusMessage`, `EventType`, payloads)
//! - **order**: order domain model and status state machine

pub mod message;
pub mod order;

pub use message::{BusMessage, EventType, PROTOCOL_VERSION};
pub use order::{
    LineItem, OrderDraft, OrderKind, OrderRecord, OrderStatus, OwnerClass, remaining_window,
};
