//! Order types shared between server and client.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use validator::Validate;

// ============================================================================
// Owner class / order kind
// ============================================================================

/// Who placed the order; selects the realtime namespace and policy
/// constants (bulk minimums).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OwnerClass {
    Student,
    Faculty,
}

impl fmt::Display for OwnerClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Student => write!(f, "student"),
            Self::Faculty => write!(f, "faculty"),
        }
    }
}

/// Order kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderKind {
    /// Ad hoc order
    Regular,
    /// Large quantity, next-day pickup
    Bulk,
    /// Pre-order for a future delivery slot, special items only
    Scheduled,
}

impl fmt::Display for OrderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Regular => write!(f, "regular"),
            Self::Bulk => write!(f, "bulk"),
            Self::Scheduled => write!(f, "scheduled"),
        }
    }
}

// ============================================================================
// Status state machine
// ============================================================================

/// Order status
///
/// Forward path `pending -> preparing -> on_the_way -> delivered` is
/// kitchen-driven. `pending -> cancelled` is owner-driven inside the
/// cancellation window. `pending -> failed` happens only during creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Preparing,
    OnTheWay,
    Delivered,
    Cancelled,
    Failed,
}

impl OrderStatus {
    /// Terminal states accept no further transition
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Delivered | Self::Cancelled | Self::Failed)
    }

    /// Whether `self -> to` is a legal transition
    pub fn can_transition_to(&self, to: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, to),
            (Pending, Preparing)
                | (Pending, Cancelled)
                | (Pending, Failed)
                | (Preparing, OnTheWay)
                | (OnTheWay, Delivered)
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Preparing => write!(f, "preparing"),
            Self::OnTheWay => write!(f, "on_the_way"),
            Self::Delivered => write!(f, "delivered"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

// ============================================================================
// Items and orders
// ============================================================================

/// Priced line item as persisted on an order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub name: String,
    /// Catalog price at creation time, set server-side
    pub unit_price: Decimal,
    pub quantity: u32,
}

impl LineItem {
    pub fn line_total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

/// Client-submitted line item. `unit_price` is advisory display data and
/// is never trusted; the server reprices from the catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftItem {
    pub name: String,
    pub quantity: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_price: Option<Decimal>,
}

/// Client-submitted order draft
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct OrderDraft {
    pub owner_class: OwnerClass,
    pub kind: OrderKind,
    #[validate(email(message = "owner_key must be an email address"))]
    pub owner_key: String,
    #[validate(length(min = 1, message = "items must not be empty"))]
    pub items: Vec<DraftItem>,
    /// Required for scheduled orders, must be strictly future
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_for: Option<DateTime<Utc>>,
    /// Client-computed total; ignored, recomputed server-side
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_price: Option<Decimal>,
}

/// Persisted order. Never deleted; terminal states are stamped in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub id: String,
    /// Opaque display id shown on receipts
    pub token: String,
    pub owner_class: OwnerClass,
    pub kind: OrderKind,
    pub owner_key: String,
    pub items: Vec<LineItem>,
    /// Recomputed server-side from catalog prices
    pub total_price: Decimal,
    pub status: OrderStatus,
    /// Set once at creation; drives the cancellation window
    pub confirmed_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_for: Option<DateTime<Utc>>,
}

impl OrderRecord {
    /// Sum of line totals
    pub fn computed_total(&self) -> Decimal {
        self.items.iter().map(LineItem::line_total).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_transitions() {
        use OrderStatus::*;
        assert!(Pending.can_transition_to(Preparing));
        assert!(Preparing.can_transition_to(OnTheWay));
        assert!(OnTheWay.can_transition_to(Delivered));
    }

    #[test]
    fn test_pending_exits() {
        use OrderStatus::*;
        assert!(Pending.can_transition_to(Cancelled));
        assert!(Pending.can_transition_to(Failed));
        assert!(!Pending.can_transition_to(OnTheWay));
        assert!(!Pending.can_transition_to(Delivered));
    }

    #[test]
    fn test_terminal_states_reject_everything() {
        use OrderStatus::*;
        for terminal in [Delivered, Cancelled, Failed] {
            assert!(terminal.is_terminal());
            for to in [Pending, Preparing, OnTheWay, Delivered, Cancelled, Failed] {
                assert!(!terminal.can_transition_to(to));
            }
        }
    }

    #[test]
    fn test_no_backward_transitions() {
        use OrderStatus::*;
        assert!(!Preparing.can_transition_to(Pending));
        assert!(!OnTheWay.can_transition_to(Preparing));
        assert!(!Preparing.can_transition_to(Cancelled));
    }

    #[test]
    fn test_line_total() {
        let item = LineItem {
            name: "Tea".into(),
            unit_price: Decimal::from(20),
            quantity: 2,
        };
        assert_eq!(item.line_total(), Decimal::from(40));
    }
}
