//! Cancellation window
//!
//! Wraps the shared pure function with per-kind window durations from
//! config. The remaining time is always recomputed from the order's
//! absolute confirmation timestamp; there is no stored countdown.

use chrono::{DateTime, Utc};
use shared::order::{OrderRecord, remaining_window};
use std::time::Duration;

use crate::core::Config;

/// Remaining cancellation window for an order at `now`
pub fn remaining(config: &Config, order: &OrderRecord, now: DateTime<Utc>) -> Duration {
    remaining_window(order.confirmed_at, config.cancel_window(order.kind), now)
}

/// Whether the owner may still cancel at `now` (window only; the status
/// check happens under the transition lock)
pub fn cancellable(config: &Config, order: &OrderRecord, now: DateTime<Utc>) -> bool {
    remaining(config, order, now) > Duration::ZERO
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use rust_decimal::Decimal;
    use shared::order::{LineItem, OrderKind, OrderStatus, OwnerClass};

    fn order(kind: OrderKind, confirmed_at: DateTime<Utc>) -> OrderRecord {
        OrderRecord {
            id: "o-1".into(),
            token: "K-0001".into(),
            owner_class: OwnerClass::Student,
            kind,
            owner_key: "a@campus.edu".into(),
            items: vec![LineItem {
                name: "Tea".into(),
                unit_price: Decimal::from(20),
                quantity: 2,
            }],
            total_price: Decimal::from(40),
            status: OrderStatus::Pending,
            confirmed_at,
            scheduled_for: None,
        }
    }

    #[test]
    fn test_window_boundaries() {
        let config = Config::with_overrides("/tmp/canteen-test", 0, 0);
        let confirmed = Utc::now();
        let order = order(OrderKind::Regular, confirmed);

        assert!(cancellable(&config, &order, confirmed + TimeDelta::seconds(250)));
        // remaining == 0 must never permit cancellation
        assert!(!cancellable(&config, &order, confirmed + TimeDelta::seconds(300)));
        assert!(!cancellable(&config, &order, confirmed + TimeDelta::seconds(301)));
    }

    #[test]
    fn test_window_uses_kind_specific_duration() {
        let mut config = Config::with_overrides("/tmp/canteen-test", 0, 0);
        config.cancel_window_bulk_secs = 600;
        let confirmed = Utc::now();
        let order = order(OrderKind::Bulk, confirmed);

        assert_eq!(
            remaining(&config, &order, confirmed + TimeDelta::seconds(500)),
            Duration::from_secs(100)
        );
    }
}
