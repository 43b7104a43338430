//! Order lifecycle orchestration
//!
//! `OrdersManager` runs the creation saga, owner cancellation, and
//! kitchen status advancement. Creation is a saga, not a transaction:
//! debit and decrement are independently-failable steps, and each
//! completed step gets a durable compensation intent before its undo
//! runs so a crashed compensation is retried by the sweeper.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use shared::message::{room_for_order, update_event_name, BusMessage, OrderUpdatePayload};
use shared::order::{LineItem, OrderDraft, OrderKind, OrderRecord, OrderStatus};
use uuid::Uuid;
use validator::Validate;

use super::compensation::CompensationIntent;
use super::store::OrderStore;
use super::window;
use crate::catalog::{Catalog, ItemClass};
use crate::core::Config;
use crate::ledger::{BalanceLedger, InventoryLedger};
use crate::message::MessageBus;
use crate::rooms::RoomRegistry;
use crate::utils::{AppError, AppResult};

/// Successful submission result
#[derive(Debug, Clone, Serialize)]
pub struct SubmitReceipt {
    pub order_id: String,
    pub token: String,
}

/// Order lifecycle coordinator
#[derive(Clone)]
pub struct OrdersManager {
    store: OrderStore,
    balance: Arc<BalanceLedger>,
    inventory: Arc<InventoryLedger>,
    catalog: Arc<dyn Catalog>,
    rooms: Arc<RoomRegistry>,
    bus: MessageBus,
    config: Config,
}

impl OrdersManager {
    pub fn new(
        store: OrderStore,
        balance: Arc<BalanceLedger>,
        inventory: Arc<InventoryLedger>,
        catalog: Arc<dyn Catalog>,
        rooms: Arc<RoomRegistry>,
        bus: MessageBus,
        config: Config,
    ) -> Self {
        Self {
            store,
            balance,
            inventory,
            catalog,
            rooms,
            bus,
            config,
        }
    }

    pub fn store(&self) -> &OrderStore {
        &self.store
    }

    // ========== Creation saga ==========

    /// Submit an order draft
    ///
    /// Steps, strictly ordered: validate and reprice, persist pending,
    /// debit balance, decrement inventory, open the order room. A debit
    /// failure stamps the order `failed` with no inventory touched; a
    /// decrement failure credits the debit back through the
    /// compensation queue and stamps `failed`.
    pub async fn submit(&self, draft: OrderDraft) -> AppResult<SubmitReceipt> {
        let items = self.validate_and_reprice(&draft)?;
        let total_price: Decimal = items.iter().map(LineItem::line_total).sum();

        let order = OrderRecord {
            id: Uuid::new_v4().to_string(),
            token: format!("K-{:04}", self.store.next_order_number()?),
            owner_class: draft.owner_class,
            kind: draft.kind,
            owner_key: draft.owner_key.clone(),
            items,
            total_price,
            status: OrderStatus::Pending,
            confirmed_at: Utc::now(),
            scheduled_for: draft.scheduled_for,
        };
        self.store.insert(&order)?;

        if let Err(e) = self.balance.debit(&order.owner_key, order.total_price) {
            tracing::warn!(
                order_id = %order.id,
                owner_key = %order.owner_key,
                amount = %order.total_price,
                step = "debit",
                "Order submission failed: {}", e
            );
            self.stamp_failed(&order.id);
            return Err(e);
        }

        if let Err(e) = self.inventory.decrement(&order.items) {
            tracing::warn!(
                order_id = %order.id,
                owner_key = %order.owner_key,
                step = "decrement",
                "Order submission failed, crediting debit back: {}", e
            );
            self.run_compensation(CompensationIntent::credit_balance(&order));
            self.stamp_failed(&order.id);
            return Err(e);
        }

        // Room creation is silent; the first published event is the
        // first status transition
        self.rooms.open(&room_for_order(&order.id));

        tracing::info!(
            order_id = %order.id,
            token = %order.token,
            total = %order.total_price,
            kind = %order.kind,
            "Order submitted"
        );

        Ok(SubmitReceipt {
            order_id: order.id,
            token: order.token,
        })
    }

    /// Validate a draft, collecting every violation, and reprice its
    /// line items from the catalog. Client-supplied prices and totals
    /// are never trusted.
    fn validate_and_reprice(&self, draft: &OrderDraft) -> AppResult<Vec<LineItem>> {
        let mut violations: Vec<String> = Vec::new();

        if let Err(errors) = draft.validate() {
            for (field, field_errors) in errors.field_errors() {
                for error in field_errors {
                    match &error.message {
                        Some(msg) => violations.push(msg.to_string()),
                        None => violations.push(format!("{} is invalid", field)),
                    }
                }
            }
        }

        let max_quantity = match draft.kind {
            OrderKind::Scheduled => self.config.max_special_line_quantity,
            _ => self.config.max_line_quantity,
        };

        let mut items = Vec::with_capacity(draft.items.len());
        for draft_item in &draft.items {
            if draft_item.quantity == 0 {
                violations.push(format!("{}: quantity must be at least 1", draft_item.name));
            } else if draft_item.quantity > max_quantity {
                violations.push(format!(
                    "{}: quantity {} exceeds maximum {} for {} orders",
                    draft_item.name, draft_item.quantity, max_quantity, draft.kind
                ));
            }

            match self.catalog.item(&draft_item.name) {
                Some(catalog_item) => {
                    if draft.kind == OrderKind::Scheduled && catalog_item.class != ItemClass::Special
                    {
                        violations.push(format!(
                            "{}: scheduled orders may only contain special items",
                            draft_item.name
                        ));
                    }
                    items.push(LineItem {
                        name: draft_item.name.clone(),
                        unit_price: catalog_item.unit_price,
                        quantity: draft_item.quantity,
                    });
                }
                None => {
                    violations.push(format!("{}: not in the catalog", draft_item.name));
                }
            }
        }

        match draft.kind {
            OrderKind::Scheduled => match draft.scheduled_for {
                Some(scheduled_for) if scheduled_for <= Utc::now() => {
                    violations.push("scheduled_for must be in the future".to_string());
                }
                None => {
                    violations.push("scheduled_for is required for scheduled orders".to_string());
                }
                _ => {}
            },
            _ => {
                if draft.scheduled_for.is_some() {
                    violations
                        .push("scheduled_for is only allowed on scheduled orders".to_string());
                }
            }
        }

        if draft.kind == OrderKind::Bulk {
            let total_quantity: u32 = draft.items.iter().map(|i| i.quantity).sum();
            let minimum = self.config.bulk_min_qty(draft.owner_class);
            if total_quantity < minimum {
                violations.push(format!(
                    "bulk orders require at least {} items in total, got {}",
                    minimum, total_quantity
                ));
            }
        }

        if violations.is_empty() {
            Ok(items)
        } else {
            Err(AppError::Validation(violations))
        }
    }

    // ========== Cancellation ==========

    /// Cancel a pending order within its window, refunding in full
    ///
    /// Returns the refunded amount. The guard runs under the order's
    /// transition lock, so a racing kitchen advancement wins or loses
    /// deterministically, never both.
    pub async fn cancel(
        &self,
        order_id: &str,
        owner_key: &str,
        now: DateTime<Utc>,
    ) -> AppResult<Decimal> {
        let config = self.config.clone();
        let cancelled =
            self.store
                .transition_with(order_id, OrderStatus::Cancelled, |order| {
                    if order.status != OrderStatus::Pending {
                        return Err(AppError::InvalidTransition {
                            from: order.status,
                            to: OrderStatus::Cancelled,
                        });
                    }
                    if order.owner_key != owner_key {
                        return Err(AppError::forbidden("Key does not match order owner"));
                    }
                    if !window::cancellable(&config, order, now) {
                        return Err(AppError::WindowExpired);
                    }
                    Ok(())
                })?;

        self.run_compensation(CompensationIntent::credit_balance(&cancelled));
        self.run_compensation(CompensationIntent::restore_inventory(&cancelled));

        let refund = cancelled.total_price;
        let new_balance = self.balance.balance(&cancelled.owner_key);

        tracing::info!(
            order_id = %cancelled.id,
            owner_key = %cancelled.owner_key,
            refund = %refund,
            "Order cancelled"
        );

        self.publish_update(&cancelled, Some(refund), Some(new_balance))
            .await;

        Ok(refund)
    }

    // ========== Kitchen advancement ==========

    /// Advance an order forward (kitchen/admin only)
    ///
    /// Only the forward statuses are reachable here; cancellation and
    /// failure stamping have their own paths.
    pub async fn advance_status(
        &self,
        order_id: &str,
        to: OrderStatus,
        kitchen_key: &str,
    ) -> AppResult<OrderRecord> {
        if kitchen_key != self.config.kitchen_key {
            return Err(AppError::forbidden("Invalid kitchen key"));
        }

        if !matches!(
            to,
            OrderStatus::Preparing | OrderStatus::OnTheWay | OrderStatus::Delivered
        ) {
            return Err(AppError::invalid(format!(
                "Status {} cannot be set by the kitchen",
                to
            )));
        }

        let updated = self.store.transition(order_id, to)?;

        tracing::info!(order_id = %updated.id, status = %updated.status, "Order advanced");

        self.publish_update(&updated, None, None).await;
        Ok(updated)
    }

    /// Fetch the persisted record
    pub fn get_order(&self, order_id: &str) -> AppResult<OrderRecord> {
        self.store.require(order_id)
    }

    // ========== Internals ==========

    /// Stamp an order `failed` after a saga step failure
    fn stamp_failed(&self, order_id: &str) {
        if let Err(e) = self.store.transition(order_id, OrderStatus::Failed) {
            tracing::error!(order_id = %order_id, "Failed to stamp order failed: {}", e);
        }
    }

    /// Queue and immediately attempt a compensating action
    ///
    /// The intent is persisted before the action runs; on failure it
    /// stays queued for the sweeper, and the primary error already
    /// returned to the caller is unaffected.
    fn run_compensation(&self, intent: CompensationIntent) {
        if let Err(e) = self.store.put_intent(&intent) {
            tracing::error!(
                order_id = %intent.order_id,
                owner_key = %intent.owner_key,
                "Failed to persist compensation intent: {}", e
            );
        }

        match intent.execute(&self.balance, &self.inventory) {
            Ok(()) => {
                if let Err(e) = self.store.delete_intent(&intent.id) {
                    tracing::error!(
                        intent_id = %intent.id,
                        "Failed to delete completed compensation intent: {}", e
                    );
                }
            }
            Err(e) => {
                tracing::error!(
                    order_id = %intent.order_id,
                    owner_key = %intent.owner_key,
                    "Compensation failed, left queued for the sweeper: {}", e
                );
            }
        }
    }

    /// Publish a status transition to the order's room
    ///
    /// No subscriber is not an error: the broadcast just has nobody
    /// listening yet.
    async fn publish_update(
        &self,
        order: &OrderRecord,
        refund_amount: Option<Decimal>,
        new_balance: Option<Decimal>,
    ) {
        let payload = OrderUpdatePayload {
            order_id: order.id.clone(),
            event: update_event_name(order.owner_class, order.kind),
            status: order.status,
            refund_amount,
            new_balance,
        };

        let msg = BusMessage::order_update(&payload).with_room(&room_for_order(&order.id));
        if let Err(e) = self.bus.publish(msg).await {
            tracing::debug!(order_id = %order.id, "No subscribers for update: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::InMemoryCatalog;
    use chrono::Duration as ChronoDuration;
    use shared::order::{DraftItem, OwnerClass};

    struct Fixture {
        manager: OrdersManager,
        balance: Arc<BalanceLedger>,
        inventory: Arc<InventoryLedger>,
        bus: MessageBus,
        _dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = OrderStore::open(dir.path().join("orders.redb")).unwrap();

        let balance = Arc::new(BalanceLedger::new());
        balance.credit("amy@campus.edu", Decimal::from(100)).unwrap();

        let inventory = Arc::new(InventoryLedger::new());
        inventory.stock("tea", 50);
        inventory.stock("rice bowl", 3);
        inventory.stock("banquet tray", 20);

        let catalog = Arc::new(InMemoryCatalog::new());
        catalog.insert("tea", Decimal::from(20), ItemClass::Standard);
        catalog.insert("rice bowl", Decimal::from(5), ItemClass::Standard);
        catalog.insert("banquet tray", Decimal::from(2), ItemClass::Special);

        let bus = MessageBus::new();
        let config = Config::with_overrides(dir.path().display().to_string(), 0, 0);

        let manager = OrdersManager::new(
            store,
            balance.clone(),
            inventory.clone(),
            catalog,
            Arc::new(RoomRegistry::new()),
            bus.clone(),
            config,
        );

        Fixture {
            manager,
            balance,
            inventory,
            bus,
            _dir: dir,
        }
    }

    fn regular_draft(items: Vec<DraftItem>) -> OrderDraft {
        OrderDraft {
            owner_class: OwnerClass::Student,
            kind: OrderKind::Regular,
            owner_key: "amy@campus.edu".to_string(),
            items,
            scheduled_for: None,
            total_price: None,
        }
    }

    fn tea(quantity: u32) -> DraftItem {
        DraftItem {
            name: "tea".to_string(),
            quantity,
            unit_price: None,
        }
    }

    #[tokio::test]
    async fn test_submit_reprices_from_catalog() {
        let f = fixture();

        // Client lies about the price; the catalog wins
        let mut draft = regular_draft(vec![DraftItem {
            name: "tea".to_string(),
            quantity: 2,
            unit_price: Some(Decimal::ONE),
        }]);
        draft.total_price = Some(Decimal::ONE);

        let receipt = f.manager.submit(draft).await.unwrap();
        let order = f.manager.get_order(&receipt.order_id).unwrap();

        assert_eq!(order.total_price, Decimal::from(40));
        assert_eq!(order.total_price, order.computed_total());
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(f.balance.balance("amy@campus.edu"), Decimal::from(60));
        assert_eq!(f.inventory.available("tea"), 48);
        assert!(receipt.token.starts_with("K-"));
    }

    #[tokio::test]
    async fn test_cancel_within_window_refunds_in_full() {
        let f = fixture();
        let receipt = f.manager.submit(regular_draft(vec![tea(2)])).await.unwrap();
        let order = f.manager.get_order(&receipt.order_id).unwrap();
        let mut rx = f.bus.subscribe();

        let at = order.confirmed_at + ChronoDuration::seconds(250);
        let refund = f
            .manager
            .cancel(&receipt.order_id, "amy@campus.edu", at)
            .await
            .unwrap();

        assert_eq!(refund, Decimal::from(40));
        assert_eq!(f.balance.balance("amy@campus.edu"), Decimal::from(100));
        assert_eq!(f.inventory.available("tea"), 50);

        let update = rx.recv().await.unwrap();
        let payload: OrderUpdatePayload = update.parse_payload().unwrap();
        assert_eq!(payload.status, OrderStatus::Cancelled);
        assert_eq!(payload.refund_amount, Some(Decimal::from(40)));
        assert_eq!(payload.event, "student_regular_order_update");
        assert_eq!(update.room, Some(room_for_order(&receipt.order_id)));

        // Cancelling again is an invalid transition, not window expiry
        let again = f
            .manager
            .cancel(&receipt.order_id, "amy@campus.edu", at)
            .await;
        assert!(matches!(again, Err(AppError::InvalidTransition { .. })));
    }

    #[tokio::test]
    async fn test_cancel_at_window_boundary_fails() {
        let f = fixture();
        let receipt = f.manager.submit(regular_draft(vec![tea(1)])).await.unwrap();
        let order = f.manager.get_order(&receipt.order_id).unwrap();

        let at = order.confirmed_at + ChronoDuration::seconds(300);
        let result = f.manager.cancel(&receipt.order_id, "amy@campus.edu", at).await;
        assert!(matches!(result, Err(AppError::WindowExpired)));

        // Nothing moved
        assert_eq!(f.manager.get_order(&receipt.order_id).unwrap().status, OrderStatus::Pending);
        assert_eq!(f.balance.balance("amy@campus.edu"), Decimal::from(80));
    }

    #[tokio::test]
    async fn test_cancel_requires_owner_key() {
        let f = fixture();
        let receipt = f.manager.submit(regular_draft(vec![tea(1)])).await.unwrap();
        let order = f.manager.get_order(&receipt.order_id).unwrap();

        let at = order.confirmed_at + ChronoDuration::seconds(10);
        let result = f.manager.cancel(&receipt.order_id, "bob@campus.edu", at).await;
        assert!(matches!(result, Err(AppError::Forbidden(_))));
    }

    #[tokio::test]
    async fn test_bulk_below_minimum_touches_no_ledger() {
        let f = fixture();

        let mut draft = regular_draft(vec![tea(4)]);
        draft.kind = OrderKind::Bulk;

        let result = f.manager.submit(draft).await;
        match result {
            Err(AppError::Validation(violations)) => {
                assert!(violations.iter().any(|v| v.contains("at least 5")));
            }
            other => panic!("expected validation failure, got {:?}", other.map(|r| r.order_id)),
        }

        assert_eq!(f.balance.balance("amy@campus.edu"), Decimal::from(100));
        assert_eq!(f.inventory.available("tea"), 50);
    }

    #[tokio::test]
    async fn test_validation_collects_every_violation() {
        let f = fixture();

        let draft = OrderDraft {
            owner_class: OwnerClass::Student,
            kind: OrderKind::Regular,
            owner_key: "not-an-email".to_string(),
            items: vec![
                DraftItem {
                    name: "mystery stew".to_string(),
                    quantity: 11,
                    unit_price: None,
                },
                tea(0),
            ],
            scheduled_for: Some(Utc::now() + ChronoDuration::hours(1)),
            total_price: None,
        };

        match f.manager.submit(draft).await {
            Err(AppError::Validation(violations)) => {
                assert!(violations.iter().any(|v| v.contains("email")));
                assert!(violations.iter().any(|v| v.contains("not in the catalog")));
                assert!(violations.iter().any(|v| v.contains("exceeds maximum")));
                assert!(violations.iter().any(|v| v.contains("at least 1")));
                assert!(violations.iter().any(|v| v.contains("only allowed on scheduled")));
            }
            other => panic!("expected validation failure, got {:?}", other.map(|r| r.order_id)),
        }
    }

    #[tokio::test]
    async fn test_scheduled_requires_special_items_and_future_slot() {
        let f = fixture();

        let mut draft = regular_draft(vec![tea(1)]);
        draft.kind = OrderKind::Scheduled;
        draft.scheduled_for = Some(Utc::now() - ChronoDuration::minutes(1));

        match f.manager.submit(draft).await {
            Err(AppError::Validation(violations)) => {
                assert!(violations.iter().any(|v| v.contains("special items")));
                assert!(violations.iter().any(|v| v.contains("in the future")));
            }
            other => panic!("expected validation failure, got {:?}", other.map(|r| r.order_id)),
        }
    }

    #[tokio::test]
    async fn test_scheduled_special_order_succeeds() {
        let f = fixture();

        let draft = OrderDraft {
            owner_class: OwnerClass::Faculty,
            kind: OrderKind::Scheduled,
            owner_key: "amy@campus.edu".to_string(),
            items: vec![DraftItem {
                name: "banquet tray".to_string(),
                quantity: 4,
                unit_price: None,
            }],
            scheduled_for: Some(Utc::now() + ChronoDuration::hours(2)),
            total_price: None,
        };

        let receipt = f.manager.submit(draft).await.unwrap();
        let order = f.manager.get_order(&receipt.order_id).unwrap();
        assert_eq!(order.kind, OrderKind::Scheduled);
        assert_eq!(order.total_price, Decimal::from(8));
    }

    #[tokio::test]
    async fn test_insufficient_balance_marks_failed_without_touching_inventory() {
        let f = fixture();

        // 10 tea = 200, balance is 100
        let result = f.manager.submit(regular_draft(vec![tea(10)])).await;
        assert!(matches!(result, Err(AppError::InsufficientBalance { .. })));

        assert_eq!(f.balance.balance("amy@campus.edu"), Decimal::from(100));
        assert_eq!(f.inventory.available("tea"), 50);
    }

    #[tokio::test]
    async fn test_inventory_failure_credits_debit_back() {
        let f = fixture();

        // 8 rice bowls affordable (40) but only 3 in stock
        let result = f
            .manager
            .submit(regular_draft(vec![DraftItem {
                name: "rice bowl".to_string(),
                quantity: 8,
                unit_price: None,
            }]))
            .await;
        assert!(matches!(result, Err(AppError::InsufficientStock { .. })));

        // Debit then compensating credit nets to zero
        assert_eq!(f.balance.balance("amy@campus.edu"), Decimal::from(100));
        assert_eq!(f.inventory.available("rice bowl"), 3);

        // Completed compensation leaves no queued intent behind
        assert!(f.manager.store.pending_intents().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_advance_requires_kitchen_key() {
        let f = fixture();
        let receipt = f.manager.submit(regular_draft(vec![tea(1)])).await.unwrap();

        let result = f
            .manager
            .advance_status(&receipt.order_id, OrderStatus::Preparing, "wrong-key")
            .await;
        assert!(matches!(result, Err(AppError::Forbidden(_))));
    }

    #[tokio::test]
    async fn test_kitchen_advances_forward_only() {
        let f = fixture();
        let receipt = f.manager.submit(regular_draft(vec![tea(1)])).await.unwrap();
        let key = f.manager.config.kitchen_key.clone();

        let result = f
            .manager
            .advance_status(&receipt.order_id, OrderStatus::Cancelled, &key)
            .await;
        assert!(matches!(result, Err(AppError::Invalid(_))));

        // Skipping preparing is rejected by the state machine
        let result = f
            .manager
            .advance_status(&receipt.order_id, OrderStatus::Delivered, &key)
            .await;
        assert!(matches!(result, Err(AppError::InvalidTransition { .. })));

        for status in [
            OrderStatus::Preparing,
            OrderStatus::OnTheWay,
            OrderStatus::Delivered,
        ] {
            let updated = f
                .manager
                .advance_status(&receipt.order_id, status, &key)
                .await
                .unwrap();
            assert_eq!(updated.status, status);
        }

        // Delivered is terminal
        let result = f
            .manager
            .advance_status(&receipt.order_id, OrderStatus::Preparing, &key)
            .await;
        assert!(matches!(result, Err(AppError::InvalidTransition { .. })));
    }

    #[tokio::test]
    async fn test_cancel_loses_to_preparing() {
        let f = fixture();
        let receipt = f.manager.submit(regular_draft(vec![tea(1)])).await.unwrap();
        let order = f.manager.get_order(&receipt.order_id).unwrap();
        let key = f.manager.config.kitchen_key.clone();

        f.manager
            .advance_status(&receipt.order_id, OrderStatus::Preparing, &key)
            .await
            .unwrap();

        let at = order.confirmed_at + ChronoDuration::seconds(10);
        let result = f.manager.cancel(&receipt.order_id, "amy@campus.edu", at).await;
        assert!(matches!(result, Err(AppError::InvalidTransition { .. })));
        assert_eq!(f.balance.balance("amy@campus.edu"), Decimal::from(80));
    }
}
