//! End-to-end order flow over in-process transports: submit, join the
//! order room, receive status updates, and reconcile after a dropped
//! connection with a status query instead of trusting local state.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;

use canteen_client::{ClientConfig, ConnectionManager, Countdown};
use canteen_server::catalog::{InMemoryCatalog, ItemClass};
use canteen_server::core::{Config, ServerState};
use canteen_server::orders::OrderStore;
use shared::order::{DraftItem, OrderDraft, OrderKind, OrderStatus, OwnerClass};

const OWNER: &str = "amy@campus.edu";

fn server_state(dir: &tempfile::TempDir) -> ServerState {
    let config = Config::with_overrides(dir.path().display().to_string(), 0, 0);
    let store = OrderStore::open(dir.path().join("orders.redb")).unwrap();

    let catalog = Arc::new(InMemoryCatalog::new());
    catalog.insert("tea", Decimal::from(20), ItemClass::Standard);
    catalog.insert("rice bowl", Decimal::from(5), ItemClass::Standard);

    let state = ServerState::with_catalog(&config, store, catalog).unwrap();
    state.balance.credit(OWNER, Decimal::from(100)).unwrap();
    state.inventory.stock("tea", 50);
    state.inventory.stock("rice bowl", 10);

    state.start_background_tasks();
    state
}

fn regular_draft() -> OrderDraft {
    OrderDraft {
        owner_class: OwnerClass::Student,
        kind: OrderKind::Regular,
        owner_key: OWNER.to_string(),
        items: vec![DraftItem {
            name: "rice bowl".to_string(),
            quantity: 2,
            unit_price: None,
        }],
        scheduled_for: None,
        total_price: None,
    }
}

async fn connect(state: &ServerState) -> ConnectionManager {
    let client = ConnectionManager::new(ClientConfig::new("127.0.0.1:0").with_request_timeout(2));
    client
        .connect_memory(state.bus.sender(), state.bus.sender_to_server())
        .await
        .unwrap();
    client
}

#[tokio::test]
async fn test_submit_join_and_receive_updates() {
    let dir = tempfile::tempdir().unwrap();
    let state = server_state(&dir);
    let client = connect(&state).await;

    let receipt = state.orders.submit(regular_draft()).await.unwrap();
    assert!(receipt.token.starts_with("K-"));

    client.join_room(&receipt.order_id, OWNER).await.unwrap();

    let (seen_tx, mut seen_rx) = tokio::sync::mpsc::unbounded_channel();
    let _subscription = client.subscribe("student_regular_order_update", move |payload| {
        let _ = seen_tx.send((payload.order_id, payload.status));
    });

    state
        .orders
        .advance_status(&receipt.order_id, OrderStatus::Preparing, &state.config.kitchen_key)
        .await
        .unwrap();

    let (order_id, status) = tokio::time::timeout(Duration::from_secs(2), seen_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order_id, receipt.order_id);
    assert_eq!(status, OrderStatus::Preparing);
}

#[tokio::test]
async fn test_join_with_wrong_key_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let state = server_state(&dir);
    let client = connect(&state).await;

    let receipt = state.orders.submit(regular_draft()).await.unwrap();

    let err = client
        .join_room(&receipt.order_id, "mallory@campus.edu")
        .await
        .unwrap_err();
    assert!(err.to_string().contains("does not match"));
}

#[tokio::test]
async fn test_reconnect_reconciles_via_status_query() {
    let dir = tempfile::tempdir().unwrap();
    let state = server_state(&dir);
    let client = connect(&state).await;

    let receipt = state.orders.submit(regular_draft()).await.unwrap();
    client.join_room(&receipt.order_id, OWNER).await.unwrap();

    // Connection drops; the update below is never delivered to it
    client.disconnect().await;
    state
        .orders
        .advance_status(&receipt.order_id, OrderStatus::Preparing, &state.config.kitchen_key)
        .await
        .unwrap();
    state
        .orders
        .advance_status(&receipt.order_id, OrderStatus::OnTheWay, &state.config.kitchen_key)
        .await
        .unwrap();

    // Reconnect: membership did not survive, so join again, then ask
    // the server for the truth instead of replaying local state
    client
        .connect_memory(state.bus.sender(), state.bus.sender_to_server())
        .await
        .unwrap();
    client.join_room(&receipt.order_id, OWNER).await.unwrap();

    let order = client.status_query(&receipt.order_id).await.unwrap();
    assert_eq!(order.status, OrderStatus::OnTheWay);

    // The countdown restarts from the absolute confirmation timestamp,
    // not from a fresh window
    let window = state.config.cancel_window(order.kind);
    let countdown = Countdown::start(order.confirmed_at, window);
    assert!(countdown.remaining() <= window);
    assert!(countdown.remaining() > window - Duration::from_secs(30));
}

#[tokio::test]
async fn test_cancel_inside_window_refunds_and_notifies() {
    let dir = tempfile::tempdir().unwrap();
    let state = server_state(&dir);
    let client = connect(&state).await;

    let receipt = state.orders.submit(regular_draft()).await.unwrap();
    assert_eq!(state.balance.balance(OWNER), Decimal::from(90));

    client.join_room(&receipt.order_id, OWNER).await.unwrap();
    let (seen_tx, mut seen_rx) = tokio::sync::mpsc::unbounded_channel();
    let _subscription = client.subscribe("student_regular_order_update", move |payload| {
        let _ = seen_tx.send(payload);
    });

    let refund = state
        .orders
        .cancel(&receipt.order_id, OWNER, chrono::Utc::now())
        .await
        .unwrap();
    assert_eq!(refund, Decimal::from(10));
    assert_eq!(state.balance.balance(OWNER), Decimal::from(100));
    assert_eq!(state.inventory.available("rice bowl"), 10);

    let update = tokio::time::timeout(Duration::from_secs(2), seen_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(update.status, OrderStatus::Cancelled);
    assert_eq!(update.refund_amount, Some(Decimal::from(10)));
    assert_eq!(update.new_balance, Some(Decimal::from(100)));
}
