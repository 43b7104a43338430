//! Server-side message handler
//!
//! Subscribes to the client channel and services room membership and
//! status queries. Replies are unicast Response messages correlated
//! with the request id.

use std::sync::Arc;

use shared::message::{
    room_for_order, BusMessage, EventType, JoinRoomPayload, ResponsePayload, StatusQueryPayload,
};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use super::bus::MessageBus;
use crate::core::Config;
use crate::orders::OrderStore;
use crate::rooms::RoomRegistry;
use crate::utils::{AppError, AppResult};

/// Background task servicing client requests from the bus
pub struct MessageHandler {
    receiver: broadcast::Receiver<BusMessage>,
    bus: MessageBus,
    store: OrderStore,
    rooms: Arc<RoomRegistry>,
    config: Config,
    shutdown_token: CancellationToken,
}

impl MessageHandler {
    pub fn new(
        bus: MessageBus,
        store: OrderStore,
        rooms: Arc<RoomRegistry>,
        config: Config,
        shutdown_token: CancellationToken,
    ) -> Self {
        Self {
            receiver: bus.subscribe_to_clients(),
            bus,
            store,
            rooms,
            config,
            shutdown_token,
        }
    }

    /// Long-running processing loop, spawned in the background
    pub async fn run(mut self) {
        tracing::info!("Message handler started");

        loop {
            tokio::select! {
                _ = self.shutdown_token.cancelled() => {
                    tracing::info!("Message handler shutting down");
                    break;
                }

                msg_result = self.receiver.recv() => {
                    match msg_result {
                        Ok(msg) => {
                            if let Err(e) = self.handle_message(&msg).await {
                                tracing::error!(
                                    event_type = %msg.event_type,
                                    "Failed to handle message: {}", e
                                );
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!("Message handler lagged, skipped {} messages", skipped);
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            tracing::info!("Message channel closed");
                            break;
                        }
                    }
                }
            }
        }

        tracing::info!("Message handler stopped");
    }

    async fn handle_message(&self, msg: &BusMessage) -> AppResult<()> {
        match msg.event_type {
            EventType::JoinRoom => self.handle_join(msg).await,
            EventType::LeaveRoom => self.handle_leave(msg).await,
            EventType::StatusQuery => self.handle_status_query(msg).await,
            // Handshake is consumed by the TCP server; responses and
            // updates originate here, not from clients
            _ => Ok(()),
        }
    }

    /// Join an order room
    ///
    /// The caller must present the order owner's key or the kitchen
    /// key. Membership is keyed by the connection's client id.
    async fn handle_join(&self, msg: &BusMessage) -> AppResult<()> {
        let client_id = match &msg.source {
            Some(id) => id.clone(),
            None => return Ok(()),
        };

        let result: AppResult<String> = async {
            let payload: JoinRoomPayload = msg
                .parse_payload()
                .map_err(|e| AppError::invalid(format!("Invalid join payload: {}", e)))?;

            let order = self.store.require(&payload.order_id)?;
            if payload.owner_key != order.owner_key && payload.owner_key != self.config.kitchen_key
            {
                return Err(AppError::forbidden("Key does not match order owner"));
            }

            let room = room_for_order(&payload.order_id);
            self.rooms.join(&room, &client_id);
            tracing::debug!(client_id = %client_id, room = %room, "Client joined room");
            Ok(room)
        }
        .await;

        self.reply(msg, &client_id, result.map(|room| (format!("Joined {}", room), None)))
            .await
    }

    /// Leave an order room, idempotent
    async fn handle_leave(&self, msg: &BusMessage) -> AppResult<()> {
        let client_id = match &msg.source {
            Some(id) => id.clone(),
            None => return Ok(()),
        };

        let result: AppResult<String> = async {
            let payload: JoinRoomPayload = msg
                .parse_payload()
                .map_err(|e| AppError::invalid(format!("Invalid leave payload: {}", e)))?;
            let room = room_for_order(&payload.order_id);
            self.rooms.leave(&room, &client_id);
            tracing::debug!(client_id = %client_id, room = %room, "Client left room");
            Ok(room)
        }
        .await;

        self.reply(msg, &client_id, result.map(|room| (format!("Left {}", room), None)))
            .await
    }

    /// Answer with the current persisted order state
    ///
    /// Always reads the store, never a cache, so clients can reconcile
    /// after missing updates.
    async fn handle_status_query(&self, msg: &BusMessage) -> AppResult<()> {
        let client_id = match &msg.source {
            Some(id) => id.clone(),
            None => return Ok(()),
        };

        let result: AppResult<(String, Option<serde_json::Value>)> = async {
            let payload: StatusQueryPayload = msg
                .parse_payload()
                .map_err(|e| AppError::invalid(format!("Invalid status query: {}", e)))?;
            let order = self.store.require(&payload.order_id)?;
            let data = serde_json::to_value(&order)
                .map_err(|e| AppError::internal(format!("Serialize order failed: {}", e)))?;
            Ok((order.status.to_string(), Some(data)))
        }
        .await;

        self.reply(msg, &client_id, result).await
    }

    /// Unicast a correlated Response back to the requesting client
    async fn reply(
        &self,
        request: &BusMessage,
        client_id: &str,
        result: AppResult<(String, Option<serde_json::Value>)>,
    ) -> AppResult<()> {
        let payload = match result {
            Ok((message, data)) => ResponsePayload::success(message, data),
            Err(e) => {
                tracing::debug!(client_id = %client_id, "Request failed: {}", e);
                ResponsePayload::error(e.to_string(), Some(e.code().to_string()))
            }
        };

        let response = BusMessage::response(&payload)
            .with_target(client_id)
            .with_correlation_id(request.request_id);
        self.bus.publish(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{BalanceLedger, InventoryLedger};
    use crate::orders::OrdersManager;
    use crate::catalog::{InMemoryCatalog, ItemClass};
    use rust_decimal::Decimal;
    use shared::order::{DraftItem, OrderDraft, OrderKind};

    fn test_config() -> Config {
        Config::with_overrides(std::env::temp_dir().display().to_string(), 0, 0)
    }

    async fn setup() -> (MessageHandler, MessageBus, OrdersManager, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = OrderStore::open(dir.path().join("orders.redb")).unwrap();
        let rooms = Arc::new(RoomRegistry::new());
        let bus = MessageBus::new();
        let config = test_config();

        let balance = Arc::new(BalanceLedger::new());
        balance.credit("amy@campus.edu", Decimal::from(100)).unwrap();
        let inventory = Arc::new(InventoryLedger::new());
        inventory.stock("rice bowl", 10);
        let catalog = Arc::new(InMemoryCatalog::new());
        catalog.insert("rice bowl", Decimal::from(5), ItemClass::Standard);

        let manager = OrdersManager::new(
            store.clone(),
            balance,
            inventory,
            catalog,
            rooms.clone(),
            bus.clone(),
            config.clone(),
        );

        let handler = MessageHandler::new(
            bus.clone(),
            store,
            rooms,
            config,
            CancellationToken::new(),
        );

        (handler, bus, manager, dir)
    }

    fn draft() -> OrderDraft {
        OrderDraft {
            owner_key: "amy@campus.edu".to_string(),
            owner_class: shared::order::OwnerClass::Student,
            kind: OrderKind::Regular,
            items: vec![DraftItem {
                name: "rice bowl".to_string(),
                quantity: 1,
                unit_price: None,
            }],
            scheduled_for: None,
            total_price: None,
        }
    }

    #[tokio::test]
    async fn test_join_requires_matching_key() {
        let (handler, bus, manager, _dir) = setup().await;
        let receipt = manager.submit(draft()).await.unwrap();

        let mut rx = bus.subscribe();

        let mut msg = BusMessage::join_room(&JoinRoomPayload {
            order_id: receipt.order_id.clone(),
            owner_key: "mallory@campus.edu".to_string(),
        });
        msg.source = Some("client-1".to_string());
        handler.handle_message(&msg).await.unwrap();

        let response = rx.recv().await.unwrap();
        let payload: ResponsePayload = response.parse_payload().unwrap();
        assert!(!payload.success);
        assert_eq!(response.correlation_id, Some(msg.request_id));
        assert!(!handler
            .rooms
            .is_member(&room_for_order(&receipt.order_id), "client-1"));
    }

    #[tokio::test]
    async fn test_join_and_status_query() {
        let (handler, bus, manager, _dir) = setup().await;
        let receipt = manager.submit(draft()).await.unwrap();

        let mut rx = bus.subscribe();

        let mut join = BusMessage::join_room(&JoinRoomPayload {
            order_id: receipt.order_id.clone(),
            owner_key: "amy@campus.edu".to_string(),
        });
        join.source = Some("client-1".to_string());
        handler.handle_message(&join).await.unwrap();

        let joined: ResponsePayload = rx.recv().await.unwrap().parse_payload().unwrap();
        assert!(joined.success);
        assert!(handler
            .rooms
            .is_member(&room_for_order(&receipt.order_id), "client-1"));

        let mut query = BusMessage::status_query(&StatusQueryPayload {
            order_id: receipt.order_id.clone(),
        });
        query.source = Some("client-1".to_string());
        handler.handle_message(&query).await.unwrap();

        let answer = rx.recv().await.unwrap();
        let payload: ResponsePayload = answer.parse_payload().unwrap();
        assert!(payload.success);
        assert_eq!(payload.message, "pending");
    }

    #[tokio::test]
    async fn test_kitchen_key_joins_any_room() {
        let (handler, bus, manager, _dir) = setup().await;
        let receipt = manager.submit(draft()).await.unwrap();

        let mut rx = bus.subscribe();

        let mut join = BusMessage::join_room(&JoinRoomPayload {
            order_id: receipt.order_id.clone(),
            owner_key: handler.config.kitchen_key.clone(),
        });
        join.source = Some("kitchen-display".to_string());
        handler.handle_message(&join).await.unwrap();

        let joined: ResponsePayload = rx.recv().await.unwrap().parse_payload().unwrap();
        assert!(joined.success);
    }
}
