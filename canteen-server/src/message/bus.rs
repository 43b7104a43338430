//! Message bus core
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                     MessageBus                          │
//! │  ┌───────────────────────────────────────────────────┐  │
//! │  │  broadcast::Sender<BusMessage>                    │  │
//! │  └───────────────────────────────────────────────────┘  │
//! └────────────────────────┬────────────────────────────────┘
//!                          │
//!               ┌──────────┴──────────┐
//!               │    Transport Trait  │  ◄── pluggable
//!               └──────────┬──────────┘
//!                          │
//!              ┌───────────┴───────────┐
//!              ▼                       ▼
//!         TcpTransport          MemoryTransport
//!         (network)             (same process)
//! ```
//!
//! # Message flow
//!
//! ```text
//! Client ──▶ send_to_server() ──▶ client_tx ──▶ MessageHandler
//!                                            │
//! Server ──▶ publish() ────────▶ server_tx ──┤
//!                                            ▼
//!                                  Connected clients
//!                             (filtered by target / room)
//! ```

use std::sync::Arc;

use dashmap::DashMap;
use shared::message::BusMessage;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use super::transport::{MemoryTransport, Transport};
use super::ConnectedClient;
use crate::utils::AppError;

/// Configuration for the transport layer
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub tcp_listen_addr: String,
    /// Capacity of the broadcast channels (default: 1024)
    pub channel_capacity: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            tcp_listen_addr: "0.0.0.0:8081".to_string(),
            channel_capacity: 1024,
        }
    }
}

/// Message bus - routes messages between server and clients
///
/// # Responsibilities
///
/// - Message routing (send_to_server, publish, send_to_client)
/// - Client registry (connect, disconnect, get_connected_clients)
/// - Transport abstraction (TCP / memory)
#[derive(Debug, Clone)]
pub struct MessageBus {
    /// Client to server channel
    client_tx: broadcast::Sender<BusMessage>,
    /// Server to clients broadcast channel
    server_tx: broadcast::Sender<BusMessage>,
    /// Transport configuration
    pub(crate) config: TransportConfig,
    /// Shutdown signal
    shutdown_token: CancellationToken,
    /// Connected clients (client id -> transport)
    pub(crate) clients: Arc<DashMap<String, Arc<dyn Transport>>>,
}

impl MessageBus {
    /// Create a bus with default configuration
    pub fn new() -> Self {
        Self::from_config(TransportConfig::default())
    }

    /// Create a bus from configuration
    pub fn from_config(config: TransportConfig) -> Self {
        let capacity = config.channel_capacity;
        let (client_tx, _) = broadcast::channel(capacity);
        let (server_tx, _) = broadcast::channel(capacity);
        Self {
            client_tx,
            server_tx,
            config,
            shutdown_token: CancellationToken::new(),
            clients: Arc::new(DashMap::new()),
        }
    }

    /// Publish a message (server -> subscribers)
    ///
    /// Room-scoped when `msg.room` is set; every connected client
    /// otherwise. Errors only when no subscriber exists at all.
    pub async fn publish(&self, msg: BusMessage) -> Result<(), AppError> {
        self.server_tx
            .send(msg)
            .map_err(|e| AppError::internal(e.to_string()))?;
        Ok(())
    }

    /// Send a message to the server (client -> server)
    ///
    /// Delivered to the MessageHandler through the client channel
    pub async fn send_to_server(&self, msg: BusMessage) -> Result<(), AppError> {
        self.client_tx
            .send(msg)
            .map_err(|e| AppError::internal(e.to_string()))?;
        Ok(())
    }

    /// Send a message to one client (unicast)
    ///
    /// # Errors
    ///
    /// Returns 404 when the client is not connected
    pub async fn send_to_client(&self, client_id: &str, msg: BusMessage) -> Result<(), AppError> {
        if let Some(transport) = self.clients.get(client_id) {
            transport.write_message(&msg).await.map_err(|e| {
                AppError::internal(format!("Failed to send to client {}: {}", client_id, e))
            })?;
            Ok(())
        } else {
            Err(AppError::not_found(format!(
                "Client {} not connected",
                client_id
            )))
        }
    }

    /// Subscribe to client messages (server side)
    ///
    /// The MessageHandler uses this to receive client requests
    pub fn subscribe_to_clients(&self) -> broadcast::Receiver<BusMessage> {
        self.client_tx.subscribe()
    }

    /// Subscribe to server broadcasts (client side)
    pub fn subscribe(&self) -> broadcast::Receiver<BusMessage> {
        self.server_tx.subscribe()
    }

    /// Receive-only in-process transport
    pub fn memory_transport(&self) -> MemoryTransport {
        MemoryTransport::new(&self.server_tx)
    }

    /// In-process transport that can also write to the server
    pub fn client_memory_transport(&self) -> MemoryTransport {
        MemoryTransport::with_client_sender(&self.server_tx, &self.client_tx)
    }

    /// Client to server sender
    pub fn sender_to_server(&self) -> &broadcast::Sender<BusMessage> {
        &self.client_tx
    }

    /// Broadcast sender
    pub fn sender(&self) -> &broadcast::Sender<BusMessage> {
        &self.server_tx
    }

    /// Shutdown token for observing the stop signal
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown_token
    }

    /// List connected clients
    pub fn get_connected_clients(&self) -> Vec<ConnectedClient> {
        self.clients
            .iter()
            .map(|entry| ConnectedClient {
                id: entry.key().clone(),
                addr: entry.value().peer_addr(),
            })
            .collect()
    }

    /// Gracefully stop the bus and its TCP server
    pub fn shutdown(&self) {
        tracing::info!("Shutting down message bus");
        self.shutdown_token.cancel();
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}
