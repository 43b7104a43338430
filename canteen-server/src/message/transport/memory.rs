//! In-process transport for tests and embedded clients

use std::sync::Arc;

use async_trait::async_trait;
use shared::message::BusMessage;
use tokio::sync::broadcast;
use tokio::sync::Mutex;

use super::Transport;
use crate::utils::AppError;

/// Same-process transport backed by broadcast channels
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    rx: Arc<Mutex<broadcast::Receiver<BusMessage>>>,
    tx: Option<Arc<broadcast::Sender<BusMessage>>>,
}

impl MemoryTransport {
    /// Receive-only endpoint on a broadcast sender
    pub fn new(tx: &broadcast::Sender<BusMessage>) -> Self {
        Self {
            rx: Arc::new(Mutex::new(tx.subscribe())),
            tx: None,
        }
    }

    /// Endpoint that reads server broadcasts and writes into the
    /// client channel, simulating a connected client
    pub fn with_client_sender(
        broadcast_tx: &broadcast::Sender<BusMessage>,
        client_tx: &broadcast::Sender<BusMessage>,
    ) -> Self {
        Self {
            rx: Arc::new(Mutex::new(broadcast_tx.subscribe())),
            tx: Some(Arc::new(client_tx.clone())),
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn read_message(&self) -> Result<BusMessage, AppError> {
        let mut rx = self.rx.lock().await;
        rx.recv()
            .await
            .map_err(|e| AppError::internal(e.to_string()))
    }

    async fn write_message(&self, msg: &BusMessage) -> Result<(), AppError> {
        if let Some(tx) = &self.tx {
            tx.send(msg.clone())
                .map_err(|e| AppError::internal(e.to_string()))?;
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), AppError> {
        Ok(())
    }
}
