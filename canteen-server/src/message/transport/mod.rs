//! Transport abstraction
//!
//! Pluggable transports under one trait:
//!
//! ```text
//!         ┌────────────────────┐
//!         │   Transport Trait  │
//!         └────────┬───────────┘
//!                  │
//!         ┌────────┴────────┐
//!         ▼                 ▼
//!    TcpTransport     MemoryTransport
//!    (network)        (same process)
//! ```

mod memory;
mod tcp;

pub use memory::MemoryTransport;
pub use tcp::TcpTransport;

use async_trait::async_trait;
use shared::message::BusMessage;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use uuid::Uuid;

use crate::utils::AppError;

/// Message transport
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Read one message from the transport
    async fn read_message(&self) -> Result<BusMessage, AppError>;

    /// Write one message to the transport
    async fn write_message(&self, msg: &BusMessage) -> Result<(), AppError>;

    /// Close the connection
    async fn close(&self) -> Result<(), AppError>;

    /// Peer address, when the transport has one
    fn peer_addr(&self) -> Option<String> {
        None
    }
}

// ========== Frame helpers ==========

/// Read a BusMessage frame from an async stream
pub(crate) async fn read_from_stream<R: AsyncReadExt + Unpin>(
    reader: &mut R,
) -> Result<BusMessage, AppError> {
    use shared::message::EventType;

    // Event type (1 byte)
    let mut type_buf = [0u8; 1];
    match reader.read_exact(&mut type_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(AppError::ClientDisconnected);
        }
        Err(e) => {
            return Err(AppError::internal(format!("Read type failed: {}", e)));
        }
    }

    let event_type =
        EventType::try_from(type_buf[0]).map_err(|e| AppError::invalid(e.to_string()))?;

    // Request ID (16 bytes)
    let mut uuid_buf = [0u8; 16];
    reader
        .read_exact(&mut uuid_buf)
        .await
        .map_err(|e| AppError::internal(format!("Read UUID failed: {}", e)))?;
    let request_id = Uuid::from_bytes(uuid_buf);

    // Correlation ID (16 bytes, nil = none)
    let mut correlation_buf = [0u8; 16];
    reader
        .read_exact(&mut correlation_buf)
        .await
        .map_err(|e| AppError::internal(format!("Read correlation UUID failed: {}", e)))?;
    let correlation_id_raw = Uuid::from_bytes(correlation_buf);
    let correlation_id = if correlation_id_raw.is_nil() {
        None
    } else {
        Some(correlation_id_raw)
    };

    // Room length + room (2 bytes LE + bytes, 0 = none)
    let mut room_len_buf = [0u8; 2];
    reader
        .read_exact(&mut room_len_buf)
        .await
        .map_err(|e| AppError::internal(format!("Read room len failed: {}", e)))?;
    let room_len = u16::from_le_bytes(room_len_buf) as usize;
    let room = if room_len > 0 {
        let mut room_buf = vec![0u8; room_len];
        reader
            .read_exact(&mut room_buf)
            .await
            .map_err(|e| AppError::internal(format!("Read room failed: {}", e)))?;
        Some(
            String::from_utf8(room_buf)
                .map_err(|_| AppError::invalid("Room name is not valid UTF-8"))?,
        )
    } else {
        None
    };

    // Payload length (4 bytes LE) + payload
    let mut len_buf = [0u8; 4];
    reader
        .read_exact(&mut len_buf)
        .await
        .map_err(|e| AppError::internal(format!("Read len failed: {}", e)))?;
    let len = u32::from_le_bytes(len_buf) as usize;

    let mut payload = vec![0u8; len];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(|e| AppError::internal(format!("Read payload failed: {}", e)))?;

    Ok(BusMessage {
        request_id,
        event_type,
        source: None,
        correlation_id,
        target: None,
        room,
        payload,
    })
}

/// Write a BusMessage frame to an async stream
pub(crate) async fn write_to_stream<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    msg: &BusMessage,
) -> Result<(), AppError> {
    let mut data = Vec::new();
    data.push(msg.event_type as u8);
    data.extend_from_slice(msg.request_id.as_bytes());

    let correlation_bytes = msg.correlation_id.unwrap_or(Uuid::nil()).into_bytes();
    data.extend_from_slice(&correlation_bytes);

    let room_bytes = msg.room.as_deref().unwrap_or("").as_bytes();
    data.extend_from_slice(&(room_bytes.len() as u16).to_le_bytes());
    data.extend_from_slice(room_bytes);

    data.extend_from_slice(&(msg.payload.len() as u32).to_le_bytes());
    data.extend_from_slice(&msg.payload);

    writer
        .write_all(&data)
        .await
        .map_err(|e| AppError::internal(format!("Write failed: {}", e)))?;
    Ok(())
}
