//! Client-side transports
//!
//! Same frame as the server: 1-byte event type, 16-byte request id,
//! 16-byte correlation id (nil = none), 2-byte LE room length + room,
//! 4-byte LE payload length, JSON payload.

use std::sync::Arc;

use shared::message::{BusMessage, EventType};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{ClientError, ClientResult};

/// Client transport over TCP or an in-process channel pair
#[derive(Debug, Clone)]
pub enum ClientTransport {
    Tcp(TcpTransport),
    Memory(MemoryTransport),
}

impl ClientTransport {
    pub async fn read_message(&self) -> ClientResult<BusMessage> {
        match self {
            ClientTransport::Tcp(t) => t.read_message().await,
            ClientTransport::Memory(t) => t.read_message().await,
        }
    }

    pub async fn write_message(&self, msg: &BusMessage) -> ClientResult<()> {
        match self {
            ClientTransport::Tcp(t) => t.write_message(msg).await,
            ClientTransport::Memory(t) => t.write_message(msg).await,
        }
    }

    pub async fn close(&self) -> ClientResult<()> {
        match self {
            ClientTransport::Tcp(t) => t.close().await,
            ClientTransport::Memory(t) => t.close().await,
        }
    }
}

/// TCP transport
#[derive(Debug, Clone)]
pub struct TcpTransport {
    reader: Arc<Mutex<OwnedReadHalf>>,
    writer: Arc<Mutex<OwnedWriteHalf>>,
}

impl TcpTransport {
    pub async fn connect(addr: &str) -> ClientResult<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| ClientError::Connection(format!("TCP connect failed: {}", e)))?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            reader: Arc::new(Mutex::new(reader)),
            writer: Arc::new(Mutex::new(writer)),
        })
    }

    pub async fn read_message(&self) -> ClientResult<BusMessage> {
        let mut reader = self.reader.lock().await;
        read_from_stream(&mut *reader).await
    }

    pub async fn write_message(&self, msg: &BusMessage) -> ClientResult<()> {
        let mut writer = self.writer.lock().await;
        write_to_stream(&mut *writer, msg).await
    }

    pub async fn close(&self) -> ClientResult<()> {
        let mut writer = self.writer.lock().await;
        writer
            .shutdown()
            .await
            .map_err(|e| ClientError::Connection(format!("TCP close failed: {}", e)))?;
        Ok(())
    }
}

/// In-process transport for embedding a client next to the server
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    rx: Arc<Mutex<broadcast::Receiver<BusMessage>>>,
    tx: broadcast::Sender<BusMessage>,
}

impl MemoryTransport {
    /// Pair with the server's broadcast and client channels
    pub fn new(
        server_broadcast_tx: &broadcast::Sender<BusMessage>,
        client_to_server_tx: &broadcast::Sender<BusMessage>,
    ) -> Self {
        Self {
            rx: Arc::new(Mutex::new(server_broadcast_tx.subscribe())),
            tx: client_to_server_tx.clone(),
        }
    }

    pub async fn read_message(&self) -> ClientResult<BusMessage> {
        let mut rx = self.rx.lock().await;
        rx.recv()
            .await
            .map_err(|e| ClientError::Connection(format!("Event bus error: {}", e)))
    }

    pub async fn write_message(&self, msg: &BusMessage) -> ClientResult<()> {
        self.tx
            .send(msg.clone())
            .map_err(|e| ClientError::Connection(format!("Event bus error: {}", e)))?;
        Ok(())
    }

    pub async fn close(&self) -> ClientResult<()> {
        Ok(())
    }
}

// ========== Frame helpers ==========

async fn read_from_stream<R: AsyncReadExt + Unpin>(reader: &mut R) -> ClientResult<BusMessage> {
    let mut type_buf = [0u8; 1];
    match reader.read_exact(&mut type_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(ClientError::Disconnected);
        }
        Err(e) => {
            return Err(ClientError::Connection(format!("Read type failed: {}", e)));
        }
    }

    let event_type = EventType::try_from(type_buf[0])
        .map_err(|e| ClientError::InvalidResponse(e.to_string()))?;

    let mut uuid_buf = [0u8; 16];
    reader
        .read_exact(&mut uuid_buf)
        .await
        .map_err(|e| ClientError::Connection(format!("Read UUID failed: {}", e)))?;
    let request_id = Uuid::from_bytes(uuid_buf);

    let mut correlation_buf = [0u8; 16];
    reader
        .read_exact(&mut correlation_buf)
        .await
        .map_err(|e| ClientError::Connection(format!("Read correlation UUID failed: {}", e)))?;
    let correlation_id_raw = Uuid::from_bytes(correlation_buf);
    let correlation_id = if correlation_id_raw.is_nil() {
        None
    } else {
        Some(correlation_id_raw)
    };

    let mut room_len_buf = [0u8; 2];
    reader
        .read_exact(&mut room_len_buf)
        .await
        .map_err(|e| ClientError::Connection(format!("Read room len failed: {}", e)))?;
    let room_len = u16::from_le_bytes(room_len_buf) as usize;
    let room = if room_len > 0 {
        let mut room_buf = vec![0u8; room_len];
        reader
            .read_exact(&mut room_buf)
            .await
            .map_err(|e| ClientError::Connection(format!("Read room failed: {}", e)))?;
        Some(String::from_utf8(room_buf).map_err(|_| {
            ClientError::InvalidResponse("Room name is not valid UTF-8".to_string())
        })?)
    } else {
        None
    };

    let mut len_buf = [0u8; 4];
    reader
        .read_exact(&mut len_buf)
        .await
        .map_err(|e| ClientError::Connection(format!("Read len failed: {}", e)))?;
    let len = u32::from_le_bytes(len_buf) as usize;

    let mut payload = vec![0u8; len];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(|e| ClientError::Connection(format!("Read payload failed: {}", e)))?;

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

async fn write_to_stream<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    msg: &BusMessage,
) -> ClientResult<()> {
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
        .map_err(|e| ClientError::Connection(format!("Write failed: {}", e)))?;
    Ok(())
}
