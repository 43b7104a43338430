//! Message bus: routing, transports, TCP server, request handler

pub mod bus;
pub mod handler;
mod tcp_server;
pub mod transport;

pub use bus::{MessageBus, TransportConfig};
pub use handler::MessageHandler;
pub use transport::{MemoryTransport, TcpTransport, Transport};

/// A connected client as reported by the bus registry
#[derive(Debug, Clone, serde::Serialize)]
pub struct ConnectedClient {
    pub id: String,
    pub addr: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::message::{BusMessage, EventType, ResponsePayload};

    #[tokio::test]
    async fn test_memory_transport_receives_broadcast() {
        let bus = MessageBus::new();
        let transport = bus.memory_transport();

        let payload = ResponsePayload::success("hello", None);
        bus.publish(BusMessage::response(&payload)).await.unwrap();

        let received = transport.read_message().await.unwrap();
        assert_eq!(received.event_type, EventType::Response);
    }

    #[tokio::test]
    async fn test_client_memory_transport_reaches_server() {
        let bus = MessageBus::new();
        let transport = bus.client_memory_transport();
        let mut server_rx = bus.subscribe_to_clients();

        let payload = shared::message::StatusQueryPayload {
            order_id: "o-1".to_string(),
        };
        transport
            .write_message(&BusMessage::status_query(&payload))
            .await
            .unwrap();

        let received = server_rx.recv().await.unwrap();
        assert_eq!(received.event_type, EventType::StatusQuery);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_errors() {
        let bus = MessageBus::new();
        let payload = ResponsePayload::success("nobody listening", None);
        assert!(bus.publish(BusMessage::response(&payload)).await.is_err());
    }
}
