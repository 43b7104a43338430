//! Connection manager
//!
//! One logical connection per client process. `connect()` is lazy and
//! memoized: concurrent callers serialize on the connection slot and
//! share the established connection. Operations requested while
//! disconnected are queued and replayed in order once the connection is
//! ready. On transport loss the manager reconnects with bounded,
//! capped-exponential backoff; rooms are never auto-rejoined, the
//! owning scope re-joins and re-queries status itself.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use shared::message::{
    BusMessage, HandshakePayload, JoinRoomPayload, OrderUpdatePayload, ResponsePayload,
    StatusQueryPayload, PROTOCOL_VERSION,
};
use shared::order::OrderRecord;
use tokio::sync::{broadcast, oneshot};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::transport::{ClientTransport, MemoryTransport, TcpTransport};

/// Room update callback
pub type UpdateHandler = Arc<dyn Fn(OrderUpdatePayload) + Send + Sync>;

struct HandlerEntry {
    generation: u64,
    handler: UpdateHandler,
}

/// Operation requested while disconnected, replayed on ready
#[derive(Debug, Clone)]
enum QueuedOp {
    Join { order_id: String, owner_key: String },
    Leave { order_id: String, owner_key: String },
}

impl QueuedOp {
    fn to_message(&self) -> BusMessage {
        match self {
            QueuedOp::Join {
                order_id,
                owner_key,
            } => BusMessage::join_room(&JoinRoomPayload {
                order_id: order_id.clone(),
                owner_key: owner_key.clone(),
            }),
            QueuedOp::Leave {
                order_id,
                owner_key,
            } => BusMessage::leave_room(&JoinRoomPayload {
                order_id: order_id.clone(),
                owner_key: owner_key.clone(),
            }),
        }
    }
}

/// An established connection and its in-flight RPC table
struct Connection {
    transport: ClientTransport,
    client_id: String,
    pending_requests: Arc<Mutex<HashMap<Uuid, oneshot::Sender<BusMessage>>>>,
    shutdown: CancellationToken,
}

/// Client connection manager, constructed once per process and passed
/// by dependency injection to everything that needs realtime access
#[derive(Clone)]
pub struct ConnectionManager {
    config: ClientConfig,
    inner: Arc<Inner>,
}

struct Inner {
    connection: tokio::sync::Mutex<Option<Arc<Connection>>>,
    queued_ops: Mutex<VecDeque<QueuedOp>>,
    /// Order ids joined on the current connection; cleared on loss
    /// because memberships do not survive server-side either
    joined: Mutex<HashSet<String>>,
    handlers: Arc<Mutex<HashMap<String, HandlerEntry>>>,
    generation: AtomicU64,
    reconnecting: AtomicBool,
}

impl ConnectionManager {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            inner: Arc::new(Inner {
                connection: tokio::sync::Mutex::new(None),
                queued_ops: Mutex::new(VecDeque::new()),
                joined: Mutex::new(HashSet::new()),
                handlers: Arc::new(Mutex::new(HashMap::new())),
                generation: AtomicU64::new(0),
                reconnecting: AtomicBool::new(false),
            }),
        }
    }

    // ========== Connection lifecycle ==========

    /// Establish the connection if not already established
    ///
    /// Safe to call from multiple call sites concurrently; callers
    /// serialize on the slot and all observe the same connection.
    pub async fn connect(&self) -> ClientResult<()> {
        let mut slot = self.inner.connection.lock().await;
        if slot.is_some() {
            return Ok(());
        }

        let conn = self.establish().await?;
        tracing::info!(client_id = %conn.client_id, "Connected");
        *slot = Some(conn.clone());
        drop(slot);

        self.replay_queued(&conn).await;
        Ok(())
    }

    /// Attach over in-process channels instead of TCP
    pub async fn connect_memory(
        &self,
        server_broadcast_tx: &broadcast::Sender<BusMessage>,
        client_to_server_tx: &broadcast::Sender<BusMessage>,
    ) -> ClientResult<()> {
        let mut slot = self.inner.connection.lock().await;
        if slot.is_some() {
            return Ok(());
        }

        let transport = ClientTransport::Memory(MemoryTransport::new(
            server_broadcast_tx,
            client_to_server_tx,
        ));
        let client_id = format!("{}-{}", self.config.client_name, Uuid::new_v4());
        let conn = self.install(transport, client_id);
        *slot = Some(conn.clone());
        drop(slot);

        self.replay_queued(&conn).await;
        Ok(())
    }

    /// Tear down the connection; calling again is a no-op
    pub async fn disconnect(&self) {
        let conn = { self.inner.connection.lock().await.take() };
        self.inner.joined.lock().unwrap().clear();
        if let Some(conn) = conn {
            conn.shutdown.cancel();
            let _ = conn.transport.close().await;
            tracing::info!(client_id = %conn.client_id, "Disconnected");
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.inner.connection.lock().await.is_some()
    }

    /// Server-assigned id of the current connection
    pub async fn client_id(&self) -> Option<String> {
        self.inner
            .connection
            .lock()
            .await
            .as_ref()
            .map(|c| c.client_id.clone())
    }

    async fn establish(&self) -> ClientResult<Arc<Connection>> {
        let transport =
            ClientTransport::Tcp(TcpTransport::connect(&self.config.message_tcp_addr).await?);

        let handshake = BusMessage::handshake(&HandshakePayload {
            version: PROTOCOL_VERSION,
            client_name: Some(self.config.client_name.clone()),
            client_id: None,
        });
        transport.write_message(&handshake).await?;

        // Ack is read before the dispatcher starts, so it cannot race
        let ack = tokio::time::timeout(self.request_timeout(), transport.read_message())
            .await
            .map_err(|_| ClientError::Timeout("Handshake timed out".to_string()))??;
        let payload: ResponsePayload = ack.parse_payload()?;
        if !payload.success {
            return Err(ClientError::Server {
                code: payload.error_code,
                message: payload.message,
            });
        }

        let client_id = payload
            .data
            .as_ref()
            .and_then(|d| d.get("client_id"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        Ok(self.install(transport, client_id))
    }

    fn install(&self, transport: ClientTransport, client_id: String) -> Arc<Connection> {
        let conn = Arc::new(Connection {
            transport,
            client_id,
            pending_requests: Arc::new(Mutex::new(HashMap::new())),
            shutdown: CancellationToken::new(),
        });

        let manager = self.clone();
        let dispatcher_conn = conn.clone();
        tokio::spawn(async move {
            manager.dispatch(dispatcher_conn).await;
        });

        conn
    }

    /// Read loop: resolves RPC replies and fans updates out to handlers
    async fn dispatch(&self, conn: Arc<Connection>) {
        loop {
            tokio::select! {
                _ = conn.shutdown.cancelled() => {
                    tracing::debug!(client_id = %conn.client_id, "Dispatcher stopped");
                    return;
                }
                result = conn.transport.read_message() => {
                    match result {
                        Ok(msg) => self.route(&conn, msg),
                        Err(e) => {
                            tracing::warn!(client_id = %conn.client_id, "Connection lost: {}", e);
                            break;
                        }
                    }
                }
            }
        }

        self.on_disconnect().await;
    }

    fn route(&self, conn: &Connection, msg: BusMessage) {
        if let Some(correlation_id) = msg.correlation_id {
            let sender = {
                let mut pending = conn.pending_requests.lock().unwrap();
                pending.remove(&correlation_id)
            };
            if let Some(tx) = sender {
                let _ = tx.send(msg);
                return;
            }
        }

        if msg.event_type == shared::message::EventType::OrderUpdate {
            match msg.parse_payload::<OrderUpdatePayload>() {
                Ok(payload) => {
                    // Two orders of the same owner class and kind share
                    // an event name; only updates for orders this
                    // client joined reach the handler. The TCP
                    // forwarder filters by room server-side already,
                    // memory transports see every broadcast frame.
                    {
                        let joined = self.inner.joined.lock().unwrap();
                        if !joined.contains(&payload.order_id) {
                            return;
                        }
                    }
                    let handler = {
                        let handlers = self.inner.handlers.lock().unwrap();
                        handlers.get(&payload.event).map(|e| e.handler.clone())
                    };
                    if let Some(handler) = handler {
                        handler(payload);
                    }
                }
                Err(e) => {
                    tracing::warn!("Malformed order update: {}", e);
                }
            }
        }
    }

    async fn on_disconnect(&self) {
        {
            let mut slot = self.inner.connection.lock().await;
            *slot = None;
        }
        // Memberships died with the connection; the owning scope joins
        // again after reconnecting
        self.inner.joined.lock().unwrap().clear();

        if self.inner.reconnecting.swap(true, Ordering::SeqCst) {
            return;
        }

        let manager = self.clone();
        tokio::spawn(async move {
            manager.reconnect_loop().await;
            manager.inner.reconnecting.store(false, Ordering::SeqCst);
        });
    }

    /// Bounded reconnect with capped exponential backoff
    async fn reconnect_loop(&self) {
        for attempt in 0..self.config.max_reconnect_attempts {
            tokio::time::sleep(self.config.reconnect_delay(attempt)).await;

            match self.connect().await {
                Ok(()) => {
                    tracing::info!(attempt = attempt + 1, "Reconnected");
                    return;
                }
                Err(e) => {
                    tracing::warn!(attempt = attempt + 1, "Reconnect failed: {}", e);
                }
            }
        }

        tracing::error!(
            attempts = self.config.max_reconnect_attempts,
            "Giving up on reconnecting"
        );
    }

    // ========== Rooms ==========

    /// Join an order room; idempotent, queued for replay when
    /// disconnected
    pub async fn join_room(&self, order_id: &str, owner_key: &str) -> ClientResult<()> {
        {
            let joined = self.inner.joined.lock().unwrap();
            if joined.contains(order_id) {
                return Ok(());
            }
        }

        let op = QueuedOp::Join {
            order_id: order_id.to_string(),
            owner_key: owner_key.to_string(),
        };
        self.send_or_queue(op).await?;
        self.inner
            .joined
            .lock()
            .unwrap()
            .insert(order_id.to_string());
        Ok(())
    }

    /// Leave an order room; idempotent, queued when disconnected
    pub async fn leave_room(&self, order_id: &str, owner_key: &str) -> ClientResult<()> {
        self.inner.joined.lock().unwrap().remove(order_id);

        let op = QueuedOp::Leave {
            order_id: order_id.to_string(),
            owner_key: owner_key.to_string(),
        };
        self.send_or_queue(op).await
    }

    async fn send_or_queue(&self, op: QueuedOp) -> ClientResult<()> {
        let conn = { self.inner.connection.lock().await.clone() };
        match conn {
            Some(conn) => {
                let response = self.request_on(&conn, op.to_message()).await?;
                Self::check_response(response)
            }
            None => {
                tracing::debug!(?op, "Not connected, queueing operation");
                self.inner.queued_ops.lock().unwrap().push_back(op);
                Ok(())
            }
        }
    }

    async fn replay_queued(&self, conn: &Arc<Connection>) {
        let ops: Vec<QueuedOp> = {
            let mut queue = self.inner.queued_ops.lock().unwrap();
            queue.drain(..).collect()
        };

        for op in ops {
            let outcome = match self.request_on(conn, op.to_message()).await {
                Ok(response) => Self::check_response(response),
                Err(e) => Err(e),
            };
            match outcome {
                // The joined set was cleared with the old connection;
                // a replayed join re-establishes local membership too
                Ok(()) => match &op {
                    QueuedOp::Join { order_id, .. } => {
                        self.inner.joined.lock().unwrap().insert(order_id.clone());
                    }
                    QueuedOp::Leave { order_id, .. } => {
                        self.inner.joined.lock().unwrap().remove(order_id);
                    }
                },
                Err(e) => {
                    tracing::warn!(?op, "Queued operation replay failed: {}", e);
                }
            }
        }
    }

    // ========== Subscriptions ==========

    /// Register a handler for one event name
    ///
    /// At most one handler per name; subscribing again replaces the
    /// previous handler silently. The returned handle unregisters the
    /// handler when dropped, on every exit path of the owning scope.
    pub fn subscribe(
        &self,
        event_name: impl Into<String>,
        handler: impl Fn(OrderUpdatePayload) + Send + Sync + 'static,
    ) -> Subscription {
        let name = event_name.into();
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;

        self.inner.handlers.lock().unwrap().insert(
            name.clone(),
            HandlerEntry {
                generation,
                handler: Arc::new(handler),
            },
        );

        Subscription {
            name,
            generation,
            handlers: self.inner.handlers.clone(),
        }
    }

    // ========== RPC ==========

    /// Query the current persisted order state from the server
    pub async fn status_query(&self, order_id: &str) -> ClientResult<OrderRecord> {
        self.connect_if_tcp().await?;
        let conn = { self.inner.connection.lock().await.clone() }
            .ok_or_else(|| ClientError::Connection("Not connected".to_string()))?;

        let msg = BusMessage::status_query(&StatusQueryPayload {
            order_id: order_id.to_string(),
        });
        let response = self.request_on(&conn, msg).await?;
        let payload: ResponsePayload = response.parse_payload()?;
        if !payload.success {
            return Err(ClientError::Server {
                code: payload.error_code,
                message: payload.message,
            });
        }

        let data = payload
            .data
            .ok_or_else(|| ClientError::InvalidResponse("Missing order data".to_string()))?;
        Ok(serde_json::from_value(data)?)
    }

    /// Send a message and await its correlated response
    async fn request_on(
        &self,
        conn: &Arc<Connection>,
        mut msg: BusMessage,
    ) -> ClientResult<BusMessage> {
        // The TCP server stamps source itself; memory transports skip
        // that path, so the client stamps its own id here
        msg.source = Some(conn.client_id.clone());
        let request_id = msg.request_id;
        let (tx, rx) = oneshot::channel();

        {
            let mut pending = conn.pending_requests.lock().unwrap();
            pending.insert(request_id, tx);
        }

        if let Err(e) = conn.transport.write_message(&msg).await {
            let mut pending = conn.pending_requests.lock().unwrap();
            pending.remove(&request_id);
            return Err(e);
        }

        match tokio::time::timeout(self.request_timeout(), rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(ClientError::Connection(
                "Response channel closed".to_string(),
            )),
            Err(_) => {
                let mut pending = conn.pending_requests.lock().unwrap();
                pending.remove(&request_id);
                Err(ClientError::Timeout("Request timed out".to_string()))
            }
        }
    }

    fn check_response(msg: BusMessage) -> ClientResult<()> {
        let payload: ResponsePayload = msg.parse_payload()?;
        if payload.success {
            Ok(())
        } else {
            Err(ClientError::Server {
                code: payload.error_code,
                message: payload.message,
            })
        }
    }

    /// Lazily connect over TCP; a no-op when already attached (memory
    /// connections included)
    async fn connect_if_tcp(&self) -> ClientResult<()> {
        if self.is_connected().await {
            return Ok(());
        }
        self.connect().await
    }

    fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.config.request_timeout_secs)
    }
}

/// Scoped subscription handle
///
/// Dropping it unregisters the handler unless a newer subscription has
/// already replaced it.
pub struct Subscription {
    name: String,
    generation: u64,
    handlers: Arc<Mutex<HashMap<String, HandlerEntry>>>,
}

impl Subscription {
    /// Explicit release; dropping has the same effect
    pub fn release(self) {}

    pub fn event_name(&self) -> &str {
        &self.name
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let mut handlers = self.handlers.lock().unwrap();
        let stale = handlers
            .get(&self.name)
            .is_some_and(|entry| entry.generation == self.generation);
        if stale {
            handlers.remove(&self.name);
        }
    }
}
