//! Client-side connection management for the canteen ordering service.
//!
//! ```text
//! +-------------------+      TCP / in-memory      +----------------+
//! | ConnectionManager | <-----------------------> | canteen-server |
//! |  - memoized conn  |                           +----------------+
//! |  - queued ops     |
//! |  - subscriptions  |
//! +-------------------+
//!          |
//!          +-- Countdown (cancellation window ticker)
//!          +-- LocalStore (tracked order persistence)
//! ```
//!
//! The manager owns one logical connection, establishes it lazily, and
//! reconnects with bounded backoff when the transport drops. Room
//! memberships do not survive a reconnect; callers re-join and then
//! reconcile with a status query.

pub mod config;
pub mod connection;
pub mod countdown;
pub mod error;
pub mod store;
pub mod transport;

pub use config::ClientConfig;
pub use connection::{ConnectionManager, Subscription, UpdateHandler};
pub use countdown::Countdown;
pub use error::{ClientError, ClientResult};
pub use store::{JsonFileStore, LocalStore, TrackedOrder};
pub use transport::ClientTransport;

pub use shared::message::{BusMessage, EventType, OrderUpdatePayload};
pub use shared::order::{OrderRecord, OrderStatus};
