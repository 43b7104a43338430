//! Canteen Server - campus food-ordering backend
//!
//! # Architecture
//!
//! - **Message bus** (`message`): realtime message system over TCP or
//!   in-process transports, with per-order room routing
//! - **Orders** (`orders`): creation saga, cancellation window,
//!   durable compensation queue, redb persistence
//! - **Ledgers** (`ledger`): linearizable per-key balance and
//!   inventory accounting
//! - **HTTP API** (`api`): RESTful order endpoints
//!
//! # Module structure
//!
//! ```text
//! canteen-server/src/
//! ├── core/      # configuration, state, server
//! ├── api/       # HTTP routes and handlers
//! ├── catalog/   # price / item-class lookup seam
//! ├── ledger/    # balance and inventory ledgers
//! ├── message/   # message bus and transports
//! ├── orders/    # lifecycle, saga, compensation
//! ├── rooms/     # realtime room registry
//! └── utils/     # errors, logging
//! ```

pub mod api;
pub mod catalog;
pub mod core;
pub mod ledger;
pub mod message;
pub mod orders;
pub mod rooms;
pub mod utils;

pub use catalog::{Catalog, CatalogItem, InMemoryCatalog, ItemClass};
pub use core::{Config, Server, ServerState};
pub use ledger::{BalanceLedger, InventoryLedger};
pub use message::{MessageBus, MessageHandler};
pub use orders::{OrderStore, OrdersManager};
pub use rooms::RoomRegistry;
pub use utils::logger::{init_logger, init_logger_with_file};
pub use utils::{AppError, AppResponse, AppResult};

/// Prepare the process environment: dotenv, working directory, logging
pub fn setup_environment() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    let config = Config::from_env();
    std::fs::create_dir_all(&config.work_dir)?;

    if config.is_production() {
        let log_dir = format!("{}/logs", config.work_dir);
        std::fs::create_dir_all(&log_dir)?;
        init_logger_with_file(Some("info"), Some(&log_dir));
    } else {
        init_logger();
    }

    Ok(())
}
