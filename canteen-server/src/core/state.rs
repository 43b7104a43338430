//! Server state - shared handles to every service
//!
//! Cloning is shallow: all members are Arc-backed or channel-backed.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::catalog::{Catalog, InMemoryCatalog};
use crate::core::Config;
use crate::ledger::{BalanceLedger, InventoryLedger};
use crate::message::{MessageBus, MessageHandler, TransportConfig};
use crate::orders::{CompensationSweeper, OrderStore, OrdersManager};
use crate::rooms::RoomRegistry;
use crate::utils::AppResult;

/// Shared server state
///
/// | Field | Role |
/// |-------|------|
/// | config | immutable configuration |
/// | store | persisted orders and compensation queue |
/// | balance | per-owner prepaid accounts |
/// | inventory | per-item availability |
/// | catalog | price / item-class lookups |
/// | rooms | per-order realtime rooms |
/// | bus | message routing |
/// | orders | lifecycle orchestration |
#[derive(Clone)]
pub struct ServerState {
    pub config: Config,
    pub store: OrderStore,
    pub balance: Arc<BalanceLedger>,
    pub inventory: Arc<InventoryLedger>,
    pub catalog: Arc<dyn Catalog>,
    pub rooms: Arc<RoomRegistry>,
    pub bus: MessageBus,
    pub orders: OrdersManager,
}

impl ServerState {
    /// Initialize every service from configuration
    ///
    /// The catalog is loaded from `{work_dir}/catalog.json` when the
    /// file exists, otherwise starts empty.
    pub fn initialize(config: &Config) -> AppResult<Self> {
        let work_dir = std::path::Path::new(&config.work_dir);
        let store = OrderStore::open(work_dir.join("orders.redb"))?;

        let catalog_path = work_dir.join("catalog.json");
        let catalog: Arc<dyn Catalog> = if catalog_path.exists() {
            Arc::new(InMemoryCatalog::from_json_file(&catalog_path)?)
        } else {
            tracing::warn!("No catalog file at {}, starting empty", catalog_path.display());
            Arc::new(InMemoryCatalog::new())
        };

        Self::with_catalog(config, store, catalog)
    }

    /// Initialize with an externally-built catalog and store
    pub fn with_catalog(
        config: &Config,
        store: OrderStore,
        catalog: Arc<dyn Catalog>,
    ) -> AppResult<Self> {
        let balance = Arc::new(BalanceLedger::new());
        let inventory = Arc::new(InventoryLedger::new());
        let rooms = Arc::new(RoomRegistry::new());

        let bus = MessageBus::from_config(TransportConfig {
            tcp_listen_addr: format!("0.0.0.0:{}", config.message_tcp_port),
            ..Default::default()
        });

        let orders = OrdersManager::new(
            store.clone(),
            balance.clone(),
            inventory.clone(),
            catalog.clone(),
            rooms.clone(),
            bus.clone(),
            config.clone(),
        );

        Ok(Self {
            config: config.clone(),
            store,
            balance,
            inventory,
            catalog,
            rooms,
            bus,
            orders,
        })
    }

    /// Spawn the long-running background tasks: the message handler
    /// servicing client requests and the compensation sweeper.
    pub fn start_background_tasks(&self) {
        let handler = MessageHandler::new(
            self.bus.clone(),
            self.store.clone(),
            self.rooms.clone(),
            self.config.clone(),
            self.bus.shutdown_token().clone(),
        );
        tokio::spawn(handler.run());

        let sweeper = CompensationSweeper::new(
            self.store.clone(),
            self.balance.clone(),
            self.inventory.clone(),
            std::time::Duration::from_secs(self.config.sweeper_interval_secs),
            self.bus.shutdown_token().clone(),
        );
        tokio::spawn(sweeper.run());
    }

    /// Shutdown token shared by every background task
    pub fn shutdown_token(&self) -> &CancellationToken {
        self.bus.shutdown_token()
    }
}
