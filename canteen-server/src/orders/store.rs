//! redb-backed order store
//!
//! # Tables
//!
//! | Table | Key | Value | Purpose |
//! |-------|-----|-------|---------|
//! | `orders` | `order_id` | `OrderRecord` | Single source of truth for order state |
//! | `compensation_intents` | `intent_id` | `CompensationIntent` | Durable compensation queue |
//! | `counters` | `"order_count"` | `u64` | Display token source |
//!
//! Orders are never deleted; terminal statuses are stamped in place.
//!
//! # Transition locking
//!
//! Every status transition runs under the order's entry in a lock
//! registry. `transition_with` re-reads the current status inside the
//! lock, so an owner cancellation racing a kitchen "preparing" resolves
//! deterministically: whichever acquires the lock first wins, the other
//! gets `InvalidTransition`.

use dashmap::DashMap;
use parking_lot::Mutex;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use shared::order::{OrderRecord, OrderStatus};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use super::compensation::CompensationIntent;
use crate::utils::{AppError, AppResult};

/// key = order_id, value = JSON-serialized OrderRecord
const ORDERS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("orders");

/// key = intent_id, value = JSON-serialized CompensationIntent
const COMPENSATION_TABLE: TableDefinition<&str, &[u8]> =
    TableDefinition::new("compensation_intents");

/// key = counter name, value = u64
const COUNTERS_TABLE: TableDefinition<&str, u64> = TableDefinition::new("counters");

const ORDER_COUNT_KEY: &str = "order_count";

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("Storage error: {0}")]
    Storage(#[from] redb::StorageError),

    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<StorageError> for AppError {
    fn from(e: StorageError) -> Self {
        AppError::storage(e.to_string())
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Order store backed by redb, plus the per-order transition locks
#[derive(Clone)]
pub struct OrderStore {
    db: Arc<Database>,
    /// Per-order transition locks; entries live as long as the process
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl OrderStore {
    /// Open (or create) the store at `path` and ensure all tables exist
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let db = Database::create(path)?;

        let txn = db.begin_write()?;
        {
            txn.open_table(ORDERS_TABLE)?;
            txn.open_table(COMPENSATION_TABLE)?;
            txn.open_table(COUNTERS_TABLE)?;
        }
        txn.commit()?;

        Ok(Self {
            db: Arc::new(db),
            locks: Arc::new(DashMap::new()),
        })
    }

    fn lock_for(&self, order_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(order_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Next order number for display tokens
    pub fn next_order_number(&self) -> StorageResult<u64> {
        let txn = self.db.begin_write()?;
        let next = {
            let mut table = txn.open_table(COUNTERS_TABLE)?;
            let current = table.get(ORDER_COUNT_KEY)?.map(|v| v.value()).unwrap_or(0);
            let next = current + 1;
            table.insert(ORDER_COUNT_KEY, next)?;
            next
        };
        txn.commit()?;
        Ok(next)
    }

    /// Persist a new order record
    pub fn insert(&self, order: &OrderRecord) -> StorageResult<()> {
        let bytes = serde_json::to_vec(order)?;
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(ORDERS_TABLE)?;
            table.insert(order.id.as_str(), bytes.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Fetch an order by id
    pub fn get(&self, order_id: &str) -> StorageResult<Option<OrderRecord>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(ORDERS_TABLE)?;
        match table.get(order_id)? {
            Some(guard) => Ok(Some(serde_json::from_slice(guard.value())?)),
            None => Ok(None),
        }
    }

    /// Fetch an order or fail with NotFound
    pub fn require(&self, order_id: &str) -> AppResult<OrderRecord> {
        self.get(order_id)?
            .ok_or_else(|| AppError::not_found(format!("Order {} not found", order_id)))
    }

    /// Apply a status transition under the order's lock.
    ///
    /// `guard` runs against the freshly-read record while the lock is
    /// held (window checks, ownership checks); the transition is only
    /// applied when the guard passes and the state machine permits it.
    /// Returns the updated record.
    pub fn transition_with<F>(
        &self,
        order_id: &str,
        to: OrderStatus,
        guard: F,
    ) -> AppResult<OrderRecord>
    where
        F: FnOnce(&OrderRecord) -> AppResult<()>,
    {
        let lock = self.lock_for(order_id);
        let _guard = lock.lock();

        let mut order = self.require(order_id)?;
        guard(&order)?;

        if !order.status.can_transition_to(to) {
            return Err(AppError::InvalidTransition {
                from: order.status,
                to,
            });
        }

        order.status = to;
        self.insert(&order)?;
        Ok(order)
    }

    /// Shorthand for unguarded transitions (kitchen advancement, saga
    /// failure stamping)
    pub fn transition(&self, order_id: &str, to: OrderStatus) -> AppResult<OrderRecord> {
        self.transition_with(order_id, to, |_| Ok(()))
    }

    // ========== Compensation queue ==========

    /// Write an intent record before the compensating action runs
    pub fn put_intent(&self, intent: &CompensationIntent) -> StorageResult<()> {
        let bytes = serde_json::to_vec(intent)?;
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(COMPENSATION_TABLE)?;
            table.insert(intent.id.as_str(), bytes.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Remove an intent after its compensation succeeded
    pub fn delete_intent(&self, intent_id: &str) -> StorageResult<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(COMPENSATION_TABLE)?;
            table.remove(intent_id)?;
        }
        txn.commit()?;
        Ok(())
    }

    /// All queued intents, for the sweeper
    pub fn pending_intents(&self) -> StorageResult<Vec<CompensationIntent>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(COMPENSATION_TABLE)?;
        let mut intents = Vec::new();
        for entry in table.iter()? {
            let (_, value) = entry?;
            intents.push(serde_json::from_slice(value.value())?);
        }
        Ok(intents)
    }
}
