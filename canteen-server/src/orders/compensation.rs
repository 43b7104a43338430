//! Durable compensation queue
//!
//! Each saga step that may need undoing writes an intent record to redb
//! *before* the compensating action runs. A successful compensation
//! deletes the intent; a failed one stays queued with its attempt count
//! and last error, and the background sweeper retries it with capped
//! exponential backoff. A crash between the primary failure and its
//! compensation therefore loses nothing.
//!
//! Compensation failures are logged with full reconciliation context
//! (order id, owner key, amount, step) and are never surfaced as the
//! caller's primary error.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use shared::order::{LineItem, OrderRecord};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::store::OrderStore;
use crate::ledger::{BalanceLedger, InventoryLedger};
use crate::utils::AppResult;

/// Maximum backoff between retries of one intent
const MAX_BACKOFF_SECS: u64 = 60;

/// Compensating action for a completed saga step
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum CompensationAction {
    /// Undo a balance debit
    CreditBalance { amount: Decimal },
    /// Undo an inventory decrement
    RestoreInventory { items: Vec<LineItem> },
}

/// Queued compensation record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompensationIntent {
    pub id: String,
    pub order_id: String,
    pub owner_key: String,
    #[serde(flatten)]
    pub action: CompensationAction,
    pub created_at: i64,
    pub attempts: u32,
    pub last_attempt_at: Option<i64>,
    pub last_error: Option<String>,
}

impl CompensationIntent {
    fn new(order: &OrderRecord, action: CompensationAction) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            order_id: order.id.clone(),
            owner_key: order.owner_key.clone(),
            action,
            created_at: Utc::now().timestamp(),
            attempts: 0,
            last_attempt_at: None,
            last_error: None,
        }
    }

    pub fn credit_balance(order: &OrderRecord) -> Self {
        Self::new(
            order,
            CompensationAction::CreditBalance {
                amount: order.total_price,
            },
        )
    }

    pub fn restore_inventory(order: &OrderRecord) -> Self {
        Self::new(
            order,
            CompensationAction::RestoreInventory {
                items: order.items.clone(),
            },
        )
    }

    /// Run the compensating action against the ledgers
    pub fn execute(&self, balance: &BalanceLedger, inventory: &InventoryLedger) -> AppResult<()> {
        match &self.action {
            CompensationAction::CreditBalance { amount } => {
                balance.credit(&self.owner_key, *amount)?;
                Ok(())
            }
            CompensationAction::RestoreInventory { items } => {
                inventory.restore(items);
                Ok(())
            }
        }
    }

    /// Whether this intent is due for a retry at `now` (unix seconds)
    fn due(&self, now: i64) -> bool {
        match self.last_attempt_at {
            None => true,
            Some(last) => {
                let backoff = 1u64
                    .checked_shl(self.attempts.min(6))
                    .unwrap_or(MAX_BACKOFF_SECS)
                    .min(MAX_BACKOFF_SECS);
                now >= last + backoff as i64
            }
        }
    }
}

/// Background sweeper retrying queued compensations
pub struct CompensationSweeper {
    store: OrderStore,
    balance: Arc<BalanceLedger>,
    inventory: Arc<InventoryLedger>,
    interval: Duration,
    shutdown_token: CancellationToken,
}

impl CompensationSweeper {
    pub fn new(
        store: OrderStore,
        balance: Arc<BalanceLedger>,
        inventory: Arc<InventoryLedger>,
        interval: Duration,
        shutdown_token: CancellationToken,
    ) -> Self {
        Self {
            store,
            balance,
            inventory,
            interval,
            shutdown_token,
        }
    }

    /// Long-running task; spawn in the background
    pub async fn run(self) {
        tracing::info!("Compensation sweeper started");
        let mut ticker = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = self.shutdown_token.cancelled() => {
                    tracing::info!("Compensation sweeper shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    self.sweep();
                }
            }
        }
    }

    /// One pass over the queue; public for tests
    pub fn sweep(&self) {
        let intents = match self.store.pending_intents() {
            Ok(intents) => intents,
            Err(e) => {
                tracing::error!("Failed to read compensation queue: {}", e);
                return;
            }
        };

        let now = Utc::now().timestamp();
        for mut intent in intents {
            if !intent.due(now) {
                continue;
            }

            match intent.execute(&self.balance, &self.inventory) {
                Ok(()) => {
                    if let Err(e) = self.store.delete_intent(&intent.id) {
                        tracing::error!(
                            intent_id = %intent.id,
                            order_id = %intent.order_id,
                            "Compensation applied but intent delete failed: {}", e
                        );
                        continue;
                    }
                    tracing::info!(
                        intent_id = %intent.id,
                        order_id = %intent.order_id,
                        owner_key = %intent.owner_key,
                        attempts = intent.attempts,
                        "Compensation applied"
                    );
                }
                Err(e) => {
                    intent.attempts += 1;
                    intent.last_attempt_at = Some(now);
                    intent.last_error = Some(e.to_string());
                    tracing::error!(
                        intent_id = %intent.id,
                        order_id = %intent.order_id,
                        owner_key = %intent.owner_key,
                        attempts = intent.attempts,
                        "Compensation failed, requeued: {}", e
                    );
                    if let Err(e) = self.store.put_intent(&intent) {
                        tracing::error!(
                            intent_id = %intent.id,
                            "Failed to requeue compensation intent: {}", e
                        );
                    }
                }
            }
        }
    }
}
