use dashmap::DashMap;
use shared::order::LineItem;

use crate::utils::{AppError, AppResult};

/// Shared inventory ledger, keyed by item name
///
/// `decrement` is all-or-nothing across one order's line items: when a
/// later item lacks stock, decrements already applied for earlier items
/// are rolled back before the error is returned, so the saga only ever
/// compensates the balance, never partial inventory.
#[derive(Debug, Default)]
pub struct InventoryLedger {
    items: DashMap<String, u32>,
}

impl InventoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current availability, zero for unknown items
    pub fn available(&self, name: &str) -> u32 {
        self.items.get(name).map(|entry| *entry.value()).unwrap_or(0)
    }

    /// Set absolute availability (stocking; tests and demo data)
    pub fn stock(&self, name: impl Into<String>, quantity: u32) {
        self.items.insert(name.into(), quantity);
    }

    /// Decrement availability for every line item, atomically per key
    pub fn decrement(&self, items: &[LineItem]) -> AppResult<()> {
        let mut applied: Vec<&LineItem> = Vec::with_capacity(items.len());

        for item in items {
            let result = {
                let mut entry = self.items.entry(item.name.clone()).or_insert(0);
                if *entry < item.quantity {
                    Err(AppError::InsufficientStock {
                        item: item.name.clone(),
                        requested: item.quantity,
                        available: *entry,
                    })
                } else {
                    *entry -= item.quantity;
                    Ok(())
                }
            };

            match result {
                Ok(()) => applied.push(item),
                Err(e) => {
                    // Roll back earlier decrements of this same call
                    for rolled in applied {
                        let mut entry = self.items.entry(rolled.name.clone()).or_insert(0);
                        *entry += rolled.quantity;
                    }
                    return Err(e);
                }
            }
        }

        Ok(())
    }

    /// Restore availability (cancellation refund or saga compensation)
    pub fn restore(&self, items: &[LineItem]) {
        for item in items {
            let mut entry = self.items.entry(item.name.clone()).or_insert(0);
            *entry += item.quantity;
        }
    }
}
