//! Prepaid balance and shared inventory ledgers.
//!
//! Both ledgers guarantee single-writer-at-a-time per key: every
//! read-modify-write goes through the map's entry API, so concurrent
//! orders against the same balance or the same inventory item never
//! interleave into an inconsistent amount. There is no cross-key or
//! cross-ledger transaction; the creation saga sequences and compensates
//! across them.

mod balance;
mod inventory;

pub use balance::BalanceLedger;
pub use inventory::InventoryLedger;
