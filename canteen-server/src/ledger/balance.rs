use dashmap::DashMap;
use rust_decimal::Decimal;

use crate::utils::{AppError, AppResult};

/// Per-owner prepaid balance ledger
///
/// Amounts are never negative: `debit` checks sufficiency and applies
/// atomically under the key's entry lock.
#[derive(Debug, Default)]
pub struct BalanceLedger {
    accounts: DashMap<String, Decimal>,
}

impl BalanceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current balance, zero for unknown owners
    pub fn balance(&self, owner_key: &str) -> Decimal {
        self.accounts
            .get(owner_key)
            .map(|entry| *entry.value())
            .unwrap_or(Decimal::ZERO)
    }

    /// Top up an account (also used for refunds and saga compensation)
    pub fn credit(&self, owner_key: &str, amount: Decimal) -> AppResult<Decimal> {
        if amount < Decimal::ZERO {
            return Err(AppError::invalid("credit amount must be non-negative"));
        }
        let mut entry = self
            .accounts
            .entry(owner_key.to_string())
            .or_insert(Decimal::ZERO);
        *entry += amount;
        Ok(*entry)
    }

    /// Debit with a sufficiency check, atomic per owner key
    pub fn debit(&self, owner_key: &str, amount: Decimal) -> AppResult<Decimal> {
        if amount < Decimal::ZERO {
            return Err(AppError::invalid("debit amount must be non-negative"));
        }
        let mut entry = self
            .accounts
            .entry(owner_key.to_string())
            .or_insert(Decimal::ZERO);
        if *entry < amount {
            return Err(AppError::InsufficientBalance {
                required: amount,
                available: *entry,
            });
        }
        *entry -= amount;
        Ok(*entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_debit_requires_sufficient_balance() {
        let ledger = BalanceLedger::new();
        ledger.credit("a@campus.edu", Decimal::from(50)).unwrap();

        assert!(matches!(
            ledger.debit("a@campus.edu", Decimal::from(60)),
            Err(AppError::InsufficientBalance { .. })
        ));
        // Failed debit leaves the balance untouched
        assert_eq!(ledger.balance("a@campus.edu"), Decimal::from(50));

        let rest = ledger.debit("a@campus.edu", Decimal::from(50)).unwrap();
        assert_eq!(rest, Decimal::ZERO);
    }

    #[test]
    fn test_unknown_owner_has_zero_balance() {
        let ledger = BalanceLedger::new();
        assert_eq!(ledger.balance("nobody@campus.edu"), Decimal::ZERO);
        assert!(ledger.debit("nobody@campus.edu", Decimal::ONE).is_err());
    }

    #[test]
    fn test_concurrent_debits_never_overdraw() {
        let ledger = Arc::new(BalanceLedger::new());
        ledger.credit("a@campus.edu", Decimal::from(100)).unwrap();

        let mut handles = Vec::new();
        for _ in 0..20 {
            let ledger = ledger.clone();
            handles.push(std::thread::spawn(move || {
                ledger.debit("a@campus.edu", Decimal::from(10)).is_ok()
            }));
        }

        let succeeded = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();

        // Exactly ten 10-unit debits fit into 100
        assert_eq!(succeeded, 10);
        assert_eq!(ledger.balance("a@campus.edu"), Decimal::ZERO);
    }
}
