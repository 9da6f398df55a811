// =============================================================================
// Paper balance (C9)
// =============================================================================
//
// Per-asset custody view derived from cash and open positions, keyed by
// `(portfolio_id, asset)`. Invariant: `total = free + locked`.
// =============================================================================

use std::collections::HashMap;

use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PaperBalance {
    pub free: Decimal,
    pub locked: Decimal,
    pub total: Decimal,
    pub usd_value: Decimal,
}

impl PaperBalance {
    pub fn new(free: Decimal, locked: Decimal, usd_value: Decimal) -> Self {
        Self {
            free,
            locked,
            total: free + locked,
            usd_value,
        }
    }
}

/// Holds one `PaperBalance` per `(portfolio_id, asset)`.
pub struct BalanceStore {
    balances: RwLock<HashMap<(Uuid, String), PaperBalance>>,
}

impl BalanceStore {
    pub fn new() -> Self {
        Self {
            balances: RwLock::new(HashMap::new()),
        }
    }

    pub fn set(&self, portfolio_id: Uuid, asset: impl Into<String>, balance: PaperBalance) {
        self.balances.write().insert((portfolio_id, asset.into()), balance);
    }

    pub fn get(&self, portfolio_id: Uuid, asset: &str) -> Option<PaperBalance> {
        self.balances.read().get(&(portfolio_id, asset.to_string())).copied()
    }

    pub fn list_for_portfolio(&self, portfolio_id: Uuid) -> Vec<(String, PaperBalance)> {
        self.balances
            .read()
            .iter()
            .filter(|((pid, _), _)| *pid == portfolio_id)
            .map(|((_, asset), balance)| (asset.clone(), *balance))
            .collect()
    }
}

impl Default for BalanceStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn total_is_free_plus_locked() {
        let b = PaperBalance::new(dec!(10), dec!(5), dec!(150));
        assert_eq!(b.total, dec!(15));
    }

    #[test]
    fn list_for_portfolio_filters_by_id() {
        let store = BalanceStore::new();
        let p1 = Uuid::new_v4();
        let p2 = Uuid::new_v4();
        store.set(p1, "USDT", PaperBalance::new(dec!(100), Decimal::ZERO, dec!(100)));
        store.set(p2, "USDT", PaperBalance::new(dec!(50), Decimal::ZERO, dec!(50)));
        let listed = store.list_for_portfolio(p1);
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].0, "USDT");
    }
}
