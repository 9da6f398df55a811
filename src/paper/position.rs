// =============================================================================
// Paper position (C9)
// =============================================================================
//
// Average-cost-basis accounting: one position per `(portfolio, symbol)`,
// averaged in on every buy, never split.
// =============================================================================

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperPosition {
    pub id: Uuid,
    pub portfolio_id: Uuid,
    pub symbol: String,
    pub quantity: Decimal,
    pub avg_entry_price: Decimal,
    /// Cumulative cash outlay for the currently-held quantity, fees included.
    pub total_cost: Decimal,
    pub current_price: Decimal,
    pub market_value: Decimal,
    pub unrealized_pnl: Decimal,
    pub unrealized_pnl_pct: f64,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub active: bool,
}

impl PaperPosition {
    pub fn new(portfolio_id: Uuid, symbol: impl Into<String>, quantity: Decimal, price: Decimal, total_out: Decimal) -> Self {
        Self {
            id: Uuid::new_v4(),
            portfolio_id,
            symbol: symbol.into(),
            quantity,
            avg_entry_price: price,
            total_cost: total_out,
            current_price: price,
            market_value: quantity * price,
            unrealized_pnl: Decimal::ZERO,
            unrealized_pnl_pct: 0.0,
            stop_loss: None,
            take_profit: None,
            active: true,
        }
    }

    /// Average in an additional buy: `new_avg = (old_qty*old_avg + gross) / new_qty`.
    pub fn average_in(&mut self, qty: Decimal, gross: Decimal, total_out: Decimal) {
        let new_qty = self.quantity + qty;
        let new_avg = (self.quantity * self.avg_entry_price + gross) / new_qty;
        self.quantity = new_qty;
        self.avg_entry_price = new_avg;
        self.total_cost += total_out;
    }

    /// The slice of `total_cost` attributable to selling `qty` units,
    /// prorated by the position's current quantity: `qty * (total_cost /
    /// quantity)`. This is the cost basis a `sell` nets against, and is
    /// independent of `avg_entry_price` (which stays fee-exclusive).
    pub fn cost_basis_for(&self, qty: Decimal) -> Decimal {
        if self.quantity > Decimal::ZERO {
            self.total_cost * qty / self.quantity
        } else {
            Decimal::ZERO
        }
    }

    /// Reduce quantity by a sale, removing `cost_basis_removed` (from
    /// `cost_basis_for`) from `total_cost`. `avg_entry_price` is left
    /// untouched — it only moves on a buy.
    pub fn reduce(&mut self, qty: Decimal, cost_basis_removed: Decimal) {
        self.quantity -= qty;
        if self.quantity <= Decimal::ZERO {
            self.quantity = Decimal::ZERO;
            self.total_cost = Decimal::ZERO;
            self.active = false;
        } else {
            self.total_cost -= cost_basis_removed;
        }
    }

    /// Mark the position to `current_price`, recomputing market value and
    /// unrealized P&L. Returns the updated values for the caller's roll-up.
    pub fn mark(&mut self, current_price: Decimal) {
        self.current_price = current_price;
        self.market_value = self.quantity * current_price;
        self.unrealized_pnl = self.market_value - self.total_cost;
        self.unrealized_pnl_pct = if self.total_cost > Decimal::ZERO {
            (self.unrealized_pnl / self.total_cost * Decimal::from(100)).to_f64().unwrap_or(0.0)
        } else {
            0.0
        };
    }

    pub fn stop_loss_hit(&self) -> bool {
        self.stop_loss.is_some_and(|sl| self.current_price <= sl)
    }

    pub fn take_profit_hit(&self) -> bool {
        self.take_profit.is_some_and(|tp| self.current_price >= tp)
    }
}
