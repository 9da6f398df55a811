// =============================================================================
// Paper portfolio (C9)
// =============================================================================
//
// Account-level roll-up maintained by `PaperEngine`. Two invariants hold
// after every mutating call: `total_value = cash + invested_value` and
// `total_pnl = realized_pnl + unrealized_pnl`.
// =============================================================================

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::TradingMode;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperPortfolio {
    pub id: Uuid,
    pub owner: String,
    pub mode: TradingMode,
    pub initial_capital: Decimal,
    pub cash: Decimal,
    pub invested_value: Decimal,
    pub total_value: Decimal,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    pub total_pnl: Decimal,
    pub max_drawdown: f64,
    pub total_trades: u64,
    pub winning_trades: u64,
    pub losing_trades: u64,
    pub win_rate: f64,
    pub created_at: i64,
}

impl PaperPortfolio {
    pub fn new(owner: impl Into<String>, initial_capital: Decimal, created_at: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner: owner.into(),
            mode: TradingMode::default(),
            initial_capital,
            cash: initial_capital,
            invested_value: Decimal::ZERO,
            total_value: initial_capital,
            realized_pnl: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            total_pnl: Decimal::ZERO,
            max_drawdown: 0.0,
            total_trades: 0,
            winning_trades: 0,
            losing_trades: 0,
            win_rate: 0.0,
            created_at,
        }
    }

    pub fn record_trade_result(&mut self, realized_pnl: Decimal) {
        self.realized_pnl += realized_pnl;
        self.total_trades += 1;
        if realized_pnl >= Decimal::ZERO {
            self.winning_trades += 1;
        } else {
            self.losing_trades += 1;
        }
        self.win_rate = if self.total_trades > 0 {
            self.winning_trades as f64 / self.total_trades as f64 * 100.0
        } else {
            0.0
        };
    }

    /// Recompute `total_value`/`total_pnl` and the monotonic `max_drawdown`
    /// from `invested_value`/`unrealized_pnl`, which the caller has already
    /// rolled up from each active position.
    pub fn recompute_rollup(&mut self) {
        self.total_value = self.cash + self.invested_value;
        self.total_pnl = self.realized_pnl + self.unrealized_pnl;
        if self.initial_capital > Decimal::ZERO {
            let drawdown = ((self.initial_capital - self.total_value) / self.initial_capital)
                .max(Decimal::ZERO);
            let drawdown = drawdown.to_string().parse::<f64>().unwrap_or(0.0);
            if drawdown > self.max_drawdown {
                self.max_drawdown = drawdown;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn new_portfolio_starts_fully_in_cash() {
        let p = PaperPortfolio::new("alice", dec!(10000), 0);
        assert_eq!(p.cash, dec!(10000));
        assert_eq!(p.total_value, dec!(10000));
        assert_eq!(p.total_pnl, Decimal::ZERO);
    }

    #[test]
    fn record_trade_result_updates_win_rate() {
        let mut p = PaperPortfolio::new("alice", dec!(10000), 0);
        p.record_trade_result(dec!(100));
        p.record_trade_result(dec!(-50));
        assert_eq!(p.total_trades, 2);
        assert_eq!(p.winning_trades, 1);
        assert_eq!(p.losing_trades, 1);
        assert_eq!(p.win_rate, 50.0);
        assert_eq!(p.realized_pnl, dec!(50));
    }

    #[test]
    fn recompute_rollup_tracks_drawdown_monotonically() {
        let mut p = PaperPortfolio::new("alice", dec!(10000), 0);
        p.cash = dec!(5000);
        p.invested_value = dec!(4000);
        p.unrealized_pnl = dec!(-1000);
        p.recompute_rollup();
        assert_eq!(p.total_value, dec!(9000));
        assert!((p.max_drawdown - 0.1).abs() < 1e-9);

        // recovery should not reduce the recorded max drawdown
        p.cash = dec!(9500);
        p.invested_value = dec!(500);
        p.unrealized_pnl = Decimal::ZERO;
        p.recompute_rollup();
        assert!((p.max_drawdown - 0.1).abs() < 1e-9);
    }
}
