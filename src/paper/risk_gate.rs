// =============================================================================
// Portfolio risk gate (C9)
// =============================================================================
//
// A three-breaker model scoped to the fields a `PaperPortfolio` actually
// carries: running drawdown, a daily realized-PnL budget, and a
// consecutive-loss streak.
// =============================================================================

use std::collections::HashMap;

use chrono::{TimeZone, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::paper::portfolio::PaperPortfolio;

struct DailyState {
    current_date: String,
    daily_realized_pnl: Decimal,
    consecutive_losses: u32,
}

impl DailyState {
    fn fresh(now: i64) -> Self {
        Self {
            current_date: date_of(now),
            daily_realized_pnl: Decimal::ZERO,
            consecutive_losses: 0,
        }
    }
}

fn date_of(ts_ms: i64) -> String {
    Utc.timestamp_millis_opt(ts_ms)
        .single()
        .unwrap_or_else(Utc::now)
        .format("%Y-%m-%d")
        .to_string()
}

pub struct PortfolioRiskGate {
    max_drawdown_pct: f64,
    max_daily_loss: Decimal,
    max_consecutive_losses: u32,
    state: RwLock<HashMap<Uuid, DailyState>>,
}

impl PortfolioRiskGate {
    pub fn new(max_drawdown_pct: f64, max_daily_loss: Decimal, max_consecutive_losses: u32) -> Self {
        Self {
            max_drawdown_pct,
            max_daily_loss,
            max_consecutive_losses,
            state: RwLock::new(HashMap::new()),
        }
    }

    /// Called before a mutating `buy`/`sell` is allowed to proceed.
    pub fn check_trade(&self, portfolio: &PaperPortfolio) -> CoreResult<()> {
        if portfolio.max_drawdown >= self.max_drawdown_pct {
            return Err(CoreError::BadRequest(format!(
                "risk breaker tripped: drawdown {:.4} >= limit {:.4}",
                portfolio.max_drawdown, self.max_drawdown_pct
            )));
        }
        let states = self.state.read();
        if let Some(s) = states.get(&portfolio.id) {
            if s.daily_realized_pnl <= -self.max_daily_loss {
                return Err(CoreError::BadRequest(format!(
                    "risk breaker tripped: daily realized loss {} exceeds limit {}",
                    s.daily_realized_pnl, self.max_daily_loss
                )));
            }
            if s.consecutive_losses >= self.max_consecutive_losses {
                return Err(CoreError::BadRequest(format!(
                    "risk breaker tripped: {} consecutive losing trades",
                    s.consecutive_losses
                )));
            }
        }
        Ok(())
    }

    pub fn record_trade_result(&self, portfolio_id: Uuid, realized_pnl: Decimal, now: i64) {
        let mut states = self.state.write();
        let entry = states.entry(portfolio_id).or_insert_with(|| DailyState::fresh(now));
        if date_of(now) != entry.current_date {
            *entry = DailyState::fresh(now);
        }
        entry.daily_realized_pnl += realized_pnl;
        if realized_pnl < Decimal::ZERO {
            entry.consecutive_losses += 1;
        } else {
            entry.consecutive_losses = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn portfolio() -> PaperPortfolio {
        PaperPortfolio::new("alice", dec!(10000), 0)
    }

    #[test]
    fn drawdown_breach_blocks_trade() {
        let gate = PortfolioRiskGate::new(0.2, dec!(1000), 3);
        let mut p = portfolio();
        p.max_drawdown = 0.25;
        assert!(gate.check_trade(&p).is_err());
    }

    #[test]
    fn daily_loss_budget_trips_after_accumulated_losses() {
        let gate = PortfolioRiskGate::new(0.5, dec!(100), 10);
        let p = portfolio();
        gate.record_trade_result(p.id, dec!(-60), 1_000_000);
        assert!(gate.check_trade(&p).is_ok());
        gate.record_trade_result(p.id, dec!(-50), 1_000_000);
        assert!(gate.check_trade(&p).is_err());
    }

    #[test]
    fn consecutive_losses_trip_breaker_and_reset_on_win() {
        let gate = PortfolioRiskGate::new(0.5, dec!(100000), 2);
        let p = portfolio();
        gate.record_trade_result(p.id, dec!(-10), 1_000_000);
        gate.record_trade_result(p.id, dec!(-10), 1_000_000);
        assert!(gate.check_trade(&p).is_err());
        gate.record_trade_result(p.id, dec!(10), 1_000_000);
        assert!(gate.check_trade(&p).is_ok());
    }
}
