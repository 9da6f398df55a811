// =============================================================================
// Paper-trading engine (C9)
// =============================================================================
//
// Risk precheck, then synthesize a fill against average-cost-basis
// accounting: one position per `(portfolio, symbol)`, averaged in on every
// buy, closed when its quantity reaches zero. Mutating calls on a portfolio
// are serialized through a per-portfolio `tokio::sync::Mutex` so concurrent
// buys on the same portfolio apply strictly one after another.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use tokio::sync::Mutex as AsyncMutex;
use tracing::warn;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::paper::balance::{BalanceStore, PaperBalance};
use crate::paper::portfolio::PaperPortfolio;
use crate::paper::position::PaperPosition;
use crate::paper::risk_gate::PortfolioRiskGate;
use crate::paper::trade::PaperTrade;
use crate::store::CandleStore;
use crate::types::{OrderType, Timeframe};

/// Quote asset used for cash accounting and `PaperBalance` bookkeeping.
const QUOTE_ASSET: &str = "USDT";

pub struct PaperEngine {
    candles: Arc<CandleStore>,
    commission_rate: Decimal,
    mark_timeframe: Timeframe,
    risk_gate: PortfolioRiskGate,
    portfolios: RwLock<HashMap<Uuid, PaperPortfolio>>,
    positions: RwLock<HashMap<(Uuid, String), PaperPosition>>,
    trades: RwLock<Vec<PaperTrade>>,
    balances: BalanceStore,
    locks: RwLock<HashMap<Uuid, Arc<AsyncMutex<()>>>>,
}

impl PaperEngine {
    pub fn new(candles: Arc<CandleStore>, commission_rate: Decimal, risk_gate: PortfolioRiskGate) -> Self {
        Self {
            candles,
            commission_rate,
            mark_timeframe: Timeframe::M1,
            risk_gate,
            portfolios: RwLock::new(HashMap::new()),
            positions: RwLock::new(HashMap::new()),
            trades: RwLock::new(Vec::new()),
            balances: BalanceStore::new(),
            locks: RwLock::new(HashMap::new()),
        }
    }

    fn lock_for(&self, portfolio_id: Uuid) -> Arc<AsyncMutex<()>> {
        self.locks
            .write()
            .entry(portfolio_id)
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    pub fn create_portfolio(&self, owner: impl Into<String>, initial_capital: Decimal) -> PaperPortfolio {
        let portfolio = PaperPortfolio::new(owner, initial_capital, Utc::now().timestamp_millis());
        self.balances.set(portfolio.id, QUOTE_ASSET, PaperBalance::new(initial_capital, Decimal::ZERO, initial_capital));
        self.portfolios.write().insert(portfolio.id, portfolio.clone());
        portfolio
    }

    pub fn get_portfolio(&self, portfolio_id: Uuid) -> CoreResult<PaperPortfolio> {
        self.portfolios
            .read()
            .get(&portfolio_id)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(format!("no paper portfolio {portfolio_id}")))
    }

    pub fn get_position(&self, portfolio_id: Uuid, symbol: &str) -> Option<PaperPosition> {
        self.positions.read().get(&(portfolio_id, symbol.to_string())).cloned()
    }

    pub fn list_positions(&self, portfolio_id: Uuid) -> Vec<PaperPosition> {
        self.positions
            .read()
            .values()
            .filter(|p| p.portfolio_id == portfolio_id && p.active)
            .cloned()
            .collect()
    }

    pub fn list_trades(&self, portfolio_id: Uuid) -> Vec<PaperTrade> {
        self.trades.read().iter().filter(|t| t.portfolio_id == portfolio_id).cloned().collect()
    }

    pub fn get_balance(&self, portfolio_id: Uuid, asset: &str) -> Option<PaperBalance> {
        self.balances.get(portfolio_id, asset)
    }

    fn resolve_price(&self, symbol: &str, price: Option<Decimal>) -> CoreResult<Decimal> {
        match price {
            Some(p) => Ok(p),
            None => self
                .candles
                .latest_candle(symbol, self.mark_timeframe)
                .map(|c| c.close)
                .ok_or_else(|| CoreError::NoMarketData(symbol.to_string())),
        }
    }

    pub async fn buy(
        &self,
        portfolio_id: Uuid,
        symbol: &str,
        quantity: Decimal,
        price: Option<Decimal>,
        order_type: OrderType,
    ) -> CoreResult<PaperTrade> {
        if quantity <= Decimal::ZERO {
            return Err(CoreError::BadRequest("quantity must be positive".into()));
        }
        let lock = self.lock_for(portfolio_id);
        let _guard = lock.lock().await;

        let portfolio = self.get_portfolio(portfolio_id)?;
        self.risk_gate.check_trade(&portfolio)?;

        let price = self.resolve_price(symbol, price)?;
        let gross = quantity * price;
        let fee = gross * self.commission_rate;
        let total_out = gross + fee;

        if portfolio.cash < total_out {
            return Err(CoreError::BadRequest(format!(
                "insufficient funds: need {total_out}, have {}",
                portfolio.cash
            )));
        }

        let mut positions = self.positions.write();
        let key = (portfolio_id, symbol.to_string());
        let position_id = match positions.get_mut(&key) {
            Some(existing) if existing.active => {
                existing.average_in(quantity, gross, total_out);
                existing.id
            }
            _ => {
                let position = PaperPosition::new(portfolio_id, symbol, quantity, price, total_out);
                let id = position.id;
                positions.insert(key, position);
                id
            }
        };
        drop(positions);

        let mut portfolios = self.portfolios.write();
        let p = portfolios.get_mut(&portfolio_id).expect("portfolio existence checked above");
        p.cash -= total_out;
        drop(portfolios);

        self.adjust_balance(portfolio_id, QUOTE_ASSET, -total_out);

        let trade = PaperTrade::buy(portfolio_id, position_id, symbol, quantity, price, gross, fee, total_out, order_type);
        self.trades.write().push(trade.clone());
        self.recompute_portfolio_rollup(portfolio_id);
        Ok(trade)
    }

    pub async fn sell(
        &self,
        portfolio_id: Uuid,
        symbol: &str,
        quantity: Decimal,
        price: Option<Decimal>,
        order_type: OrderType,
    ) -> CoreResult<PaperTrade> {
        if quantity <= Decimal::ZERO {
            return Err(CoreError::BadRequest("quantity must be positive".into()));
        }
        let lock = self.lock_for(portfolio_id);
        let _guard = lock.lock().await;

        let key = (portfolio_id, symbol.to_string());
        let (position_id, cost_basis) = {
            let positions = self.positions.read();
            let pos = positions
                .get(&key)
                .filter(|p| p.active)
                .ok_or_else(|| CoreError::BadRequest(format!("no open position in {symbol}")))?;
            if pos.quantity < quantity {
                return Err(CoreError::BadRequest(format!(
                    "cannot sell {quantity}, position only holds {}",
                    pos.quantity
                )));
            }
            (pos.id, pos.cost_basis_for(quantity))
        };

        let price = self.resolve_price(symbol, price)?;
        let gross = quantity * price;
        let fee = gross * self.commission_rate;
        let proceeds = gross - fee;
        let realized_pnl = gross - cost_basis - fee;
        let realized_pnl_pct = if cost_basis > Decimal::ZERO {
            use rust_decimal::prelude::ToPrimitive;
            (realized_pnl / cost_basis * Decimal::from(100)).to_f64().unwrap_or(0.0)
        } else {
            0.0
        };

        self.positions.write().get_mut(&key).expect("position existence checked above").reduce(quantity, cost_basis);

        let mut portfolios = self.portfolios.write();
        let p = portfolios.get_mut(&portfolio_id).ok_or_else(|| CoreError::NotFound(format!("no paper portfolio {portfolio_id}")))?;
        p.cash += proceeds;
        p.record_trade_result(realized_pnl);
        drop(portfolios);

        self.adjust_balance(portfolio_id, QUOTE_ASSET, proceeds);
        self.risk_gate.record_trade_result(portfolio_id, realized_pnl, Utc::now().timestamp_millis());

        let trade = PaperTrade::sell(portfolio_id, position_id, symbol, quantity, price, gross, fee, proceeds, realized_pnl, realized_pnl_pct, order_type);
        self.trades.write().push(trade.clone());
        self.recompute_portfolio_rollup(portfolio_id);
        Ok(trade)
    }

    pub async fn close_position(&self, portfolio_id: Uuid, symbol: &str) -> CoreResult<PaperTrade> {
        let quantity = self
            .get_position(portfolio_id, symbol)
            .filter(|p| p.active)
            .map(|p| p.quantity)
            .ok_or_else(|| CoreError::BadRequest(format!("no open position in {symbol}")))?;
        self.sell(portfolio_id, symbol, quantity, None, OrderType::Market).await
    }

    pub async fn set_stop_loss(&self, portfolio_id: Uuid, symbol: &str, price: Decimal) -> CoreResult<()> {
        let mut positions = self.positions.write();
        let pos = positions
            .get_mut(&(portfolio_id, symbol.to_string()))
            .filter(|p| p.active)
            .ok_or_else(|| CoreError::BadRequest(format!("no open position in {symbol}")))?;
        pos.stop_loss = Some(price);
        Ok(())
    }

    pub async fn set_take_profit(&self, portfolio_id: Uuid, symbol: &str, price: Decimal) -> CoreResult<()> {
        let mut positions = self.positions.write();
        let pos = positions
            .get_mut(&(portfolio_id, symbol.to_string()))
            .filter(|p| p.active)
            .ok_or_else(|| CoreError::BadRequest(format!("no open position in {symbol}")))?;
        pos.take_profit = Some(price);
        Ok(())
    }

    /// Mark every active position in `portfolio_id` to its latest candle
    /// close, roll the results up into the portfolio, then sweep for any
    /// stop-loss/take-profit triggers and close those positions. A symbol
    /// with no candle data degrades to `market_value == total_cost` (no P&L
    /// contribution) rather than failing the whole call.
    pub async fn mark_to_market(&self, portfolio_id: Uuid) -> CoreResult<PaperPortfolio> {
        let lock = self.lock_for(portfolio_id);
        let _guard = lock.lock().await;

        let symbols: Vec<String> = self
            .positions
            .read()
            .values()
            .filter(|p| p.portfolio_id == portfolio_id && p.active)
            .map(|p| p.symbol.clone())
            .collect();

        let mut triggered = Vec::new();
        {
            let mut positions = self.positions.write();
            for symbol in &symbols {
                if let Some(pos) = positions.get_mut(&(portfolio_id, symbol.clone())) {
                    let price = match self.candles.latest_candle(symbol, self.mark_timeframe) {
                        Some(candle) => candle.close,
                        None => {
                            // No market data for this symbol: degrade its
                            // valuation to market_value == total_cost (no
                            // P&L contribution) instead of failing the
                            // whole call.
                            warn!(%portfolio_id, %symbol, "no market data for mark-to-market, degrading to cost basis");
                            if pos.quantity > Decimal::ZERO {
                                pos.total_cost / pos.quantity
                            } else {
                                Decimal::ZERO
                            }
                        }
                    };
                    pos.mark(price);
                    if pos.stop_loss_hit() || pos.take_profit_hit() {
                        triggered.push(symbol.clone());
                    }
                }
            }
        }

        self.recompute_portfolio_rollup(portfolio_id);
        drop(_guard);

        for symbol in triggered {
            let _ = self.close_position(portfolio_id, &symbol).await;
        }
        self.get_portfolio(portfolio_id)
    }

    fn recompute_portfolio_rollup(&self, portfolio_id: Uuid) {
        let invested_value: Decimal = self
            .positions
            .read()
            .values()
            .filter(|p| p.portfolio_id == portfolio_id && p.active)
            .map(|p| p.market_value)
            .sum();
        let unrealized_pnl: Decimal = self
            .positions
            .read()
            .values()
            .filter(|p| p.portfolio_id == portfolio_id && p.active)
            .map(|p| p.unrealized_pnl)
            .sum();

        if let Some(p) = self.portfolios.write().get_mut(&portfolio_id) {
            p.invested_value = invested_value;
            p.unrealized_pnl = unrealized_pnl;
            p.recompute_rollup();
        }
    }

    fn adjust_balance(&self, portfolio_id: Uuid, asset: &str, delta: Decimal) {
        let current = self.balances.get(portfolio_id, asset).unwrap_or_else(|| PaperBalance::new(Decimal::ZERO, Decimal::ZERO, Decimal::ZERO));
        let free = current.free + delta;
        self.balances.set(portfolio_id, asset, PaperBalance::new(free, current.locked, free));
    }
}
