// =============================================================================
// Unified trading router (C10)
// =============================================================================
//
// Risk-precheck → branch → uniform-result shape, switching on
// `TradingCore::Paper`/`TradingCore::Live` across the full buy/sell/close
// surface shared with C9.
// =============================================================================

use std::sync::Arc;

use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::exchange::ExchangeAdapter;
use crate::paper::{PaperEngine, PaperPortfolio, PaperTrade};
use crate::types::{OrderType, TradingCore};

/// Outcome of a routed order, uniform across paper and live execution.
#[derive(Debug, Clone)]
pub enum RouteResult {
    Paper(PaperTrade),
    Live { order_id: String, avg_price: Decimal, fill_qty: Decimal },
}

pub struct TradingRouter {
    paper: Arc<PaperEngine>,
    live: Option<Arc<dyn ExchangeAdapter>>,
}

impl TradingRouter {
    pub fn new(paper: Arc<PaperEngine>, live: Option<Arc<dyn ExchangeAdapter>>) -> Self {
        Self { paper, live }
    }

    pub async fn buy(
        &self,
        core: TradingCore,
        portfolio_id: Uuid,
        symbol: &str,
        quantity: Decimal,
        price: Option<Decimal>,
        order_type: OrderType,
    ) -> CoreResult<RouteResult> {
        match core {
            TradingCore::Paper => self
                .paper
                .buy(portfolio_id, symbol, quantity, price, order_type)
                .await
                .map(RouteResult::Paper),
            TradingCore::Live => self.live_buy(symbol, quantity, price, order_type).await,
        }
    }

    pub async fn sell(
        &self,
        core: TradingCore,
        portfolio_id: Uuid,
        symbol: &str,
        quantity: Decimal,
        price: Option<Decimal>,
        order_type: OrderType,
    ) -> CoreResult<RouteResult> {
        match core {
            TradingCore::Paper => self
                .paper
                .sell(portfolio_id, symbol, quantity, price, order_type)
                .await
                .map(RouteResult::Paper),
            TradingCore::Live => self.live_sell(symbol, quantity, price, order_type).await,
        }
    }

    pub async fn close_position(&self, core: TradingCore, portfolio_id: Uuid, symbol: &str) -> CoreResult<RouteResult> {
        match core {
            TradingCore::Paper => self.paper.close_position(portfolio_id, symbol).await.map(RouteResult::Paper),
            TradingCore::Live => Err(CoreError::NotImplemented("live close_position has no position tracker wired".into())),
        }
    }

    pub async fn mark(&self, core: TradingCore, portfolio_id: Uuid) -> CoreResult<PaperPortfolio> {
        match core {
            TradingCore::Paper => self.paper.mark_to_market(portfolio_id).await,
            TradingCore::Live => Err(CoreError::NotImplemented("live core has no mark-to-market valuation wired".into())),
        }
    }

    pub async fn set_stop_loss(&self, core: TradingCore, portfolio_id: Uuid, symbol: &str, price: Decimal) -> CoreResult<()> {
        match core {
            TradingCore::Paper => self.paper.set_stop_loss(portfolio_id, symbol, price).await,
            TradingCore::Live => Err(CoreError::NotImplemented("live core has no stop-loss tracker wired".into())),
        }
    }

    pub async fn set_take_profit(&self, core: TradingCore, portfolio_id: Uuid, symbol: &str, price: Decimal) -> CoreResult<()> {
        match core {
            TradingCore::Paper => self.paper.set_take_profit(portfolio_id, symbol, price).await,
            TradingCore::Live => Err(CoreError::NotImplemented("live core has no take-profit tracker wired".into())),
        }
    }

    async fn live_buy(&self, symbol: &str, quantity: Decimal, price: Option<Decimal>, order_type: OrderType) -> CoreResult<RouteResult> {
        let adapter = self.live_adapter()?;
        let ack = adapter.create_order(symbol, crate::types::OrderSide::Buy, order_type, quantity, price).await?;
        Ok(RouteResult::Live { order_id: ack.order_id, avg_price: ack.avg_price, fill_qty: ack.fill_qty })
    }

    async fn live_sell(&self, symbol: &str, quantity: Decimal, price: Option<Decimal>, order_type: OrderType) -> CoreResult<RouteResult> {
        let adapter = self.live_adapter()?;
        let ack = adapter.create_order(symbol, crate::types::OrderSide::Sell, order_type, quantity, price).await?;
        Ok(RouteResult::Live { order_id: ack.order_id, avg_price: ack.avg_price, fill_qty: ack.fill_qty })
    }

    fn live_adapter(&self) -> CoreResult<&Arc<dyn ExchangeAdapter>> {
        self.live.as_ref().ok_or_else(|| CoreError::NotImplemented("live trading core has no exchange adapter configured".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paper::PortfolioRiskGate;
    use crate::store::CandleStore;
    use rust_decimal_macros::dec;

    fn router_with_paper_funds() -> (TradingRouter, Uuid) {
        let candles = Arc::new(CandleStore::new());
        candles.upsert_candle(crate::store::Candle {
            symbol: "BTCUSDT".into(),
            timeframe: crate::types::Timeframe::M1,
            ts_open: 0,
            open: dec!(100),
            high: dec!(100),
            low: dec!(100),
            close: dec!(100),
            volume: Decimal::ZERO,
            quote_volume: Decimal::ZERO,
            trades: 0,
            taker_buy_volume: Decimal::ZERO,
            taker_buy_quote_volume: Decimal::ZERO,
        });
        let risk_gate = PortfolioRiskGate::new(0.5, dec!(1_000_000), 1000);
        let paper = Arc::new(PaperEngine::new(candles, dec!(0.001), risk_gate));
        let portfolio = paper.create_portfolio("alice", dec!(10000));
        (TradingRouter::new(paper, None), portfolio.id)
    }

    #[tokio::test]
    async fn paper_core_routes_to_paper_engine() {
        let (router, portfolio_id) = router_with_paper_funds();
        let result = router.buy(TradingCore::Paper, portfolio_id, "BTCUSDT", dec!(1), None, OrderType::Market).await.unwrap();
        assert!(matches!(result, RouteResult::Paper(_)));
    }

    #[tokio::test]
    async fn live_core_without_adapter_is_not_implemented() {
        let (router, portfolio_id) = router_with_paper_funds();
        let result = router.buy(TradingCore::Live, portfolio_id, "BTCUSDT", dec!(1), None, OrderType::Market).await;
        assert!(matches!(result, Err(CoreError::NotImplemented(_))));
    }

    #[tokio::test]
    async fn live_close_position_is_not_implemented() {
        let (router, portfolio_id) = router_with_paper_funds();
        let result = router.close_position(TradingCore::Live, portfolio_id, "BTCUSDT").await;
        assert!(matches!(result, Err(CoreError::NotImplemented(_))));
    }

    #[tokio::test]
    async fn paper_core_routes_mark_to_market_to_paper_engine() {
        let (router, portfolio_id) = router_with_paper_funds();
        router.buy(TradingCore::Paper, portfolio_id, "BTCUSDT", dec!(1), None, OrderType::Market).await.unwrap();
        let portfolio = router.mark(TradingCore::Paper, portfolio_id).await.unwrap();
        assert_eq!(portfolio.id, portfolio_id);
    }

    #[tokio::test]
    async fn live_mark_is_not_implemented() {
        let (router, portfolio_id) = router_with_paper_funds();
        let result = router.mark(TradingCore::Live, portfolio_id).await;
        assert!(matches!(result, Err(CoreError::NotImplemented(_))));
    }

    #[tokio::test]
    async fn paper_core_routes_stop_loss_and_take_profit_to_paper_engine() {
        let (router, portfolio_id) = router_with_paper_funds();
        router.buy(TradingCore::Paper, portfolio_id, "BTCUSDT", dec!(1), None, OrderType::Market).await.unwrap();
        assert!(router.set_stop_loss(TradingCore::Paper, portfolio_id, "BTCUSDT", dec!(90)).await.is_ok());
        assert!(router.set_take_profit(TradingCore::Paper, portfolio_id, "BTCUSDT", dec!(110)).await.is_ok());
    }

    #[tokio::test]
    async fn live_stop_loss_and_take_profit_are_not_implemented() {
        let (router, portfolio_id) = router_with_paper_funds();
        assert!(matches!(
            router.set_stop_loss(TradingCore::Live, portfolio_id, "BTCUSDT", dec!(90)).await,
            Err(CoreError::NotImplemented(_))
        ));
        assert!(matches!(
            router.set_take_profit(TradingCore::Live, portfolio_id, "BTCUSDT", dec!(110)).await,
            Err(CoreError::NotImplemented(_))
        ));
    }
}
