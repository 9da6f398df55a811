// =============================================================================
// Exchange adapter (C2)
// =============================================================================
//
// A signed-REST exchange client behind a trait so a `Binance` implementation
// and a null implementation for tests can share call sites. Market-data
// methods are unauthenticated; trading methods require the signed path.
// =============================================================================

pub mod binance;
pub mod rate_limit;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::CoreResult;
use crate::store::Candle;
use crate::types::{OrderSide, OrderType, Timeframe};

pub use binance::BinanceAdapter;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolInfo {
    pub symbol: String,
    pub base: String,
    pub quote: String,
    pub status: String,
    pub flags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticker {
    pub symbol: String,
    pub last_price: Decimal,
    pub volume_24h: Decimal,
    pub quote_volume_24h: Decimal,
    pub price_change_pct_24h: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderAck {
    pub order_id: String,
    pub status: String,
    pub fill_qty: Decimal,
    pub avg_price: Decimal,
    pub ts: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeBalance {
    pub asset: String,
    pub free: Decimal,
    pub locked: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeTrade {
    pub order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub qty: Decimal,
    pub price: Decimal,
    pub fee: Decimal,
    pub ts: i64,
}

/// Unified venue contract. Market data is unauthenticated; trading methods
/// require the signed path and are live-only.
#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    async fn fetch_klines(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: u32,
    ) -> CoreResult<Vec<Candle>>;

    async fn fetch_ticker(&self, symbol: &str) -> CoreResult<Ticker>;

    async fn fetch_exchange_info(&self) -> CoreResult<Vec<SymbolInfo>>;

    async fn fetch_24h_tickers(&self) -> CoreResult<Vec<Ticker>>;

    async fn create_order(
        &self,
        symbol: &str,
        side: OrderSide,
        order_type: OrderType,
        qty: Decimal,
        price: Option<Decimal>,
    ) -> CoreResult<OrderAck>;

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> CoreResult<()>;

    async fn get_balances(&self) -> CoreResult<Vec<ExchangeBalance>>;

    async fn get_trades(&self, symbol: &str, limit: u32) -> CoreResult<Vec<ExchangeTrade>>;
}
