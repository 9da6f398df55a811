// =============================================================================
// Paper trade record (C9)
// =============================================================================
//
// Immutable fill record appended by `PaperEngine::buy`/`sell`: one record per
// attempted fill, always representing a *filled* paper trade rather than a
// venue outcome.
// =============================================================================

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{OrderSide, OrderType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeStatus {
    Filled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperTrade {
    pub id: Uuid,
    pub portfolio_id: Uuid,
    pub position_id: Option<Uuid>,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub price: Decimal,
    pub total_value: Decimal,
    pub fee: Decimal,
    pub net_cost: Decimal,
    pub realized_pnl: Option<Decimal>,
    pub realized_pnl_pct: Option<f64>,
    pub order_type: OrderType,
    pub status: TradeStatus,
    pub ts: i64,
}

impl PaperTrade {
    #[allow(clippy::too_many_arguments)]
    pub fn buy(
        portfolio_id: Uuid,
        position_id: Uuid,
        symbol: impl Into<String>,
        quantity: Decimal,
        price: Decimal,
        gross: Decimal,
        fee: Decimal,
        total_out: Decimal,
        order_type: OrderType,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            portfolio_id,
            position_id: Some(position_id),
            symbol: symbol.into(),
            side: OrderSide::Buy,
            quantity,
            price,
            total_value: gross,
            fee,
            net_cost: total_out,
            realized_pnl: None,
            realized_pnl_pct: None,
            order_type,
            status: TradeStatus::Filled,
            ts: Utc::now().timestamp_millis(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn sell(
        portfolio_id: Uuid,
        position_id: Uuid,
        symbol: impl Into<String>,
        quantity: Decimal,
        price: Decimal,
        gross: Decimal,
        fee: Decimal,
        proceeds: Decimal,
        realized_pnl: Decimal,
        realized_pnl_pct: f64,
        order_type: OrderType,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            portfolio_id,
            position_id: Some(position_id),
            symbol: symbol.into(),
            side: OrderSide::Sell,
            quantity,
            price,
            total_value: gross,
            fee,
            net_cost: proceeds,
            realized_pnl: Some(realized_pnl),
            realized_pnl_pct: Some(realized_pnl_pct),
            order_type,
            status: TradeStatus::Filled,
            ts: Utc::now().timestamp_millis(),
        }
    }
}
