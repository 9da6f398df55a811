// =============================================================================
// Strategy signal record (C8)
// =============================================================================
//
// Append-only decision record: one struct capturing a point-in-time decision
// plus the evidence behind it, constructed once via a builder and never
// mutated after.
// =============================================================================

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalAction {
    Buy,
    Sell,
    Hold,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub id: Uuid,
    pub strategy_id: String,
    pub ts: i64,
    pub symbol: String,
    pub action: SignalAction,
    /// How strongly the indicators favor this action, in `[0,1]`.
    pub strength: f64,
    /// Handler's confidence in its own read of the data, in `[0,1]`.
    pub confidence: f64,
    pub price: Decimal,
    pub quantity: Option<Decimal>,
    pub indicators_snapshot: serde_json::Value,
    pub reasoning: String,
}

impl Signal {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        strategy_id: impl Into<String>,
        ts: i64,
        symbol: impl Into<String>,
        action: SignalAction,
        strength: f64,
        confidence: f64,
        price: Decimal,
        quantity: Option<Decimal>,
        indicators_snapshot: serde_json::Value,
        reasoning: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            strategy_id: strategy_id.into(),
            ts,
            symbol: symbol.into(),
            action,
            strength: strength.clamp(0.0, 1.0),
            confidence: confidence.clamp(0.0, 1.0),
            price,
            quantity,
            indicators_snapshot,
            reasoning: reasoning.into(),
        }
    }

    pub fn is_actionable(&self) -> bool {
        !matches!(self.action, SignalAction::Hold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn strength_and_confidence_are_clamped() {
        let signal = Signal::new("s1", 0, "BTCUSDT", SignalAction::Buy, 1.5, -0.2, dec!(100), None, serde_json::json!({}), "rsi oversold");
        assert_eq!(signal.strength, 1.0);
        assert_eq!(signal.confidence, 0.0);
    }

    #[test]
    fn hold_is_not_actionable() {
        let signal = Signal::new("s1", 0, "BTCUSDT", SignalAction::Hold, 0.0, 0.0, dec!(100), None, serde_json::json!({}), "no edge");
        assert!(!signal.is_actionable());
    }

    #[test]
    fn buy_is_actionable() {
        let signal = Signal::new("s1", 0, "BTCUSDT", SignalAction::Buy, 0.8, 0.7, dec!(100), Some(dec!(0.1)), serde_json::json!({"rsi": 28.0}), "rsi oversold");
        assert!(signal.is_actionable());
    }
}
