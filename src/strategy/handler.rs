// =============================================================================
// Strategy handler trait and evaluation context (C8)
// =============================================================================
//
// Handlers are pure functions over a candle frame plus precomputed
// indicators — no I/O, no `async`, matching the `indicators/` module's
// side-effect-free idiom. The executor (`executor.rs`) owns everything with
// a side effect: loading candles, persisting the signal, dispatching an
// order, publishing a notification.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use rust_decimal::Decimal;

use crate::error::CoreResult;
use crate::indicators::bollinger::{self, BollingerResult};
use crate::indicators::ema;
use crate::indicators::macd::{self, MacdResult};
use crate::indicators::rsi;
use crate::indicators::sma;
use crate::indicators::stochastic::{self, StochasticResult};
use crate::signal::SignalAction;
use crate::store::candle::Candle;
use crate::types::Timeframe;

const RSI_PERIOD: usize = 14;
const EMA_FAST_PERIOD: usize = 12;
const EMA_SLOW_PERIOD: usize = 26;
const BB_PERIOD: usize = 20;
const BB_STD: f64 = 2.0;
const ATR_PERIOD: usize = 14;
const SMA_PERIOD: usize = 20;
const STOCH_PERIOD: usize = 14;
const STOCH_SMOOTHING: usize = 3;

/// A handler's verdict for one tick, before the executor turns it into a
/// full `Signal` row (stamps `id`, `ts`, `strategy_id`, `indicators_snapshot`).
#[derive(Debug, Clone)]
pub struct HandlerDecision {
    pub action: SignalAction,
    pub strength: f64,
    pub confidence: f64,
    pub quantity: Option<Decimal>,
    pub reasoning: String,
}

impl HandlerDecision {
    pub fn hold(reasoning: impl Into<String>) -> Self {
        Self { action: SignalAction::Hold, strength: 0.0, confidence: 0.0, quantity: None, reasoning: reasoning.into() }
    }

    pub fn buy(strength: f64, confidence: f64, reasoning: impl Into<String>) -> Self {
        Self { action: SignalAction::Buy, strength, confidence, quantity: None, reasoning: reasoning.into() }
    }

    pub fn sell(strength: f64, confidence: f64, reasoning: impl Into<String>) -> Self {
        Self { action: SignalAction::Sell, strength, confidence, quantity: None, reasoning: reasoning.into() }
    }

    pub fn with_quantity(mut self, quantity: Decimal) -> Self {
        self.quantity = Some(quantity);
        self
    }
}

/// Everything a handler needs for one tick: the candle frame (chronological,
/// oldest first), the handler's own `parameters`, and the fixed-set
/// indicators the executor precomputes over that frame.
pub struct StrategyContext {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub candles: Vec<Candle>,
    pub closes: Vec<f64>,
    pub parameters: serde_json::Value,
    pub ema_fast: Vec<f64>,
    pub ema_slow: Vec<f64>,
    pub rsi: Vec<f64>,
    pub macd: Vec<MacdResult>,
    pub bollinger: Option<BollingerResult>,
    pub atr: Option<f64>,
    pub sma: Vec<f64>,
    pub stochastic: Vec<StochasticResult>,
}

impl StrategyContext {
    pub fn build(symbol: impl Into<String>, timeframe: Timeframe, candles: Vec<Candle>, parameters: serde_json::Value) -> Self {
        let closes: Vec<f64> = candles.iter().map(Candle::close_f64).collect();
        Self {
            symbol: symbol.into(),
            timeframe,
            ema_fast: ema::calculate_ema(&closes, EMA_FAST_PERIOD),
            ema_slow: ema::calculate_ema(&closes, EMA_SLOW_PERIOD),
            rsi: rsi::calculate_rsi(&closes, RSI_PERIOD),
            macd: macd::calculate_macd(&closes, EMA_FAST_PERIOD, EMA_SLOW_PERIOD, 9),
            bollinger: bollinger::calculate_bollinger(&closes, BB_PERIOD, BB_STD),
            atr: crate::indicators::atr::calculate_atr(&candles, ATR_PERIOD),
            sma: sma::calculate_sma(&closes, SMA_PERIOD),
            stochastic: stochastic::calculate_stochastic(&candles, STOCH_PERIOD, STOCH_SMOOTHING),
            candles,
            closes,
            parameters,
        }
    }

    pub fn last_close(&self) -> f64 {
        *self.closes.last().unwrap_or(&0.0)
    }

    pub fn last_ts(&self) -> i64 {
        self.candles.last().map(|c| c.ts_open).unwrap_or(0)
    }

    pub fn param_f64(&self, key: &str, default: f64) -> f64 {
        self.parameters.get(key).and_then(|v| v.as_f64()).unwrap_or(default)
    }

    pub fn param_u64(&self, key: &str, default: u64) -> u64 {
        self.parameters.get(key).and_then(|v| v.as_u64()).unwrap_or(default)
    }

    /// A point-in-time JSON snapshot of the precomputed indicators, stamped
    /// onto the persisted `Signal` row for later audit.
    pub fn snapshot(&self) -> serde_json::Value {
        let mut values = HashMap::new();
        values.insert("close", self.last_close());
        if let Some(&v) = self.rsi.last() {
            values.insert("rsi", v);
        }
        if let Some(&v) = self.ema_fast.last() {
            values.insert("ema_fast", v);
        }
        if let Some(&v) = self.ema_slow.last() {
            values.insert("ema_slow", v);
        }
        if let Some(m) = self.macd.last() {
            values.insert("macd", m.macd);
            values.insert("macd_signal", m.signal);
            values.insert("macd_histogram", m.histogram);
        }
        if let Some(bb) = &self.bollinger {
            values.insert("bb_upper", bb.upper);
            values.insert("bb_middle", bb.middle);
            values.insert("bb_lower", bb.lower);
            values.insert("bb_width", bb.width);
        }
        if let Some(v) = self.atr {
            values.insert("atr", v);
        }
        if let Some(st) = self.stochastic.last() {
            values.insert("stoch_k", st.k);
            values.insert("stoch_d", st.d);
        }
        serde_json::to_value(values).unwrap_or(serde_json::Value::Null)
    }
}

/// Pluggable per-strategy evaluation logic. Implementations are pure and
/// synchronous; all I/O lives in the executor that calls them.
pub trait StrategyHandler: Send + Sync {
    fn name(&self) -> &'static str;

    /// Evaluate one tick. `Ok(None)` means "insufficient data, no opinion
    /// this tick" (not persisted, not counted as a failure). `Err` is a
    /// genuine handler failure and counts against the strategy's error
    /// budget.
    fn evaluate(&self, ctx: &StrategyContext) -> CoreResult<Option<HandlerDecision>>;
}

/// Construct the fixed built-in handler set, keyed by name.
pub fn built_in_handlers() -> HashMap<String, Arc<dyn StrategyHandler>> {
    use super::handlers::*;

    let mut handlers: HashMap<String, Arc<dyn StrategyHandler>> = HashMap::new();
    handlers.insert("dca".to_string(), Arc::new(DcaHandler));
    handlers.insert("rsi".to_string(), Arc::new(RsiHandler));
    handlers.insert("macd".to_string(), Arc::new(MacdHandler));
    handlers.insert("ma_crossover".to_string(), Arc::new(MaCrossoverHandler));
    handlers.insert("bollinger_bands".to_string(), Arc::new(BollingerBandsHandler));
    handlers.insert("range_trading".to_string(), Arc::new(RangeTradingHandler));
    handlers.insert("grid_trading".to_string(), Arc::new(GridTradingHandler));
    handlers.insert("fear_greed".to_string(), Arc::new(FearGreedHandler));
    handlers
}
