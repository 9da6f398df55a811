// =============================================================================
// Built-in strategy handlers (C8)
// =============================================================================
//
// A fixed set of eight. Each is a small, self-contained read of
// `StrategyContext`'s precomputed indicators — no handler reaches back into
// C1/C4 itself, keeping them trivially unit-testable against a synthetic
// candle frame.
// =============================================================================

use rust_decimal::Decimal;

use crate::error::CoreResult;
use crate::indicators::bollinger;
use crate::indicators::ema;
use crate::indicators::macd::{crossover, MacdCrossover};
use crate::indicators::stochastic;

use super::handler::{HandlerDecision, StrategyContext, StrategyHandler};

/// Buys a fixed quantity every tick. The scheduler's trigger interval *is*
/// the DCA cadence — this handler carries no timing logic of its own.
pub struct DcaHandler;

impl StrategyHandler for DcaHandler {
    fn name(&self) -> &'static str {
        "dca"
    }

    fn evaluate(&self, ctx: &StrategyContext) -> CoreResult<Option<HandlerDecision>> {
        let quantity = ctx.param_f64("quantity", 0.0);
        if quantity <= 0.0 {
            return Ok(Some(HandlerDecision::hold("dca quantity parameter is not set")));
        }
        let quantity = Decimal::try_from(quantity).unwrap_or(Decimal::ZERO);
        Ok(Some(HandlerDecision::buy(1.0, 1.0, "scheduled dollar-cost-average buy").with_quantity(quantity)))
    }
}

/// Classic oversold/overbought RSI mean reversion.
pub struct RsiHandler;

impl StrategyHandler for RsiHandler {
    fn name(&self) -> &'static str {
        "rsi"
    }

    fn evaluate(&self, ctx: &StrategyContext) -> CoreResult<Option<HandlerDecision>> {
        let Some(&value) = ctx.rsi.last() else {
            return Ok(None);
        };
        let oversold = ctx.param_f64("oversold_threshold", 30.0);
        let overbought = ctx.param_f64("overbought_threshold", 70.0);

        if value <= oversold {
            let strength = ((oversold - value) / oversold).clamp(0.0, 1.0);
            Ok(Some(HandlerDecision::buy(strength, 0.7, format!("rsi {value:.1} at or below oversold threshold {oversold:.1}"))))
        } else if value >= overbought {
            let strength = ((value - overbought) / (100.0 - overbought)).clamp(0.0, 1.0);
            Ok(Some(HandlerDecision::sell(strength, 0.7, format!("rsi {value:.1} at or above overbought threshold {overbought:.1}"))))
        } else {
            Ok(Some(HandlerDecision::hold(format!("rsi {value:.1} inside neutral band"))))
        }
    }
}

/// MACD/signal-line crossover.
pub struct MacdHandler;

impl StrategyHandler for MacdHandler {
    fn name(&self) -> &'static str {
        "macd"
    }

    fn evaluate(&self, ctx: &StrategyContext) -> CoreResult<Option<HandlerDecision>> {
        if ctx.macd.is_empty() {
            return Ok(None);
        }
        match crossover(&ctx.macd) {
            MacdCrossover::Bullish => Ok(Some(HandlerDecision::buy(0.6, 0.6, "macd crossed above signal line"))),
            MacdCrossover::Bearish => Ok(Some(HandlerDecision::sell(0.6, 0.6, "macd crossed below signal line"))),
            MacdCrossover::None => Ok(Some(HandlerDecision::hold("no macd/signal crossover"))),
        }
    }
}

/// Fast/slow EMA golden-cross / death-cross. Confidence is boosted when a
/// longer-horizon EMA stack confirms the crossover's direction, tunable via
/// `trend_fast_period`/`trend_mid_period`/`trend_slow_period` parameters.
pub struct MaCrossoverHandler;

impl StrategyHandler for MaCrossoverHandler {
    fn name(&self) -> &'static str {
        "ma_crossover"
    }

    fn evaluate(&self, ctx: &StrategyContext) -> CoreResult<Option<HandlerDecision>> {
        if ctx.ema_fast.len() < 2 || ctx.ema_slow.len() < 2 {
            return Ok(None);
        }
        let (fast_prev, fast_last) = (ctx.ema_fast[ctx.ema_fast.len() - 2], *ctx.ema_fast.last().unwrap());
        let (slow_prev, slow_last) = (ctx.ema_slow[ctx.ema_slow.len() - 2], *ctx.ema_slow.last().unwrap());

        let trend_fast = ctx.param_u64("trend_fast_period", 9) as usize;
        let trend_mid = ctx.param_u64("trend_mid_period", 21) as usize;
        let trend_slow = ctx.param_u64("trend_slow_period", 55) as usize;
        let trend = ema::ema_trend_aligned(&ctx.closes, trend_fast, trend_mid, trend_slow);

        if fast_prev <= slow_prev && fast_last > slow_last {
            let confidence = if matches!(trend, Some((true, _))) { 0.8 } else { 0.6 };
            Ok(Some(HandlerDecision::buy(0.65, confidence, "fast ema crossed above slow ema")))
        } else if fast_prev >= slow_prev && fast_last < slow_last {
            let confidence = if matches!(trend, Some((false, _))) { 0.8 } else { 0.6 };
            Ok(Some(HandlerDecision::sell(0.65, confidence, "fast ema crossed below slow ema")))
        } else {
            Ok(Some(HandlerDecision::hold("no ema crossover")))
        }
    }
}

/// Mean reversion off Bollinger Band extremes.
pub struct BollingerBandsHandler;

impl StrategyHandler for BollingerBandsHandler {
    fn name(&self) -> &'static str {
        "bollinger_bands"
    }

    fn evaluate(&self, ctx: &StrategyContext) -> CoreResult<Option<HandlerDecision>> {
        let Some(bb) = &ctx.bollinger else {
            return Ok(None);
        };
        let close = ctx.last_close();
        match bollinger::signal_label(close, bb) {
            "OVERSOLD" => Ok(Some(HandlerDecision::buy(0.7, 0.65, format!("close {close:.4} at or below lower band {:.4}", bb.lower)))),
            "OVERBOUGHT" => Ok(Some(HandlerDecision::sell(0.7, 0.65, format!("close {close:.4} at or above upper band {:.4}", bb.upper)))),
            _ => Ok(Some(HandlerDecision::hold("close inside the bands"))),
        }
    }
}

/// Like `bollinger_bands`, but refuses to trade once the band width shows
/// the market has broken out of its range.
pub struct RangeTradingHandler;

impl StrategyHandler for RangeTradingHandler {
    fn name(&self) -> &'static str {
        "range_trading"
    }

    fn evaluate(&self, ctx: &StrategyContext) -> CoreResult<Option<HandlerDecision>> {
        let Some(bb) = &ctx.bollinger else {
            return Ok(None);
        };
        let width_threshold = ctx.param_f64("width_threshold", 5.0);
        if bb.width > width_threshold {
            return Ok(Some(HandlerDecision::hold(format!("band width {:.2} exceeds range threshold {width_threshold:.2}, market is trending", bb.width))));
        }
        let close = ctx.last_close();
        match bollinger::signal_label(close, bb) {
            "OVERSOLD" => Ok(Some(HandlerDecision::buy(0.75, 0.7, "price at range floor"))),
            "OVERBOUGHT" => Ok(Some(HandlerDecision::sell(0.75, 0.7, "price at range ceiling"))),
            _ => Ok(Some(HandlerDecision::hold("price mid-range"))),
        }
    }
}

/// Buys/sells as price crosses fixed percentage grid lines around a base
/// price (the SMA by default).
pub struct GridTradingHandler;

impl StrategyHandler for GridTradingHandler {
    fn name(&self) -> &'static str {
        "grid_trading"
    }

    fn evaluate(&self, ctx: &StrategyContext) -> CoreResult<Option<HandlerDecision>> {
        let Some(&base) = ctx.sma.last() else {
            return Ok(None);
        };
        if base <= 0.0 {
            return Ok(None);
        }
        let spacing_pct = ctx.param_f64("grid_spacing_pct", 1.0).max(0.01);
        let levels = ctx.param_f64("grid_levels", 5.0).max(1.0);
        let close = ctx.last_close();
        let pct_diff = (close - base) / base * 100.0;

        if pct_diff <= -spacing_pct {
            let strength = (pct_diff.abs() / (spacing_pct * levels)).clamp(0.0, 1.0);
            Ok(Some(HandlerDecision::buy(strength, 0.55, format!("price {pct_diff:.2}% below base, one grid step down"))))
        } else if pct_diff >= spacing_pct {
            let strength = (pct_diff.abs() / (spacing_pct * levels)).clamp(0.0, 1.0);
            Ok(Some(HandlerDecision::sell(strength, 0.55, format!("price {pct_diff:.2}% above base, one grid step up"))))
        } else {
            Ok(Some(HandlerDecision::hold("price inside the current grid cell")))
        }
    }
}

/// A composite fear/greed read blended from RSI and stochastic %K — the
/// two oscillators already computed for every tick — since no external
/// fear/greed index feed exists anywhere in this service.
pub struct FearGreedHandler;

impl StrategyHandler for FearGreedHandler {
    fn name(&self) -> &'static str {
        "fear_greed"
    }

    fn evaluate(&self, ctx: &StrategyContext) -> CoreResult<Option<HandlerDecision>> {
        let Some(&rsi_value) = ctx.rsi.last() else {
            return Ok(None);
        };
        let stoch_k = ctx.stochastic.last().map(|s| s.k);
        let Some(stoch_k) = stoch_k else {
            return Ok(None);
        };

        let composite = (rsi_value + stoch_k) / 2.0;
        let extreme_fear = ctx.param_f64("extreme_fear_threshold", 25.0);
        let extreme_greed = ctx.param_f64("extreme_greed_threshold", 75.0);

        if composite <= extreme_fear {
            let strength = ((extreme_fear - composite) / extreme_fear).clamp(0.0, 1.0);
            Ok(Some(HandlerDecision::buy(strength, 0.5, format!("composite fear/greed {composite:.1} in extreme fear, contrarian buy"))))
        } else if composite >= extreme_greed {
            let strength = ((composite - extreme_greed) / (100.0 - extreme_greed)).clamp(0.0, 1.0);
            Ok(Some(HandlerDecision::sell(strength, 0.5, format!("composite fear/greed {composite:.1} in extreme greed, contrarian sell"))))
        } else {
            Ok(Some(HandlerDecision::hold(format!("composite fear/greed {composite:.1} is neutral"))))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::SignalAction;
    use crate::store::candle::Candle;
    use crate::types::Timeframe;
    use rust_decimal_macros::dec;

    fn candle(ts: i64, close: f64) -> Candle {
        let close = Decimal::try_from(close).unwrap();
        Candle {
            symbol: "BTCUSDT".into(),
            timeframe: Timeframe::M5,
            ts_open: ts,
            open: close,
            high: close + dec!(1),
            low: close - dec!(1),
            close,
            volume: dec!(10),
            quote_volume: dec!(1000),
            trades: 5,
            taker_buy_volume: dec!(5),
            taker_buy_quote_volume: dec!(500),
        }
    }

    fn frame(closes: &[f64], parameters: serde_json::Value) -> StrategyContext {
        let candles = closes.iter().enumerate().map(|(i, &c)| candle(i as i64 * 300_000, c)).collect();
        StrategyContext::build("BTCUSDT", Timeframe::M5, candles, parameters)
    }

    #[test]
    fn dca_buys_configured_quantity_every_tick() {
        let ctx = frame(&[100.0; 30], serde_json::json!({"quantity": 0.01}));
        let decision = DcaHandler.evaluate(&ctx).unwrap().unwrap();
        assert_eq!(decision.action, SignalAction::Buy);
        assert_eq!(decision.quantity, Some(dec!(0.01)));
    }

    #[test]
    fn rsi_buys_on_deep_oversold_series() {
        let mut closes = vec![100.0];
        for i in 1..30 {
            closes.push(100.0 - i as f64);
        }
        let ctx = frame(&closes, serde_json::json!({}));
        let decision = RsiHandler.evaluate(&ctx).unwrap().unwrap();
        assert_eq!(decision.action, SignalAction::Buy);
    }

    #[test]
    fn ma_crossover_needs_at_least_two_points_per_series() {
        let ctx = frame(&[100.0, 101.0], serde_json::json!({}));
        assert!(MaCrossoverHandler.evaluate(&ctx).unwrap().is_none());
    }

    #[test]
    fn ma_crossover_confidence_is_never_below_the_unconfirmed_floor() {
        // Whatever the series, a crossover decision's confidence is either
        // the unconfirmed 0.6 floor or the trend-confirmed 0.8 ceiling.
        let closes: Vec<f64> = (1..=120).map(|i| i as f64).collect();
        let ctx = frame(&closes, serde_json::json!({}));
        if let Some(d) = MaCrossoverHandler.evaluate(&ctx).unwrap() {
            if matches!(d.action, SignalAction::Buy | SignalAction::Sell) {
                assert!(d.confidence == 0.6 || d.confidence == 0.8);
            }
        }
    }

    #[test]
    fn grid_trading_buys_one_step_below_base() {
        let mut closes = vec![100.0; 25];
        closes.push(97.0);
        let ctx = frame(&closes, serde_json::json!({"grid_spacing_pct": 1.0, "grid_levels": 5.0}));
        let decision = GridTradingHandler.evaluate(&ctx).unwrap().unwrap();
        assert_eq!(decision.action, SignalAction::Buy);
    }

    #[test]
    fn range_trading_holds_on_wide_bands() {
        let mut closes: Vec<f64> = (0..20).map(|i| 100.0 + i as f64 * 3.0).collect();
        closes.push(closes.last().unwrap() - 1.0);
        let ctx = frame(&closes, serde_json::json!({"width_threshold": 1.0}));
        let decision = RangeTradingHandler.evaluate(&ctx).unwrap().unwrap();
        assert_eq!(decision.action, SignalAction::Hold);
    }
}
