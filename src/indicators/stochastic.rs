// =============================================================================
// Stochastic Oscillator
// =============================================================================
//
// %K = 100 * (close - lowest_low(period)) / (highest_high(period) - lowest_low(period))
// %D = SMA(%K, smoothing)
//
// Standard parameters: period=14, smoothing=3.
// Thresholds: %K > 80 => OVERBOUGHT, %K < 20 => OVERSOLD.
// =============================================================================

use super::sma::calculate_sma;
use crate::store::candle::Candle;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StochasticResult {
    pub k: f64,
    pub d: f64,
}

/// Compute the full %K/%D series for `candles` using `period` and `smoothing`.
///
/// Returns an empty `Vec` when there is not enough data, or degenerate
/// (zero-range) lookback windows are encountered throughout.
pub fn calculate_stochastic(candles: &[Candle], period: usize, smoothing: usize) -> Vec<StochasticResult> {
    if period == 0 || smoothing == 0 || candles.len() < period {
        return Vec::new();
    }

    let mut k_values = Vec::with_capacity(candles.len() - period + 1);
    for window in candles.windows(period) {
        let highest = window.iter().map(|c| c.high_f64()).fold(f64::MIN, f64::max);
        let lowest = window.iter().map(|c| c.low_f64()).fold(f64::MAX, f64::min);
        let close = window.last().unwrap().close_f64();
        let range = highest - lowest;
        let k = if range == 0.0 { 50.0 } else { 100.0 * (close - lowest) / range };
        if !k.is_finite() {
            continue;
        }
        k_values.push(k);
    }

    if k_values.len() < smoothing {
        return Vec::new();
    }

    let d_values = calculate_sma(&k_values, smoothing);
    let offset = k_values.len() - d_values.len();

    d_values
        .iter()
        .enumerate()
        .map(|(i, &d)| StochasticResult { k: k_values[i + offset], d })
        .collect()
}

/// Standard 14/3 stochastic.
pub fn calculate(candles: &[Candle]) -> Vec<StochasticResult> {
    calculate_stochastic(candles, 14, 3)
}

/// Label the most recent %K reading.
pub fn signal_label(result: &StochasticResult) -> &'static str {
    if result.k >= 80.0 {
        "OVERBOUGHT"
    } else if result.k <= 20.0 {
        "OVERSOLD"
    } else {
        "NEUTRAL"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Timeframe;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn d(v: f64) -> Decimal {
        Decimal::from_str(&format!("{v}")).unwrap()
    }

    fn candle(high: f64, low: f64, close: f64) -> Candle {
        Candle {
            symbol: "BTCUSDT".into(),
            timeframe: Timeframe::M1,
            ts_open: 0,
            open: d(close),
            high: d(high),
            low: d(low),
            close: d(close),
            volume: d(10.0),
            quote_volume: d(100.0),
            trades: 1,
            taker_buy_volume: d(5.0),
            taker_buy_quote_volume: d(50.0),
        }
    }

    #[test]
    fn stochastic_insufficient_data() {
        let candles: Vec<Candle> = (0..5).map(|i| candle(100.0 + i as f64, 90.0 + i as f64, 95.0 + i as f64)).collect();
        assert!(calculate_stochastic(&candles, 14, 3).is_empty());
    }

    #[test]
    fn stochastic_at_high_of_range_is_overbought() {
        let candles: Vec<Candle> = (0..20)
            .map(|i| candle(110.0, 90.0, if i == 19 { 110.0 } else { 100.0 }))
            .collect();
        let series = calculate_stochastic(&candles, 14, 3);
        assert!(!series.is_empty());
        let last = series.last().unwrap();
        assert_eq!(signal_label(last), "OVERBOUGHT");
    }

    #[test]
    fn stochastic_flat_range_is_neutral_fifty() {
        let candles: Vec<Candle> = (0..20).map(|_| candle(100.0, 100.0, 100.0)).collect();
        let series = calculate_stochastic(&candles, 14, 3);
        assert!(!series.is_empty());
        for r in &series {
            assert!((r.k - 50.0).abs() < 1e-10);
        }
    }
}
