// =============================================================================
// Indicator engine driver (C4)
// =============================================================================
//
// Wires the pure indicator functions in this module to the time-series
// store: given a chronological candle frame, compute every indicator in the
// fixed set and upsert one `IndicatorSample` per name keyed at the newest
// candle's `ts_open`. `IndicatorStore::upsert_indicator` is idempotent, so
// re-running this over the same frame after a later candle arrives never
// duplicates the earlier rows.
// =============================================================================

use std::collections::HashMap;

use crate::store::candle::Candle;
use crate::store::indicator::{IndicatorSample, IndicatorStore};
use crate::types::Timeframe;

use super::{atr, bollinger, ema, macd, rsi, sma, stochastic};

const RSI_PERIOD: usize = 14;
const BB_PERIOD: usize = 20;
const BB_STD: f64 = 2.0;
const ATR_PERIOD: usize = 14;
const MA_PERIODS: [usize; 4] = [12, 20, 26, 50];
const OVERSOLD: f64 = 30.0;
const OVERBOUGHT: f64 = 70.0;

/// Recompute every fixed-set indicator over `candles` (chronological, oldest
/// first) and upsert one sample per name at the latest candle's `ts_open`.
/// Returns the number of samples newly inserted (as opposed to already
/// existing at that timestamp).
pub fn recompute_latest(store: &IndicatorStore, symbol: &str, timeframe: Timeframe, candles: &[Candle]) -> usize {
    let Some(last) = candles.last() else { return 0 };
    let ts = last.ts_open;
    let closes: Vec<f64> = candles.iter().map(Candle::close_f64).collect();

    let mut inserted = 0;

    if let Some((value, label)) = rsi::current_rsi(&closes, RSI_PERIOD, OVERSOLD, OVERBOUGHT) {
        let signal = match label {
            "OVERSOLD" => "buy",
            "OVERBOUGHT" => "sell",
            _ => "hold",
        };
        inserted += upsert_scalar(
            store,
            symbol,
            timeframe,
            "rsi",
            ts,
            value,
            Some(signal.to_string()),
            Some(value >= OVERBOUGHT),
            Some(value <= OVERSOLD),
        );
    }

    if let Some(m) = macd::calculate(&closes).last() {
        let mut values = HashMap::new();
        values.insert("macd".to_string(), m.macd);
        values.insert("signal".to_string(), m.signal);
        values.insert("histogram".to_string(), m.histogram);
        inserted += upsert_multi(store, symbol, timeframe, "macd", ts, m.macd, values, None);
    }

    if let Some(bb) = bollinger::calculate_bollinger(&closes, BB_PERIOD, BB_STD) {
        let label = bollinger::signal_label(*closes.last().unwrap_or(&0.0), &bb);
        let mut values = HashMap::new();
        values.insert("upper".to_string(), bb.upper);
        values.insert("middle".to_string(), bb.middle);
        values.insert("lower".to_string(), bb.lower);
        values.insert("width".to_string(), bb.width);
        inserted += upsert_multi(store, symbol, timeframe, "bollinger_bands", ts, bb.middle, values, Some(label.to_string()));
    }

    for period in MA_PERIODS {
        if let Some(value) = sma::current_sma(&closes, period) {
            inserted += upsert_scalar(store, symbol, timeframe, &format!("sma_{period}"), ts, value, None, None, None);
        }
        if let Some(&value) = ema::calculate_ema(&closes, period).last() {
            inserted += upsert_scalar(store, symbol, timeframe, &format!("ema_{period}"), ts, value, None, None, None);
        }
    }

    if let Some(st) = stochastic::calculate(candles).last() {
        let label = stochastic::signal_label(st);
        let mut values = HashMap::new();
        values.insert("k".to_string(), st.k);
        values.insert("d".to_string(), st.d);
        inserted += upsert_multi(store, symbol, timeframe, "stochastic", ts, st.k, values, Some(label.to_string()));
    }

    if let Some(value) = atr::calculate_atr(candles, ATR_PERIOD) {
        inserted += upsert_scalar(store, symbol, timeframe, "atr", ts, value, None, None, None);
    }

    inserted
}

#[allow(clippy::too_many_arguments)]
fn upsert_scalar(
    store: &IndicatorStore,
    symbol: &str,
    timeframe: Timeframe,
    name: &str,
    ts: i64,
    value: f64,
    signal: Option<String>,
    overbought: Option<bool>,
    oversold: Option<bool>,
) -> usize {
    let sample = IndicatorSample {
        symbol: symbol.to_string(),
        timeframe,
        name: name.to_string(),
        ts,
        value: Some(value),
        values: HashMap::new(),
        signal,
        signal_strength: None,
        overbought,
        oversold,
    };
    matches!(store.upsert_indicator(sample), crate::store::UpsertOutcome::Inserted) as usize
}

fn upsert_multi(
    store: &IndicatorStore,
    symbol: &str,
    timeframe: Timeframe,
    name: &str,
    ts: i64,
    primary: f64,
    values: HashMap<String, f64>,
    signal: Option<String>,
) -> usize {
    let sample = IndicatorSample {
        symbol: symbol.to_string(),
        timeframe,
        name: name.to_string(),
        ts,
        value: Some(primary),
        values,
        signal,
        signal_strength: None,
        overbought: None,
        oversold: None,
    };
    matches!(store.upsert_indicator(sample), crate::store::UpsertOutcome::Inserted) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn d(v: f64) -> Decimal {
        Decimal::from_str(&format!("{v}")).unwrap()
    }

    fn candles(n: usize) -> Vec<Candle> {
        (0..n)
            .map(|i| {
                let base = 100.0 + i as f64 * 0.5;
                Candle {
                    symbol: "BTCUSDT".into(),
                    timeframe: Timeframe::M1,
                    ts_open: i as i64 * 60_000,
                    open: d(base),
                    high: d(base + 1.0),
                    low: d(base - 1.0),
                    close: d(base + 0.3),
                    volume: d(10.0),
                    quote_volume: d(1000.0),
                    trades: 5,
                    taker_buy_volume: d(5.0),
                    taker_buy_quote_volume: d(500.0),
                }
            })
            .collect()
    }

    #[test]
    fn recompute_is_idempotent_at_same_timestamp() {
        let store = IndicatorStore::new();
        let frame = candles(60);
        let first = recompute_latest(&store, "BTCUSDT", Timeframe::M1, &frame);
        assert!(first > 0);
        let second = recompute_latest(&store, "BTCUSDT", Timeframe::M1, &frame);
        assert_eq!(second, 0, "re-running over the same frame must not duplicate rows");
    }

    #[test]
    fn recompute_writes_rsi_macd_and_moving_averages() {
        let store = IndicatorStore::new();
        let frame = candles(60);
        recompute_latest(&store, "BTCUSDT", Timeframe::M1, &frame);
        assert!(store.latest("BTCUSDT", Timeframe::M1, "rsi").is_some());
        assert!(store.latest("BTCUSDT", Timeframe::M1, "macd").is_some());
        assert!(store.latest("BTCUSDT", Timeframe::M1, "sma_20").is_some());
        assert!(store.latest("BTCUSDT", Timeframe::M1, "ema_12").is_some());
        assert!(store.latest("BTCUSDT", Timeframe::M1, "atr").is_some());
    }

    #[test]
    fn insufficient_history_yields_no_indicators() {
        let store = IndicatorStore::new();
        let frame = candles(3);
        let inserted = recompute_latest(&store, "BTCUSDT", Timeframe::M1, &frame);
        assert_eq!(inserted, 0);
    }

    #[test]
    fn empty_frame_is_a_no_op() {
        let store = IndicatorStore::new();
        assert_eq!(recompute_latest(&store, "BTCUSDT", Timeframe::M1, &[]), 0);
    }
}
