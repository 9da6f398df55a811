// =============================================================================
// Time-series store — candles (C1)
// =============================================================================
//
// A dedup-on-insert, retention-pruned store with no fixed capacity: rather
// than a ring buffer's "keep last N", it keeps everything newer than a
// retention cutoff.
// =============================================================================

use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::Timeframe;

/// An immutable OHLCV bar. Keys unique on `(symbol, timeframe, ts_open)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub ts_open: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub quote_volume: Decimal,
    pub trades: u64,
    pub taker_buy_volume: Decimal,
    pub taker_buy_quote_volume: Decimal,
}

impl Candle {
    /// Structural invariant check: `low <= min(open,close) <= max(open,close) <= high`,
    /// `volume >= 0`.
    pub fn is_valid(&self) -> bool {
        let body_lo = self.open.min(self.close);
        let body_hi = self.open.max(self.close);
        self.low <= body_lo && body_hi <= self.high && self.volume >= Decimal::ZERO
    }

    pub fn close_f64(&self) -> f64 {
        self.close.to_f64().unwrap_or(0.0)
    }

    pub fn high_f64(&self) -> f64 {
        self.high.to_f64().unwrap_or(0.0)
    }

    pub fn low_f64(&self) -> f64 {
        self.low.to_f64().unwrap_or(0.0)
    }
}

/// Outcome of an insert — the store never silently overwrites an existing
/// key on the ingestion hot path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Exists,
}

/// Chronological or reverse-chronological order for range reads. Both share
/// the same `BTreeMap`-backed primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, Hash, Eq, PartialEq)]
struct SeriesKey {
    symbol: String,
    timeframe: Timeframe,
}

/// Thread-safe, dedup-on-insert, retention-pruned candle store.
pub struct CandleStore {
    series: RwLock<HashMap<SeriesKey, BTreeMap<i64, Candle>>>,
}

impl CandleStore {
    pub fn new() -> Self {
        Self {
            series: RwLock::new(HashMap::new()),
        }
    }

    pub fn upsert_candle(&self, candle: Candle) -> UpsertOutcome {
        let key = SeriesKey {
            symbol: candle.symbol.clone(),
            timeframe: candle.timeframe,
        };
        let mut series = self.series.write();
        let bucket = series.entry(key).or_default();
        if bucket.contains_key(&candle.ts_open) {
            return UpsertOutcome::Exists;
        }
        bucket.insert(candle.ts_open, candle);
        UpsertOutcome::Inserted
    }

    /// Overwrite a candle unconditionally — distinct admin call, never used
    /// in the ingestion hot path.
    pub fn overwrite_candle(&self, candle: Candle) {
        let key = SeriesKey {
            symbol: candle.symbol.clone(),
            timeframe: candle.timeframe,
        };
        let mut series = self.series.write();
        series.entry(key).or_default().insert(candle.ts_open, candle);
    }

    pub fn latest_candle(&self, symbol: &str, timeframe: Timeframe) -> Option<Candle> {
        let key = SeriesKey {
            symbol: symbol.to_string(),
            timeframe,
        };
        let series = self.series.read();
        series.get(&key).and_then(|b| b.values().next_back().cloned())
    }

    /// Range read shared by indicator math (chronological) and API reads
    /// (reversed). `from`/`to` are inclusive ts bounds; `limit` caps the
    /// returned count, applied after ordering.
    pub fn range_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        from: Option<i64>,
        to: Option<i64>,
        limit: Option<usize>,
        order: Order,
    ) -> Vec<Candle> {
        let key = SeriesKey {
            symbol: symbol.to_string(),
            timeframe,
        };
        let series = self.series.read();
        let Some(bucket) = series.get(&key) else {
            return Vec::new();
        };
        let lo = from.unwrap_or(i64::MIN);
        let hi = to.unwrap_or(i64::MAX);
        let mut out: Vec<Candle> = bucket.range(lo..=hi).map(|(_, c)| c.clone()).collect();
        if order == Order::Descending {
            out.reverse();
        }
        if let Some(n) = limit {
            out.truncate(n);
        }
        out
    }

    /// Drop every candle across every series with `ts_open < before`.
    pub fn delete_before(&self, before: i64) -> usize {
        let mut series = self.series.write();
        let mut removed = 0;
        for bucket in series.values_mut() {
            let keep: BTreeMap<i64, Candle> = bucket.split_off(&before);
            removed += bucket.len();
            *bucket = keep;
        }
        removed
    }

    pub fn count(&self, symbol: &str, timeframe: Timeframe) -> usize {
        let key = SeriesKey {
            symbol: symbol.to_string(),
            timeframe,
        };
        self.series.read().get(&key).map_or(0, |b| b.len())
    }
}

impl Default for CandleStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn candle(ts: i64, close: Decimal) -> Candle {
        Candle {
            symbol: "BTCUSDT".into(),
            timeframe: Timeframe::M1,
            ts_open: ts,
            open: close,
            high: close + dec!(1),
            low: close - dec!(1),
            close,
            volume: dec!(10),
            quote_volume: dec!(100),
            trades: 5,
            taker_buy_volume: dec!(5),
            taker_buy_quote_volume: dec!(50),
        }
    }

    #[test]
    fn candle_validity() {
        let c = candle(0, dec!(100));
        assert!(c.is_valid());
        let mut bad = candle(0, dec!(100));
        bad.low = dec!(200);
        assert!(!bad.is_valid());
    }

    #[test]
    fn dedup_on_insert_is_idempotent() {
        let store = CandleStore::new();
        assert_eq!(store.upsert_candle(candle(0, dec!(100))), UpsertOutcome::Inserted);
        assert_eq!(store.upsert_candle(candle(0, dec!(999))), UpsertOutcome::Exists);
        let range = store.range_candles("BTCUSDT", Timeframe::M1, None, None, None, Order::Ascending);
        assert_eq!(range.len(), 1);
        assert_eq!(range[0].close, dec!(100));
    }

    #[test]
    fn upsert_k_times_equals_once() {
        let store = CandleStore::new();
        for _ in 0..5 {
            store.upsert_candle(candle(60_000, dec!(50)));
        }
        assert_eq!(store.count("BTCUSDT", Timeframe::M1), 1);
    }

    #[test]
    fn range_candles_ascending_and_descending_share_primitive() {
        let store = CandleStore::new();
        for i in 0..5 {
            store.upsert_candle(candle(i * 60_000, Decimal::from(100 + i)));
        }
        let asc = store.range_candles("BTCUSDT", Timeframe::M1, None, None, None, Order::Ascending);
        let desc = store.range_candles("BTCUSDT", Timeframe::M1, None, None, None, Order::Descending);
        assert_eq!(asc.len(), 5);
        assert_eq!(desc.len(), 5);
        for w in asc.windows(2) {
            assert!(w[0].ts_open < w[1].ts_open);
        }
        for w in desc.windows(2) {
            assert!(w[0].ts_open > w[1].ts_open);
        }
    }

    #[test]
    fn latest_candle_returns_newest() {
        let store = CandleStore::new();
        store.upsert_candle(candle(0, dec!(1)));
        store.upsert_candle(candle(60_000, dec!(2)));
        let latest = store.latest_candle("BTCUSDT", Timeframe::M1).unwrap();
        assert_eq!(latest.ts_open, 60_000);
    }

    #[test]
    fn delete_before_prunes_old_candles() {
        let store = CandleStore::new();
        for i in 0..5 {
            store.upsert_candle(candle(i * 60_000, Decimal::from(100 + i)));
        }
        let removed = store.delete_before(120_000);
        assert_eq!(removed, 2);
        assert_eq!(store.count("BTCUSDT", Timeframe::M1), 3);
    }

    #[test]
    fn empty_series_returns_empty_range() {
        let store = CandleStore::new();
        let range = store.range_candles("ETHUSDT", Timeframe::M1, None, None, None, Order::Ascending);
        assert!(range.is_empty());
        assert!(store.latest_candle("ETHUSDT", Timeframe::M1).is_none());
    }
}
