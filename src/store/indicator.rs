// =============================================================================
// Time-series store — indicator samples (C1)
// =============================================================================

use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::store::candle::{Order, UpsertOutcome};
use crate::types::Timeframe;

/// `(symbol, timeframe, name, ts) -> {value?, values?, signal?, ...}`.
/// `values` carries a small named-scalar map for multi-component indicators
/// (e.g. MACD `{macd, signal, histogram}`); `value` is the primary scalar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorSample {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub name: String,
    pub ts: i64,
    pub value: Option<f64>,
    #[serde(default)]
    pub values: HashMap<String, f64>,
    pub signal: Option<String>,
    pub signal_strength: Option<f64>,
    pub overbought: Option<bool>,
    pub oversold: Option<bool>,
}

#[derive(Debug, Clone, Hash, Eq, PartialEq)]
struct SeriesKey {
    symbol: String,
    timeframe: Timeframe,
    name: String,
}

pub struct IndicatorStore {
    series: RwLock<HashMap<SeriesKey, BTreeMap<i64, IndicatorSample>>>,
}

impl IndicatorStore {
    pub fn new() -> Self {
        Self {
            series: RwLock::new(HashMap::new()),
        }
    }

    fn key(sample: &IndicatorSample) -> SeriesKey {
        SeriesKey {
            symbol: sample.symbol.clone(),
            timeframe: sample.timeframe,
            name: sample.name.clone(),
        }
    }

    /// Idempotent on `(symbol,timeframe,name,ts)` — re-running indicator
    /// recomputation over the same candle frame does not duplicate rows.
    pub fn upsert_indicator(&self, sample: IndicatorSample) -> UpsertOutcome {
        let key = Self::key(&sample);
        let mut series = self.series.write();
        let bucket = series.entry(key).or_default();
        if bucket.contains_key(&sample.ts) {
            return UpsertOutcome::Exists;
        }
        bucket.insert(sample.ts, sample);
        UpsertOutcome::Inserted
    }

    pub fn latest(&self, symbol: &str, timeframe: Timeframe, name: &str) -> Option<IndicatorSample> {
        let key = SeriesKey {
            symbol: symbol.to_string(),
            timeframe,
            name: name.to_string(),
        };
        self.series
            .read()
            .get(&key)
            .and_then(|b| b.values().next_back().cloned())
    }

    pub fn range(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        name: &str,
        from: Option<i64>,
        to: Option<i64>,
        order: Order,
    ) -> Vec<IndicatorSample> {
        let key = SeriesKey {
            symbol: symbol.to_string(),
            timeframe,
            name: name.to_string(),
        };
        let series = self.series.read();
        let Some(bucket) = series.get(&key) else {
            return Vec::new();
        };
        let lo = from.unwrap_or(i64::MIN);
        let hi = to.unwrap_or(i64::MAX);
        let mut out: Vec<IndicatorSample> = bucket.range(lo..=hi).map(|(_, s)| s.clone()).collect();
        if order == Order::Descending {
            out.reverse();
        }
        out
    }

    pub fn delete_before(&self, before: i64) -> usize {
        let mut series = self.series.write();
        let mut removed = 0;
        for bucket in series.values_mut() {
            let keep = bucket.split_off(&before);
            removed += bucket.len();
            *bucket = keep;
        }
        removed
    }
}

impl Default for IndicatorStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(ts: i64, value: f64) -> IndicatorSample {
        IndicatorSample {
            symbol: "BTCUSDT".into(),
            timeframe: Timeframe::M1,
            name: "rsi".into(),
            ts,
            value: Some(value),
            values: HashMap::new(),
            signal: None,
            signal_strength: None,
            overbought: None,
            oversold: None,
        }
    }

    #[test]
    fn reruns_are_idempotent() {
        let store = IndicatorStore::new();
        assert_eq!(store.upsert_indicator(sample(0, 50.0)), UpsertOutcome::Inserted);
        assert_eq!(store.upsert_indicator(sample(0, 999.0)), UpsertOutcome::Exists);
        assert_eq!(store.latest("BTCUSDT", Timeframe::M1, "rsi").unwrap().value, Some(50.0));
    }

    #[test]
    fn range_respects_order() {
        let store = IndicatorStore::new();
        for i in 0..3 {
            store.upsert_indicator(sample(i * 60_000, i as f64));
        }
        let asc = store.range("BTCUSDT", Timeframe::M1, "rsi", None, None, Order::Ascending);
        let desc = store.range("BTCUSDT", Timeframe::M1, "rsi", None, None, Order::Descending);
        assert_eq!(asc.first().unwrap().ts, 0);
        assert_eq!(desc.first().unwrap().ts, 120_000);
    }

    #[test]
    fn multi_scalar_values_map_round_trips() {
        let mut s = sample(0, -1.2);
        s.name = "macd".into();
        s.values.insert("macd".into(), -1.2);
        s.values.insert("signal".into(), -0.8);
        s.values.insert("histogram".into(), -0.4);
        let store = IndicatorStore::new();
        store.upsert_indicator(s);
        let got = store.latest("BTCUSDT", Timeframe::M1, "macd").unwrap();
        assert_eq!(got.values.get("histogram"), Some(&-0.4));
    }
}
