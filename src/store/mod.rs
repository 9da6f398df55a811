// =============================================================================
// Time-series store (C1): append-dedup candles and indicator samples keyed
// by (symbol, timeframe, timestamp).
// =============================================================================

pub mod candle;
pub mod indicator;

pub use candle::{Candle, CandleStore, Order, UpsertOutcome};
pub use indicator::{IndicatorSample, IndicatorStore};
