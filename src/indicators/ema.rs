// =============================================================================
// Exponential Moving Average (EMA)
// =============================================================================
//
// EMA gives more weight to recent prices, making it more responsive to new
// information than the Simple Moving Average (SMA).
//
// Formula:
//   multiplier = 2 / (period + 1)
//   EMA_t      = close_t * multiplier + EMA_{t-1} * (1 - multiplier)
//
// The very first EMA value is seeded with the SMA of the first `period` closes.
// =============================================================================

/// Compute the EMA series for the given `closes` slice and look-back `period`.
///
/// Returns an empty `Vec` when the input is too short or the period is zero.
/// Each output element corresponds to a close starting at index `period - 1`.
///
/// # Edge cases
/// - `period == 0` => empty vec (division by zero guard)
/// - `closes.len() < period` => empty vec
/// - Non-finite intermediate values are skipped; the computation resets.
pub fn calculate_ema(closes: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || closes.len() < period {
        return Vec::new();
    }

    let divisor = (period + 1) as f64;
    // Guard against degenerate (should never happen with period >= 1, but be safe).
    if divisor == 0.0 {
        return Vec::new();
    }
    let multiplier = 2.0 / divisor;

    // Seed: SMA of the first `period` values.
    let sma: f64 = closes[..period].iter().sum::<f64>() / period as f64;
    if !sma.is_finite() {
        return Vec::new();
    }

    let mut result = Vec::with_capacity(closes.len() - period + 1);
    result.push(sma);

    let mut prev_ema = sma;
    for &close in &closes[period..] {
        let ema = close * multiplier + prev_ema * (1.0 - multiplier);
        if !ema.is_finite() {
            // If we hit a non-finite value, stop producing further results —
            // downstream consumers should not trust a broken series.
            break;
        }
        result.push(ema);
        prev_ema = ema;
    }

    result
}

/// Check whether a fast/mid/slow EMA stack is trend-aligned, for
/// caller-supplied `(fast, mid, slow)` periods — the `ema_trend_alignment`
/// strategy handler lets a strategy tune its own stack instead of being
/// pinned to one hardcoded triple.
///
/// Returns `Some((is_bullish, strength))` where:
/// - `is_bullish == true`  when fast > mid > slow  (bullish alignment)
/// - `is_bullish == false` when fast < mid < slow  (bearish alignment)
/// - `strength = |fast - slow| / slow` — a normalised measure of spread
///
/// Returns `None` when:
/// - There are not enough data points for the slowest EMA.
/// - Any of the required EMA series are empty.
/// - The EMAs are *not* fully aligned in either direction (mixed ordering).
/// - The slow EMA is zero (division guard).
/// - The computed strength is non-finite.
pub fn ema_trend_aligned(closes: &[f64], fast: usize, mid: usize, slow: usize) -> Option<(bool, f64)> {
    if closes.len() < slow {
        return None;
    }

    let ema_fast = calculate_ema(closes, fast);
    let ema_mid = calculate_ema(closes, mid);
    let ema_slow = calculate_ema(closes, slow);

    let f = *ema_fast.last()?;
    let m = *ema_mid.last()?;
    let s = *ema_slow.last()?;

    let bullish = f > m && m > s;
    let bearish = f < m && m < s;

    if !bullish && !bearish {
        return None; // Not clearly aligned.
    }

    if s == 0.0 {
        return None;
    }

    let strength = (f - s).abs() / s;
    if !strength.is_finite() {
        return None;
    }

    Some((bullish, strength))
}
