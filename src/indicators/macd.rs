// =============================================================================
// Moving Average Convergence Divergence (MACD)
// =============================================================================
//
// MACD line   = EMA(fast) - EMA(slow)
// Signal line = EMA(MACD line, signal_period)
// Histogram   = MACD line - Signal line
//
// Standard parameters: fast=12, slow=26, signal=9.
// =============================================================================

use super::ema::calculate_ema;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MacdResult {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
}

/// Crossover direction between the MACD and signal lines on the most recent
/// two bars.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacdCrossover {
    Bullish,
    Bearish,
    None,
}

/// Compute the full MACD series using the standard 12/26/9 parameters.
///
/// Returns an empty `Vec` when there isn't enough data for the slow EMA plus
/// the signal-line smoothing.
pub fn calculate_macd(closes: &[f64], fast: usize, slow: usize, signal_period: usize) -> Vec<MacdResult> {
    if fast == 0 || slow == 0 || signal_period == 0 || fast >= slow {
        return Vec::new();
    }
    if closes.len() < slow {
        return Vec::new();
    }

    let ema_fast = calculate_ema(closes, fast);
    let ema_slow = calculate_ema(closes, slow);

    // ema_fast starts at index fast-1, ema_slow starts at index slow-1. Align
    // both series to the slow EMA's starting point.
    let offset = slow - fast;
    if ema_fast.len() <= offset {
        return Vec::new();
    }
    let aligned_fast = &ema_fast[offset..];
    let n = aligned_fast.len().min(ema_slow.len());

    let macd_line: Vec<f64> = (0..n).map(|i| aligned_fast[i] - ema_slow[i]).collect();
    if macd_line.len() < signal_period {
        return Vec::new();
    }

    let signal_line = calculate_ema(&macd_line, signal_period);
    let sig_offset = macd_line.len() - signal_line.len();

    signal_line
        .iter()
        .enumerate()
        .map(|(i, &sig)| {
            let macd = macd_line[i + sig_offset];
            MacdResult {
                macd,
                signal: sig,
                histogram: macd - sig,
            }
        })
        .collect()
}

/// Standard 12/26/9 MACD.
pub fn calculate(closes: &[f64]) -> Vec<MacdResult> {
    calculate_macd(closes, 12, 26, 9)
}

/// Detect a crossover between the last two histogram values.
pub fn crossover(series: &[MacdResult]) -> MacdCrossover {
    if series.len() < 2 {
        return MacdCrossover::None;
    }
    let prev = &series[series.len() - 2];
    let last = &series[series.len() - 1];
    if prev.histogram <= 0.0 && last.histogram > 0.0 {
        MacdCrossover::Bullish
    } else if prev.histogram >= 0.0 && last.histogram < 0.0 {
        MacdCrossover::Bearish
    } else {
        MacdCrossover::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn macd_insufficient_data() {
        let closes: Vec<f64> = (1..=20).map(|x| x as f64).collect();
        assert!(calculate(&closes).is_empty());
    }

    #[test]
    fn macd_ascending_series_is_positive() {
        let closes: Vec<f64> = (1..=100).map(|x| x as f64).collect();
        let series = calculate(&closes);
        assert!(!series.is_empty());
        // A steadily rising market has fast EMA above slow EMA => positive MACD.
        for r in &series {
            assert!(r.macd > 0.0, "expected positive MACD for ascending series");
        }
    }

    #[test]
    fn macd_descending_series_is_negative() {
        let closes: Vec<f64> = (1..=100).rev().map(|x| x as f64).collect();
        let series = calculate(&closes);
        assert!(!series.is_empty());
        for r in &series {
            assert!(r.macd < 0.0);
        }
    }

    #[test]
    fn macd_flat_series_is_zero() {
        let closes = vec![100.0; 100];
        let series = calculate(&closes);
        for r in &series {
            assert!(r.macd.abs() < 1e-8);
            assert!(r.histogram.abs() < 1e-8);
        }
    }

    #[test]
    fn macd_invalid_parameters_return_empty() {
        let closes: Vec<f64> = (1..=100).map(|x| x as f64).collect();
        assert!(calculate_macd(&closes, 0, 26, 9).is_empty());
        assert!(calculate_macd(&closes, 26, 12, 9).is_empty()); // fast >= slow
    }

    #[test]
    fn crossover_detects_bullish_flip() {
        let series = vec![
            MacdResult { macd: -1.0, signal: -0.5, histogram: -0.5 },
            MacdResult { macd: 0.2, signal: -0.1, histogram: 0.3 },
        ];
        assert_eq!(crossover(&series), MacdCrossover::Bullish);
    }

    #[test]
    fn crossover_detects_bearish_flip() {
        let series = vec![
            MacdResult { macd: 1.0, signal: 0.5, histogram: 0.5 },
            MacdResult { macd: -0.2, signal: 0.1, histogram: -0.3 },
        ];
        assert_eq!(crossover(&series), MacdCrossover::Bearish);
    }

    #[test]
    fn crossover_none_on_short_series() {
        let series = vec![MacdResult { macd: 1.0, signal: 0.5, histogram: 0.5 }];
        assert_eq!(crossover(&series), MacdCrossover::None);
    }
}
